//! # codebuf Prelude
//!
//! This module provides a convenient prelude for the most commonly used types and traits
//! from the codebuf library. Import this module to get quick access to everything needed to
//! allocate a buffer, fill it and call into it.

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all codebuf operations
pub use crate::Error;

/// The result type used throughout codebuf
pub use crate::Result;

// ================================================================================================
// Buffers
// ================================================================================================

/// Growable code buffer and region ownership
pub use crate::buffer::{CodeBuffer, Ownership};

// ================================================================================================
// Memory Configuration
// ================================================================================================

/// Policy presets and the flag sets they are made of
pub use crate::memory::{
    AllocationFlags, AllocationPolicy, AllocationStrategy, FreeFlags, Protection,
};

/// Allocation seam and its operating system implementation
pub use crate::memory::{AllocationContext, MemoryProvider, SystemProvider};

// ================================================================================================
// Invocation
// ================================================================================================

/// Typed entry points and owned functions
pub use crate::invoke::{entry_point, invoke, JitFunction, NativeSignature, NativeType};

/// Calling convention tables
pub use crate::invoke::{CallLayout, CallingConvention, SignatureShape, ValueClass};
