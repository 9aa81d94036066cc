// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]

//! # codebuf
//!
//! Growable raw code buffers with OS-controlled memory protection, and typed invocation of
//! the machine code written into them.
//!
//! A JIT or a runtime patcher needs three things from memory that `Vec<u8>` cannot give it:
//! control over page protection (read, write, execute), a stable base address that can be
//! turned into a function pointer, and a way to call that pointer with a known signature.
//! `codebuf` provides exactly that and nothing above it: no assembler, no instruction
//! encoding, no code-signing.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use codebuf::prelude::*;
//!
//! // An executable buffer that grows as bytes are appended
//! let mut code = CodeBuffer::new(16, AllocationPolicy::executable())?;
//!
//! // x86-64 System V: mov eax, edi; add eax, esi; ret
//! code.push_range(&[0x89, 0xF8, 0x01, 0xF0, 0xC3])?;
//!
//! let sum = unsafe { code.invoke::<extern "C" fn(i32, i32) -> i32>((3, 5)) };
//! assert_eq!(sum, 8);
//! # Ok::<(), codebuf::Error>(())
//! ```
//!
//! ## Architecture
//!
//! - [`memory`] - allocation policies, protection flags and the [`MemoryProvider`] seam over
//!   `mmap`/`VirtualAllocEx` and the process heap
//! - [`buffer`] - the growable [`CodeBuffer`] with owned or borrowed storage
//! - [`invoke`] - typed entry points, per-ABI argument placement and [`invoke::JitFunction`]
//! - [`prelude`] - convenient re-exports of commonly used types
//! - [`Error`] and [`Result`] - error handling
//!
//! ### Memory Lifecycle
//!
//! Every region a buffer owns is returned to its provider exactly once, with the size it was
//! allocated with: on growth (the old region), on [`CodeBuffer::dispose`], or on drop.
//! Regions adopted from the caller are never released. Growth allocates before it releases,
//! so a failed growth leaves the buffer intact.
//!
//! ### Logging
//!
//! Allocation, release, growth and promotion are reported through [`tracing`] at `debug`
//! level. The library never installs a subscriber.
//!
//! ## Platform Notes
//!
//! Virtual allocations map to `VirtualAllocEx`/`VirtualFreeEx` on Windows and to
//! `mmap`/`munmap` elsewhere. Hosts that forbid writable and executable pages (hardened
//! runtimes, SELinux `execmem`, OpenBSD W^X) refuse [`AllocationPolicy::executable`] with
//! [`Error::AllocationFailed`]. Writing code and running it on aarch64 additionally requires an
//! instruction cache flush, which is left to the caller.

#[macro_use]
pub(crate) mod macros;

#[macro_use]
pub(crate) mod error;

/// Shared functionality which is used in unit- and integration-tests
#[cfg(test)]
pub(crate) mod test;

/// Convenient re-exports of the most commonly used types and traits.
///
/// # Example
///
/// ```rust
/// use codebuf::prelude::*;
///
/// let mut buffer = CodeBuffer::new(8, AllocationPolicy::heap())?;
/// buffer.push(0xC3)?;
/// assert_eq!(buffer.len(), 1);
/// # Ok::<(), codebuf::Error>(())
/// ```
pub mod prelude;

/// Allocation policies, protection flags and memory providers
///
/// # Key Types
///
/// - [`memory::AllocationPolicy`] - strategy and flags replayed on every (re)allocation
/// - [`memory::MemoryProvider`] - the allocation seam, implemented by
///   [`memory::SystemProvider`] and by test fakes
/// - [`memory::AllocationContext`] - process handle and page size for virtual allocations
pub mod memory;

/// Growable raw byte buffers
///
/// See [`CodeBuffer`] for the growth and ownership rules.
pub mod buffer;

/// Typed invocation of generated code and calling convention tables
pub mod invoke;

/// `codebuf` Result type
///
/// A type alias for [`std::result::Result<T, Error>`] where the error type is always [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// `codebuf` Error type
///
/// # Examples
///
/// ```rust
/// use codebuf::{AllocationPolicy, CodeBuffer, Error};
///
/// match CodeBuffer::new(0, AllocationPolicy::heap()) {
///     Err(Error::ZeroCapacity) => {}
///     other => panic!("unexpected {other:?}"),
/// }
/// ```
pub use error::Error;

/// A growable code buffer and the ownership of its current region.
pub use buffer::{CodeBuffer, Ownership};

/// Allocation configuration and the provider seam.
pub use memory::{
    AllocationContext, AllocationFlags, AllocationPolicy, AllocationStrategy, FreeFlags,
    MemoryProvider, Protection, SystemProvider,
};

/// Typed entry points into generated code.
pub use invoke::{CallingConvention, JitFunction, NativeSignature, NativeType};
