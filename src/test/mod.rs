//! Shared functionality for unit tests
//!
//! - [`RecordingProvider`] wraps the system provider and records every allocation and release,
//!   optionally refusing allocations after a configurable number of successes
//! - [`HostCapabilities`] detects whether this host can run the machine code snippets used by
//!   the invocation tests


pub use capabilities::*;
pub use recording::*;
