use thiserror::Error;

use crate::memory::AllocationStrategy;

macro_rules! allocation_error {
    // Capture the last OS error for the calling thread
    ($strategy:expr, $size:expr) => {
        crate::Error::AllocationFailed {
            strategy: $strategy,
            size: $size,
            source: std::io::Error::last_os_error(),
        }
    };

    // Use a supplied error as the source
    ($strategy:expr, $size:expr, $source:expr) => {
        crate::Error::AllocationFailed {
            strategy: $strategy,
            size: $size,
            source: $source,
        }
    };
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// Only conditions that a caller can react to are represented here. Contract violations such as
/// invoking bytes with a mismatched signature or reading through a stale base address are
/// undefined behaviour and are guarded by `unsafe` signatures instead of runtime checks.
///
/// # Error Categories
///
/// ## Allocation Errors
/// - [`Error::AllocationFailed`] - The operating system or heap refused a request
/// - [`Error::InvalidLayout`] - The heap rejected the requested size/alignment pair
/// - [`Error::NotWritable`] - The policy yields regions the buffer cannot write into
///
/// ## Capacity Errors
/// - [`Error::ZeroCapacity`] - A region of zero bytes was requested
/// - [`Error::CapacityOverflow`] - Growth arithmetic overflowed `usize`
///
/// # Examples
///
/// ```rust,no_run
/// use codebuf::{AllocationPolicy, CodeBuffer, Error};
///
/// match CodeBuffer::new(64, AllocationPolicy::executable()) {
///     Ok(buffer) => println!("Allocated {} bytes", buffer.capacity()),
///     Err(Error::AllocationFailed { strategy, size, source }) => {
///         eprintln!("{strategy} allocation of {size} bytes denied: {source}");
///     }
///     Err(e) => eprintln!("Other error: {e}"),
/// }
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// The memory provider could not satisfy an allocation.
    ///
    /// Raised when the operating system denies a virtual memory request (for example because
    /// writable and executable pages are forbidden by a hardening policy, or the address space
    /// is exhausted) or when the heap returns null. The request is never retried and never
    /// degraded to weaker protection.
    ///
    /// # Fields
    ///
    /// * `strategy` - The strategy that was asked for memory
    /// * `size` - Number of bytes requested
    /// * `source` - The underlying OS error
    #[error("{strategy} allocation of {size} bytes failed: {source}")]
    AllocationFailed {
        /// The allocation strategy that failed
        strategy: AllocationStrategy,
        /// The requested size in bytes
        size: usize,
        /// The error reported by the operating system
        #[source]
        source: std::io::Error,
    },

    /// A region with a capacity of zero bytes was requested.
    ///
    /// Neither strategy can hand out an empty region, so construction and adoption require a
    /// capacity of at least one byte.
    #[error("A code buffer requires a capacity of at least one byte")]
    ZeroCapacity,

    /// The policy describes regions that cannot be written through.
    ///
    /// Raised before anything is allocated when a virtual policy lacks write access, carries
    /// [`crate::Protection::GUARD`], or reserves address space without committing it. Such a
    /// region would fault on the first push.
    ///
    /// # Fields
    ///
    /// * `protection` - The protection the rejected regions would carry
    /// * `allocation` - The allocation type of the rejected policy
    #[error("Policy yields regions that are not writable ({protection:?}, {allocation:?})")]
    NotWritable {
        /// Effective protection of the rejected policy
        protection: crate::Protection,
        /// Allocation type of the rejected policy
        allocation: crate::AllocationFlags,
    },

    /// Computing the next capacity overflowed `usize`.
    #[error("Capacity computation overflowed")]
    CapacityOverflow,

    /// The heap strategy could not build a valid layout for the request.
    #[error("{0}")]
    InvalidLayout(#[from] std::alloc::LayoutError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocation_error_keeps_source() {
        let error = allocation_error!(
            AllocationStrategy::Virtual,
            4096,
            std::io::Error::from(std::io::ErrorKind::PermissionDenied)
        );

        match &error {
            Error::AllocationFailed {
                strategy,
                size,
                source,
            } => {
                assert_eq!(*strategy, AllocationStrategy::Virtual);
                assert_eq!(*size, 4096);
                assert_eq!(source.kind(), std::io::ErrorKind::PermissionDenied);
            }
            _ => panic!("Expected AllocationFailed"),
        }

        let message = error.to_string();
        assert!(message.starts_with("virtual allocation of 4096 bytes failed"));
        assert!(std::error::Error::source(&error).is_some());
    }

    #[test]
    fn capacity_errors_display() {
        assert_eq!(
            Error::ZeroCapacity.to_string(),
            "A code buffer requires a capacity of at least one byte"
        );
        assert_eq!(
            Error::CapacityOverflow.to_string(),
            "Capacity computation overflowed"
        );
    }

    #[test]
    fn not_writable_names_the_policy() {
        let error = Error::NotWritable {
            protection: crate::Protection::READ_EXECUTE,
            allocation: crate::AllocationFlags::COMMIT | crate::AllocationFlags::RESERVE,
        };

        let message = error.to_string();
        assert!(message.starts_with("Policy yields regions that are not writable"));
        assert!(message.contains("EXECUTE"));
        assert!(std::error::Error::source(&error).is_none());
    }
}
