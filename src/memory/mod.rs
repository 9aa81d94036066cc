//! Memory provider: requests and releases fixed-size regions of process memory.
//!
//! This module is the leaf of the crate. It knows how to obtain memory from the operating
//! system under an [`AllocationPolicy`] and how to give it back, and nothing else: it keeps no
//! record of what it handed out. Every call is a fresh, single request that either succeeds or
//! reports [`crate::Error::AllocationFailed`] immediately.
//!
//! # Architecture
//!
//! - [`MemoryProvider`] - The allocate/release contract a [`crate::CodeBuffer`] is built on
//! - [`SystemProvider`] - The provider backed by the host OS and the global heap
//! - [`AllocationContext`] - Process handle and page size injected into a [`SystemProvider`]
//! - [`AllocationPolicy`] / [`AllocationStrategy`] - What kind of memory to request
//! - [`AllocationFlags`], [`Protection`], [`FreeFlags`] - Win32-compatible flag sets
//!
//! # Strategies
//!
//! | Strategy  | Backend                                   | Protection          |
//! |-----------|-------------------------------------------|---------------------|
//! | `Virtual` | `mmap` / `VirtualAllocEx`                 | as requested        |
//! | `Heap`    | global allocator, 16-byte aligned          | always read-write   |
//!
//! # Release Contract
//!
//! [`MemoryProvider::release`] must receive the exact size used for allocation. Releasing a
//! virtual region with a different size is undefined at the OS level, which is why the code
//! buffer retains the capacity of its current region and replays it.
//!
//! # Examples
//!
//! ```rust
//! use codebuf::memory::{AllocationPolicy, MemoryProvider, SystemProvider};
//!
//! let provider = SystemProvider::default();
//! let policy = AllocationPolicy::virtual_read_write();
//!
//! let base = provider.allocate(&policy, 256)?;
//! unsafe {
//!     base.as_ptr().write(0x90);
//!     provider.release(&policy, base, 256);
//! }
//! # Ok::<(), codebuf::Error>(())
//! ```

mod flags;
mod heap;
mod os;
mod policy;

use std::ptr::NonNull;

pub use flags::{AllocationFlags, FreeFlags, Protection};
pub use heap::HEAP_ALIGNMENT;
pub use policy::{AllocationPolicy, AllocationStrategy};

use crate::{Error, Result};

/// Computes `count * element_size` for a region, failing on overflow.
///
/// # Errors
///
/// Returns [`Error::CapacityOverflow`] if the product does not fit into `usize`.
pub fn byte_size(count: usize, element_size: usize) -> Result<usize> {
    count
        .checked_mul(element_size)
        .ok_or(Error::CapacityOverflow)
}

/// Source of raw memory regions for a [`crate::CodeBuffer`].
///
/// Implementations are stateless with respect to the regions they hand out: the caller owns a
/// region from the moment [`MemoryProvider::allocate`] returns until it passes it back to
/// [`MemoryProvider::release`] with the same policy and size.
pub trait MemoryProvider {
    /// Obtains a region of `size` bytes under `policy`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ZeroCapacity`] for `size == 0` and [`Error::AllocationFailed`] if the
    /// operating system or heap refuses the request. Implementations must not silently grant
    /// weaker protection than requested.
    fn allocate(&self, policy: &AllocationPolicy, size: usize) -> Result<NonNull<u8>>;

    /// Returns a region to its origin.
    ///
    /// # Safety
    ///
    /// `base` must have been returned by [`MemoryProvider::allocate`] on this provider with the
    /// same `policy` and `size`, must not have been released yet, and must not be accessed
    /// afterwards.
    unsafe fn release(&self, policy: &AllocationPolicy, base: NonNull<u8>, size: usize);
}

impl<P: MemoryProvider + ?Sized> MemoryProvider for &P {
    fn allocate(&self, policy: &AllocationPolicy, size: usize) -> Result<NonNull<u8>> {
        (**self).allocate(policy, size)
    }

    unsafe fn release(&self, policy: &AllocationPolicy, base: NonNull<u8>, size: usize) {
        unsafe { (**self).release(policy, base, size) }
    }
}

/// Operating system state the virtual memory strategy needs.
///
/// A context is captured once and injected into a [`SystemProvider`] instead of being looked up
/// from process-wide state on every call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocationContext {
    /// Pseudo handle of the process that owns the memory
    #[cfg(windows)]
    process: isize,
    /// Granularity of the virtual memory system
    page_size: usize,
}

impl AllocationContext {
    /// Captures the context of the running process.
    #[must_use]
    pub fn current() -> Self {
        AllocationContext {
            #[cfg(windows)]
            process: os::current_process(),
            page_size: os::page_size(),
        }
    }

    /// Page size of the host virtual memory system in bytes.
    #[must_use]
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Rounds `size` up to a whole number of pages.
    ///
    /// Virtual regions always occupy whole pages; this tells how much address space a request
    /// of `size` bytes really consumes.
    #[must_use]
    pub fn page_align(&self, size: usize) -> usize {
        size.div_ceil(self.page_size).saturating_mul(self.page_size)
    }

    #[cfg(windows)]
    pub(crate) fn process(&self) -> isize {
        self.process
    }
}

impl Default for AllocationContext {
    fn default() -> Self {
        AllocationContext::current()
    }
}

/// The memory provider backed by the host operating system and the global heap.
///
/// # Examples
///
/// ```rust
/// use codebuf::memory::{AllocationContext, SystemProvider};
///
/// let provider = SystemProvider::new(AllocationContext::current());
/// assert!(provider.context().page_size().is_power_of_two());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SystemProvider {
    context: AllocationContext,
}

impl SystemProvider {
    /// Creates a provider that allocates through `context`.
    #[must_use]
    pub fn new(context: AllocationContext) -> Self {
        SystemProvider { context }
    }

    /// The injected allocation context.
    #[must_use]
    pub fn context(&self) -> &AllocationContext {
        &self.context
    }
}

impl MemoryProvider for SystemProvider {
    fn allocate(&self, policy: &AllocationPolicy, size: usize) -> Result<NonNull<u8>> {
        if size == 0 {
            return Err(Error::ZeroCapacity);
        }

        let base = match policy.strategy {
            AllocationStrategy::Virtual => {
                os::allocate(&self.context, size, policy.allocation, policy.protection)
                    .map_err(|source| allocation_error!(policy.strategy, size, source))?
            }
            AllocationStrategy::Heap => {
                if policy.protection.is_executable() {
                    tracing::warn!(
                        protection = ?policy.protection,
                        "heap strategy cannot grant execute access, region stays read-write"
                    );
                }
                heap::allocate(size)?
            }
        };

        tracing::debug!(
            strategy = %policy.strategy,
            size,
            address = ?base,
            "allocated region"
        );
        Ok(base)
    }

    unsafe fn release(&self, policy: &AllocationPolicy, base: NonNull<u8>, size: usize) {
        match policy.strategy {
            AllocationStrategy::Virtual => {
                if let Err(error) = unsafe { os::release(&self.context, base, size, policy.free) } {
                    tracing::warn!(
                        address = ?base,
                        size,
                        free = ?policy.free,
                        %error,
                        "failed to release virtual region"
                    );
                    return;
                }
            }
            AllocationStrategy::Heap => unsafe { heap::release(base, size) },
        }

        tracing::debug!(
            strategy = %policy.strategy,
            size,
            address = ?base,
            "released region"
        );
    }
}
