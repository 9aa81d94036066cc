//! Host virtual memory primitives.
//!
//! Each supported platform exposes the same three functions: `page_size`, `allocate` and
//! `release`. The Windows versions additionally take the process handle captured in the
//! [`crate::memory::AllocationContext`].

#[cfg(unix)]
mod unix;
#[cfg(windows)]
mod windows;

use std::{io, ptr::NonNull};

use crate::memory::{AllocationContext, AllocationFlags, FreeFlags, Protection};

pub(crate) fn page_size() -> usize {
    #[cfg(unix)]
    {
        unix::page_size()
    }
    #[cfg(windows)]
    {
        windows::page_size()
    }
    #[cfg(not(any(unix, windows)))]
    {
        4096
    }
}

#[cfg(windows)]
pub(crate) fn current_process() -> isize {
    windows::current_process()
}

#[allow(unused_variables)]
pub(crate) fn allocate(
    context: &AllocationContext,
    size: usize,
    allocation: AllocationFlags,
    protection: Protection,
) -> io::Result<NonNull<u8>> {
    #[cfg(unix)]
    {
        unix::allocate(size, allocation, protection)
    }
    #[cfg(windows)]
    {
        windows::allocate(context.process(), size, allocation, protection)
    }
    #[cfg(not(any(unix, windows)))]
    {
        Err(io::Error::from(io::ErrorKind::Unsupported))
    }
}

/// # Safety
///
/// `base` and `size` must describe a region returned by [`allocate`] with the same context.
#[allow(unused_variables)]
pub(crate) unsafe fn release(
    context: &AllocationContext,
    base: NonNull<u8>,
    size: usize,
    free: FreeFlags,
) -> io::Result<()> {
    #[cfg(unix)]
    {
        unsafe { unix::release(base, size, free) }
    }
    #[cfg(windows)]
    {
        unsafe { windows::release(context.process(), base, size, free) }
    }
    #[cfg(not(any(unix, windows)))]
    {
        Err(io::Error::from(io::ErrorKind::Unsupported))
    }
}
