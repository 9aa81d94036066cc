//! Heap backed regions.
//!
//! Heap regions come from the global allocator with a fixed alignment. They are always
//! read-write and never executable, whatever the policy asks for.

use std::{
    alloc::{self, Layout},
    io,
    ptr::NonNull,
};

use crate::{memory::AllocationStrategy, Result};

/// Alignment of every heap region, wide enough for any SIMD load a caller might emit.
pub const HEAP_ALIGNMENT: usize = 16;

fn layout(size: usize) -> Result<Layout> {
    Ok(Layout::from_size_align(size, HEAP_ALIGNMENT)?)
}

pub(crate) fn allocate(size: usize) -> Result<NonNull<u8>> {
    if size == 0 {
        return Err(crate::Error::ZeroCapacity);
    }

    let layout = layout(size)?;
    let address = unsafe { alloc::alloc(layout) };

    NonNull::new(address).ok_or_else(|| {
        allocation_error!(
            AllocationStrategy::Heap,
            size,
            io::Error::from(io::ErrorKind::OutOfMemory)
        )
    })
}

/// # Safety
///
/// `base` must come from [`allocate`] called with the same `size`, and must not be used
/// afterwards.
pub(crate) unsafe fn release(base: NonNull<u8>, size: usize) {
    // A layout that allocate accepted cannot be rejected here
    if let Ok(layout) = layout(size) {
        unsafe { alloc::dealloc(base.as_ptr(), layout) };
    }
}
