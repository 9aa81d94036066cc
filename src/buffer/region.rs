//! The memory region currently installed in a code buffer.

use std::ptr::NonNull;

/// Who is responsible for giving a region back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Ownership {
    /// The buffer obtained the region from its provider and releases it on disposal or growth.
    Owned,
    /// The region belongs to the caller (for example scoped stack storage). The buffer reads and
    /// writes it but never releases it; growth or promotion moves the contents into an owned
    /// region and leaves the borrowed one untouched.
    Borrowed,
}

/// A single contiguous extent of memory with a fixed capacity.
///
/// Deliberately not `Clone`: a region is released at most once, by whoever holds it.
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct Region {
    pub(crate) base: NonNull<u8>,
    pub(crate) capacity: usize,
    pub(crate) ownership: Ownership,
}

impl Region {
    pub(crate) fn owned(base: NonNull<u8>, capacity: usize) -> Self {
        Region {
            base,
            capacity,
            ownership: Ownership::Owned,
        }
    }

    pub(crate) fn is_owned(&self) -> bool {
        self.ownership == Ownership::Owned
    }
}
