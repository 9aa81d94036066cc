//! `mmap` based virtual memory for Unix hosts.

use std::{io, ptr, ptr::NonNull};

use crate::memory::{AllocationFlags, FreeFlags, Protection};

/// Flags that have no `mmap` counterpart and are silently dropped.
const UNSUPPORTED_ALLOCATION: AllocationFlags = AllocationFlags::RESET
    .union(AllocationFlags::RESET_UNDO)
    .union(AllocationFlags::LARGE_PAGES)
    .union(AllocationFlags::PHYSICAL)
    .union(AllocationFlags::TOP_DOWN)
    .union(AllocationFlags::WRITE_WATCH);

pub(crate) fn page_size() -> usize {
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size <= 0 {
        4096
    } else {
        size as usize
    }
}

/// Maps `size` bytes of private anonymous memory.
///
/// A `RESERVE` request without `COMMIT` only claims address space: the mapping is
/// inaccessible until it is re-protected.
pub(crate) fn allocate(
    size: usize,
    allocation: AllocationFlags,
    protection: Protection,
) -> io::Result<NonNull<u8>> {
    let ignored = allocation & UNSUPPORTED_ALLOCATION;
    if !ignored.is_empty() {
        tracing::trace!(flags = ?ignored, "allocation flags have no mmap equivalent");
    }

    let reserve_only = allocation.contains(AllocationFlags::RESERVE)
        && !allocation.contains(AllocationFlags::COMMIT);

    let prot = if reserve_only {
        libc::PROT_NONE
    } else {
        protection.to_prot()
    };

    #[allow(unused_mut)]
    let mut flags = libc::MAP_PRIVATE | libc::MAP_ANON;

    #[cfg(any(target_os = "linux", target_os = "android"))]
    if reserve_only {
        flags |= libc::MAP_NORESERVE;
    }

    // Hardened runtime on macOS refuses writable+executable pages without MAP_JIT
    #[cfg(target_os = "macos")]
    if protection.is_executable() && protection.is_writable() {
        flags |= libc::MAP_JIT;
    }

    let address = unsafe { libc::mmap(ptr::null_mut(), size, prot, flags, -1, 0) };
    if address == libc::MAP_FAILED {
        return Err(io::Error::last_os_error());
    }

    NonNull::new(address.cast::<u8>()).ok_or_else(|| io::Error::other("mmap returned null"))
}

/// Hands a mapping back according to `free`.
///
/// `RELEASE` unmaps the range. `DECOMMIT` alone discards the contents and drops all access,
/// leaving the address range reserved.
///
/// # Safety
///
/// `base` and `size` must describe a mapping obtained from [`allocate`] that is not used
/// afterwards.
pub(crate) unsafe fn release(base: NonNull<u8>, size: usize, free: FreeFlags) -> io::Result<()> {
    let address = base.as_ptr().cast::<libc::c_void>();

    if free.contains(FreeFlags::RELEASE) {
        if unsafe { libc::munmap(address, size) } != 0 {
            return Err(io::Error::last_os_error());
        }
        return Ok(());
    }

    if free.contains(FreeFlags::DECOMMIT) {
        if unsafe { libc::madvise(address, size, libc::MADV_DONTNEED) } != 0 {
            return Err(io::Error::last_os_error());
        }
        if unsafe { libc::mprotect(address, size, libc::PROT_NONE) } != 0 {
            return Err(io::Error::last_os_error());
        }
        return Ok(());
    }

    Err(io::Error::new(
        io::ErrorKind::InvalidInput,
        "free flags must contain RELEASE or DECOMMIT",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_size_is_power_of_two() {
        let size = page_size();
        assert!(size >= 4096);
        assert!(size.is_power_of_two());
    }

    #[test]
    fn map_write_unmap() {
        let base = allocate(64, AllocationFlags::COMMIT, Protection::READ_WRITE).unwrap();
        unsafe {
            base.as_ptr().write(0xAB);
            base.as_ptr().add(63).write(0xCD);
            assert_eq!(base.as_ptr().read(), 0xAB);
            assert_eq!(base.as_ptr().add(63).read(), 0xCD);
            release(base, 64, FreeFlags::RELEASE).unwrap();
        }
    }

    #[test]
    fn reserve_then_decommit_then_release() {
        let size = page_size();
        let base = allocate(size, AllocationFlags::RESERVE, Protection::READ_WRITE).unwrap();
        unsafe {
            release(base, size, FreeFlags::DECOMMIT).unwrap();
            release(base, size, FreeFlags::RELEASE).unwrap();
        }
    }

    #[test]
    fn release_without_type_is_rejected() {
        let base = allocate(16, AllocationFlags::COMMIT, Protection::READ_WRITE).unwrap();
        unsafe {
            let error = release(base, 16, FreeFlags::empty()).unwrap_err();
            assert_eq!(error.kind(), io::ErrorKind::InvalidInput);
            release(base, 16, FreeFlags::RELEASE).unwrap();
        }
    }

    #[test]
    fn zero_length_map_fails() {
        assert!(allocate(0, AllocationFlags::COMMIT, Protection::READ_WRITE).is_err());
    }
}
