//! `VirtualAllocEx` based virtual memory for Windows hosts.

use std::{ffi::c_void, io, mem::MaybeUninit, ptr, ptr::NonNull};

use windows_sys::Win32::{
    Foundation::HANDLE,
    System::{
        Memory::{VirtualAllocEx, VirtualFreeEx},
        SystemInformation::{GetSystemInfo, SYSTEM_INFO},
        Threading::GetCurrentProcess,
    },
};

use crate::memory::{AllocationFlags, FreeFlags, Protection};

pub(crate) fn page_size() -> usize {
    let mut info = MaybeUninit::<SYSTEM_INFO>::uninit();
    let info = unsafe {
        GetSystemInfo(info.as_mut_ptr());
        info.assume_init()
    };
    info.dwPageSize as usize
}

/// Pseudo handle of the running process. It needs no closing.
pub(crate) fn current_process() -> isize {
    unsafe { GetCurrentProcess() as isize }
}

pub(crate) fn allocate(
    process: isize,
    size: usize,
    allocation: AllocationFlags,
    protection: Protection,
) -> io::Result<NonNull<u8>> {
    let address = unsafe {
        VirtualAllocEx(
            process as HANDLE,
            ptr::null(),
            size,
            allocation.bits(),
            protection.to_page_flags(),
        )
    };

    NonNull::new(address.cast::<u8>()).ok_or_else(io::Error::last_os_error)
}

/// Hands a region back with `VirtualFreeEx`.
///
/// `MEM_RELEASE` requires a size of zero and always frees the whole reservation, every other
/// free type gets the retained size.
///
/// # Safety
///
/// `base` and `size` must describe a region obtained from [`allocate`] that is not used
/// afterwards.
pub(crate) unsafe fn release(
    process: isize,
    base: NonNull<u8>,
    size: usize,
    free: FreeFlags,
) -> io::Result<()> {
    let size = if free.contains(FreeFlags::RELEASE) {
        0
    } else {
        size
    };

    let ok = unsafe {
        VirtualFreeEx(
            process as HANDLE,
            base.as_ptr().cast::<c_void>(),
            size,
            free.bits(),
        )
    };

    if ok == 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}
