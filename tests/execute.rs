//! End-to-end tests: fill buffers through the public API, execute them, and verify that
//! every owned region goes back to its provider exactly once.

use std::{cell::RefCell, ptr::NonNull};

use codebuf::{
    invoke::{ReturnLocation, Slot},
    prelude::*,
    Error,
};

/// `i32 add(i32, i32)` for the host, when we have an encoding for it.
fn add_i32() -> Option<&'static [u8]> {
    if cfg!(all(target_arch = "x86_64", windows)) {
        // mov eax, ecx; add eax, edx; ret
        Some(&[0x89, 0xC8, 0x01, 0xD0, 0xC3])
    } else if cfg!(target_arch = "x86_64") {
        // mov eax, edi; add eax, esi; ret
        Some(&[0x89, 0xF8, 0x01, 0xF0, 0xC3])
    } else {
        None
    }
}

/// Returns an executable buffer if this host allows writable and executable pages and we can
/// encode instructions for it.
fn executable_buffer(capacity: usize) -> Option<CodeBuffer<'static>> {
    add_i32()?;
    CodeBuffer::new(capacity, AllocationPolicy::executable()).ok()
}

/// A provider written against the public trait, logging `(allocate?, size)`.
#[derive(Default)]
struct LoggingProvider {
    system: SystemProvider,
    log: RefCell<Vec<(bool, usize)>>,
}

impl MemoryProvider for LoggingProvider {
    fn allocate(&self, policy: &AllocationPolicy, size: usize) -> Result<NonNull<u8>> {
        let base = self.system.allocate(policy, size)?;
        self.log.borrow_mut().push((true, size));
        Ok(base)
    }

    unsafe fn release(&self, policy: &AllocationPolicy, base: NonNull<u8>, size: usize) {
        self.log.borrow_mut().push((false, size));
        unsafe { self.system.release(policy, base, size) }
    }
}

#[test]
fn test_add_function_from_one_byte_buffer() -> Result<()> {
    let Some(code) = add_i32() else {
        return Ok(());
    };
    let Some(mut buffer) = executable_buffer(1) else {
        return Ok(());
    };

    for byte in code {
        buffer.push(*byte)?;
    }
    assert_eq!(buffer.len(), code.len());
    assert!(buffer.capacity() >= code.len());

    let sum = unsafe { buffer.invoke::<extern "C" fn(i32, i32) -> i32>((3, 5)) };
    assert_eq!(sum, 8);
    Ok(())
}

#[test]
fn test_patch_emitted_code() -> Result<()> {
    if !cfg!(target_arch = "x86_64") {
        return Ok(());
    }
    let Some(mut buffer) = executable_buffer(8) else {
        return Ok(());
    };

    // mov eax, 1; ret
    buffer.push_range(&[0xB8, 0x01, 0x00, 0x00, 0x00, 0xC3])?;
    let first = unsafe { buffer.invoke::<extern "C" fn() -> i32>(()) };

    buffer.as_mut_slice()[1] = 0x07;
    let patched = unsafe { buffer.invoke::<extern "C" fn() -> i32>(()) };

    assert_eq!((first, patched), (1, 7));
    Ok(())
}

#[test]
fn test_jit_function_survives_borrowed_source() -> Result<()> {
    let Some(code) = add_i32() else {
        return Ok(());
    };
    if executable_buffer(1).is_none() {
        return Ok(());
    }

    let function = {
        let mut scratch = [0u8; 16];
        let mut buffer = CodeBuffer::with_storage(
            SystemProvider::default(),
            &mut scratch,
            AllocationPolicy::executable(),
        )?;
        buffer.push_range(code)?;
        JitFunction::new(buffer)?
    };

    let sum = unsafe { function.invoke::<extern "C" fn(i32, i32) -> i32>((40, 2)) };
    assert_eq!(sum, 42);
    Ok(())
}

#[test]
fn test_adopt_then_promote() -> Result<()> {
    let provider = LoggingProvider::default();
    let mut storage = [0u8; 16];
    storage[..3].copy_from_slice(&[0x01, 0x02, 0x03]);

    let mut buffer = CodeBuffer::with_provider(&provider, 32, AllocationPolicy::heap())?;
    buffer.adopt_slice(&mut storage)?;
    assert_eq!(buffer.ownership(), Some(Ownership::Borrowed));
    assert_eq!(buffer.capacity(), 16);
    assert!(buffer.is_empty());

    buffer.push_range(&[0xAA, 0xBB])?;
    buffer.promote_to_owned()?;
    buffer.push(0xCC)?;
    assert_eq!(buffer.ownership(), Some(Ownership::Owned));
    assert_eq!(buffer.as_slice(), &[0xAA, 0xBB, 0xCC]);

    buffer.dispose();
    drop(buffer);

    // 32 bytes released on adoption, the promoted 16 on dispose; the borrowed storage never
    assert_eq!(
        *provider.log.borrow(),
        vec![(true, 32), (false, 32), (true, 16), (false, 16)]
    );
    assert_eq!(&storage[..2], &[0xAA, 0xBB]);
    Ok(())
}

#[test]
fn test_growth_releases_every_old_region() -> Result<()> {
    let provider = LoggingProvider::default();
    {
        let mut buffer = CodeBuffer::with_provider(&provider, 1, AllocationPolicy::heap())?;
        for byte in 0..=255u8 {
            buffer.push(byte)?;
        }
        assert_eq!(buffer.len(), 256);
        assert!(buffer.as_slice().iter().copied().eq(0..=255u8));
    }

    let log = provider.log.borrow();
    let allocated: usize = log.iter().filter(|(a, _)| *a).map(|(_, s)| s).sum();
    let released: usize = log.iter().filter(|(a, _)| !*a).map(|(_, s)| s).sum();
    assert_eq!(allocated, released);
    assert_eq!(log.iter().filter(|(a, _)| *a).count(), 9);
    Ok(())
}

#[test]
fn test_virtual_read_write_buffer() -> Result<()> {
    let mut buffer = CodeBuffer::new(4096, AllocationPolicy::virtual_read_write())?;
    buffer.push_range(&[0x90; 5000])?;

    // max(4096 + 5000, 4096 * 2)
    assert_eq!(buffer.capacity(), 9096);
    assert_eq!(buffer.len(), 5000);
    assert!(buffer.as_slice().iter().all(|&byte| byte == 0x90));
    Ok(())
}

#[test]
fn test_executable_refusal_is_reported() {
    match CodeBuffer::new(64, AllocationPolicy::executable()) {
        Ok(buffer) => assert!(buffer.policy().is_executable()),
        Err(Error::AllocationFailed { strategy, size, .. }) => {
            assert_eq!(strategy, AllocationStrategy::Virtual);
            assert_eq!(size, 64);
        }
        Err(other) => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_zero_capacity_rejected() {
    assert!(matches!(
        CodeBuffer::new(0, AllocationPolicy::heap()),
        Err(Error::ZeroCapacity)
    ));
}

#[test]
fn test_host_layout_matches_snippet_registers() {
    let Some(convention) = CallingConvention::host() else {
        return;
    };
    let shape = <extern "C" fn(i32, i32) -> i32 as NativeSignature>::describe();
    let layout = convention.assign(&shape);

    let expected = match convention {
        CallingConvention::SysV64 => [Some("rdi"), Some("rsi")],
        CallingConvention::Win64 => [Some("rcx"), Some("rdx")],
        CallingConvention::Aapcs64 => [Some("x0"), Some("x1")],
        CallingConvention::Cdecl32 => [None, None],
    };
    let actual = [layout.args[0].slot.register(), layout.args[1].slot.register()];
    assert_eq!(actual, expected);

    if convention == CallingConvention::Cdecl32 {
        assert_eq!(layout.args[0].slot, Slot::Stack { offset: 4, size: 4 });
    }
    assert!(matches!(layout.ret, ReturnLocation::Registers { .. }));
}
