#![no_main]

use libfuzzer_sys::fuzz_target;
use codebuf::{AllocationPolicy, CodeBuffer, Ownership, SystemProvider};

// Every operation is mirrored on a Vec<u8>; the buffer must agree with it after each step.
fuzz_target!(|data: &[u8]| {
    let Some((&first, ops)) = data.split_first() else {
        return;
    };

    let mut scratch = [0u8; 64];
    let mut buffer = CodeBuffer::with_provider(
        SystemProvider::default(),
        usize::from(first % 32) + 1,
        AllocationPolicy::heap(),
    )
    .unwrap();
    let mut model: Vec<u8> = Vec::new();
    let mut adopted = false;

    let mut ops = ops.iter().copied();
    while let Some(op) = ops.next() {
        match op % 8 {
            0 | 1 => {
                let byte = ops.next().unwrap_or(0);
                buffer.push(byte).unwrap();
                model.push(byte);
            }
            2 => {
                let count = usize::from(ops.next().unwrap_or(0) % 48);
                let bytes: Vec<u8> = (0..count).map(|i| i as u8 ^ op).collect();
                buffer.push_range(&bytes).unwrap();
                model.extend_from_slice(&bytes);
            }
            3 => {
                assert_eq!(buffer.pop(), model.pop());
            }
            4 => {
                let additional = usize::from(ops.next().unwrap_or(0));
                let before = buffer.capacity();
                buffer.ensure_capacity(additional).unwrap();
                assert!(buffer.remaining() >= additional);
                if before - model.len() >= additional {
                    assert_eq!(buffer.capacity(), before);
                }
            }
            5 => {
                let capacity = usize::from(ops.next().unwrap_or(0)) + 1;
                buffer.reallocate(capacity).unwrap();
                model.truncate(capacity);
                assert_eq!(buffer.capacity(), capacity);
            }
            6 if !adopted => {
                buffer.adopt_slice(&mut scratch).unwrap();
                model.clear();
                adopted = true;
                assert_eq!(buffer.ownership(), Some(Ownership::Borrowed));
            }
            6 => {
                buffer.promote_to_owned().unwrap();
                assert_eq!(buffer.ownership(), Some(Ownership::Owned));
            }
            _ => {
                buffer.clear();
                model.clear();
            }
        }

        assert_eq!(buffer.as_slice(), model.as_slice());
        assert!(buffer.len() <= buffer.capacity());
    }

    buffer.dispose();
    assert!(buffer.is_disposed());
    assert_eq!(buffer.capacity(), 0);
});
