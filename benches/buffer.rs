//! Benchmarks for code buffer growth and emission.
//!
//! Measures:
//! - Byte-at-a-time emission from a one-byte buffer (amortized doubling)
//! - Bulk emission through `push_range`
//! - Heap versus virtual memory regions
//! - Promotion of borrowed scratch storage
//! - Calling convention assignment

extern crate codebuf;

use codebuf::{
    invoke::NativeSignature, AllocationPolicy, CallingConvention, CodeBuffer, SystemProvider,
};
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::hint::black_box;

/// A function body worth of bytes.
fn body(size: usize) -> Vec<u8> {
    (0..size).map(|i| (i % 251) as u8).collect()
}

/// Benchmark pushing bytes one by one into a buffer that starts at one byte.
fn bench_push_bytes(c: &mut Criterion) {
    let mut group = c.benchmark_group("push_bytes");
    for size in [64usize, 4096, 65536] {
        let bytes = body(size);
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &bytes, |b, bytes| {
            b.iter(|| {
                let mut buffer = CodeBuffer::new(1, AllocationPolicy::heap()).unwrap();
                for byte in bytes {
                    buffer.push(*byte).unwrap();
                }
                black_box(buffer.len())
            });
        });
    }
    group.finish();
}

/// Benchmark appending whole instruction sequences.
fn bench_push_range(c: &mut Criterion) {
    // push rbp; mov rbp, rsp; ... ; pop rbp; ret
    let prologue = [0x55, 0x48, 0x89, 0xE5];
    let epilogue = [0x5D, 0xC3];

    c.bench_function("push_range_prologue_epilogue_x1000", |b| {
        b.iter(|| {
            let mut buffer = CodeBuffer::new(16, AllocationPolicy::heap()).unwrap();
            for _ in 0..1000 {
                buffer.push_range(black_box(&prologue)).unwrap();
                buffer.push_range(black_box(&epilogue)).unwrap();
            }
            black_box(buffer.len())
        });
    });
}

/// Benchmark growth under both allocation strategies.
fn bench_strategies(c: &mut Criterion) {
    let bytes = body(256 * 1024);
    let mut group = c.benchmark_group("grow_to_256k");
    group.throughput(Throughput::Bytes(bytes.len() as u64));

    for (name, policy) in [
        ("heap", AllocationPolicy::heap()),
        ("virtual", AllocationPolicy::virtual_read_write()),
    ] {
        group.bench_function(name, |b| {
            b.iter(|| {
                let mut buffer = CodeBuffer::new(4096, policy).unwrap();
                for chunk in bytes.chunks(512) {
                    buffer.push_range(chunk).unwrap();
                }
                black_box(buffer.capacity())
            });
        });
    }
    group.finish();
}

/// Benchmark emitting into stack scratch space and promoting the result.
fn bench_promote_scratch(c: &mut Criterion) {
    let bytes = body(200);

    c.bench_function("scratch_then_promote", |b| {
        b.iter(|| {
            let mut scratch = [0u8; 256];
            let mut buffer = CodeBuffer::with_storage(
                SystemProvider::default(),
                &mut scratch,
                AllocationPolicy::heap(),
            )
            .unwrap();
            buffer.push_range(&bytes).unwrap();
            let owned = buffer.into_owned().unwrap();
            black_box(owned.len())
        });
    });
}

/// Benchmark mapping a ten argument signature for every calling convention.
fn bench_assign(c: &mut Criterion) {
    type Wide = extern "C" fn(i64, f64, i32, f32, u8, i64, f64, i64, f64, usize) -> f64;
    let shape = <Wide as NativeSignature>::describe();

    c.bench_function("assign_ten_args_all_conventions", |b| {
        b.iter(|| {
            for convention in [
                CallingConvention::SysV64,
                CallingConvention::Win64,
                CallingConvention::Aapcs64,
                CallingConvention::Cdecl32,
            ] {
                black_box(convention.assign(black_box(&shape)));
            }
        });
    });
}

criterion_group!(
    benches,
    bench_push_bytes,
    bench_push_range,
    bench_strategies,
    bench_promote_scratch,
    bench_assign
);
criterion_main!(benches);
