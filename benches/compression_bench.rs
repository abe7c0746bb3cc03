#![allow(clippy::unwrap_used, clippy::uninlined_format_args)]

use criterion::{criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use tos_net::utils::compression::{maybe_compress, maybe_decompress};
use tos_net::utils::lz4;

/// Snapshot-like data: repeated records with a changing counter.
fn snapshot(size: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(size);
    let mut i = 0u32;
    while out.len() < size {
        out.extend_from_slice(b"entity:");
        out.extend_from_slice(&i.to_le_bytes());
        out.extend_from_slice(&[0, 0, 1, 0, 0x40, 0x41]);
        i += 1;
    }
    out.truncate(size);
    out
}

fn bench_compression(c: &mut Criterion) {
    let mut group = c.benchmark_group("compression");
    let sizes = [64usize, 512, 1400, 4096, 65536];

    for &size in &sizes {
        let data = snapshot(size);
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_function(format!("lz4_compress_{}b", size), |b| {
            b.iter_batched(
                || data.clone(),
                |d| {
                    let _ = lz4::compress(&d);
                },
                BatchSize::SmallInput,
            )
        });

        if let Some(compressed) = lz4::compress(&data) {
            group.bench_function(format!("lz4_decompress_{}b", size), |b| {
                b.iter(|| {
                    let out = lz4::decompress(&compressed, data.len()).unwrap();
                    assert_eq!(out.len(), data.len());
                })
            });
        }

        group.bench_function(format!("threshold_roundtrip_{}b", size), |b| {
            b.iter(|| {
                let (out, compressed) = maybe_compress(&data, 512);
                maybe_decompress(&out, compressed).unwrap()
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_compression);
criterion_main!(benches);
