//! Benchmarks for CPU image conversion
//!
//! Covers the copies behind `acquireCpuImage` and `acquireCameraCpuImage`:
//! - same-format copies of a full headset eye buffer
//! - NV12 and P010 to RGBA expansion
//! - RGBA to NV12 subsampling

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use isar::TextureFormat;
use isar::image::image_size;
use isar::test_utils::gradient_image;
use std::hint::black_box;

const WIDTH: u32 = 1440;
const HEIGHT: u32 = 1584;

fn bench_conversions(c: &mut Criterion) {
    let mut group = c.benchmark_group("cpu_image_conversion");

    for (from, to) in [
        (TextureFormat::Rgba32, TextureFormat::Rgba32),
        (TextureFormat::Nv12, TextureFormat::Rgba32),
        (TextureFormat::P010, TextureFormat::Rgba32),
        (TextureFormat::Rgba32, TextureFormat::Nv12),
    ] {
        let image = gradient_image(from, WIDTH, HEIGHT);
        let mut out = vec![0u8; image_size(to, WIDTH, HEIGHT)];
        group.throughput(Throughput::Bytes(out.len() as u64));
        group.bench_with_input(BenchmarkId::new(format!("{from:?}"), format!("{to:?}")), &to, |b, &to| {
            b.iter(|| {
                let written = image.convert_into(black_box(to), black_box(&mut out)).expect("buffer sized for format");
                black_box(written)
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_conversions);
criterion_main!(benches);
