//! Per-frame work that runs on the CPU before any command is recorded.

use ash::vk;
use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use std::hint::black_box;
use surface_share::{HostFormat, MemoryStore, ShareHandle, SurfaceRegistry};
use vkshare::{ImageRegion, plan_transfer, to_host_format, to_vulkan_format};

fn bench_unique_name(c: &mut Criterion) {
    let mut group = c.benchmark_group("registry_unique_name");
    for taken in [0usize, 8, 32] {
        let registry = SurfaceRegistry::new(MemoryStore::with_capacity(64));
        for i in 0..taken {
            let name = if i == 0 {
                "cam".to_owned()
            } else {
                format!("cam_{i}")
            };
            let _ = registry.register(&name, 640, 480, ShareHandle(0x100 + i as u64), HostFormat::B8G8R8A8_UNORM);
        }
        group.bench_with_input(BenchmarkId::from_parameter(taken), &registry, |b, registry| {
            b.iter(|| registry.unique_name(black_box("cam")));
        });
    }
    group.finish();
}

fn bench_format_mapping(c: &mut Criterion) {
    let formats = [
        vk::Format::B8G8R8A8_UNORM,
        vk::Format::R16G16B16A16_SFLOAT,
        vk::Format::A2B10G10R10_UNORM_PACK32,
        vk::Format::R8G8B8A8_SRGB,
    ];
    c.bench_function("format_roundtrip", |b| {
        b.iter(|| {
            for format in formats {
                black_box(to_vulkan_format(to_host_format(black_box(format))));
            }
        });
    });
}

fn bench_plan_transfer(c: &mut Criterion) {
    let src = ImageRegion::new(
        vk::Image::null(),
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        vk::Format::B8G8R8A8_UNORM,
        1920,
        1080,
    );
    let dst = ImageRegion {
        width: 1280,
        height: 720,
        ..src
    };
    c.bench_function("plan_transfer", |b| {
        b.iter(|| {
            black_box(plan_transfer(black_box(false), &src, &dst));
            black_box(plan_transfer(black_box(true), &src, &dst));
        });
    });
}

criterion_group!(benches, bench_unique_name, bench_format_mapping, bench_plan_transfer);
criterion_main!(benches);
