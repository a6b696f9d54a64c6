//! Benchmarks for scaling and cubemap assembly

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use cubecast_compose::{CubemapAssembler, FrameSampler, ImageScaler, NearestScaler, NearestScalerFactory};
use cubecast_core::{CubemapLayout, Picture, PictureGeometry, PixelFormat};

fn bench_scale_yuv_to_rgba(c: &mut Criterion) {
    let source = PictureGeometry::new(640, 640, PixelFormat::Yuv420p);
    let target = PictureGeometry::square(512, PixelFormat::Rgba);
    let mut scaler = match NearestScaler::new(source, target) {
        Ok(scaler) => scaler,
        Err(e) => panic!("scaler: {}", e),
    };
    let src = Picture::filled(source);
    let mut dst = Picture::new(target);

    c.bench_function("scale_yuv640_rgba512", |b| {
        b.iter(|| {
            let _ = scaler.scale(black_box(&src), &mut dst);
        })
    });
}

fn bench_assemble_stale_stereo(c: &mut Criterion) {
    let layout = CubemapLayout::STEREO;
    let geometry = PictureGeometry::square(256, PixelFormat::Rgba);
    let mut sampler = FrameSampler::new(layout, geometry, Arc::new(NearestScalerFactory));
    let mut assembler = CubemapAssembler::new(layout, geometry);
    let mut composite = assembler.allocate(0);

    c.bench_function("assemble_stereo_256", |b| {
        b.iter(|| {
            let _ = assembler.assemble(&mut sampler, black_box(&mut composite));
        })
    });
}

criterion_group!(benches, bench_scale_yuv_to_rgba, bench_assemble_stale_stereo);

criterion_main!(benches);
