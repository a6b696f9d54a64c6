//! Benchmarks for keyframe gate admission

use std::sync::Arc;

use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, Criterion};

use cubecast_core::{EncodedUnit, FaceIndex, PendingKeyframePolicy, PixelFormat, PoolConfig, PresentationTime};
use cubecast_decode::{FaceChannels, KeyframeGate};

fn channels(packets: usize) -> Arc<FaceChannels> {
    let pools = PoolConfig {
        packet_capacity: packets,
        picture_capacity: 1,
        exchange_capacity: 1,
    };
    Arc::new(FaceChannels::new(FaceIndex(0), &pools, 64 * 1024, PixelFormat::Yuv420p))
}

fn bench_admit_and_drain(c: &mut Criterion) {
    let ch = channels(4);
    let mut gate = KeyframeGate::new(Arc::clone(&ch), PendingKeyframePolicy::KeepFirst);
    gate.on_unit(EncodedUnit::new(Bytes::from_static(&[0x67, 0]), PresentationTime::ZERO));
    if let Ok(packet) = ch.packet_queue.try_pop() {
        let _ = ch.packet_pool.release(packet);
    }
    let unit = EncodedUnit::new(Bytes::from(vec![0x41; 16 * 1024]), PresentationTime::from_millis(1));

    c.bench_function("gate_admit_16k", |b| {
        b.iter(|| {
            black_box(gate.on_unit(unit.clone()));
            if let Ok(packet) = ch.packet_queue.try_pop() {
                let _ = ch.packet_pool.release(packet);
            }
        })
    });
}

fn bench_drop_exhausted(c: &mut Criterion) {
    let ch = channels(1);
    let mut gate = KeyframeGate::new(Arc::clone(&ch), PendingKeyframePolicy::KeepFirst);
    gate.on_unit(EncodedUnit::new(Bytes::from_static(&[0x67, 0]), PresentationTime::ZERO));
    let unit = EncodedUnit::new(Bytes::from_static(&[0x41, 1]), PresentationTime::from_millis(1));

    c.bench_function("gate_drop_exhausted", |b| {
        b.iter(|| black_box(gate.on_unit(unit.clone())))
    });
}

fn bench_drop_unsynced(c: &mut Criterion) {
    let ch = channels(1);
    let mut gate = KeyframeGate::new(Arc::clone(&ch), PendingKeyframePolicy::KeepFirst);
    let unit = EncodedUnit::new(Bytes::from_static(&[0x41, 1]), PresentationTime::from_millis(1));

    c.bench_function("gate_drop_unsynced", |b| {
        b.iter(|| black_box(gate.on_unit(unit.clone())))
    });
}

criterion_group!(
    benches,
    bench_admit_and_drain,
    bench_drop_exhausted,
    bench_drop_unsynced,
);

criterion_main!(benches);
