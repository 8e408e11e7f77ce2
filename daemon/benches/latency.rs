//! Hot-path latency: report decode and snapshot publish/read

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use f710d::nodes::NodeTable;
use f710d::report::{decode_report, ControllerState};
use f710d::store::StateStore;

const REPORT: [u8; 20] = [
    0x00, 0x14, 0x05, 0x21, 0xFF, 0x00, 192, 0, 64, 0, 128, 0, 128, 0, 0, 0, 0, 0, 0, 0,
];

fn bench_decode(c: &mut Criterion) {
    c.bench_function("decode_report", |b| {
        b.iter(|| decode_report(black_box(&REPORT)))
    });
}

fn bench_store(c: &mut Criterion) {
    let store = StateStore::new();
    let state = decode_report(&REPORT).unwrap_or(ControllerState::SAFE);

    c.bench_function("publish_report", |b| {
        b.iter(|| store.publish_report(black_box(state), Some(black_box(&REPORT[..]))))
    });

    c.bench_function("snapshot", |b| b.iter(|| black_box(store.snapshot())));

    let nodes = NodeTable::new("f710", store.clone());
    c.bench_function("node_read", |b| {
        b.iter(|| nodes.read(black_box("f710/Left-Joystick-X")))
    });
}

criterion_group!(benches, bench_decode, bench_store);
criterion_main!(benches);
