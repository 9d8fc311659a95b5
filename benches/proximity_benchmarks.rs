use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use proximity_engine::{
    build_hello, build_status_mac, decode_hello, EphemeralIdentifier, EpochWindow, Ebid, MacKey,
    PayloadIdCache, PrecisionMode, ProximityRiskFilter, TimestampedRssi,
};
use rand_core::OsRng;

const START: u64 = 3_900_000_000;

fn identifier() -> EphemeralIdentifier {
    EphemeralIdentifier {
        ecc: 0x21,
        ebid: Ebid([7u8; 8]),
        window: EpochWindow::starting_at(START),
    }
}

fn bench_build_hello(c: &mut Criterion) {
    let id = identifier();
    let key = MacKey::generate(&mut OsRng);

    c.bench_function("build_hello", |b| {
        b.iter(|| {
            let _ = build_hello(black_box(&id), black_box(&key), black_box(START + 300));
        });
    });
}

fn bench_status_mac(c: &mut Criterion) {
    let id = identifier();
    let key = MacKey::generate(&mut OsRng);

    c.bench_function("build_status_mac", |b| {
        b.iter(|| build_status_mac(black_box(&id), black_box(&key), black_box(START + 300)));
    });
}

fn bench_decode(c: &mut Criterion) {
    let payload: Vec<u8> = (1u8..=16).collect();
    let cache = PayloadIdCache::new(1_000, Duration::from_secs(900));

    c.bench_function("decode_hello", |b| {
        b.iter(|| decode_hello(black_box(&payload)));
    });

    c.bench_function("decode_hello_cached", |b| {
        b.iter(|| cache.get_or_decode(black_box(&payload)));
    });
}

fn bench_risk_filter(c: &mut Criterion) {
    let filter = ProximityRiskFilter::default();
    // one sample every 5 s over a full epoch, with periodic peaks
    let samples: Vec<TimestampedRssi> = (0..180u64)
        .map(|i| TimestampedRssi {
            timestamp_s: START + i * 5,
            rssi: if i % 17 == 0 { 4 } else { -55 - i32::try_from(i % 20).unwrap_or(0) },
        })
        .collect();

    let mut group = c.benchmark_group("risk_filter");
    for mode in [PrecisionMode::Full, PrecisionMode::Medium, PrecisionMode::Risks] {
        group.bench_function(format!("{mode:?}"), |b| {
            b.iter(|| filter.filter(black_box(&samples), START, 900, mode));
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_build_hello,
    bench_status_mac,
    bench_decode,
    bench_risk_filter
);
criterion_main!(benches);
