#![no_main]

use libfuzzer_sys::fuzz_target;
use proximity_engine::{PrecisionMode, ProximityRiskFilter, TimestampedRssi};

fuzz_target!(|data: &[u8]| {
    // 3 bytes per sample: 16-bit offset into the epoch, signed rssi
    let samples: Vec<TimestampedRssi> = data
        .chunks_exact(3)
        .map(|c| TimestampedRssi {
            timestamp_s: 3_900_000_000 + u64::from(u16::from_be_bytes([c[0], c[1]])),
            rssi: i32::from(c[2] as i8),
        })
        .collect();
    let filter = ProximityRiskFilter::default();
    for mode in [PrecisionMode::Full, PrecisionMode::Medium, PrecisionMode::Risks] {
        if let Some(risks) = filter.filter(&samples, 3_900_000_000, 900, mode).window_risks() {
            assert!(risks.iter().all(|r| (0.0..=1.0).contains(r)));
        }
    }
});
