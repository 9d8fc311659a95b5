//! Payload decode cache: capacity, recency and expiry.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use proximity_engine::cache::CacheConfig;
use proximity_engine::*;

fn payload(tag: u8) -> Vec<u8> {
    hex::decode(format!("{tag:02x}0102030405060708002a7b3e67233c")).unwrap()
}

#[test]
fn beyond_capacity_evicts_least_recently_used() {
    let cache = PayloadIdCache::new(3, Duration::from_secs(900));
    let now = Instant::now();
    for tag in 1..=3 {
        cache.get_or_decode_at(&payload(tag), now).unwrap();
    }
    // refresh 1 and 2; 3 becomes the oldest
    assert!(cache.get_at(&payload(1), now).is_some());
    assert!(cache.get_at(&payload(2), now).is_some());
    cache.get_or_decode_at(&payload(4), now).unwrap();

    assert_eq!(cache.len(), 3);
    assert!(cache.get_at(&payload(3), now).is_none());
    for tag in [1, 2, 4] {
        assert!(cache.get_at(&payload(tag), now).is_some(), "tag {tag} evicted");
    }
}

#[test]
fn expired_entry_is_absent_and_removed() {
    let cache = PayloadIdCache::new(10, Duration::from_secs(60));
    let t0 = Instant::now();
    let decoded = cache.get_or_decode_at(&payload(1), t0).unwrap();
    assert_eq!(cache.get_at(&payload(1), t0 + Duration::from_secs(59)), Some(decoded));
    assert_eq!(cache.get_at(&payload(1), t0 + Duration::from_secs(60)), None);
    assert!(cache.is_empty());
}

#[test]
fn reads_do_not_extend_expiry() {
    let cache = PayloadIdCache::new(10, Duration::from_secs(60));
    let t0 = Instant::now();
    cache.get_or_decode_at(&payload(1), t0).unwrap();
    assert!(cache.get_at(&payload(1), t0 + Duration::from_secs(50)).is_some());
    assert!(cache.get_at(&payload(1), t0 + Duration::from_secs(61)).is_none());
}

#[test]
fn overwrite_resets_deadline() {
    let cache = PayloadIdCache::new(10, Duration::from_secs(60));
    let t0 = Instant::now();
    let decoded = decode_hello(&payload(1)).unwrap();
    cache.put_at(&payload(1), decoded, t0);
    cache.put_at(&payload(1), decoded, t0 + Duration::from_secs(30));
    assert_eq!(cache.len(), 1);
    assert!(cache.get_at(&payload(1), t0 + Duration::from_secs(80)).is_some());
}

#[test]
fn sweep_counts_evictions() {
    let cache = PayloadIdCache::new(10, Duration::from_secs(60));
    let t0 = Instant::now();
    cache.get_or_decode_at(&payload(1), t0).unwrap();
    cache.get_or_decode_at(&payload(2), t0).unwrap();
    cache.get_or_decode_at(&payload(3), t0 + Duration::from_secs(30)).unwrap();
    assert_eq!(cache.sweep_expired(t0 + Duration::from_secs(70)), 2);
    assert_eq!(cache.len(), 1);
    assert_eq!(cache.sweep_expired(t0 + Duration::from_secs(70)), 0);
}

#[test]
fn config_defaults_match_one_epoch() {
    let cache = PayloadIdCache::from_config(&CacheConfig::default());
    assert_eq!(cache.capacity(), 1_000);
}

#[test]
fn concurrent_decoders_share_one_entry_per_payload() {
    let cache = Arc::new(PayloadIdCache::new(64, Duration::from_secs(900)));
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let cache = Arc::clone(&cache);
            thread::spawn(move || {
                for tag in 0..16 {
                    let decoded = cache.get_or_decode(&payload(tag)).unwrap();
                    assert_eq!(decoded.ecc, tag);
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }
    assert_eq!(cache.len(), 16);
}
