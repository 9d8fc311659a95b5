//! Scan-result ingestion: calibrate, decode through the cache, emit.

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::trace;

use crate::cache::PayloadIdCache;
use crate::calibration::CalibrationGains;
use crate::epoch::unix_to_ntp;
use crate::types::{ProximityRecord, ScannedSample};

/// Turns raw samples into records. Safe to call from any task.
#[derive(Debug)]
pub struct SampleIngestor {
    gains: RwLock<CalibrationGains>,
    cache: Arc<PayloadIdCache>,
}

impl SampleIngestor {
    #[must_use]
    pub fn new(gains: CalibrationGains, cache: Arc<PayloadIdCache>) -> Self {
        Self { gains: RwLock::new(gains), cache }
    }

    #[must_use]
    pub fn gains(&self) -> CalibrationGains {
        *self.gains.read()
    }

    pub fn set_gains(&self, gains: CalibrationGains) {
        *self.gains.write() = gains;
    }

    #[must_use]
    pub fn cache(&self) -> &Arc<PayloadIdCache> {
        &self.cache
    }

    /// `None` for samples without service data or with a malformed payload.
    #[must_use]
    pub fn ingest(&self, sample: &ScannedSample) -> Option<ProximityRecord> {
        let Some(data) = sample.service_data.as_deref() else {
            trace!(peer = %sample.peer, "sample without service data dropped");
            return None;
        };
        let hello = match self.cache.get_or_decode(data) {
            Ok(hello) => hello,
            Err(err) => {
                trace!(peer = %sample.peer, %err, "undecodable payload dropped");
                return None;
            }
        };
        Some(ProximityRecord {
            hello,
            collected_epoch_time_s: unix_to_ntp(sample.observed_at),
            raw_rssi: sample.raw_rssi,
            calibrated_rssi: self.gains().apply(sample.raw_rssi),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, UNIX_EPOCH};

    use super::*;
    use crate::epoch::NTP_UNIX_OFFSET_S;
    use crate::types::PeerHandle;

    fn sample(data: Option<Vec<u8>>) -> ScannedSample {
        ScannedSample {
            peer: PeerHandle::from("11:22"),
            raw_rssi: -70,
            service_data: data,
            observed_at: UNIX_EPOCH + Duration::from_secs(1_700_000_000),
        }
    }

    #[test]
    fn valid_sample_becomes_calibrated_record() {
        let ingestor = SampleIngestor::new(
            CalibrationGains { rx_gain: -5, tx_gain: 3 },
            Arc::new(PayloadIdCache::default()),
        );
        let record = ingestor.ingest(&sample(Some((1..=16).collect()))).unwrap();
        assert_eq!(record.hello.ecc, 1);
        assert_eq!(record.raw_rssi, -70);
        assert_eq!(record.calibrated_rssi, -68);
        assert_eq!(record.collected_epoch_time_s, 1_700_000_000 + NTP_UNIX_OFFSET_S);
        assert_eq!(ingestor.cache().len(), 1);
    }

    #[test]
    fn malformed_or_missing_payload_is_dropped() {
        let ingestor = SampleIngestor::new(CalibrationGains::default(), Arc::new(PayloadIdCache::default()));
        assert!(ingestor.ingest(&sample(None)).is_none());
        assert!(ingestor.ingest(&sample(Some(vec![0; 15]))).is_none());
        assert!(ingestor.cache().is_empty());
    }

    #[test]
    fn gain_update_applies_to_next_sample() {
        let ingestor = SampleIngestor::new(CalibrationGains::default(), Arc::new(PayloadIdCache::default()));
        ingestor.set_gains(CalibrationGains { rx_gain: 1, tx_gain: 1 });
        let record = ingestor.ingest(&sample(Some(vec![0; 16]))).unwrap();
        assert_eq!(record.calibrated_rssi, -72);
    }
}
