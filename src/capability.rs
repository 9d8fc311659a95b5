//! Abstract radio capabilities consumed by the engine.
//!
//! Implementations wrap a platform radio stack. They report failure as
//! `false`/`None` and never return typed errors; the engine bounds every
//! call with [`with_timeout`] and treats an elapsed timeout as failure.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::types::{HelloPayload, PeerHandle, ProximityRecord};

/// Primary service filter plus the vendor manufacturer-data fallback used by
/// platforms that hide service UUIDs from background scanners.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanFilters {
    pub service_uuid: Uuid,
    pub manufacturer_id: u16,
    pub manufacturer_data: Vec<u8>,
    pub manufacturer_data_mask: Vec<u8>,
}

impl ScanFilters {
    /// Whether `data` matches the manufacturer filter under the mask.
    #[must_use]
    pub fn matches_manufacturer_data(&self, manufacturer_id: u16, data: &[u8]) -> bool {
        if manufacturer_id != self.manufacturer_id || data.len() < self.manufacturer_data.len() {
            return false;
        }
        self.manufacturer_data
            .iter()
            .zip(&self.manufacturer_data_mask)
            .zip(data)
            .all(|((want, mask), got)| want & mask == got & mask)
    }
}

/// Opaque handle of an open peer connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ConnectionHandle(pub u64);

#[async_trait]
pub trait Advertiser: Send + Sync {
    async fn start(&self, payload: HelloPayload) -> bool;

    async fn stop(&self) -> bool;

    /// Swap the payload of a running advertisement.
    async fn update(&self, payload: HelloPayload) -> bool {
        self.start(payload).await
    }
}

#[async_trait]
pub trait Scanner: Send + Sync {
    async fn start(&self, filters: &ScanFilters) -> bool;

    async fn stop(&self) -> bool;
}

#[async_trait]
pub trait ConnectionRssiReader: Send + Sync {
    async fn open(&self, peer: &PeerHandle) -> Option<ConnectionHandle>;

    async fn read_rssi(&self, handle: ConnectionHandle) -> Option<i32>;

    async fn close(&self, handle: ConnectionHandle);
}

/// Adapter power state. Enabled/disabled notifications arrive separately as
/// `RadioEvent`s; this trait only answers polls and toggles power.
#[async_trait]
pub trait AdapterStateSource: Send + Sync {
    async fn is_enabled(&self) -> bool;

    async fn set_enabled(&self, enabled: bool) -> bool;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RadioErrorKind {
    AdapterUnavailable,
    AdapterRestartFailed,
    StartFailure,
    IdentifierUnavailable,
}

/// Storage and notification collaborators.
pub trait ProximityListener: Send + Sync {
    fn on_proximity_record(&self, record: ProximityRecord);

    fn on_radio_error(&self, kind: RadioErrorKind, detail: &str);
}

/// Everything the engine drives.
#[derive(Clone)]
pub struct Capabilities {
    pub advertiser: Arc<dyn Advertiser>,
    pub scanner: Arc<dyn Scanner>,
    pub connections: Arc<dyn ConnectionRssiReader>,
    pub adapter: Arc<dyn AdapterStateSource>,
}

/// Run a capability call, mapping an elapsed deadline to `None`.
pub async fn with_timeout<F, T>(operation: &'static str, limit: Duration, fut: F) -> Option<T>
where
    F: std::future::Future<Output = T> + Send,
{
    if let Ok(value) = tokio::time::timeout(limit, fut).await {
        Some(value)
    } else {
        warn!(operation, timeout_ms = limit.as_millis(), "radio operation timed out");
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filters() -> ScanFilters {
        ScanFilters {
            service_uuid: Uuid::nil(),
            manufacturer_id: 76,
            manufacturer_data: vec![0x10, 0xF0],
            manufacturer_data_mask: vec![0xFF, 0xF0],
        }
    }

    #[test]
    fn manufacturer_data_respects_mask() {
        let f = filters();
        assert!(f.matches_manufacturer_data(76, &[0x10, 0xFA, 0x00]));
        assert!(!f.matches_manufacturer_data(76, &[0x11, 0xF0]));
        assert!(!f.matches_manufacturer_data(77, &[0x10, 0xF0]));
        assert!(!f.matches_manufacturer_data(76, &[0x10]));
    }

    #[tokio::test(start_paused = true)]
    async fn elapsed_timeout_is_none() {
        let slow = async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            true
        };
        assert_eq!(with_timeout("test", Duration::from_secs(1), slow).await, None);
        assert_eq!(with_timeout("test", Duration::from_secs(1), async { 3 }).await, Some(3));
    }
}
