//! Per-peer connections used for on-demand RSSI refinement.
//!
//! Each peer gets its own async slot. A second read for the same peer waits
//! on the slot instead of racing the first; requests are never merged.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, warn};

use crate::capability::{with_timeout, ConnectionHandle, ConnectionRssiReader};
use crate::errors::ProximityError;
use crate::types::PeerHandle;

type Slot = Arc<AsyncMutex<Option<ConnectionHandle>>>;

struct Slots {
    /// Cleared by `close_all`; no connection opens until `reopen`.
    accepting: bool,
    peers: HashMap<PeerHandle, Slot>,
}

pub struct ConnectionPool {
    reader: Arc<dyn ConnectionRssiReader>,
    timeout: Duration,
    slots: Mutex<Slots>,
}

impl ConnectionPool {
    #[must_use]
    pub fn new(reader: Arc<dyn ConnectionRssiReader>, timeout: Duration) -> Self {
        Self {
            reader,
            timeout,
            slots: Mutex::new(Slots { accepting: true, peers: HashMap::new() }),
        }
    }

    fn slot(&self, peer: &PeerHandle) -> Option<Slot> {
        let mut slots = self.slots.lock();
        if !slots.accepting {
            return None;
        }
        Some(slots.peers.entry(peer.clone()).or_default().clone())
    }

    /// Whether `slot` is still the live slot for `peer`.
    fn is_current(&self, peer: &PeerHandle, slot: &Slot) -> bool {
        let slots = self.slots.lock();
        slots.accepting && slots.peers.get(peer).is_some_and(|current| Arc::ptr_eq(current, slot))
    }

    /// Drop `peer`'s slot if nobody else holds it.
    fn release(&self, peer: &PeerHandle, slot: &Slot) {
        let mut slots = self.slots.lock();
        let unused = slots
            .peers
            .get(peer)
            .is_some_and(|current| Arc::ptr_eq(current, slot) && Arc::strong_count(slot) == 2);
        if unused {
            slots.peers.remove(peer);
        }
    }

    /// Number of peers with a currently open connection.
    pub async fn open_count(&self) -> usize {
        let slots: Vec<Slot> = self.slots.lock().peers.values().cloned().collect();
        let mut open = 0;
        for slot in slots {
            if slot.lock().await.is_some() {
                open += 1;
            }
        }
        open
    }

    /// Open (or reuse) a connection to `peer` and read its RSSI once.
    ///
    /// # Errors
    ///
    /// Returns `ProximityError::NotRunning` after [`Self::close_all`], or
    /// `ProximityError::ConnectionFailure` if the connection cannot be opened
    /// or the read fails or times out. A failed read closes the connection.
    pub async fn read_rssi(&self, peer: &PeerHandle, close_after: bool) -> Result<i32, ProximityError> {
        let slot = self.slot(peer).ok_or(ProximityError::NotRunning)?;
        let mut guard = slot.lock().await;
        let result = self.read_locked(peer, &slot, &mut guard, close_after).await;
        let idle = guard.is_none();
        drop(guard);
        if idle {
            self.release(peer, &slot);
        }
        result
    }

    async fn read_locked(
        &self,
        peer: &PeerHandle,
        slot: &Slot,
        guard: &mut Option<ConnectionHandle>,
        close_after: bool,
    ) -> Result<i32, ProximityError> {
        let handle = if let Some(handle) = *guard {
            handle
        } else {
            // close_all may have run while this slot was contended
            if !self.is_current(peer, slot) {
                return Err(ProximityError::NotRunning);
            }
            let opened = with_timeout("connection open", self.timeout, self.reader.open(peer))
                .await
                .flatten();
            let Some(handle) = opened else {
                warn!(%peer, "connection open failed");
                return Err(ProximityError::ConnectionFailure { peer: peer.clone() });
            };
            debug!(%peer, handle = handle.0, "connection opened");
            *guard = Some(handle);
            handle
        };

        let rssi = with_timeout("rssi read", self.timeout, self.reader.read_rssi(handle))
            .await
            .flatten();

        if close_after || rssi.is_none() {
            *guard = None;
            self.close_handle(peer, handle).await;
        }

        rssi.ok_or_else(|| ProximityError::ConnectionFailure { peer: peer.clone() })
    }

    async fn close_handle(&self, peer: &PeerHandle, handle: ConnectionHandle) {
        if with_timeout("connection close", self.timeout, self.reader.close(handle))
            .await
            .is_none()
        {
            warn!(%peer, handle = handle.0, "connection close timed out");
        } else {
            debug!(%peer, handle = handle.0, "connection closed");
        }
    }

    /// Close every open connection and refuse new ones until [`Self::reopen`].
    /// Failures are logged only.
    pub async fn close_all(&self) {
        let slots: Vec<(PeerHandle, Slot)> = {
            let mut slots = self.slots.lock();
            slots.accepting = false;
            slots.peers.drain().collect()
        };
        for (peer, slot) in slots {
            let handle = slot.lock().await.take();
            if let Some(handle) = handle {
                self.close_handle(&peer, handle).await;
            }
        }
    }

    pub fn reopen(&self) {
        self.slots.lock().accepting = true;
    }
}
