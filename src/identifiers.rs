//! Identifier supply: the seam to the external provisioning collaborator,
//! plus a bounded ring that keeps the last few expired epochs around to
//! absorb clock skew.

use std::collections::VecDeque;

use parking_lot::RwLock;
use tracing::debug;

use crate::config::IdentifiersConfig;
use crate::epoch::is_within;
use crate::types::{EphemeralIdentifier, MacKey};

/// Default number of already-expired identifiers retained.
pub const DEFAULT_RETAINED_PAST_EPOCHS: usize = 2;

/// Supplies the identifier to broadcast and the key that authenticates it.
pub trait IdentifierSource: Send + Sync {
    /// Identifier to use at `now_s`. May be stale if nothing newer is known.
    fn current(&self, now_s: u64) -> Option<EphemeralIdentifier>;

    /// The identifier following `identifier`, used when it has just expired.
    fn adjacent(&self, identifier: &EphemeralIdentifier) -> Option<EphemeralIdentifier>;

    fn key(&self) -> Option<MacKey>;
}

/// Identifiers ordered by window start.
#[derive(Clone, Debug, Default)]
pub struct IdentifierRing {
    entries: VecDeque<EphemeralIdentifier>,
    retained_past: usize,
}

impl IdentifierRing {
    #[must_use]
    pub const fn new(retained_past: usize) -> Self {
        Self { entries: VecDeque::new(), retained_past }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &EphemeralIdentifier> {
        self.entries.iter()
    }

    /// Insert keeping start order; an identifier for an already-known window replaces it.
    pub fn push(&mut self, identifier: EphemeralIdentifier) {
        let start = identifier.window.start_time_s;
        match self
            .entries
            .binary_search_by_key(&start, |e| e.window.start_time_s)
        {
            Ok(pos) => self.entries[pos] = identifier,
            Err(pos) => self.entries.insert(pos, identifier),
        }
    }

    #[must_use]
    pub fn current(&self, now_s: u64) -> Option<EphemeralIdentifier> {
        self.entries
            .iter()
            .find(|e| is_within(&e.window, now_s))
            .or_else(|| {
                self.entries
                    .iter()
                    .rev()
                    .find(|e| e.window.start_time_s <= now_s)
            })
            .copied()
    }

    #[must_use]
    pub fn adjacent(&self, identifier: &EphemeralIdentifier) -> Option<EphemeralIdentifier> {
        let end = identifier.window.end_time_s;
        self.entries
            .iter()
            .find(|e| e.window.start_time_s >= end)
            .or_else(|| {
                self.entries
                    .iter()
                    .find(|e| e.window.start_time_s > identifier.window.start_time_s)
            })
            .copied()
    }

    /// Drop expired identifiers beyond the retention horizon. Returns how many were dropped.
    pub fn prune(&mut self, now_s: u64) -> usize {
        let expired = self
            .entries
            .iter()
            .take_while(|e| e.window.end_time_s <= now_s)
            .count();
        let excess = expired.saturating_sub(self.retained_past);
        self.entries.drain(..excess);
        excess
    }
}

/// Thread-safe `IdentifierSource` fed by the provisioning collaborator.
#[derive(Debug, Default)]
pub struct SharedIdentifiers {
    ring: RwLock<IdentifierRing>,
    key: RwLock<Option<MacKey>>,
}

impl SharedIdentifiers {
    #[must_use]
    pub fn new(retained_past: usize) -> Self {
        Self {
            ring: RwLock::new(IdentifierRing::new(retained_past)),
            key: RwLock::new(None),
        }
    }

    /// Retains `[identifiers] retained_past_epochs` expired identifiers.
    #[must_use]
    pub fn from_config(config: &IdentifiersConfig) -> Self {
        Self::new(config.retained_past_epochs)
    }

    pub fn push(&self, identifier: EphemeralIdentifier) {
        self.ring.write().push(identifier);
    }

    pub fn extend(&self, identifiers: impl IntoIterator<Item = EphemeralIdentifier>) {
        let mut ring = self.ring.write();
        for id in identifiers {
            ring.push(id);
        }
    }

    pub fn set_key(&self, key: MacKey) {
        *self.key.write() = Some(key);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ring.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ring.read().is_empty()
    }
}

impl IdentifierSource for SharedIdentifiers {
    fn current(&self, now_s: u64) -> Option<EphemeralIdentifier> {
        let mut ring = self.ring.write();
        let dropped = ring.prune(now_s);
        if dropped > 0 {
            debug!(dropped, remaining = ring.len(), "pruned expired identifiers");
        }
        ring.current(now_s)
    }

    fn adjacent(&self, identifier: &EphemeralIdentifier) -> Option<EphemeralIdentifier> {
        self.ring.read().adjacent(identifier)
    }

    fn key(&self) -> Option<MacKey> {
        self.key.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::epoch::{EpochWindow, EPOCH_DURATION_S};
    use crate::types::Ebid;

    const T0: u64 = 3_900_000_000;

    fn id(n: u8) -> EphemeralIdentifier {
        EphemeralIdentifier {
            ecc: 1,
            ebid: Ebid([n; 8]),
            window: EpochWindow::starting_at(T0 + u64::from(n) * EPOCH_DURATION_S),
        }
    }

    #[test]
    fn current_picks_covering_window() {
        let mut ring = IdentifierRing::new(2);
        ring.extend_for_test([id(2), id(0), id(1)]);
        assert_eq!(ring.current(T0 + EPOCH_DURATION_S + 5), Some(id(1)));
        // past the last known window: stale fallback to the newest started one
        assert_eq!(ring.current(T0 + 10 * EPOCH_DURATION_S), Some(id(2)));
        assert_eq!(ring.current(T0 - 1), None);
    }

    #[test]
    fn adjacent_is_successor_window() {
        let mut ring = IdentifierRing::new(2);
        ring.extend_for_test([id(0), id(1), id(2)]);
        assert_eq!(ring.adjacent(&id(0)), Some(id(1)));
        assert_eq!(ring.adjacent(&id(2)), None);
    }

    #[test]
    fn prune_keeps_last_n_expired() {
        let mut ring = IdentifierRing::new(2);
        ring.extend_for_test([id(0), id(1), id(2), id(3), id(4)]);
        let now = T0 + 4 * EPOCH_DURATION_S + 1; // id(0..=3) expired
        assert_eq!(ring.prune(now), 2);
        let kept: Vec<_> = ring.iter().map(|e| e.ebid.0[0]).collect();
        assert_eq!(kept, vec![2, 3, 4]);
    }

    #[test]
    fn shared_source_prunes_to_configured_retention() {
        let ids = SharedIdentifiers::from_config(&IdentifiersConfig { retained_past_epochs: 1 });
        ids.extend((0..4).map(id));
        assert_eq!(ids.current(T0 + 3 * EPOCH_DURATION_S + 1), Some(id(3)));
        assert_eq!(ids.len(), 2);
    }

    #[test]
    fn push_replaces_same_window() {
        let mut ring = IdentifierRing::new(1);
        ring.push(id(0));
        let mut replacement = id(0);
        replacement.ecc = 9;
        ring.push(replacement);
        assert_eq!(ring.len(), 1);
        assert_eq!(ring.current(T0).map(|e| e.ecc), Some(9));
    }

    impl IdentifierRing {
        fn extend_for_test(&mut self, ids: impl IntoIterator<Item = EphemeralIdentifier>) {
            for i in ids {
                self.push(i);
            }
        }
    }
}
