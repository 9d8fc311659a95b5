//! Epoch-indexed time: NTP seconds, fixed 900 s validity windows, and the
//! 16-bit time field carried by a Hello payload.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::errors::ProximityError;

/// Width of one identifier validity window.
pub const EPOCH_DURATION_S: u64 = 900;
/// Seconds between the NTP era (1900-01-01) and the Unix epoch.
pub const NTP_UNIX_OFFSET_S: u64 = 2_208_988_800;
/// Seconds represented by one unit of the Hello `time` field.
pub const TIME_QUANTUM_S: u64 = 1;

/// `[start_time_s, end_time_s)` in NTP seconds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EpochWindow {
    pub start_time_s: u64,
    pub end_time_s: u64,
}

impl EpochWindow {
    /// Window of the standard epoch width starting at `start_time_s`.
    #[must_use]
    pub const fn starting_at(start_time_s: u64) -> Self {
        Self {
            start_time_s,
            end_time_s: start_time_s.saturating_add(EPOCH_DURATION_S),
        }
    }

    /// Arbitrary window; `None` unless `end_time_s > start_time_s`.
    #[must_use]
    pub const fn new(start_time_s: u64, end_time_s: u64) -> Option<Self> {
        if end_time_s > start_time_s {
            Some(Self { start_time_s, end_time_s })
        } else {
            None
        }
    }

    /// The epoch of a schedule beginning at `origin_s` that contains `instant_s`.
    #[must_use]
    pub fn containing(origin_s: u64, instant_s: u64) -> Option<Self> {
        let index = epoch_index(origin_s, instant_s)?;
        let start = origin_s.checked_add(index.checked_mul(EPOCH_DURATION_S)?)?;
        Some(Self::starting_at(start))
    }

    #[must_use]
    pub const fn duration_s(&self) -> u64 {
        self.end_time_s - self.start_time_s
    }
}

/// Zero-based epoch number of `instant_s` relative to `origin_s`.
#[must_use]
pub const fn epoch_index(origin_s: u64, instant_s: u64) -> Option<u64> {
    if instant_s < origin_s {
        return None;
    }
    Some((instant_s - origin_s) / EPOCH_DURATION_S)
}

/// Wall-clock instant to NTP seconds (sub-second part dropped).
#[must_use]
pub fn unix_to_ntp(t: SystemTime) -> u64 {
    t.duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
        .saturating_add(NTP_UNIX_OFFSET_S)
}

#[must_use]
pub fn ntp_to_unix(ntp_s: u64) -> SystemTime {
    UNIX_EPOCH + Duration::from_secs(ntp_s.saturating_sub(NTP_UNIX_OFFSET_S))
}

#[must_use]
pub const fn is_within(window: &EpochWindow, instant_s: u64) -> bool {
    instant_s >= window.start_time_s && instant_s < window.end_time_s
}

/// Check that `instant_s` lies inside `window`.
///
/// # Errors
///
/// Returns `ProximityError::OutOfWindow` if `instant_s < start` or `instant_s >= end`.
pub const fn verify_within(window: &EpochWindow, instant_s: u64) -> Result<(), ProximityError> {
    if is_within(window, instant_s) {
        Ok(())
    } else {
        Err(ProximityError::OutOfWindow {
            instant: instant_s,
            start: window.start_time_s,
            end: window.end_time_s,
        })
    }
}

/// Offset of `instant_s` into `window`, in Hello time units.
///
/// # Errors
///
/// Returns `ProximityError::OutOfWindow` if the instant is outside the window
/// or the offset does not fit the 16-bit wire field.
pub fn time_units(window: &EpochWindow, instant_s: u64) -> Result<u16, ProximityError> {
    verify_within(window, instant_s)?;
    let units = (instant_s - window.start_time_s) / TIME_QUANTUM_S;
    u16::try_from(units).map_err(|_| ProximityError::OutOfWindow {
        instant: instant_s,
        start: window.start_time_s,
        end: window.end_time_s,
    })
}

/// Seconds left before `window` closes; zero once it has.
#[must_use]
pub const fn remaining_s(window: &EpochWindow, instant_s: u64) -> u64 {
    window.end_time_s.saturating_sub(instant_s)
}

/// Source of "now" in NTP seconds.
pub trait WallClock: Send + Sync {
    fn now_ntp_s(&self) -> u64;
}

/// `WallClock` backed by `SystemTime::now()`.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl WallClock for SystemClock {
    fn now_ntp_s(&self) -> u64 {
        unix_to_ntp(SystemTime::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const START: u64 = 3_900_000_000;

    #[test]
    fn window_bounds_are_exclusive_at_end() {
        let w = EpochWindow::starting_at(START);
        assert!(!is_within(&w, START - 1));
        assert!(is_within(&w, START));
        assert!(is_within(&w, START + EPOCH_DURATION_S - 1));
        assert!(!is_within(&w, START + EPOCH_DURATION_S));
    }

    #[test]
    fn time_units_counts_seconds_since_start() {
        let w = EpochWindow::starting_at(START);
        assert_eq!(time_units(&w, START), Ok(0));
        assert_eq!(time_units(&w, START + 899), Ok(899));
        assert!(matches!(
            time_units(&w, START + 900),
            Err(ProximityError::OutOfWindow { .. })
        ));
    }

    #[test]
    fn oversized_window_overflows_time_field() {
        let w = EpochWindow::new(0, 1 << 20).unwrap();
        assert_eq!(time_units(&w, 65_535), Ok(u16::MAX));
        assert!(time_units(&w, 65_536).is_err());
    }

    #[test]
    fn new_rejects_empty_window() {
        assert!(EpochWindow::new(10, 10).is_none());
        assert!(EpochWindow::new(10, 9).is_none());
    }

    #[test]
    fn containing_aligns_to_origin() {
        let w = EpochWindow::containing(START, START + 1_801).unwrap();
        assert_eq!(w.start_time_s, START + 1_800);
        assert_eq!(epoch_index(START, START + 1_801), Some(2));
        assert!(EpochWindow::containing(START, START - 1).is_none());
    }

    #[test]
    fn ntp_roundtrip() {
        let t = UNIX_EPOCH + Duration::from_secs(1_600_000_000);
        let ntp = unix_to_ntp(t);
        assert_eq!(ntp, 1_600_000_000 + NTP_UNIX_OFFSET_S);
        assert_eq!(ntp_to_unix(ntp), t);
    }

    #[test]
    fn remaining_saturates() {
        let w = EpochWindow::starting_at(START);
        assert_eq!(remaining_s(&w, START + 870), 30);
        assert_eq!(remaining_s(&w, START + 2_000), 0);
    }
}
