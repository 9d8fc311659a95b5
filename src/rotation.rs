//! Rotation scheduling and the adapter-event suppression deadline.

use std::time::Duration;

use tokio::time::Instant;

use crate::epoch::{remaining_s, EpochWindow};

/// Default upper bound between payload refreshes.
pub const HELLO_REFRESH_MAX_DELAY_S: u64 = 30;

/// Farthest any engine deadline is scheduled.
pub const MAX_DEADLINE_DELAY: Duration = Duration::from_secs(365 * 86_400);

/// `now + delay`, saturating at [`MAX_DEADLINE_DELAY`].
#[must_use]
pub fn deadline_after(now: Instant, delay: Duration) -> Instant {
    now + delay.min(MAX_DEADLINE_DELAY)
}

/// Delay before the next rotation tick: the rest of the epoch, capped at
/// `max_delay_s`, and never less than one second.
#[must_use]
pub fn rotation_delay(window: &EpochWindow, now_s: u64, max_delay_s: u64) -> Duration {
    let secs = remaining_s(window, now_s).min(max_delay_s).max(1);
    Duration::from_secs(secs)
}

/// What a rotation tick has to do.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RotationAction {
    /// Push a fresh payload for the same identifier.
    Refresh,
    /// Stop and start again so advertiser and scanner pick up new settings.
    Restart,
}

/// Restart when the epoch changed or calibration was updated since the last start.
#[must_use]
pub fn rotation_action(
    started_window: &EpochWindow,
    current_window: &EpochWindow,
    started_revision: u64,
    current_revision: u64,
) -> RotationAction {
    if started_window != current_window || started_revision != current_revision {
        RotationAction::Restart
    } else {
        RotationAction::Refresh
    }
}

/// Deadline during which adapter-disabled events are self-inflicted.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SuppressionWindow {
    deadline: Option<Instant>,
}

impl SuppressionWindow {
    /// Suppress until `now + grace`. Extends but never shortens an armed window.
    pub fn arm(&mut self, now: Instant, grace: Duration) {
        let deadline = deadline_after(now, grace);
        self.deadline = Some(self.deadline.map_or(deadline, |d| d.max(deadline)));
    }

    #[must_use]
    pub fn is_active(&self, now: Instant) -> bool {
        self.deadline.is_some_and(|d| now < d)
    }

    pub fn disarm(&mut self) {
        self.deadline = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::epoch::EPOCH_DURATION_S;

    const START: u64 = 3_900_000_000;

    #[test]
    fn delay_capped_by_refresh_bound() {
        let w = EpochWindow::starting_at(START);
        assert_eq!(rotation_delay(&w, START, 30), Duration::from_secs(30));
        assert_eq!(rotation_delay(&w, START + EPOCH_DURATION_S - 12, 30), Duration::from_secs(12));
        assert_eq!(rotation_delay(&w, START + EPOCH_DURATION_S + 5, 30), Duration::from_secs(1));
    }

    #[test]
    fn action_restarts_on_epoch_or_revision_change() {
        let a = EpochWindow::starting_at(START);
        let b = EpochWindow::starting_at(START + EPOCH_DURATION_S);
        assert_eq!(rotation_action(&a, &a, 0, 0), RotationAction::Refresh);
        assert_eq!(rotation_action(&a, &b, 0, 0), RotationAction::Restart);
        assert_eq!(rotation_action(&a, &a, 0, 1), RotationAction::Restart);
    }

    #[test]
    fn deadlines_saturate() {
        let now = Instant::now();
        assert_eq!(deadline_after(now, Duration::from_secs(5)), now + Duration::from_secs(5));
        assert_eq!(deadline_after(now, Duration::MAX), now + MAX_DEADLINE_DELAY);

        let mut s = SuppressionWindow::default();
        s.arm(now, Duration::MAX);
        assert!(s.is_active(now + Duration::from_secs(86_400)));
    }

    #[test]
    fn suppression_expires_at_deadline() {
        let now = Instant::now();
        let mut s = SuppressionWindow::default();
        assert!(!s.is_active(now));
        s.arm(now, Duration::from_secs(2));
        assert!(s.is_active(now + Duration::from_secs(1)));
        assert!(!s.is_active(now + Duration::from_secs(2)));
        s.arm(now, Duration::from_secs(1));
        assert!(s.is_active(now + Duration::from_millis(1_500)));
        s.disarm();
        assert!(!s.is_active(now));
    }
}
