//! Peak clipping ahead of windowed risk computation.

use crate::risk::TimestampedRssi;

/// Samples after clipping plus the raw values that triggered it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClipResult {
    pub samples: Vec<TimestampedRssi>,
    pub peaks: Vec<i32>,
}

impl ClipResult {
    #[must_use]
    pub fn is_updated(&self) -> bool {
        !self.peaks.is_empty()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RssiClipper {
    threshold: i32,
}

impl RssiClipper {
    #[must_use]
    pub const fn new(threshold: i32) -> Self {
        Self { threshold }
    }

    /// Replace every sample above the threshold by
    /// `min(threshold, min(prev_raw, next_raw))`. Neighbours are read from the
    /// raw input; at either end a sample is its own neighbour.
    #[must_use]
    pub fn clip(&self, samples: &[TimestampedRssi]) -> ClipResult {
        let mut out = Vec::with_capacity(samples.len());
        let mut peaks = Vec::new();
        let last = samples.len().saturating_sub(1);

        for (i, sample) in samples.iter().enumerate() {
            if sample.rssi <= self.threshold {
                out.push(*sample);
                continue;
            }
            peaks.push(sample.rssi);
            let prev = samples[i.saturating_sub(1)].rssi;
            let next = samples[(i + 1).min(last)].rssi;
            out.push(TimestampedRssi {
                timestamp_s: sample.timestamp_s,
                rssi: self.threshold.min(prev.min(next)),
            });
        }

        ClipResult { samples: out, peaks }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn series(values: &[i32]) -> Vec<TimestampedRssi> {
        values
            .iter()
            .zip(0u64..)
            .map(|(&rssi, t)| TimestampedRssi { timestamp_s: t * 10, rssi })
            .collect()
    }

    fn rssis(r: &ClipResult) -> Vec<i32> {
        r.samples.iter().map(|s| s.rssi).collect()
    }

    #[test]
    fn peak_takes_lowest_raw_neighbour() {
        let r = RssiClipper::new(0).clip(&series(&[-50, 12, -70]));
        assert_eq!(rssis(&r), vec![-50, -70, -70]);
        assert_eq!(r.peaks, vec![12]);
    }

    #[test]
    fn consecutive_peaks_use_raw_values() {
        // neighbours of the second peak are raw 5 and -40, not the clipped value
        let r = RssiClipper::new(0).clip(&series(&[-30, 5, 8, -40]));
        assert_eq!(rssis(&r), vec![-30, -30, -40, -40]);
        assert_eq!(r.peaks, vec![5, 8]);
    }

    #[test]
    fn boundary_peak_is_capped_at_threshold() {
        let r = RssiClipper::new(0).clip(&series(&[7, 9]));
        assert_eq!(rssis(&r), vec![0, 0]);
    }

    #[test]
    fn below_threshold_untouched() {
        let input = series(&[-80, 0, -1]);
        let r = RssiClipper::new(0).clip(&input);
        assert_eq!(r.samples, input);
        assert!(!r.is_updated());
    }
}
