//! Session exposure-risk reduction.
//!
//! Pipeline: sort → duration gate → peak clipping → per-window risk →
//! aggregate risk. How far it runs depends on the [`PrecisionMode`].
#![allow(clippy::cast_precision_loss)]

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::clipper::RssiClipper;
use crate::errors::ProximityError;

pub const DEFAULT_DURATION_THRESHOLD_S: u64 = 300;
pub const DEFAULT_RSSI_THRESHOLD: i32 = 0;
pub const DEFAULT_TIME_WINDOW_S: u64 = 120;
pub const DEFAULT_TIME_OVERLAP_S: u64 = 60;
pub const DEFAULT_SOFTMAX_COEF_RSSI: f64 = 10.0 / std::f64::consts::LN_10;
pub const DEFAULT_P0: f64 = -66.0;
pub const DEFAULT_DELTAS: [f64; 10] = [39.0, 27.0, 23.0, 21.0, 20.0, 19.0, 18.0, 17.0, 16.0, 15.0];
pub const DEFAULT_SOFTMAX_COEF_RISK: f64 = 0.1;
pub const DEFAULT_RISK_THRESHOLD: f64 = 0.2;
/// Longest epoch that gets per-slot risks; longer epochs yield none.
pub const MAX_EPOCH_DURATION_S: u64 = 86_400;

/// One RSSI observation at an NTP-second timestamp.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimestampedRssi {
    pub timestamp_s: u64,
    pub rssi: i32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrecisionMode {
    /// Duration gate only; samples returned untouched.
    Full,
    /// Clipping and per-window risks.
    Medium,
    /// Everything, including the aggregate risk decision.
    Risks,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RiskFilterConfig {
    #[serde(default = "default_duration_threshold_s")]
    pub duration_threshold_s: u64,
    #[serde(default = "default_rssi_threshold")]
    pub rssi_threshold: i32,
    #[serde(default = "default_time_window_s")]
    pub time_window_s: u64,
    #[serde(default = "default_time_overlap_s")]
    pub time_overlap_s: u64,
    #[serde(default = "default_softmax_coef_rssi")]
    pub softmax_coef_rssi: f64,
    #[serde(default = "default_p0")]
    pub p0: f64,
    #[serde(default = "default_deltas")]
    pub deltas: Vec<f64>,
    #[serde(default = "default_softmax_coef_risk")]
    pub softmax_coef_risk: f64,
    #[serde(default = "default_risk_threshold")]
    pub risk_threshold: f64,
}

const fn default_duration_threshold_s() -> u64 {
    DEFAULT_DURATION_THRESHOLD_S
}
const fn default_rssi_threshold() -> i32 {
    DEFAULT_RSSI_THRESHOLD
}
const fn default_time_window_s() -> u64 {
    DEFAULT_TIME_WINDOW_S
}
const fn default_time_overlap_s() -> u64 {
    DEFAULT_TIME_OVERLAP_S
}
const fn default_softmax_coef_rssi() -> f64 {
    DEFAULT_SOFTMAX_COEF_RSSI
}
const fn default_p0() -> f64 {
    DEFAULT_P0
}
fn default_deltas() -> Vec<f64> {
    DEFAULT_DELTAS.to_vec()
}
const fn default_softmax_coef_risk() -> f64 {
    DEFAULT_SOFTMAX_COEF_RISK
}
const fn default_risk_threshold() -> f64 {
    DEFAULT_RISK_THRESHOLD
}

impl Default for RiskFilterConfig {
    fn default() -> Self {
        Self {
            duration_threshold_s: DEFAULT_DURATION_THRESHOLD_S,
            rssi_threshold: DEFAULT_RSSI_THRESHOLD,
            time_window_s: DEFAULT_TIME_WINDOW_S,
            time_overlap_s: DEFAULT_TIME_OVERLAP_S,
            softmax_coef_rssi: DEFAULT_SOFTMAX_COEF_RSSI,
            p0: DEFAULT_P0,
            deltas: DEFAULT_DELTAS.to_vec(),
            softmax_coef_risk: DEFAULT_SOFTMAX_COEF_RISK,
            risk_threshold: DEFAULT_RISK_THRESHOLD,
        }
    }
}

impl RiskFilterConfig {
    /// Distance between consecutive window starts.
    #[must_use]
    pub const fn stride_s(&self) -> u64 {
        self.time_window_s.saturating_sub(self.time_overlap_s)
    }

    /// Number of slots covered by one window.
    #[must_use]
    pub const fn window_slots(&self) -> u64 {
        match self.stride_s() {
            0 => 0,
            stride => self.time_window_s / stride,
        }
    }

    /// # Errors
    ///
    /// Returns `ProximityError::InvalidConfig` when the window geometry or
    /// the delta table cannot produce a risk.
    pub fn validate(&self) -> Result<(), ProximityError> {
        if self.time_window_s <= self.time_overlap_s {
            return Err(ProximityError::InvalidConfig(format!(
                "time window {}s must exceed overlap {}s",
                self.time_window_s, self.time_overlap_s
            )));
        }
        if self.time_window_s % self.stride_s() != 0 {
            return Err(ProximityError::InvalidConfig(format!(
                "time window {}s is not a multiple of stride {}s",
                self.time_window_s,
                self.stride_s()
            )));
        }
        if self.deltas.is_empty() || self.deltas.iter().any(|d| !(d.is_finite() && *d > 0.0)) {
            return Err(ProximityError::InvalidConfig(
                "delta table must be non-empty and strictly positive".into(),
            ));
        }
        Ok(())
    }
}

/// Smooth maximum: `factor * ln(mean(exp(v / factor)))`.
///
/// Returns `0.0` for an empty input or a non-positive factor.
#[must_use]
pub fn softmax(values: &[f64], factor: f64) -> f64 {
    if values.is_empty() || factor <= 0.0 {
        return 0.0;
    }
    // shift by the max so exp() cannot overflow
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let mean = values.iter().map(|v| ((v - max) / factor).exp()).sum::<f64>() / values.len() as f64;
    max + factor * mean.ln()
}

/// Per-window risk scores over one epoch.
#[derive(Clone, Copy, Debug)]
pub struct RiskComputer<'a> {
    config: &'a RiskFilterConfig,
}

impl<'a> RiskComputer<'a> {
    #[must_use]
    pub const fn new(config: &'a RiskFilterConfig) -> Self {
        Self { config }
    }

    /// Returns one risk in `[0, 1]` per slot of the epoch, or nothing for an
    /// epoch longer than [`MAX_EPOCH_DURATION_S`].
    #[must_use]
    pub fn compute(
        &self,
        samples: &[TimestampedRssi],
        epoch_start_s: u64,
        epoch_duration_s: u64,
    ) -> Vec<f64> {
        let stride = self.config.stride_s();
        if stride == 0 {
            return Vec::new();
        }
        if epoch_duration_s > MAX_EPOCH_DURATION_S {
            debug!(epoch_duration_s, max = MAX_EPOCH_DURATION_S, "epoch too long for window risks");
            return Vec::new();
        }
        let slot_count = epoch_duration_s.div_ceil(stride);
        let Ok(slot_count) = usize::try_from(slot_count) else {
            return Vec::new();
        };

        let mut slots: Vec<Vec<f64>> = vec![Vec::new(); slot_count];
        for s in samples {
            let Some(offset) = s.timestamp_s.checked_sub(epoch_start_s) else {
                continue;
            };
            let Ok(slot) = usize::try_from(offset / stride) else {
                continue;
            };
            if let Some(bucket) = slots.get_mut(slot) {
                bucket.push(f64::from(s.rssi));
            }
        }

        let window_slots = usize::try_from(self.config.window_slots()).unwrap_or(usize::MAX);
        (0..slot_count)
            .map(|i| {
                let end = i.saturating_add(window_slots).min(slot_count);
                let values: Vec<f64> = slots[i..end].iter().flatten().copied().collect();
                self.window_risk(&values)
            })
            .collect()
    }

    fn window_risk(&self, values: &[f64]) -> f64 {
        if values.is_empty() {
            return 0.0;
        }
        let Some(last) = self.config.deltas.len().checked_sub(1) else {
            return 0.0;
        };
        let avg = softmax(values, self.config.softmax_coef_rssi);
        let delta = self.config.deltas[(values.len() - 1).min(last)];
        ((avg - self.config.p0) / delta).clamp(0.0, 1.0)
    }
}

/// Clipping and per-window output.
#[derive(Clone, Debug, PartialEq)]
pub struct MediumOutput {
    pub records: Vec<TimestampedRssi>,
    pub window_risks: Vec<f64>,
    /// Mean of the clipped peak values; `None` when nothing was clipped.
    pub mean_peak: Option<f64>,
    pub peak_count: usize,
    pub updated: bool,
}

/// Medium output plus the aggregate risk that passed the threshold.
#[derive(Clone, Debug, PartialEq)]
pub struct RisksOutput {
    pub medium: MediumOutput,
    pub duration_minutes: f64,
    pub risk_density: f64,
    pub intermediate_risk: f64,
    pub risk: f64,
}

#[derive(Clone, Debug, PartialEq)]
pub enum RiskFilterOutput {
    Rejected,
    Full { records: Vec<TimestampedRssi> },
    Medium(MediumOutput),
    Risks(RisksOutput),
}

impl RiskFilterOutput {
    #[must_use]
    pub const fn is_accepted(&self) -> bool {
        !matches!(self, Self::Rejected)
    }

    #[must_use]
    pub fn records(&self) -> Option<&[TimestampedRssi]> {
        match self {
            Self::Rejected => None,
            Self::Full { records } => Some(records),
            Self::Medium(m) => Some(&m.records),
            Self::Risks(r) => Some(&r.medium.records),
        }
    }

    /// Whether clipping changed any sample value.
    #[must_use]
    pub const fn are_timestamped_rssis_updated(&self) -> bool {
        match self {
            Self::Rejected | Self::Full { .. } => false,
            Self::Medium(m) => m.updated,
            Self::Risks(r) => r.medium.updated,
        }
    }

    #[must_use]
    pub fn window_risks(&self) -> Option<&[f64]> {
        match self {
            Self::Medium(m) => Some(&m.window_risks),
            Self::Risks(r) => Some(&r.medium.window_risks),
            Self::Rejected | Self::Full { .. } => None,
        }
    }

    #[must_use]
    pub const fn risk(&self) -> Option<f64> {
        match self {
            Self::Risks(r) => Some(r.risk),
            _ => None,
        }
    }
}

/// Pure filter over a peer/session's accumulated samples.
#[derive(Clone, Debug, Default)]
pub struct ProximityRiskFilter {
    config: RiskFilterConfig,
}

impl ProximityRiskFilter {
    /// # Errors
    ///
    /// Returns `ProximityError::InvalidConfig` if `config` fails validation.
    pub fn new(config: RiskFilterConfig) -> Result<Self, ProximityError> {
        config.validate()?;
        Ok(Self { config })
    }

    #[must_use]
    pub const fn config(&self) -> &RiskFilterConfig {
        &self.config
    }

    #[must_use]
    pub fn filter(
        &self,
        records: &[TimestampedRssi],
        epoch_start_s: u64,
        epoch_duration_s: u64,
        mode: PrecisionMode,
    ) -> RiskFilterOutput {
        if records.is_empty() {
            return RiskFilterOutput::Rejected;
        }

        let mut sorted = records.to_vec();
        sorted.sort_by_key(|r| r.timestamp_s);
        let span_s = sorted[sorted.len() - 1].timestamp_s - sorted[0].timestamp_s;
        if span_s < self.config.duration_threshold_s {
            debug!(span_s, threshold = self.config.duration_threshold_s, "session too short");
            return RiskFilterOutput::Rejected;
        }

        if mode == PrecisionMode::Full {
            return RiskFilterOutput::Full { records: sorted };
        }

        let clipped = RssiClipper::new(self.config.rssi_threshold).clip(&sorted);
        let window_risks =
            RiskComputer::new(&self.config).compute(&clipped.samples, epoch_start_s, epoch_duration_s);
        let peak_count = clipped.peaks.len();
        let mean_peak = (peak_count > 0).then(|| {
            clipped.peaks.iter().map(|&p| f64::from(p)).sum::<f64>() / peak_count as f64
        });
        let medium = MediumOutput {
            updated: clipped.is_updated(),
            records: clipped.samples,
            window_risks,
            mean_peak,
            peak_count,
        };

        if mode == PrecisionMode::Medium {
            return RiskFilterOutput::Medium(medium);
        }

        if medium.window_risks.is_empty() {
            return RiskFilterOutput::Rejected;
        }
        let duration_minutes = span_s as f64 / 60.0;
        let risk_density = medium.window_risks.iter().filter(|r| **r > 0.0).count() as f64;
        let intermediate_risk = softmax(&medium.window_risks, self.config.softmax_coef_risk);
        let risk = intermediate_risk * (duration_minutes + risk_density)
            / (medium.window_risks.len() as f64 * 2.0);

        if risk < self.config.risk_threshold {
            debug!(risk, threshold = self.config.risk_threshold, "risk below threshold");
            return RiskFilterOutput::Rejected;
        }

        RiskFilterOutput::Risks(RisksOutput {
            medium,
            duration_minutes,
            risk_density,
            intermediate_risk,
            risk,
        })
    }
}
