//! Per-handset RSSI gain correction.

use serde::{Deserialize, Serialize};

/// Receive and transmit compensation gains, in dB.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CalibrationGains {
    pub rx_gain: i32,
    pub tx_gain: i32,
}

/// calibrated = raw - tx_gain - rx_gain
#[inline]
#[must_use]
pub const fn calibrate(raw_rssi: i32, rx_gain: i32, tx_gain: i32) -> i32 {
    raw_rssi.saturating_sub(tx_gain).saturating_sub(rx_gain)
}

impl CalibrationGains {
    #[must_use]
    pub const fn apply(&self, raw_rssi: i32) -> i32 {
        calibrate(raw_rssi, self.rx_gain, self.tx_gain)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeviceCalibration {
    pub model: String,
    pub rx_gain: i32,
    pub tx_gain: i32,
}

/// Calibration table keyed by device model, with a fallback pair.
///
/// The fallback is `rx_gain = 0, tx_gain = 0`, i.e. raw readings pass
/// through unchanged for unknown handsets.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CalibrationTable {
    /// Model of the handset running the engine.
    #[serde(default)]
    pub device_model: String,

    #[serde(default)]
    pub default: CalibrationGains,

    #[serde(default)]
    pub devices: Vec<DeviceCalibration>,
}

impl CalibrationTable {
    /// Gains for `model`; model names match case-insensitively.
    #[must_use]
    pub fn gains_for(&self, model: &str) -> CalibrationGains {
        self.devices
            .iter()
            .find(|d| d.model.eq_ignore_ascii_case(model))
            .map_or(self.default, |d| CalibrationGains {
                rx_gain: d.rx_gain,
                tx_gain: d.tx_gain,
            })
    }

    /// Gains for the local handset.
    #[must_use]
    pub fn local_gains(&self) -> CalibrationGains {
        self.gains_for(&self.device_model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn calibrate_known_values() {
        assert_eq!(calibrate(0, 0, 0), 0);
        assert_eq!(calibrate(-10, 1, 1), -12);
        assert_eq!(calibrate(10, 1, 1), 8);
    }

    #[test]
    fn table_lookup_falls_back_to_default() {
        let table = CalibrationTable {
            device_model: "Pixel 4".into(),
            default: CalibrationGains { rx_gain: -3, tx_gain: -7 },
            devices: vec![DeviceCalibration { model: "pixel 4".into(), rx_gain: 2, tx_gain: 5 }],
        };
        assert_eq!(table.local_gains(), CalibrationGains { rx_gain: 2, tx_gain: 5 });
        assert_eq!(table.gains_for("unknown"), CalibrationGains { rx_gain: -3, tx_gain: -7 });
        assert_eq!(table.local_gains().apply(-60), -67);
    }
}
