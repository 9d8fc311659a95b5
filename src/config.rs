//! Engine configuration, loaded from TOML.
//!
//! ```toml
//! [radio]
//! service_uuid = "0000fd64-0000-1000-8000-00805f9b34fb"
//! operation_timeout_ms = 5000
//!
//! [calibration]
//! device_model = "Pixel 4"
//! devices = [{ model = "Pixel 4", rx_gain = -4, tx_gain = -9 }]
//!
//! [risk]
//! duration_threshold_s = 300
//! ```
//!
//! Every section and field is optional; omitted values take their defaults.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::{uuid, Uuid};

use crate::cache::CacheConfig;
use crate::calibration::CalibrationTable;
use crate::capability::ScanFilters;
use crate::errors::ConfigError;
use crate::identifiers::DEFAULT_RETAINED_PAST_EPOCHS;
use crate::risk::RiskFilterConfig;
use crate::rotation::HELLO_REFRESH_MAX_DELAY_S;

/// 16-bit service UUID `0xFD64` on the Bluetooth base UUID.
pub const DEFAULT_SERVICE_UUID: Uuid = uuid!("0000fd64-0000-1000-8000-00805f9b34fb");
pub const DEFAULT_MANUFACTURER_ID: u16 = 76;

/// Upper bound on every millisecond delay setting.
pub const MAX_DELAY_MS: u64 = 3_600_000;
/// Upper bound on `cache.ttl_s`.
pub const MAX_CACHE_TTL_S: u64 = 86_400;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    #[serde(default)]
    pub radio: RadioConfig,

    #[serde(default)]
    pub rotation: RotationConfig,

    #[serde(default)]
    pub adapter: AdapterConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub calibration: CalibrationTable,

    #[serde(default)]
    pub risk: RiskFilterConfig,

    #[serde(default)]
    pub identifiers: IdentifiersConfig,
}

impl EngineConfig {
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// # Errors
    ///
    /// Returns an error if the TOML is invalid or fails [`Self::validate`].
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// # Errors
    ///
    /// Returns `ConfigError::Validation` describing the first inconsistent setting.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let radio = &self.radio;
        if radio.manufacturer_data.len() != radio.manufacturer_data_mask.len() {
            return Err(ConfigError::Validation(format!(
                "manufacturer_data ({} bytes) and manufacturer_data_mask ({} bytes) differ in length",
                radio.manufacturer_data.len(),
                radio.manufacturer_data_mask.len()
            )));
        }
        if radio.operation_timeout_ms == 0 {
            return Err(ConfigError::Validation("radio.operation_timeout_ms must be positive".into()));
        }
        if radio.event_queue_capacity == 0 {
            return Err(ConfigError::Validation("radio.event_queue_capacity must be positive".into()));
        }
        if self.rotation.hello_refresh_max_delay_s == 0 {
            return Err(ConfigError::Validation(
                "rotation.hello_refresh_max_delay_s must be positive".into(),
            ));
        }
        if self.adapter.max_poll_iterations == 0 {
            return Err(ConfigError::Validation("adapter.max_poll_iterations must be positive".into()));
        }
        if self.cache.capacity == 0 {
            return Err(ConfigError::Validation("cache.capacity must be positive".into()));
        }
        for (name, value) in [
            ("radio.operation_timeout_ms", radio.operation_timeout_ms),
            ("radio.restart_backoff_ms", radio.restart_backoff_ms),
            ("adapter.poll_interval_ms", self.adapter.poll_interval_ms),
            ("adapter.suppression_grace_ms", self.adapter.suppression_grace_ms),
        ] {
            check_at_most(name, value, MAX_DELAY_MS)?;
        }
        check_at_most("cache.ttl_s", self.cache.ttl_s, MAX_CACHE_TTL_S)?;
        self.risk
            .validate()
            .map_err(|e| ConfigError::Validation(e.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RadioConfig {
    #[serde(default = "default_service_uuid")]
    pub service_uuid: Uuid,

    #[serde(default = "default_manufacturer_id")]
    pub manufacturer_id: u16,

    #[serde(default)]
    pub manufacturer_data: Vec<u8>,

    #[serde(default)]
    pub manufacturer_data_mask: Vec<u8>,

    /// Bound on every advertiser/scanner/adapter call.
    #[serde(default = "default_operation_timeout_ms")]
    pub operation_timeout_ms: u64,

    /// Consecutive start failures tolerated before the adapter is restarted.
    #[serde(default = "default_max_restart_attempts")]
    pub max_restart_attempts: u32,

    #[serde(default = "default_restart_backoff_ms")]
    pub restart_backoff_ms: u64,

    #[serde(default = "default_true")]
    pub allow_adapter_restart: bool,

    #[serde(default = "default_true")]
    pub resume_on_adapter_enabled: bool,

    #[serde(default = "default_event_queue_capacity")]
    pub event_queue_capacity: usize,
}

impl RadioConfig {
    #[must_use]
    pub fn scan_filters(&self) -> ScanFilters {
        ScanFilters {
            service_uuid: self.service_uuid,
            manufacturer_id: self.manufacturer_id,
            manufacturer_data: self.manufacturer_data.clone(),
            manufacturer_data_mask: self.manufacturer_data_mask.clone(),
        }
    }

    #[must_use]
    pub const fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }

    #[must_use]
    pub const fn restart_backoff(&self) -> Duration {
        Duration::from_millis(self.restart_backoff_ms)
    }
}

impl Default for RadioConfig {
    fn default() -> Self {
        Self {
            service_uuid: DEFAULT_SERVICE_UUID,
            manufacturer_id: DEFAULT_MANUFACTURER_ID,
            manufacturer_data: Vec::new(),
            manufacturer_data_mask: Vec::new(),
            operation_timeout_ms: default_operation_timeout_ms(),
            max_restart_attempts: default_max_restart_attempts(),
            restart_backoff_ms: default_restart_backoff_ms(),
            allow_adapter_restart: true,
            resume_on_adapter_enabled: true,
            event_queue_capacity: default_event_queue_capacity(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RotationConfig {
    #[serde(default = "default_hello_refresh_max_delay_s")]
    pub hello_refresh_max_delay_s: u64,
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self { hello_refresh_max_delay_s: HELLO_REFRESH_MAX_DELAY_S }
    }
}

/// Self-initiated adapter restart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AdapterConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Polls per phase (disabling, then enabling) before giving up.
    #[serde(default = "default_max_poll_iterations")]
    pub max_poll_iterations: u32,

    /// How long adapter-disabled events stay suppressed after a restart completes.
    #[serde(default = "default_suppression_grace_ms")]
    pub suppression_grace_ms: u64,
}

impl AdapterConfig {
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    #[must_use]
    pub const fn suppression_grace(&self) -> Duration {
        Duration::from_millis(self.suppression_grace_ms)
    }
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            max_poll_iterations: default_max_poll_iterations(),
            suppression_grace_ms: default_suppression_grace_ms(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IdentifiersConfig {
    /// Expired identifiers kept by [`SharedIdentifiers::from_config`].
    ///
    /// [`SharedIdentifiers::from_config`]: crate::identifiers::SharedIdentifiers::from_config
    #[serde(default = "default_retained_past_epochs")]
    pub retained_past_epochs: usize,
}

impl Default for IdentifiersConfig {
    fn default() -> Self {
        Self { retained_past_epochs: DEFAULT_RETAINED_PAST_EPOCHS }
    }
}

fn check_at_most(name: &str, value: u64, max: u64) -> Result<(), ConfigError> {
    if value > max {
        return Err(ConfigError::Validation(format!("{name} is {value}, at most {max} allowed")));
    }
    Ok(())
}

const fn default_service_uuid() -> Uuid {
    DEFAULT_SERVICE_UUID
}

const fn default_manufacturer_id() -> u16 {
    DEFAULT_MANUFACTURER_ID
}

const fn default_operation_timeout_ms() -> u64 {
    5_000
}

const fn default_max_restart_attempts() -> u32 {
    3
}

const fn default_restart_backoff_ms() -> u64 {
    2_000
}

const fn default_true() -> bool {
    true
}

const fn default_event_queue_capacity() -> usize {
    1_024
}

const fn default_hello_refresh_max_delay_s() -> u64 {
    HELLO_REFRESH_MAX_DELAY_S
}

const fn default_poll_interval_ms() -> u64 {
    500
}

const fn default_max_poll_iterations() -> u32 {
    20
}

const fn default_suppression_grace_ms() -> u64 {
    2_000
}

const fn default_retained_past_epochs() -> usize {
    DEFAULT_RETAINED_PAST_EPOCHS
}
