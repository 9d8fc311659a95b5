//! TOML configuration loading.

use std::io::Write as _;

use proximity_engine::config::DEFAULT_SERVICE_UUID;
use proximity_engine::*;

const FULL: &str = r#"
[radio]
service_uuid = "0000fd64-0000-1000-8000-00805f9b34fb"
manufacturer_id = 76
manufacturer_data = [16, 5]
manufacturer_data_mask = [255, 255]
operation_timeout_ms = 2500
max_restart_attempts = 5
restart_backoff_ms = 1000
allow_adapter_restart = false
resume_on_adapter_enabled = true
event_queue_capacity = 256

[rotation]
hello_refresh_max_delay_s = 15

[adapter]
poll_interval_ms = 250
max_poll_iterations = 8
suppression_grace_ms = 1000

[cache]
capacity = 200
ttl_s = 600

[calibration]
device_model = "Pixel 4"
default = { rx_gain = -2, tx_gain = -6 }
devices = [
    { model = "Pixel 4", rx_gain = -4, tx_gain = -9 },
    { model = "SM-G973F", rx_gain = 3, tx_gain = -1 },
]

[risk]
duration_threshold_s = 600
p0 = -70
deltas = [30.0, 25.0]
risk_threshold = 0.5

[identifiers]
retained_past_epochs = 4
"#;

#[test]
fn full_document_parses() {
    let config = EngineConfig::from_toml(FULL).unwrap();
    assert_eq!(config.radio.service_uuid, DEFAULT_SERVICE_UUID);
    assert_eq!(config.radio.manufacturer_data, vec![16, 5]);
    assert!(!config.radio.allow_adapter_restart);
    assert_eq!(config.rotation.hello_refresh_max_delay_s, 15);
    assert_eq!(config.adapter.max_poll_iterations, 8);
    assert_eq!(config.cache.capacity, 200);
    assert_eq!(
        config.calibration.local_gains(),
        CalibrationGains { rx_gain: -4, tx_gain: -9 }
    );
    assert_eq!(
        config.calibration.gains_for("unknown"),
        CalibrationGains { rx_gain: -2, tx_gain: -6 }
    );
    assert_eq!(config.risk.duration_threshold_s, 600);
    assert!((config.risk.p0 + 70.0).abs() < f64::EPSILON);
    assert_eq!(config.risk.deltas, vec![30.0, 25.0]);
    // untouched risk fields keep their defaults
    assert_eq!(config.risk.time_window_s, 120);
    assert_eq!(config.identifiers.retained_past_epochs, 4);
}

#[test]
fn serialization_roundtrips() {
    let config = EngineConfig::from_toml(FULL).unwrap();
    let text = config.to_toml().unwrap();
    assert_eq!(EngineConfig::from_toml(&text).unwrap(), config);
}

#[test]
fn from_file_reads_document() {
    let path = std::env::temp_dir().join(format!("proximity-engine-{}.toml", std::process::id()));
    let mut file = std::fs::File::create(&path).unwrap();
    file.write_all(FULL.as_bytes()).unwrap();
    drop(file);
    let config = EngineConfig::from_file(&path).unwrap();
    std::fs::remove_file(&path).unwrap();
    assert_eq!(config.cache.ttl_s, 600);
}

#[test]
fn missing_file_is_io_error() {
    let err = EngineConfig::from_file(std::path::Path::new("/nonexistent/proximity.toml")).unwrap_err();
    assert!(matches!(err, ConfigError::Io(_)));
}

#[test]
fn inconsistent_risk_window_rejected() {
    let err = EngineConfig::from_toml("[risk]\ntime_window_s = 60\ntime_overlap_s = 60\n").unwrap_err();
    assert!(matches!(err, ConfigError::Validation(_)));
    let engine_err: ProximityError = err.into();
    assert!(matches!(engine_err, ProximityError::InvalidConfig(_)));
}

#[test]
fn zero_poll_iterations_rejected() {
    let err = EngineConfig::from_toml("[adapter]\nmax_poll_iterations = 0\n").unwrap_err();
    assert!(matches!(err, ConfigError::Validation(_)));
}

#[test]
fn unbounded_cache_ttl_rejected() {
    let err = EngineConfig::from_toml("[cache]\nttl_s = 9223372036854775807\n").unwrap_err();
    assert!(matches!(err, ConfigError::Validation(_)));

    // a cache built directly with such a TTL still decodes instead of panicking
    let cache = PayloadIdCache::new(8, std::time::Duration::from_secs(9_223_372_036_854_775_807));
    assert!(cache.get_or_decode(&[0; 16]).is_ok());
}
