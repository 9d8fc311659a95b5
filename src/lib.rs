#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

//! Proximity exchange engine
//!
//! Broadcasts a rotating 16-byte Hello payload that proves short-term identity
//! without exposing a stable identifier, ingests the payloads of nearby
//! devices as calibrated proximity records, and reduces a session's RSSI
//! history to an exposure-risk decision.

// Fixed protocol choices:
// - MAC: HMAC-SHA256 over `prefix || fields`, truncated to 5 bytes in Hello
// - Epoch: 900 s validity window per ephemeral identifier
// - Time field: seconds since window start, 16-bit big-endian
// - Domain separation: one prefix byte per operation, prepended

// Wire and crypto core
pub mod types;
pub mod errors;
pub mod domain;
pub mod epoch;
pub mod mac;
pub mod ser;
pub mod codec;
pub mod identifiers;

// Signal processing
pub mod calibration;
pub mod cache;
pub mod clipper;
pub mod risk;

// Radio lifecycle
pub mod capability;
pub mod connection;
pub mod ingest;
pub mod rotation;
pub mod engine;
pub mod config;

// Re-export commonly used types and functions
pub use types::*;
pub use errors::{ConfigError, ProximityError};
pub use epoch::{is_within, time_units, EpochWindow, SystemClock, WallClock};
pub use codec::{build_hello, build_request_mac, build_status_mac, decode_hello, verify_hello_mac, RequestKind};
pub use identifiers::{IdentifierRing, IdentifierSource, SharedIdentifiers};
pub use calibration::{calibrate, CalibrationGains, CalibrationTable};
pub use cache::PayloadIdCache;
pub use clipper::RssiClipper;
pub use risk::{
    softmax, PrecisionMode, ProximityRiskFilter, RiskFilterConfig, RiskFilterOutput, TimestampedRssi,
};
pub use capability::{
    AdapterStateSource, Advertiser, Capabilities, ConnectionHandle, ConnectionRssiReader, ProximityListener,
    RadioErrorKind, ScanFilters, Scanner,
};
pub use engine::{EngineHandle, EngineState, ProximityBroadcastEngine, RadioEvent, RadioEventSender};
pub use config::EngineConfig;

// Version and protocol constants
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const PROTOCOL_VERSION: u32 = 1;
