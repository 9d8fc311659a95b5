use thiserror::Error;

use crate::types::PeerHandle;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProximityError {
    #[error("instant {instant} outside identifier window [{start}, {end})")]
    OutOfWindow { instant: u64, start: u64, end: u64 },

    #[error("invalid length: expected {expected} got {got}")]
    InvalidLength { expected: usize, got: usize },

    #[error("radio start failure: {component}")]
    RadioStartFailure { component: &'static str },

    #[error("radio stop failure: {component}")]
    RadioStopFailure { component: &'static str },

    #[error("bluetooth adapter unavailable")]
    AdapterUnavailable,

    #[error("adapter did not reach expected state after {iterations} polls")]
    AdapterRestartFailed { iterations: u32 },

    #[error("no ephemeral identifier covers the current instant")]
    IdentifierUnavailable,

    #[error("no MAC key supplied")]
    MissingKey,

    #[error("connection to peer {peer} failed")]
    ConnectionFailure { peer: PeerHandle },

    #[error("engine is not running")]
    NotRunning,

    #[error("engine control loop has shut down")]
    EngineClosed,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl ProximityError {
    /// Codec-level failures that a retry against the adjacent identifier may fix.
    #[must_use]
    pub const fn is_out_of_window(&self) -> bool {
        matches!(self, Self::OutOfWindow { .. })
    }

    /// Radio capability failures, handled by the bounded restart path.
    #[must_use]
    pub const fn is_radio_failure(&self) -> bool {
        matches!(
            self,
            Self::RadioStartFailure { .. } | Self::RadioStopFailure { .. }
        )
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("invalid configuration: {0}")]
    Validation(String),
}

impl From<ConfigError> for ProximityError {
    fn from(err: ConfigError) -> Self {
        Self::InvalidConfig(err.to_string())
    }
}
