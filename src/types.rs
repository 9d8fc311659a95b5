use core::convert::TryFrom;
use std::fmt;
use std::time::SystemTime;

use rand_core::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};

use crate::epoch::EpochWindow;
use crate::errors::ProximityError;
use crate::risk::TimestampedRssi;

pub const ECC_LEN: usize = 1;
pub const EBID_LEN: usize = 8;
pub const TIME_LEN: usize = 2;
pub const HELLO_MAC_LEN: usize = 5;
pub const HELLO_LEN: usize = ECC_LEN + EBID_LEN + TIME_LEN + HELLO_MAC_LEN; // 16 bytes
pub const MAC_KEY_LEN: usize = 32;
pub const FULL_MAC_LEN: usize = 32; // HMAC-SHA256

// Byte offsets inside the Hello payload
pub const ECC_OFFSET: usize = 0;
pub const EBID_OFFSET: usize = ECC_OFFSET + ECC_LEN;
pub const TIME_OFFSET: usize = EBID_OFFSET + EBID_LEN;
pub const MAC_OFFSET: usize = TIME_OFFSET + TIME_LEN;

// Fixed-size newtypes prevent misuse
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct Ebid(pub [u8; EBID_LEN]);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct HelloMac(pub [u8; HELLO_MAC_LEN]);

/// The 16-byte broadcast value: `ecc(1) | ebid(8) | time(2, BE) | mac(5)`.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct HelloPayload(pub [u8; HELLO_LEN]);

/// Symmetric key shared with the backend. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct MacKey([u8; MAC_KEY_LEN]);

// Exact-sized decode helpers
macro_rules! impl_tryfrom_slice {
    ($t:ty, $len:expr) => {
        impl TryFrom<&[u8]> for $t {
            type Error = ProximityError;
            fn try_from(b: &[u8]) -> Result<Self, Self::Error> {
                if b.len() != $len {
                    return Err(ProximityError::InvalidLength { expected: $len, got: b.len() });
                }
                let mut arr = [0u8; $len];
                arr.copy_from_slice(b);
                Ok(Self(arr))
            }
        }
    };
}
impl_tryfrom_slice!(Ebid, EBID_LEN);
impl_tryfrom_slice!(HelloMac, HELLO_MAC_LEN);
impl_tryfrom_slice!(HelloPayload, HELLO_LEN);
impl_tryfrom_slice!(MacKey, MAC_KEY_LEN);

impl HelloPayload {
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; HELLO_LEN] {
        &self.0
    }
}

impl fmt::Debug for HelloPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HelloPayload(")?;
        for b in &self.0 {
            write!(f, "{b:02x}")?;
        }
        write!(f, ")")
    }
}

impl MacKey {
    #[must_use]
    pub const fn from_bytes(bytes: [u8; MAC_KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Fresh random key, for local testing and benchmarking.
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        let mut bytes = [0u8; MAC_KEY_LEN];
        rng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; MAC_KEY_LEN] {
        &self.0
    }
}

impl fmt::Debug for MacKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("MacKey(<redacted>)")
    }
}

/// Fields recovered from a Hello payload by pure slicing (no MAC check).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DecodedHello {
    pub ecc: u8,
    pub ebid: Ebid,
    pub time: u16,
    pub mac: HelloMac,
}

/// One ephemeral identifier and the epoch it is valid for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EphemeralIdentifier {
    pub ecc: u8,
    pub ebid: Ebid,
    pub window: EpochWindow,
}

/// Opaque radio-stack handle for a remote device (usually its address).
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerHandle(pub String);

impl fmt::Display for PeerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerHandle {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// A raw observation handed over by the scanner or connection reader.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScannedSample {
    pub peer: PeerHandle,
    pub raw_rssi: i32,
    pub service_data: Option<Vec<u8>>,
    pub observed_at: SystemTime,
}

/// A decoded, calibrated observation, owned by storage once emitted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProximityRecord {
    pub hello: DecodedHello,
    pub collected_epoch_time_s: u64,
    pub raw_rssi: i32,
    pub calibrated_rssi: i32,
}

impl ProximityRecord {
    /// Risk-filter input: collection time and calibrated RSSI.
    #[must_use]
    pub const fn timestamped_rssi(&self) -> TimestampedRssi {
        TimestampedRssi {
            timestamp_s: self.collected_epoch_time_s,
            rssi: self.calibrated_rssi,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hello_layout_is_sixteen_bytes() {
        assert_eq!(HELLO_LEN, 16);
        assert_eq!(EBID_OFFSET, 1);
        assert_eq!(TIME_OFFSET, 9);
        assert_eq!(MAC_OFFSET, 11);
    }

    #[test]
    fn tryfrom_rejects_wrong_length() {
        let err = HelloPayload::try_from(&[0u8; 15][..]).unwrap_err();
        assert_eq!(err, ProximityError::InvalidLength { expected: 16, got: 15 });
        assert!(Ebid::try_from(&[7u8; 8][..]).is_ok());
    }

    #[test]
    fn key_debug_is_redacted() {
        let key = MacKey::from_bytes([0xAB; MAC_KEY_LEN]);
        assert_eq!(format!("{key:?}"), "MacKey(<redacted>)");
    }
}
