use base64::{engine::general_purpose, Engine as _};
use subtle::ConstantTimeEq;
use tracing::trace;

use crate::{
    domain::Operation,
    epoch::time_units,
    errors::ProximityError,
    mac::{hello_mac, request_mac},
    ser::encode_hello,
    types::{DecodedHello, EphemeralIdentifier, HelloPayload, MacKey},
};

pub use crate::ser::decode_hello;

/// Out-of-band requests authenticated with the full, untruncated MAC.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RequestKind {
    Status,
    Register,
    Unregister,
}

impl RequestKind {
    #[must_use]
    pub const fn operation(self) -> Operation {
        match self {
            Self::Status => Operation::Status,
            Self::Register => Operation::Register,
            Self::Unregister => Operation::Unregister,
        }
    }
}

/// Build the Hello payload for `identifier` at `instant_s`.
/// Steps: time offset into the epoch → truncated MAC → 16-byte layout.
///
/// # Errors
///
/// Returns `ProximityError::OutOfWindow` if `instant_s` is outside the
/// identifier's validity window.
pub fn build_hello(
    identifier: &EphemeralIdentifier,
    key: &MacKey,
    instant_s: u64,
) -> Result<HelloPayload, ProximityError> {
    let time = time_units(&identifier.window, instant_s)?;
    let mac = hello_mac(key, identifier.ecc, &identifier.ebid, time);
    trace!(time, "built hello payload");
    Ok(encode_hello(identifier.ecc, &identifier.ebid, time, &mac))
}

/// Base64 MAC for a status request, computed over `PREFIX_STATUS`.
#[must_use]
pub fn build_status_mac(identifier: &EphemeralIdentifier, key: &MacKey, instant_s: u64) -> String {
    build_request_mac(RequestKind::Status, identifier, key, instant_s)
}

/// Base64 MAC for any out-of-band request kind.
#[must_use]
pub fn build_request_mac(
    kind: RequestKind,
    identifier: &EphemeralIdentifier,
    key: &MacKey,
    instant_s: u64,
) -> String {
    let mac = request_mac(key, kind.operation(), identifier.ecc, &identifier.ebid, instant_s);
    general_purpose::STANDARD.encode(mac)
}

/// Recompute a Hello MAC under `key` and compare in constant time.
/// Only meaningful for a holder of the sender's key.
#[must_use]
pub fn verify_hello_mac(hello: &DecodedHello, key: &MacKey) -> bool {
    let expected = hello_mac(key, hello.ecc, &hello.ebid, hello.time);
    expected.0.ct_eq(&hello.mac.0).into()
}
