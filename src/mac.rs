use hmac::digest::{Key, KeyInit};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::{
    domain::Operation,
    types::{Ebid, HelloMac, MacKey, FULL_MAC_LEN, HELLO_MAC_LEN},
};

type HmacSha256 = Hmac<Sha256>;

/// HMAC-SHA256( key, prefix || parts[0] || parts[1] || ... )
#[must_use]
pub fn tagged_mac(key: &MacKey, op: Operation, parts: &[&[u8]]) -> [u8; FULL_MAC_LEN] {
    // a 32-byte key zero-padded to the 64-byte block is the same HMAC key
    let mut block = Key::<HmacSha256>::default();
    block[..key.as_bytes().len()].copy_from_slice(key.as_bytes());
    let mut mac = <HmacSha256 as KeyInit>::new(&block);
    mac.update(&[op.prefix()]);
    for p in parts {
        mac.update(p);
    }
    let digest = mac.finalize().into_bytes();
    let mut out = [0u8; FULL_MAC_LEN];
    out.copy_from_slice(&digest);
    out
}

/// MAC = TRUNC40( HMAC-SHA256( key, PREFIX_HELLO || ecc || ebid || BE16(time) ) )
#[must_use]
pub fn hello_mac(key: &MacKey, ecc: u8, ebid: &Ebid, time: u16) -> HelloMac {
    let full = tagged_mac(key, Operation::Hello, &[&[ecc], &ebid.0, &time.to_be_bytes()]);
    let mut out = [0u8; HELLO_MAC_LEN];
    out.copy_from_slice(&full[..HELLO_MAC_LEN]);
    HelloMac(out)
}

/// MAC = HMAC-SHA256( key, prefix || ecc || ebid || BE32(ntp seconds) ), untruncated
#[must_use]
pub fn request_mac(
    key: &MacKey,
    op: Operation,
    ecc: u8,
    ebid: &Ebid,
    ntp_s: u64,
) -> [u8; FULL_MAC_LEN] {
    // NTP era-0 timestamps are 32 bits wide
    #[allow(clippy::cast_possible_truncation)]
    let time32 = ntp_s as u32;
    tagged_mac(key, op, &[&[ecc], &ebid.0, &time32.to_be_bytes()])
}
