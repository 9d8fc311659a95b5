use crate::{
    errors::ProximityError,
    types::{
        DecodedHello, Ebid, HelloMac, HelloPayload, EBID_LEN, EBID_OFFSET, ECC_OFFSET,
        HELLO_LEN, HELLO_MAC_LEN, MAC_OFFSET, TIME_LEN, TIME_OFFSET,
    },
};

#[inline]
#[must_use]
pub const fn be16(x: u16) -> [u8; 2] {
    x.to_be_bytes()
}

/// Hello = ecc(1) || ebid(8) || BE16(time) || mac(5)  (16 bytes)
#[must_use]
pub fn encode_hello(ecc: u8, ebid: &Ebid, time: u16, mac: &HelloMac) -> HelloPayload {
    let mut out = [0u8; HELLO_LEN];
    out[ECC_OFFSET] = ecc;                                              // 1
    out[EBID_OFFSET..EBID_OFFSET + EBID_LEN].copy_from_slice(&ebid.0);  // 8
    out[TIME_OFFSET..TIME_OFFSET + TIME_LEN].copy_from_slice(&be16(time)); // 2
    out[MAC_OFFSET..].copy_from_slice(&mac.0);                          // 5
    HelloPayload(out)
}

/// Decode a Hello payload by slicing. The MAC is returned as-is, never checked.
///
/// # Errors
///
/// Returns `ProximityError::InvalidLength` unless `data` is exactly 16 bytes.
pub fn decode_hello(data: &[u8]) -> Result<DecodedHello, ProximityError> {
    if data.len() != HELLO_LEN {
        return Err(ProximityError::InvalidLength { expected: HELLO_LEN, got: data.len() });
    }

    let ecc = data[ECC_OFFSET];

    let mut ebid = [0u8; EBID_LEN];
    ebid.copy_from_slice(&data[EBID_OFFSET..EBID_OFFSET + EBID_LEN]);

    let time = u16::from_be_bytes([data[TIME_OFFSET], data[TIME_OFFSET + 1]]);

    let mut mac = [0u8; HELLO_MAC_LEN];
    mac.copy_from_slice(&data[MAC_OFFSET..MAC_OFFSET + HELLO_MAC_LEN]);

    Ok(DecodedHello { ecc, ebid: Ebid(ebid), time, mac: HelloMac(mac) })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_slices_fields_in_order() {
        let bytes: Vec<u8> = (1u8..=16).collect();
        let d = decode_hello(&bytes).unwrap();
        assert_eq!(d.ecc, 1);
        assert_eq!(d.ebid.0, [2, 3, 4, 5, 6, 7, 8, 9]);
        assert_eq!(d.time.to_be_bytes(), [10, 11]);
        assert_eq!(d.mac.0, [12, 13, 14, 15, 16]);
    }

    #[test]
    fn decode_rejects_other_lengths() {
        for len in [0usize, 15, 17, 31] {
            let bytes = vec![0u8; len];
            assert_eq!(
                decode_hello(&bytes),
                Err(ProximityError::InvalidLength { expected: 16, got: len })
            );
        }
    }

    #[test]
    fn encode_places_time_big_endian() {
        let p = encode_hello(0xAA, &Ebid([0; 8]), 0x0102, &HelloMac([0; 5]));
        assert_eq!(p.0[9], 0x01);
        assert_eq!(p.0[10], 0x02);
        assert_eq!(decode_hello(&p.0).unwrap().time, 0x0102);
    }
}
