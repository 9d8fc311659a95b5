#![no_main]

use libfuzzer_sys::fuzz_target;
use proximity_engine::ser::{decode_hello, encode_hello};

fuzz_target!(|data: &[u8]| {
    // Any 16-byte input must re-encode to itself
    if let Ok(hello) = decode_hello(data) {
        let encoded = encode_hello(hello.ecc, &hello.ebid, hello.time, &hello.mac);
        assert_eq!(&encoded.0[..], data);
    }
});
