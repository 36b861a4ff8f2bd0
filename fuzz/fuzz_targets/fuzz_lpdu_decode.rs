#![no_main]

use eibd_core::lpdu::{decode_lpdu, encode_lpdu};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let pdu = decode_lpdu(data);
    let _ = pdu.to_string();
    let _ = encode_lpdu(&pdu);
});
