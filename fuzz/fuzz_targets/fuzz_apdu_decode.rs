#![no_main]

use eibd_core::{Apdu, Tpdu};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let _ = Tpdu::decode_lossy(data).to_string();
    let _ = Apdu::decode_lossy(data).to_string();
});
