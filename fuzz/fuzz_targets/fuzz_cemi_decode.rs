#![no_main]

use eibd_core::CemiFrame;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(frame) = CemiFrame::decode(data) {
        if let Ok(bytes) = frame.to_bytes() {
            assert_eq!(CemiFrame::decode(&bytes).ok(), Some(frame));
        }
    }
});
