#![no_main]

use eibd_datalink::eibnet::messages::{ConnectRequest, ConnectResponse, TunnelRequest};
use eibd_datalink::EibnetPacket;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(packet) = EibnetPacket::from_bytes(data) else {
        return;
    };
    let _ = ConnectRequest::parse(&packet);
    let _ = ConnectResponse::parse(&packet);
    let _ = TunnelRequest::parse(&packet);
    assert_eq!(packet.to_bytes().ok().as_deref(), Some(data));
});
