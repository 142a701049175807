#![no_main]

use libfuzzer_sys::fuzz_target;
use net_session::protocol::message::decode_payload;
use net_session::protocol::messages::{AuthRequestMessage, SpawnMessage, UnspawnMessage};

fuzz_target!(|data: &[u8]| {
    // Hostile payloads must decode to an error, never panic or over-allocate
    let _ = decode_payload::<SpawnMessage>(data);
    let _ = decode_payload::<UnspawnMessage>(data);
    let _ = decode_payload::<AuthRequestMessage>(data);
});
