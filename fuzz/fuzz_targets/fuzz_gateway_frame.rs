#![no_main]

use guild_gateway_client::protocol::{GatewayEvent, Inbound};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    // Classification must never panic, and neither may payload decoding of
    // whatever it classifies as a dispatch.
    if let Ok(Inbound::Dispatch { tag, data, .. }) = Inbound::parse(text) {
        let _ = GatewayEvent::decode(&tag, data);
    }
});
