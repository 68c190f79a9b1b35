#![no_main]

use facebridge_client::wire::{self, Envelope};
use facebridge_transport::PeerAnnouncement;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let _ = PeerAnnouncement::parse(data);

    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    if let Ok(envelope) = Envelope::decode(text) {
        let _ = envelope.clone().expect(wire::AUTH_RESPONSE);
        let _ = envelope.data_as::<wire::AuthenticationResult>();
        let _ = Envelope::decode(&envelope.encode());
    }
});
