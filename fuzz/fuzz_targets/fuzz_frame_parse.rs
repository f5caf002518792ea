#![no_main]

use libfuzzer_sys::fuzz_target;

use palisade_network::WireFrame;
use palisade_node::ConsensusMessage;

// Walk the inbound path: overlay frame, then the consensus envelope inside.
fuzz_target!(|data: &[u8]| {
    match WireFrame::decode(data) {
        Ok(WireFrame::Overlay(frame)) => {
            let _ = frame.verify();
            let _ = frame.sender_address();
        }
        Ok(WireFrame::Consensus(payload)) => {
            if let Ok(message) = ConsensusMessage::decode(&payload) {
                let _ = message.kind();
            }
        }
        Err(_) => {}
    }
    let _ = ConsensusMessage::decode(data);
});
