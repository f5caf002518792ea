#![no_main]

use libfuzzer_sys::fuzz_target;

use palisade_consensus::{Certificate, Ed25519Scheme};
use palisade_types::ValidatorAddress;

fuzz_target!(|data: &[u8]| {
    let Ok(certificate) = Certificate::decode(data) else {
        return;
    };
    // Verification of a decoded certificate must fail cleanly, never panic.
    let members: Vec<ValidatorAddress> = Vec::new();
    let _ = certificate.verify(&Ed25519Scheme, &members, 1);
    let _ = certificate.ballots().count();
});
