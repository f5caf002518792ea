#![no_main]

use libfuzzer_sys::fuzz_target;

use palisade_consensus::Ballot;

// Decoding arbitrary bytes must never panic, and a ballot has exactly one
// encoding: whatever decodes re-encodes to the input.
fuzz_target!(|data: &[u8]| {
    if let Ok(ballot) = Ballot::decode(data) {
        assert_eq!(ballot.encode(), data);
    }
});
