//! Fuzz target for Envelope::decode
//!
//! Arbitrary bytes must never panic the decoder. Anything that decodes must
//! encode again to a frame that decodes to the same envelope.

#![no_main]

use cosim_proto::{Envelope, WireHeader};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let _ = WireHeader::from_bytes(data);

    let Ok(envelope) = Envelope::decode(data) else {
        return;
    };
    let bytes = envelope.to_bytes().expect("decoded envelope must encode");
    let again = Envelope::decode(&bytes).expect("re-encoded envelope must decode");
    assert_eq!(again, envelope);
});
