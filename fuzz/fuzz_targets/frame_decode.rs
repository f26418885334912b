//! Fuzz target for Frame::decode
//!
//! Arbitrary byte sequences must never panic the decoder. Anything that does
//! decode must re-encode to the same bytes it was read from.

#![no_main]

use handoff_proto::{Frame, FrameHeader};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(frame) = Frame::decode(data) else {
        return;
    };

    let encoded = frame.to_vec().expect("decoded frame re-encodes");
    let consumed = FrameHeader::SIZE + frame.payload.len();
    assert_eq!(encoded, data[..consumed]);
});
