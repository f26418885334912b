//! Fuzz target for Payload::from_frame
//!
//! Feeds arbitrary CBOR under every opcode to find:
//! - Type confusion between payload shapes
//! - Oversized collections in snapshots
//! - Panics in the CBOR decoder
//!
//! All invalid inputs must return an error.

#![no_main]

use bytes::Bytes;
use handoff_proto::{Frame, FrameHeader, Opcode, ParticipantId, Payload};
use libfuzzer_sys::fuzz_target;

const OPCODES: [Opcode; 8] = [
    Opcode::RequestEquip,
    Opcode::RequestUnequip,
    Opcode::ConfirmRelease,
    Opcode::RequestResync,
    Opcode::AnnounceEquip,
    Opcode::AnnounceUnequip,
    Opcode::AnnounceRejected,
    Opcode::AnnounceSnapshot,
];

fuzz_target!(|data: &[u8]| {
    for opcode in OPCODES {
        let header = FrameHeader::new(opcode, ParticipantId(1));
        let frame = Frame::new(header, Bytes::copy_from_slice(data));

        if let Ok(payload) = Payload::from_frame(&frame) {
            assert_eq!(payload.opcode(), opcode);
        }
    }
});
