//! Frame type combining header and payload.
//!
//! A `Frame` is the transport-layer packet: a 16-byte header followed by the
//! raw CBOR payload bytes. It holds bytes, not the [`Payload`](crate::Payload)
//! enum, so a router can forward frames without deserializing them.

use bytes::{BufMut, Bytes};

use crate::{
    FrameHeader,
    errors::{ProtocolError, Result},
};

/// Complete protocol frame.
///
/// Layout on the wire: `[FrameHeader: 16 bytes] + [payload: variable bytes]`.
///
/// # Invariants
///
/// - `payload.len()` matches `header.payload_size()`; enforced by
///   [`Frame::new`] and checked by [`Frame::decode`].
/// - `payload.len()` does not exceed [`FrameHeader::MAX_PAYLOAD_SIZE`];
///   checked by [`Frame::encode`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Frame header.
    pub header: FrameHeader,

    /// Raw payload bytes (already CBOR-encoded).
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame, setting the header's payload size from the payload.
    ///
    /// Payloads larger than `u32::MAX` saturate the size field; such frames
    /// are rejected by [`Frame::encode`] anyway.
    #[must_use]
    pub fn new(mut header: FrameHeader, payload: impl Into<Bytes>) -> Self {
        let payload = payload.into();
        let payload_len = u32::try_from(payload.len()).unwrap_or(u32::MAX);
        header.payload_size = payload_len.to_be_bytes();

        Self { header, payload }
    }

    /// Encode frame into buffer.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::PayloadTooLarge` if payload exceeds `MAX_PAYLOAD_SIZE`
    pub fn encode(&self, dst: &mut impl BufMut) -> Result<()> {
        if self.payload.len() > FrameHeader::MAX_PAYLOAD_SIZE as usize {
            return Err(ProtocolError::PayloadTooLarge {
                size: self.payload.len(),
                max: FrameHeader::MAX_PAYLOAD_SIZE as usize,
            });
        }

        debug_assert_eq!(self.payload.len(), self.header.payload_size() as usize);

        dst.put_slice(&self.header.to_bytes());
        dst.put_slice(&self.payload);

        Ok(())
    }

    /// Encode frame into a fresh byte vector.
    ///
    /// # Errors
    ///
    /// See [`Frame::encode`].
    pub fn to_vec(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(FrameHeader::SIZE + self.payload.len());
        self.encode(&mut buf)?;
        Ok(buf)
    }

    /// Decode frame from wire format.
    ///
    /// Validates the header and the payload length, then copies exactly
    /// `payload_size` bytes. Trailing bytes are ignored. Does NOT deserialize
    /// the payload.
    ///
    /// # Errors
    ///
    /// - Any header error from [`FrameHeader::from_bytes`]
    /// - `ProtocolError::FrameTruncated` if fewer payload bytes than claimed
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let header = *FrameHeader::from_bytes(bytes)?;

        let payload_size = header.payload_size() as usize;
        let total_size = FrameHeader::SIZE + payload_size;

        let Some(payload) = bytes.get(FrameHeader::SIZE..total_size) else {
            return Err(ProtocolError::FrameTruncated {
                expected: payload_size,
                actual: bytes.len().saturating_sub(FrameHeader::SIZE),
            });
        };

        Ok(Self { header, payload: Bytes::copy_from_slice(payload) })
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::{Opcode, ParticipantId};

    proptest! {
        #[test]
        fn decode_never_panics(bytes in prop::collection::vec(any::<u8>(), 0..256)) {
            let _ = Frame::decode(&bytes);
        }

        #[test]
        fn payload_bytes_survive_the_wire(
            sender in any::<u64>(),
            payload in prop::collection::vec(any::<u8>(), 0..512),
        ) {
            let frame = Frame::new(
                FrameHeader::new(Opcode::RequestEquip, ParticipantId(sender)),
                payload,
            );

            let wire = frame.to_vec().expect("should encode");
            let parsed = Frame::decode(&wire).expect("should decode");
            prop_assert_eq!(parsed, frame);
        }
    }

    #[test]
    fn payload_size_follows_payload() {
        let frame = Frame::new(
            FrameHeader::new(Opcode::ConfirmRelease, ParticipantId(3)),
            vec![1, 2, 3, 4],
        );
        assert_eq!(frame.header.payload_size(), 4);
    }

    #[test]
    fn reject_truncated_frame() {
        let frame = Frame::new(
            FrameHeader::new(Opcode::RequestEquip, ParticipantId(3)),
            vec![0u8; 100],
        );
        let wire = frame.to_vec().unwrap();

        let result = Frame::decode(&wire[..FrameHeader::SIZE + 10]);
        assert_eq!(result, Err(ProtocolError::FrameTruncated { expected: 100, actual: 10 }));
    }

    #[test]
    fn trailing_bytes_are_ignored() {
        let frame =
            Frame::new(FrameHeader::new(Opcode::RequestEquip, ParticipantId(3)), vec![9, 9]);
        let mut wire = frame.to_vec().unwrap();
        wire.extend_from_slice(&[1, 2, 3]);

        assert_eq!(Frame::decode(&wire).unwrap(), frame);
    }

    #[test]
    fn reject_oversized_payload_on_encode() {
        let frame = Frame::new(
            FrameHeader::new(Opcode::AnnounceSnapshot, ParticipantId::SERVER),
            vec![0u8; FrameHeader::MAX_PAYLOAD_SIZE as usize + 1],
        );
        assert!(matches!(frame.to_vec(), Err(ProtocolError::PayloadTooLarge { .. })));
    }
}
