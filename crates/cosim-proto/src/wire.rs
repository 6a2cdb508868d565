//! Fixed wire header with zero-copy parsing.
//!
//! The header is raw big-endian binary so the hub can route an envelope by
//! sender and destination without touching the CBOR body.

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::{
    errors::{ProtocolError, Result},
    ids::ParticipantId,
    message::{Destination, MessageKind},
};

/// Fixed 32-byte envelope header (big endian).
///
/// Fields are byte arrays so the packed layout has no alignment
/// requirements; every 32-byte pattern is a valid value.
#[repr(C, packed)]
#[derive(Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct WireHeader {
    // Identification (bytes 0-7)
    magic: [u8; 4], // "CSIM"
    version: u8,
    flags: u8,
    kind: [u8; 2],

    // Size (bytes 8-11)
    payload_size: [u8; 4],

    // Routing (bytes 12-27)
    sender: [u8; 8],
    destination: [u8; 8], // u64::MAX = all, 0 = hub

    reserved: [u8; 4],
}

impl WireHeader {
    /// Size of the serialized header.
    pub const SIZE: usize = 32;

    /// Magic number: "CSIM" in ASCII.
    pub const MAGIC: u32 = 0x4353_494D;

    /// Current wire version.
    pub const VERSION: u8 = 0x01;

    /// Maximum body size (4 MB).
    pub const MAX_PAYLOAD_SIZE: u32 = 4 * 1024 * 1024;

    /// Header for a body of `payload_size` bytes.
    #[must_use]
    pub fn new(
        kind: MessageKind,
        payload_size: u32,
        sender: ParticipantId,
        destination: Destination,
    ) -> Self {
        Self {
            magic: Self::MAGIC.to_be_bytes(),
            version: Self::VERSION,
            flags: 0,
            kind: kind.to_u16().to_be_bytes(),
            payload_size: payload_size.to_be_bytes(),
            sender: sender.0.to_be_bytes(),
            destination: destination.to_wire().to_be_bytes(),
            reserved: [0; 4],
        }
    }

    /// Parse a header from the start of `bytes` without copying.
    ///
    /// Cheap checks run first: length, magic, version, then declared size.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::FrameTooShort` if fewer than [`Self::SIZE`] bytes
    /// - `ProtocolError::InvalidMagic` if the magic does not match
    /// - `ProtocolError::UnsupportedVersion` for another wire version
    /// - `ProtocolError::PayloadTooLarge` if the declared size exceeds
    ///   [`Self::MAX_PAYLOAD_SIZE`]
    pub fn from_bytes(bytes: &[u8]) -> Result<&Self> {
        let header = Self::ref_from_prefix(bytes)
            .map_err(|_| ProtocolError::FrameTooShort { expected: Self::SIZE, actual: bytes.len() })?
            .0;

        if u32::from_be_bytes(header.magic) != Self::MAGIC {
            return Err(ProtocolError::InvalidMagic);
        }

        if header.version != Self::VERSION {
            return Err(ProtocolError::UnsupportedVersion(header.version));
        }

        let payload_size = u32::from_be_bytes(header.payload_size);
        if payload_size > Self::MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::PayloadTooLarge {
                size: payload_size as usize,
                max: Self::MAX_PAYLOAD_SIZE as usize,
            });
        }

        Ok(header)
    }

    /// Serialize to bytes.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut arr = [0u8; Self::SIZE];
        arr.copy_from_slice(IntoBytes::as_bytes(self));
        arr
    }

    /// Raw message kind.
    #[must_use]
    pub fn kind_raw(&self) -> u16 {
        u16::from_be_bytes(self.kind)
    }

    /// Message kind.
    ///
    /// # Errors
    ///
    /// `ProtocolError::UnknownKind` if the value is not a known kind.
    pub fn kind(&self) -> Result<MessageKind> {
        let raw = self.kind_raw();
        MessageKind::from_u16(raw).ok_or(ProtocolError::UnknownKind(raw))
    }

    /// Declared body size.
    #[must_use]
    pub fn payload_size(&self) -> u32 {
        u32::from_be_bytes(self.payload_size)
    }

    /// Sending participant.
    #[must_use]
    pub fn sender(&self) -> ParticipantId {
        ParticipantId(u64::from_be_bytes(self.sender))
    }

    /// Routing destination.
    #[must_use]
    pub fn destination(&self) -> Destination {
        Destination::from_wire(u64::from_be_bytes(self.destination))
    }

    /// Total length of the envelope this header introduces.
    #[must_use]
    pub fn frame_len(&self) -> usize {
        Self::SIZE + self.payload_size() as usize
    }
}

impl std::fmt::Debug for WireHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WireHeader")
            .field("kind", &self.kind_raw())
            .field("payload_size", &self.payload_size())
            .field("sender", &self.sender())
            .field("destination", &self.destination())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_size_is_fixed() {
        assert_eq!(std::mem::size_of::<WireHeader>(), WireHeader::SIZE);
    }

    #[test]
    fn header_fields_round_trip() {
        let header = WireHeader::new(
            MessageKind::NextSimTask,
            128,
            ParticipantId(5),
            Destination::Participant(ParticipantId(6)),
        );
        let bytes = header.to_bytes();
        let parsed = WireHeader::from_bytes(&bytes).unwrap();

        assert_eq!(parsed.kind().unwrap(), MessageKind::NextSimTask);
        assert_eq!(parsed.payload_size(), 128);
        assert_eq!(parsed.sender(), ParticipantId(5));
        assert_eq!(parsed.destination(), Destination::Participant(ParticipantId(6)));
        assert_eq!(parsed.frame_len(), WireHeader::SIZE + 128);
    }

    #[test]
    fn short_buffer_is_rejected() {
        let result = WireHeader::from_bytes(&[0u8; 16]);
        assert!(matches!(result, Err(ProtocolError::FrameTooShort { expected: 32, actual: 16 })));
    }

    #[test]
    fn bad_magic_is_rejected() {
        let mut bytes = WireHeader::new(MessageKind::Hello, 0, ParticipantId(1), Destination::Hub)
            .to_bytes();
        bytes[0] = b'X';
        assert!(matches!(WireHeader::from_bytes(&bytes), Err(ProtocolError::InvalidMagic)));
    }

    #[test]
    fn other_version_is_rejected() {
        let mut bytes = WireHeader::new(MessageKind::Hello, 0, ParticipantId(1), Destination::Hub)
            .to_bytes();
        bytes[4] = 0x7F;
        assert!(matches!(
            WireHeader::from_bytes(&bytes),
            Err(ProtocolError::UnsupportedVersion(0x7F))
        ));
    }

    #[test]
    fn oversized_payload_is_rejected() {
        let bytes = WireHeader::new(
            MessageKind::Hello,
            WireHeader::MAX_PAYLOAD_SIZE + 1,
            ParticipantId(1),
            Destination::Hub,
        )
        .to_bytes();
        assert!(matches!(
            WireHeader::from_bytes(&bytes),
            Err(ProtocolError::PayloadTooLarge { .. })
        ));
    }

    #[test]
    fn unknown_kind_is_reported() {
        let mut bytes = WireHeader::new(MessageKind::Hello, 0, ParticipantId(1), Destination::All)
            .to_bytes();
        bytes[6..8].copy_from_slice(&0xBEEFu16.to_be_bytes());
        let header = WireHeader::from_bytes(&bytes).unwrap();
        assert_eq!(header.kind(), Err(ProtocolError::UnknownKind(0xBEEF)));
    }
}
