//! Bus messages and the envelope that carries them.

use bytes::{BufMut, Bytes};
use serde::{Deserialize, Serialize};

use crate::{
    errors::{ProtocolError, Result},
    ids::{ControllerDescriptor, ParticipantId},
    network::{ControllerInfo, SimulatedNetworkInfo},
    orchestration::{
        NextSimTask, ParticipantCommand, ParticipantStatus, SystemCommand, WorkflowConfiguration,
    },
    payloads::{NetworkEvent, NetworkRequest},
    wire::WireHeader,
};

/// Payload exchanged directly between controllers on a trivial network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PeerPayload {
    /// A request other nodes must act on (LIN headers, configs, status)
    Request(NetworkRequest),
    /// An event every other node observes (frames, transmissions)
    Event(NetworkEvent),
}

/// Everything that travels over the bus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BusMessage {
    /// First message on a connection, addressed to the hub
    Hello {
        /// Name of the connecting participant
        participant_name: String,
    },
    /// Hub notice: a participant joined
    ParticipantConnected {
        /// Name of the participant
        participant_name: String,
        /// Its bus id
        participant: ParticipantId,
    },
    /// Hub notice: a participant left (gracefully or not)
    ParticipantDisconnected {
        /// Name of the participant
        participant_name: String,
        /// Its bus id
        participant: ParticipantId,
    },
    /// Lifecycle status of the sender
    ParticipantStatus(ParticipantStatus),
    /// System-wide command
    SystemCommand(SystemCommand),
    /// Command for a single participant
    ParticipantCommand(ParticipantCommand),
    /// Required participants
    WorkflowConfiguration(WorkflowConfiguration),
    /// Time-sync announcement of the sender's next step
    NextSimTask(NextSimTask),
    /// A controller was created
    ControllerAnnounced(ControllerInfo),
    /// A controller was removed
    ControllerRemoved(ControllerDescriptor),
    /// A network is owned by a network simulator
    NetworkSimulated(SimulatedNetworkInfo),
    /// Trivial path: controller to its peers
    Peer {
        /// Network name
        network: String,
        /// Sending controller
        from: ControllerDescriptor,
        /// What is sent
        payload: PeerPayload,
    },
    /// Simulated path: controller to the network simulator
    Request {
        /// Network name
        network: String,
        /// Requesting controller
        from: ControllerDescriptor,
        /// The request
        request: NetworkRequest,
    },
    /// Simulated path: network simulator to addressed controllers
    Event {
        /// Network name
        network: String,
        /// Controllers that must receive the event
        receivers: Vec<ControllerDescriptor>,
        /// The event
        event: NetworkEvent,
    },
}

/// Message kind carried in the wire header.
///
/// Each [`BusMessage`] variant maps to exactly one kind, which lets the hub
/// log and filter without decoding the body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum MessageKind {
    /// [`BusMessage::Hello`]
    Hello = 0x0001,
    /// [`BusMessage::ParticipantConnected`]
    ParticipantConnected = 0x0002,
    /// [`BusMessage::ParticipantDisconnected`]
    ParticipantDisconnected = 0x0003,
    /// [`BusMessage::ParticipantStatus`]
    ParticipantStatus = 0x0010,
    /// [`BusMessage::SystemCommand`]
    SystemCommand = 0x0011,
    /// [`BusMessage::ParticipantCommand`]
    ParticipantCommand = 0x0012,
    /// [`BusMessage::WorkflowConfiguration`]
    WorkflowConfiguration = 0x0013,
    /// [`BusMessage::NextSimTask`]
    NextSimTask = 0x0020,
    /// [`BusMessage::ControllerAnnounced`]
    ControllerAnnounced = 0x0030,
    /// [`BusMessage::ControllerRemoved`]
    ControllerRemoved = 0x0031,
    /// [`BusMessage::NetworkSimulated`]
    NetworkSimulated = 0x0032,
    /// [`BusMessage::Peer`]
    Peer = 0x0040,
    /// [`BusMessage::Request`]
    Request = 0x0041,
    /// [`BusMessage::Event`]
    Event = 0x0042,
}

impl MessageKind {
    /// Numeric wire value.
    #[must_use]
    pub fn to_u16(self) -> u16 {
        self as u16
    }

    /// Parse a wire value.
    #[must_use]
    pub fn from_u16(value: u16) -> Option<Self> {
        let kind = match value {
            0x0001 => Self::Hello,
            0x0002 => Self::ParticipantConnected,
            0x0003 => Self::ParticipantDisconnected,
            0x0010 => Self::ParticipantStatus,
            0x0011 => Self::SystemCommand,
            0x0012 => Self::ParticipantCommand,
            0x0013 => Self::WorkflowConfiguration,
            0x0020 => Self::NextSimTask,
            0x0030 => Self::ControllerAnnounced,
            0x0031 => Self::ControllerRemoved,
            0x0032 => Self::NetworkSimulated,
            0x0040 => Self::Peer,
            0x0041 => Self::Request,
            0x0042 => Self::Event,
            _ => return None,
        };
        Some(kind)
    }
}

impl BusMessage {
    /// Wire kind of this message.
    #[must_use]
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Hello { .. } => MessageKind::Hello,
            Self::ParticipantConnected { .. } => MessageKind::ParticipantConnected,
            Self::ParticipantDisconnected { .. } => MessageKind::ParticipantDisconnected,
            Self::ParticipantStatus(_) => MessageKind::ParticipantStatus,
            Self::SystemCommand(_) => MessageKind::SystemCommand,
            Self::ParticipantCommand(_) => MessageKind::ParticipantCommand,
            Self::WorkflowConfiguration(_) => MessageKind::WorkflowConfiguration,
            Self::NextSimTask(_) => MessageKind::NextSimTask,
            Self::ControllerAnnounced(_) => MessageKind::ControllerAnnounced,
            Self::ControllerRemoved(_) => MessageKind::ControllerRemoved,
            Self::NetworkSimulated(_) => MessageKind::NetworkSimulated,
            Self::Peer { .. } => MessageKind::Peer,
            Self::Request { .. } => MessageKind::Request,
            Self::Event { .. } => MessageKind::Event,
        }
    }
}

/// Who an envelope is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Destination {
    /// Every participant except the sender
    All,
    /// The hub itself
    Hub,
    /// One participant
    Participant(ParticipantId),
}

impl Destination {
    const ALL_WIRE: u64 = u64::MAX;

    /// Encode into the header's destination field.
    #[must_use]
    pub fn to_wire(self) -> u64 {
        match self {
            Self::All => Self::ALL_WIRE,
            Self::Hub => ParticipantId::HUB.0,
            Self::Participant(id) => id.0,
        }
    }

    /// Decode from the header's destination field.
    #[must_use]
    pub fn from_wire(value: u64) -> Self {
        match value {
            Self::ALL_WIRE => Self::All,
            0 => Self::Hub,
            id => Self::Participant(ParticipantId(id)),
        }
    }
}

/// A message with its routing information.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Sending participant (`ParticipantId::HUB` for hub notices)
    pub sender: ParticipantId,
    /// Recipient(s)
    pub destination: Destination,
    /// The message
    pub message: BusMessage,
}

impl Envelope {
    /// Envelope for every participant except the sender.
    #[must_use]
    pub fn broadcast(sender: ParticipantId, message: BusMessage) -> Self {
        Self { sender, destination: Destination::All, message }
    }

    /// Envelope for one participant.
    #[must_use]
    pub fn to(sender: ParticipantId, recipient: ParticipantId, message: BusMessage) -> Self {
        Self { sender, destination: Destination::Participant(recipient), message }
    }

    /// Whether `participant` should receive this envelope.
    #[must_use]
    pub fn is_for(&self, participant: ParticipantId) -> bool {
        match self.destination {
            Destination::All => self.sender != participant,
            Destination::Hub => false,
            Destination::Participant(id) => id == participant,
        }
    }

    /// Encode header and CBOR body into `dst`.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::CborEncode` if the body cannot be serialized
    /// - `ProtocolError::PayloadTooLarge` if the body exceeds
    ///   [`WireHeader::MAX_PAYLOAD_SIZE`]
    pub fn encode(&self, dst: &mut impl BufMut) -> Result<()> {
        let mut body = Vec::new();
        ciborium::ser::into_writer(&self.message, &mut body)
            .map_err(|e| ProtocolError::CborEncode(e.to_string()))?;

        let too_large = || ProtocolError::PayloadTooLarge {
            size: body.len(),
            max: WireHeader::MAX_PAYLOAD_SIZE as usize,
        };
        let payload_size = u32::try_from(body.len()).map_err(|_| too_large())?;
        if payload_size > WireHeader::MAX_PAYLOAD_SIZE {
            return Err(too_large());
        }

        let header =
            WireHeader::new(self.message.kind(), payload_size, self.sender, self.destination);
        dst.put_slice(&header.to_bytes());
        dst.put_slice(&body);
        Ok(())
    }

    /// Encode into a fresh buffer.
    ///
    /// # Errors
    ///
    /// Same as [`Envelope::encode`].
    pub fn to_bytes(&self) -> Result<Bytes> {
        let mut buf = Vec::new();
        self.encode(&mut buf)?;
        Ok(Bytes::from(buf))
    }

    /// Decode one envelope from the start of `bytes`.
    ///
    /// Trailing bytes after the declared payload are ignored.
    ///
    /// # Errors
    ///
    /// - Header errors from [`WireHeader::from_bytes`]
    /// - `ProtocolError::FrameTruncated` if the body is incomplete
    /// - `ProtocolError::CborDecode` if the body is not a valid message
    /// - `ProtocolError::KindMismatch` if header kind and body disagree
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let header = WireHeader::from_bytes(bytes)?;
        let payload_size = header.payload_size() as usize;
        let kind = header.kind()?;

        let body = bytes
            .get(WireHeader::SIZE..WireHeader::SIZE + payload_size)
            .ok_or(ProtocolError::FrameTruncated {
                expected: payload_size,
                actual: bytes.len().saturating_sub(WireHeader::SIZE),
            })?;

        let message: BusMessage =
            ciborium::de::from_reader(body).map_err(|e| ProtocolError::CborDecode(e.to_string()))?;

        if message.kind() != kind {
            return Err(ProtocolError::KindMismatch {
                header: kind.to_u16(),
                body: message.kind().to_u16(),
            });
        }

        Ok(Self { sender: header.sender(), destination: header.destination(), message })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{
        ids::ControllerHandle,
        orchestration::ParticipantState,
        payloads::can::{CanEvent, CanFrame, CanFrameEvent},
        ids::TransmitDirection,
    };

    fn status_envelope() -> Envelope {
        Envelope::broadcast(
            ParticipantId(42),
            BusMessage::ParticipantStatus(ParticipantStatus {
                participant_name: "CanWriter".to_string(),
                state: ParticipantState::Running,
                enter_reason: "run".to_string(),
                enter_time: Duration::from_secs(1),
                refresh_time: Duration::from_secs(1),
            }),
        )
    }

    #[test]
    fn status_envelope_survives_the_wire() {
        let envelope = status_envelope();
        let bytes = envelope.to_bytes().unwrap();
        assert_eq!(Envelope::decode(&bytes).unwrap(), envelope);
    }

    #[test]
    fn peer_frame_survives_the_wire() {
        let from = ControllerDescriptor::new(ParticipantId(7), ControllerHandle::new(0, 1));
        let envelope = Envelope::broadcast(
            ParticipantId(7),
            BusMessage::Peer {
                network: "CAN1".to_string(),
                from,
                payload: PeerPayload::Event(NetworkEvent::Can(CanEvent::Frame(CanFrameEvent {
                    timestamp: Duration::from_millis(3),
                    frame: CanFrame::new(17, b"CAN 0".to_vec()),
                    direction: TransmitDirection::Rx,
                    user_context: None,
                }))),
            },
        );
        let bytes = envelope.to_bytes().unwrap();
        assert_eq!(Envelope::decode(&bytes).unwrap(), envelope);
    }

    #[test]
    fn truncated_body_is_rejected() {
        let bytes = status_envelope().to_bytes().unwrap();
        let result = Envelope::decode(&bytes[..bytes.len() - 1]);
        assert!(matches!(result, Err(ProtocolError::FrameTruncated { .. })));
    }

    #[test]
    fn kind_mismatch_is_rejected() {
        let mut bytes = status_envelope().to_bytes().unwrap().to_vec();
        let kind = MessageKind::SystemCommand.to_u16().to_be_bytes();
        bytes[6..8].copy_from_slice(&kind);
        let result = Envelope::decode(&bytes);
        assert!(matches!(result, Err(ProtocolError::KindMismatch { .. })));
    }

    #[test]
    fn broadcast_skips_sender() {
        let envelope = status_envelope();
        assert!(!envelope.is_for(ParticipantId(42)));
        assert!(envelope.is_for(ParticipantId(43)));
    }

    #[test]
    fn destination_wire_values() {
        assert_eq!(Destination::from_wire(Destination::All.to_wire()), Destination::All);
        assert_eq!(Destination::from_wire(Destination::Hub.to_wire()), Destination::Hub);
        let one = Destination::Participant(ParticipantId(9));
        assert_eq!(Destination::from_wire(one.to_wire()), one);
    }
}
