//! Data model and wire format for the co-simulation bus.
//!
//! Everything that crosses a participant boundary lives here: participant and
//! controller identifiers, orchestration messages (status, commands, time-sync
//! announcements), the per-protocol request and event catalogue, and the
//! [`Envelope`] that carries a [`BusMessage`] between participants.
//!
//! # Wire Format
//!
//! ```text
//! ┌──────────────────────────────┬──────────────────────────┐
//! │ WireHeader (32 bytes, BE)    │ CBOR-encoded BusMessage  │
//! │ magic|ver|flags|kind|size|   │ (payload_size bytes)     │
//! │ sender|destination|reserved  │                          │
//! └──────────────────────────────┴──────────────────────────┘
//! ```
//!
//! The header is enough for the hub to route an envelope without decoding the
//! body. The body is only decoded by the receiving participant.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod errors;
pub mod ids;
pub mod message;
pub mod network;
pub mod orchestration;
pub mod payloads;
pub mod wire;

pub use errors::{ProtocolError, Result};
pub use ids::{ControllerDescriptor, ControllerHandle, ParticipantId, TransmitDirection, TransmitId};
pub use message::{BusMessage, Destination, Envelope, MessageKind, PeerPayload};
pub use network::{ControllerInfo, NetworkKind, NetworkMode, SimulatedNetworkInfo};
pub use orchestration::{
    NextSimTask, ParticipantCommand, ParticipantCommandKind, ParticipantState, ParticipantStatus,
    SystemCommand, SystemState, WorkflowConfiguration,
};
pub use payloads::{NetworkEvent, NetworkRequest};
pub use wire::WireHeader;
