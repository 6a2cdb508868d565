//! Identifiers used for addressing participants and controllers.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identity of one participant connection on the bus.
///
/// Assigned by the hub when the participant says hello. `ParticipantId::HUB`
/// (zero) is reserved for messages originating from the hub itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ParticipantId(pub u64);

impl ParticipantId {
    /// Reserved id of the message hub.
    pub const HUB: Self = Self(0);

    /// Whether this is the reserved hub id.
    #[must_use]
    pub fn is_hub(self) -> bool {
        self == Self::HUB
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Generation-checked slot in a participant's controller arena.
///
/// A handle whose generation no longer matches the slot is stale: the
/// controller it referred to was removed and the slot may have been reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ControllerHandle {
    index: u32,
    generation: u32,
}

impl ControllerHandle {
    /// Create a handle from raw parts.
    #[must_use]
    pub fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    /// Slot index inside the arena.
    #[must_use]
    pub fn index(self) -> u32 {
        self.index
    }

    /// Generation of the slot when this handle was issued.
    #[must_use]
    pub fn generation(self) -> u32 {
        self.generation
    }
}

impl fmt::Display for ControllerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.index, self.generation)
    }
}

/// Globally unique handle of a controller instance.
///
/// Combines the owning participant's id with the local arena handle, so two
/// participants can mint descriptors without coordinating. Immutable for the
/// lifetime of the controller and used as the routing key for events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ControllerDescriptor {
    participant: ParticipantId,
    handle: ControllerHandle,
}

impl ControllerDescriptor {
    /// Create a descriptor for a controller owned by `participant`.
    #[must_use]
    pub fn new(participant: ParticipantId, handle: ControllerHandle) -> Self {
        Self { participant, handle }
    }

    /// Participant that owns the controller.
    #[must_use]
    pub fn participant(self) -> ParticipantId {
        self.participant
    }

    /// Local arena handle inside the owning participant.
    #[must_use]
    pub fn handle(self) -> ControllerHandle {
        self.handle
    }
}

impl fmt::Display for ControllerDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.participant, self.handle)
    }
}

/// Token returned for a frame send, echoed back in its transmit event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TransmitId(pub u64);

/// Direction of a frame relative to the observing controller.
///
/// Events always carry `Rx` or `Tx`. Handler filters may use `RxTx` to see
/// both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransmitDirection {
    /// Received from another controller
    Rx,
    /// Sent by this controller
    Tx,
    /// Both directions (filters only)
    RxTx,
}

impl TransmitDirection {
    /// Whether a handler filtering on `self` accepts an event in `direction`.
    #[must_use]
    pub fn accepts(self, direction: TransmitDirection) -> bool {
        match self {
            Self::RxTx => true,
            filter => filter == direction,
        }
    }
}
