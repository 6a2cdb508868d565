//! Networks and controller announcements.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ids::ControllerDescriptor;

/// Protocol spoken on a network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NetworkKind {
    /// Controller Area Network
    Can,
    /// Local Interconnect Network
    Lin,
    /// FlexRay
    FlexRay,
    /// Ethernet
    Ethernet,
    /// Generic publish/subscribe
    PubSub,
    /// Remote procedure calls
    Rpc,
}

impl NetworkKind {
    /// Whether a network simulator may own networks of this kind.
    #[must_use]
    pub fn is_simulatable(self) -> bool {
        matches!(self, Self::Can | Self::Lin | Self::FlexRay | Self::Ethernet)
    }
}

impl fmt::Display for NetworkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Can => "CAN",
            Self::Lin => "LIN",
            Self::FlexRay => "FlexRay",
            Self::Ethernet => "Ethernet",
            Self::PubSub => "PubSub",
            Self::Rpc => "RPC",
        };
        f.write_str(name)
    }
}

/// How requests on a network are turned into events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum NetworkMode {
    /// Idealized local broadcast, no simulator
    #[default]
    Trivial,
    /// Routed through the network simulator
    Simulated,
}

/// Announcement of a controller joining a network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerInfo {
    /// Globally unique descriptor
    pub descriptor: ControllerDescriptor,
    /// Name of the owning participant
    pub participant_name: String,
    /// Controller name (unique within its participant)
    pub controller_name: String,
    /// Network the controller is attached to
    pub network: String,
    /// Protocol kind of the controller
    pub kind: NetworkKind,
}

/// Announcement that a network is owned by a network simulator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulatedNetworkInfo {
    /// Network name
    pub network: String,
    /// Protocol kind of the network
    pub kind: NetworkKind,
    /// Name of the participant running the simulator
    pub simulator: String,
}
