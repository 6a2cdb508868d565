//! Protocol controllers.
//!
//! A controller is a participant's attachment to one named network. Each
//! protocol has its own controller type; [`Controller`] tags them so the
//! registry can store them side by side and dispatch by pattern matching.
//!
//! Controllers are Sans-IO. User operations and inbound traffic return
//! [`ControllerAction`]s, and the behaviour depends on the [`NetworkMode`] of
//! the network at the time of the call:
//!
//! - **Trivial**: the controller emulates an idealized bus itself. Frames are
//!   broadcast to the other controllers on the network as peer events and the
//!   sender gets its transmit acknowledgement immediately.
//! - **Simulated**: every operation becomes a [`NetworkRequest`] for the
//!   network simulator, and only events the simulator produces reach the
//!   controller's handlers.

pub mod can;
pub mod ethernet;
pub mod flexray;
pub mod lin;
pub mod pubsub;
pub mod rpc;

use std::time::Duration;

use cosim_proto::{
    ControllerDescriptor, ControllerInfo, NetworkEvent, NetworkKind, NetworkMode, NetworkRequest,
    PeerPayload,
};

pub use self::{
    can::CanController, ethernet::EthernetController, flexray::FlexrayController,
    lin::LinController, pubsub::PubSubController, rpc::RpcController,
};
use crate::log::LogRecord;

/// Simulation context of a controller operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkContext {
    /// Current simulation time, used to stamp events
    pub now: Duration,
    /// Whether the network is trivial or simulated
    pub mode: NetworkMode,
}

impl NetworkContext {
    /// Context for a trivial network.
    pub fn trivial(now: Duration) -> Self {
        Self { now, mode: NetworkMode::Trivial }
    }

    /// Context for a simulated network.
    pub fn simulated(now: Duration) -> Self {
        Self { now, mode: NetworkMode::Simulated }
    }

    /// Whether requests go to a network simulator.
    pub fn is_simulated(self) -> bool {
        self.mode == NetworkMode::Simulated
    }
}

/// Actions returned by controllers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControllerAction {
    /// Send to every other controller on the network (trivial path)
    Broadcast(PeerPayload),
    /// Send to one controller on the network
    SendTo {
        /// Receiving controller
        to: ControllerDescriptor,
        /// Message
        payload: PeerPayload,
    },
    /// Send to the network simulator (simulated path)
    Request(NetworkRequest),
    /// Run this controller's handlers for the event
    Deliver(NetworkEvent),
    /// Log a message
    Log(LogRecord),
}

/// A controller of any protocol.
#[derive(Debug, Clone)]
pub enum Controller {
    /// CAN controller
    Can(CanController),
    /// LIN controller
    Lin(LinController),
    /// FlexRay controller
    FlexRay(FlexrayController),
    /// Ethernet controller
    Ethernet(EthernetController),
    /// Publisher or subscriber
    PubSub(PubSubController),
    /// RPC client or server
    Rpc(RpcController),
}

impl Controller {
    /// Protocol of the controller.
    pub fn kind(&self) -> NetworkKind {
        match self {
            Self::Can(_) => NetworkKind::Can,
            Self::Lin(_) => NetworkKind::Lin,
            Self::FlexRay(_) => NetworkKind::FlexRay,
            Self::Ethernet(_) => NetworkKind::Ethernet,
            Self::PubSub(_) => NetworkKind::PubSub,
            Self::Rpc(_) => NetworkKind::Rpc,
        }
    }

    /// Handle a message from another controller on a trivial network. `me`
    /// is the receiving controller.
    pub fn on_peer(
        &mut self,
        me: ControllerDescriptor,
        from: ControllerDescriptor,
        payload: &PeerPayload,
        ctx: NetworkContext,
    ) -> Vec<ControllerAction> {
        match self {
            Self::Can(c) => c.on_peer(payload),
            Self::Lin(c) => c.on_peer(from, payload, ctx),
            Self::FlexRay(c) => c.on_peer(payload),
            Self::Ethernet(c) => c.on_peer(payload),
            Self::PubSub(c) => c.on_peer(payload),
            Self::Rpc(c) => c.on_peer(me, from, payload),
        }
    }

    /// Handle an event produced by the network simulator.
    pub fn on_simulated_event(&mut self, event: NetworkEvent) -> Vec<ControllerAction> {
        match self {
            Self::Can(c) => c.on_simulated_event(event),
            Self::Lin(c) => c.on_simulated_event(event),
            Self::FlexRay(c) => c.on_simulated_event(event),
            Self::Ethernet(c) => c.on_simulated_event(event),
            Self::PubSub(_) => vec![ControllerAction::Log(LogRecord::warn(
                "publish/subscribe networks cannot be simulated, dropping event",
            ))],
            Self::Rpc(_) => vec![ControllerAction::Log(LogRecord::warn(
                "RPC networks cannot be simulated, dropping event",
            ))],
        }
    }

    /// Another controller joined the network.
    pub fn on_peer_announced(&mut self, info: &ControllerInfo) -> Vec<ControllerAction> {
        match self {
            Self::Lin(c) => c.on_peer_announced(info),
            Self::Rpc(c) => c.on_peer_announced(info),
            _ => Vec::new(),
        }
    }

    /// Another controller left the network.
    pub fn on_peer_removed(&mut self, descriptor: ControllerDescriptor) {
        match self {
            Self::Lin(c) => c.on_peer_removed(descriptor),
            Self::Rpc(c) => c.on_peer_removed(descriptor),
            _ => {},
        }
    }
}

macro_rules! controller_accessors {
    ($($variant:ident => $ty:ty, $as_ref:ident, $as_mut:ident;)*) => {
        impl Controller {
            $(
                #[doc = concat!("The ", stringify!($variant), " controller, if this is one.")]
                pub fn $as_ref(&self) -> Option<&$ty> {
                    match self {
                        Self::$variant(c) => Some(c),
                        _ => None,
                    }
                }

                #[doc = concat!("Mutable ", stringify!($variant), " controller, if this is one.")]
                pub fn $as_mut(&mut self) -> Option<&mut $ty> {
                    match self {
                        Self::$variant(c) => Some(c),
                        _ => None,
                    }
                }
            )*
        }
    };
}

controller_accessors! {
    Can => CanController, as_can, as_can_mut;
    Lin => LinController, as_lin, as_lin_mut;
    FlexRay => FlexrayController, as_flexray, as_flexray_mut;
    Ethernet => EthernetController, as_ethernet, as_ethernet_mut;
    PubSub => PubSubController, as_pubsub, as_pubsub_mut;
    Rpc => RpcController, as_rpc, as_rpc_mut;
}
