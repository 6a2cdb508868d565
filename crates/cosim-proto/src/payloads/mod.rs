//! Per-protocol request and event catalogue.
//!
//! Each protocol family has one request enum and one event enum. The
//! [`NetworkRequest`] and [`NetworkEvent`] unions tag them with their protocol
//! so routing code can dispatch by pattern matching.
//!
//! | protocol | requests | events |
//! |----------|----------|--------|
//! | CAN | mode, baud rate, frame | frame, transmit, state, error state |
//! | Ethernet | mode, frame | frame, transmit, state, bit rate |
//! | LIN | frame, header, wakeup, config, response update, status | frame status, header, go-to-sleep, wakeup |
//! | FlexRay | host command, config, buffer config, buffer update | frame, transmit, wakeup, POC status, symbol, symbol transmit, cycle start |
//! | RPC | server announcement, call, response | call, call result |

pub mod can;
pub mod ethernet;
pub mod flexray;
pub mod lin;
pub mod pubsub;
pub mod rpc;

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::network::NetworkKind;

/// A request issued by a controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NetworkRequest {
    /// CAN request
    Can(can::CanRequest),
    /// LIN request
    Lin(lin::LinRequest),
    /// FlexRay request
    FlexRay(flexray::FlexrayRequest),
    /// Ethernet request
    Ethernet(ethernet::EthernetRequest),
    /// RPC message between client and server
    Rpc(rpc::RpcRequest),
}

impl NetworkRequest {
    /// Protocol of the request.
    #[must_use]
    pub fn kind(&self) -> NetworkKind {
        match self {
            Self::Can(_) => NetworkKind::Can,
            Self::Lin(_) => NetworkKind::Lin,
            Self::FlexRay(_) => NetworkKind::FlexRay,
            Self::Ethernet(_) => NetworkKind::Ethernet,
            Self::Rpc(_) => NetworkKind::Rpc,
        }
    }
}

/// An event delivered to controllers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NetworkEvent {
    /// CAN event
    Can(can::CanEvent),
    /// LIN event
    Lin(lin::LinEvent),
    /// FlexRay event
    FlexRay(flexray::FlexrayEvent),
    /// Ethernet event
    Ethernet(ethernet::EthernetEvent),
    /// Published data
    Data(pubsub::DataMessageEvent),
    /// RPC call or result
    Rpc(rpc::RpcEvent),
}

impl NetworkEvent {
    /// Protocol of the event.
    #[must_use]
    pub fn kind(&self) -> NetworkKind {
        match self {
            Self::Can(_) => NetworkKind::Can,
            Self::Lin(_) => NetworkKind::Lin,
            Self::FlexRay(_) => NetworkKind::FlexRay,
            Self::Ethernet(_) => NetworkKind::Ethernet,
            Self::Data(_) => NetworkKind::PubSub,
            Self::Rpc(_) => NetworkKind::Rpc,
        }
    }

    /// Simulation time carried by the event.
    #[must_use]
    pub fn timestamp(&self) -> Duration {
        match self {
            Self::Can(e) => e.timestamp(),
            Self::Lin(lin::LinEvent::FrameStatus(e)) => e.timestamp,
            Self::Lin(lin::LinEvent::FrameHeader(e)) => e.timestamp,
            Self::Lin(lin::LinEvent::GoToSleep(e)) => e.timestamp,
            Self::Lin(lin::LinEvent::Wakeup(e)) => e.timestamp,
            Self::FlexRay(flexray::FlexrayEvent::Frame(e)) => e.timestamp,
            Self::FlexRay(flexray::FlexrayEvent::FrameTransmit(e)) => e.timestamp,
            Self::FlexRay(
                flexray::FlexrayEvent::Wakeup(e)
                | flexray::FlexrayEvent::Symbol(e)
                | flexray::FlexrayEvent::SymbolTransmit(e),
            ) => e.timestamp,
            Self::FlexRay(flexray::FlexrayEvent::PocStatus(e)) => e.timestamp,
            Self::FlexRay(flexray::FlexrayEvent::CycleStart(e)) => e.timestamp,
            Self::Ethernet(ethernet::EthernetEvent::Frame(e)) => e.timestamp,
            Self::Ethernet(ethernet::EthernetEvent::FrameTransmit(e)) => e.timestamp,
            Self::Ethernet(ethernet::EthernetEvent::StateChange(e)) => e.timestamp,
            Self::Ethernet(ethernet::EthernetEvent::BitrateChange(e)) => e.timestamp,
            Self::Data(e) => e.timestamp,
            Self::Rpc(e) => e.timestamp(),
        }
    }
}

impl From<can::CanEvent> for NetworkEvent {
    fn from(event: can::CanEvent) -> Self {
        Self::Can(event)
    }
}

impl From<lin::LinEvent> for NetworkEvent {
    fn from(event: lin::LinEvent) -> Self {
        Self::Lin(event)
    }
}

impl From<flexray::FlexrayEvent> for NetworkEvent {
    fn from(event: flexray::FlexrayEvent) -> Self {
        Self::FlexRay(event)
    }
}

impl From<ethernet::EthernetEvent> for NetworkEvent {
    fn from(event: ethernet::EthernetEvent) -> Self {
        Self::Ethernet(event)
    }
}

impl From<can::CanRequest> for NetworkRequest {
    fn from(request: can::CanRequest) -> Self {
        Self::Can(request)
    }
}

impl From<lin::LinRequest> for NetworkRequest {
    fn from(request: lin::LinRequest) -> Self {
        Self::Lin(request)
    }
}

impl From<flexray::FlexrayRequest> for NetworkRequest {
    fn from(request: flexray::FlexrayRequest) -> Self {
        Self::FlexRay(request)
    }
}

impl From<ethernet::EthernetRequest> for NetworkRequest {
    fn from(request: ethernet::EthernetRequest) -> Self {
        Self::Ethernet(request)
    }
}
