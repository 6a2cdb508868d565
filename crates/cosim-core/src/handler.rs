//! Handler subscriptions.
//!
//! Registering a handler yields a [`HandlerId`] that can later be used to
//! remove it. Ids are never reused, so a removed id cannot accidentally refer
//! to a newer handler.

use std::collections::BTreeMap;

use cosim_proto::{
    NetworkEvent, TransmitDirection,
    payloads::{
        can::CanEvent, ethernet::EthernetEvent, flexray::FlexrayEvent, lin::LinEvent,
        rpc::RpcEvent,
    },
};

/// Subscription id returned when a handler is added.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerId(u64);

impl HandlerId {
    /// Raw value.
    pub fn value(self) -> u64 {
        self.0
    }
}

/// Handlers stored in registration order.
#[derive(Debug)]
pub struct HandlerRegistry<H> {
    next_id: u64,
    handlers: BTreeMap<HandlerId, H>,
}

impl<H> Default for HandlerRegistry<H> {
    fn default() -> Self {
        Self { next_id: 0, handlers: BTreeMap::new() }
    }
}

impl<H> HandlerRegistry<H> {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve an id without storing a handler yet.
    ///
    /// Used when a handler is registered from inside a running callback and
    /// inserted once the callback returns.
    pub fn reserve(&mut self) -> HandlerId {
        let id = HandlerId(self.next_id);
        self.next_id += 1;
        id
    }

    /// Store `handler` under a previously reserved id.
    pub fn insert(&mut self, id: HandlerId, handler: H) {
        self.handlers.insert(id, handler);
    }

    /// Add a handler and return its id.
    pub fn add(&mut self, handler: H) -> HandlerId {
        let id = self.reserve();
        self.insert(id, handler);
        id
    }

    /// Remove a handler. Returns `false` if the id is unknown.
    pub fn remove(&mut self, id: HandlerId) -> bool {
        self.handlers.remove(&id).is_some()
    }

    /// Number of registered handlers.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether no handler is registered.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Handlers in registration order.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (HandlerId, &mut H)> {
        self.handlers.iter_mut().map(|(id, h)| (*id, h))
    }

    /// Ids in registration order.
    pub fn ids(&self) -> Vec<HandlerId> {
        self.handlers.keys().copied().collect()
    }

    /// Mutable access to one handler.
    pub fn get_mut(&mut self, id: HandlerId) -> Option<&mut H> {
        self.handlers.get_mut(&id)
    }

    /// Take a handler out so it can be called while the registry is borrowed
    /// elsewhere. Put it back with [`Self::insert`].
    pub fn take(&mut self, id: HandlerId) -> Option<H> {
        self.handlers.remove(&id)
    }
}

/// Which event a controller handler subscribes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// CAN frame
    CanFrame,
    /// CAN transmit acknowledge
    CanFrameTransmit,
    /// CAN controller state change
    CanStateChange,
    /// CAN error state change
    CanErrorStateChange,
    /// Ethernet frame
    EthernetFrame,
    /// Ethernet transmit acknowledge
    EthernetFrameTransmit,
    /// Ethernet link state change
    EthernetStateChange,
    /// Ethernet bit rate change
    EthernetBitrateChange,
    /// LIN frame transmission
    LinFrameStatus,
    /// LIN header (dynamic mode)
    LinFrameHeader,
    /// LIN go-to-sleep command
    LinGoToSleep,
    /// LIN wakeup pulse
    LinWakeup,
    /// FlexRay frame
    FlexrayFrame,
    /// FlexRay frame transmitted
    FlexrayFrameTransmit,
    /// FlexRay wakeup symbol
    FlexrayWakeup,
    /// FlexRay POC status
    FlexrayPocStatus,
    /// FlexRay symbol
    FlexraySymbol,
    /// FlexRay symbol transmitted
    FlexraySymbolTransmit,
    /// FlexRay cycle start
    FlexrayCycleStart,
    /// Published data
    Data,
    /// RPC call arriving at a server
    RpcCall,
    /// RPC result arriving at a client
    RpcCallResult,
}

impl EventKind {
    /// Kind of `event`.
    pub fn of(event: &NetworkEvent) -> Self {
        match event {
            NetworkEvent::Can(CanEvent::Frame(_)) => Self::CanFrame,
            NetworkEvent::Can(CanEvent::FrameTransmit(_)) => Self::CanFrameTransmit,
            NetworkEvent::Can(CanEvent::StateChange(_)) => Self::CanStateChange,
            NetworkEvent::Can(CanEvent::ErrorStateChange(_)) => Self::CanErrorStateChange,
            NetworkEvent::Ethernet(EthernetEvent::Frame(_)) => Self::EthernetFrame,
            NetworkEvent::Ethernet(EthernetEvent::FrameTransmit(_)) => Self::EthernetFrameTransmit,
            NetworkEvent::Ethernet(EthernetEvent::StateChange(_)) => Self::EthernetStateChange,
            NetworkEvent::Ethernet(EthernetEvent::BitrateChange(_)) => Self::EthernetBitrateChange,
            NetworkEvent::Lin(LinEvent::FrameStatus(_)) => Self::LinFrameStatus,
            NetworkEvent::Lin(LinEvent::FrameHeader(_)) => Self::LinFrameHeader,
            NetworkEvent::Lin(LinEvent::GoToSleep(_)) => Self::LinGoToSleep,
            NetworkEvent::Lin(LinEvent::Wakeup(_)) => Self::LinWakeup,
            NetworkEvent::FlexRay(FlexrayEvent::Frame(_)) => Self::FlexrayFrame,
            NetworkEvent::FlexRay(FlexrayEvent::FrameTransmit(_)) => Self::FlexrayFrameTransmit,
            NetworkEvent::FlexRay(FlexrayEvent::Wakeup(_)) => Self::FlexrayWakeup,
            NetworkEvent::FlexRay(FlexrayEvent::PocStatus(_)) => Self::FlexrayPocStatus,
            NetworkEvent::FlexRay(FlexrayEvent::Symbol(_)) => Self::FlexraySymbol,
            NetworkEvent::FlexRay(FlexrayEvent::SymbolTransmit(_)) => Self::FlexraySymbolTransmit,
            NetworkEvent::FlexRay(FlexrayEvent::CycleStart(_)) => Self::FlexrayCycleStart,
            NetworkEvent::Data(_) => Self::Data,
            NetworkEvent::Rpc(RpcEvent::Call(_)) => Self::RpcCall,
            NetworkEvent::Rpc(RpcEvent::CallResult(_)) => Self::RpcCallResult,
        }
    }
}

/// Direction of a frame event, for events that carry one.
pub fn direction_of(event: &NetworkEvent) -> Option<TransmitDirection> {
    match event {
        NetworkEvent::Can(CanEvent::Frame(e)) => Some(e.direction),
        NetworkEvent::Ethernet(EthernetEvent::Frame(e)) => Some(e.direction),
        NetworkEvent::Lin(LinEvent::Wakeup(e)) => Some(e.direction),
        _ => None,
    }
}

/// Subscription filter of a controller handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventFilter {
    /// Event the handler wants
    pub kind: EventKind,
    /// Accepted directions for events that carry one
    pub direction: TransmitDirection,
}

impl EventFilter {
    /// Filter for `kind` events received from other controllers.
    pub fn rx(kind: EventKind) -> Self {
        Self { kind, direction: TransmitDirection::Rx }
    }

    /// Filter for `kind` events in any direction.
    pub fn any(kind: EventKind) -> Self {
        Self { kind, direction: TransmitDirection::RxTx }
    }

    /// Whether `event` passes the filter.
    pub fn matches(&self, event: &NetworkEvent) -> bool {
        EventKind::of(event) == self.kind
            && direction_of(event).is_none_or(|d| self.direction.accepts(d))
    }
}
