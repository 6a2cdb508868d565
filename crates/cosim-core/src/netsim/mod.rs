//! Network simulation.
//!
//! A participant becomes a network simulator by registering a
//! [`SimulatedNetwork`] for a network name. From then on every request a
//! controller issues on that network reaches the simulator instead of the
//! controller's peers. The simulator hands each request to the
//! [`SimulatedController`] it created for the requesting controller, and the
//! simulated controller answers through the network's [`EventProducer`],
//! naming the receivers of every event explicitly.
//!
//! ```text
//! controller ──Request──▶ NetworkSimulator ──dispatch──▶ SimulatedController
//!                                                              │
//!   handlers ◀──Event (receivers)── NetworkSimulator ◀──produce┘
//! ```

pub mod router;
pub mod simulator;

use std::{
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use cosim_proto::{
    ControllerDescriptor, NetworkEvent, NetworkKind,
    payloads::{
        can::{CanConfigureBaudrate, CanFrameRequest, CanSetControllerMode},
        ethernet::{EthernetControllerMode, EthernetFrameRequest},
        flexray::{
            FlexrayControllerConfig, FlexrayHostCommand, FlexrayTxBufferConfigUpdate,
            FlexrayTxBufferUpdate,
        },
        lin::{
            LinControllerConfig, LinControllerStatus, LinFrameResponse, LinSendFrameHeaderRequest,
            LinSendFrameRequest, LinWakeupPulse,
        },
    },
};

pub use self::{
    router::{ProtocolEventRouter, Route},
    simulator::{NetworkSimulator, SimulatorAction},
};

/// An event produced by a simulated controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProducedEvent {
    /// Network the event belongs to
    pub network: String,
    /// Controllers that receive it
    pub receivers: Vec<ControllerDescriptor>,
    /// The event
    pub event: NetworkEvent,
}

#[derive(Debug, Default)]
struct ProducerQueue {
    now: Duration,
    produced: Vec<ProducedEvent>,
}

/// Sink through which simulated controllers emit events.
///
/// Cloning is cheap; every clone feeds the same queue, which the
/// [`NetworkSimulator`] drains after each callback.
#[derive(Debug, Clone)]
pub struct EventProducer {
    network: String,
    kind: NetworkKind,
    queue: Arc<Mutex<ProducerQueue>>,
}

impl EventProducer {
    fn new(network: String, kind: NetworkKind, queue: Arc<Mutex<ProducerQueue>>) -> Self {
        Self { network, kind, queue }
    }

    /// Network this producer emits on.
    pub fn network(&self) -> &str {
        &self.network
    }

    /// Protocol of the network.
    pub fn kind(&self) -> NetworkKind {
        self.kind
    }

    /// Simulation time of the request being handled.
    pub fn now(&self) -> Duration {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner).now
    }

    /// Emit `event` to exactly the controllers in `receivers`.
    pub fn produce(&self, event: impl Into<NetworkEvent>, receivers: &[ControllerDescriptor]) {
        let produced = ProducedEvent {
            network: self.network.clone(),
            receivers: receivers.to_vec(),
            event: event.into(),
        };
        self.queue.lock().unwrap_or_else(PoisonError::into_inner).produced.push(produced);
    }
}

/// A network implementation owned by the network simulator.
pub trait SimulatedNetwork: Send {
    /// Called once when the network is registered.
    fn set_event_producer(&mut self, producer: EventProducer);

    /// Create the simulated counterpart of a controller. Called exactly once
    /// per controller descriptor.
    fn provide_simulated_controller(
        &mut self,
        descriptor: ControllerDescriptor,
    ) -> Option<SimulatedController>;

    /// The controller left; release its state.
    fn simulated_controller_removed(&mut self, descriptor: ControllerDescriptor);
}

/// Simulated counterpart of a CAN controller.
#[allow(unused_variables)]
pub trait SimulatedCanController: Send {
    /// Controller mode change requested.
    fn on_set_controller_mode(&mut self, mode: &CanSetControllerMode) {}

    /// Bit rate configuration requested.
    fn on_set_baudrate(&mut self, baud_rate: &CanConfigureBaudrate) {}

    /// Frame transmission requested.
    fn on_frame_request(&mut self, request: &CanFrameRequest) {}
}

/// Simulated counterpart of an Ethernet controller.
#[allow(unused_variables)]
pub trait SimulatedEthernetController: Send {
    /// Activation or deactivation requested.
    fn on_set_controller_mode(&mut self, mode: EthernetControllerMode) {}

    /// Frame transmission requested.
    fn on_frame_request(&mut self, request: &EthernetFrameRequest) {}
}

/// Simulated counterpart of a LIN controller.
#[allow(unused_variables)]
pub trait SimulatedLinController: Send {
    /// Complete frame requested by a master.
    fn on_frame_request(&mut self, request: &LinSendFrameRequest) {}

    /// Header requested by a master.
    fn on_frame_header_request(&mut self, request: &LinSendFrameHeaderRequest) {}

    /// Wakeup pulse sent.
    fn on_wakeup_pulse(&mut self, pulse: &LinWakeupPulse) {}

    /// Controller initialized.
    fn on_controller_config(&mut self, config: &LinControllerConfig) {}

    /// Response table changed.
    fn on_frame_response_update(&mut self, responses: &[LinFrameResponse]) {}

    /// Controller status changed.
    fn on_controller_status_update(&mut self, status: LinControllerStatus) {}
}

/// Simulated counterpart of a FlexRay controller.
#[allow(unused_variables)]
pub trait SimulatedFlexrayController: Send {
    /// Host command issued.
    fn on_host_command(&mut self, command: FlexrayHostCommand) {}

    /// Controller configured.
    fn on_controller_config(&mut self, config: &FlexrayControllerConfig) {}

    /// Transmit buffer reconfigured.
    fn on_tx_buffer_config_update(&mut self, update: &FlexrayTxBufferConfigUpdate) {}

    /// Transmit buffer payload updated.
    fn on_tx_buffer_update(&mut self, update: &FlexrayTxBufferUpdate) {}
}

/// A simulated controller of any simulatable protocol.
pub enum SimulatedController {
    /// CAN
    Can(Box<dyn SimulatedCanController>),
    /// LIN
    Lin(Box<dyn SimulatedLinController>),
    /// FlexRay
    FlexRay(Box<dyn SimulatedFlexrayController>),
    /// Ethernet
    Ethernet(Box<dyn SimulatedEthernetController>),
}

impl SimulatedController {
    /// Protocol of the controller.
    pub fn kind(&self) -> NetworkKind {
        match self {
            Self::Can(_) => NetworkKind::Can,
            Self::Lin(_) => NetworkKind::Lin,
            Self::FlexRay(_) => NetworkKind::FlexRay,
            Self::Ethernet(_) => NetworkKind::Ethernet,
        }
    }
}

impl std::fmt::Debug for SimulatedController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SimulatedController::{}", self.kind())
    }
}
