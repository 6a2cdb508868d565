//! Routing between controllers, the bus and the network simulator.
//!
//! Decides, per network, whether controller traffic stays local, goes out on
//! the bus, or is handed to the local network simulator. The router holds no
//! controller state; it is consulted with the participant's
//! [`ControllerRegistry`] and returns [`Route`]s for the driver to execute.

use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use cosim_proto::{
    BusMessage, ControllerDescriptor, ControllerHandle, Envelope, NetworkEvent, NetworkMode,
    NetworkRequest, ParticipantId, PeerPayload, SimulatedNetworkInfo,
    payloads::{
        can::CanRequest, ethernet::EthernetRequest, flexray::FlexrayRequest, lin::LinRequest,
    },
};

use super::{ProducedEvent, SimulatedController};
use crate::{
    controller::{ControllerAction, NetworkContext},
    log::LogRecord,
    registry::ControllerRegistry,
};

/// Where a piece of controller traffic goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// Put an envelope on the bus
    Send(Envelope),
    /// Hand a peer message to a local controller
    Peer {
        /// Receiving local controller
        to: ControllerHandle,
        /// Sending controller
        from: ControllerDescriptor,
        /// The message
        payload: PeerPayload,
    },
    /// Hand a request to the local network simulator
    Simulate {
        /// Network name
        network: String,
        /// Requesting controller
        from: ControllerDescriptor,
        /// The request
        request: NetworkRequest,
    },
    /// Run a local controller's handlers for its own event
    Deliver {
        /// The controller
        to: ControllerHandle,
        /// The event
        event: NetworkEvent,
    },
    /// Give a simulator-produced event to a local controller
    Simulated {
        /// Receiving local controller
        to: ControllerHandle,
        /// The event
        event: NetworkEvent,
    },
    /// Log a message
    Log(LogRecord),
}

/// Per-participant view of which networks are simulated.
#[derive(Debug, Clone)]
pub struct ProtocolEventRouter {
    participant: ParticipantId,
    simulated: HashMap<String, SimulatedNetworkInfo>,
    local_simulated: BTreeSet<String>,
}

impl ProtocolEventRouter {
    /// Router of `participant`; every network starts trivial.
    pub fn new(participant: ParticipantId) -> Self {
        Self { participant, simulated: HashMap::new(), local_simulated: BTreeSet::new() }
    }

    /// A network simulator announced ownership of a network. `local` is true
    /// when the simulator runs in this participant.
    pub fn on_network_simulated(&mut self, info: SimulatedNetworkInfo, local: bool) -> Option<LogRecord> {
        if let Some(existing) = self.simulated.get(&info.network)
            && existing.simulator != info.simulator
        {
            return Some(LogRecord::warn(format!(
                "network '{}' is already simulated by '{}', ignoring '{}'",
                info.network, existing.simulator, info.simulator
            )));
        }
        if local {
            self.local_simulated.insert(info.network.clone());
        }
        self.simulated.insert(info.network.clone(), info);
        None
    }

    /// Mode of `network`.
    pub fn mode(&self, network: &str) -> NetworkMode {
        if self.simulated.contains_key(network) {
            NetworkMode::Simulated
        } else {
            NetworkMode::Trivial
        }
    }

    /// Operation context for a controller on `network`.
    pub fn context(&self, network: &str, now: Duration) -> NetworkContext {
        NetworkContext { now, mode: self.mode(network) }
    }

    /// Whether the simulator of `network` runs in this participant.
    pub fn is_simulated_locally(&self, network: &str) -> bool {
        self.local_simulated.contains(network)
    }

    /// Simulated networks known so far.
    pub fn simulated_networks(&self) -> impl Iterator<Item = &SimulatedNetworkInfo> {
        self.simulated.values()
    }

    /// Route one action of the local controller `from`.
    pub fn route_action<T>(
        &self,
        registry: &ControllerRegistry<T>,
        from: ControllerHandle,
        network: &str,
        action: ControllerAction,
    ) -> Vec<Route> {
        let sender = registry.descriptor(from);
        match action {
            ControllerAction::Broadcast(payload) => {
                let mut routes: Vec<Route> = registry
                    .on_network(network)
                    .into_iter()
                    .filter(|&handle| handle != from)
                    .map(|to| Route::Peer { to, from: sender, payload: payload.clone() })
                    .collect();
                routes.push(Route::Send(Envelope::broadcast(
                    self.participant,
                    BusMessage::Peer { network: network.to_string(), from: sender, payload },
                )));
                routes
            },
            ControllerAction::SendTo { to, payload } => {
                if to.participant() == self.participant {
                    vec![Route::Peer { to: to.handle(), from: sender, payload }]
                } else {
                    vec![Route::Send(Envelope::to(
                        self.participant,
                        to.participant(),
                        BusMessage::Peer { network: network.to_string(), from: sender, payload },
                    ))]
                }
            },
            ControllerAction::Request(request) => {
                if self.is_simulated_locally(network) {
                    vec![Route::Simulate { network: network.to_string(), from: sender, request }]
                } else if self.simulated.contains_key(network) {
                    vec![Route::Send(Envelope::broadcast(
                        self.participant,
                        BusMessage::Request { network: network.to_string(), from: sender, request },
                    ))]
                } else {
                    vec![Route::Log(LogRecord::debug(format!(
                        "dropping request of {sender} on trivial network '{network}'"
                    )))]
                }
            },
            ControllerAction::Deliver(event) => vec![Route::Deliver { to: from, event }],
            ControllerAction::Log(record) => vec![Route::Log(record)],
        }
    }

    /// Route a peer message received from the bus.
    pub fn route_peer<T>(
        &self,
        registry: &ControllerRegistry<T>,
        network: &str,
        from: ControllerDescriptor,
        payload: PeerPayload,
    ) -> Vec<Route> {
        registry
            .on_network(network)
            .into_iter()
            .filter(|&handle| registry.descriptor(handle) != from)
            .map(|to| Route::Peer { to, from, payload: payload.clone() })
            .collect()
    }

    /// Route a simulator event to the local controllers among `receivers`.
    pub fn route_event<T>(
        &self,
        registry: &ControllerRegistry<T>,
        network: &str,
        receivers: &[ControllerDescriptor],
        event: &NetworkEvent,
    ) -> Vec<Route> {
        let mut routes = Vec::new();
        for receiver in receivers.iter().filter(|r| r.participant() == self.participant) {
            match registry.get(receiver.handle()) {
                Ok(entry) if entry.network == network => {
                    routes.push(Route::Simulated { to: receiver.handle(), event: event.clone() });
                },
                _ => routes.push(Route::Log(LogRecord::debug(format!(
                    "dropping {} event for unknown controller {receiver} on '{network}'",
                    event.kind()
                )))),
            }
        }
        routes
    }

    /// Route an event produced by the local network simulator: local
    /// receivers directly, remote receivers through the bus.
    pub fn route_produced<T>(
        &self,
        registry: &ControllerRegistry<T>,
        produced: ProducedEvent,
    ) -> Vec<Route> {
        let mut routes =
            self.route_event(registry, &produced.network, &produced.receivers, &produced.event);
        if produced.receivers.iter().any(|r| r.participant() != self.participant) {
            routes.push(Route::Send(Envelope::broadcast(
                self.participant,
                BusMessage::Event {
                    network: produced.network,
                    receivers: produced.receivers,
                    event: produced.event,
                },
            )));
        }
        routes
    }
}

/// Hand `request` to the matching callback of `controller`.
///
/// # Errors
///
/// A log record if the request's protocol differs from the controller's.
pub(super) fn dispatch_request(
    controller: &mut SimulatedController,
    request: &NetworkRequest,
) -> Result<(), LogRecord> {
    match (controller, request) {
        (SimulatedController::Can(c), NetworkRequest::Can(request)) => match request {
            CanRequest::SetControllerMode(mode) => c.on_set_controller_mode(mode),
            CanRequest::SetBaudrate(rate) => c.on_set_baudrate(rate),
            CanRequest::Frame(frame) => c.on_frame_request(frame),
        },
        (SimulatedController::Ethernet(c), NetworkRequest::Ethernet(request)) => match request {
            EthernetRequest::SetControllerMode(mode) => c.on_set_controller_mode(*mode),
            EthernetRequest::Frame(frame) => c.on_frame_request(frame),
        },
        (SimulatedController::Lin(c), NetworkRequest::Lin(request)) => match request {
            LinRequest::Frame(frame) => c.on_frame_request(frame),
            LinRequest::FrameHeader(header) => c.on_frame_header_request(header),
            LinRequest::WakeupPulse(pulse) => c.on_wakeup_pulse(pulse),
            LinRequest::ControllerConfig(config) => c.on_controller_config(config),
            LinRequest::FrameResponseUpdate(responses) => c.on_frame_response_update(responses),
            LinRequest::ControllerStatusUpdate(status) => c.on_controller_status_update(*status),
        },
        (SimulatedController::FlexRay(c), NetworkRequest::FlexRay(request)) => match request {
            FlexrayRequest::HostCommand(command) => c.on_host_command(*command),
            FlexrayRequest::ControllerConfig(config) => c.on_controller_config(config),
            FlexrayRequest::TxBufferConfigUpdate(update) => c.on_tx_buffer_config_update(update),
            FlexrayRequest::TxBufferUpdate(update) => c.on_tx_buffer_update(update),
        },
        (controller, request) => {
            return Err(LogRecord::warn(format!(
                "{} request cannot be handled by a {} simulated controller",
                request.kind(),
                controller.kind()
            )));
        },
    }
    Ok(())
}
