//! The network simulator of one participant.
//!
//! Owns the registered [`SimulatedNetwork`]s and one [`SimulatedController`]
//! per remote or local controller on each of them. Requests are dispatched to
//! the requesting controller's simulated counterpart, and whatever that
//! counterpart produced is returned as [`SimulatorAction::Emit`].

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use cosim_proto::{
    ControllerDescriptor, ControllerInfo, NetworkKind, NetworkRequest, ParticipantId,
    SimulatedNetworkInfo,
};

use super::{EventProducer, ProducedEvent, ProducerQueue, SimulatedController, SimulatedNetwork, router};
use crate::{error::NetSimError, log::LogRecord};

/// Actions returned by the network simulator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimulatorAction {
    /// Send an event to the named controllers
    Emit(ProducedEvent),
    /// Log a message
    Log(LogRecord),
}

struct NetworkEntry {
    kind: NetworkKind,
    network: Box<dyn SimulatedNetwork>,
    controllers: BTreeMap<ControllerDescriptor, SimulatedController>,
    /// Descriptors the network was asked for and returned no usable controller.
    declined: BTreeSet<ControllerDescriptor>,
}

/// Simulated networks of one participant.
pub struct NetworkSimulator {
    name: String,
    started: bool,
    networks: BTreeMap<String, NetworkEntry>,
    queue: Arc<Mutex<ProducerQueue>>,
}

impl NetworkSimulator {
    /// Simulator run by participant `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            started: false,
            networks: BTreeMap::new(),
            queue: Arc::new(Mutex::new(ProducerQueue::default())),
        }
    }

    /// Whether [`Self::start`] was called.
    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Whether `network` is simulated here.
    pub fn simulates(&self, network: &str) -> bool {
        self.networks.contains_key(network)
    }

    /// Number of simulated controllers on `network`.
    pub fn controller_count(&self, network: &str) -> usize {
        self.networks.get(network).map_or(0, |entry| entry.controllers.len())
    }

    /// Register `network` as the exclusive implementation of `name`.
    ///
    /// Networks must be registered before [`Self::start`]; a late
    /// registration is logged and ignored.
    ///
    /// # Errors
    ///
    /// - `NetSimError::DuplicateNetwork` if `name` is already simulated here
    /// - `NetSimError::UnsupportedKind` for pub/sub and RPC networks
    pub fn simulate_network(
        &mut self,
        name: impl Into<String>,
        kind: NetworkKind,
        mut network: Box<dyn SimulatedNetwork>,
    ) -> Result<Vec<SimulatorAction>, NetSimError> {
        let name = name.into();
        if self.started {
            return Ok(vec![SimulatorAction::Log(LogRecord::warn(format!(
                "network simulator already started, ignoring registration of '{name}'"
            )))]);
        }
        if !kind.is_simulatable() {
            return Err(NetSimError::UnsupportedKind { network: name, kind });
        }
        if self.networks.contains_key(&name) {
            return Err(NetSimError::DuplicateNetwork { network: name });
        }

        network.set_event_producer(EventProducer::new(name.clone(), kind, Arc::clone(&self.queue)));
        self.networks.insert(
            name,
            NetworkEntry {
                kind,
                network,
                controllers: BTreeMap::new(),
                declined: BTreeSet::new(),
            },
        );
        Ok(Vec::new())
    }

    /// Freeze the set of simulated networks and return their announcements.
    pub fn start(&mut self) -> Vec<SimulatedNetworkInfo> {
        self.started = true;
        self.networks
            .iter()
            .map(|(network, entry)| SimulatedNetworkInfo {
                network: network.clone(),
                kind: entry.kind,
                simulator: self.name.clone(),
            })
            .collect()
    }

    /// A controller was announced somewhere on the bus.
    pub fn on_controller_announced(&mut self, info: &ControllerInfo) -> Vec<SimulatorAction> {
        let Some(entry) = self.networks.get_mut(&info.network) else {
            return Vec::new();
        };
        if entry.kind != info.kind {
            return vec![SimulatorAction::Log(LogRecord::warn(format!(
                "controller '{}' of '{}' is {}, but simulated network '{}' is {}",
                info.controller_name, info.participant_name, info.kind, info.network, entry.kind
            )))];
        }
        provide(entry, &info.network, info.descriptor).into_iter().collect()
    }

    /// Handle a request from `from` on `network`.
    pub fn on_request(
        &mut self,
        network: &str,
        from: ControllerDescriptor,
        request: &NetworkRequest,
        now: Duration,
    ) -> Vec<SimulatorAction> {
        let Some(entry) = self.networks.get_mut(network) else {
            return Vec::new();
        };
        if request.kind() != entry.kind {
            return vec![SimulatorAction::Log(LogRecord::warn(format!(
                "dropping {} request from {from} on {} network '{network}'",
                request.kind(),
                entry.kind
            )))];
        }

        let mut actions: Vec<SimulatorAction> =
            provide(entry, network, from).into_iter().collect();
        self.queue.lock().unwrap_or_else(PoisonError::into_inner).now = now;

        if let Some(controller) = entry.controllers.get_mut(&from)
            && let Err(record) = router::dispatch_request(controller, request)
        {
            actions.push(SimulatorAction::Log(record));
        }
        actions.extend(self.drain());
        actions
    }

    /// A controller was removed from the bus.
    pub fn on_controller_removed(&mut self, descriptor: ControllerDescriptor) {
        for entry in self.networks.values_mut() {
            entry.declined.remove(&descriptor);
            if entry.controllers.remove(&descriptor).is_some() {
                entry.network.simulated_controller_removed(descriptor);
            }
        }
    }

    /// Every controller of a disconnected participant is gone.
    pub fn on_participant_disconnected(&mut self, participant: ParticipantId) {
        for entry in self.networks.values_mut() {
            entry.declined.retain(|d| d.participant() != participant);
            let gone: Vec<_> = entry
                .controllers
                .keys()
                .filter(|d| d.participant() == participant)
                .copied()
                .collect();
            for descriptor in gone {
                entry.controllers.remove(&descriptor);
                entry.network.simulated_controller_removed(descriptor);
            }
        }
    }

    /// Events produced since the last drain, checked against their networks.
    fn drain(&mut self) -> Vec<SimulatorAction> {
        let produced =
            std::mem::take(&mut self.queue.lock().unwrap_or_else(PoisonError::into_inner).produced);

        let mut actions = Vec::with_capacity(produced.len());
        for mut produced in produced {
            let Some(entry) = self.networks.get(&produced.network) else {
                continue;
            };
            if produced.event.kind() != entry.kind {
                actions.push(SimulatorAction::Log(LogRecord::warn(format!(
                    "dropping {} event produced on {} network '{}'",
                    produced.event.kind(),
                    entry.kind,
                    produced.network
                ))));
                continue;
            }

            let before = produced.receivers.len();
            produced.receivers.retain(|r| entry.controllers.contains_key(r));
            if produced.receivers.len() != before {
                actions.push(SimulatorAction::Log(LogRecord::debug(format!(
                    "dropped {} unknown receivers on '{}'",
                    before - produced.receivers.len(),
                    produced.network
                ))));
            }
            if !produced.receivers.is_empty() {
                actions.push(SimulatorAction::Emit(produced));
            }
        }
        actions
    }
}

impl std::fmt::Debug for NetworkSimulator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkSimulator")
            .field("name", &self.name)
            .field("started", &self.started)
            .field("networks", &self.networks.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

/// Ask the network for the simulated controller of `descriptor`, at most once
/// while the descriptor is alive.
fn provide(
    entry: &mut NetworkEntry,
    network: &str,
    descriptor: ControllerDescriptor,
) -> Option<SimulatorAction> {
    if entry.controllers.contains_key(&descriptor) || entry.declined.contains(&descriptor) {
        return None;
    }
    match entry.network.provide_simulated_controller(descriptor) {
        Some(controller) if controller.kind() == entry.kind => {
            entry.controllers.insert(descriptor, controller);
            None
        },
        Some(controller) => {
            entry.declined.insert(descriptor);
            Some(SimulatorAction::Log(LogRecord::error(format!(
                "network '{network}' provided a {} controller for {descriptor}, expected {}",
                controller.kind(),
                entry.kind
            ))))
        },
        None => {
            entry.declined.insert(descriptor);
            Some(SimulatorAction::Log(LogRecord::warn(format!(
                "network '{network}' provided no simulated controller for {descriptor}"
            ))))
        },
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use cosim_proto::{
        ControllerHandle, TransmitDirection, TransmitId,
        payloads::can::{
            CanEvent, CanFrame, CanFrameEvent, CanFrameRequest, CanFrameTransmitEvent, CanRequest,
            CanTransmitStatus,
        },
    };

    use super::*;
    use crate::netsim::SimulatedCanController;

    #[derive(Default)]
    struct Counts {
        provided: AtomicUsize,
        removed: AtomicUsize,
        frames: AtomicUsize,
    }

    struct EchoNetwork {
        counts: Arc<Counts>,
        producer: Option<EventProducer>,
        controllers: Arc<Mutex<Vec<ControllerDescriptor>>>,
    }

    struct EchoController {
        me: ControllerDescriptor,
        counts: Arc<Counts>,
        producer: EventProducer,
        all: Arc<Mutex<Vec<ControllerDescriptor>>>,
    }

    impl SimulatedNetwork for EchoNetwork {
        fn set_event_producer(&mut self, producer: EventProducer) {
            self.producer = Some(producer);
        }

        fn provide_simulated_controller(
            &mut self,
            descriptor: ControllerDescriptor,
        ) -> Option<SimulatedController> {
            self.counts.provided.fetch_add(1, Ordering::SeqCst);
            self.controllers.lock().unwrap().push(descriptor);
            Some(SimulatedController::Can(Box::new(EchoController {
                me: descriptor,
                counts: Arc::clone(&self.counts),
                producer: self.producer.clone()?,
                all: Arc::clone(&self.controllers),
            })))
        }

        fn simulated_controller_removed(&mut self, descriptor: ControllerDescriptor) {
            self.counts.removed.fetch_add(1, Ordering::SeqCst);
            self.controllers.lock().unwrap().retain(|d| *d != descriptor);
        }
    }

    impl SimulatedCanController for EchoController {
        fn on_frame_request(&mut self, request: &CanFrameRequest) {
            self.counts.frames.fetch_add(1, Ordering::SeqCst);
            let now = self.producer.now();
            self.producer.produce(
                CanEvent::FrameTransmit(CanFrameTransmitEvent {
                    timestamp: now,
                    can_id: request.frame.can_id,
                    status: CanTransmitStatus::Transmitted,
                    transmit_id: request.transmit_id,
                    user_context: request.user_context,
                }),
                &[self.me],
            );
            let all = self.all.lock().unwrap().clone();
            self.producer.produce(
                CanEvent::Frame(CanFrameEvent {
                    timestamp: now,
                    frame: request.frame.clone(),
                    direction: TransmitDirection::Rx,
                    user_context: request.user_context,
                }),
                &all,
            );
        }
    }

    fn descriptor(participant: u64) -> ControllerDescriptor {
        ControllerDescriptor::new(ParticipantId(participant), ControllerHandle::new(0, 0))
    }

    fn info(descriptor: ControllerDescriptor, kind: NetworkKind) -> ControllerInfo {
        ControllerInfo {
            descriptor,
            participant_name: format!("P{}", descriptor.participant().0),
            controller_name: "CAN1".to_string(),
            network: "CAN1".to_string(),
            kind,
        }
    }

    fn simulator() -> (NetworkSimulator, Arc<Counts>) {
        let counts = Arc::new(Counts::default());
        let mut sim = NetworkSimulator::new("NetSim");
        let network = EchoNetwork {
            counts: Arc::clone(&counts),
            producer: None,
            controllers: Arc::default(),
        };
        sim.simulate_network("CAN1", NetworkKind::Can, Box::new(network)).unwrap();
        (sim, counts)
    }

    fn frame_request() -> NetworkRequest {
        NetworkRequest::Can(CanRequest::Frame(CanFrameRequest {
            frame: CanFrame::new(17, b"CAN 0".to_vec()),
            transmit_id: TransmitId(0),
            user_context: None,
        }))
    }

    #[test]
    fn controllers_are_provided_once() {
        let (mut sim, counts) = simulator();
        let a = descriptor(1);
        sim.on_controller_announced(&info(a, NetworkKind::Can));
        sim.on_controller_announced(&info(a, NetworkKind::Can));
        for _ in 0..3 {
            sim.on_request("CAN1", a, &frame_request(), Duration::ZERO);
        }
        assert_eq!(counts.provided.load(Ordering::SeqCst), 1);
        assert_eq!(counts.frames.load(Ordering::SeqCst), 3);
        assert_eq!(sim.controller_count("CAN1"), 1);
    }

    #[test]
    fn produced_events_name_their_receivers() {
        let (mut sim, _) = simulator();
        let (a, b) = (descriptor(1), descriptor(2));
        sim.on_controller_announced(&info(a, NetworkKind::Can));
        sim.on_controller_announced(&info(b, NetworkKind::Can));

        let actions = sim.on_request("CAN1", a, &frame_request(), Duration::from_millis(3));
        let emitted: Vec<_> = actions
            .iter()
            .filter_map(|a| match a {
                SimulatorAction::Emit(e) => Some(e),
                SimulatorAction::Log(_) => None,
            })
            .collect();
        assert_eq!(emitted.len(), 2);
        assert_eq!(emitted[0].receivers, vec![a]);
        assert_eq!(emitted[1].receivers, vec![a, b]);
        assert_eq!(emitted[1].event.timestamp(), Duration::from_millis(3));
    }

    #[test]
    fn duplicate_and_unsupported_networks_are_rejected() {
        let (mut sim, counts) = simulator();
        let network =
            EchoNetwork { counts: Arc::clone(&counts), producer: None, controllers: Arc::default() };
        assert!(matches!(
            sim.simulate_network("CAN1", NetworkKind::Can, Box::new(network)),
            Err(NetSimError::DuplicateNetwork { .. })
        ));

        let network = EchoNetwork { counts, producer: None, controllers: Arc::default() };
        assert!(matches!(
            sim.simulate_network("Topic", NetworkKind::PubSub, Box::new(network)),
            Err(NetSimError::UnsupportedKind { .. })
        ));
    }

    #[test]
    fn late_registration_is_ignored() {
        let (mut sim, counts) = simulator();
        let infos = sim.start();
        assert_eq!(infos.len(), 1);
        assert_eq!(infos[0].simulator, "NetSim");

        let network = EchoNetwork { counts, producer: None, controllers: Arc::default() };
        let actions = sim.simulate_network("CAN2", NetworkKind::Can, Box::new(network)).unwrap();
        assert!(matches!(actions.as_slice(), [SimulatorAction::Log(_)]));
        assert!(!sim.simulates("CAN2"));
    }

    #[test]
    fn removed_controllers_are_released() {
        let (mut sim, counts) = simulator();
        sim.on_controller_announced(&info(descriptor(1), NetworkKind::Can));
        sim.on_controller_announced(&info(descriptor(2), NetworkKind::Can));

        sim.on_controller_removed(descriptor(1));
        sim.on_participant_disconnected(ParticipantId(2));
        assert_eq!(counts.removed.load(Ordering::SeqCst), 2);
        assert_eq!(sim.controller_count("CAN1"), 0);
    }

    /// Declines every controller, counting how often it was asked.
    struct DecliningNetwork {
        asked: Arc<AtomicUsize>,
    }

    impl SimulatedNetwork for DecliningNetwork {
        fn set_event_producer(&mut self, _: EventProducer) {}

        fn provide_simulated_controller(
            &mut self,
            _: ControllerDescriptor,
        ) -> Option<SimulatedController> {
            self.asked.fetch_add(1, Ordering::SeqCst);
            None
        }

        fn simulated_controller_removed(&mut self, _: ControllerDescriptor) {}
    }

    #[test]
    fn declined_controllers_are_asked_for_once() {
        let asked = Arc::new(AtomicUsize::new(0));
        let mut sim = NetworkSimulator::new("NetSim");
        let network = DecliningNetwork { asked: Arc::clone(&asked) };
        sim.simulate_network("CAN1", NetworkKind::Can, Box::new(network)).unwrap();

        let a = descriptor(1);
        let first = sim.on_controller_announced(&info(a, NetworkKind::Can));
        assert!(matches!(first.as_slice(), [SimulatorAction::Log(_)]));
        sim.on_controller_announced(&info(a, NetworkKind::Can));
        for _ in 0..3 {
            let actions = sim.on_request("CAN1", a, &frame_request(), Duration::ZERO);
            assert!(actions.is_empty());
        }
        assert_eq!(asked.load(Ordering::SeqCst), 1);
        assert_eq!(sim.controller_count("CAN1"), 0);

        // A removed descriptor may be announced again and is asked for anew.
        sim.on_controller_removed(a);
        sim.on_controller_announced(&info(a, NetworkKind::Can));
        assert_eq!(asked.load(Ordering::SeqCst), 2);

        sim.on_participant_disconnected(ParticipantId(1));
        sim.on_controller_announced(&info(a, NetworkKind::Can));
        assert_eq!(asked.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn mismatched_kind_is_not_provided() {
        let (mut sim, counts) = simulator();
        let actions = sim.on_controller_announced(&info(descriptor(1), NetworkKind::Lin));
        assert!(matches!(actions.as_slice(), [SimulatorAction::Log(_)]));
        assert_eq!(counts.provided.load(Ordering::SeqCst), 0);
    }
}
