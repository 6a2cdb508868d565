//! The participant state machine.
//!
//! A [`Participant`] owns everything one node of the simulation needs: its
//! lifecycle, time synchronization, controllers, the optional network
//! simulator, its view of the system state and the application's handlers.
//! It is Sans-IO: the driver feeds [`ParticipantEvent`]s and executes the
//! returned [`ParticipantAction`]s.
//!
//! # Dispatch Queue
//!
//! Every local consequence of an input (a frame for another local
//! controller, a handler invocation, a lifecycle callback) is put on one FIFO
//! work queue and processed after the input itself, so handlers never run
//! nested inside other handlers. Operations called from within a handler
//! only enqueue work; the queue is drained before [`Participant::handle`] or
//! [`Participant::take_actions`] returns.
//!
//! Simulation steps are granted by the time-sync service but executed on the
//! next [`ParticipantEvent::Tick`], which gives inbound traffic a chance to
//! interleave between steps.

mod controllers;
mod handlers;

use std::{
    collections::{BTreeMap, VecDeque},
    time::Duration,
};

use cosim_core::{
    Controller, ControllerAction, ControllerRegistry, Environment, HandlerFault, LifecycleAction,
    LifecycleHook, LifecycleService, LogRecord, MonitorAction, NetworkSimulator, ParticipantConfig,
    ProtocolEventRouter, Route, SimulatedNetwork, SimulatorAction, SystemStateTracker,
    TimeSyncAction, TimeSyncService,
    controller::{
        CanController, EthernetController, FlexrayController, LinController, PubSubController,
        RpcController,
    },
};
use cosim_proto::{
    BusMessage, ControllerDescriptor, ControllerHandle, ControllerInfo, Envelope, NetworkEvent,
    NetworkKind, NetworkRequest, NextSimTask, ParticipantCommand, ParticipantCommandKind,
    ParticipantId, ParticipantState, ParticipantStatus, PeerPayload, SystemCommand, SystemState,
    WorkflowConfiguration,
};

pub use self::{
    controllers::{CanRef, EthernetRef, FlexrayRef, LinRef, PubSubRef, RpcRef},
    handlers::{
        AbortHandler, EventCallback, HookHandler, StatusHandler, StepHandler, SystemStateHandler,
    },
};
use self::handlers::Handlers;
use crate::{
    error::ParticipantError,
    event::{ParticipantAction, ParticipantEvent},
};

/// One item of the participant's dispatch queue.
#[derive(Debug)]
enum Work {
    Invoke(LifecycleHook),
    SystemState(SystemState),
    StatusChanged(ParticipantStatus),
    ReplayStatuses(cosim_core::HandlerId),
    ReplaySystemState(cosim_core::HandlerId),
    Peer { to: ControllerHandle, from: ControllerDescriptor, payload: PeerPayload },
    Simulate { network: String, from: ControllerDescriptor, request: NetworkRequest },
    Deliver { to: ControllerHandle, event: NetworkEvent },
    Simulated { to: ControllerHandle, event: NetworkEvent },
}

/// One participant of a co-simulation run.
pub struct Participant<E: Environment> {
    env: E,
    started_at: E::Instant,
    id: ParticipantId,
    config: ParticipantConfig,
    lifecycle: Option<LifecycleService>,
    time_sync: Option<TimeSyncService>,
    monitor: SystemStateTracker,
    controllers: ControllerRegistry<Controller>,
    router: ProtocolEventRouter,
    simulator: NetworkSimulator,
    /// Names of the other participants on the bus
    peers: BTreeMap<ParticipantId, String>,
    remote_controllers: BTreeMap<ControllerDescriptor, ControllerInfo>,
    /// Workflow published by this participant, replayed to late joiners
    workflow: Option<WorkflowConfiguration>,
    last_announced: Option<NextSimTask>,
    handlers: Handlers<E>,
    work: VecDeque<Work>,
    outbox: Vec<ParticipantAction>,
    /// Step granted by the time-sync service, run on the next tick
    pending_step: Option<(Duration, Duration)>,
    step_completion_requested: bool,
    last_worker_tick: Option<Duration>,
    dispatching: bool,
    final_state: Option<ParticipantState>,
}

impl<E: Environment> Participant<E> {
    /// Create a participant with the bus id assigned by the hub.
    ///
    /// # Errors
    ///
    /// - `ParticipantError::Configuration` if the configuration is invalid
    pub fn new(env: E, config: ParticipantConfig, id: ParticipantId) -> Result<Self, ParticipantError> {
        config.validate().map_err(ParticipantError::Configuration)?;

        let lifecycle = config
            .lifecycle
            .clone()
            .map(|lifecycle| LifecycleService::new(&config.name, lifecycle, config.is_sync_master));
        let time_sync = config.time_sync.clone().map(TimeSyncService::new);
        let started_at = env.now();

        Ok(Self {
            started_at,
            id,
            lifecycle,
            time_sync,
            monitor: SystemStateTracker::new(),
            controllers: ControllerRegistry::new(id, &config.name),
            router: ProtocolEventRouter::new(id),
            simulator: NetworkSimulator::new(&config.name),
            peers: BTreeMap::new(),
            remote_controllers: BTreeMap::new(),
            workflow: None,
            last_announced: None,
            handlers: Handlers::default(),
            work: VecDeque::new(),
            outbox: Vec::new(),
            pending_step: None,
            step_completion_requested: false,
            last_worker_tick: None,
            dispatching: false,
            final_state: None,
            config,
            env,
        })
    }

    /// Participant name.
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Bus id.
    pub fn id(&self) -> ParticipantId {
        self.id
    }

    /// Environment the participant reads its clock from.
    pub fn env(&self) -> &E {
        &self.env
    }

    /// Configuration.
    pub fn config(&self) -> &ParticipantConfig {
        &self.config
    }

    /// Own lifecycle state; `Invalid` for participants without a lifecycle.
    pub fn state(&self) -> ParticipantState {
        self.lifecycle.as_ref().map_or(ParticipantState::Invalid, LifecycleService::state)
    }

    /// Own last published status.
    pub fn status(&self) -> Option<&ParticipantStatus> {
        self.lifecycle.as_ref().map(LifecycleService::status)
    }

    /// Aggregate system state as observed by this participant.
    pub fn system_state(&self) -> SystemState {
        self.monitor.system_state()
    }

    /// Last observed status of `participant`.
    pub fn participant_status(&self, participant: &str) -> Option<&ParticipantStatus> {
        self.monitor.status(participant)
    }

    /// Terminal state, once reached.
    pub fn final_state(&self) -> Option<ParticipantState> {
        self.final_state
    }

    /// Names of the other participants currently on the bus.
    pub fn peers(&self) -> impl Iterator<Item = &str> {
        self.peers.values().map(String::as_str)
    }

    /// Current time for event timestamps.
    ///
    /// Participants with time synchronization use the simulated time of the
    /// current step; others use the wall-clock time since creation.
    pub fn now(&self) -> Duration {
        self.time_sync.as_ref().map_or_else(|| self.elapsed(), TimeSyncService::now)
    }

    /// Whether a granted simulation step waits for the next tick.
    pub fn has_pending_step(&self) -> bool {
        self.pending_step.is_some() && self.state() == ParticipantState::Running
    }

    /// Whether the simulation step handler is running or awaiting explicit
    /// completion.
    pub fn is_step_in_progress(&self) -> bool {
        self.time_sync.as_ref().is_some_and(TimeSyncService::is_executing)
    }

    /// Controllers simulated by the local network simulator on `network`.
    pub fn simulated_controller_count(&self, network: &str) -> usize {
        self.simulator.controller_count(network)
    }

    fn elapsed(&self) -> Duration {
        self.env.now() - self.started_at
    }

    /// Process an event and return the resulting actions.
    ///
    /// # Errors
    ///
    /// - `ParticipantError::Terminated` once a terminal state was reached
    pub fn handle(
        &mut self,
        event: ParticipantEvent,
    ) -> Result<Vec<ParticipantAction>, ParticipantError> {
        if self.final_state.is_some() {
            return Err(ParticipantError::Terminated { participant: self.config.name.clone() });
        }

        match event {
            ParticipantEvent::EnvelopeReceived(envelope) => self.on_envelope(envelope),
            ParticipantEvent::Tick => self.on_tick(),
            ParticipantEvent::ConnectionLost { reason } => self.on_connection_lost(&reason),
        }
        Ok(self.take_actions())
    }

    /// Drain the dispatch queue and return the accumulated actions.
    ///
    /// Operations invoked outside of [`Self::handle`] only queue their
    /// effects; call this afterwards to execute them.
    pub fn take_actions(&mut self) -> Vec<ParticipantAction> {
        self.pump();
        std::mem::take(&mut self.outbox)
    }

    // Lifecycle operations

    /// Start the network simulator and the lifecycle.
    ///
    /// Announces the simulated networks first, so every participant knows a
    /// network's mode before this participant reports `Idle`.
    ///
    /// # Errors
    ///
    /// - `ParticipantError::Lifecycle` if the lifecycle was already started
    pub fn start(&mut self) -> Result<(), ParticipantError> {
        if !self.simulator.is_started() {
            self.start_network_simulator();
        }
        let now = self.env.wall_clock();
        if let Some(lifecycle) = self.lifecycle.as_mut() {
            let actions = lifecycle.start(now)?;
            self.apply_lifecycle(actions);
        }
        Ok(())
    }

    /// Stop the simulation from within this participant. The system
    /// controller propagates the stop to everybody else.
    ///
    /// # Errors
    ///
    /// - `ParticipantError::NoLifecycle` for observers
    /// - `ParticipantError::Lifecycle` unless running or paused
    pub fn stop(&mut self, reason: &str) -> Result<(), ParticipantError> {
        let now = self.env.wall_clock();
        let actions = self.lifecycle_mut()?.stop(reason, now)?;
        self.apply_lifecycle(actions);
        Ok(())
    }

    /// Pause a running simulation.
    ///
    /// # Errors
    ///
    /// - `ParticipantError::NoLifecycle` for observers
    /// - `ParticipantError::Lifecycle` unless running
    pub fn pause(&mut self, reason: &str) -> Result<(), ParticipantError> {
        let now = self.env.wall_clock();
        let actions = self.lifecycle_mut()?.pause(reason, now)?;
        self.apply_lifecycle(actions);
        Ok(())
    }

    /// Continue a paused simulation.
    ///
    /// # Errors
    ///
    /// - `ParticipantError::NoLifecycle` for observers
    /// - `ParticipantError::Lifecycle` unless paused
    pub fn continue_simulation(&mut self) -> Result<(), ParticipantError> {
        let now = self.env.wall_clock();
        let actions = self.lifecycle_mut()?.continue_simulation(now)?;
        self.apply_lifecycle(actions);
        Ok(())
    }

    /// Finish an asynchronous communication-ready phase.
    ///
    /// # Errors
    ///
    /// - `ParticipantError::NoLifecycle` for observers
    /// - `ParticipantError::Lifecycle` unless the asynchronous handler returned
    pub fn complete_communication_ready(&mut self) -> Result<(), ParticipantError> {
        let now = self.env.wall_clock();
        let actions = self.lifecycle_mut()?.complete_communication_ready(now)?;
        self.apply_lifecycle(actions);
        Ok(())
    }

    /// Move this participant to `Error`.
    ///
    /// # Errors
    ///
    /// - `ParticipantError::NoLifecycle` for observers
    pub fn report_error(&mut self, reason: &str) -> Result<(), ParticipantError> {
        let now = self.env.wall_clock();
        let actions = self.lifecycle_mut()?.report_error(reason, now);
        self.apply_lifecycle(actions);
        Ok(())
    }

    /// Complete the running simulation step (explicit step completion).
    ///
    /// The completion takes effect once the dispatch queue is empty, so
    /// everything the step produced is sent before the next step is
    /// announced.
    ///
    /// # Errors
    ///
    /// - `ParticipantError::TimeSync` without time synchronization or when no
    ///   step is running
    pub fn complete_simulation_step(&mut self) -> Result<(), ParticipantError> {
        let Some(time_sync) = self.time_sync.as_ref() else {
            return Err(cosim_core::TimeSyncError::NotConfigured.into());
        };
        if !time_sync.is_executing() {
            return Err(cosim_core::TimeSyncError::NoStepInProgress.into());
        }
        self.step_completion_requested = true;
        Ok(())
    }

    fn lifecycle_mut(&mut self) -> Result<&mut LifecycleService, ParticipantError> {
        let participant = &self.config.name;
        self.lifecycle
            .as_mut()
            .ok_or_else(|| ParticipantError::NoLifecycle { participant: participant.clone() })
    }

    // Orchestration

    /// Publish the set of required participants.
    pub fn set_workflow(&mut self, workflow: WorkflowConfiguration) {
        self.send(Envelope::broadcast(self.id, BusMessage::WorkflowConfiguration(workflow.clone())));
        let actions = self.monitor.set_required(workflow.required_participants.iter().cloned());
        self.workflow = Some(workflow);
        self.apply_monitor(actions);
    }

    /// Send a system command to everybody, including this participant.
    pub fn send_system_command(&mut self, command: SystemCommand) {
        self.send(Envelope::broadcast(self.id, BusMessage::SystemCommand(command)));
        self.on_system_command(command);
    }

    /// Send a command to one participant, which may be this one.
    pub fn send_participant_command(&mut self, command: ParticipantCommand) {
        if command.participant_name == self.config.name {
            self.on_participant_command(command.kind);
            return;
        }
        self.send(Envelope::broadcast(self.id, BusMessage::ParticipantCommand(command)));
    }

    // Network simulator

    /// Become the network simulator of `network`.
    ///
    /// Must be called before [`Self::start`]; later registrations are logged
    /// and ignored.
    ///
    /// # Errors
    ///
    /// - `ParticipantError::NetSim` for duplicate names and unsupported kinds
    pub fn simulate_network(
        &mut self,
        network: impl Into<String>,
        kind: NetworkKind,
        implementation: Box<dyn SimulatedNetwork>,
    ) -> Result<(), ParticipantError> {
        let actions = self.simulator.simulate_network(network, kind, implementation)?;
        self.apply_simulator(actions);
        Ok(())
    }

    fn start_network_simulator(&mut self) {
        for info in self.simulator.start() {
            if let Some(record) = self.router.on_network_simulated(info.clone(), true) {
                self.log(record);
            }
            self.send(Envelope::broadcast(self.id, BusMessage::NetworkSimulated(info)));
        }

        let mut known = self.controllers.infos();
        known.extend(self.remote_controllers.values().cloned());
        for info in known {
            let actions = self.simulator.on_controller_announced(&info);
            self.apply_simulator(actions);
        }
    }

    // Controllers

    /// Create a CAN controller attached to `network`.
    ///
    /// # Errors
    ///
    /// - `ParticipantError::Registry` for a duplicate name or a network of
    ///   another protocol
    pub fn create_can_controller(
        &mut self,
        name: &str,
        network: &str,
    ) -> Result<ControllerHandle, ParticipantError> {
        self.create_controller(name, network, Controller::Can(CanController::new(name)))
    }

    /// Create a LIN controller attached to `network`.
    ///
    /// # Errors
    ///
    /// Same as [`Self::create_can_controller`].
    pub fn create_lin_controller(
        &mut self,
        name: &str,
        network: &str,
    ) -> Result<ControllerHandle, ParticipantError> {
        self.create_controller(name, network, Controller::Lin(LinController::new(name)))
    }

    /// Create a FlexRay controller attached to `network`.
    ///
    /// # Errors
    ///
    /// Same as [`Self::create_can_controller`].
    pub fn create_flexray_controller(
        &mut self,
        name: &str,
        network: &str,
    ) -> Result<ControllerHandle, ParticipantError> {
        self.create_controller(name, network, Controller::FlexRay(FlexrayController::new(name)))
    }

    /// Create an Ethernet controller attached to `network`.
    ///
    /// # Errors
    ///
    /// Same as [`Self::create_can_controller`].
    pub fn create_ethernet_controller(
        &mut self,
        name: &str,
        network: &str,
    ) -> Result<ControllerHandle, ParticipantError> {
        self.create_controller(name, network, Controller::Ethernet(EthernetController::new(name)))
    }

    /// Create a publisher on `topic`.
    ///
    /// # Errors
    ///
    /// Same as [`Self::create_can_controller`].
    pub fn create_data_publisher(
        &mut self,
        name: &str,
        topic: &str,
    ) -> Result<ControllerHandle, ParticipantError> {
        self.create_controller(name, topic, Controller::PubSub(PubSubController::publisher(topic)))
    }

    /// Create a subscriber on `topic`.
    ///
    /// # Errors
    ///
    /// Same as [`Self::create_can_controller`].
    pub fn create_data_subscriber(
        &mut self,
        name: &str,
        topic: &str,
    ) -> Result<ControllerHandle, ParticipantError> {
        self.create_controller(name, topic, Controller::PubSub(PubSubController::subscriber(topic)))
    }

    /// Create a client of the RPC `function`.
    ///
    /// # Errors
    ///
    /// Same as [`Self::create_can_controller`].
    pub fn create_rpc_client(
        &mut self,
        name: &str,
        function: &str,
    ) -> Result<ControllerHandle, ParticipantError> {
        self.create_controller(name, function, Controller::Rpc(RpcController::client(function)))
    }

    /// Create a server of the RPC `function` and announce it to the function's
    /// clients.
    ///
    /// # Errors
    ///
    /// Same as [`Self::create_can_controller`].
    pub fn create_rpc_server(
        &mut self,
        name: &str,
        function: &str,
    ) -> Result<ControllerHandle, ParticipantError> {
        let server = RpcController::server(function);
        let announce = server.announce();
        let handle = self.create_controller(name, function, Controller::Rpc(server))?;
        self.route_controller_actions(handle, function, announce);
        Ok(handle)
    }

    fn create_controller(
        &mut self,
        name: &str,
        network: &str,
        controller: Controller,
    ) -> Result<ControllerHandle, ParticipantError> {
        let kind = controller.kind();
        let handle = self.controllers.insert(name, network, kind, controller)?;
        let info = self.controllers.info(handle)?;
        self.send(Envelope::broadcast(self.id, BusMessage::ControllerAnnounced(info.clone())));

        let now = self.now();
        for peer in self.controllers.on_network(network) {
            if peer == handle {
                continue;
            }
            let ctx = self.router.context(network, now);
            let actions = match self.controllers.get_mut(peer) {
                Ok(entry) => {
                    let mut actions = entry.value.on_peer_announced(&info);
                    if ctx.is_simulated() {
                        // Simulated networks exchange configuration through the simulator.
                        actions.retain(|a| !matches!(a, ControllerAction::SendTo { .. }));
                    }
                    actions
                },
                Err(_) => continue,
            };
            self.route_controller_actions(peer, network, actions);
        }

        if self.simulator.is_started() {
            let actions = self.simulator.on_controller_announced(&info);
            self.apply_simulator(actions);
        }
        Ok(handle)
    }

    /// Remove a controller. Its handlers are dropped and the bus is told.
    ///
    /// # Errors
    ///
    /// - `ParticipantError::Registry` for a stale handle
    pub fn remove_controller(&mut self, handle: ControllerHandle) -> Result<(), ParticipantError> {
        let descriptor = self.controllers.descriptor(handle);
        let entry = self.controllers.remove(handle)?;
        self.handlers.remove_controller(handle);
        self.send(Envelope::broadcast(self.id, BusMessage::ControllerRemoved(descriptor)));

        for peer in self.controllers.on_network(&entry.network) {
            if let Ok(peer) = self.controllers.get_mut(peer) {
                peer.value.on_peer_removed(descriptor);
            }
        }
        self.simulator.on_controller_removed(descriptor);
        Ok(())
    }

    /// A controller of this participant.
    ///
    /// # Errors
    ///
    /// - `ParticipantError::Registry` for a stale handle
    pub fn controller(&self, handle: ControllerHandle) -> Result<&Controller, ParticipantError> {
        Ok(&self.controllers.get(handle)?.value)
    }

    /// Descriptor of a local controller as seen by the rest of the bus.
    pub fn descriptor(&self, handle: ControllerHandle) -> ControllerDescriptor {
        self.controllers.descriptor(handle)
    }

    /// Descriptors of every known controller on `network`, local and remote.
    pub fn controllers_on(&self, network: &str) -> Vec<ControllerDescriptor> {
        let mut descriptors: Vec<ControllerDescriptor> = self
            .controllers
            .on_network(network)
            .into_iter()
            .map(|handle| self.controllers.descriptor(handle))
            .collect();
        descriptors.extend(
            self.remote_controllers
                .values()
                .filter(|info| info.network == network)
                .map(|info| info.descriptor),
        );
        descriptors
    }

    // Inbound

    fn on_envelope(&mut self, envelope: Envelope) {
        if !envelope.is_for(self.id) {
            self.log(LogRecord::debug(format!(
                "{}: dropping {:?} not addressed to us",
                self.config.name,
                envelope.message.kind()
            )));
            return;
        }

        let sender = envelope.sender;
        match envelope.message {
            BusMessage::Hello { participant_name } => self.log(LogRecord::debug(format!(
                "ignoring hello of '{participant_name}'"
            ))),
            BusMessage::ParticipantConnected { participant_name, participant } => {
                self.on_participant_connected(participant, participant_name);
            },
            BusMessage::ParticipantDisconnected { participant_name, participant } => {
                self.on_participant_disconnected(participant, &participant_name);
            },
            BusMessage::ParticipantStatus(status) => {
                if status.participant_name != self.config.name {
                    let actions = self.monitor.on_status(status);
                    self.apply_monitor(actions);
                }
            },
            BusMessage::SystemCommand(command) => self.on_system_command(command),
            BusMessage::ParticipantCommand(command) => {
                if command.participant_name == self.config.name {
                    self.on_participant_command(command.kind);
                }
            },
            BusMessage::WorkflowConfiguration(workflow) => {
                let actions = self.monitor.set_required(workflow.required_participants);
                self.apply_monitor(actions);
            },
            BusMessage::NextSimTask(task) => self.on_next_sim_task(sender, task),
            BusMessage::ControllerAnnounced(info) => self.on_controller_announced(info),
            BusMessage::ControllerRemoved(descriptor) => self.forget_remote_controller(descriptor),
            BusMessage::NetworkSimulated(info) => {
                if let Some(record) = self.router.on_network_simulated(info, false) {
                    self.log(record);
                }
            },
            BusMessage::Peer { network, from, payload } => {
                let routes = self.router.route_peer(&self.controllers, &network, from, payload);
                self.execute_routes(routes);
            },
            BusMessage::Request { network, from, request } => {
                if self.router.is_simulated_locally(&network) {
                    self.work.push_back(Work::Simulate { network, from, request });
                }
            },
            BusMessage::Event { network, receivers, event } => {
                let routes = self.router.route_event(&self.controllers, &network, &receivers, &event);
                self.execute_routes(routes);
            },
        }
    }

    fn on_participant_connected(&mut self, participant: ParticipantId, name: String) {
        if participant == self.id {
            return;
        }
        self.log(LogRecord::debug(format!("participant '{name}' ({participant}) connected")));
        self.peers.insert(participant, name);
        self.replay_to(participant);
    }

    /// Bring a late joiner up to date with what this participant published.
    fn replay_to(&mut self, participant: ParticipantId) {
        let mut messages = Vec::new();
        if let Some(workflow) = &self.workflow {
            messages.push(BusMessage::WorkflowConfiguration(workflow.clone()));
        }
        messages.extend(
            self.router
                .simulated_networks()
                .filter(|info| self.router.is_simulated_locally(&info.network))
                .cloned()
                .map(BusMessage::NetworkSimulated),
        );
        messages.extend(self.controllers.infos().into_iter().map(BusMessage::ControllerAnnounced));
        if let Some(task) = self.last_announced {
            messages.push(BusMessage::NextSimTask(task));
        }
        if let Some(lifecycle) = &self.lifecycle
            && lifecycle.state() != ParticipantState::Invalid
        {
            messages.push(BusMessage::ParticipantStatus(lifecycle.status().clone()));
        }

        for message in messages {
            self.send(Envelope::to(self.id, participant, message));
        }
    }

    fn on_participant_disconnected(&mut self, participant: ParticipantId, name: &str) {
        self.log(LogRecord::info(format!("participant '{name}' ({participant}) disconnected")));
        self.peers.remove(&participant);

        let actions = self.monitor.on_participant_disconnected(name);
        self.apply_monitor(actions);

        let wall = self.elapsed();
        if let Some(time_sync) = self.time_sync.as_mut() {
            let actions = time_sync.on_peer_disconnected(name, wall);
            self.apply_time_sync(actions);
        }

        let gone: Vec<ControllerDescriptor> = self
            .remote_controllers
            .keys()
            .filter(|descriptor| descriptor.participant() == participant)
            .copied()
            .collect();
        for descriptor in gone {
            self.forget_remote_controller(descriptor);
        }
        self.simulator.on_participant_disconnected(participant);
    }

    fn on_system_command(&mut self, command: SystemCommand) {
        let now = self.env.wall_clock();
        if let Some(lifecycle) = self.lifecycle.as_mut() {
            let actions = lifecycle.on_system_command(command, now);
            self.apply_lifecycle(actions);
        }
    }

    fn on_participant_command(&mut self, kind: ParticipantCommandKind) {
        let now = self.env.wall_clock();
        match self.lifecycle.as_mut() {
            Some(lifecycle) => {
                let actions = lifecycle.on_participant_command(kind, now);
                self.apply_lifecycle(actions);
            },
            None => self.log(LogRecord::warn(format!(
                "{}: {kind:?} ignored, participant has no lifecycle",
                self.config.name
            ))),
        }
    }

    fn on_next_sim_task(&mut self, sender: ParticipantId, task: NextSimTask) {
        let peer = self.peers.get(&sender).cloned().unwrap_or_else(|| sender.to_string());
        let wall = self.elapsed();
        if let Some(time_sync) = self.time_sync.as_mut() {
            let actions = time_sync.on_next_sim_task(&peer, task, wall);
            self.apply_time_sync(actions);
        }
    }

    fn on_controller_announced(&mut self, info: ControllerInfo) {
        if info.descriptor.participant() == self.id {
            return;
        }
        self.remote_controllers.insert(info.descriptor, info.clone());

        let now = self.now();
        let ctx = self.router.context(&info.network, now);
        for local in self.controllers.on_network(&info.network) {
            let Ok(entry) = self.controllers.get_mut(local) else {
                continue;
            };
            let local_kind = entry.kind;
            if local_kind != info.kind {
                self.log(LogRecord::warn(format!(
                    "controller '{}' of '{}' is {}, but network '{}' is {local_kind} here",
                    info.controller_name, info.participant_name, info.kind, info.network
                )));
                return;
            }
            let mut actions = entry.value.on_peer_announced(&info);
            if ctx.is_simulated() {
                actions.retain(|a| !matches!(a, ControllerAction::SendTo { .. }));
            }
            self.route_controller_actions(local, &info.network, actions);
        }

        if self.simulator.is_started() {
            let actions = self.simulator.on_controller_announced(&info);
            self.apply_simulator(actions);
        }
    }

    fn forget_remote_controller(&mut self, descriptor: ControllerDescriptor) {
        let Some(info) = self.remote_controllers.remove(&descriptor) else {
            return;
        };
        for local in self.controllers.on_network(&info.network) {
            if let Ok(entry) = self.controllers.get_mut(local) {
                entry.value.on_peer_removed(descriptor);
            }
        }
        self.simulator.on_controller_removed(descriptor);
    }

    fn on_tick(&mut self) {
        let wall = self.elapsed();
        let running = self.state() == ParticipantState::Running;

        if let Some(time_sync) = self.time_sync.as_mut()
            && !time_sync.is_synchronized()
            && running
            && self.pending_step.is_none()
        {
            let due = match (time_sync.config().worker_pacing, self.last_worker_tick) {
                (Some(pacing), Some(last)) => wall >= last + pacing,
                _ => true,
            };
            if due {
                let actions = time_sync.on_worker_tick(wall);
                if !actions.is_empty() {
                    self.last_worker_tick = Some(wall);
                }
                self.apply_time_sync(actions);
            }
        }

        if let Some(time_sync) = self.time_sync.as_mut() {
            let actions = time_sync.check_watchdog(wall);
            self.apply_time_sync(actions);
        }

        self.run_pending_step();
    }

    fn run_pending_step(&mut self) {
        if self.state() != ParticipantState::Running {
            return;
        }
        let Some((now, duration)) = self.pending_step.take() else {
            return;
        };

        let result = self.call_step_handler(now, duration);
        // Everything the step produced goes out before the next announcement.
        self.pump();
        match result {
            Ok(()) => {
                let wall = self.elapsed();
                if let Some(time_sync) = self.time_sync.as_mut() {
                    let actions = time_sync.step_returned(wall);
                    self.apply_time_sync(actions);
                }
            },
            Err(fault) => self.on_handler_fault(&fault),
        }
    }

    fn on_connection_lost(&mut self, reason: &str) {
        let reason = format!("transport failure: {reason}");
        let now = self.env.wall_clock();
        match self.lifecycle.as_mut() {
            Some(lifecycle) => {
                let actions = lifecycle.abort(&reason, now);
                self.apply_lifecycle(actions);
            },
            None => self.log(LogRecord::error(format!("{}: {reason}", self.config.name))),
        }
    }

    // Action application

    fn apply_lifecycle(&mut self, actions: Vec<LifecycleAction>) {
        let wall = self.elapsed();
        for action in actions {
            match action {
                LifecycleAction::PublishStatus(status) => {
                    self.send(Envelope::broadcast(
                        self.id,
                        BusMessage::ParticipantStatus(status.clone()),
                    ));
                    let actions = self.monitor.on_status(status);
                    self.apply_monitor(actions);
                },
                LifecycleAction::Invoke(hook) => self.work.push_back(Work::Invoke(hook)),
                LifecycleAction::PrepareTimeSync => {
                    self.pending_step = None;
                    self.last_worker_tick = None;
                    if let Some(time_sync) = self.time_sync.as_mut() {
                        let actions = time_sync.prepare();
                        self.apply_time_sync(actions);
                    }
                },
                LifecycleAction::StartTimeSync => {
                    if let Some(time_sync) = self.time_sync.as_mut() {
                        let actions = time_sync.start(wall);
                        self.apply_time_sync(actions);
                    }
                },
                LifecycleAction::PauseTimeSync => {
                    if let Some(time_sync) = self.time_sync.as_mut() {
                        time_sync.pause();
                    }
                },
                LifecycleAction::ContinueTimeSync => {
                    if let Some(time_sync) = self.time_sync.as_mut() {
                        let actions = time_sync.resume(wall);
                        self.apply_time_sync(actions);
                    }
                },
                LifecycleAction::StopTimeSync => {
                    self.pending_step = None;
                    self.step_completion_requested = false;
                    if let Some(time_sync) = self.time_sync.as_mut() {
                        time_sync.stop();
                    }
                },
                LifecycleAction::Completed { final_state } => {
                    self.final_state = Some(final_state);
                    self.outbox.push(ParticipantAction::Completed { final_state });
                },
                LifecycleAction::Log(record) => self.log(record),
            }
        }
    }

    fn apply_time_sync(&mut self, actions: Vec<TimeSyncAction>) {
        for action in actions {
            match action {
                TimeSyncAction::Announce(task) => {
                    self.last_announced = Some(task);
                    self.send(Envelope::broadcast(self.id, BusMessage::NextSimTask(task)));
                },
                TimeSyncAction::ExecuteStep { now, duration } => {
                    self.pending_step = Some((now, duration));
                },
                TimeSyncAction::WatchdogExpired { elapsed } => {
                    let reason = format!("simulation step exceeded the watchdog after {elapsed:?}");
                    let now = self.env.wall_clock();
                    if let Some(lifecycle) = self.lifecycle.as_mut() {
                        let actions = lifecycle.report_error(&reason, now);
                        self.apply_lifecycle(actions);
                    }
                },
                TimeSyncAction::Log(record) => self.log(record),
            }
        }
    }

    fn apply_monitor(&mut self, actions: Vec<MonitorAction>) {
        for action in actions {
            match action {
                MonitorAction::ParticipantStatusChanged(status) => {
                    self.work.push_back(Work::StatusChanged(status));
                },
                MonitorAction::SystemStateChanged(state) => {
                    self.work.push_back(Work::SystemState(state));
                },
                MonitorAction::Log(record) => self.log(record),
            }
        }
    }

    fn apply_simulator(&mut self, actions: Vec<SimulatorAction>) {
        for action in actions {
            match action {
                SimulatorAction::Emit(produced) => {
                    let routes = self.router.route_produced(&self.controllers, produced);
                    self.execute_routes(routes);
                },
                SimulatorAction::Log(record) => self.log(record),
            }
        }
    }

    fn route_controller_actions(
        &mut self,
        from: ControllerHandle,
        network: &str,
        actions: Vec<ControllerAction>,
    ) {
        for action in actions {
            let routes = self.router.route_action(&self.controllers, from, network, action);
            self.execute_routes(routes);
        }
    }

    fn execute_routes(&mut self, routes: Vec<Route>) {
        for route in routes {
            match route {
                Route::Send(envelope) => self.send(envelope),
                Route::Peer { to, from, payload } => {
                    self.work.push_back(Work::Peer { to, from, payload });
                },
                Route::Simulate { network, from, request } => {
                    self.work.push_back(Work::Simulate { network, from, request });
                },
                Route::Deliver { to, event } => self.work.push_back(Work::Deliver { to, event }),
                Route::Simulated { to, event } => {
                    self.work.push_back(Work::Simulated { to, event });
                },
                Route::Log(record) => self.log(record),
            }
        }
    }

    // Dispatch queue

    fn pump(&mut self) {
        if self.dispatching {
            return;
        }
        self.dispatching = true;
        loop {
            while let Some(work) = self.work.pop_front() {
                self.run(work);
            }
            if !std::mem::take(&mut self.step_completion_requested) {
                break;
            }
            self.finish_explicit_step();
        }
        self.dispatching = false;
    }

    fn run(&mut self, work: Work) {
        match work {
            Work::Invoke(hook) => self.run_hook(hook),
            Work::SystemState(state) => {
                self.notify_system_state(state, None);
                let now = self.env.wall_clock();
                if let Some(lifecycle) = self.lifecycle.as_mut() {
                    let actions = lifecycle.on_system_state(state, now);
                    self.apply_lifecycle(actions);
                }
            },
            Work::StatusChanged(status) => self.notify_status(&status, None),
            Work::ReplayStatuses(id) => {
                let statuses: Vec<ParticipantStatus> = self.monitor.statuses().cloned().collect();
                for status in statuses {
                    self.notify_status(&status, Some(id));
                }
            },
            Work::ReplaySystemState(id) => {
                let state = self.monitor.system_state();
                if state != SystemState::Invalid {
                    self.notify_system_state(state, Some(id));
                }
            },
            Work::Peer { to, from, payload } => {
                let now = self.now();
                let me = self.controllers.descriptor(to);
                let Ok(entry) = self.controllers.get_mut(to) else {
                    self.log(LogRecord::debug(format!("dropping peer message for removed controller {to}")));
                    return;
                };
                let network = entry.network.clone();
                let ctx = self.router.context(&network, now);
                let actions = entry.value.on_peer(me, from, &payload, ctx);
                self.route_controller_actions(to, &network, actions);
            },
            Work::Simulate { network, from, request } => {
                let now = self.now();
                let actions = self.simulator.on_request(&network, from, &request, now);
                self.apply_simulator(actions);
            },
            Work::Deliver { to, event } => self.dispatch_event(to, &event),
            Work::Simulated { to, event } => {
                let Ok(entry) = self.controllers.get_mut(to) else {
                    self.log(LogRecord::debug(format!("dropping event for removed controller {to}")));
                    return;
                };
                let network = entry.network.clone();
                let actions = entry.value.on_simulated_event(event);
                self.route_controller_actions(to, &network, actions);
            },
        }
    }

    fn finish_explicit_step(&mut self) {
        let wall = self.elapsed();
        let Some(time_sync) = self.time_sync.as_mut() else {
            return;
        };
        match time_sync.complete_step(wall) {
            Ok(actions) => self.apply_time_sync(actions),
            Err(err) => self.log(LogRecord::warn(format!("{}: {err}", self.config.name))),
        }
    }

    fn on_handler_fault(&mut self, fault: &HandlerFault) {
        let now = self.env.wall_clock();
        match self.lifecycle.as_mut() {
            Some(lifecycle) => {
                let actions = lifecycle.handler_fault(&fault.message, now);
                self.apply_lifecycle(actions);
            },
            None => self.log(LogRecord::error(format!("{}: {fault}", self.config.name))),
        }
    }

    fn send(&mut self, envelope: Envelope) {
        self.outbox.push(ParticipantAction::Send(envelope));
    }

    /// Queue a log record for the driver.
    pub fn log(&mut self, record: LogRecord) {
        self.outbox.push(ParticipantAction::Log(record));
    }
}

impl<E: Environment> std::fmt::Debug for Participant<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Participant")
            .field("name", &self.config.name)
            .field("id", &self.id)
            .field("state", &self.state())
            .field("system_state", &self.monitor.system_state())
            .field("controllers", &self.controllers.len())
            .finish_non_exhaustive()
    }
}
