//! Deterministic multi-participant simulation.
//!
//! A [`Simulation`] owns a [`SimBus`], the participants connected to it and
//! the virtual clock they share. It plays the role the async runtime plays in
//! a deployed run: it feeds envelopes and ticks into each participant and
//! executes the actions that come back.
//!
//! Two schedules are available. [`Simulation::run_until`] ticks every
//! participant in turn and delivers to quiescence after each tick, which
//! gives readable scenario tests. [`Simulation::run_shuffled`] picks the next
//! participant and the next move (deliver one envelope or tick) from a seeded
//! RNG, which lets property tests explore interleavings.
//!
//! The invariants are properties of the whole trace, so they are checked
//! once when a run returns.

use std::{
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use cosim_core::{ControlMode, HandlerResult, ParticipantConfig, SystemController, TimeSyncMode};
use cosim_participant::{
    EventChannel, Participant, ParticipantAction, ParticipantError, ParticipantEvent,
    SystemControllerHandle, TransportError, channel, system_controller,
};
use cosim_proto::{BusMessage, ParticipantCommandKind, ParticipantState, SystemState};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::{
    HarnessError, SimBus, SimChannel, SimEnv,
    invariants::{InvariantRegistry, ParticipantSnapshot, StepPhase, StepRecord, SystemSnapshot},
};

/// Virtual time that passes per tick.
pub const TICK: Duration = Duration::from_micros(100);

/// Name of the participant hosting the system controller.
pub const SYSTEM_CONTROLLER: &str = "SystemController";

type Shared<T> = Arc<Mutex<Vec<T>>>;

fn push<T>(log: &Mutex<Vec<T>>, item: T) {
    log.lock().unwrap_or_else(PoisonError::into_inner).push(item);
}

struct Node {
    participant: Participant<SimEnv>,
    channel: SimChannel,
    completed: Option<ParticipantState>,
    /// The loss of the connection was reported to the participant
    lost: bool,
}

/// Participants on one in-memory bus.
pub struct Simulation {
    env: SimEnv,
    bus: SimBus,
    nodes: Vec<Node>,
    steps: Shared<StepRecord>,
    system_states: Shared<SystemState>,
    controller: Option<(usize, SystemControllerHandle)>,
    invariants: Option<InvariantRegistry>,
    ticks: u64,
}

impl Simulation {
    /// Empty simulation whose environment is seeded with `seed`.
    pub fn new(seed: u64) -> Self {
        let env = SimEnv::with_seed(seed);
        Self {
            bus: SimBus::new(env.clone()),
            env,
            nodes: Vec::new(),
            steps: Shared::default(),
            system_states: Shared::default(),
            controller: None,
            invariants: None,
            ticks: 0,
        }
    }

    /// Check `registry` whenever a run returns.
    #[must_use]
    pub fn with_invariants(mut self, registry: InvariantRegistry) -> Self {
        self.invariants = Some(registry);
        self
    }

    /// Connect a participant and return its index.
    ///
    /// Synchronized participants get a step handler that only records the
    /// step; replace it with [`Self::set_step_handler`].
    ///
    /// # Errors
    ///
    /// - `HarnessError::Refused` if the hub rejects the name
    /// - `HarnessError::Participant` for an invalid configuration
    pub fn add_participant(&mut self, config: ParticipantConfig) -> Result<usize, HarnessError> {
        let channel = self.bus.connect(&config.name)?;
        let synchronized = config.time_sync.is_some();
        let participant = Participant::new(self.env.clone(), config, channel.participant())?;
        self.nodes.push(Node { participant, channel, completed: None, lost: false });

        let index = self.nodes.len() - 1;
        if synchronized {
            self.set_step_handler(index, |_, _, _| Ok(()))?;
        }
        Ok(index)
    }

    /// Connect an observer running a system controller for `required`.
    ///
    /// # Errors
    ///
    /// Same as [`Self::add_participant`].
    pub fn add_system_controller<S: Into<String>>(
        &mut self,
        required: impl IntoIterator<Item = S>,
        sync_master: Option<&str>,
        mode: ControlMode,
    ) -> Result<usize, HarnessError> {
        let index = self.add_participant(ParticipantConfig::observer(SYSTEM_CONTROLLER))?;
        let controller = SystemController::new(required, sync_master.map(str::to_string), mode);

        let participant = &mut self.nodes[index].participant;
        let handle = system_controller::attach(participant, controller);
        let log = Arc::clone(&self.system_states);
        participant.add_system_state_handler(move |_, state| {
            push(&log, state);
            Ok(())
        });

        self.controller = Some((index, handle));
        self.flush(index)?;
        Ok(index)
    }

    /// Install a step handler on participant `index`. Entry and return of
    /// every call are recorded in the step trace.
    ///
    /// # Errors
    ///
    /// - `HarnessError::Participant` if the participant has no time
    ///   synchronization
    pub fn set_step_handler(
        &mut self,
        index: usize,
        mut handler: impl FnMut(&mut Participant<SimEnv>, Duration, Duration) -> HandlerResult
        + Send
        + 'static,
    ) -> Result<(), HarnessError> {
        let trace = Arc::clone(&self.steps);
        let record = move |participant: &str, now: Duration, phase: StepPhase| {
            push(&trace, StepRecord { participant: participant.to_string(), now, phase });
        };
        self.nodes[index].participant.set_simulation_step_handler(move |participant, now, duration| {
            let name = participant.name().to_string();
            record(&name, now, StepPhase::Started);
            let result = handler(participant, now, duration);
            record(&name, now, StepPhase::Ended);
            result
        })?;
        Ok(())
    }

    /// Participant at `index`.
    pub fn participant(&self, index: usize) -> &Participant<SimEnv> {
        &self.nodes[index].participant
    }

    /// Run `op` on participant `index` and flush its actions.
    ///
    /// # Errors
    ///
    /// The error of `op`, or a transport failure while flushing.
    pub fn operate<R>(
        &mut self,
        index: usize,
        op: impl FnOnce(&mut Participant<SimEnv>) -> Result<R, ParticipantError>,
    ) -> Result<R, HarnessError> {
        let result = op(&mut self.nodes[index].participant)?;
        self.flush(index)?;
        Ok(result)
    }

    /// Start every participant that has a lifecycle.
    ///
    /// # Errors
    ///
    /// - `HarnessError::Participant` if a lifecycle was already started
    pub fn start_all(&mut self) -> Result<(), HarnessError> {
        for index in 0..self.nodes.len() {
            if self.nodes[index].participant.config().lifecycle.is_some() {
                self.operate(index, Participant::start)?;
            }
        }
        Ok(())
    }

    /// Execute whatever participant `index` queued outside of event
    /// handling.
    ///
    /// # Errors
    ///
    /// - `HarnessError::Transport` if the channel fails for a reason other
    ///   than being closed
    pub fn flush(&mut self, index: usize) -> Result<(), HarnessError> {
        let actions = self.nodes[index].participant.take_actions();
        self.execute(index, actions)
    }

    /// Run `op` against the system controller and flush its commands.
    ///
    /// # Errors
    ///
    /// - `HarnessError::NoSystemController` without a system controller
    pub fn control(
        &mut self,
        op: impl FnOnce(&SystemControllerHandle, &mut Participant<SimEnv>),
    ) -> Result<(), HarnessError> {
        let (index, handle) = self.controller.clone().ok_or(HarnessError::NoSystemController)?;
        op(&handle, &mut self.nodes[index].participant);
        self.flush(index)
    }

    /// The system controller, if one was added.
    pub fn system_controller(&self) -> Option<&SystemControllerHandle> {
        self.controller.as_ref().map(|(_, handle)| handle)
    }

    /// Drop the bus connection of participant `index` and let everybody
    /// react.
    ///
    /// # Errors
    ///
    /// Same as [`Self::deliver_all`].
    pub fn disconnect(&mut self, index: usize, reason: &str) -> Result<(), HarnessError> {
        let connection = self.nodes[index].channel.connection();
        tracing::info!(participant = self.nodes[index].participant.name(), reason, "disconnect");
        self.bus.disconnect(connection, reason);
        self.deliver_all()
    }

    /// Deliver envelopes, in participant order, until every inbox is empty.
    ///
    /// # Errors
    ///
    /// - `HarnessError::Transport` for channel failures
    pub fn deliver_all(&mut self) -> Result<(), HarnessError> {
        loop {
            let mut delivered = false;
            for index in 0..self.nodes.len() {
                while self.deliver_one(index)? {
                    delivered = true;
                }
            }
            if !delivered {
                return Ok(());
            }
        }
    }

    /// Deliver the next envelope waiting for participant `index`. Returns
    /// false if there was nothing to deliver.
    fn deliver_one(&mut self, index: usize) -> Result<bool, HarnessError> {
        let node = &mut self.nodes[index];
        if node.lost {
            return Ok(false);
        }
        match node.channel.try_recv() {
            Ok(Some(envelope)) => {
                // Terminated participants keep their connection; drain it.
                if node.completed.is_none() {
                    self.handle(index, ParticipantEvent::EnvelopeReceived(envelope))?;
                }
                Ok(true)
            },
            Ok(None) => Ok(false),
            Err(TransportError::Closed) => {
                node.lost = true;
                let reason =
                    self.bus.close_reason(node.channel.connection()).unwrap_or_default();
                if node.completed.is_none() {
                    self.handle(index, ParticipantEvent::ConnectionLost { reason })?;
                }
                Ok(true)
            },
            Err(err) => Err(err.into()),
        }
    }

    /// Advance the clock by one [`TICK`], tick every live participant in
    /// order and deliver to quiescence.
    ///
    /// # Errors
    ///
    /// Same as [`Self::deliver_all`].
    pub fn tick(&mut self) -> Result<(), HarnessError> {
        self.env.advance(TICK);
        self.ticks += 1;
        for index in 0..self.nodes.len() {
            self.tick_one(index)?;
        }
        self.deliver_all()
    }

    fn tick_one(&mut self, index: usize) -> Result<(), HarnessError> {
        let node = &self.nodes[index];
        if node.completed.is_some() || node.lost {
            return Ok(());
        }
        self.handle(index, ParticipantEvent::Tick)
    }

    /// Tick until `done` holds.
    ///
    /// # Errors
    ///
    /// - `HarnessError::Stalled` if `done` does not hold within `max_ticks`
    /// - `HarnessError::Invariants` if the trace violates a registered
    ///   invariant
    pub fn run_until(
        &mut self,
        max_ticks: u64,
        mut done: impl FnMut(&Self) -> bool,
    ) -> Result<(), HarnessError> {
        self.deliver_all()?;
        let mut reached = done(self);
        let mut ticks = 0;
        while !reached && ticks < max_ticks {
            self.tick()?;
            ticks += 1;
            reached = done(self);
        }
        self.check_invariants()?;
        if reached { Ok(()) } else { Err(HarnessError::Stalled { ticks }) }
    }

    /// Make random moves until `done` holds. Each move either delivers one
    /// envelope to a random participant or advances the clock and ticks a
    /// random participant.
    ///
    /// # Errors
    ///
    /// Same as [`Self::run_until`], with `max_moves` counted as ticks.
    pub fn run_shuffled(
        &mut self,
        seed: u64,
        max_moves: u64,
        mut done: impl FnMut(&Self) -> bool,
    ) -> Result<(), HarnessError> {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let mut reached = done(self);
        let mut moves = 0;
        while !reached && moves < max_moves && !self.nodes.is_empty() {
            let index = rng.gen_range(0..self.nodes.len());
            if rng.gen_bool(0.5) {
                if !self.deliver_one(index)? {
                    self.tick_one(index)?;
                }
            } else {
                self.env.advance(TICK);
                self.ticks += 1;
                self.tick_one(index)?;
            }
            moves += 1;
            reached = done(self);
        }
        self.check_invariants()?;
        if reached { Ok(()) } else { Err(HarnessError::Stalled { ticks: moves }) }
    }

    fn handle(&mut self, index: usize, event: ParticipantEvent) -> Result<(), HarnessError> {
        match self.nodes[index].participant.handle(event) {
            Ok(actions) => self.execute(index, actions),
            Err(ParticipantError::Terminated { .. }) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    fn execute(&mut self, index: usize, actions: Vec<ParticipantAction>) -> Result<(), HarnessError> {
        let node = &mut self.nodes[index];
        for action in actions {
            match action {
                ParticipantAction::Send(envelope) => match node.channel.send(envelope) {
                    // Lost connections are reported on the next receive.
                    Ok(()) | Err(TransportError::Closed) => {},
                    Err(err) => return Err(err.into()),
                },
                ParticipantAction::Log(record) => channel::emit(node.participant.name(), &record),
                ParticipantAction::Completed { final_state } => {
                    tracing::debug!(
                        participant = node.participant.name(),
                        %final_state,
                        "lifecycle completed"
                    );
                    node.completed = Some(final_state);
                },
            }
        }
        Ok(())
    }

    /// Final state of participant `index`, once reached.
    pub fn completed(&self, index: usize) -> Option<ParticipantState> {
        self.nodes[index].completed
    }

    /// Number of participants that reached a final state.
    pub fn completed_count(&self) -> usize {
        self.nodes.iter().filter(|n| n.completed.is_some()).count()
    }

    /// Number of connected participants, the system controller included.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether no participant was added yet.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// The bus.
    pub fn bus(&self) -> &SimBus {
        &self.bus
    }

    /// Shared environment.
    pub fn env(&self) -> &SimEnv {
        &self.env
    }

    /// Ticks executed so far.
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// System states observed by the system controller, oldest first.
    pub fn system_states(&self) -> Vec<SystemState> {
        self.system_states.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Step trace of every synchronized participant.
    pub fn steps(&self) -> Vec<StepRecord> {
        self.steps.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Simulation times at which participant `index` entered a step.
    pub fn step_times(&self, index: usize) -> Vec<Duration> {
        let name = self.nodes[index].participant.name();
        self.steps()
            .into_iter()
            .filter(|r| r.participant == name && r.phase == StepPhase::Started)
            .map(|r| r.now)
            .collect()
    }

    /// System and participant commands put on the bus, rendered like
    /// operator commands.
    pub fn commands(&self) -> Vec<String> {
        self.bus
            .history()
            .into_iter()
            .filter_map(|envelope| match envelope.message {
                BusMessage::SystemCommand(command) => Some(command.to_string()),
                BusMessage::ParticipantCommand(command) => Some(match command.kind {
                    ParticipantCommandKind::Initialize => {
                        format!("Initialize {}", command.participant_name)
                    },
                    ParticipantCommandKind::ReInitialize => {
                        format!("ReInitialize {}", command.participant_name)
                    },
                }),
                _ => None,
            })
            .collect()
    }

    /// Observable state of the run so far.
    pub fn snapshot(&self) -> SystemSnapshot {
        let mut participants: Vec<ParticipantSnapshot> = self
            .nodes
            .iter()
            .map(|node| &node.participant)
            .filter(|p| p.config().lifecycle.is_some())
            .map(|p| {
                let step = p
                    .config()
                    .time_sync
                    .as_ref()
                    .filter(|t| t.mode == TimeSyncMode::Synchronized)
                    .map(|t| t.step_duration);
                match step {
                    Some(step) => ParticipantSnapshot::synchronized(p.name(), step),
                    None => ParticipantSnapshot::new(p.name()),
                }
            })
            .collect();

        for envelope in self.bus.history() {
            if let BusMessage::ParticipantStatus(status) = envelope.message
                && let Some(snapshot) =
                    participants.iter_mut().find(|p| p.name == status.participant_name)
            {
                snapshot.record_state(status.state);
            }
        }

        SystemSnapshot { participants, steps: self.steps() }
    }

    /// Check the registered invariants against the current snapshot.
    ///
    /// # Errors
    ///
    /// - `HarnessError::Invariants` with every violation found
    pub fn check_invariants(&self) -> Result<(), HarnessError> {
        match &self.invariants {
            Some(registry) => registry.check_all(&self.snapshot()).map_err(HarnessError::Invariants),
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for Simulation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Simulation")
            .field("participants", &self.nodes.len())
            .field("ticks", &self.ticks)
            .field("bus", &self.bus)
            .finish_non_exhaustive()
    }
}
