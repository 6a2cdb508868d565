//! In-memory bus around the hub driver.
//!
//! `SimBus` runs the production [`HubDriver`] on a [`SimEnv`] and replaces
//! QUIC with per-connection inboxes. Every envelope goes through the wire
//! codec on its way in, so a simulation exercises the same encoding as a
//! deployed run.
//!
//! ```text
//! SimChannel::send ──encode/decode──▶ HubDriver ──Send actions──▶ inboxes
//!                                                                   │
//! SimChannel::try_recv ◀────────────────────────────────────────────┘
//! ```
//!
//! The hub processes each envelope as soon as it is sent, so all inboxes
//! see relayed envelopes in one global order. Faults are injected by
//! closing connections.

use std::{
    collections::{BTreeMap, VecDeque},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use cosim_core::{LogLevel, LogRecord};
use cosim_participant::{EventChannel, TransportError};
use cosim_proto::{BusMessage, Envelope, ParticipantId};
use cosim_registry::{HubAction, HubConfig, HubDriver, HubEvent};

use crate::{HarnessError, SimEnv};

struct BusState {
    hub: HubDriver<SimEnv>,
    next_connection: u64,
    inboxes: BTreeMap<u64, VecDeque<Envelope>>,
    /// Closed connections and why
    closed: BTreeMap<u64, String>,
    /// Every envelope the hub received from a registered participant
    history: Vec<Envelope>,
}

impl BusState {
    fn process(&mut self, event: HubEvent) {
        let mut events = VecDeque::from([event]);
        while let Some(event) = events.pop_front() {
            for action in self.hub.process_event(event) {
                match action {
                    HubAction::Send { connection, envelope } => {
                        match self.inboxes.get_mut(&connection) {
                            Some(inbox) => inbox.push_back(envelope),
                            None => tracing::debug!(connection, "send to closed connection skipped"),
                        }
                    },
                    HubAction::Close { connection, reason } => {
                        if self.close(connection, &reason) {
                            events.push_back(HubEvent::ConnectionClosed { connection, reason });
                        }
                    },
                    HubAction::Log(record) => log(&record),
                }
            }
        }
    }

    /// Close `connection`; false if it was already closed.
    fn close(&mut self, connection: u64, reason: &str) -> bool {
        if self.inboxes.remove(&connection).is_none() {
            return false;
        }
        self.closed.insert(connection, reason.to_string());
        true
    }
}

fn log(record: &LogRecord) {
    match record.level {
        LogLevel::Debug => tracing::debug!(target: "hub", "{}", record.message),
        LogLevel::Info => tracing::info!(target: "hub", "{}", record.message),
        LogLevel::Warn => tracing::warn!(target: "hub", "{}", record.message),
        LogLevel::Error => tracing::error!(target: "hub", "{}", record.message),
    }
}

/// Deterministic message hub.
///
/// Cloning is cheap; clones drive the same hub.
#[derive(Clone)]
pub struct SimBus {
    state: Arc<Mutex<BusState>>,
}

impl SimBus {
    /// Hub with the default configuration.
    pub fn new(env: SimEnv) -> Self {
        Self::with_config(env, HubConfig::default())
    }

    /// Hub with a custom configuration.
    pub fn with_config(env: SimEnv, config: HubConfig) -> Self {
        Self {
            state: Arc::new(Mutex::new(BusState {
                hub: HubDriver::new(env, config),
                next_connection: 1,
                inboxes: BTreeMap::new(),
                closed: BTreeMap::new(),
                history: Vec::new(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BusState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Open a connection, say hello as `name` and wait for the hub to assign
    /// an id.
    ///
    /// # Errors
    ///
    /// - `HarnessError::Refused` if the hub closes the connection, e.g. for a
    ///   duplicate name
    pub fn connect(&self, name: &str) -> Result<SimChannel, HarnessError> {
        let mut state = self.lock();
        let connection = state.next_connection;
        state.next_connection += 1;
        state.inboxes.insert(connection, VecDeque::new());

        state.process(HubEvent::ConnectionAccepted { connection });
        let hello = Envelope::to(
            ParticipantId::HUB,
            ParticipantId::HUB,
            BusMessage::Hello { participant_name: name.to_string() },
        );
        state.process(HubEvent::EnvelopeReceived { connection, envelope: hello });

        let refused = |reason: String| HarnessError::Refused { participant: name.to_string(), reason };
        let first = match state.inboxes.get_mut(&connection) {
            Some(inbox) => inbox.pop_front(),
            None => {
                let reason = state.closed.get(&connection).cloned().unwrap_or_default();
                return Err(refused(reason));
            },
        };
        match first {
            Some(Envelope {
                message: BusMessage::ParticipantConnected { participant_name, participant },
                ..
            }) if participant_name == name => {
                Ok(SimChannel { connection, participant, bus: self.clone() })
            },
            other => Err(refused(format!("unexpected first envelope {other:?}"))),
        }
    }

    /// Drop a connection as if the network failed. The hub announces the
    /// departure; the participant notices on its next receive.
    pub fn disconnect(&self, connection: u64, reason: &str) {
        let mut state = self.lock();
        if state.close(connection, reason) {
            state.process(HubEvent::ConnectionClosed { connection, reason: reason.to_string() });
        }
    }

    /// Whether `connection` is still open.
    pub fn is_open(&self, connection: u64) -> bool {
        self.lock().inboxes.contains_key(&connection)
    }

    /// Why `connection` was closed, if it was.
    pub fn close_reason(&self, connection: u64) -> Option<String> {
        self.lock().closed.get(&connection).cloned()
    }

    /// Envelopes waiting in the inbox of `connection`.
    pub fn pending(&self, connection: u64) -> usize {
        self.lock().inboxes.get(&connection).map_or(0, VecDeque::len)
    }

    /// Every envelope participants put on the bus, in hub order.
    pub fn history(&self) -> Vec<Envelope> {
        self.lock().history.clone()
    }

    /// Number of registered participants.
    pub fn participant_count(&self) -> usize {
        self.lock().hub.roster().len()
    }

    /// Envelopes relayed so far.
    pub fn relayed_count(&self) -> u64 {
        self.lock().hub.relayed_count()
    }
}

impl std::fmt::Debug for SimBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("SimBus")
            .field("open", &state.inboxes.len())
            .field("closed", &state.closed.len())
            .field("history", &state.history.len())
            .finish()
    }
}

/// A participant's end of a [`SimBus`] connection.
#[derive(Debug, Clone)]
pub struct SimChannel {
    connection: u64,
    participant: ParticipantId,
    bus: SimBus,
}

impl SimChannel {
    /// Connection id at the hub.
    pub fn connection(&self) -> u64 {
        self.connection
    }

    /// Bus id assigned by the hub.
    pub fn participant(&self) -> ParticipantId {
        self.participant
    }
}

fn through_wire(envelope: &Envelope) -> Result<Envelope, TransportError> {
    let bytes = envelope.to_bytes().map_err(|e| TransportError::Protocol(e.to_string()))?;
    Envelope::decode(&bytes).map_err(|e| TransportError::Protocol(e.to_string()))
}

impl EventChannel for SimChannel {
    fn send(&mut self, envelope: Envelope) -> Result<(), TransportError> {
        let envelope = through_wire(&envelope)?;
        let mut state = self.bus.lock();
        if !state.inboxes.contains_key(&self.connection) {
            return Err(TransportError::Closed);
        }
        state.history.push(envelope.clone());
        state.process(HubEvent::EnvelopeReceived { connection: self.connection, envelope });
        Ok(())
    }

    fn try_recv(&mut self) -> Result<Option<Envelope>, TransportError> {
        let mut state = self.bus.lock();
        match state.inboxes.get_mut(&self.connection) {
            Some(inbox) => Ok(inbox.pop_front()),
            None => Err(TransportError::Closed),
        }
    }
}
