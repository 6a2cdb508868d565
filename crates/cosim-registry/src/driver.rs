//! Hub driver.
//!
//! Sans-IO core of the message hub: registers participants on `Hello`,
//! announces joins and departures, and relays envelopes. Every relayed
//! envelope becomes one `Send` action per recipient, in the order the driver
//! processed the input, which gives all participants the same total order.

use std::collections::HashMap;

use cosim_core::{Environment, LogRecord};
use cosim_proto::{BusMessage, Destination, Envelope, ParticipantId};

use crate::roster::Roster;

/// Default limit of simultaneous connections.
pub const DEFAULT_MAX_CONNECTIONS: usize = 1024;

/// Hub configuration
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Maximum concurrent connections, registered or not
    pub max_connections: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self { max_connections: DEFAULT_MAX_CONNECTIONS }
    }
}

/// Events that the hub driver processes.
#[derive(Debug, Clone)]
pub enum HubEvent {
    /// A transport connection was accepted
    ConnectionAccepted {
        /// Connection id chosen by the runtime
        connection: u64,
    },

    /// An envelope arrived on a connection
    EnvelopeReceived {
        /// Connection it arrived on
        connection: u64,
        /// The envelope
        envelope: Envelope,
    },

    /// A connection was closed by the peer or failed
    ConnectionClosed {
        /// Connection that closed
        connection: u64,
        /// Why
        reason: String,
    },
}

/// Actions that the hub driver produces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HubAction {
    /// Write an envelope to a connection
    Send {
        /// Target connection
        connection: u64,
        /// Envelope to write
        envelope: Envelope,
    },

    /// Close a connection
    Close {
        /// Connection to close
        connection: u64,
        /// Reason sent to the peer
        reason: String,
    },

    /// Log a message
    Log(LogRecord),
}

/// Action-based hub driver.
pub struct HubDriver<E: Environment> {
    env: E,
    config: HubConfig,
    /// Open connections and when they were accepted
    connections: HashMap<u64, E::Instant>,
    roster: Roster,
    relayed: u64,
}

impl<E: Environment> HubDriver<E> {
    /// Create a hub driver.
    pub fn new(env: E, config: HubConfig) -> Self {
        Self { env, config, connections: HashMap::new(), roster: Roster::new(), relayed: 0 }
    }

    /// Process one event and return the actions to execute, in order.
    pub fn process_event(&mut self, event: HubEvent) -> Vec<HubAction> {
        match event {
            HubEvent::ConnectionAccepted { connection } => self.handle_accepted(connection),
            HubEvent::EnvelopeReceived { connection, envelope } => {
                self.handle_envelope(connection, envelope)
            },
            HubEvent::ConnectionClosed { connection, reason } => {
                self.handle_closed(connection, &reason)
            },
        }
    }

    fn handle_accepted(&mut self, connection: u64) -> Vec<HubAction> {
        if self.connections.len() >= self.config.max_connections {
            return vec![
                HubAction::Log(LogRecord::warn(format!(
                    "rejecting connection {connection}: {} connections open",
                    self.connections.len()
                ))),
                HubAction::Close { connection, reason: "hub is full".to_string() },
            ];
        }

        self.connections.insert(connection, self.env.now());
        vec![HubAction::Log(LogRecord::debug(format!("connection {connection} accepted")))]
    }

    fn handle_envelope(&mut self, connection: u64, envelope: Envelope) -> Vec<HubAction> {
        if !self.connections.contains_key(&connection) {
            return vec![HubAction::Log(LogRecord::warn(format!(
                "envelope on unknown connection {connection} dropped"
            )))];
        }

        let Some(sender) = self.roster.participant_on(connection) else {
            return match envelope.message {
                BusMessage::Hello { participant_name } => self.register(connection, &participant_name),
                other => vec![
                    HubAction::Log(LogRecord::warn(format!(
                        "connection {connection} sent {:?} before hello",
                        other.kind()
                    ))),
                    HubAction::Close { connection, reason: "expected hello".to_string() },
                ],
            };
        };

        if let BusMessage::Hello { participant_name } = &envelope.message {
            return vec![HubAction::Log(LogRecord::warn(format!(
                "{sender} repeated hello as '{participant_name}', ignored"
            )))];
        }
        if envelope.sender != sender {
            return vec![HubAction::Log(LogRecord::warn(format!(
                "{sender} sent an envelope claiming to be {}, dropped",
                envelope.sender
            )))];
        }

        self.relay(sender, envelope)
    }

    fn register(&mut self, connection: u64, name: &str) -> Vec<HubAction> {
        let participant = match self.roster.register(connection, name) {
            Ok(participant) => participant,
            Err(err) => {
                return vec![
                    HubAction::Log(LogRecord::warn(format!(
                        "connection {connection} rejected: {err}"
                    ))),
                    HubAction::Close { connection, reason: err.to_string() },
                ];
            },
        };

        let notice = BusMessage::ParticipantConnected {
            participant_name: name.to_string(),
            participant,
        };

        // The newcomer learns its own id first, then everyone already here.
        let mut actions = vec![HubAction::Send {
            connection,
            envelope: Envelope::to(ParticipantId::HUB, participant, notice.clone()),
        }];
        for other in self.roster.iter().filter(|entry| entry.participant != participant) {
            actions.push(HubAction::Send {
                connection,
                envelope: Envelope::to(
                    ParticipantId::HUB,
                    participant,
                    BusMessage::ParticipantConnected {
                        participant_name: other.name.clone(),
                        participant: other.participant,
                    },
                ),
            });
        }
        for other in self.roster.iter().filter(|entry| entry.participant != participant) {
            actions.push(HubAction::Send {
                connection: other.connection,
                envelope: Envelope::broadcast(ParticipantId::HUB, notice.clone()),
            });
        }

        actions.push(HubAction::Log(LogRecord::info(format!(
            "participant '{name}' joined as {participant}"
        ))));
        actions
    }

    fn relay(&mut self, sender: ParticipantId, envelope: Envelope) -> Vec<HubAction> {
        let actions = match envelope.destination {
            Destination::All => self
                .roster
                .iter()
                .filter(|entry| entry.participant != sender)
                .map(|entry| HubAction::Send {
                    connection: entry.connection,
                    envelope: envelope.clone(),
                })
                .collect(),
            Destination::Participant(target) => match self.roster.get(target) {
                Some(entry) => vec![HubAction::Send { connection: entry.connection, envelope }],
                None => vec![HubAction::Log(LogRecord::debug(format!(
                    "{:?} from {sender} for unknown recipient {target} dropped",
                    envelope.message.kind()
                )))],
            },
            Destination::Hub => vec![HubAction::Log(LogRecord::warn(format!(
                "{sender} addressed {:?} to the hub, dropped",
                envelope.message.kind()
            )))],
        };
        self.relayed += 1;
        actions
    }

    fn handle_closed(&mut self, connection: u64, reason: &str) -> Vec<HubAction> {
        let Some(accepted_at) = self.connections.remove(&connection) else {
            return Vec::new();
        };
        let Some(entry) = self.roster.unregister_connection(connection) else {
            return vec![HubAction::Log(LogRecord::debug(format!(
                "connection {connection} closed before hello: {reason}"
            )))];
        };

        let notice = BusMessage::ParticipantDisconnected {
            participant_name: entry.name.clone(),
            participant: entry.participant,
        };
        let mut actions: Vec<HubAction> = self
            .roster
            .iter()
            .map(|other| HubAction::Send {
                connection: other.connection,
                envelope: Envelope::broadcast(ParticipantId::HUB, notice.clone()),
            })
            .collect();

        let connected_for = self.env.now() - accepted_at;
        actions.push(HubAction::Log(LogRecord::info(format!(
            "participant '{}' ({}) left after {connected_for:?}: {reason}",
            entry.name, entry.participant
        ))));
        actions
    }

    /// Participants currently registered.
    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    /// Open connections, registered or not.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Envelopes relayed so far.
    pub fn relayed_count(&self) -> u64 {
        self.relayed
    }
}

impl<E: Environment> std::fmt::Debug for HubDriver<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HubDriver")
            .field("connection_count", &self.connections.len())
            .field("participant_count", &self.roster.len())
            .field("relayed", &self.relayed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use cosim_proto::{ParticipantState, ParticipantStatus};

    use super::*;

    #[derive(Clone)]
    struct TestEnv;

    impl Environment for TestEnv {
        type Instant = Instant;

        fn now(&self) -> Instant {
            Instant::now()
        }

        fn wall_clock(&self) -> Duration {
            Duration::ZERO
        }

        fn sleep(&self, _duration: Duration) -> impl std::future::Future<Output = ()> + Send {
            async {}
        }

        fn random_bytes(&self, buffer: &mut [u8]) {
            buffer.fill(0);
        }
    }

    fn hub() -> HubDriver<TestEnv> {
        HubDriver::new(TestEnv, HubConfig::default())
    }

    fn hello(name: &str) -> Envelope {
        Envelope::to(
            ParticipantId::HUB,
            ParticipantId::HUB,
            BusMessage::Hello { participant_name: name.to_string() },
        )
    }

    fn join(hub: &mut HubDriver<TestEnv>, connection: u64, name: &str) -> Vec<HubAction> {
        hub.process_event(HubEvent::ConnectionAccepted { connection });
        hub.process_event(HubEvent::EnvelopeReceived { connection, envelope: hello(name) })
    }

    fn sends(actions: &[HubAction]) -> Vec<(u64, &Envelope)> {
        actions
            .iter()
            .filter_map(|action| match action {
                HubAction::Send { connection, envelope } => Some((*connection, envelope)),
                _ => None,
            })
            .collect()
    }

    fn status(sender: ParticipantId) -> Envelope {
        Envelope::broadcast(
            sender,
            BusMessage::ParticipantStatus(ParticipantStatus {
                participant_name: "A".into(),
                state: ParticipantState::Idle,
                enter_reason: String::new(),
                enter_time: Duration::ZERO,
                refresh_time: Duration::ZERO,
            }),
        )
    }

    #[test]
    fn newcomer_learns_its_id_before_the_roster() {
        let mut hub = hub();
        join(&mut hub, 10, "A");
        join(&mut hub, 20, "B");
        let actions = join(&mut hub, 30, "C");

        let sent = sends(&actions);
        let to_newcomer: Vec<_> = sent.iter().filter(|(c, _)| *c == 30).collect();
        assert_eq!(to_newcomer.len(), 3);
        assert_eq!(
            to_newcomer[0].1.message,
            BusMessage::ParticipantConnected { participant_name: "C".into(), participant: ParticipantId(3) }
        );
        assert_eq!(
            to_newcomer[1].1.message,
            BusMessage::ParticipantConnected { participant_name: "A".into(), participant: ParticipantId(1) }
        );

        let announced: Vec<u64> = sent.iter().filter(|(c, _)| *c != 30).map(|(c, _)| *c).collect();
        assert_eq!(announced, vec![10, 20]);
    }

    #[test]
    fn broadcasts_skip_the_sender() {
        let mut hub = hub();
        join(&mut hub, 10, "A");
        join(&mut hub, 20, "B");
        join(&mut hub, 30, "C");

        let actions = hub.process_event(HubEvent::EnvelopeReceived {
            connection: 20,
            envelope: status(ParticipantId(2)),
        });

        let targets: Vec<u64> = sends(&actions).iter().map(|(c, _)| *c).collect();
        assert_eq!(targets, vec![10, 30]);
        assert_eq!(hub.relayed_count(), 1);
    }

    #[test]
    fn addressed_envelopes_reach_only_their_recipient() {
        let mut hub = hub();
        join(&mut hub, 10, "A");
        join(&mut hub, 20, "B");

        let mut envelope = status(ParticipantId(1));
        envelope.destination = Destination::Participant(ParticipantId(2));
        let actions = hub.process_event(HubEvent::EnvelopeReceived { connection: 10, envelope });

        let targets: Vec<u64> = sends(&actions).iter().map(|(c, _)| *c).collect();
        assert_eq!(targets, vec![20]);
    }

    #[test]
    fn unknown_recipient_is_dropped_with_a_log() {
        let mut hub = hub();
        join(&mut hub, 10, "A");

        let mut envelope = status(ParticipantId(1));
        envelope.destination = Destination::Participant(ParticipantId(42));
        let actions = hub.process_event(HubEvent::EnvelopeReceived { connection: 10, envelope });

        assert!(sends(&actions).is_empty());
        assert!(matches!(actions[0], HubAction::Log(_)));
    }

    #[test]
    fn spoofed_sender_is_dropped() {
        let mut hub = hub();
        join(&mut hub, 10, "A");
        join(&mut hub, 20, "B");

        let actions = hub.process_event(HubEvent::EnvelopeReceived {
            connection: 10,
            envelope: status(ParticipantId(2)),
        });

        assert!(sends(&actions).is_empty());
        assert_eq!(hub.relayed_count(), 0);
    }

    #[test]
    fn messages_before_hello_close_the_connection() {
        let mut hub = hub();
        hub.process_event(HubEvent::ConnectionAccepted { connection: 10 });

        let actions = hub.process_event(HubEvent::EnvelopeReceived {
            connection: 10,
            envelope: status(ParticipantId(1)),
        });

        assert!(actions.iter().any(|a| matches!(a, HubAction::Close { connection: 10, .. })));
        assert!(hub.roster().is_empty());
    }

    #[test]
    fn duplicate_name_closes_the_second_connection() {
        let mut hub = hub();
        join(&mut hub, 10, "A");
        let actions = join(&mut hub, 20, "A");

        assert!(actions.iter().any(|a| matches!(a, HubAction::Close { connection: 20, .. })));
        assert_eq!(hub.roster().len(), 1);
    }

    #[test]
    fn departure_is_announced_to_the_rest() {
        let mut hub = hub();
        join(&mut hub, 10, "A");
        join(&mut hub, 20, "B");

        let actions = hub.process_event(HubEvent::ConnectionClosed {
            connection: 10,
            reason: "peer closed".into(),
        });

        let sent = sends(&actions);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, 20);
        assert_eq!(
            sent[0].1.message,
            BusMessage::ParticipantDisconnected { participant_name: "A".into(), participant: ParticipantId(1) }
        );
        assert_eq!(hub.connection_count(), 1);
    }

    #[test]
    fn connection_limit_is_enforced() {
        let mut hub = HubDriver::new(TestEnv, HubConfig { max_connections: 1 });
        hub.process_event(HubEvent::ConnectionAccepted { connection: 1 });
        let actions = hub.process_event(HubEvent::ConnectionAccepted { connection: 2 });

        assert_eq!(hub.connection_count(), 1);
        assert!(actions.iter().any(|a| matches!(a, HubAction::Close { connection: 2, .. })));
    }
}
