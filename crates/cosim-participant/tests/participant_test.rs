//! Participant integration tests over an in-process hub.
//!
//! The hub here is the minimum needed to connect participants: it announces
//! joins and relays every envelope in one global order. The full
//! deterministic simulation with fault injection lives in the harness crate.

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
    time::Duration,
};

use cosim_core::{
    ControlMode, Environment, EventFilter, EventKind, HandlerFault, ParticipantConfig,
    SystemController,
};
use cosim_participant::{
    Participant, ParticipantAction, ParticipantError, ParticipantEvent, system_controller,
};
use cosim_proto::{
    BusMessage, Destination, Envelope, NetworkEvent, ParticipantId, ParticipantState,
    SystemState, TransmitDirection,
    payloads::can::{CanEvent, CanFrame},
};

const STEP: Duration = Duration::from_millis(1);

/// Manually advanced clock.
#[derive(Debug, Clone, Default)]
struct TestEnv {
    now: Arc<Mutex<Duration>>,
}

impl TestEnv {
    fn advance(&self, by: Duration) {
        *self.now.lock().unwrap() += by;
    }
}

impl Environment for TestEnv {
    type Instant = Duration;

    fn now(&self) -> Duration {
        *self.now.lock().unwrap()
    }

    fn wall_clock(&self) -> Duration {
        self.now()
    }

    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        self.advance(duration);
        std::future::ready(())
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        buffer.fill(0);
    }
}

/// Participants connected through an in-process relay.
struct Bus {
    env: TestEnv,
    participants: Vec<Participant<TestEnv>>,
    in_flight: VecDeque<Envelope>,
    completed: Vec<(String, ParticipantState)>,
    logs: Vec<String>,
}

impl Bus {
    fn new() -> Self {
        Self {
            env: TestEnv::default(),
            participants: Vec::new(),
            in_flight: VecDeque::new(),
            completed: Vec::new(),
            logs: Vec::new(),
        }
    }

    fn join(&mut self, config: ParticipantConfig) -> usize {
        let id = ParticipantId(self.participants.len() as u64 + 1);
        let name = config.name.clone();
        let participant = Participant::new(self.env.clone(), config, id).unwrap();

        for other in &self.participants {
            self.in_flight.push_back(Envelope::to(
                ParticipantId::HUB,
                id,
                BusMessage::ParticipantConnected {
                    participant_name: other.name().to_string(),
                    participant: other.id(),
                },
            ));
        }
        self.in_flight.push_back(Envelope::broadcast(
            ParticipantId::HUB,
            BusMessage::ParticipantConnected { participant_name: name, participant: id },
        ));
        self.participants.push(participant);
        self.participants.len() - 1
    }

    fn get(&mut self, index: usize) -> &mut Participant<TestEnv> {
        &mut self.participants[index]
    }

    /// Collect what `index` produced outside of `handle`.
    fn flush(&mut self, index: usize) {
        let actions = self.participants[index].take_actions();
        self.absorb(index, actions);
    }

    fn absorb(&mut self, index: usize, actions: Vec<ParticipantAction>) {
        for action in actions {
            match action {
                ParticipantAction::Send(envelope) => self.in_flight.push_back(envelope),
                ParticipantAction::Log(record) => self.logs.push(record.message),
                ParticipantAction::Completed { final_state } => {
                    let name = self.participants[index].name().to_string();
                    self.completed.push((name, final_state));
                },
            }
        }
    }

    fn deliver(&mut self) {
        while let Some(envelope) = self.in_flight.pop_front() {
            for index in 0..self.participants.len() {
                let participant = &mut self.participants[index];
                let relayed = match envelope.destination {
                    Destination::All => participant.id() != envelope.sender,
                    Destination::Participant(id) => participant.id() == id,
                    Destination::Hub => false,
                };
                if !relayed || participant.final_state().is_some() {
                    continue;
                }
                let actions = participant
                    .handle(ParticipantEvent::EnvelopeReceived(envelope.clone()))
                    .unwrap();
                self.absorb(index, actions);
            }
        }
    }

    fn tick(&mut self) {
        self.env.advance(Duration::from_micros(100));
        for index in 0..self.participants.len() {
            if self.participants[index].final_state().is_some() {
                continue;
            }
            let actions = self.participants[index].handle(ParticipantEvent::Tick).unwrap();
            self.absorb(index, actions);
        }
        self.deliver();
    }

    fn run_until(&mut self, mut done: impl FnMut(&mut Self) -> bool) {
        for _ in 0..10_000 {
            self.deliver();
            if done(self) {
                return;
            }
            self.tick();
        }
        panic!("condition not reached");
    }
}

fn master(name: &str) -> ParticipantConfig {
    ParticipantConfig { is_sync_master: true, ..ParticipantConfig::synchronized(name, STEP) }
}

type StepLog = Arc<Mutex<Vec<Duration>>>;

fn record_steps(participant: &mut Participant<TestEnv>) -> StepLog {
    let steps = StepLog::default();
    let log = Arc::clone(&steps);
    participant
        .set_simulation_step_handler(move |_, now, _| {
            log.lock().unwrap().push(now);
            Ok(())
        })
        .unwrap();
    steps
}

/// A controller participant plus two synchronized participants, `A` being
/// the sync master.
fn two_participant_run() -> (Bus, system_controller::SystemControllerHandle, StepLog, StepLog) {
    let mut bus = Bus::new();
    let controller = bus.join(ParticipantConfig::observer("SystemController"));
    let handle = system_controller::attach(
        bus.get(controller),
        SystemController::new(["A", "B"], Some("A".to_string()), ControlMode::Automatic),
    );
    bus.flush(controller);

    let a = bus.join(master("A"));
    let b = bus.join(ParticipantConfig::synchronized("B", STEP));
    let steps_a = record_steps(bus.get(a));
    let steps_b = record_steps(bus.get(b));
    for index in [a, b] {
        bus.get(index).start().unwrap();
        bus.flush(index);
    }
    (bus, handle, steps_a, steps_b)
}

#[test]
fn synchronized_run_reaches_shutdown() {
    let (mut bus, handle, steps_a, steps_b) = two_participant_run();

    bus.run_until(|bus| bus.get(1).state() == ParticipantState::Running && steps_a.lock().unwrap().len() >= 5);
    assert_eq!(bus.get(2).state(), ParticipantState::Running);

    handle.stop(bus.get(0));
    bus.flush(0);
    bus.run_until(|bus| bus.completed.len() == 2);

    assert!(bus.completed.iter().all(|(_, state)| *state == ParticipantState::Shutdown));
    assert_eq!(bus.get(0).system_state(), SystemState::Shutdown);
    assert!(handle.is_completed());

    // Both ran the same steps in the same order, and no step was skipped.
    let a = steps_a.lock().unwrap().clone();
    let b = steps_b.lock().unwrap().clone();
    let common = a.len().min(b.len());
    assert_eq!(a[..common], b[..common]);
    assert!(a.len().abs_diff(b.len()) <= 1);
    for (index, now) in a.iter().enumerate() {
        assert_eq!(*now, STEP * index as u32);
    }
}

#[test]
fn terminated_participant_rejects_events() {
    let (mut bus, handle, _, _) = two_participant_run();
    bus.run_until(|bus| bus.get(2).state() == ParticipantState::Running);

    handle.request_shutdown(bus.get(0));
    bus.flush(0);
    bus.run_until(|bus| bus.completed.len() == 2);

    let err = bus.get(1).handle(ParticipantEvent::Tick).unwrap_err();
    assert!(matches!(err, ParticipantError::Terminated { .. }));
}

#[test]
fn failing_step_handler_stops_the_system() {
    let (mut bus, _handle, _, _) = two_participant_run();
    bus.get(2)
        .set_simulation_step_handler(|_, now, _| {
            if now >= STEP * 3 {
                return Err(HandlerFault::new("model diverged"));
            }
            Ok(())
        })
        .unwrap();

    bus.run_until(|bus| bus.completed.len() == 2);

    let b = bus.get(2).status().unwrap();
    assert_eq!(b.state, ParticipantState::Shutdown);
    assert_eq!(bus.get(1).final_state(), Some(ParticipantState::Shutdown));
}

#[test]
fn panicking_step_handler_is_contained() {
    let (mut bus, _handle, _, _) = two_participant_run();
    bus.get(1)
        .set_simulation_step_handler(|_, _, _| panic!("division by zero in plant model"))
        .unwrap();

    bus.run_until(|bus| bus.completed.len() == 2);
    assert_eq!(bus.get(1).final_state(), Some(ParticipantState::Shutdown));
}

#[test]
fn can_frames_reach_the_other_participant() {
    let (mut bus, handle, _, _) = two_participant_run();

    let sender = bus.get(1).create_can_controller("CAN1", "PowerTrain").unwrap();
    bus.get(1).can(sender).unwrap().start().unwrap();
    let receiver = bus.get(2).create_can_controller("CAN1", "PowerTrain").unwrap();
    bus.get(2).can(receiver).unwrap().start().unwrap();
    bus.flush(1);
    bus.flush(2);

    let received = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&received);
    bus.get(2)
        .add_event_handler(receiver, EventFilter::rx(EventKind::CanFrame), move |_, _, event| {
            sink.lock().unwrap().push(event.clone());
            Ok(())
        })
        .unwrap();
    bus.get(1)
        .set_simulation_step_handler(move |participant, now, _| {
            if now == STEP * 2 {
                participant
                    .can(sender)
                    .and_then(|mut can| can.send_frame(CanFrame::new(0x12, vec![1, 2, 3]), Some(7)))
                    .map_err(|e| HandlerFault::new(e.to_string()))?;
            }
            Ok(())
        })
        .unwrap();

    bus.run_until(|_| !received.lock().unwrap().is_empty());
    handle.stop(bus.get(0));
    bus.flush(0);
    bus.run_until(|bus| bus.completed.len() == 2);

    let received = received.lock().unwrap();
    assert_eq!(received.len(), 1);
    let NetworkEvent::Can(CanEvent::Frame(frame)) = &received[0] else {
        panic!("expected a CAN frame, got {:?}", received[0]);
    };
    assert_eq!(frame.frame.can_id, 0x12);
    assert_eq!(frame.direction, TransmitDirection::Rx);
    assert_eq!(frame.user_context, Some(7));
    assert_eq!(frame.timestamp, STEP * 2);
}

#[test]
fn late_state_handlers_see_the_current_state() {
    let (mut bus, _handle, _, _) = two_participant_run();
    bus.run_until(|bus| bus.get(0).system_state() == SystemState::Running);

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    bus.get(0).add_system_state_handler(move |_, state| {
        sink.lock().unwrap().push(state);
        Ok(())
    });
    let statuses = Arc::new(Mutex::new(Vec::new()));
    let status_sink = Arc::clone(&statuses);
    bus.get(0).add_participant_status_handler(move |_, status| {
        status_sink.lock().unwrap().push(status.participant_name.clone());
        Ok(())
    });
    bus.flush(0);

    assert_eq!(*seen.lock().unwrap(), vec![SystemState::Running]);
    let mut names = statuses.lock().unwrap().clone();
    names.sort();
    assert_eq!(names, vec!["A".to_string(), "B".to_string()]);
}

#[test]
fn controller_kind_mismatch_on_a_network_is_reported() {
    let (mut bus, _handle, _, _) = two_participant_run();

    bus.get(1).create_can_controller("C1", "Body").unwrap();
    bus.get(2).create_lin_controller("L1", "Body").unwrap();
    bus.flush(1);
    bus.flush(2);
    bus.deliver();

    assert!(
        bus.logs.iter().any(|m| m == "controller 'C1' of 'A' is CAN, but network 'Body' is LIN here"),
        "{:?}",
        bus.logs
    );
    assert!(bus.logs.iter().any(|m| m.starts_with("controller 'L1' of 'B' is LIN")));
}

#[test]
fn faulting_subscriber_does_not_starve_the_system_controller() {
    let mut bus = Bus::new();
    let controller = bus.join(ParticipantConfig::observer("SystemController"));
    let offline = || HandlerFault::new("dashboard offline");
    bus.get(controller).add_participant_status_handler(move |_, _| Err(offline()));
    bus.get(controller).add_system_state_handler(move |_, _| Err(offline()));
    let handle = system_controller::attach(
        bus.get(controller),
        SystemController::new(["A", "B"], Some("A".to_string()), ControlMode::Automatic),
    );
    bus.flush(controller);

    let a = bus.join(master("A"));
    let b = bus.join(ParticipantConfig::synchronized("B", STEP));
    let steps = record_steps(bus.get(a));
    for index in [a, b] {
        bus.get(index).start().unwrap();
        bus.flush(index);
    }

    bus.run_until(|_| steps.lock().unwrap().len() >= 3);
    assert_eq!(bus.get(controller).system_state(), SystemState::Running);
    assert!(bus.logs.iter().any(|m| m.contains("dashboard offline")));

    handle.stop(bus.get(controller));
    bus.flush(controller);
    bus.run_until(|bus| bus.completed.len() == 2);
    assert!(handle.is_completed());
}
