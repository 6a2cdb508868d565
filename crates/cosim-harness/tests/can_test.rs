//! CAN scenarios on trivial and simulated networks.
//!
//! On a trivial network the participants exchange frames directly: the
//! sender gets one acknowledgement and every other controller one frame. On
//! a simulated network every request goes through the network simulator,
//! which decides who receives what.

use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex},
    time::Duration,
};

use cosim_core::{
    ControlMode, EventFilter, EventKind, EventProducer, HandlerFault, ParticipantConfig,
    SimulatedController, SimulatedNetwork, netsim::SimulatedCanController,
};
use cosim_harness::{HarnessError, Scenario, Simulation};
use cosim_proto::{
    ControllerDescriptor, ControllerHandle, NetworkEvent, NetworkKind, TransmitDirection,
    payloads::can::{
        CanEvent, CanFrame, CanFrameEvent, CanFrameRequest, CanFrameTransmitEvent,
        CanTransmitStatus,
    },
};

const STEP: Duration = Duration::from_millis(1);

type Log<T> = Arc<Mutex<Vec<T>>>;

fn master(name: &str) -> ParticipantConfig {
    ParticipantConfig { is_sync_master: true, ..ParticipantConfig::synchronized(name, STEP) }
}

fn fault(err: impl ToString) -> HandlerFault {
    HandlerFault::new(err.to_string())
}

/// Observed CAN traffic of one controller.
#[derive(Default, Clone)]
struct Traffic {
    frames: Log<CanFrameEvent>,
    acks: Log<CanFrameTransmitEvent>,
}

/// Create a started controller on `network` and record its traffic.
fn attach_can(
    sim: &mut Simulation,
    index: usize,
    network: &str,
) -> Result<(ControllerHandle, Traffic), HarnessError> {
    let traffic = Traffic::default();
    let frames = Arc::clone(&traffic.frames);
    let acks = Arc::clone(&traffic.acks);
    let network = network.to_string();
    let handle = sim.operate(index, move |p| {
        let can = p.create_can_controller("CAN1", &network)?;
        p.can(can)?.start()?;
        p.add_event_handler(can, EventFilter::rx(EventKind::CanFrame), move |_, _, event| {
            if let NetworkEvent::Can(CanEvent::Frame(frame)) = event {
                frames.lock().unwrap().push(frame.clone());
            }
            Ok(())
        })?;
        p.add_event_handler(can, EventFilter::any(EventKind::CanFrameTransmit), move |_, _, event| {
            if let NetworkEvent::Can(CanEvent::FrameTransmit(ack)) = event {
                acks.lock().unwrap().push(*ack);
            }
            Ok(())
        })?;
        Ok(can)
    })?;
    Ok((handle, traffic))
}

/// Run a trivial network with one writer sending `"CAN 0"` in its first
/// step and `readers` listening.
fn trivial_run(readers: &[&str]) -> (Simulation, Traffic, Vec<Traffic>) {
    let writer = Arc::new(Mutex::new(None));
    let listeners: Log<Traffic> = Log::default();

    let mut names = vec!["CanWriter"];
    names.extend_from_slice(readers);
    let mut scenario = Scenario::new()
        .system_controller(names.clone(), Some("CanWriter"), ControlMode::Automatic)
        .participant_with(master("CanWriter"), {
            let writer = Arc::clone(&writer);
            move |sim, index| {
                let (can, traffic) = attach_can(sim, index, "CAN1")?;
                *writer.lock().unwrap() = Some(traffic);
                sim.set_step_handler(index, move |p, now, _| {
                    if now.is_zero() {
                        let frame = CanFrame::new(17, b"CAN 0".to_vec());
                        p.can(can).and_then(|mut can| can.send_frame(frame, None)).map_err(fault)?;
                    }
                    Ok(())
                })
            }
        });
    for reader in readers {
        let listeners = Arc::clone(&listeners);
        scenario = scenario.participant_with(
            ParticipantConfig::synchronized(*reader, STEP),
            move |sim, index| {
                let (_, traffic) = attach_can(sim, index, "CAN1")?;
                listeners.lock().unwrap().push(traffic);
                Ok(())
            },
        );
    }

    let count = names.len();
    let mut sim = scenario
        .until(move |sim| (1..=count).all(|i| sim.step_times(i).len() >= 5))
        .run()
        .unwrap();
    sim.control(|controller, p| controller.stop(p)).unwrap();
    sim.run_until(1_000, |sim| sim.completed_count() == count).unwrap();

    let writer = writer.lock().unwrap().take().unwrap();
    let listeners = listeners.lock().unwrap().clone();
    (sim, writer, listeners)
}

#[test]
fn trivial_frame_reaches_the_reader_once() {
    let (_, writer, readers) = trivial_run(&["CanReader"]);

    let frames = readers[0].frames.lock().unwrap();
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].frame.can_id, 17);
    assert_eq!(frames[0].frame.data, b"CAN 0");
    assert_eq!(frames[0].direction, TransmitDirection::Rx);
    assert_eq!(frames[0].timestamp, Duration::ZERO);

    let acks = writer.acks.lock().unwrap();
    assert_eq!(acks.len(), 1);
    assert_eq!(acks[0].status, CanTransmitStatus::Transmitted);
    assert_eq!(acks[0].can_id, 17);
}

#[test]
fn trivial_echo_skips_the_sender() {
    let (_, writer, readers) = trivial_run(&["CanReader", "CanMonitor"]);

    assert!(writer.frames.lock().unwrap().is_empty());
    assert_eq!(writer.acks.lock().unwrap().len(), 1);
    for reader in &readers {
        assert_eq!(reader.frames.lock().unwrap().len(), 1);
        assert!(reader.acks.lock().unwrap().is_empty());
    }
}

#[derive(Default)]
struct Counts {
    provided: BTreeMap<ControllerDescriptor, usize>,
    requests: usize,
}

/// Network that acknowledges every frame to its sender and delivers it to
/// every controller on the network, the sender included.
struct BroadcastNetwork {
    counts: Arc<Mutex<Counts>>,
    producer: Option<EventProducer>,
    controllers: Log<ControllerDescriptor>,
}

struct BroadcastController {
    me: ControllerDescriptor,
    counts: Arc<Mutex<Counts>>,
    producer: EventProducer,
    all: Log<ControllerDescriptor>,
}

impl SimulatedNetwork for BroadcastNetwork {
    fn set_event_producer(&mut self, producer: EventProducer) {
        self.producer = Some(producer);
    }

    fn provide_simulated_controller(
        &mut self,
        descriptor: ControllerDescriptor,
    ) -> Option<SimulatedController> {
        *self.counts.lock().unwrap().provided.entry(descriptor).or_default() += 1;
        self.controllers.lock().unwrap().push(descriptor);
        Some(SimulatedController::Can(Box::new(BroadcastController {
            me: descriptor,
            counts: Arc::clone(&self.counts),
            producer: self.producer.clone()?,
            all: Arc::clone(&self.controllers),
        })))
    }

    fn simulated_controller_removed(&mut self, descriptor: ControllerDescriptor) {
        self.controllers.lock().unwrap().retain(|d| *d != descriptor);
    }
}

impl SimulatedCanController for BroadcastController {
    fn on_frame_request(&mut self, request: &CanFrameRequest) {
        self.counts.lock().unwrap().requests += 1;
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

const FRAMES_PER_STEP: u64 = 5;
const SENDING_STEPS: u32 = 5;

/// Send `FRAMES_PER_STEP` frames in each of the first `SENDING_STEPS`
/// steps. The user context encodes sender and sequence number.
fn sender(
    sim: &mut Simulation,
    index: usize,
    can: ControllerHandle,
) -> Result<(), HarnessError> {
    let tag = index as u64 * 1_000;
    let mut sequence = 0;
    sim.set_step_handler(index, move |p, now, _| {
        if now < STEP * SENDING_STEPS {
            for _ in 0..FRAMES_PER_STEP {
                let frame = CanFrame::new(0x100 + index as u32, vec![sequence as u8]);
                p.can(can)
                    .and_then(|mut can| can.send_frame(frame, Some(tag + sequence)))
                    .map_err(fault)?;
                sequence += 1;
            }
        }
        Ok(())
    })
}

#[test]
fn simulated_network_sees_every_request_once() {
    let names = ["NetworkSimulator", "CanNode1", "CanNode2", "CanNode3"];
    let counts = Arc::new(Mutex::new(Counts::default()));
    let traffic: Arc<Mutex<BTreeMap<usize, Traffic>>> = Arc::default();

    let mut scenario = Scenario::new().system_controller(
        names,
        Some("NetworkSimulator"),
        ControlMode::Automatic,
    );
    for (position, name) in names.into_iter().enumerate() {
        let config =
            if position == 0 { master(name) } else { ParticipantConfig::synchronized(name, STEP) };
        let counts = Arc::clone(&counts);
        let traffic = Arc::clone(&traffic);
        scenario = scenario.participant_with(config, move |sim, index| {
            if position == 0 {
                let network = BroadcastNetwork {
                    counts,
                    producer: None,
                    controllers: Log::default(),
                };
                sim.operate(index, |p| {
                    p.simulate_network("CAN1", NetworkKind::Can, Box::new(network))
                })?;
            }
            let (can, observed) = attach_can(sim, index, "CAN1")?;
            traffic.lock().unwrap().insert(index, observed);
            sender(sim, index, can)
        });
    }

    let expected = names.len() * (FRAMES_PER_STEP as usize) * (SENDING_STEPS as usize);
    let observed = Arc::clone(&traffic);
    let mut sim = scenario
        .until(move |_| {
            observed.lock().unwrap().values().all(|t| t.frames.lock().unwrap().len() >= expected)
        })
        .run()
        .unwrap();
    sim.control(|controller, p| controller.stop(p)).unwrap();
    sim.run_until(1_000, |sim| sim.completed_count() == names.len()).unwrap();

    let counts = counts.lock().unwrap();
    assert_eq!(counts.requests, 100);
    assert_eq!(counts.provided.len(), 4);
    assert!(counts.provided.values().all(|&n| n == 1));
    assert_eq!(sim.participant(1).simulated_controller_count("CAN1"), 4);

    let traffic = traffic.lock().unwrap();
    assert_eq!(traffic.len(), 4);
    for observed in traffic.values() {
        let frames = observed.frames.lock().unwrap();
        assert_eq!(frames.len(), 100);
        assert_eq!(observed.acks.lock().unwrap().len(), 25);

        // Frames of one sender arrive in the order they were requested.
        let mut last: BTreeMap<u64, u64> = BTreeMap::new();
        for frame in frames.iter() {
            let context = frame.user_context.unwrap();
            let (sender, sequence) = (context / 1_000, context % 1_000);
            if let Some(previous) = last.insert(sender, sequence) {
                assert!(sequence > previous, "sender {sender}: {sequence} after {previous}");
            }
        }
        assert_eq!(last.len(), 4);
    }
}
