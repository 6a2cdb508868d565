//! Property tests over random interleavings.
//!
//! `run_shuffled` delivers envelopes and ticks participants in a seeded
//! random order. Whatever the order, the step barrier and lifecycle
//! invariants must hold and frames of one sender must arrive in order.

use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex},
    time::Duration,
};

use cosim_core::{ControlMode, EventFilter, EventKind, HandlerFault, ParticipantConfig};
use cosim_harness::{InvariantRegistry, Simulation};
use cosim_proto::{
    NetworkEvent,
    payloads::can::{CanEvent, CanFrame},
};
use proptest::prelude::*;

const STEP: Duration = Duration::from_millis(1);
const MAX_MOVES: u64 = 200_000;

fn name(i: usize) -> String {
    format!("P{i}")
}

/// `n` synchronized participants under an automatic system controller.
/// Returns the simulation and the participants' indices.
fn participants(seed: u64, n: usize) -> (Simulation, Vec<usize>) {
    let mut sim = Simulation::new(seed).with_invariants(InvariantRegistry::standard());
    let names: Vec<String> = (0..n).map(name).collect();
    sim.add_system_controller(names.clone(), Some(names[0].as_str()), ControlMode::Automatic)
        .unwrap();

    let indices = names
        .iter()
        .enumerate()
        .map(|(i, name)| {
            let config = ParticipantConfig {
                is_sync_master: i == 0,
                ..ParticipantConfig::synchronized(name.as_str(), STEP)
            };
            sim.add_participant(config).unwrap()
        })
        .collect();
    (sim, indices)
}

fn stop_and_finish(sim: &mut Simulation, seed: u64, n: usize) {
    sim.control(|controller, p| controller.stop(p)).unwrap();
    sim.run_shuffled(seed, MAX_MOVES, |sim| sim.completed_count() == n).unwrap();
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn barrier_holds_under_any_interleaving(seed in any::<u64>(), n in 2usize..5) {
        let (mut sim, indices) = participants(seed, n);
        sim.start_all().unwrap();

        let stepped = indices.clone();
        sim.run_shuffled(seed, MAX_MOVES, |sim| {
            stepped.iter().all(|&i| sim.step_times(i).len() >= 5)
        })
        .unwrap();
        stop_and_finish(&mut sim, seed ^ 1, n);

        for &i in &indices {
            let times = sim.step_times(i);
            let expected: Vec<Duration> = (0..times.len()).map(|k| STEP * k as u32).collect();
            prop_assert_eq!(times, expected);
        }
        prop_assert!(sim.check_invariants().is_ok());
    }

    #[test]
    fn frames_of_one_sender_arrive_in_order(seed in any::<u64>(), frames in 1u8..20) {
        let (mut sim, indices) = participants(seed, 2);
        let received: Arc<Mutex<Vec<u8>>> = Arc::default();

        let (sender, receiver) = (indices[0], indices[1]);
        let can = sim
            .operate(sender, |p| {
                let can = p.create_can_controller("CAN1", "CAN1")?;
                p.can(can)?.start()?;
                Ok(can)
            })
            .unwrap();
        sim.set_step_handler(sender, move |p, now, _| {
            if now.is_zero() {
                for sequence in 0..frames {
                    p.can(can)
                        .and_then(|mut can| can.send_frame(CanFrame::new(1, vec![sequence]), None))
                        .map_err(|e| HandlerFault::new(e.to_string()))?;
                }
            }
            Ok(())
        })
        .unwrap();

        let log = Arc::clone(&received);
        sim.operate(receiver, |p| {
            let can = p.create_can_controller("CAN1", "CAN1")?;
            p.can(can)?.start()?;
            p.add_event_handler(can, EventFilter::rx(EventKind::CanFrame), move |_, _, event| {
                if let NetworkEvent::Can(CanEvent::Frame(frame)) = event {
                    log.lock().unwrap().extend_from_slice(&frame.frame.data);
                }
                Ok(())
            })
        })
        .unwrap();

        sim.start_all().unwrap();
        let expected = usize::from(frames);
        let observed = Arc::clone(&received);
        sim.run_shuffled(seed, MAX_MOVES, move |_| observed.lock().unwrap().len() >= expected)
            .unwrap();
        stop_and_finish(&mut sim, seed ^ 1, 2);

        let received = received.lock().unwrap().clone();
        let mut counts: BTreeMap<u8, usize> = BTreeMap::new();
        for sequence in &received {
            *counts.entry(*sequence).or_default() += 1;
        }
        prop_assert!(counts.values().all(|&c| c == 1));
        prop_assert_eq!(received, (0..frames).collect::<Vec<u8>>());
    }
}
