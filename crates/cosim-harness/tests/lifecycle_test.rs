//! Orchestrated runs: automatic workflow, participant loss and restart.

use std::time::Duration;

use cosim_core::{Command, ControlMode, ParticipantConfig};
use cosim_harness::{Scenario, Simulation};
use cosim_proto::{ParticipantState, SystemState};
use serde::Serialize;

const STEP: Duration = Duration::from_millis(1);

const A: usize = 1;
const B: usize = 2;

fn master(name: &str) -> ParticipantConfig {
    ParticipantConfig { is_sync_master: true, ..ParticipantConfig::synchronized(name, STEP) }
}

/// A (sync master) and B under an automatic system controller, running
/// until both took `steps` steps.
fn running_pair(steps: usize) -> Simulation {
    Scenario::new()
        .system_controller(["A", "B"], Some("A"), ControlMode::Automatic)
        .participant(master("A"))
        .participant(ParticipantConfig::synchronized("B", STEP))
        .until(move |sim| sim.step_times(A).len() >= steps && sim.step_times(B).len() >= steps)
        .run()
        .unwrap()
}

#[derive(Serialize)]
struct Trace {
    system_states: Vec<SystemState>,
    commands: Vec<String>,
}

#[test]
fn automatic_workflow_trace() {
    let sim = Scenario::new()
        .system_controller(["A", "B"], Some("A"), ControlMode::Automatic)
        .participant(master("A"))
        .participant(ParticipantConfig::synchronized("B", STEP))
        .until(|sim| sim.step_times(A).len() >= 3 && sim.step_times(B).len() >= 3)
        .oracle(Box::new(|sim: &mut Simulation| {
            sim.control(|controller, p| controller.stop(p))?;
            sim.run_until(1_000, |sim| sim.completed_count() == 2)
        }))
        .run()
        .unwrap();

    assert_eq!(sim.completed(A), Some(ParticipantState::Shutdown));
    assert_eq!(sim.completed(B), Some(ParticipantState::Shutdown));
    assert!(sim.system_controller().unwrap().is_completed());

    let trace = Trace { system_states: sim.system_states(), commands: sim.commands() };
    insta::assert_json_snapshot!(trace);
}

#[test]
fn survivors_keep_stepping_after_a_participant_leaves() {
    let mut sim = running_pair(3);

    sim.disconnect(B, "process crashed").unwrap();
    assert_eq!(sim.completed(B), Some(ParticipantState::Shutdown));
    assert_eq!(sim.system_controller().unwrap().system_state(), SystemState::Invalid);

    let before = sim.step_times(A).len();
    sim.run_until(1_000, |sim| sim.step_times(A).len() >= before + 3).unwrap();

    // Without B the system stays invalid, so shutdown has to be explicit.
    sim.control(|controller, p| controller.stop(p)).unwrap();
    sim.run_until(1_000, |sim| sim.participant(A).state() == ParticipantState::Stopped).unwrap();
    sim.control(|controller, p| controller.execute(p, Command::Shutdown)).unwrap();
    sim.run_until(1_000, |sim| sim.completed(A).is_some()).unwrap();

    assert_eq!(sim.completed(A), Some(ParticipantState::Shutdown));
}

#[test]
fn restart_runs_from_time_zero() {
    let mut sim = running_pair(3);

    sim.control(|controller, p| controller.stop_and_restart(p)).unwrap();
    let restarts = |sim: &Simulation| sim.step_times(A).iter().filter(|t| t.is_zero()).count();
    sim.run_until(2_000, |sim| {
        let times = sim.step_times(A);
        let second_run = times.iter().rposition(|t| t.is_zero()).map_or(0, |i| times.len() - i);
        restarts(sim) == 2 && second_run >= 3
    })
    .unwrap();

    let commands = sim.commands();
    assert!(commands.contains(&"ReInitialize A".to_string()));
    assert!(commands.contains(&"ReInitialize B".to_string()));
    assert_eq!(commands.iter().filter(|c| *c == "Run").count(), 2);

    sim.control(|controller, p| controller.stop(p)).unwrap();
    sim.run_until(1_000, |sim| sim.completed_count() == 2).unwrap();
    assert_eq!(sim.completed(B), Some(ParticipantState::Shutdown));
}

#[test]
fn request_shutdown_stops_a_running_system_first() {
    let mut sim = running_pair(2);

    sim.control(|controller, p| controller.request_shutdown(p)).unwrap();
    sim.run_until(1_000, |sim| sim.completed_count() == 2).unwrap();

    let states = sim.system_states();
    let tail = &states[states.len() - 4..];
    assert_eq!(
        tail,
        [SystemState::Stopping, SystemState::Stopped, SystemState::ShuttingDown, SystemState::Shutdown]
    );
}
