//! Fuzz target for the system state aggregation
//!
//! # Invariants
//!
//! - Arbitrary status streams and disconnects never panic the tracker
//! - The system is `Invalid` while a required participant is unknown
//! - `Shutdown` is only reported when every required participant is shut
//!   down

#![no_main]

use std::time::Duration;

use arbitrary::Arbitrary;
use cosim_core::{MonitorAction, SystemStateTracker};
use cosim_proto::{ParticipantState, ParticipantStatus, SystemState};
use libfuzzer_sys::fuzz_target;

const NAMES: [&str; 4] = ["A", "B", "C", "Observer"];

const STATES: [ParticipantState; 16] = [
    ParticipantState::Invalid,
    ParticipantState::Idle,
    ParticipantState::Initializing,
    ParticipantState::Initialized,
    ParticipantState::Running,
    ParticipantState::Paused,
    ParticipantState::Stopping,
    ParticipantState::Stopped,
    ParticipantState::ColdswapPrepare,
    ParticipantState::ColdswapReady,
    ParticipantState::ColdswapShutdown,
    ParticipantState::ColdswapIgnored,
    ParticipantState::Error,
    ParticipantState::ShuttingDown,
    ParticipantState::Shutdown,
    ParticipantState::Aborting,
];

#[derive(Debug, Arbitrary)]
enum Op {
    Status { participant: u8, state: u8 },
    Disconnect { participant: u8 },
}

fn name(index: u8) -> &'static str {
    NAMES[usize::from(index) % NAMES.len()]
}

fuzz_target!(|ops: Vec<Op>| {
    let mut tracker = SystemStateTracker::new();
    let _ = tracker.set_required(["A", "B", "C"]);

    for op in ops {
        let actions = match op {
            Op::Status { participant, state } => {
                let state = STATES[usize::from(state) % STATES.len()];
                tracker.on_status(ParticipantStatus {
                    state,
                    enter_reason: "fuzz".to_string(),
                    enter_time: Duration::ZERO,
                    refresh_time: Duration::ZERO,
                    ..ParticipantStatus::unknown(name(participant))
                })
            },
            Op::Disconnect { participant } => tracker.on_participant_disconnected(name(participant)),
        };

        for action in actions {
            if let MonitorAction::SystemStateChanged(state) = action {
                assert_eq!(state, tracker.system_state());
            }
        }

        let states: Vec<ParticipantState> =
            ["A", "B", "C"].iter().map(|n| tracker.participant_state(n)).collect();
        if states.contains(&ParticipantState::Invalid) {
            assert_eq!(tracker.system_state(), SystemState::Invalid);
        }
        if tracker.system_state() == SystemState::Shutdown {
            assert!(states.iter().all(|s| *s == ParticipantState::Shutdown));
        }
    }
});
