//! Fuzz target for the participant lifecycle
//!
//! # Strategy
//!
//! - Drive one lifecycle with arbitrary commands, system states and local
//!   operations, in any order
//! - Complete every requested callback right away, failing it on demand
//!
//! # Invariants
//!
//! - Every published state is a regular transition from the previous one
//! - Nothing is published after the lifecycle completed
//! - `Completed` carries the state that was published last

#![no_main]

use std::time::Duration;

use arbitrary::Arbitrary;
use cosim_core::{
    lifecycle::{LifecycleAction, LifecycleService},
    system_state::is_valid_transition,
    HandlerFault, LifecycleConfig, OperationMode,
};
use cosim_proto::{ParticipantCommandKind, ParticipantState, SystemCommand, SystemState};
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
enum Op {
    Start,
    Command(Cmd),
    Participant { reinitialize: bool },
    System(Sys),
    Stop,
    Pause,
    Continue,
    ReportError,
    Abort,
    HandlerFault,
    CompleteCommunicationReady,
}

#[derive(Debug, Clone, Copy, Arbitrary)]
enum Cmd {
    Run,
    Stop,
    Shutdown,
    PrepareColdswap,
    ExecuteColdswap,
    AbortSimulation,
}

#[derive(Debug, Clone, Copy, Arbitrary)]
enum Sys {
    Idle,
    Initialized,
    Running,
    Stopped,
}

#[derive(Debug, Arbitrary)]
struct Input {
    sync_master: bool,
    autonomous: bool,
    allow_coldswap: bool,
    async_communication_ready: bool,
    /// Bit i fails the i-th callback
    failures: u64,
    ops: Vec<Op>,
}

struct Checker {
    last: ParticipantState,
    completed: bool,
    callbacks: u32,
    failures: u64,
}

impl Checker {
    /// Check `actions` and run the callbacks they request.
    fn apply(&mut self, lifecycle: &mut LifecycleService, actions: Vec<LifecycleAction>, now: Duration) {
        for action in actions {
            match action {
                LifecycleAction::PublishStatus(status) => {
                    assert!(!self.completed, "published {} after completion", status.state);
                    assert!(
                        is_valid_transition(self.last, status.state),
                        "{} -> {}",
                        self.last,
                        status.state
                    );
                    self.last = status.state;
                },
                LifecycleAction::Completed { final_state } => {
                    assert!(!self.completed, "completed twice");
                    assert_eq!(final_state, self.last);
                    self.completed = true;
                },
                LifecycleAction::Invoke(hook) => {
                    let fail = self.failures & (1 << (self.callbacks % 64)) != 0;
                    self.callbacks += 1;
                    let result = if fail { Err(HandlerFault::new("fuzz")) } else { Ok(()) };
                    let actions = lifecycle.hook_completed(hook, result, now);
                    self.apply(lifecycle, actions, now);
                },
                _ => {},
            }
        }
    }
}

fuzz_target!(|input: Input| {
    let config = LifecycleConfig {
        operation_mode: if input.autonomous {
            OperationMode::Autonomous
        } else {
            OperationMode::Coordinated
        },
        allow_coldswap: input.allow_coldswap,
        ..LifecycleConfig::default()
    };
    let mut lifecycle = LifecycleService::new("Fuzzed", config, input.sync_master);
    lifecycle.set_async_communication_ready(input.async_communication_ready);

    let mut checker = Checker {
        last: ParticipantState::Invalid,
        completed: false,
        callbacks: 0,
        failures: input.failures,
    };

    for (tick, op) in input.ops.into_iter().enumerate() {
        let now = Duration::from_millis(tick as u64);
        let actions = match op {
            Op::Start => lifecycle.start(now).unwrap_or_default(),
            Op::Command(cmd) => {
                let command = match cmd {
                    Cmd::Run => SystemCommand::Run,
                    Cmd::Stop => SystemCommand::Stop,
                    Cmd::Shutdown => SystemCommand::Shutdown,
                    Cmd::PrepareColdswap => SystemCommand::PrepareColdswap,
                    Cmd::ExecuteColdswap => SystemCommand::ExecuteColdswap,
                    Cmd::AbortSimulation => SystemCommand::AbortSimulation,
                };
                lifecycle.on_system_command(command, now)
            },
            Op::Participant { reinitialize } => {
                let kind = if reinitialize {
                    ParticipantCommandKind::ReInitialize
                } else {
                    ParticipantCommandKind::Initialize
                };
                lifecycle.on_participant_command(kind, now)
            },
            Op::System(sys) => {
                let state = match sys {
                    Sys::Idle => SystemState::Idle,
                    Sys::Initialized => SystemState::Initialized,
                    Sys::Running => SystemState::Running,
                    Sys::Stopped => SystemState::Stopped,
                };
                lifecycle.on_system_state(state, now)
            },
            Op::Stop => lifecycle.stop("fuzz", now).unwrap_or_default(),
            Op::Pause => lifecycle.pause("fuzz", now).unwrap_or_default(),
            Op::Continue => lifecycle.continue_simulation(now).unwrap_or_default(),
            Op::ReportError => lifecycle.report_error("fuzz", now),
            Op::Abort => lifecycle.abort("fuzz", now),
            Op::HandlerFault => lifecycle.handler_fault("fuzz", now),
            Op::CompleteCommunicationReady => {
                lifecycle.complete_communication_ready(now).unwrap_or_default()
            },
        };
        checker.apply(&mut lifecycle, actions, now);
        assert_eq!(lifecycle.state(), checker.last);
    }
});
