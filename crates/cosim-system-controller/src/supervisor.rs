//! Watches the run from outside the event loop.
//!
//! The runtime only reacts to envelopes and commands. Completion and the
//! init/shutdown deadlines are checked here, on a timer, and end the
//! runtime through its handle.

use std::time::{Duration, Instant};

use cosim_core::{Command, CosimError};
use cosim_participant::{SystemControllerHandle, runtime::RuntimeHandle};
use cosim_registry::SystemEnv;
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::mpsc,
};

/// How often deadlines and completion are checked.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Deadlines of one run.
#[derive(Debug, Clone, Copy)]
pub struct Deadlines {
    pub init: Duration,
    pub shutdown: Duration,
}

/// Outcome of one supervision check.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Verdict {
    Continue,
    Completed,
    Failed(CosimError),
}

/// Deadline bookkeeping, separate from the timer for testing.
#[derive(Debug)]
struct Watch {
    deadlines: Deadlines,
    started: Instant,
    shutdown_requested: Option<Instant>,
}

impl Watch {
    fn new(deadlines: Deadlines, started: Instant) -> Self {
        Self { deadlines, started, shutdown_requested: None }
    }

    fn shutdown_requested(&mut self, at: Instant) {
        self.shutdown_requested.get_or_insert(at);
    }

    fn check(&self, controller: &SystemControllerHandle, now: Instant) -> Verdict {
        if controller.is_completed() {
            return Verdict::Completed;
        }
        if let Err(err) = controller.check_init_timeout(now - self.started, self.deadlines.init) {
            return Verdict::Failed(err);
        }
        if let Some(since) = self.shutdown_requested {
            let waited = now - since;
            if waited >= self.deadlines.shutdown {
                return Verdict::Failed(CosimError::CoordinationTimeout {
                    what: format!("system state Shutdown (currently {})", controller.system_state()),
                    waited,
                });
            }
        }
        Verdict::Continue
    }
}

/// Check the run until it completes or a deadline passes, then end the
/// runtime accordingly.
///
/// Every message on `shutdown` starts the shutdown deadline (only the first
/// one counts).
pub async fn supervise(
    controller: SystemControllerHandle,
    runtime: RuntimeHandle<SystemEnv>,
    deadlines: Deadlines,
    mut shutdown: mpsc::UnboundedReceiver<()>,
) {
    let mut watch = Watch::new(deadlines, Instant::now());
    let mut ticker = tokio::time::interval(POLL_INTERVAL);

    loop {
        tokio::select! {
            _ = ticker.tick() => {},
            Some(()) = shutdown.recv() => watch.shutdown_requested(Instant::now()),
        }

        let result = match watch.check(&controller, Instant::now()) {
            Verdict::Continue => continue,
            Verdict::Completed => {
                tracing::info!("system shut down");
                runtime.exit()
            },
            Verdict::Failed(err) => {
                tracing::error!("{}", err);
                runtime.fail(err)
            },
        };
        if result.is_err() {
            tracing::debug!("runtime already ended");
        }
        return;
    }
}

/// Read operator commands from stdin and run them on the controller.
///
/// A `Shutdown` command also starts the shutdown deadline.
pub async fn read_commands(
    controller: SystemControllerHandle,
    runtime: RuntimeHandle<SystemEnv>,
    shutdown: mpsc::UnboundedSender<()>,
) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                tracing::info!("stdin closed, no more commands");
                return;
            },
            Err(e) => {
                tracing::warn!("reading stdin failed: {}", e);
                return;
            },
        };
        if line.trim().is_empty() {
            continue;
        }

        let command: Command = match line.parse() {
            Ok(command) => command,
            Err(e) => {
                tracing::warn!("{}", e);
                continue;
            },
        };
        tracing::info!("operator command: {:?}", command);

        if command == Command::Shutdown {
            let _ = shutdown.send(());
        }
        let controller = controller.clone();
        if runtime.run(move |participant| controller.execute(participant, command)).is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use cosim_core::{ControlMode, SystemController};
    use cosim_proto::SystemState;

    use super::*;

    const DEADLINES: Deadlines =
        Deadlines { init: Duration::from_secs(30), shutdown: Duration::from_secs(5) };

    fn handle(state: Option<SystemState>) -> SystemControllerHandle {
        let mut controller = SystemController::new(["A"], None, ControlMode::Interactive);
        if let Some(state) = state {
            controller.on_system_state(state);
        }
        SystemControllerHandle::new(controller)
    }

    #[test]
    fn waits_while_initializing() {
        let start = Instant::now();
        let watch = Watch::new(DEADLINES, start);
        let verdict = watch.check(&handle(None), start + Duration::from_secs(1));
        assert_eq!(verdict, Verdict::Continue);
    }

    #[test]
    fn init_deadline_fails_the_run() {
        let start = Instant::now();
        let watch = Watch::new(DEADLINES, start);

        let Verdict::Failed(err) = watch.check(&handle(None), start + Duration::from_secs(31))
        else {
            panic!("expected a failure");
        };
        assert!(matches!(err, CosimError::CoordinationTimeout { .. }));
        assert_eq!(err.exit_code(), cosim_core::EXIT_RUNTIME);
    }

    #[test]
    fn shutdown_deadline_counts_from_the_first_request() {
        let start = Instant::now();
        let controller = handle(Some(SystemState::Initialized));
        let mut watch = Watch::new(DEADLINES, start);

        watch.shutdown_requested(start);
        watch.shutdown_requested(start + Duration::from_secs(4));

        assert_eq!(watch.check(&controller, start + Duration::from_secs(4)), Verdict::Continue);
        assert!(matches!(
            watch.check(&controller, start + Duration::from_secs(5)),
            Verdict::Failed(CosimError::CoordinationTimeout { .. })
        ));
    }

    #[test]
    fn completion_wins_over_deadlines() {
        let start = Instant::now();
        let watch = Watch::new(DEADLINES, start);
        let verdict = watch.check(&handle(Some(SystemState::Shutdown)), start + Duration::from_secs(60));
        assert_eq!(verdict, Verdict::Completed);
    }
}
