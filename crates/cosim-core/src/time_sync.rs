//! Simulation time synchronization.
//!
//! Synchronized participants step in lock-step through a distributed barrier:
//! each participant announces the start of its next step with a
//! [`NextSimTask`], and grants itself that step only once every known peer
//! has announced a time point at or beyond it. A peer announces `k * d` only
//! after it completed the step at `(k - 1) * d`, so no participant can run
//! ahead of the slowest one.
//!
//! Autonomous participants do not take part in the barrier. A worker tick
//! runs their step handler with monotonically increasing simulated time and
//! no guarantee relative to anybody else.

use std::{collections::BTreeMap, time::Duration};

use cosim_proto::NextSimTask;

use crate::{
    config::{StepCompletion, TimeSyncConfig, TimeSyncMode},
    error::TimeSyncError,
    log::LogRecord,
};

/// State of the stepping machinery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeSyncState {
    /// Not prepared yet
    Inactive,
    /// Prepared, waiting for the lifecycle to start running
    Prepared,
    /// Granting steps
    Running,
    /// Steps suspended
    Paused,
    /// Barrier cancelled
    Stopped,
}

/// Actions returned by the time-sync service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimeSyncAction {
    /// Broadcast our next step to the synchronized peers
    Announce(NextSimTask),
    /// Run the step handler
    ExecuteStep {
        /// Start of the step
        now: Duration,
        /// Length of the step
        duration: Duration,
    },
    /// The step handler exceeded the hard watchdog limit
    WatchdogExpired {
        /// Wall-clock time spent in the step so far
        elapsed: Duration,
    },
    /// Log a message
    Log(LogRecord),
}

#[derive(Debug, Clone, Copy)]
struct StepInProgress {
    started: Duration,
    warned: bool,
    expired: bool,
}

/// Time synchronization of one participant.
#[derive(Debug, Clone)]
pub struct TimeSyncService {
    config: TimeSyncConfig,
    state: TimeSyncState,
    now: Duration,
    step: Option<StepInProgress>,
    peers: BTreeMap<String, Duration>,
}

impl TimeSyncService {
    /// Inactive service.
    pub fn new(config: TimeSyncConfig) -> Self {
        Self {
            config,
            state: TimeSyncState::Inactive,
            now: Duration::ZERO,
            step: None,
            peers: BTreeMap::new(),
        }
    }

    /// Current state.
    pub fn state(&self) -> TimeSyncState {
        self.state
    }

    /// Configuration.
    pub fn config(&self) -> &TimeSyncConfig {
        &self.config
    }

    /// Simulated time of the current (or next) step. Events produced while a
    /// step runs are stamped with this time.
    pub fn now(&self) -> Duration {
        self.now
    }

    /// Whether the step handler is currently running.
    pub fn is_executing(&self) -> bool {
        self.step.is_some()
    }

    /// Whether this participant takes part in the barrier.
    pub fn is_synchronized(&self) -> bool {
        self.config.mode == TimeSyncMode::Synchronized
    }

    /// Last time point announced by `peer`.
    pub fn peer_time(&self, peer: &str) -> Option<Duration> {
        self.peers.get(peer).copied()
    }

    /// Reset to time zero and announce the first step.
    ///
    /// Known peers are set back to time zero as well; their announcements
    /// from a previous run must not release the barrier of this one.
    pub fn prepare(&mut self) -> Vec<TimeSyncAction> {
        self.state = TimeSyncState::Prepared;
        self.now = Duration::ZERO;
        self.step = None;
        for time_point in self.peers.values_mut() {
            *time_point = Duration::ZERO;
        }
        if self.is_synchronized() {
            vec![TimeSyncAction::Announce(self.next_task())]
        } else {
            Vec::new()
        }
    }

    /// Start granting steps.
    pub fn start(&mut self, wall: Duration) -> Vec<TimeSyncAction> {
        self.state = TimeSyncState::Running;
        self.try_grant(wall)
    }

    /// Suspend granting steps. A step already running may still complete.
    pub fn pause(&mut self) {
        if self.state == TimeSyncState::Running {
            self.state = TimeSyncState::Paused;
        }
    }

    /// Resume after [`Self::pause`].
    pub fn resume(&mut self, wall: Duration) -> Vec<TimeSyncAction> {
        if self.state != TimeSyncState::Paused {
            return Vec::new();
        }
        self.state = TimeSyncState::Running;
        self.try_grant(wall)
    }

    /// Cancel the barrier. Stragglers are not waited for.
    pub fn stop(&mut self) {
        self.state = TimeSyncState::Stopped;
        self.step = None;
    }

    /// A peer announced its next step.
    pub fn on_next_sim_task(
        &mut self,
        peer: &str,
        task: NextSimTask,
        wall: Duration,
    ) -> Vec<TimeSyncAction> {
        if !self.is_synchronized() {
            return Vec::new();
        }
        self.peers.insert(peer.to_string(), task.time_point);
        self.try_grant(wall)
    }

    /// A peer left; it no longer holds back the barrier.
    pub fn on_peer_disconnected(&mut self, peer: &str, wall: Duration) -> Vec<TimeSyncAction> {
        if self.peers.remove(peer).is_none() {
            return Vec::new();
        }
        self.try_grant(wall)
    }

    /// The step handler returned.
    ///
    /// With implicit completion this completes the step; with explicit
    /// completion the step stays open until [`Self::complete_step`].
    pub fn step_returned(&mut self, wall: Duration) -> Vec<TimeSyncAction> {
        let mut actions = self.check_watchdog(wall);
        if self.step.is_some() && self.config.completion == StepCompletion::Implicit {
            actions.extend(self.finish_step(wall));
        }
        actions
    }

    /// Complete the running step explicitly.
    ///
    /// # Errors
    ///
    /// - `TimeSyncError::NoStepInProgress` if no step is running
    pub fn complete_step(&mut self, wall: Duration) -> Result<Vec<TimeSyncAction>, TimeSyncError> {
        if self.state == TimeSyncState::Stopped {
            return Ok(vec![TimeSyncAction::Log(LogRecord::debug(
                "step completed after stop, ignoring",
            ))]);
        }
        if self.step.is_none() {
            return Err(TimeSyncError::NoStepInProgress);
        }
        let mut actions = self.check_watchdog(wall);
        actions.extend(self.finish_step(wall));
        Ok(actions)
    }

    /// Check the running step against the watchdog limits.
    pub fn check_watchdog(&mut self, wall: Duration) -> Vec<TimeSyncAction> {
        let (Some(watchdog), Some(step)) = (self.config.watchdog, self.step.as_mut()) else {
            return Vec::new();
        };

        let elapsed = wall.saturating_sub(step.started);
        if elapsed > watchdog.error_timeout && !step.expired {
            step.expired = true;
            step.warned = true;
            return vec![TimeSyncAction::WatchdogExpired { elapsed }];
        }
        if elapsed > watchdog.warn_timeout && !step.warned {
            step.warned = true;
            return vec![TimeSyncAction::Log(LogRecord::warn(format!(
                "simulation step at {:?} running for {elapsed:?}",
                self.now
            )))];
        }
        Vec::new()
    }

    /// Run the next step of an autonomous participant.
    pub fn on_worker_tick(&mut self, wall: Duration) -> Vec<TimeSyncAction> {
        if self.is_synchronized() || self.state != TimeSyncState::Running || self.step.is_some() {
            return Vec::new();
        }
        self.begin_step(wall)
    }

    fn finish_step(&mut self, wall: Duration) -> Vec<TimeSyncAction> {
        self.step = None;
        self.now += self.config.step_duration;
        if !self.is_synchronized() {
            return Vec::new();
        }
        let mut actions = vec![TimeSyncAction::Announce(self.next_task())];
        actions.extend(self.try_grant(wall));
        actions
    }

    fn try_grant(&mut self, wall: Duration) -> Vec<TimeSyncAction> {
        if !self.is_synchronized() || self.state != TimeSyncState::Running || self.step.is_some() {
            return Vec::new();
        }
        if self.peers.values().any(|&peer| peer < self.now) {
            return Vec::new();
        }
        self.begin_step(wall)
    }

    fn begin_step(&mut self, wall: Duration) -> Vec<TimeSyncAction> {
        self.step = Some(StepInProgress { started: wall, warned: false, expired: false });
        vec![TimeSyncAction::ExecuteStep { now: self.now, duration: self.config.step_duration }]
    }

    fn next_task(&self) -> NextSimTask {
        NextSimTask { time_point: self.now, duration: self.config.step_duration }
    }
}
