//! System state tracking.
//!
//! Every participant (lifecycle or not) keeps a [`SystemStateTracker`] fed
//! with the statuses it observes on the bus. The tracker validates each
//! participant transition, stores the latest status per participant, and
//! derives the aggregate [`SystemState`] over the required participants of
//! the current workflow.
//!
//! The system enters a settled state (`Idle`, `Initialized`, `Running`,
//! `Stopped`, `Shutdown`) once every required participant is in it, and the
//! matching in-progress state (`Initializing`, `Stopping`, `ShuttingDown`) as
//! soon as the first one moves on. `Error` and `Aborting` win over
//! everything.

use std::collections::{BTreeMap, BTreeSet};

use cosim_proto::{ParticipantState, ParticipantStatus, SystemState};

use crate::log::LogRecord;

/// Actions returned by the tracker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonitorAction {
    /// A participant's status changed
    ParticipantStatusChanged(ParticipantStatus),
    /// The aggregate system state changed
    SystemStateChanged(SystemState),
    /// Log a message
    Log(LogRecord),
}

/// Aggregates participant statuses into the system state.
#[derive(Debug, Clone)]
pub struct SystemStateTracker {
    required: BTreeSet<String>,
    statuses: BTreeMap<String, ParticipantStatus>,
    system_state: SystemState,
}

impl Default for SystemStateTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemStateTracker {
    /// Tracker with no required participants.
    pub fn new() -> Self {
        Self {
            required: BTreeSet::new(),
            statuses: BTreeMap::new(),
            system_state: SystemState::Invalid,
        }
    }

    /// Current system state.
    pub fn system_state(&self) -> SystemState {
        self.system_state
    }

    /// Required participant names, sorted.
    pub fn required(&self) -> impl Iterator<Item = &str> {
        self.required.iter().map(String::as_str)
    }

    /// Latest status of `name`.
    pub fn status(&self, name: &str) -> Option<&ParticipantStatus> {
        self.statuses.get(name)
    }

    /// Latest state of `name`, `Invalid` if unknown.
    pub fn participant_state(&self, name: &str) -> ParticipantState {
        self.statuses.get(name).map_or(ParticipantState::Invalid, |s| s.state)
    }

    /// All known statuses, sorted by participant name.
    pub fn statuses(&self) -> impl Iterator<Item = &ParticipantStatus> {
        self.statuses.values()
    }

    /// Replace the set of required participants.
    pub fn set_required<I, S>(&mut self, names: I) -> Vec<MonitorAction>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required = names.into_iter().map(Into::into).collect();
        self.recompute()
    }

    /// Record a status update.
    ///
    /// An unexpected transition is logged but still applied. Updates for a
    /// participant that already reached `Shutdown` are ignored.
    pub fn on_status(&mut self, status: ParticipantStatus) -> Vec<MonitorAction> {
        let previous = self.participant_state(&status.participant_name);
        let mut actions = Vec::new();

        if previous == ParticipantState::Shutdown {
            actions.push(MonitorAction::Log(LogRecord::debug(format!(
                "ignoring status {} of '{}' after shutdown",
                status.state, status.participant_name
            ))));
            return actions;
        }

        if previous == status.state {
            // Same state again: keep the newer refresh time, nothing to announce.
            self.statuses.insert(status.participant_name.clone(), status);
            return actions;
        }

        if !is_valid_transition(previous, status.state) {
            actions.push(MonitorAction::Log(LogRecord::warn(format!(
                "unexpected transition of '{}': {previous} -> {}",
                status.participant_name, status.state
            ))));
        }

        self.statuses.insert(status.participant_name.clone(), status.clone());
        actions.push(MonitorAction::ParticipantStatusChanged(status));
        actions.extend(self.recompute());
        actions
    }

    /// Forget a participant that left the bus.
    pub fn on_participant_disconnected(&mut self, name: &str) -> Vec<MonitorAction> {
        if self.statuses.remove(name).is_none() {
            return Vec::new();
        }
        self.recompute()
    }

    fn recompute(&mut self) -> Vec<MonitorAction> {
        let next = self.compute();
        if next == self.system_state {
            return Vec::new();
        }
        self.system_state = next;
        vec![MonitorAction::SystemStateChanged(next)]
    }

    fn compute(&self) -> SystemState {
        use ParticipantState as P;

        if self.required.is_empty() {
            return SystemState::Invalid;
        }

        let mut states = Vec::with_capacity(self.required.len());
        for name in &self.required {
            match self.statuses.get(name) {
                Some(status) if status.state != ParticipantState::Invalid => {
                    states.push(status.state);
                },
                _ => return SystemState::Invalid,
            }
        }

        if states.contains(&ParticipantState::Error) {
            return SystemState::Error;
        }
        if states.contains(&ParticipantState::Aborting) {
            return SystemState::Aborting;
        }

        let all_in = |allowed: &[ParticipantState]| states.iter().all(|s| allowed.contains(s));
        let any = |state: ParticipantState| states.contains(&state);
        let every = |state: ParticipantState| states.iter().all(|s| *s == state);

        if every(P::Shutdown) {
            return SystemState::Shutdown;
        }
        if (any(P::ShuttingDown) || any(P::Shutdown))
            && all_in(&[P::Stopped, P::ColdswapIgnored, P::ShuttingDown, P::Shutdown])
        {
            return SystemState::ShuttingDown;
        }
        if any(P::ColdswapShutdown)
            && all_in(&[P::ColdswapShutdown, P::ColdswapReady, P::ColdswapIgnored])
        {
            return SystemState::ColdswapShutdown;
        }
        if all_in(&[P::ColdswapReady, P::ColdswapIgnored]) {
            return SystemState::ColdswapReady;
        }
        if (any(P::ColdswapPrepare) || any(P::ColdswapReady) || any(P::ColdswapIgnored))
            && all_in(&[P::Stopped, P::ColdswapPrepare, P::ColdswapReady, P::ColdswapIgnored])
        {
            return SystemState::ColdswapPrepare;
        }
        if every(P::Stopped) {
            return SystemState::Stopped;
        }
        if (any(P::Stopping) || any(P::Stopped))
            && all_in(&[P::Running, P::Paused, P::Stopping, P::Stopped])
        {
            return SystemState::Stopping;
        }
        if every(P::Running) {
            return SystemState::Running;
        }
        if any(P::Paused) && all_in(&[P::Running, P::Paused]) {
            return SystemState::Paused;
        }
        if every(P::Initialized) {
            return SystemState::Initialized;
        }
        if every(P::Idle) {
            return SystemState::Idle;
        }
        if (any(P::Initializing) || any(P::Initialized))
            && all_in(&[P::Idle, P::Initializing, P::Initialized, P::Stopped, P::ColdswapIgnored])
        {
            return SystemState::Initializing;
        }

        // No aggregate fits (e.g. some participants already running while
        // others are still initialized): hold the last state.
        self.system_state
    }
}

/// Whether `from -> to` is a regular lifecycle transition.
pub fn is_valid_transition(from: ParticipantState, to: ParticipantState) -> bool {
    use ParticipantState as P;
    match to {
        P::Error | P::Aborting => true,
        P::Invalid => false,
        P::Idle => from == P::Invalid,
        P::Initializing => matches!(from, P::Idle | P::Stopped | P::Error | P::ColdswapIgnored),
        P::Initialized => from == P::Initializing,
        P::Running => matches!(from, P::Initialized | P::Paused),
        P::Paused => from == P::Running,
        P::Stopping => matches!(from, P::Running | P::Paused),
        P::Stopped => from == P::Stopping,
        P::ColdswapPrepare | P::ColdswapIgnored => from == P::Stopped,
        P::ColdswapReady => from == P::ColdswapPrepare,
        P::ColdswapShutdown => from == P::ColdswapReady,
        P::ShuttingDown => matches!(from, P::Stopped | P::Error | P::ColdswapIgnored),
        P::Shutdown => matches!(from, P::ShuttingDown | P::Aborting),
    }
}
