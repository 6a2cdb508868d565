//! Observable state snapshots for invariant checking.
//!
//! A snapshot is taken from the simulation after a round of deliveries:
//! the states each participant published on the bus and the global trace of
//! simulation steps.

use std::time::Duration;

use cosim_proto::ParticipantState;
use serde::Serialize;

/// Snapshot of the whole run so far.
#[derive(Debug, Clone, Default)]
pub struct SystemSnapshot {
    /// Per-participant state.
    pub participants: Vec<ParticipantSnapshot>,
    /// Step callbacks of all participants, in execution order.
    pub steps: Vec<StepRecord>,
}

impl SystemSnapshot {
    /// Snapshot with nothing in it.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Add a participant.
    #[must_use]
    pub fn with_participant(mut self, participant: ParticipantSnapshot) -> Self {
        self.participants.push(participant);
        self
    }

    /// Append a step record.
    #[must_use]
    pub fn with_step(mut self, participant: &str, now: Duration, phase: StepPhase) -> Self {
        self.steps.push(StepRecord { participant: participant.to_string(), now, phase });
        self
    }

    /// Participant named `name`.
    pub fn participant(&self, name: &str) -> Option<&ParticipantSnapshot> {
        self.participants.iter().find(|p| p.name == name)
    }
}

/// Snapshot of one participant.
#[derive(Debug, Clone, Default)]
pub struct ParticipantSnapshot {
    /// Participant name.
    pub name: String,
    /// Published lifecycle states, oldest first, without repetitions.
    pub states: Vec<ParticipantState>,
    /// Step duration for synchronized participants.
    pub step_duration: Option<Duration>,
}

impl ParticipantSnapshot {
    /// Participant without time synchronization.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), ..Default::default() }
    }

    /// Participant stepping with `step_duration`.
    pub fn synchronized(name: impl Into<String>, step_duration: Duration) -> Self {
        Self { step_duration: Some(step_duration), ..Self::new(name) }
    }

    /// Record a published state; repetitions of the last one are dropped.
    pub fn record_state(&mut self, state: ParticipantState) {
        if self.states.last() != Some(&state) {
            self.states.push(state);
        }
    }

    /// Builder form of [`Self::record_state`].
    #[must_use]
    pub fn with_states(mut self, states: impl IntoIterator<Item = ParticipantState>) -> Self {
        for state in states {
            self.record_state(state);
        }
        self
    }
}

/// Boundary of a step callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StepPhase {
    /// The callback was entered
    Started,
    /// The callback returned
    Ended,
}

/// One step boundary of one participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepRecord {
    /// Participant name
    pub participant: String,
    /// Simulation time of the step
    pub now: Duration,
    /// Entered or returned
    pub phase: StepPhase,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_states_are_collapsed() {
        let participant = ParticipantSnapshot::new("A").with_states([
            ParticipantState::Idle,
            ParticipantState::Idle,
            ParticipantState::Initializing,
            ParticipantState::Initializing,
        ]);
        assert_eq!(participant.states, vec![ParticipantState::Idle, ParticipantState::Initializing]);
    }

    #[test]
    fn lookup_by_name() {
        let snapshot = SystemSnapshot::empty()
            .with_participant(ParticipantSnapshot::new("A"))
            .with_participant(ParticipantSnapshot::synchronized("B", Duration::from_millis(1)));
        assert!(snapshot.participant("B").unwrap().step_duration.is_some());
        assert!(snapshot.participant("C").is_none());
    }
}
