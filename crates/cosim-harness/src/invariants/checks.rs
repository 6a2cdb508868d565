//! Standard invariant checks.

use std::{collections::BTreeMap, time::Duration};

use cosim_core::system_state::is_valid_transition;
use cosim_proto::ParticipantState;

use super::{Invariant, InvariantResult, StepPhase, StepRecord, SystemSnapshot, Violation};

/// Every published state follows from the previous one.
///
/// The walk only goes backwards through pause/continue and
/// re-initialization; errors and aborts may happen anywhere.
pub struct LifecycleMonotonicity;

impl Invariant for LifecycleMonotonicity {
    fn name(&self) -> &'static str {
        "LifecycleMonotonicity"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        for participant in &state.participants {
            let mut previous = ParticipantState::Invalid;
            for &next in &participant.states {
                if !is_valid_transition(previous, next) {
                    return Err(Violation {
                        invariant: self.name(),
                        message: format!("participant {}: {previous} -> {next}", participant.name),
                    });
                }
                previous = next;
            }
        }
        Ok(())
    }
}

/// Each participant's steps are entered and left in turn, and its
/// simulation time advances by exactly one step duration per step.
///
/// A restart sets the time back to zero.
pub struct StepsContiguous;

impl Invariant for StepsContiguous {
    fn name(&self) -> &'static str {
        "StepsContiguous"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        // Last record per participant: (time, phase)
        let mut last: BTreeMap<&str, (Duration, StepPhase)> = BTreeMap::new();

        for record in &state.steps {
            let violation = |message: String| Violation { invariant: self.name(), message };
            let name = record.participant.as_str();
            let duration = state
                .participant(name)
                .and_then(|p| p.step_duration)
                .ok_or_else(|| violation(format!("{name} ran a step without time synchronization")))?;

            match (last.get(name).copied(), record.phase) {
                (None, StepPhase::Started) => {
                    if !record.now.is_zero() {
                        return Err(violation(format!(
                            "{name} started its first step at {:?}",
                            record.now
                        )));
                    }
                },
                (Some((previous, StepPhase::Ended)), StepPhase::Started) => {
                    if record.now != previous + duration && !record.now.is_zero() {
                        return Err(violation(format!(
                            "{name} stepped from {previous:?} to {:?} with step duration {duration:?}",
                            record.now
                        )));
                    }
                },
                (Some((started, StepPhase::Started)), StepPhase::Ended) => {
                    if record.now != started {
                        return Err(violation(format!(
                            "{name} ended step {:?} while in step {started:?}",
                            record.now
                        )));
                    }
                },
                (Some((now, StepPhase::Started)), StepPhase::Started) => {
                    return Err(violation(format!(
                        "{name} started step {:?} inside step {now:?}",
                        record.now
                    )));
                },
                (_, StepPhase::Ended) => {
                    return Err(violation(format!(
                        "{name} ended step {:?} without starting it",
                        record.now
                    )));
                },
            }
            last.insert(name, (record.now, record.phase));
        }
        Ok(())
    }
}

/// No participant enters step `t` before every participant that is
/// stepping with the same duration has returned from step `t - d`.
pub struct StepBarrier;

impl StepBarrier {
    /// Index of the latest record of `participant` matching `now` and
    /// `phase` before `end`.
    fn latest(
        steps: &[StepRecord],
        end: usize,
        participant: &str,
        now: Duration,
        phase: StepPhase,
    ) -> Option<usize> {
        steps[..end]
            .iter()
            .rposition(|r| r.participant == participant && r.now == now && r.phase == phase)
    }
}

impl Invariant for StepBarrier {
    fn name(&self) -> &'static str {
        "StepBarrier"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        for (index, record) in state.steps.iter().enumerate() {
            if record.phase != StepPhase::Started || record.now.is_zero() {
                continue;
            }
            let Some(duration) = state.participant(&record.participant).and_then(|p| p.step_duration)
            else {
                continue;
            };
            let Some(previous) = record.now.checked_sub(duration) else {
                continue;
            };

            let others = state
                .participants
                .iter()
                .filter(|q| q.name != record.participant && q.step_duration == Some(duration));
            for other in others {
                let name = other.name.as_str();
                let started = Self::latest(&state.steps, index, name, previous, StepPhase::Started);
                let behind = match started {
                    // Still inside the previous step
                    Some(started) => !state.steps[started..index].iter().any(|r| {
                        r.participant == name && r.now == previous && r.phase == StepPhase::Ended
                    }),
                    // Already stepping but not yet at the previous step
                    None => {
                        state.steps[..index].iter().any(|r| r.participant == name)
                            && state.steps[index..].iter().any(|r| {
                                r.participant == name
                                    && r.now == previous
                                    && r.phase == StepPhase::Started
                            })
                    },
                };
                if behind {
                    return Err(Violation {
                        invariant: self.name(),
                        message: format!(
                            "{} entered {:?} before {name} completed {previous:?}",
                            record.participant, record.now
                        ),
                    });
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invariants::ParticipantSnapshot;

    const D: Duration = Duration::from_millis(1);

    fn pair() -> SystemSnapshot {
        SystemSnapshot::empty()
            .with_participant(ParticipantSnapshot::synchronized("A", D))
            .with_participant(ParticipantSnapshot::synchronized("B", D))
    }

    #[test]
    fn regular_walk_passes() {
        use ParticipantState as P;
        let participant = ParticipantSnapshot::new("A").with_states([
            P::Idle,
            P::Initializing,
            P::Initialized,
            P::Running,
            P::Paused,
            P::Running,
            P::Stopping,
            P::Stopped,
            P::Initializing,
            P::Initialized,
            P::Running,
            P::Stopping,
            P::Stopped,
            P::ShuttingDown,
            P::Shutdown,
        ]);
        let snapshot = SystemSnapshot::empty().with_participant(participant);
        assert!(LifecycleMonotonicity.check(&snapshot).is_ok());
    }

    #[test]
    fn backwards_step_fails() {
        use ParticipantState as P;
        let participant =
            ParticipantSnapshot::new("A").with_states([P::Idle, P::Initializing, P::Initialized, P::Idle]);
        let snapshot = SystemSnapshot::empty().with_participant(participant);

        let violation = LifecycleMonotonicity.check(&snapshot).unwrap_err();
        assert!(violation.message.contains("Initialized -> Idle"));
    }

    #[test]
    fn abort_from_anywhere_passes() {
        use ParticipantState as P;
        let participant = ParticipantSnapshot::new("A").with_states([
            P::Idle,
            P::Initializing,
            P::Aborting,
            P::Shutdown,
        ]);
        let snapshot = SystemSnapshot::empty().with_participant(participant);
        assert!(LifecycleMonotonicity.check(&snapshot).is_ok());
    }

    #[test]
    fn lock_step_passes() {
        let snapshot = pair()
            .with_step("A", D * 0, StepPhase::Started)
            .with_step("A", D * 0, StepPhase::Ended)
            .with_step("B", D * 0, StepPhase::Started)
            .with_step("B", D * 0, StepPhase::Ended)
            .with_step("B", D, StepPhase::Started)
            .with_step("A", D, StepPhase::Started)
            .with_step("A", D, StepPhase::Ended)
            .with_step("B", D, StepPhase::Ended);

        assert!(StepsContiguous.check(&snapshot).is_ok());
        assert!(StepBarrier.check(&snapshot).is_ok());
    }

    #[test]
    fn running_ahead_fails() {
        let snapshot = pair()
            .with_step("A", D * 0, StepPhase::Started)
            .with_step("B", D * 0, StepPhase::Started)
            .with_step("A", D * 0, StepPhase::Ended)
            .with_step("A", D, StepPhase::Started)
            .with_step("B", D * 0, StepPhase::Ended);

        let violation = StepBarrier.check(&snapshot).unwrap_err();
        assert!(violation.message.contains("before B completed"));
    }

    #[test]
    fn skipping_a_step_fails() {
        let snapshot = pair()
            .with_step("A", D * 0, StepPhase::Started)
            .with_step("A", D * 0, StepPhase::Ended)
            .with_step("A", D * 2, StepPhase::Started);

        assert!(StepsContiguous.check(&snapshot).is_err());
    }

    #[test]
    fn nested_steps_fail() {
        let snapshot = pair()
            .with_step("A", D * 0, StepPhase::Started)
            .with_step("A", D, StepPhase::Started);

        assert!(StepsContiguous.check(&snapshot).is_err());
    }
}
