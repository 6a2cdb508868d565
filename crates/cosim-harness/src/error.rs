//! Harness error type.

use cosim_participant::{ParticipantError, TransportError};

use crate::invariants::Violation;

/// Errors raised while driving a simulation.
#[derive(Debug, Clone)]
pub enum HarnessError {
    /// The hub refused a participant's hello
    Refused {
        /// Participant name
        participant: String,
        /// Reason given by the hub
        reason: String,
    },

    /// A participant rejected an event or operation
    Participant(ParticipantError),

    /// A channel failed outside of injected faults
    Transport(TransportError),

    /// The run did not reach the expected condition in time
    Stalled {
        /// Ticks executed before giving up
        ticks: u64,
    },

    /// One or more invariants were violated
    Invariants(Vec<Violation>),

    /// The simulation has no system controller
    NoSystemController,
}

impl std::fmt::Display for HarnessError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Refused { participant, reason } => {
                write!(f, "hub refused '{participant}': {reason}")
            },
            Self::Participant(err) => write!(f, "participant error: {err}"),
            Self::Transport(err) => write!(f, "transport error: {err}"),
            Self::Stalled { ticks } => write!(f, "condition not reached after {ticks} ticks"),
            Self::Invariants(violations) => {
                let messages: Vec<String> = violations.iter().map(ToString::to_string).collect();
                write!(f, "invariant violation:\n  {}", messages.join("\n  "))
            },
            Self::NoSystemController => write!(f, "no system controller attached"),
        }
    }
}

impl std::error::Error for HarnessError {}

impl From<ParticipantError> for HarnessError {
    fn from(err: ParticipantError) -> Self {
        Self::Participant(err)
    }
}

impl From<TransportError> for HarnessError {
    fn from(err: TransportError) -> Self {
        Self::Transport(err)
    }
}
