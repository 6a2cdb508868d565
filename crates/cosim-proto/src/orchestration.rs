//! Orchestration messages: participant status, commands and time-sync
//! announcements.

use std::{fmt, time::Duration};

use serde::{Deserialize, Serialize};

/// Lifecycle state of a single participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ParticipantState {
    /// No status known yet
    Invalid,
    /// Lifecycle started, waiting for `Initialize`
    Idle,
    /// Communication-ready handler running
    Initializing,
    /// Ready to run
    Initialized,
    /// Simulation running
    Running,
    /// Simulation suspended
    Paused,
    /// Stop handler running
    Stopping,
    /// Simulation stopped
    Stopped,
    /// Preparing to be swapped out
    ColdswapPrepare,
    /// Ready to be swapped out
    ColdswapReady,
    /// Leaving the run for a coldswap
    ColdswapShutdown,
    /// Not taking part in the coldswap
    ColdswapIgnored,
    /// Participant reported an error
    Error,
    /// Shutdown handler running
    ShuttingDown,
    /// Terminal state
    Shutdown,
    /// Abort in progress
    Aborting,
}

impl ParticipantState {
    /// Position in the regular lifecycle walk.
    ///
    /// `Paused` shares the rank of `Running`. `Invalid`, `Error` and
    /// `Aborting` are outside the walk and return `None`.
    #[must_use]
    pub fn rank(self) -> Option<u8> {
        match self {
            Self::Idle => Some(1),
            Self::Initializing => Some(2),
            Self::Initialized => Some(3),
            Self::Running | Self::Paused => Some(4),
            Self::Stopping => Some(5),
            Self::Stopped => Some(6),
            Self::ColdswapPrepare
            | Self::ColdswapReady
            | Self::ColdswapShutdown
            | Self::ColdswapIgnored => Some(7),
            Self::ShuttingDown => Some(8),
            Self::Shutdown => Some(9),
            Self::Invalid | Self::Error | Self::Aborting => None,
        }
    }

    /// Whether the participant can no longer change state.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Shutdown | Self::ColdswapShutdown)
    }
}

impl fmt::Display for ParticipantState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Aggregate state of the whole simulation, derived from the required
/// participants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SystemState {
    /// Not every required participant is known yet
    Invalid,
    /// All required participants are idle
    Idle,
    /// At least one required participant is initializing
    Initializing,
    /// All required participants are initialized
    Initialized,
    /// All required participants are running
    Running,
    /// All required participants are paused
    Paused,
    /// Stop in progress
    Stopping,
    /// All required participants are stopped
    Stopped,
    /// Coldswap preparation in progress
    ColdswapPrepare,
    /// Every required participant is ready or ignored for coldswap
    ColdswapReady,
    /// Coldswap participants are leaving
    ColdswapShutdown,
    /// Some required participant reported an error
    Error,
    /// Shutdown in progress
    ShuttingDown,
    /// All required participants are shut down
    Shutdown,
    /// Abort in progress
    Aborting,
}

impl fmt::Display for SystemState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Status snapshot published on every participant state transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantStatus {
    /// Name of the reporting participant
    pub participant_name: String,
    /// State entered
    pub state: ParticipantState,
    /// Why the state was entered
    pub enter_reason: String,
    /// Wall-clock time (since the Unix epoch) the state was entered
    pub enter_time: Duration,
    /// Wall-clock time of the last refresh of this status
    pub refresh_time: Duration,
}

impl ParticipantStatus {
    /// Status for a participant nobody heard from yet.
    #[must_use]
    pub fn unknown(participant_name: impl Into<String>) -> Self {
        Self {
            participant_name: participant_name.into(),
            state: ParticipantState::Invalid,
            enter_reason: String::new(),
            enter_time: Duration::ZERO,
            refresh_time: Duration::ZERO,
        }
    }
}

/// Commands broadcast to every participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SystemCommand {
    /// Start running once initialized
    Run,
    /// Stop the simulation
    Stop,
    /// Shut down stopped participants
    Shutdown,
    /// Prepare coldswap from `Stopped`
    PrepareColdswap,
    /// Swap out participants in `ColdswapReady`
    ExecuteColdswap,
    /// Abort the simulation from any state
    AbortSimulation,
}

impl fmt::Display for SystemCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Kind of a command addressed to one participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ParticipantCommandKind {
    /// `Idle -> Initializing`
    Initialize,
    /// `Stopped`/`Error`/`ColdswapIgnored -> Initializing`
    ReInitialize,
}

/// Command addressed to one participant by name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantCommand {
    /// Name of the participant that must act on the command
    pub participant_name: String,
    /// What to do
    pub kind: ParticipantCommandKind,
}

/// Set of participants whose states define the system state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowConfiguration {
    /// Names of the required participants
    pub required_participants: Vec<String>,
}

/// Next simulation step a synchronized participant wants to execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NextSimTask {
    /// Start of the step
    pub time_point: Duration,
    /// Length of the step
    pub duration: Duration,
}
