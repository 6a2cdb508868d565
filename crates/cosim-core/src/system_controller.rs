//! The system controller.
//!
//! Owns the workflow configuration and issues the participant and system
//! commands that move the run through its lifecycle. In automatic mode it
//! reacts to system state changes on its own:
//!
//! | system state | command |
//! |--------------|---------|
//! | `Idle` | `Initialize` for every required participant but the sync master |
//! | `Initialized` | `Run` |
//! | `Stopped` | `Shutdown`, or `ReInitialize` everyone when a restart is pending |
//! | `Error` | `AbortSimulation` |
//!
//! In interactive mode commands come from the operator through
//! [`SystemController::execute`]. Both modes propagate a voluntary stop: a
//! participant that stops on its own while nobody issued `Stop` makes the
//! controller stop the whole system.

use std::{fmt, str::FromStr, time::Duration};

use cosim_proto::{
    ParticipantCommand, ParticipantCommandKind, ParticipantState, ParticipantStatus,
    SystemCommand, SystemState, WorkflowConfiguration,
};
use thiserror::Error;

use crate::{error::CosimError, log::LogRecord};

/// How commands are chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ControlMode {
    /// Commands follow the system state
    #[default]
    Automatic,
    /// Commands come from the operator
    Interactive,
}

/// Actions returned by the system controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SystemControllerAction {
    /// Publish the workflow configuration
    SetWorkflow(WorkflowConfiguration),
    /// Broadcast a system command
    SystemCommand(SystemCommand),
    /// Send a command to one participant
    ParticipantCommand(ParticipantCommand),
    /// The system reached a terminal state; the controller is done
    Completed(SystemState),
    /// Log a message
    Log(LogRecord),
}

/// An operator command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `Run`
    Run,
    /// `Stop`
    Stop,
    /// `Shutdown`
    Shutdown,
    /// `Abort`
    Abort,
    /// `Initialize <name>`
    Initialize(String),
    /// `ReInitialize <name>`
    ReInitialize(String),
    /// `PrepareColdswap`
    PrepareColdswap,
    /// `ExecuteColdswap`
    ExecuteColdswap,
}

/// A line that is not a valid [`Command`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandParseError {
    /// Nothing typed
    #[error("empty command")]
    Empty,
    /// Unknown verb
    #[error("unknown command '{0}'")]
    Unknown(String),
    /// Participant name missing after `Initialize`/`ReInitialize`
    #[error("'{0}' needs a participant name")]
    MissingParticipant(&'static str),
    /// Extra words after the command
    #[error("unexpected argument '{0}'")]
    UnexpectedArgument(String),
}

impl FromStr for Command {
    type Err = CommandParseError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut words = line.split_whitespace();
        let verb = words.next().ok_or(CommandParseError::Empty)?;
        let argument = words.next();
        if let Some(extra) = words.next() {
            return Err(CommandParseError::UnexpectedArgument(extra.to_string()));
        }

        let needs_name = |label: &'static str| {
            argument.map(str::to_string).ok_or(CommandParseError::MissingParticipant(label))
        };
        let no_argument = |command: Command| match argument {
            Some(arg) => Err(CommandParseError::UnexpectedArgument(arg.to_string())),
            None => Ok(command),
        };

        match verb.to_ascii_lowercase().as_str() {
            "run" => no_argument(Self::Run),
            "stop" => no_argument(Self::Stop),
            "shutdown" => no_argument(Self::Shutdown),
            "abort" | "abortsimulation" => no_argument(Self::Abort),
            "preparecoldswap" => no_argument(Self::PrepareColdswap),
            "executecoldswap" => no_argument(Self::ExecuteColdswap),
            "initialize" => needs_name("Initialize").map(Self::Initialize),
            "reinitialize" => needs_name("ReInitialize").map(Self::ReInitialize),
            _ => Err(CommandParseError::Unknown(verb.to_string())),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Run => f.write_str("Run"),
            Self::Stop => f.write_str("Stop"),
            Self::Shutdown => f.write_str("Shutdown"),
            Self::Abort => f.write_str("Abort"),
            Self::Initialize(name) => write!(f, "Initialize {name}"),
            Self::ReInitialize(name) => write!(f, "ReInitialize {name}"),
            Self::PrepareColdswap => f.write_str("PrepareColdswap"),
            Self::ExecuteColdswap => f.write_str("ExecuteColdswap"),
        }
    }
}

/// Drives the system lifecycle from the outside.
#[derive(Debug, Clone)]
pub struct SystemController {
    required: Vec<String>,
    sync_master: Option<String>,
    mode: ControlMode,
    system_state: SystemState,
    stop_initiated: bool,
    restart_pending: bool,
    shutdown_requested: bool,
    initialized_once: bool,
    completed: bool,
}

impl SystemController {
    /// Controller for a run with the given required participants.
    pub fn new(
        required: impl IntoIterator<Item = impl Into<String>>,
        sync_master: Option<String>,
        mode: ControlMode,
    ) -> Self {
        Self {
            required: required.into_iter().map(Into::into).collect(),
            sync_master,
            mode,
            system_state: SystemState::Invalid,
            stop_initiated: false,
            restart_pending: false,
            shutdown_requested: false,
            initialized_once: false,
            completed: false,
        }
    }

    /// Required participants.
    pub fn required(&self) -> &[String] {
        &self.required
    }

    /// Last observed system state.
    pub fn system_state(&self) -> SystemState {
        self.system_state
    }

    /// Whether the run reached a terminal state.
    pub fn is_completed(&self) -> bool {
        self.completed
    }

    /// Publish the workflow configuration.
    pub fn start(&self) -> Vec<SystemControllerAction> {
        vec![SystemControllerAction::SetWorkflow(WorkflowConfiguration {
            required_participants: self.required.clone(),
        })]
    }

    /// React to a new system state.
    pub fn on_system_state(&mut self, state: SystemState) -> Vec<SystemControllerAction> {
        self.system_state = state;
        if state == SystemState::Initialized {
            self.initialized_once = true;
        }
        if state == SystemState::Shutdown {
            self.completed = true;
            return vec![SystemControllerAction::Completed(state)];
        }

        let automatic = self.mode == ControlMode::Automatic;
        match state {
            SystemState::Idle if automatic => self.initialize_all(ParticipantCommandKind::Initialize),
            SystemState::Initialized if automatic && !self.shutdown_requested => {
                self.stop_initiated = false;
                vec![
                    SystemControllerAction::Log(LogRecord::info("sending Run")),
                    SystemControllerAction::SystemCommand(SystemCommand::Run),
                ]
            },
            SystemState::Stopped if self.restart_pending => {
                self.restart_pending = false;
                self.stop_initiated = false;
                self.initialize_all(ParticipantCommandKind::ReInitialize)
            },
            SystemState::Stopped if automatic || self.shutdown_requested => vec![
                SystemControllerAction::Log(LogRecord::info("sending Shutdown")),
                SystemControllerAction::SystemCommand(SystemCommand::Shutdown),
            ],
            SystemState::Error if automatic => vec![
                SystemControllerAction::Log(LogRecord::error(
                    "a required participant reported an error, aborting",
                )),
                SystemControllerAction::SystemCommand(SystemCommand::AbortSimulation),
            ],
            _ => Vec::new(),
        }
    }

    /// React to a participant status; detects voluntary stops.
    pub fn on_participant_status(
        &mut self,
        status: &ParticipantStatus,
    ) -> Vec<SystemControllerAction> {
        let stopping = matches!(status.state, ParticipantState::Stopping | ParticipantState::Stopped);
        let running = matches!(self.system_state, SystemState::Running | SystemState::Paused);
        if stopping && running && !self.stop_initiated {
            self.stop_initiated = true;
            return vec![
                SystemControllerAction::Log(LogRecord::info(format!(
                    "voluntary stop by '{}', stopping the system",
                    status.participant_name
                ))),
                SystemControllerAction::SystemCommand(SystemCommand::Stop),
            ];
        }
        Vec::new()
    }

    /// Execute an operator command.
    pub fn execute(&mut self, command: Command) -> Vec<SystemControllerAction> {
        match command {
            Command::Run => vec![SystemControllerAction::SystemCommand(SystemCommand::Run)],
            Command::Stop => self.stop(),
            Command::Shutdown => vec![SystemControllerAction::SystemCommand(SystemCommand::Shutdown)],
            Command::Abort => {
                vec![SystemControllerAction::SystemCommand(SystemCommand::AbortSimulation)]
            },
            Command::Initialize(name) => {
                vec![participant_command(name, ParticipantCommandKind::Initialize)]
            },
            Command::ReInitialize(name) => {
                vec![participant_command(name, ParticipantCommandKind::ReInitialize)]
            },
            Command::PrepareColdswap => {
                vec![SystemControllerAction::SystemCommand(SystemCommand::PrepareColdswap)]
            },
            Command::ExecuteColdswap => {
                vec![SystemControllerAction::SystemCommand(SystemCommand::ExecuteColdswap)]
            },
        }
    }

    /// Stop the system.
    pub fn stop(&mut self) -> Vec<SystemControllerAction> {
        self.stop_initiated = true;
        vec![
            SystemControllerAction::Log(LogRecord::info("sending Stop")),
            SystemControllerAction::SystemCommand(SystemCommand::Stop),
        ]
    }

    /// Stop, then initialize every required participant again.
    pub fn stop_and_restart(&mut self) -> Vec<SystemControllerAction> {
        self.restart_pending = true;
        self.stop()
    }

    /// Bring the run down: stop first if running, shut down directly
    /// otherwise.
    pub fn request_shutdown(&mut self) -> Vec<SystemControllerAction> {
        self.shutdown_requested = true;
        match self.system_state {
            SystemState::Running | SystemState::Paused => self.stop(),
            SystemState::Stopping | SystemState::ShuttingDown | SystemState::Shutdown => Vec::new(),
            state => vec![
                SystemControllerAction::Log(LogRecord::warn(format!(
                    "system is {state}, shutting down without stopping"
                ))),
                SystemControllerAction::SystemCommand(SystemCommand::Shutdown),
            ],
        }
    }

    /// Fail the run if the system did not become initialized within
    /// `timeout` of `elapsed` time since [`Self::start`].
    ///
    /// # Errors
    ///
    /// - `CosimError::CoordinationTimeout` once `elapsed` exceeds `timeout`
    ///   and the system was never `Initialized`
    pub fn check_init_timeout(&self, elapsed: Duration, timeout: Duration) -> Result<(), CosimError> {
        if self.initialized_once || self.completed || elapsed < timeout {
            return Ok(());
        }
        Err(CosimError::CoordinationTimeout {
            what: format!("system state Initialized (currently {})", self.system_state),
            waited: elapsed,
        })
    }

    fn initialize_all(&self, kind: ParticipantCommandKind) -> Vec<SystemControllerAction> {
        self.required
            .iter()
            .filter(|name| {
                kind == ParticipantCommandKind::ReInitialize
                    || self.sync_master.as_deref() != Some(name.as_str())
            })
            .map(|name| participant_command(name.clone(), kind))
            .collect()
    }
}

fn participant_command(participant_name: String, kind: ParticipantCommandKind) -> SystemControllerAction {
    SystemControllerAction::ParticipantCommand(ParticipantCommand { participant_name, kind })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(name: &str, state: ParticipantState) -> ParticipantStatus {
        ParticipantStatus { state, ..ParticipantStatus::unknown(name) }
    }

    fn commands(actions: &[SystemControllerAction]) -> Vec<String> {
        actions
            .iter()
            .filter_map(|a| match a {
                SystemControllerAction::SystemCommand(c) => Some(c.to_string()),
                SystemControllerAction::ParticipantCommand(c) => {
                    Some(format!("{:?} {}", c.kind, c.participant_name))
                },
                _ => None,
            })
            .collect()
    }

    #[test]
    fn automatic_run_skips_sync_master() {
        let mut ctl =
            SystemController::new(["A", "B"], Some("A".to_string()), ControlMode::Automatic);
        assert_eq!(
            ctl.start(),
            vec![SystemControllerAction::SetWorkflow(WorkflowConfiguration {
                required_participants: vec!["A".to_string(), "B".to_string()],
            })]
        );
        assert_eq!(commands(&ctl.on_system_state(SystemState::Idle)), vec!["Initialize B"]);
        assert!(ctl.on_system_state(SystemState::Initializing).is_empty());
        assert_eq!(commands(&ctl.on_system_state(SystemState::Initialized)), vec!["Run"]);
        assert!(ctl.on_system_state(SystemState::Running).is_empty());
        assert_eq!(commands(&ctl.on_system_state(SystemState::Stopped)), vec!["Shutdown"]);
        assert_eq!(
            ctl.on_system_state(SystemState::Shutdown),
            vec![SystemControllerAction::Completed(SystemState::Shutdown)]
        );
        assert!(ctl.is_completed());
    }

    #[test]
    fn voluntary_stop_is_propagated_once() {
        let mut ctl = SystemController::new(["A", "B"], None, ControlMode::Automatic);
        ctl.on_system_state(SystemState::Running);
        let actions = ctl.on_participant_status(&status("A", ParticipantState::Stopping));
        assert_eq!(commands(&actions), vec!["Stop"]);
        assert!(ctl.on_participant_status(&status("A", ParticipantState::Stopped)).is_empty());
    }

    #[test]
    fn restart_reinitializes_everyone() {
        let mut ctl =
            SystemController::new(["A", "B"], Some("A".to_string()), ControlMode::Automatic);
        ctl.on_system_state(SystemState::Running);
        assert_eq!(commands(&ctl.stop_and_restart()), vec!["Stop"]);
        assert_eq!(
            commands(&ctl.on_system_state(SystemState::Stopped)),
            vec!["ReInitialize A", "ReInitialize B"]
        );
        assert_eq!(commands(&ctl.on_system_state(SystemState::Stopped)), vec!["Shutdown"]);
    }

    #[test]
    fn interactive_mode_waits_for_operator() {
        let mut ctl = SystemController::new(["A"], None, ControlMode::Interactive);
        assert!(ctl.on_system_state(SystemState::Idle).is_empty());
        assert!(ctl.on_system_state(SystemState::Initialized).is_empty());
        let actions = ctl.execute("Initialize A".parse().unwrap());
        assert_eq!(commands(&actions), vec!["Initialize A"]);

        ctl.on_system_state(SystemState::Running);
        assert_eq!(commands(&ctl.request_shutdown()), vec!["Stop"]);
        assert_eq!(commands(&ctl.on_system_state(SystemState::Stopped)), vec!["Shutdown"]);
    }

    #[test]
    fn shutdown_outside_running_skips_stop() {
        let mut ctl = SystemController::new(["A"], None, ControlMode::Interactive);
        ctl.on_system_state(SystemState::Idle);
        assert_eq!(commands(&ctl.request_shutdown()), vec!["Shutdown"]);
    }

    #[test]
    fn error_aborts_in_automatic_mode() {
        let mut ctl = SystemController::new(["A"], None, ControlMode::Automatic);
        assert_eq!(commands(&ctl.on_system_state(SystemState::Error)), vec!["AbortSimulation"]);
    }

    #[test]
    fn init_timeout() {
        let mut ctl = SystemController::new(["A"], None, ControlMode::Automatic);
        let limit = Duration::from_secs(30);
        assert!(ctl.check_init_timeout(Duration::from_secs(29), limit).is_ok());
        let err = ctl.check_init_timeout(Duration::from_secs(31), limit).unwrap_err();
        assert!(err.is_fatal());

        ctl.on_system_state(SystemState::Initialized);
        assert!(ctl.check_init_timeout(Duration::from_secs(31), limit).is_ok());
    }

    #[test]
    fn command_parsing() {
        assert_eq!("run".parse::<Command>(), Ok(Command::Run));
        assert_eq!("  Stop ".parse::<Command>(), Ok(Command::Stop));
        assert_eq!(
            "ReInitialize CanWriter".parse::<Command>(),
            Ok(Command::ReInitialize("CanWriter".to_string()))
        );
        assert_eq!(
            "Initialize".parse::<Command>(),
            Err(CommandParseError::MissingParticipant("Initialize"))
        );
        assert_eq!("".parse::<Command>(), Err(CommandParseError::Empty));
        assert!(matches!("Run now".parse::<Command>(), Err(CommandParseError::UnexpectedArgument(_))));
        assert!(matches!("Jump".parse::<Command>(), Err(CommandParseError::Unknown(_))));
        assert_eq!(Command::Initialize("B".to_string()).to_string(), "Initialize B");
    }
}
