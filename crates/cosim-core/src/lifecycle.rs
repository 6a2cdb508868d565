//! Participant lifecycle state machine.
//!
//! Uses the action pattern: methods take the current wall-clock time and
//! return actions for the participant to execute. Application callbacks are
//! requested with [`LifecycleAction::Invoke`], which is always the last action
//! of a call; the participant runs the callback and reports back through
//! [`LifecycleService::hook_completed`].
//!
//! # State Machine
//!
//! ```text
//! Invalid ─start─> Idle ─Initialize─> Initializing ─ready─> Initialized
//!                                          ^                     │ Run
//!                              ReInitialize│                     v
//!  Shutdown <─ ShuttingDown <─Shutdown─ Stopped <─ Stopping <─ Running <─> Paused
//!     ^                                    │ PrepareColdswap
//!     │ abort from anywhere                v
//!  Aborting                  ColdswapPrepare ─> ColdswapReady ─> ColdswapShutdown
//! ```

use std::time::Duration;

use cosim_proto::{
    ParticipantCommandKind, ParticipantState, ParticipantStatus, SystemCommand, SystemState,
};

use crate::{
    config::{LifecycleConfig, OperationMode},
    error::{HandlerResult, LifecycleError},
    log::LogRecord,
};

/// Application callbacks driven by the lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleHook {
    /// Create controllers and configure them; runs in `Initializing`
    CommunicationReady,
    /// Runs right before entering `Running`
    Starting,
    /// Runs in `Stopping`
    Stop,
    /// Runs in `ShuttingDown`
    Shutdown,
    /// Runs in `Aborting` instead of the stop and shutdown callbacks
    Abort {
        /// State the participant was in when the abort arrived
        last_state: ParticipantState,
    },
}

/// Actions returned by the lifecycle for the participant to execute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleAction {
    /// Publish the new status on the bus
    PublishStatus(ParticipantStatus),
    /// Run an application callback, then call
    /// [`LifecycleService::hook_completed`]
    Invoke(LifecycleHook),
    /// Reset simulated time and announce the first step
    PrepareTimeSync,
    /// Start granting simulation steps
    StartTimeSync,
    /// Suspend simulation steps
    PauseTimeSync,
    /// Resume simulation steps
    ContinueTimeSync,
    /// Cancel the pending step barrier
    StopTimeSync,
    /// A terminal state was reached
    Completed {
        /// Final state
        final_state: ParticipantState,
    },
    /// Log a message
    Log(LogRecord),
}

/// Lifecycle of one participant.
#[derive(Debug, Clone)]
pub struct LifecycleService {
    name: String,
    config: LifecycleConfig,
    is_sync_master: bool,
    status: ParticipantStatus,
    async_communication_ready: bool,
    /// Set once the communication-ready callback returned in the current
    /// initialization
    communication_ready_returned: bool,
}

impl LifecycleService {
    /// Lifecycle in state `Invalid`.
    pub fn new(name: impl Into<String>, config: LifecycleConfig, is_sync_master: bool) -> Self {
        let name = name.into();
        Self {
            status: ParticipantStatus::unknown(name.clone()),
            name,
            config,
            is_sync_master,
            async_communication_ready: false,
            communication_ready_returned: false,
        }
    }

    /// Current state.
    pub fn state(&self) -> ParticipantState {
        self.status.state
    }

    /// Last published status.
    pub fn status(&self) -> &ParticipantStatus {
        &self.status
    }

    /// Participant name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Lifecycle configuration.
    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    /// Whether the lifecycle follows system commands.
    pub fn is_coordinated(&self) -> bool {
        self.config.operation_mode == OperationMode::Coordinated
    }

    /// Keep the participant in `Initializing` after the communication-ready
    /// callback returns, until [`Self::complete_communication_ready`] is
    /// called.
    pub fn set_async_communication_ready(&mut self, enabled: bool) {
        self.async_communication_ready = enabled;
    }

    /// Enter `Idle`. Autonomous participants continue straight into
    /// initialization.
    ///
    /// # Errors
    ///
    /// - `LifecycleError::AlreadyStarted` if the lifecycle left `Invalid`
    pub fn start(&mut self, now: Duration) -> Result<Vec<LifecycleAction>, LifecycleError> {
        if self.state() != ParticipantState::Invalid {
            return Err(LifecycleError::AlreadyStarted);
        }

        let mut actions = vec![self.transition(ParticipantState::Idle, "lifecycle started", now)];
        if !self.is_coordinated() {
            actions.extend(self.initialize("autonomous start", now));
        }
        Ok(actions)
    }

    /// React to a change of the system state.
    ///
    /// The sync master is never told to initialize; it initializes itself once
    /// the whole system is idle.
    pub fn on_system_state(&mut self, system: SystemState, now: Duration) -> Vec<LifecycleAction> {
        if system == SystemState::Idle
            && self.is_sync_master
            && self.is_coordinated()
            && self.state() == ParticipantState::Idle
        {
            return self.initialize("sync master initializes on idle system", now);
        }
        Vec::new()
    }

    /// Handle a system-wide command.
    pub fn on_system_command(
        &mut self,
        command: SystemCommand,
        now: Duration,
    ) -> Vec<LifecycleAction> {
        if command == SystemCommand::AbortSimulation {
            return self.abort("simulation aborted", now);
        }

        if !self.is_coordinated() {
            return vec![LifecycleAction::Log(LogRecord::debug(format!(
                "{}: autonomous lifecycle ignores {command}",
                self.name
            )))];
        }

        let state = self.state();
        match (command, state) {
            (SystemCommand::Run, ParticipantState::Initialized) => self.run(now),
            (SystemCommand::Run, ParticipantState::Running | ParticipantState::Paused) => {
                Vec::new()
            },
            (SystemCommand::Stop, ParticipantState::Running | ParticipantState::Paused) => {
                self.begin_stop("system stop", now)
            },
            (SystemCommand::Stop, ParticipantState::Stopping | ParticipantState::Stopped) => {
                Vec::new()
            },
            (
                SystemCommand::Shutdown,
                ParticipantState::Stopped | ParticipantState::Error | ParticipantState::ColdswapIgnored,
            ) => self.begin_shutdown("system shutdown", now),
            (SystemCommand::PrepareColdswap, ParticipantState::Stopped) => {
                self.prepare_coldswap(now)
            },
            (SystemCommand::ExecuteColdswap, ParticipantState::ColdswapReady) => {
                let mut actions = vec![self.transition(
                    ParticipantState::ColdswapShutdown,
                    "coldswap executed",
                    now,
                )];
                actions.push(LifecycleAction::Completed {
                    final_state: ParticipantState::ColdswapShutdown,
                });
                actions
            },
            (SystemCommand::ExecuteColdswap, ParticipantState::ColdswapIgnored) => Vec::new(),
            (command, state) => vec![LifecycleAction::Log(LogRecord::warn(format!(
                "{}: ignoring system command {command} in state {state}",
                self.name
            )))],
        }
    }

    /// Handle a command addressed to this participant.
    pub fn on_participant_command(
        &mut self,
        kind: ParticipantCommandKind,
        now: Duration,
    ) -> Vec<LifecycleAction> {
        let state = self.state();
        match (kind, state) {
            (ParticipantCommandKind::Initialize, ParticipantState::Idle) => {
                self.initialize("initialize command", now)
            },
            (
                ParticipantCommandKind::ReInitialize,
                ParticipantState::Stopped | ParticipantState::Error | ParticipantState::ColdswapIgnored,
            ) => self.initialize("reinitialize command", now),
            (kind, state) => vec![LifecycleAction::Log(LogRecord::warn(format!(
                "{}: ignoring {kind:?} in state {state}",
                self.name
            )))],
        }
    }

    /// Request a stop from the participant itself.
    ///
    /// # Errors
    ///
    /// - `LifecycleError::InvalidTransition` unless running or paused (a stop
    ///   already in progress is not an error)
    pub fn stop(
        &mut self,
        reason: &str,
        now: Duration,
    ) -> Result<Vec<LifecycleAction>, LifecycleError> {
        match self.state() {
            ParticipantState::Running | ParticipantState::Paused => Ok(self.begin_stop(reason, now)),
            ParticipantState::Stopping | ParticipantState::Stopped => Ok(Vec::new()),
            state => Err(LifecycleError::InvalidTransition { state, operation: "stop" }),
        }
    }

    /// Suspend a running simulation.
    ///
    /// # Errors
    ///
    /// - `LifecycleError::InvalidTransition` unless running
    pub fn pause(
        &mut self,
        reason: &str,
        now: Duration,
    ) -> Result<Vec<LifecycleAction>, LifecycleError> {
        let state = self.state();
        if state != ParticipantState::Running {
            return Err(LifecycleError::InvalidTransition { state, operation: "pause" });
        }
        Ok(vec![
            self.transition(ParticipantState::Paused, reason, now),
            LifecycleAction::PauseTimeSync,
        ])
    }

    /// Resume a paused simulation.
    ///
    /// # Errors
    ///
    /// - `LifecycleError::InvalidTransition` unless paused
    pub fn continue_simulation(
        &mut self,
        now: Duration,
    ) -> Result<Vec<LifecycleAction>, LifecycleError> {
        let state = self.state();
        if state != ParticipantState::Paused {
            return Err(LifecycleError::InvalidTransition { state, operation: "continue" });
        }
        Ok(vec![
            self.transition(ParticipantState::Running, "continued", now),
            LifecycleAction::ContinueTimeSync,
        ])
    }

    /// Finish an asynchronous communication-ready phase.
    ///
    /// # Errors
    ///
    /// - `LifecycleError::InvalidTransition` unless initializing with an
    ///   asynchronous communication-ready callback that already returned
    pub fn complete_communication_ready(
        &mut self,
        now: Duration,
    ) -> Result<Vec<LifecycleAction>, LifecycleError> {
        let state = self.state();
        if state != ParticipantState::Initializing
            || !self.async_communication_ready
            || !self.communication_ready_returned
        {
            return Err(LifecycleError::InvalidTransition {
                state,
                operation: "complete communication ready",
            });
        }
        Ok(self.enter_initialized(now))
    }

    /// Move to `Error`.
    pub fn report_error(&mut self, reason: &str, now: Duration) -> Vec<LifecycleAction> {
        let state = self.state();
        if state.is_terminal()
            || matches!(
                state,
                ParticipantState::Invalid
                    | ParticipantState::Aborting
                    | ParticipantState::ShuttingDown
            )
        {
            return vec![LifecycleAction::Log(LogRecord::warn(format!(
                "{}: cannot report error in state {state}: {reason}",
                self.name
            )))];
        }

        let mut actions = vec![LifecycleAction::Log(LogRecord::error(format!(
            "{}: {reason}",
            self.name
        )))];
        if matches!(state, ParticipantState::Running | ParticipantState::Paused) {
            actions.push(LifecycleAction::StopTimeSync);
        }
        actions.push(self.transition(ParticipantState::Error, reason, now));
        actions
    }

    /// Abort from any non-terminal state. Skips the stop and shutdown
    /// callbacks in favour of the abort callback.
    pub fn abort(&mut self, reason: &str, now: Duration) -> Vec<LifecycleAction> {
        let last_state = self.state();
        match last_state {
            ParticipantState::Invalid
            | ParticipantState::Aborting
            | ParticipantState::ShuttingDown
            | ParticipantState::Shutdown
            | ParticipantState::ColdswapShutdown => vec![LifecycleAction::Log(LogRecord::debug(
                format!("{}: abort ignored in state {last_state}", self.name),
            ))],
            _ => vec![
                LifecycleAction::StopTimeSync,
                self.transition(ParticipantState::Aborting, reason, now),
                LifecycleAction::Invoke(LifecycleHook::Abort { last_state }),
            ],
        }
    }

    /// A failing application callback outside of a lifecycle hook.
    ///
    /// Treated like a stop request; if stopping is not possible the
    /// participant enters `Error`.
    pub fn handler_fault(&mut self, message: &str, now: Duration) -> Vec<LifecycleAction> {
        let reason = format!("handler fault: {message}");
        match self.stop(&reason, now) {
            Ok(mut actions) => {
                actions.insert(0, LifecycleAction::Log(LogRecord::error(format!(
                    "{}: {reason}",
                    self.name
                ))));
                actions
            },
            Err(_) => self.report_error(&reason, now),
        }
    }

    /// Continue after an application callback returned.
    pub fn hook_completed(
        &mut self,
        hook: LifecycleHook,
        result: HandlerResult,
        now: Duration,
    ) -> Vec<LifecycleAction> {
        let expected = match hook {
            LifecycleHook::CommunicationReady => ParticipantState::Initializing,
            LifecycleHook::Starting => ParticipantState::Initialized,
            LifecycleHook::Stop => ParticipantState::Stopping,
            LifecycleHook::Shutdown => ParticipantState::ShuttingDown,
            LifecycleHook::Abort { .. } => ParticipantState::Aborting,
        };
        if self.state() != expected {
            return vec![LifecycleAction::Log(LogRecord::debug(format!(
                "{}: ignoring completion of {hook:?} in state {}",
                self.name,
                self.state()
            )))];
        }

        match (hook, result) {
            (LifecycleHook::CommunicationReady, Ok(())) => {
                self.communication_ready_returned = true;
                if self.async_communication_ready {
                    vec![LifecycleAction::Log(LogRecord::debug(format!(
                        "{}: waiting for asynchronous communication ready",
                        self.name
                    )))]
                } else {
                    self.enter_initialized(now)
                }
            },
            (LifecycleHook::Starting, Ok(())) => vec![
                self.transition(ParticipantState::Running, "starting callback returned", now),
                LifecycleAction::StartTimeSync,
            ],
            (LifecycleHook::CommunicationReady | LifecycleHook::Starting, Err(fault)) => {
                self.handler_fault(&fault.message, now)
            },
            (LifecycleHook::Stop, result) => {
                let mut actions = Self::log_fault(&self.name, "stop", result);
                actions.push(self.transition(ParticipantState::Stopped, "stop callback returned", now));
                if !self.is_coordinated() {
                    actions.extend(self.begin_shutdown("autonomous shutdown", now));
                }
                actions
            },
            (LifecycleHook::Shutdown | LifecycleHook::Abort { .. }, result) => {
                let mut actions = Self::log_fault(&self.name, "shutdown", result);
                actions.push(self.transition(ParticipantState::Shutdown, "shutdown complete", now));
                actions.push(LifecycleAction::Completed { final_state: ParticipantState::Shutdown });
                actions
            },
        }
    }

    fn log_fault(name: &str, hook: &str, result: HandlerResult) -> Vec<LifecycleAction> {
        match result {
            Ok(()) => Vec::new(),
            Err(fault) => vec![LifecycleAction::Log(LogRecord::error(format!(
                "{name}: {hook} callback failed: {}",
                fault.message
            )))],
        }
    }

    fn initialize(&mut self, reason: &str, now: Duration) -> Vec<LifecycleAction> {
        self.communication_ready_returned = false;
        vec![
            self.transition(ParticipantState::Initializing, reason, now),
            LifecycleAction::Invoke(LifecycleHook::CommunicationReady),
        ]
    }

    fn enter_initialized(&mut self, now: Duration) -> Vec<LifecycleAction> {
        // The first step announcement must reach peers before the status does.
        let mut actions = vec![
            LifecycleAction::PrepareTimeSync,
            self.transition(ParticipantState::Initialized, "communication ready", now),
        ];
        if !self.is_coordinated() {
            actions.extend(self.run(now));
        }
        actions
    }

    fn run(&mut self, _now: Duration) -> Vec<LifecycleAction> {
        vec![LifecycleAction::Invoke(LifecycleHook::Starting)]
    }

    fn begin_stop(&mut self, reason: &str, now: Duration) -> Vec<LifecycleAction> {
        vec![
            LifecycleAction::StopTimeSync,
            self.transition(ParticipantState::Stopping, reason, now),
            LifecycleAction::Invoke(LifecycleHook::Stop),
        ]
    }

    fn begin_shutdown(&mut self, reason: &str, now: Duration) -> Vec<LifecycleAction> {
        vec![
            self.transition(ParticipantState::ShuttingDown, reason, now),
            LifecycleAction::Invoke(LifecycleHook::Shutdown),
        ]
    }

    fn prepare_coldswap(&mut self, now: Duration) -> Vec<LifecycleAction> {
        if self.config.allow_coldswap {
            vec![
                self.transition(ParticipantState::ColdswapPrepare, "coldswap prepare", now),
                self.transition(ParticipantState::ColdswapReady, "coldswap ready", now),
            ]
        } else {
            vec![self.transition(ParticipantState::ColdswapIgnored, "coldswap not allowed", now)]
        }
    }

    fn transition(
        &mut self,
        state: ParticipantState,
        reason: &str,
        now: Duration,
    ) -> LifecycleAction {
        self.status = ParticipantStatus {
            participant_name: self.name.clone(),
            state,
            enter_reason: reason.to_string(),
            enter_time: now,
            refresh_time: now,
        };
        LifecycleAction::PublishStatus(self.status.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HandlerFault;

    const T: Duration = Duration::from_secs(1);

    fn coordinated(name: &str) -> LifecycleService {
        LifecycleService::new(name, LifecycleConfig::default(), false)
    }

    fn published(actions: &[LifecycleAction]) -> Vec<ParticipantState> {
        actions
            .iter()
            .filter_map(|a| match a {
                LifecycleAction::PublishStatus(s) => Some(s.state),
                _ => None,
            })
            .collect()
    }

    fn run_to(service: &mut LifecycleService, target: ParticipantState) {
        service.start(T).unwrap();
        if target == ParticipantState::Idle {
            return;
        }
        service.on_participant_command(ParticipantCommandKind::Initialize, T);
        service.hook_completed(LifecycleHook::CommunicationReady, Ok(()), T);
        if target == ParticipantState::Initialized {
            return;
        }
        service.on_system_command(SystemCommand::Run, T);
        service.hook_completed(LifecycleHook::Starting, Ok(()), T);
        if target == ParticipantState::Running {
            return;
        }
        service.on_system_command(SystemCommand::Stop, T);
        service.hook_completed(LifecycleHook::Stop, Ok(()), T);
        assert_eq!(service.state(), ParticipantState::Stopped);
    }

    #[test]
    fn coordinated_walk() {
        let mut service = coordinated("A");
        assert_eq!(published(&service.start(T).unwrap()), vec![ParticipantState::Idle]);

        let actions = service.on_participant_command(ParticipantCommandKind::Initialize, T);
        assert_eq!(published(&actions), vec![ParticipantState::Initializing]);
        assert_eq!(
            actions.last(),
            Some(&LifecycleAction::Invoke(LifecycleHook::CommunicationReady))
        );

        let actions = service.hook_completed(LifecycleHook::CommunicationReady, Ok(()), T);
        assert_eq!(actions[0], LifecycleAction::PrepareTimeSync);
        assert_eq!(published(&actions), vec![ParticipantState::Initialized]);

        let actions = service.on_system_command(SystemCommand::Run, T);
        assert_eq!(actions, vec![LifecycleAction::Invoke(LifecycleHook::Starting)]);
        let actions = service.hook_completed(LifecycleHook::Starting, Ok(()), T);
        assert_eq!(published(&actions), vec![ParticipantState::Running]);
        assert!(actions.contains(&LifecycleAction::StartTimeSync));

        let actions = service.on_system_command(SystemCommand::Stop, T);
        assert_eq!(published(&actions), vec![ParticipantState::Stopping]);
        let actions = service.hook_completed(LifecycleHook::Stop, Ok(()), T);
        assert_eq!(published(&actions), vec![ParticipantState::Stopped]);

        let actions = service.on_system_command(SystemCommand::Shutdown, T);
        assert_eq!(published(&actions), vec![ParticipantState::ShuttingDown]);
        let actions = service.hook_completed(LifecycleHook::Shutdown, Ok(()), T);
        assert_eq!(published(&actions), vec![ParticipantState::Shutdown]);
        assert!(actions.contains(&LifecycleAction::Completed {
            final_state: ParticipantState::Shutdown
        }));
    }

    #[test]
    fn initialize_past_idle_is_ignored() {
        let mut service = coordinated("A");
        run_to(&mut service, ParticipantState::Running);
        let actions = service.on_participant_command(ParticipantCommandKind::Initialize, T);
        assert!(published(&actions).is_empty());
        assert_eq!(service.state(), ParticipantState::Running);
    }

    #[test]
    fn autonomous_lifecycle_runs_by_itself() {
        let config =
            LifecycleConfig { operation_mode: OperationMode::Autonomous, ..LifecycleConfig::default() };
        let mut service = LifecycleService::new("A", config, false);
        let actions = service.start(T).unwrap();
        assert_eq!(published(&actions), vec![ParticipantState::Idle, ParticipantState::Initializing]);

        let actions = service.hook_completed(LifecycleHook::CommunicationReady, Ok(()), T);
        assert_eq!(published(&actions), vec![ParticipantState::Initialized]);
        assert_eq!(actions.last(), Some(&LifecycleAction::Invoke(LifecycleHook::Starting)));

        service.hook_completed(LifecycleHook::Starting, Ok(()), T);
        assert_eq!(service.state(), ParticipantState::Running);

        service.stop("done", T).unwrap();
        let actions = service.hook_completed(LifecycleHook::Stop, Ok(()), T);
        assert_eq!(published(&actions), vec![ParticipantState::Stopped, ParticipantState::ShuttingDown]);
    }

    #[test]
    fn sync_master_initializes_itself_on_idle_system() {
        let mut master = LifecycleService::new("A", LifecycleConfig::default(), true);
        master.start(T).unwrap();
        let actions = master.on_system_state(SystemState::Idle, T);
        assert_eq!(published(&actions), vec![ParticipantState::Initializing]);

        let mut other = coordinated("B");
        other.start(T).unwrap();
        assert!(other.on_system_state(SystemState::Idle, T).is_empty());
    }

    #[test]
    fn async_communication_ready_waits_for_completion() {
        let mut service = coordinated("A");
        service.set_async_communication_ready(true);
        service.start(T).unwrap();

        assert!(service.complete_communication_ready(T).is_err());

        service.on_participant_command(ParticipantCommandKind::Initialize, T);
        let actions = service.hook_completed(LifecycleHook::CommunicationReady, Ok(()), T);
        assert!(published(&actions).is_empty());
        assert_eq!(service.state(), ParticipantState::Initializing);

        let actions = service.complete_communication_ready(T).unwrap();
        assert_eq!(published(&actions), vec![ParticipantState::Initialized]);
    }

    #[test]
    fn pause_and_continue_only_while_running() {
        let mut service = coordinated("A");
        run_to(&mut service, ParticipantState::Initialized);
        assert!(matches!(
            service.pause("p", T),
            Err(LifecycleError::InvalidTransition { state: ParticipantState::Initialized, .. })
        ));

        service.on_system_command(SystemCommand::Run, T);
        service.hook_completed(LifecycleHook::Starting, Ok(()), T);

        let actions = service.pause("p", T).unwrap();
        assert!(actions.contains(&LifecycleAction::PauseTimeSync));
        assert!(service.pause("p", T).is_err());
        let actions = service.continue_simulation(T).unwrap();
        assert!(actions.contains(&LifecycleAction::ContinueTimeSync));
        assert_eq!(service.state(), ParticipantState::Running);
    }

    #[test]
    fn abort_skips_stop_callbacks() {
        let mut service = coordinated("A");
        run_to(&mut service, ParticipantState::Running);

        let actions = service.on_system_command(SystemCommand::AbortSimulation, T);
        assert_eq!(published(&actions), vec![ParticipantState::Aborting]);
        assert_eq!(
            actions.last(),
            Some(&LifecycleAction::Invoke(LifecycleHook::Abort {
                last_state: ParticipantState::Running
            }))
        );

        let hook = LifecycleHook::Abort { last_state: ParticipantState::Running };
        let actions = service.hook_completed(hook, Ok(()), T);
        assert_eq!(published(&actions), vec![ParticipantState::Shutdown]);
    }

    #[test]
    fn fault_while_running_becomes_stop() {
        let mut service = coordinated("A");
        run_to(&mut service, ParticipantState::Running);
        let actions = service.handler_fault("boom", T);
        assert_eq!(published(&actions), vec![ParticipantState::Stopping]);
    }

    #[test]
    fn fault_during_initialization_becomes_error() {
        let mut service = coordinated("A");
        service.start(T).unwrap();
        service.on_participant_command(ParticipantCommandKind::Initialize, T);
        let actions = service.hook_completed(
            LifecycleHook::CommunicationReady,
            Err(HandlerFault::new("no controllers")),
            T,
        );
        assert_eq!(published(&actions), vec![ParticipantState::Error]);

        let actions = service.on_participant_command(ParticipantCommandKind::ReInitialize, T);
        assert_eq!(published(&actions), vec![ParticipantState::Initializing]);
    }

    #[test]
    fn coldswap_depends_on_permission() {
        let config = LifecycleConfig { allow_coldswap: true, ..LifecycleConfig::default() };
        let mut swappable = LifecycleService::new("A", config, false);
        run_to(&mut swappable, ParticipantState::Stopped);
        let actions = swappable.on_system_command(SystemCommand::PrepareColdswap, T);
        assert_eq!(
            published(&actions),
            vec![ParticipantState::ColdswapPrepare, ParticipantState::ColdswapReady]
        );
        let actions = swappable.on_system_command(SystemCommand::ExecuteColdswap, T);
        assert_eq!(published(&actions), vec![ParticipantState::ColdswapShutdown]);

        let mut fixed = coordinated("B");
        run_to(&mut fixed, ParticipantState::Stopped);
        let actions = fixed.on_system_command(SystemCommand::PrepareColdswap, T);
        assert_eq!(published(&actions), vec![ParticipantState::ColdswapIgnored]);
        assert!(published(&fixed.on_system_command(SystemCommand::ExecuteColdswap, T)).is_empty());
    }

    #[test]
    fn stale_hook_completion_is_ignored() {
        let mut service = coordinated("A");
        run_to(&mut service, ParticipantState::Running);
        service.on_system_command(SystemCommand::Stop, T);
        service.report_error("watchdog", T);
        let actions = service.hook_completed(LifecycleHook::Stop, Ok(()), T);
        assert!(published(&actions).is_empty());
        assert_eq!(service.state(), ParticipantState::Error);
    }

    #[test]
    fn status_carries_reason_and_time() {
        let mut service = coordinated("A");
        service.start(Duration::from_secs(7)).unwrap();
        let status = service.status();
        assert_eq!(status.participant_name, "A");
        assert_eq!(status.enter_reason, "lifecycle started");
        assert_eq!(status.enter_time, Duration::from_secs(7));
    }
}
