//! Running a [`SystemController`] inside a participant.
//!
//! [`attach`] publishes the workflow and subscribes the controller to the
//! participant's system state and status notifications, so the controller
//! reacts from within the participant's dispatch queue. The returned
//! [`SystemControllerHandle`] issues operator commands.

use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use cosim_core::{
    Command, CosimError, Environment, LogRecord, SystemController, SystemControllerAction,
};
use cosim_proto::SystemState;

use crate::participant::Participant;

/// Shared handle to an attached system controller.
#[derive(Debug, Clone)]
pub struct SystemControllerHandle {
    inner: Arc<Mutex<SystemController>>,
}

/// Attach `controller` to `participant` and publish its workflow.
///
/// The participant is usually an observer without a lifecycle of its own.
pub fn attach<E: Environment>(
    participant: &mut Participant<E>,
    controller: SystemController,
) -> SystemControllerHandle {
    let actions = controller.start();
    let handle = SystemControllerHandle::new(controller);
    apply(participant, actions);

    let on_state = handle.clone();
    participant.add_system_state_handler(move |participant, state| {
        let actions = on_state.lock().on_system_state(state);
        apply(participant, actions);
        Ok(())
    });

    let on_status = handle.clone();
    participant.add_participant_status_handler(move |participant, status| {
        let actions = on_status.lock().on_participant_status(status);
        apply(participant, actions);
        Ok(())
    });

    handle
}

impl SystemControllerHandle {
    /// Handle that is not attached to any participant yet.
    pub fn new(controller: SystemController) -> Self {
        Self { inner: Arc::new(Mutex::new(controller)) }
    }

    fn lock(&self) -> MutexGuard<'_, SystemController> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Execute an operator command through `participant`.
    pub fn execute<E: Environment>(&self, participant: &mut Participant<E>, command: Command) {
        let actions = self.lock().execute(command);
        apply(participant, actions);
    }

    /// Stop the system.
    pub fn stop<E: Environment>(&self, participant: &mut Participant<E>) {
        let actions = self.lock().stop();
        apply(participant, actions);
    }

    /// Stop the system, then initialize every required participant again.
    pub fn stop_and_restart<E: Environment>(&self, participant: &mut Participant<E>) {
        let actions = self.lock().stop_and_restart();
        apply(participant, actions);
    }

    /// Stop if running, then shut the system down.
    pub fn request_shutdown<E: Environment>(&self, participant: &mut Participant<E>) {
        let actions = self.lock().request_shutdown();
        apply(participant, actions);
    }

    /// Last observed system state.
    pub fn system_state(&self) -> SystemState {
        self.lock().system_state()
    }

    /// Whether the system reached `Shutdown`.
    pub fn is_completed(&self) -> bool {
        self.lock().is_completed()
    }

    /// Required participants.
    pub fn required(&self) -> Vec<String> {
        self.lock().required().to_vec()
    }

    /// Fail if the system was not initialized within `timeout`.
    ///
    /// # Errors
    ///
    /// - `CosimError::CoordinationTimeout` once the timeout passed
    pub fn check_init_timeout(&self, elapsed: Duration, timeout: Duration) -> Result<(), CosimError> {
        self.lock().check_init_timeout(elapsed, timeout)
    }
}

fn apply<E: Environment>(participant: &mut Participant<E>, actions: Vec<SystemControllerAction>) {
    for action in actions {
        match action {
            SystemControllerAction::SetWorkflow(workflow) => participant.set_workflow(workflow),
            SystemControllerAction::SystemCommand(command) => {
                participant.send_system_command(command);
            },
            SystemControllerAction::ParticipantCommand(command) => {
                participant.send_participant_command(command);
            },
            SystemControllerAction::Completed(state) => {
                participant.log(LogRecord::info(format!("system reached {state}")));
            },
            SystemControllerAction::Log(record) => participant.log(record),
        }
    }
}
