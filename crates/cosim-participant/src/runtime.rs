//! Async driver for a participant connected over QUIC.
//!
//! The runtime owns the [`Participant`] and its [`ConnectedParticipant`] and
//! runs one loop that multiplexes:
//! - envelopes from the hub
//! - closures sent through a [`RuntimeHandle`], which run with mutable access
//!   to the participant
//! - ticks, immediately while a granted step is pending and otherwise every
//!   [`DEFAULT_TICK_INTERVAL`]
//!
//! The loop ends when the participant reaches a terminal state or a handle
//! asks it to exit.

use std::time::Duration;

use cosim_core::{CosimError, Environment};
use cosim_proto::ParticipantState;
use tokio::sync::mpsc;

use crate::{
    channel,
    error::{ParticipantError, TransportError},
    event::{ParticipantAction, ParticipantEvent},
    participant::Participant,
    transport::ConnectedParticipant,
};

/// Default pause between ticks while no step is pending.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(1);

/// Closure executed on the runtime's participant.
pub type RuntimeCommand<E> = Box<dyn FnOnce(&mut Participant<E>) + Send>;

enum Control<E: Environment> {
    Run(RuntimeCommand<E>),
    Exit,
    Fail(CosimError),
}

/// Sends work to a running [`Runtime`] from other tasks or from handlers.
pub struct RuntimeHandle<E: Environment> {
    control: mpsc::UnboundedSender<Control<E>>,
}

impl<E: Environment> Clone for RuntimeHandle<E> {
    fn clone(&self) -> Self {
        Self { control: self.control.clone() }
    }
}

impl<E: Environment> RuntimeHandle<E> {
    /// Run `command` on the participant inside the event loop.
    ///
    /// # Errors
    ///
    /// - `TransportError::Closed` if the runtime has ended
    pub fn run(
        &self,
        command: impl FnOnce(&mut Participant<E>) + Send + 'static,
    ) -> Result<(), TransportError> {
        self.send(Control::Run(Box::new(command)))
    }

    /// End the event loop without waiting for a terminal state.
    ///
    /// # Errors
    ///
    /// - `TransportError::Closed` if the runtime has ended
    pub fn exit(&self) -> Result<(), TransportError> {
        self.send(Control::Exit)
    }

    /// End the event loop with `error`.
    ///
    /// # Errors
    ///
    /// - `TransportError::Closed` if the runtime has ended
    pub fn fail(&self, error: CosimError) -> Result<(), TransportError> {
        self.send(Control::Fail(error))
    }

    fn send(&self, control: Control<E>) -> Result<(), TransportError> {
        self.control.send(control).map_err(|_| TransportError::Closed)
    }
}

/// Event loop of one participant process.
pub struct Runtime<E: Environment> {
    participant: Participant<E>,
    connection: ConnectedParticipant,
    control_tx: mpsc::UnboundedSender<Control<E>>,
    control_rx: mpsc::UnboundedReceiver<Control<E>>,
}

impl<E: Environment> Runtime<E> {
    /// Drive `participant` over `connection`.
    pub fn new(participant: Participant<E>, connection: ConnectedParticipant) -> Self {
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        Self { participant, connection, control_tx, control_rx }
    }

    /// Handle for sending work into the loop.
    pub fn handle(&self) -> RuntimeHandle<E> {
        RuntimeHandle { control: self.control_tx.clone() }
    }

    /// Run until the participant terminates or a handle asks to exit.
    ///
    /// Returns the final state, or `None` after an exit request.
    ///
    /// # Errors
    ///
    /// - `CosimError::TransportFailure` if the hub connection is lost before
    ///   a terminal state
    /// - the error passed to [`RuntimeHandle::fail`]
    pub async fn run(mut self) -> Result<Option<ParticipantState>, CosimError> {
        let name = self.participant.name().to_string();
        let actions = self.participant.take_actions();
        if let Some(state) = self.execute(actions)? {
            return Ok(Some(state));
        }

        loop {
            let tick = if self.participant.has_pending_step() {
                Duration::ZERO
            } else {
                DEFAULT_TICK_INTERVAL
            };
            let sleep = self.participant.env().clone();

            let event = tokio::select! {
                envelope = self.connection.recv() => match envelope {
                    Some(envelope) => ParticipantEvent::EnvelopeReceived(envelope),
                    None => ParticipantEvent::ConnectionLost {
                        reason: "hub connection closed".to_string(),
                    },
                },
                Some(control) = self.control_rx.recv() => match control {
                    Control::Run(command) => {
                        command(&mut self.participant);
                        let actions = self.participant.take_actions();
                        if let Some(state) = self.execute(actions)? {
                            return Ok(Some(state));
                        }
                        continue;
                    },
                    Control::Exit => {
                        tracing::info!(participant = %name, "runtime exit requested");
                        return Ok(None);
                    },
                    Control::Fail(error) => return Err(error),
                },
                () = sleep.sleep(tick) => ParticipantEvent::Tick,
            };

            if matches!(event, ParticipantEvent::ConnectionLost { .. }) {
                // Nothing can be sent anymore; run the abort path for its
                // handlers and logs only.
                if let Ok(actions) = self.participant.handle(event) {
                    for action in actions {
                        if let ParticipantAction::Log(record) = action {
                            channel::emit(&name, &record);
                        }
                    }
                }
                return Err(TransportError::Closed.into());
            }

            match self.participant.handle(event) {
                Ok(actions) => {
                    if let Some(state) = self.execute(actions)? {
                        return Ok(Some(state));
                    }
                },
                Err(ParticipantError::Terminated { .. }) => return Ok(self.participant.final_state()),
                Err(err) => return Err(err.into()),
            }
        }
    }

    fn execute(
        &mut self,
        actions: Vec<ParticipantAction>,
    ) -> Result<Option<ParticipantState>, CosimError> {
        let name = self.participant.name().to_string();
        Ok(channel::execute(&name, &mut self.connection, actions)?)
    }
}
