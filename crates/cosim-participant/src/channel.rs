//! The event channel between a participant and the bus.
//!
//! An [`EventChannel`] moves envelopes to and from the hub. It has no
//! knowledge of what the envelopes mean; the QUIC transport and the
//! deterministic in-memory bus of the test harness both implement it.

use cosim_core::{LogLevel, LogRecord};
use cosim_proto::{Envelope, ParticipantState};

use crate::{error::TransportError, event::ParticipantAction};

/// Bidirectional envelope transport.
///
/// Implementations MUST deliver envelopes in the order the hub relayed them.
pub trait EventChannel {
    /// Queue an envelope for the hub.
    ///
    /// # Errors
    ///
    /// - `TransportError::Closed` if the channel is gone
    fn send(&mut self, envelope: Envelope) -> Result<(), TransportError>;

    /// Next inbound envelope, if one is available.
    ///
    /// # Errors
    ///
    /// - `TransportError::Closed` if the channel is gone
    fn try_recv(&mut self) -> Result<Option<Envelope>, TransportError>;
}

/// Execute participant actions: envelopes go to `channel`, log records to
/// `tracing`.
///
/// Returns the final state if the actions contain one.
///
/// # Errors
///
/// - the first channel error; later actions are not executed
pub fn execute(
    participant: &str,
    channel: &mut impl EventChannel,
    actions: Vec<ParticipantAction>,
) -> Result<Option<ParticipantState>, TransportError> {
    let mut completed = None;
    for action in actions {
        match action {
            ParticipantAction::Send(envelope) => channel.send(envelope)?,
            ParticipantAction::Log(record) => emit(participant, &record),
            ParticipantAction::Completed { final_state } => completed = Some(final_state),
        }
    }
    Ok(completed)
}

/// Forward a log record to `tracing`.
pub fn emit(participant: &str, record: &LogRecord) {
    match record.level {
        LogLevel::Debug => tracing::debug!(participant, "{}", record.message),
        LogLevel::Info => tracing::info!(participant, "{}", record.message),
        LogLevel::Warn => tracing::warn!(participant, "{}", record.message),
        LogLevel::Error => tracing::error!(participant, "{}", record.message),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use cosim_proto::{BusMessage, ParticipantId};

    use super::*;

    #[derive(Default)]
    struct Loopback {
        queue: VecDeque<Envelope>,
    }

    impl EventChannel for Loopback {
        fn send(&mut self, envelope: Envelope) -> Result<(), TransportError> {
            self.queue.push_back(envelope);
            Ok(())
        }

        fn try_recv(&mut self) -> Result<Option<Envelope>, TransportError> {
            Ok(self.queue.pop_front())
        }
    }

    #[test]
    fn execute_sends_in_order_and_reports_completion() {
        let mut channel = Loopback::default();
        let hello = |name: &str| {
            Envelope::broadcast(
                ParticipantId(1),
                BusMessage::Hello { participant_name: name.to_string() },
            )
        };
        let actions = vec![
            ParticipantAction::Send(hello("a")),
            ParticipantAction::Log(LogRecord::info("between")),
            ParticipantAction::Send(hello("b")),
            ParticipantAction::Completed { final_state: ParticipantState::Shutdown },
        ];

        let completed = execute("P", &mut channel, actions).unwrap();

        assert_eq!(completed, Some(ParticipantState::Shutdown));
        assert_eq!(channel.try_recv().unwrap(), Some(hello("a")));
        assert_eq!(channel.try_recv().unwrap(), Some(hello("b")));
        assert_eq!(channel.try_recv().unwrap(), None);
    }
}
