//! Participant events and actions.

use cosim_core::LogRecord;
use cosim_proto::{Envelope, ParticipantState};

/// Events the driver feeds into the participant.
///
/// The driver is responsible for:
/// - Receiving envelopes from the bus
/// - Ticking the participant so pending simulation steps, the step watchdog
///   and autonomous workers make progress
/// - Reporting the loss of the bus connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParticipantEvent {
    /// Envelope received from the bus.
    EnvelopeReceived(Envelope),

    /// Run a granted simulation step, check the watchdog and pace the
    /// autonomous worker.
    Tick,

    /// The connection to the hub is gone.
    ConnectionLost {
        /// Why the connection was lost
        reason: String,
    },
}

/// Actions the participant asks the driver to execute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParticipantAction {
    /// Put an envelope on the bus.
    Send(Envelope),

    /// Forward to the logging backend.
    Log(LogRecord),

    /// The lifecycle reached a terminal state; the driver may disconnect.
    Completed {
        /// Final state
        final_state: ParticipantState,
    },
}
