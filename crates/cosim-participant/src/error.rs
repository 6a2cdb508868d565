//! Participant error types.

use cosim_core::{
    ControllerError, CosimError, LifecycleError, NetSimError, RegistryError, TimeSyncError,
};
use cosim_proto::ProtocolError;
use thiserror::Error;

/// Errors returned by [`crate::Participant`] operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParticipantError {
    /// Invalid participant configuration
    #[error(transparent)]
    Configuration(CosimError),

    /// Lifecycle operation not valid in the current state
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    /// Controller operation failed
    #[error(transparent)]
    Controller(#[from] ControllerError),

    /// Controller creation or lookup failed
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// Network simulator registration failed
    #[error(transparent)]
    NetSim(#[from] NetSimError),

    /// Time synchronization operation failed
    #[error(transparent)]
    TimeSync(#[from] TimeSyncError),

    /// Envelope could not be encoded or decoded
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The participant has no lifecycle service
    #[error("participant '{participant}' has no lifecycle")]
    NoLifecycle {
        /// Participant name
        participant: String,
    },

    /// A terminal state was reached; no further events are processed
    #[error("participant '{participant}' has terminated")]
    Terminated {
        /// Participant name
        participant: String,
    },
}

impl From<ParticipantError> for CosimError {
    fn from(err: ParticipantError) -> Self {
        match err {
            ParticipantError::Configuration(inner) => inner,
            ParticipantError::Lifecycle(inner) => inner.into(),
            ParticipantError::Controller(inner) => inner.into(),
            ParticipantError::Registry(inner) => inner.into(),
            ParticipantError::TimeSync(inner) => inner.into(),
            ParticipantError::NetSim(_) | ParticipantError::NoLifecycle { .. } => {
                Self::Configuration(err.to_string())
            },
            ParticipantError::Protocol(_) | ParticipantError::Terminated { .. } => {
                Self::ProtocolViolation(err.to_string())
            },
        }
    }
}

/// Errors of the channel between a participant and the hub.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Connection could not be established or was lost
    #[error("connection failed: {0}")]
    Connection(String),

    /// Reading or writing a stream failed
    #[error("stream error: {0}")]
    Stream(String),

    /// The peer sent bytes that are not a valid envelope
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The channel was closed
    #[error("channel closed")]
    Closed,
}

impl From<TransportError> for CosimError {
    fn from(err: TransportError) -> Self {
        Self::TransportFailure(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configuration_errors_stay_fatal() {
        let err = ParticipantError::Configuration(CosimError::Configuration("bad".into()));
        let cosim: CosimError = err.into();
        assert!(cosim.is_fatal());
        assert_eq!(cosim.exit_code(), cosim_core::EXIT_CONFIGURATION);
    }

    #[test]
    fn transport_errors_are_transport_failures() {
        let cosim: CosimError = TransportError::Closed.into();
        assert!(matches!(cosim, CosimError::TransportFailure(_)));
        assert!(!cosim.is_fatal());
    }
}
