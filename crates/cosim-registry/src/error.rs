//! Hub error types.

use cosim_core::CosimError;
use cosim_proto::ParticipantId;
use thiserror::Error;

/// Errors of the hub process: startup, transport and connection handling.
#[derive(Error, Debug)]
pub enum HubError {
    /// Invalid bind address or TLS material. Fatal at startup.
    #[error("configuration error: {0}")]
    Config(String),

    /// Endpoint or connection failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// A participant sent something the hub cannot relay. Fatal for that
    /// connection only.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Roster bookkeeping rejected a registration.
    #[error(transparent)]
    Roster(#[from] RosterError),
}

impl From<std::io::Error> for HubError {
    fn from(err: std::io::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

impl From<HubError> for CosimError {
    fn from(err: HubError) -> Self {
        match err {
            HubError::Config(_) => Self::Configuration(err.to_string()),
            HubError::Transport(_) => Self::TransportFailure(err.to_string()),
            HubError::Protocol(_) | HubError::Roster(_) => Self::ProtocolViolation(err.to_string()),
        }
    }
}

/// Registration errors of the participant roster.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RosterError {
    /// Another connection already uses this participant name
    #[error("participant name '{name}' is already taken by {holder}")]
    NameTaken {
        /// Requested name
        name: String,
        /// Participant currently holding the name
        holder: ParticipantId,
    },

    /// The connection already said hello
    #[error("connection {connection} is already registered as {participant}")]
    AlreadyRegistered {
        /// Connection id
        connection: u64,
        /// Id assigned on the first hello
        participant: ParticipantId,
    },

    /// Participant names must not be empty
    #[error("participant name must not be empty")]
    EmptyName,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_errors_are_fatal() {
        let err: CosimError = HubError::Config("no key".into()).into();
        assert!(err.is_fatal());
    }

    #[test]
    fn roster_error_display() {
        let err = RosterError::NameTaken { name: "Ecu1".into(), holder: ParticipantId(3) };
        assert_eq!(
            err.to_string(),
            "participant name 'Ecu1' is already taken by 0000000000000003"
        );
    }
}
