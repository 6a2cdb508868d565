//! Error types for the co-simulation core.
//!
//! [`CosimError`] is the taxonomy surfaced to drivers and binaries. Each
//! component has its own narrow error type that converts into it; components
//! recover locally wherever a safe default exists and only return an error
//! when the caller asked for something impossible.

use std::time::Duration;

use cosim_proto::{
    ControllerHandle, NetworkKind, ParticipantState, ProtocolError, payloads::rpc::RpcCallHandle,
};
use thiserror::Error;

/// Exit code for configuration errors.
pub const EXIT_CONFIGURATION: i32 = -2;

/// Exit code for every other runtime failure.
pub const EXIT_RUNTIME: i32 = -3;

/// Failure reported by an application callback.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("handler fault: {message}")]
pub struct HandlerFault {
    /// What went wrong
    pub message: String,
}

impl HandlerFault {
    /// Fault with the given description.
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }
}

/// Result type returned by application callbacks that can fail.
pub type HandlerResult = Result<(), HandlerFault>;

/// Top-level error taxonomy.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CosimError {
    /// Malformed or contradictory configuration
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A required participant did not reach a state in time
    #[error("coordination timeout: {what} not reached after {waited:?}")]
    CoordinationTimeout {
        /// Condition that was waited for
        what: String,
        /// How long we waited
        waited: Duration,
    },

    /// A request that is not valid in the current state
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// An application callback failed
    #[error(transparent)]
    HandlerFault(#[from] HandlerFault),

    /// Connection to the bus was lost or corrupted
    #[error("transport failure: {0}")]
    TransportFailure(String),
}

impl CosimError {
    /// Whether the driver must terminate the run.
    ///
    /// Configuration errors and coordination timeouts are terminal. Everything
    /// else is recovered inside the participant (logged, ignored, or turned
    /// into a stop request).
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Configuration(_) | Self::CoordinationTimeout { .. })
    }

    /// Process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Configuration(_) => EXIT_CONFIGURATION,
            Self::CoordinationTimeout { .. }
            | Self::ProtocolViolation(_)
            | Self::HandlerFault(_)
            | Self::TransportFailure(_) => EXIT_RUNTIME,
        }
    }
}

/// Errors raised by the participant lifecycle.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LifecycleError {
    /// Operation is not valid in the current state
    #[error("invalid lifecycle transition: cannot {operation} from {state}")]
    InvalidTransition {
        /// Current state
        state: ParticipantState,
        /// Operation that was attempted
        operation: &'static str,
    },

    /// Lifecycle was started twice
    #[error("lifecycle already started")]
    AlreadyStarted,
}

/// Errors raised by the time-sync service.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TimeSyncError {
    /// No step is currently being executed
    #[error("no simulation step in progress")]
    NoStepInProgress,

    /// Participant has no time synchronization configured
    #[error("time synchronization not configured")]
    NotConfigured,
}

/// Errors raised by protocol controllers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ControllerError {
    /// Operation requires a master controller
    #[error("controller '{controller}' is not a LIN master")]
    NotMaster {
        /// Controller name
        controller: String,
    },

    /// Controller was never initialized
    #[error("controller '{controller}' is not initialized")]
    NotInitialized {
        /// Controller name
        controller: String,
    },

    /// Operation requires dynamic response mode
    #[error("controller '{controller}' is not in dynamic response mode")]
    NotDynamic {
        /// Controller name
        controller: String,
    },

    /// Operation is not available in dynamic response mode
    #[error("controller '{controller}' is in dynamic response mode")]
    DynamicMode {
        /// Controller name
        controller: String,
    },

    /// Controller was initialized twice
    #[error("controller '{controller}' is already initialized")]
    AlreadyInitialized {
        /// Controller name
        controller: String,
    },

    /// Configuration cannot be applied
    #[error("controller '{controller}': {reason}")]
    InvalidConfiguration {
        /// Controller name
        controller: String,
        /// What is wrong
        reason: String,
    },

    /// FlexRay transmit buffer index outside the configured buffers
    #[error("controller '{controller}' has no transmit buffer {index}")]
    UnknownTxBuffer {
        /// Controller name
        controller: String,
        /// Requested buffer index
        index: u16,
    },

    /// LIN identifier outside `0..64`
    #[error("invalid LIN id {0}")]
    InvalidLinId(u8),

    /// RPC answer for a call that is not open
    #[error("RPC server '{controller}' has no open {call}")]
    UnknownCall {
        /// Function name
        controller: String,
        /// Handle passed to the answer
        call: RpcCallHandle,
    },

    /// Handle refers to a controller of another protocol
    #[error("controller {handle} is a {actual} controller, expected {expected}")]
    WrongKind {
        /// Handle used
        handle: ControllerHandle,
        /// Protocol the operation needs
        expected: NetworkKind,
        /// Protocol of the controller
        actual: NetworkKind,
    },
}

/// Errors raised by the local controller registry.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// A controller with this name already exists in the participant
    #[error("duplicate controller name '{name}'")]
    DuplicateControllerName {
        /// Controller name
        name: String,
    },

    /// Network is already used with another protocol
    #[error("network '{network}' is {existing}, cannot attach a {requested} controller")]
    NetworkKindMismatch {
        /// Network name
        network: String,
        /// Protocol already bound to the network
        existing: NetworkKind,
        /// Protocol of the new controller
        requested: NetworkKind,
    },

    /// Handle no longer refers to a live controller
    #[error("stale controller handle {0}")]
    StaleHandle(ControllerHandle),
}

/// Errors raised by the network simulator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NetSimError {
    /// Network name already simulated by this participant
    #[error("network '{network}' is already simulated")]
    DuplicateNetwork {
        /// Network name
        network: String,
    },

    /// Protocol cannot be simulated
    #[error("network '{network}' of kind {kind} cannot be simulated")]
    UnsupportedKind {
        /// Network name
        network: String,
        /// Protocol kind
        kind: NetworkKind,
    },
}

impl From<LifecycleError> for CosimError {
    fn from(err: LifecycleError) -> Self {
        Self::ProtocolViolation(err.to_string())
    }
}

impl From<TimeSyncError> for CosimError {
    fn from(err: TimeSyncError) -> Self {
        match err {
            TimeSyncError::NotConfigured => Self::Configuration(err.to_string()),
            TimeSyncError::NoStepInProgress => Self::ProtocolViolation(err.to_string()),
        }
    }
}

impl From<ControllerError> for CosimError {
    fn from(err: ControllerError) -> Self {
        Self::ProtocolViolation(err.to_string())
    }
}

impl From<RegistryError> for CosimError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::DuplicateControllerName { .. }
            | RegistryError::NetworkKindMismatch { .. } => Self::Configuration(err.to_string()),
            RegistryError::StaleHandle(_) => Self::ProtocolViolation(err.to_string()),
        }
    }
}

impl From<NetSimError> for CosimError {
    fn from(err: NetSimError) -> Self {
        Self::Configuration(err.to_string())
    }
}

impl From<ProtocolError> for CosimError {
    fn from(err: ProtocolError) -> Self {
        Self::TransportFailure(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configuration_and_timeouts_are_fatal() {
        assert!(CosimError::Configuration("empty name".to_string()).is_fatal());
        assert!(
            CosimError::CoordinationTimeout {
                what: "Initialized".to_string(),
                waited: Duration::from_secs(30),
            }
            .is_fatal()
        );
    }

    #[test]
    fn local_failures_are_recovered() {
        assert!(!CosimError::ProtocolViolation("send while halted".to_string()).is_fatal());
        assert!(!CosimError::HandlerFault(HandlerFault::new("boom")).is_fatal());
        assert!(!CosimError::TransportFailure("reset".to_string()).is_fatal());
    }

    #[test]
    fn exit_codes_distinguish_configuration() {
        assert_eq!(CosimError::Configuration(String::new()).exit_code(), -2);
        assert_eq!(CosimError::TransportFailure(String::new()).exit_code(), -3);
    }

    #[test]
    fn registry_conflicts_are_configuration_errors() {
        let err: CosimError =
            RegistryError::DuplicateControllerName { name: "CAN1".to_string() }.into();
        assert!(matches!(err, CosimError::Configuration(_)));

        let err: CosimError = RegistryError::StaleHandle(ControllerHandle::new(0, 1)).into();
        assert!(matches!(err, CosimError::ProtocolViolation(_)));
    }
}
