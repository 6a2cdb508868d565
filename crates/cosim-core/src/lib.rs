//! Sans-IO state machines of the co-simulation bus.
//!
//! Every component takes the current time and its inputs and returns a list
//! of actions for a driver to execute. Nothing in this crate performs I/O,
//! spawns tasks or reads a clock, so the same code runs under the
//! deterministic harness and in production processes.
//!
//! | component | role |
//! |-----------|------|
//! | [`LifecycleService`] | one participant's lifecycle state machine |
//! | [`SystemStateTracker`] | aggregate system state over required participants |
//! | [`SystemController`] | workflow configuration and system commands |
//! | [`TimeSyncService`] | distributed step barrier and autonomous pacing |
//! | [`ControllerRegistry`] | generation-checked controller arena |
//! | [`controller`] | CAN, LIN, FlexRay, Ethernet and pub/sub controllers |
//! | [`netsim`] | network simulator and protocol event router |

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod controller;
pub mod env;
pub mod error;
pub mod handler;
pub mod lifecycle;
pub mod log;
pub mod netsim;
pub mod registry;
pub mod system_controller;
pub mod system_state;
pub mod time_sync;

pub use config::{
    DEFAULT_INIT_TIMEOUT, DEFAULT_SHUTDOWN_TIMEOUT, DEFAULT_STEP_DURATION, LifecycleConfig,
    OperationMode, ParticipantConfig, StepCompletion, TimeSyncConfig, TimeSyncMode,
    WatchdogConfig,
};
pub use controller::{Controller, ControllerAction, NetworkContext};
pub use env::Environment;
pub use error::{
    ControllerError, CosimError, EXIT_CONFIGURATION, EXIT_RUNTIME, HandlerFault, HandlerResult,
    LifecycleError, NetSimError, RegistryError, TimeSyncError,
};
pub use handler::{EventFilter, EventKind, HandlerId, HandlerRegistry};
pub use lifecycle::{LifecycleAction, LifecycleHook, LifecycleService};
pub use log::{LogLevel, LogRecord};
pub use netsim::{
    EventProducer, NetworkSimulator, ProtocolEventRouter, Route, SimulatedController,
    SimulatedNetwork, SimulatorAction,
};
pub use registry::{ControllerEntry, ControllerRegistry};
pub use system_controller::{Command, ControlMode, SystemController, SystemControllerAction};
pub use system_state::{MonitorAction, SystemStateTracker};
pub use time_sync::{TimeSyncAction, TimeSyncService, TimeSyncState};
