//! Participant
//!
//! The application-facing side of the co-simulation bus. A [`Participant`]
//! combines the Sans-IO services of [`cosim_core`] into one state machine:
//! lifecycle, time synchronization, system state monitoring, controllers,
//! the protocol event router and an optional network simulator.
//!
//! # Architecture
//!
//! The participant receives events ([`ParticipantEvent`]), processes them
//! together with the application's callbacks, and returns actions
//! ([`ParticipantAction`]) for the driver to execute. Any
//! [`EventChannel`] can carry its envelopes.
//!
//! # Components
//!
//! - [`Participant`]: participant state machine and application API
//! - [`EventChannel`]: envelope transport abstraction
//! - [`system_controller::attach`]: run a system controller inside a
//!   participant
//!
//! # Transport (optional)
//!
//! With the `transport` feature enabled, this crate also provides:
//! - [`transport::connect`]: connect to a hub over QUIC
//! - [`runtime::Runtime`]: async event loop for a connected participant

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod channel;
mod error;
mod event;
mod participant;
pub mod system_controller;

#[cfg(feature = "transport")]
pub mod runtime;
#[cfg(feature = "transport")]
pub mod transport;

pub use channel::EventChannel;
pub use cosim_core::env::Environment;
pub use error::{ParticipantError, TransportError};
pub use event::{ParticipantAction, ParticipantEvent};
pub use participant::{
    AbortHandler, CanRef, EthernetRef, EventCallback, FlexrayRef, HookHandler, LinRef,
    Participant, PubSubRef, RpcRef, StatusHandler, StepHandler, SystemStateHandler,
};
pub use system_controller::SystemControllerHandle;
