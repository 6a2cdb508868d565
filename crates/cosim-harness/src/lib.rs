//! Deterministic simulation harness for the co-simulation bus.
//!
//! Runs participants, the hub driver and the system controller in one
//! process on a virtual clock. Nothing touches the network or the wall
//! clock, so a run is fully determined by its seed and its schedule.
//!
//! # Components
//!
//! - [`SimEnv`]: virtual clock and seeded randomness
//! - [`SimBus`]: the production hub driver behind in-memory channels
//! - [`Simulation`]: drives many participants to quiescence, injects faults
//! - [`Scenario`]: declarative runs with an oracle
//!
//! # Invariant Testing
//!
//! The `invariants` module checks properties of a whole run: lifecycle
//! walks, contiguous steps and the step barrier. Use
//! [`InvariantRegistry::standard()`] for all of them.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod error;
pub mod invariants;
pub mod scenario;
pub mod sim_bus;
pub mod sim_env;
pub mod simulation;

pub use error::HarnessError;
pub use invariants::{
    Invariant, InvariantRegistry, InvariantResult, LifecycleMonotonicity, ParticipantSnapshot,
    StepBarrier, StepPhase, StepRecord, StepsContiguous, SystemSnapshot, Violation,
};
pub use scenario::Scenario;
pub use sim_bus::{SimBus, SimChannel};
pub use sim_env::SimEnv;
pub use simulation::Simulation;
