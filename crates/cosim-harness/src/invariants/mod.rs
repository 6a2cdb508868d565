//! Invariant checking for deterministic co-simulation runs.
//!
//! Invariants are properties that must hold after every delivery round,
//! whatever order the bus happened to deliver envelopes in.
//!
//! # Architecture
//!
//! The simulation extracts what participants published on the bus and the
//! trace of step callbacks into a [`SystemSnapshot`], then runs registered
//! [`Invariant`] checks against it.
//!
//! # Usage
//!
//! ```ignore
//! let registry = InvariantRegistry::standard();
//! registry.check_all(&simulation.snapshot())?;
//! ```

mod checks;
mod snapshot;

pub use checks::{LifecycleMonotonicity, StepBarrier, StepsContiguous};
pub use snapshot::{ParticipantSnapshot, StepPhase, StepRecord, SystemSnapshot};

/// Invariant check result.
pub type InvariantResult = Result<(), Violation>;

/// Invariant violation with context.
#[derive(Debug, Clone)]
pub struct Violation {
    /// Name of the violated invariant.
    pub invariant: &'static str,
    /// Description of what went wrong.
    pub message: String,
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.invariant, self.message)
    }
}

impl std::error::Error for Violation {}

/// A property checked against a [`SystemSnapshot`].
pub trait Invariant: Send + Sync {
    /// Invariant name for error reporting.
    fn name(&self) -> &'static str;

    /// Check the invariant against the current state.
    ///
    /// Returns `Ok(())` if the invariant holds, or a [`Violation`]
    /// describing what went wrong.
    fn check(&self, state: &SystemSnapshot) -> InvariantResult;
}

/// Registry of invariants to check.
pub struct InvariantRegistry {
    invariants: Vec<Box<dyn Invariant>>,
}

impl Default for InvariantRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InvariantRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<_> = self.invariants.iter().map(|i| i.name()).collect();
        f.debug_struct("InvariantRegistry").field("invariants", &names).finish()
    }
}

impl InvariantRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self { invariants: Vec::new() }
    }

    /// Registry with the lifecycle and time synchronization invariants.
    ///
    /// Includes:
    /// - [`LifecycleMonotonicity`]: published states follow the state machine
    /// - [`StepsContiguous`]: each participant steps by its step duration
    /// - [`StepBarrier`]: nobody runs ahead of a peer's unfinished step
    pub fn standard() -> Self {
        let mut registry = Self::new();
        registry.add(LifecycleMonotonicity);
        registry.add(StepsContiguous);
        registry.add(StepBarrier);
        registry
    }

    /// Add an invariant to the registry.
    pub fn add<I: Invariant + 'static>(&mut self, invariant: I) {
        self.invariants.push(Box::new(invariant));
    }

    /// Check all invariants against the given state.
    ///
    /// Returns `Ok(())` if all invariants hold, or all violations found.
    ///
    /// # Errors
    ///
    /// Every violation found, in registration order.
    pub fn check_all(&self, state: &SystemSnapshot) -> Result<(), Vec<Violation>> {
        let violations: Vec<_> =
            self.invariants.iter().filter_map(|inv| inv.check(state).err()).collect();

        if violations.is_empty() { Ok(()) } else { Err(violations) }
    }

    /// Check all invariants, panicking on violation.
    ///
    /// # Panics
    ///
    /// If any invariant is violated.
    #[allow(clippy::panic)]
    pub fn assert_all(&self, state: &SystemSnapshot, context: &str) {
        if let Err(violations) = self.check_all(state) {
            let messages: Vec<_> = violations.iter().map(ToString::to_string).collect();
            panic!("Invariant violation {context}:\n  {}", messages.join("\n  "));
        }
    }

    /// Number of registered invariants.
    pub fn len(&self) -> usize {
        self.invariants.len()
    }

    /// Check if registry is empty.
    pub fn is_empty(&self) -> bool {
        self.invariants.is_empty()
    }
}
