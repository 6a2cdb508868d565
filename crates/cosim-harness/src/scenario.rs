//! Declarative scenario runs.
//!
//! A [`Scenario`] describes a run: its participants and how each one is
//! wired, an optional system controller, the stop condition and an oracle
//! that inspects the finished [`Simulation`].
//!
//! ```ignore
//! Scenario::new()
//!     .system_controller(["A", "B"], Some("A"), ControlMode::Automatic)
//!     .participant(ParticipantConfig::synchronized("A", STEP))
//!     .until(|sim| sim.completed_count() == 2)
//!     .oracle(Box::new(|sim| { assert!(...); Ok(()) }))
//!     .run()?;
//! ```

use cosim_core::{ControlMode, ParticipantConfig};

use crate::{HarnessError, InvariantRegistry, Simulation, simulation::TICK};

/// Wiring applied to a participant after it connected.
pub type Setup = Box<dyn FnOnce(&mut Simulation, usize) -> Result<(), HarnessError>>;

/// Stop condition.
pub type Condition = Box<dyn FnMut(&Simulation) -> bool>;

/// Check run against the finished simulation.
pub type Oracle = Box<dyn FnOnce(&mut Simulation) -> Result<(), HarnessError>>;

/// Default tick budget, one simulated second.
pub const DEFAULT_MAX_TICKS: u64 = 10_000;

struct ControllerSpec {
    required: Vec<String>,
    sync_master: Option<String>,
    mode: ControlMode,
}

/// Builder for a scenario run.
pub struct Scenario {
    seed: u64,
    controller: Option<ControllerSpec>,
    participants: Vec<(ParticipantConfig, Option<Setup>)>,
    max_ticks: u64,
    until: Option<Condition>,
    oracle: Option<Oracle>,
}

impl Default for Scenario {
    fn default() -> Self {
        Self::new()
    }
}

impl Scenario {
    /// Scenario with the default seed and the standard invariants.
    pub fn new() -> Self {
        Self {
            seed: crate::sim_env::DEFAULT_SEED,
            controller: None,
            participants: Vec::new(),
            max_ticks: DEFAULT_MAX_TICKS,
            until: None,
            oracle: None,
        }
    }

    /// Seed of the environment.
    #[must_use]
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Run a system controller for `required`.
    #[must_use]
    pub fn system_controller<S: Into<String>>(
        mut self,
        required: impl IntoIterator<Item = S>,
        sync_master: Option<&str>,
        mode: ControlMode,
    ) -> Self {
        self.controller = Some(ControllerSpec {
            required: required.into_iter().map(Into::into).collect(),
            sync_master: sync_master.map(str::to_string),
            mode,
        });
        self
    }

    /// Add a participant without extra wiring.
    #[must_use]
    pub fn participant(mut self, config: ParticipantConfig) -> Self {
        self.participants.push((config, None));
        self
    }

    /// Add a participant and wire it with `setup` before the run starts.
    #[must_use]
    pub fn participant_with(
        mut self,
        config: ParticipantConfig,
        setup: impl FnOnce(&mut Simulation, usize) -> Result<(), HarnessError> + 'static,
    ) -> Self {
        self.participants.push((config, Some(Box::new(setup))));
        self
    }

    /// Tick budget.
    #[must_use]
    pub fn max_ticks(mut self, max_ticks: u64) -> Self {
        self.max_ticks = max_ticks;
        self
    }

    /// Tick budget expressed in simulated wall-clock time.
    #[must_use]
    pub fn with_time_advance(self, duration: std::time::Duration) -> Self {
        let ticks = duration.as_nanos() / TICK.as_nanos();
        self.max_ticks(u64::try_from(ticks).unwrap_or(u64::MAX))
    }

    /// Stop condition. Without one the run lasts until every participant
    /// with a lifecycle reached a final state.
    #[must_use]
    pub fn until(mut self, condition: impl FnMut(&Simulation) -> bool + 'static) -> Self {
        self.until = Some(Box::new(condition));
        self
    }

    /// Check run after the stop condition held.
    #[must_use]
    pub fn oracle(mut self, oracle: Oracle) -> Self {
        self.oracle = Some(oracle);
        self
    }

    /// Run the scenario and return the finished simulation.
    ///
    /// # Errors
    ///
    /// - errors of the setup closures and of the oracle
    /// - `HarnessError::Stalled` if the stop condition never held
    /// - `HarnessError::Invariants` if the trace violates an invariant
    pub fn run(self) -> Result<Simulation, HarnessError> {
        let mut sim = Simulation::new(self.seed).with_invariants(InvariantRegistry::standard());

        if let Some(controller) = self.controller {
            sim.add_system_controller(
                controller.required,
                controller.sync_master.as_deref(),
                controller.mode,
            )?;
        }

        let mut lifecycles = 0;
        for (config, setup) in self.participants {
            lifecycles += usize::from(config.lifecycle.is_some());
            let index = sim.add_participant(config)?;
            if let Some(setup) = setup {
                setup(&mut sim, index)?;
                sim.flush(index)?;
            }
        }
        sim.start_all()?;

        let mut until = self.until.unwrap_or_else(|| {
            Box::new(move |sim: &Simulation| sim.completed_count() >= lifecycles)
        });
        sim.run_until(self.max_ticks, |sim| until(sim))?;

        if let Some(oracle) = self.oracle {
            oracle(&mut sim)?;
        }
        Ok(sim)
    }
}
