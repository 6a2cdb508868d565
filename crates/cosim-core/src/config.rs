//! Participant configuration.
//!
//! Configuration is plain data built in code. Defaults come from the
//! `DEFAULT_*` constants; override fields with struct update syntax.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::CosimError;

/// Time the system controller waits for every participant to shut down.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Time the system controller waits for every required participant to reach
/// `Initialized`.
pub const DEFAULT_INIT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default simulation step.
pub const DEFAULT_STEP_DURATION: Duration = Duration::from_millis(1);

/// How a participant's lifecycle is driven.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum OperationMode {
    /// Follows system and participant commands
    #[default]
    Coordinated,
    /// Initializes and runs on its own
    Autonomous,
}

/// Lifecycle configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleConfig {
    /// Coordinated or autonomous
    pub operation_mode: OperationMode,
    /// Whether the participant takes part in a coldswap
    pub allow_coldswap: bool,
    /// Time a driver waits for shutdown before giving up
    pub shutdown_timeout: Duration,
    /// Time a driver waits for initialization before giving up
    pub init_timeout: Duration,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            operation_mode: OperationMode::Coordinated,
            allow_coldswap: false,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            init_timeout: DEFAULT_INIT_TIMEOUT,
        }
    }
}

/// How simulation steps are scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TimeSyncMode {
    /// Lock-step with every other synchronized participant
    #[default]
    Synchronized,
    /// Free-running worker, no simulated-time guarantee
    Autonomous,
}

/// How a simulation step is completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum StepCompletion {
    /// The step completes when the handler returns
    #[default]
    Implicit,
    /// The step completes when `complete_simulation_step` is called
    Explicit,
}

/// Wall-clock limits on a single step handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchdogConfig {
    /// Exceeding this logs a warning
    pub warn_timeout: Duration,
    /// Exceeding this reports a participant error
    pub error_timeout: Duration,
}

/// Time synchronization configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSyncConfig {
    /// Length of each simulation step
    pub step_duration: Duration,
    /// Synchronized or autonomous
    pub mode: TimeSyncMode,
    /// Implicit or explicit step completion
    pub completion: StepCompletion,
    /// Optional step watchdog
    pub watchdog: Option<WatchdogConfig>,
    /// Wall-clock pause between autonomous worker steps
    pub worker_pacing: Option<Duration>,
}

impl Default for TimeSyncConfig {
    fn default() -> Self {
        Self {
            step_duration: DEFAULT_STEP_DURATION,
            mode: TimeSyncMode::Synchronized,
            completion: StepCompletion::Implicit,
            watchdog: None,
            worker_pacing: None,
        }
    }
}

/// Configuration of one participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantConfig {
    /// Unique participant name
    pub name: String,
    /// This participant's lifecycle is not commanded by the system controller
    /// to initialize; it initializes itself once the system is idle
    pub is_sync_master: bool,
    /// Lifecycle service, if any. Pure monitors and system controllers have
    /// none.
    pub lifecycle: Option<LifecycleConfig>,
    /// Time synchronization, if any
    pub time_sync: Option<TimeSyncConfig>,
}

impl ParticipantConfig {
    /// Coordinated participant without time synchronization.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_sync_master: false,
            lifecycle: Some(LifecycleConfig::default()),
            time_sync: None,
        }
    }

    /// Participant with no lifecycle (monitor or system controller).
    pub fn observer(name: impl Into<String>) -> Self {
        Self { name: name.into(), is_sync_master: false, lifecycle: None, time_sync: None }
    }

    /// Coordinated participant stepping in lock-step with `step_duration`.
    pub fn synchronized(name: impl Into<String>, step_duration: Duration) -> Self {
        Self {
            time_sync: Some(TimeSyncConfig { step_duration, ..TimeSyncConfig::default() }),
            ..Self::new(name)
        }
    }

    /// Operation mode of the lifecycle, if there is one.
    pub fn operation_mode(&self) -> Option<OperationMode> {
        self.lifecycle.as_ref().map(|l| l.operation_mode)
    }

    /// Check the configuration for contradictions.
    ///
    /// # Errors
    ///
    /// `CosimError::Configuration` for an empty name, a zero step duration, a
    /// watchdog whose warn limit is not below its error limit, time sync
    /// without a lifecycle, or a sync master that is not a coordinated,
    /// synchronized participant.
    pub fn validate(&self) -> Result<(), CosimError> {
        if self.name.trim().is_empty() {
            return Err(CosimError::Configuration("participant name is empty".to_string()));
        }

        if let Some(time_sync) = &self.time_sync {
            if time_sync.step_duration.is_zero() {
                return Err(CosimError::Configuration(format!(
                    "participant '{}': step duration must be positive",
                    self.name
                )));
            }
            if let Some(watchdog) = time_sync.watchdog
                && watchdog.warn_timeout >= watchdog.error_timeout
            {
                return Err(CosimError::Configuration(format!(
                    "participant '{}': watchdog warn timeout {:?} must be below error timeout {:?}",
                    self.name, watchdog.warn_timeout, watchdog.error_timeout
                )));
            }
            if self.lifecycle.is_none() {
                return Err(CosimError::Configuration(format!(
                    "participant '{}': time synchronization requires a lifecycle",
                    self.name
                )));
            }
        }

        if self.is_sync_master {
            let synchronized =
                self.time_sync.as_ref().is_some_and(|t| t.mode == TimeSyncMode::Synchronized);
            let coordinated = self.operation_mode() == Some(OperationMode::Coordinated);
            if !synchronized || !coordinated {
                return Err(CosimError::Configuration(format!(
                    "participant '{}': sync master must be coordinated and synchronized",
                    self.name
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(ParticipantConfig::new("CanWriter").validate().is_ok());
        assert!(
            ParticipantConfig::synchronized("CanWriter", Duration::from_millis(1))
                .validate()
                .is_ok()
        );
        assert!(ParticipantConfig::observer("SystemController").validate().is_ok());
    }

    #[test]
    fn empty_name_is_rejected() {
        let err = ParticipantConfig::new("  ").validate().unwrap_err();
        assert!(matches!(err, CosimError::Configuration(_)));
    }

    #[test]
    fn zero_step_is_rejected() {
        let config = ParticipantConfig::synchronized("A", Duration::ZERO);
        assert!(config.validate().is_err());
    }

    #[test]
    fn inverted_watchdog_is_rejected() {
        let config = ParticipantConfig {
            time_sync: Some(TimeSyncConfig {
                watchdog: Some(WatchdogConfig {
                    warn_timeout: Duration::from_secs(2),
                    error_timeout: Duration::from_secs(1),
                }),
                ..TimeSyncConfig::default()
            }),
            ..ParticipantConfig::new("A")
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn sync_master_must_be_synchronized() {
        let config = ParticipantConfig { is_sync_master: true, ..ParticipantConfig::new("A") };
        assert!(config.validate().is_err());

        let config = ParticipantConfig {
            is_sync_master: true,
            ..ParticipantConfig::synchronized("A", Duration::from_millis(1))
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn time_sync_needs_lifecycle() {
        let config = ParticipantConfig {
            time_sync: Some(TimeSyncConfig::default()),
            ..ParticipantConfig::observer("A")
        };
        assert!(config.validate().is_err());
    }
}
