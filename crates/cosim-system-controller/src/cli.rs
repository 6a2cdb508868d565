//! Command line arguments and their validation.

use std::{collections::HashSet, time::Duration};

use clap::Parser;
use cosim_core::{ControlMode, CosimError, DEFAULT_INIT_TIMEOUT, DEFAULT_SHUTDOWN_TIMEOUT};

/// Co-simulation system controller
#[derive(Parser, Debug)]
#[command(name = "cosim-system-controller")]
#[command(about = "Drives the lifecycle of a co-simulation run")]
#[command(version)]
pub struct Args {
    /// Names of the participants required for the run
    #[arg(required = true)]
    pub participants: Vec<String>,

    /// Hub address
    #[arg(short, long, default_value = "127.0.0.1:8500")]
    pub connect: String,

    /// Participant name of the controller itself
    #[arg(short, long, default_value = "SystemController")]
    pub name: String,

    /// Run identifier, attached to every log line
    #[arg(short, long, default_value = "default")]
    pub domain: String,

    /// Required participant that initializes itself as sync master
    #[arg(long)]
    pub sync_master: Option<String>,

    /// Read commands from stdin instead of following the system state
    #[arg(short, long)]
    pub interactive: bool,

    /// Seconds to wait for the system to become initialized
    #[arg(long, default_value_t = DEFAULT_INIT_TIMEOUT.as_secs())]
    pub init_timeout: u64,

    /// Seconds to wait for shutdown after it was requested
    #[arg(long, default_value_t = DEFAULT_SHUTDOWN_TIMEOUT.as_secs())]
    pub shutdown_timeout: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// Validated controller settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Options {
    pub hub: String,
    pub name: String,
    pub domain: String,
    pub required: Vec<String>,
    pub sync_master: Option<String>,
    pub mode: ControlMode,
    pub init_timeout: Duration,
    pub shutdown_timeout: Duration,
}

impl Args {
    /// Check the arguments for contradictions.
    pub fn into_options(self) -> Result<Options, CosimError> {
        let mut seen = HashSet::new();
        for name in &self.participants {
            if name.is_empty() {
                return Err(CosimError::Configuration("empty participant name".to_string()));
            }
            if !seen.insert(name.as_str()) {
                return Err(CosimError::Configuration(format!(
                    "participant '{name}' is listed twice"
                )));
            }
        }
        if seen.contains(self.name.as_str()) {
            return Err(CosimError::Configuration(format!(
                "controller name '{}' is also a required participant",
                self.name
            )));
        }
        if let Some(master) = &self.sync_master
            && !seen.contains(master.as_str())
        {
            return Err(CosimError::Configuration(format!(
                "sync master '{master}' is not a required participant"
            )));
        }

        Ok(Options {
            hub: self.connect,
            name: self.name,
            domain: self.domain,
            required: self.participants,
            sync_master: self.sync_master,
            mode: if self.interactive { ControlMode::Interactive } else { ControlMode::Automatic },
            init_timeout: Duration::from_secs(self.init_timeout),
            shutdown_timeout: Duration::from_secs(self.shutdown_timeout),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Options, CosimError> {
        let mut argv = vec!["cosim-system-controller"];
        argv.extend_from_slice(args);
        Args::try_parse_from(argv).unwrap().into_options()
    }

    #[test]
    fn defaults_follow_the_core_constants() {
        let options = parse(&["A", "B"]).unwrap();
        assert_eq!(options.required, vec!["A", "B"]);
        assert_eq!(options.mode, ControlMode::Automatic);
        assert_eq!(options.init_timeout, DEFAULT_INIT_TIMEOUT);
        assert_eq!(options.shutdown_timeout, DEFAULT_SHUTDOWN_TIMEOUT);
    }

    #[test]
    fn interactive_flag_selects_interactive_mode() {
        let options = parse(&["--interactive", "A"]).unwrap();
        assert_eq!(options.mode, ControlMode::Interactive);
    }

    #[test]
    fn unknown_sync_master_is_a_configuration_error() {
        let err = parse(&["--sync-master", "C", "A", "B"]).unwrap_err();
        assert!(matches!(err, CosimError::Configuration(_)));
        assert_eq!(err.exit_code(), cosim_core::EXIT_CONFIGURATION);
    }

    #[test]
    fn duplicate_participants_are_rejected() {
        assert!(parse(&["A", "A"]).is_err());
    }

    #[test]
    fn controller_name_must_not_be_required() {
        assert!(parse(&["--name", "A", "A", "B"]).is_err());
    }

    #[test]
    fn missing_participants_is_a_usage_error() {
        assert!(Args::try_parse_from(["cosim-system-controller"]).is_err());
    }
}
