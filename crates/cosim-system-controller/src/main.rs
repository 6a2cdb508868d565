//! System controller binary.
//!
//! Joins the hub as an observer participant, publishes the required
//! participants and drives the run through its lifecycle.
//!
//! # Usage
//!
//! ```bash
//! # Automatic: initialize, run, shut down when the system stops
//! cosim-system-controller --connect 127.0.0.1:8500 --sync-master EcuA EcuA EcuB
//!
//! # Interactive: commands from stdin (Run, Stop, Shutdown, Initialize <name>, ...)
//! cosim-system-controller --interactive EcuA EcuB
//! ```
//!
//! # Exit codes
//!
//! | code | meaning |
//! |------|---------|
//! | `0` | the system shut down |
//! | `-1` | invalid command line |
//! | `-2` | configuration error |
//! | `-3` | any other failure (timeouts, lost hub connection) |

mod cli;
mod supervisor;

use clap::Parser;
use cosim_core::{ControlMode, CosimError, ParticipantConfig, SystemController};
use cosim_participant::{
    Participant,
    runtime::Runtime,
    system_controller,
    transport,
};
use cosim_registry::SystemEnv;
use tokio::sync::mpsc;
use tracing::Instrument;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::{
    cli::{Args, Options},
    supervisor::Deadlines,
};

/// Exit code for an invalid command line.
const EXIT_USAGE: i32 = -1;

#[tokio::main]
async fn main() {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(err) => {
            let code = if err.use_stderr() { EXIT_USAGE } else { 0 };
            let _ = err.print();
            std::process::exit(code);
        },
    };

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    let code = match args.into_options() {
        Ok(options) => {
            let span = tracing::info_span!("run", domain = %options.domain);
            match run(options).instrument(span).await {
                Ok(()) => 0,
                Err(err) => {
                    tracing::error!("{}", err);
                    err.exit_code()
                },
            }
        },
        Err(err) => {
            tracing::error!("{}", err);
            err.exit_code()
        },
    };
    std::process::exit(code);
}

async fn run(options: Options) -> Result<(), CosimError> {
    let connection = transport::connect(&options.hub, &options.name).await?;
    let mut participant =
        Participant::new(SystemEnv::new(), ParticipantConfig::observer(&options.name), connection.id())?;

    let controller = SystemController::new(
        options.required.iter().cloned(),
        options.sync_master.clone(),
        options.mode,
    );
    let handle = system_controller::attach(&mut participant, controller);
    tracing::info!(
        required = ?options.required,
        sync_master = ?options.sync_master,
        mode = ?options.mode,
        "workflow published"
    );

    let runtime = Runtime::new(participant, connection);
    let runtime_handle = runtime.handle();
    let (shutdown_tx, shutdown_rx) = mpsc::unbounded_channel();

    let deadlines = Deadlines { init: options.init_timeout, shutdown: options.shutdown_timeout };
    let supervisor = tokio::spawn(
        supervisor::supervise(handle.clone(), runtime_handle.clone(), deadlines, shutdown_rx)
            .in_current_span(),
    );

    let commands = (options.mode == ControlMode::Interactive).then(|| {
        tokio::spawn(
            supervisor::read_commands(handle.clone(), runtime_handle.clone(), shutdown_tx.clone())
                .in_current_span(),
        )
    });

    let interrupt = {
        let handle = handle.clone();
        let runtime_handle = runtime_handle.clone();
        tokio::spawn(
            async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::info!("interrupted, shutting down the system");
                    let _ = shutdown_tx.send(());
                    let _ = runtime_handle.run(move |participant| handle.request_shutdown(participant));
                }
            }
            .in_current_span(),
        )
    };

    let result = runtime.run().await;

    supervisor.abort();
    interrupt.abort();
    if let Some(commands) = commands {
        commands.abort();
    }

    result?;
    if handle.is_completed() {
        Ok(())
    } else {
        Err(CosimError::TransportFailure("controller stopped before the system shut down".into()))
    }
}
