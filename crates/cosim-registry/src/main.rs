//! Co-simulation hub binary.
//!
//! # Usage
//!
//! ```bash
//! # Self-signed certificate (local runs)
//! cosim-registry --bind 127.0.0.1:8500
//!
//! # Configured certificate
//! cosim-registry --bind 0.0.0.0:8500 --cert cert.pem --key key.pem
//! ```

use clap::Parser;
use cosim_registry::{HubConfig, HubRuntimeConfig, Server};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Co-simulation message hub
#[derive(Parser, Debug)]
#[command(name = "cosim-registry")]
#[command(about = "Message hub participants connect to in order to join a run")]
#[command(version)]
struct Args {
    /// Address to bind to
    #[arg(short, long, default_value = "127.0.0.1:8500")]
    bind: String,

    /// Path to TLS certificate (PEM format)
    #[arg(short, long)]
    cert: Option<String>,

    /// Path to TLS private key (PEM format)
    #[arg(short, long)]
    key: Option<String>,

    /// Maximum concurrent connections
    #[arg(long, default_value_t = cosim_registry::DEFAULT_MAX_CONNECTIONS)]
    max_connections: usize,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    tracing::info!("cosim hub starting on {}", args.bind);

    let config = HubRuntimeConfig {
        bind_address: args.bind,
        cert_path: args.cert,
        key_path: args.key,
        hub: HubConfig { max_connections: args.max_connections },
    };

    let server = Server::bind(config)?;
    tracing::info!("hub listening on {}", server.local_addr()?);

    server.run().await?;

    Ok(())
}
