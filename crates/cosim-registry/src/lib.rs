//! Message hub of the co-simulation bus.
//!
//! Participants connect over QUIC, say hello, and from then on every envelope
//! they send is relayed by the hub to its destination. The hub never decodes
//! network traffic beyond the envelope itself and keeps no simulation state:
//! lifecycle, time synchronization and network simulation all live in the
//! participants.
//!
//! # Architecture
//!
//! [`HubDriver`] is the Sans-IO core: it turns connection events into send,
//! close and log actions. [`Server`] executes those actions with Quinn and
//! Tokio. Each connection gets one outbound queue, and actions are queued
//! while the driver lock is held, so all participants observe relayed
//! envelopes in the same order.
//!
//! # Components
//!
//! - [`HubDriver`]: registration, join/leave notices, relaying
//! - [`Roster`]: names and ids of registered participants
//! - [`Server`]: production runtime
//! - [`QuinnTransport`]: QUIC endpoint
//! - [`SystemEnv`]: production environment

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod driver;
mod error;
mod roster;
mod system_env;
mod transport;

use std::{collections::HashMap, sync::Arc};

use cosim_core::{LogLevel, LogRecord};
use cosim_participant::transport::{read_envelope, write_envelope};
use cosim_proto::Envelope;
pub use driver::{DEFAULT_MAX_CONNECTIONS, HubAction, HubConfig, HubDriver, HubEvent};
pub use error::{HubError, RosterError};
pub use roster::{Roster, RosterEntry};
pub use system_env::SystemEnv;
use tokio::sync::{Mutex, mpsc};
pub use transport::QuinnTransport;

/// Runtime configuration of the hub process.
#[derive(Debug, Clone)]
pub struct HubRuntimeConfig {
    /// Address to bind to (e.g., "0.0.0.0:8500")
    pub bind_address: String,
    /// Path to TLS certificate (PEM format)
    pub cert_path: Option<String>,
    /// Path to TLS private key (PEM format)
    pub key_path: Option<String>,
    /// Driver configuration
    pub hub: HubConfig,
}

impl Default for HubRuntimeConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8500".to_string(),
            cert_path: None,
            key_path: None,
            hub: HubConfig::default(),
        }
    }
}

/// Outbound side of one connection.
struct Outbound {
    queue: mpsc::UnboundedSender<Envelope>,
    connection: quinn::Connection,
}

/// Driver and outbound queues, guarded together.
struct HubState {
    driver: HubDriver<SystemEnv>,
    outbound: HashMap<u64, Outbound>,
}

impl HubState {
    fn process(&mut self, event: HubEvent) {
        let actions = self.driver.process_event(event);
        self.execute(actions);
    }

    fn execute(&mut self, actions: Vec<HubAction>) {
        for action in actions {
            match action {
                HubAction::Send { connection, envelope } => match self.outbound.get(&connection) {
                    Some(outbound) => {
                        if outbound.queue.send(envelope).is_err() {
                            tracing::debug!(connection, "outbound queue closed");
                        }
                    },
                    None => tracing::debug!(connection, "send to closed connection skipped"),
                },
                HubAction::Close { connection, reason } => {
                    if let Some(outbound) = self.outbound.get(&connection) {
                        outbound.connection.close(quinn::VarInt::from_u32(1), reason.as_bytes());
                    }
                },
                HubAction::Log(record) => log(&record),
            }
        }
    }
}

fn log(record: &LogRecord) {
    match record.level {
        LogLevel::Debug => tracing::debug!("{}", record.message),
        LogLevel::Info => tracing::info!("{}", record.message),
        LogLevel::Warn => tracing::warn!("{}", record.message),
        LogLevel::Error => tracing::error!("{}", record.message),
    }
}

/// Production hub.
pub struct Server {
    driver: HubDriver<SystemEnv>,
    transport: QuinnTransport,
}

impl Server {
    /// Create and bind a hub.
    ///
    /// # Errors
    ///
    /// - `HubError::Config` for an invalid address or TLS material
    /// - `HubError::Transport` if the endpoint cannot be created
    pub fn bind(config: HubRuntimeConfig) -> Result<Self, HubError> {
        let driver = HubDriver::new(SystemEnv::new(), config.hub);
        let transport = QuinnTransport::bind(
            &config.bind_address,
            config.cert_path.as_deref(),
            config.key_path.as_deref(),
        )?;
        Ok(Self { driver, transport })
    }

    /// Local address the hub is bound to.
    ///
    /// # Errors
    ///
    /// - `HubError::Transport` if the socket has no address
    pub fn local_addr(&self) -> Result<std::net::SocketAddr, HubError> {
        self.transport.local_addr()
    }

    /// Accept and serve connections until the endpoint closes.
    ///
    /// # Errors
    ///
    /// - `HubError::Transport` if the local address cannot be read
    pub async fn run(self) -> Result<(), HubError> {
        tracing::info!("hub serving on {}", self.transport.local_addr()?);

        let state = Arc::new(Mutex::new(HubState { driver: self.driver, outbound: HashMap::new() }));
        let mut next_connection = 1u64;

        loop {
            match self.transport.accept().await {
                Ok(Some(connection)) => {
                    let id = next_connection;
                    next_connection += 1;
                    let state = Arc::clone(&state);
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(id, connection, state).await {
                            tracing::warn!(connection = id, "connection error: {}", e);
                        }
                    });
                },
                Ok(None) => {
                    tracing::info!("endpoint closed, hub stopping");
                    return Ok(());
                },
                Err(e) => tracing::error!("accept error: {}", e),
            }
        }
    }
}

/// Serve one participant connection.
async fn handle_connection(
    id: u64,
    connection: quinn::Connection,
    state: Arc<Mutex<HubState>>,
) -> Result<(), HubError> {
    tracing::debug!(connection = id, remote = %connection.remote_address(), "new connection");

    let (send, mut recv) = connection
        .accept_bi()
        .await
        .map_err(|e| HubError::Transport(format!("accept_bi failed: {e}")))?;

    let (queue, outbound) = mpsc::unbounded_channel();
    tokio::spawn(run_writer(id, send, outbound));

    {
        let mut state = state.lock().await;
        state.outbound.insert(id, Outbound { queue, connection: connection.clone() });
        state.process(HubEvent::ConnectionAccepted { connection: id });
    }

    let reason = loop {
        match read_envelope(&mut recv).await {
            Ok(Some(envelope)) => {
                state.lock().await.process(HubEvent::EnvelopeReceived { connection: id, envelope });
            },
            Ok(None) => break "stream finished".to_string(),
            Err(e) => break e.to_string(),
        }
    };

    let mut state = state.lock().await;
    // Dropping the queue lets the writer flush and finish the stream.
    state.outbound.remove(&id);
    state.process(HubEvent::ConnectionClosed { connection: id, reason });
    Ok(())
}

async fn run_writer(id: u64, mut send: quinn::SendStream, mut outbound: mpsc::UnboundedReceiver<Envelope>) {
    while let Some(envelope) = outbound.recv().await {
        if let Err(e) = write_envelope(&mut send, &envelope).await {
            tracing::debug!(connection = id, "write failed: {}", e);
            return;
        }
    }
    let _ = send.finish();
}
