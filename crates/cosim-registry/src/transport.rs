//! QUIC endpoint of the hub.
//!
//! TLS 1.3 through `rustls`, ALPN `cosim`. Without a configured certificate
//! the hub generates a self-signed one, which participants accept because
//! their client config skips verification. Suitable for local runs only.

use std::{net::SocketAddr, sync::Arc};

use cosim_participant::transport::ALPN;
use quinn::{Endpoint, ServerConfig};

use crate::error::HubError;

/// QUIC endpoint accepting participant connections.
pub struct QuinnTransport {
    endpoint: Endpoint,
}

impl QuinnTransport {
    /// Bind to `address`.
    ///
    /// Uses the PEM certificate and key if both paths are given, otherwise a
    /// freshly generated self-signed certificate.
    ///
    /// # Errors
    ///
    /// - `HubError::Config` for an invalid address or TLS material
    /// - `HubError::Transport` if the endpoint cannot be created
    pub fn bind(
        address: &str,
        cert_path: Option<&str>,
        key_path: Option<&str>,
    ) -> Result<Self, HubError> {
        let addr: SocketAddr = address
            .parse()
            .map_err(|e| HubError::Config(format!("invalid bind address '{address}': {e}")))?;

        let server_config = match (cert_path, key_path) {
            (Some(cert), Some(key)) => load_tls_config(cert, key)?,
            _ => generate_self_signed_config()?,
        };

        let endpoint = Endpoint::server(server_config, addr)
            .map_err(|e| HubError::Transport(format!("failed to create endpoint: {e}")))?;

        tracing::info!("QUIC transport bound to {}", addr);

        Ok(Self { endpoint })
    }

    /// Wait for the next connection. `None` once the endpoint is closed.
    ///
    /// # Errors
    ///
    /// - `HubError::Transport` if the handshake failed
    pub async fn accept(&self) -> Result<Option<quinn::Connection>, HubError> {
        let Some(incoming) = self.endpoint.accept().await else {
            return Ok(None);
        };

        incoming
            .await
            .map(Some)
            .map_err(|e| HubError::Transport(format!("handshake failed: {e}")))
    }

    /// Local address the endpoint is bound to.
    ///
    /// # Errors
    ///
    /// - `HubError::Transport` if the socket has no address
    pub fn local_addr(&self) -> Result<SocketAddr, HubError> {
        self.endpoint
            .local_addr()
            .map_err(|e| HubError::Transport(format!("failed to get local address: {e}")))
    }
}

fn load_tls_config(cert_path: &str, key_path: &str) -> Result<ServerConfig, HubError> {
    let cert_pem = std::fs::read(cert_path)
        .map_err(|e| HubError::Config(format!("failed to read cert '{cert_path}': {e}")))?;
    let key_pem = std::fs::read(key_path)
        .map_err(|e| HubError::Config(format!("failed to read key '{key_path}': {e}")))?;

    let certs = rustls_pemfile::certs(&mut &cert_pem[..])
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| HubError::Config(format!("failed to parse certificates: {e}")))?;
    let key = rustls_pemfile::private_key(&mut &key_pem[..])
        .map_err(|e| HubError::Config(format!("failed to parse private key: {e}")))?
        .ok_or_else(|| HubError::Config("no private key found".to_string()))?;

    server_config(certs, key)
}

fn generate_self_signed_config() -> Result<ServerConfig, HubError> {
    let cert = rcgen::generate_simple_self_signed(vec!["localhost".to_string()])
        .map_err(|e| HubError::Config(format!("failed to generate self-signed cert: {e}")))?;

    let key = rustls::pki_types::PrivatePkcs8KeyDer::from(cert.key_pair.serialize_der());
    let config = server_config(vec![cert.cert.der().clone()], key.into())?;

    tracing::warn!("using a self-signed certificate");
    Ok(config)
}

fn server_config(
    certs: Vec<rustls::pki_types::CertificateDer<'static>>,
    key: rustls::pki_types::PrivateKeyDer<'static>,
) -> Result<ServerConfig, HubError> {
    let mut tls_config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| HubError::Config(format!("invalid TLS config: {e}")))?;
    tls_config.alpn_protocols = vec![ALPN.to_vec()];

    let quic = quinn::crypto::rustls::QuicServerConfig::try_from(tls_config)
        .map_err(|e| HubError::Config(format!("QUIC config error: {e}")))?;
    Ok(ServerConfig::with_crypto(Arc::new(quic)))
}
