//! QUIC transport to the message hub.
//!
//! A participant keeps one bidirectional stream to the hub for its whole
//! life. Envelopes are written back to back on that stream, so the hub's
//! relay order is preserved end to end. Protocol logic stays in the Sans-IO
//! [`Participant`](crate::Participant); this module only moves envelopes.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use bytes::BytesMut;
use cosim_proto::{BusMessage, Envelope, ParticipantId, WireHeader};
use quinn::{ClientConfig, Endpoint, RecvStream, SendStream};
use tokio::sync::mpsc;

use crate::{channel::EventChannel, error::TransportError};

/// ALPN protocol shared with the hub.
pub const ALPN: &[u8] = b"cosim";

/// Idle timeout of the hub connection.
const IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// A participant connection to the hub.
///
/// Reading and writing run on background tasks; envelopes are exchanged
/// through channels. Dropping the value closes the connection.
pub struct ConnectedParticipant {
    id: ParticipantId,
    to_hub: mpsc::UnboundedSender<Envelope>,
    from_hub: mpsc::UnboundedReceiver<Envelope>,
    connection: quinn::Connection,
    tasks: Vec<tokio::task::AbortHandle>,
}

impl ConnectedParticipant {
    /// Bus id assigned by the hub.
    pub fn id(&self) -> ParticipantId {
        self.id
    }

    /// Wait for the next envelope from the hub. `None` once the connection
    /// is gone.
    pub async fn recv(&mut self) -> Option<Envelope> {
        self.from_hub.recv().await
    }

    /// Close the connection.
    pub fn close(&self) {
        self.connection.close(quinn::VarInt::from_u32(0), b"participant closed");
        for task in &self.tasks {
            task.abort();
        }
    }
}

impl Drop for ConnectedParticipant {
    fn drop(&mut self) {
        self.close();
    }
}

impl EventChannel for ConnectedParticipant {
    fn send(&mut self, envelope: Envelope) -> Result<(), TransportError> {
        self.to_hub.send(envelope).map_err(|_| TransportError::Closed)
    }

    fn try_recv(&mut self) -> Result<Option<Envelope>, TransportError> {
        match self.from_hub.try_recv() {
            Ok(envelope) => Ok(Some(envelope)),
            Err(mpsc::error::TryRecvError::Empty) => Ok(None),
            Err(mpsc::error::TryRecvError::Disconnected) => Err(TransportError::Closed),
        }
    }
}

/// Connect to the hub at `hub_addr` and register as `participant_name`.
///
/// Sends `Hello` and waits for the hub to announce this participant, which
/// carries the assigned bus id.
///
/// # Errors
///
/// - `TransportError::Connection` if the hub cannot be reached
/// - `TransportError::Protocol` if the hub answers with something other
///   than our own connection notice
pub async fn connect(
    hub_addr: &str,
    participant_name: &str,
) -> Result<ConnectedParticipant, TransportError> {
    let addr: SocketAddr = hub_addr
        .parse()
        .map_err(|e| TransportError::Connection(format!("invalid address: {e}")))?;
    let bind: SocketAddr = SocketAddr::from(([0, 0, 0, 0], 0));

    let mut endpoint = Endpoint::client(bind)
        .map_err(|e| TransportError::Connection(format!("endpoint creation failed: {e}")))?;
    endpoint.set_default_client_config(insecure_client_config()?);

    let connection = endpoint
        .connect(addr, "localhost")
        .map_err(|e| TransportError::Connection(format!("connect failed: {e}")))?
        .await
        .map_err(|e| TransportError::Connection(format!("connection failed: {e}")))?;

    let (mut send, mut recv) = connection
        .open_bi()
        .await
        .map_err(|e| TransportError::Stream(format!("open stream failed: {e}")))?;

    let hello = Envelope::to(
        ParticipantId::HUB,
        ParticipantId::HUB,
        BusMessage::Hello { participant_name: participant_name.to_string() },
    );
    write_envelope(&mut send, &hello).await?;

    let id = match read_envelope(&mut recv).await? {
        Some(Envelope {
            message: BusMessage::ParticipantConnected { participant_name: name, participant },
            ..
        }) if name == participant_name => participant,
        Some(other) => {
            return Err(TransportError::Protocol(format!(
                "expected our connection notice, got {:?}",
                other.message.kind()
            )));
        },
        None => return Err(TransportError::Closed),
    };
    tracing::info!(participant = participant_name, %id, %addr, "connected to hub");

    let (to_hub_tx, to_hub_rx) = mpsc::unbounded_channel();
    let (from_hub_tx, from_hub_rx) = mpsc::unbounded_channel();
    let reader = tokio::spawn(run_reader(recv, from_hub_tx));
    let writer = tokio::spawn(run_writer(send, to_hub_rx));

    Ok(ConnectedParticipant {
        id,
        to_hub: to_hub_tx,
        from_hub: from_hub_rx,
        connection,
        tasks: vec![reader.abort_handle(), writer.abort_handle()],
    })
}

async fn run_reader(mut recv: RecvStream, from_hub: mpsc::UnboundedSender<Envelope>) {
    loop {
        match read_envelope(&mut recv).await {
            Ok(Some(envelope)) => {
                if from_hub.send(envelope).is_err() {
                    break;
                }
            },
            Ok(None) => {
                tracing::debug!("hub closed the stream");
                break;
            },
            Err(e) => {
                tracing::warn!(error = %e, "hub stream failed");
                break;
            },
        }
    }
}

async fn run_writer(mut send: SendStream, mut to_hub: mpsc::UnboundedReceiver<Envelope>) {
    while let Some(envelope) = to_hub.recv().await {
        if let Err(e) = write_envelope(&mut send, &envelope).await {
            tracing::warn!(error = %e, "send to hub failed");
            break;
        }
    }
    let _ = send.finish();
}

/// Read one envelope. `None` if the stream ended cleanly before a header.
///
/// # Errors
///
/// - `TransportError::Stream` on read failures and truncated envelopes
/// - `TransportError::Protocol` for invalid headers and bodies
pub async fn read_envelope(recv: &mut RecvStream) -> Result<Option<Envelope>, TransportError> {
    let mut buf = BytesMut::zeroed(WireHeader::SIZE);
    match recv.read_exact(&mut buf[..]).await {
        Ok(()) => {},
        Err(quinn::ReadExactError::FinishedEarly(0)) => return Ok(None),
        Err(e) => return Err(TransportError::Stream(format!("header read failed: {e}"))),
    }

    let header = WireHeader::from_bytes(&buf)
        .map_err(|e| TransportError::Protocol(format!("invalid header: {e}")))?;
    let payload_size = header.payload_size() as usize;

    buf.resize(WireHeader::SIZE + payload_size, 0);
    recv.read_exact(&mut buf[WireHeader::SIZE..])
        .await
        .map_err(|e| TransportError::Stream(format!("payload read failed: {e}")))?;

    Envelope::decode(&buf)
        .map(Some)
        .map_err(|e| TransportError::Protocol(format!("envelope decode failed: {e}")))
}

/// Write one envelope.
///
/// # Errors
///
/// - `TransportError::Protocol` if the envelope cannot be encoded
/// - `TransportError::Stream` on write failures
pub async fn write_envelope(send: &mut SendStream, envelope: &Envelope) -> Result<(), TransportError> {
    let bytes = envelope
        .to_bytes()
        .map_err(|e| TransportError::Protocol(format!("encode failed: {e}")))?;
    send.write_all(&bytes)
        .await
        .map_err(|e| TransportError::Stream(format!("write failed: {e}")))
}

/// Client config that accepts any certificate.
///
/// Development only: the hub uses a self-signed certificate.
fn insecure_client_config() -> Result<ClientConfig, TransportError> {
    let mut crypto = rustls::ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(InsecureCertVerifier))
        .with_no_client_auth();
    crypto.alpn_protocols = vec![ALPN.to_vec()];

    let quic = quinn::crypto::rustls::QuicClientConfig::try_from(crypto)
        .map_err(|e| TransportError::Connection(format!("invalid TLS config: {e}")))?;
    let mut config = ClientConfig::new(Arc::new(quic));

    let mut transport = quinn::TransportConfig::default();
    let idle = IDLE_TIMEOUT
        .try_into()
        .map_err(|e| TransportError::Connection(format!("invalid idle timeout: {e}")))?;
    transport.max_idle_timeout(Some(idle));
    config.transport_config(Arc::new(transport));

    Ok(config)
}

/// Certificate verifier that accepts any certificate.
#[derive(Debug)]
struct InsecureCertVerifier;

impl rustls::client::danger::ServerCertVerifier for InsecureCertVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        vec![
            rustls::SignatureScheme::RSA_PKCS1_SHA256,
            rustls::SignatureScheme::RSA_PKCS1_SHA384,
            rustls::SignatureScheme::RSA_PKCS1_SHA512,
            rustls::SignatureScheme::ECDSA_NISTP256_SHA256,
            rustls::SignatureScheme::ECDSA_NISTP384_SHA384,
            rustls::SignatureScheme::ECDSA_NISTP521_SHA512,
            rustls::SignatureScheme::RSA_PSS_SHA256,
            rustls::SignatureScheme::RSA_PSS_SHA384,
            rustls::SignatureScheme::RSA_PSS_SHA512,
            rustls::SignatureScheme::ED25519,
        ]
    }
}
