// Shared transport configuration for building reqwest::Client instances.
//
// The HTTP client and the push channel's key fetches share TLS and timeout
// settings through this module. The transport traits the auth session and
// the controller talk through live here too.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::envelope::Envelope;
use crate::error::Error;

const USER_AGENT: &str = concat!("loxwire/", env!("CARGO_PKG_VERSION"));

/// TLS verification mode (api-level mirror of core's TlsVerification).
#[derive(Debug, Clone)]
pub enum TlsMode {
    /// Use the system certificate store.
    System,
    /// Use a custom CA certificate from the given PEM file.
    CustomCa(PathBuf),
    /// Accept any certificate (Miniservers ship self-signed certificates).
    DangerAcceptInvalid,
}

/// Shared transport configuration for building HTTP clients.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub tls: TlsMode,
    pub timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            tls: TlsMode::DangerAcceptInvalid,
            timeout: Duration::from_secs(30),
        }
    }
}

impl TransportConfig {
    /// Build a `reqwest::Client` from this config.
    pub fn build_client(&self) -> Result<reqwest::Client, Error> {
        let mut builder = reqwest::Client::builder()
            .timeout(self.timeout)
            .user_agent(USER_AGENT);

        match &self.tls {
            TlsMode::System => {}
            TlsMode::CustomCa(path) => {
                let cert_pem = std::fs::read(path)
                    .map_err(|e| Error::Tls(format!("failed to read CA cert: {e}")))?;
                let cert = reqwest::Certificate::from_pem(&cert_pem)
                    .map_err(|e| Error::Tls(format!("invalid CA cert: {e}")))?;
                builder = builder.add_root_certificate(cert);
            }
            TlsMode::DangerAcceptInvalid => {
                builder = builder.danger_accept_invalid_certs(true);
            }
        }

        builder
            .build()
            .map_err(|e| Error::Tls(format!("failed to build HTTP client: {e}")))
    }
}

// ── Collaborator seams ───────────────────────────────────────────────

/// Request/response side of the Miniserver: one GET per call, body back.
///
/// [`MiniserverClient`](crate::http::MiniserverClient) is the production
/// implementation; tests substitute their own.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// GET `path` (relative to the Miniserver root) and return the body.
    async fn get_text(&self, path: &str, cancel: &CancellationToken) -> Result<String, Error>;

    /// GET `path` and parse the `LL` envelope. The code is not checked.
    async fn get_envelope(
        &self,
        path: &str,
        cancel: &CancellationToken,
    ) -> Result<Envelope, Error> {
        let body = self.get_text(path, cancel).await?;
        Envelope::parse(&body)
    }
}

/// Command side of the push channel: send one command string, receive the
/// acknowledgement that answers it.
#[async_trait]
pub trait ChannelTransport: Send + Sync {
    async fn command(&self, command: &str, cancel: &CancellationToken)
    -> Result<Envelope, Error>;
}
