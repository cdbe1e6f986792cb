// ── Runtime connection configuration ──
//
// These types describe *how* to connect to a Miniserver. They carry
// credential data and connection tuning, but never touch disk.
// `loxwire-config` (or any embedding application) builds a `ClientConfig`
// and hands it in.

use std::path::PathBuf;
use std::time::Duration;

use loxwire_api::auth::{DEFAULT_CLIENT_INFO, DEFAULT_REFRESH_WINDOW};
use loxwire_api::transport::{TlsMode, TransportConfig};
use loxwire_api::Permission;
use secrecy::SecretString;
use url::Url;

/// TLS verification strategy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TlsVerification {
    /// System CA store (strict).
    SystemDefaults,
    /// Custom CA certificate file.
    CustomCa(PathBuf),
    /// Skip verification. Miniservers ship self-signed certificates.
    #[default]
    DangerAcceptInvalid,
}

impl From<&TlsVerification> for TlsMode {
    fn from(tls: &TlsVerification) -> Self {
        match tls {
            TlsVerification::SystemDefaults => TlsMode::System,
            TlsVerification::CustomCa(path) => TlsMode::CustomCa(path.clone()),
            TlsVerification::DangerAcceptInvalid => TlsMode::DangerAcceptInvalid,
        }
    }
}

/// Configuration for connecting to a single Miniserver.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Miniserver root URL (e.g., `http://192.168.1.77`).
    pub url: Url,
    /// Push-channel URL. Derived from `url` when unset.
    pub ws_url: Option<Url>,
    pub username: String,
    pub password: SecretString,
    /// Token lifetime class to request.
    pub permission: Permission,
    /// Client description sent with the token request.
    pub client_info: String,
    pub tls: TlsVerification,
    /// HTTP request timeout.
    pub timeout: Duration,
    /// Refresh the token when it has this much lifetime left.
    pub refresh_window: Duration,
    /// Keep-alive interval on the push channel. Zero disables it.
    pub keepalive_interval: Duration,
    /// Skip typed detail parsing when building the device graph.
    pub reduced_detail: bool,
}

impl ClientConfig {
    pub fn new(url: Url, username: impl Into<String>, password: SecretString) -> Self {
        Self {
            url,
            ws_url: None,
            username: username.into(),
            password,
            permission: Permission::default(),
            client_info: DEFAULT_CLIENT_INFO.into(),
            tls: TlsVerification::default(),
            timeout: Duration::from_secs(30),
            refresh_window: DEFAULT_REFRESH_WINDOW,
            keepalive_interval: Duration::from_secs(120),
            reduced_detail: false,
        }
    }

    pub fn transport(&self) -> TransportConfig {
        TransportConfig {
            tls: TlsMode::from(&self.tls),
            timeout: self.timeout,
        }
    }
}
