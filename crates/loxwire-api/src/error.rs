use thiserror::Error;

/// Top-level error type for the `loxwire-api` crate.
///
/// Covers every failure mode across both Miniserver interfaces:
/// authentication, HTTP transport, the push channel, and envelope parsing.
/// `loxwire-core` maps these into user-facing diagnostics.
#[derive(Debug, Error)]
pub enum Error {
    // ── Authentication ──────────────────────────────────────────────
    /// The Miniserver rejected a key exchange, token request, token refresh,
    /// or channel authentication with a non-success code.
    #[error("Authentication failed (code {code}): {message}")]
    Authentication { code: i32, message: String },

    /// A token-requiring operation was attempted before `login`.
    #[error("Not logged in -- call login first")]
    NotLoggedIn,

    // ── Commands ────────────────────────────────────────────────────
    /// A non-authentication command came back with a failing code.
    #[error("Command rejected (code {code}): {message}")]
    Rejected { code: i32, message: String },

    // ── Protocol ────────────────────────────────────────────────────
    /// The response envelope was malformed or lacked a required field.
    #[error("Protocol error: {message}")]
    Protocol { message: String },

    /// JSON deserialization failed, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },

    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, etc.)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// TLS handshake or certificate error.
    #[error("TLS error: {0}")]
    Tls(String),

    // ── Push channel ────────────────────────────────────────────────
    /// WebSocket connection failed.
    #[error("WebSocket connection failed: {0}")]
    WebSocketConnect(String),

    /// WebSocket closed while a command was outstanding, or before one
    /// could be sent.
    #[error("WebSocket closed: {reason}")]
    WebSocketClosed { reason: String },

    // ── Lifecycle ───────────────────────────────────────────────────
    /// The operation's cancellation token fired before it completed.
    #[error("Operation cancelled")]
    Cancelled,
}

impl Error {
    pub(crate) fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Returns `true` if re-running `login` might resolve this error.
    pub fn is_auth_error(&self) -> bool {
        matches!(self, Self::Authentication { .. } | Self::NotLoggedIn)
    }

    /// Returns `true` if this error came from the network rather than the
    /// Miniserver's answer.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::Transport(_)
                | Self::Tls(_)
                | Self::WebSocketConnect(_)
                | Self::WebSocketClosed { .. }
        )
    }

    /// The Miniserver result code carried by this error, if any.
    pub fn code(&self) -> Option<i32> {
        match self {
            Self::Authentication { code, .. } | Self::Rejected { code, .. } => Some(*code),
            _ => None,
        }
    }
}
