// ── Core error types ──
//
// User-facing errors from loxwire-core. Consumers see authentication,
// rejection and disconnection as domain variants rather than raw envelopes.
// The `From<loxwire_api::Error>` impl does the translation.

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Connection errors ────────────────────────────────────────────
    #[error("Cannot connect to Miniserver: {reason}")]
    ConnectionFailed { reason: String },

    #[error("Authentication failed (code {code}): {message}")]
    AuthenticationFailed { code: i32, message: String },

    #[error("Not logged in")]
    NotLoggedIn,

    #[error("Controller disconnected")]
    ControllerDisconnected,

    #[error("Operation cancelled")]
    Cancelled,

    // ── Structure errors ─────────────────────────────────────────────
    /// A device in the structure document lacks a required field.
    #[error("Invalid structure document at {path}: missing or invalid '{field}'")]
    StructureParse { path: String, field: String },

    /// The structure document is not valid JSON of the expected shape.
    #[error("Cannot decode structure document: {message}")]
    StructureDecode { message: String },

    // ── Data errors ──────────────────────────────────────────────────
    #[error("Device not found: {identifier}")]
    DeviceNotFound { identifier: String },

    // ── Operation errors ─────────────────────────────────────────────
    #[error("Command rejected by Miniserver (code {code}): {message}")]
    Rejected { code: i32, message: String },

    #[error("Protocol error: {message}")]
    Protocol { message: String },

    // ── Configuration errors ─────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<loxwire_api::Error> for CoreError {
    fn from(err: loxwire_api::Error) -> Self {
        use loxwire_api::Error as Api;

        match err {
            Api::Authentication { code, message } => {
                CoreError::AuthenticationFailed { code, message }
            }
            Api::NotLoggedIn => CoreError::NotLoggedIn,
            Api::Rejected { code, message } => CoreError::Rejected { code, message },
            Api::Cancelled => CoreError::Cancelled,
            Api::Protocol { message } => CoreError::Protocol { message },
            Api::Deserialization { message, body: _ } => CoreError::Protocol {
                message: format!("unparsable response: {message}"),
            },
            Api::Transport(e) => CoreError::ConnectionFailed {
                reason: e.to_string(),
            },
            Api::InvalidUrl(e) => CoreError::Config {
                message: format!("Invalid URL: {e}"),
            },
            Api::Tls(msg) => CoreError::ConnectionFailed {
                reason: format!("TLS error: {msg}"),
            },
            Api::WebSocketConnect(reason) => CoreError::ConnectionFailed {
                reason: format!("push channel connection failed: {reason}"),
            },
            Api::WebSocketClosed { .. } => CoreError::ControllerDisconnected,
        }
    }
}
