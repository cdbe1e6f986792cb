// loxwire-api: Async Rust client for the Loxone Miniserver (HTTP + push channel)

pub mod auth;
pub mod envelope;
pub mod error;
pub mod hashing;
pub mod http;
pub mod transport;
pub mod websocket;

pub use auth::{AuthSession, Clock, Permission, SessionState, SessionToken, SystemClock};
pub use envelope::Envelope;
pub use error::Error;
pub use hashing::DigestAlgorithm;
pub use http::MiniserverClient;
pub use transport::{ChannelTransport, HttpTransport, TlsMode, TransportConfig};
pub use websocket::{PushChannel, StateUpdate, UpdateSink};
