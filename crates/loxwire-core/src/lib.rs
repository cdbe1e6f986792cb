// loxwire-core: Device graph, live state and session lifecycle between loxwire-api and consumers.

pub mod command;
pub mod config;
pub mod controller;
pub mod error;
pub mod graph;
pub mod model;
pub mod sync;

// ── Primary re-exports ──────────────────────────────────────────────
pub use command::{CommandDispatcher, CommandResult, command_path};
pub use config::{ClientConfig, TlsVerification};
pub use controller::{ConnectionState, Controller};
pub use error::CoreError;
pub use graph::{BuildOptions, DeviceGraph, GraphBuilder, Resolved};
pub use sync::{StateChange, StateSynchronizer, Subscription};

// Re-export model types at the crate root for ergonomics.
pub use model::{
    Category, DaylightConfig, Device, DeviceDetails, DeviceKind, LightControllerDetails,
    LightControllerV2Details, NodeId, Preset, Room, SwitchDetails,
};

// Protocol-level types consumers commonly need alongside the controller.
pub use loxwire_api::{Permission, SessionState, SessionToken};
