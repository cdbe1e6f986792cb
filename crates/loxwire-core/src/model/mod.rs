// ── Device domain model ──
//
// Canonical representation of what the structure document describes:
// devices, the rooms and categories they belong to, and their decoded
// details.

pub mod details;
pub mod device;
pub mod location;

pub use details::{
    DaylightConfig, DeviceDetails, LightControllerDetails, LightControllerV2Details,
    SwitchDetails,
};
pub use device::{Device, DeviceKind, NodeId};
pub use location::{Category, Preset, Room};
