// ── Typed device details ──
//
// The `details` object of a device is free-form JSON whose shape depends on
// the device type. The known shapes are decoded once, at build time.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::device::DeviceKind;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwitchDetails {
    /// The switch behaves as a stairwell light switch.
    #[serde(default)]
    pub is_stairway_ls: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LightControllerDetails {
    #[serde(default)]
    pub min_value: Option<i64>,
    #[serde(default)]
    pub max_value: Option<i64>,
    #[serde(default)]
    pub has_white: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LightControllerV2Details {
    /// Id of the master brightness control.
    #[serde(default)]
    pub master_value: Option<String>,
    /// Id of the master colour control.
    #[serde(default)]
    pub master_color: Option<String>,
    #[serde(default)]
    pub favorite_moods: Vec<String>,
    #[serde(default)]
    pub additional_moods: Vec<String>,
    /// Circuit id → display name.
    #[serde(default)]
    pub circuit_names: HashMap<String, String>,
    #[serde(default)]
    pub daylight_config: Option<DaylightConfig>,
    /// Presence configuration bitmask.
    #[serde(default)]
    pub presence: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaylightConfig {
    /// Start, minutes since midnight.
    #[serde(default)]
    pub from: Option<i64>,
    /// End, minutes since midnight.
    #[serde(default)]
    pub until: Option<i64>,
    #[serde(default)]
    pub mode: Option<i64>,
    /// Lighting type per circuit.
    #[serde(default, rename = "type")]
    pub circuit_types: HashMap<String, i64>,
}

/// Decoded `details` of a device.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum DeviceDetails {
    Switch(SwitchDetails),
    LightController(LightControllerDetails),
    LightControllerV2(Box<LightControllerV2Details>),
    /// Generic device, reduced-detail build, or no `details` object.
    #[default]
    None,
}

impl DeviceDetails {
    /// Decode `raw` according to `kind`. A missing object decodes to the
    /// kind's empty details.
    pub fn decode(kind: DeviceKind, raw: Option<&Value>) -> Result<Self, serde_json::Error> {
        let raw = raw.cloned().unwrap_or_else(|| Value::Object(serde_json::Map::new()));
        Ok(match kind {
            DeviceKind::Switch => Self::Switch(serde_json::from_value(raw)?),
            DeviceKind::LightController => Self::LightController(serde_json::from_value(raw)?),
            DeviceKind::LightControllerV2 => {
                Self::LightControllerV2(Box::new(serde_json::from_value(raw)?))
            }
            DeviceKind::Generic => Self::None,
        })
    }
}
