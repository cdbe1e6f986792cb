// ── Structure document DTOs ──
//
// Serde mirror of `data/LoxApp3.json`, limited to the sections the graph
// uses. Maps are `IndexMap` so document order survives into the graph and
// rebuilds are deterministic. Required-field checks happen in the builder,
// where the device path is known.

use indexmap::IndexMap;
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StructureDocument {
    #[serde(default)]
    pub last_modified: Option<String>,
    #[serde(default)]
    pub rooms: IndexMap<String, RoomDto>,
    #[serde(default, rename = "cats")]
    pub categories: IndexMap<String, CategoryDto>,
    #[serde(default)]
    pub operating_modes: IndexMap<String, OperatingModeDto>,
    #[serde(default)]
    pub controls: IndexMap<String, DeviceDto>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomDto {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub default_rating: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CategoryDto {
    #[serde(default)]
    pub name: String,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
}

/// Operating modes appear either as bare names or as `{ "name": ... }`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum OperatingModeDto {
    Name(String),
    Entry { name: String },
}

impl OperatingModeDto {
    pub fn into_name(self) -> String {
        match self {
            Self::Name(name) | Self::Entry { name } => name,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct PresetDto {
    pub uuid: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceDto {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, rename = "type")]
    pub type_name: Option<String>,
    #[serde(default)]
    pub room: Option<String>,
    #[serde(default)]
    pub cat: Option<String>,
    #[serde(default)]
    pub uuid_action: Option<String>,
    #[serde(default)]
    pub default_rating: Option<i64>,
    #[serde(default)]
    pub is_secured: Option<bool>,
    #[serde(default)]
    pub secured_details: Option<bool>,
    /// Slot name → state id. Values are kept raw so a non-string entry
    /// skips one slot instead of failing the whole document.
    #[serde(default)]
    pub states: IndexMap<String, Value>,
    #[serde(default)]
    pub details: Option<Value>,
    #[serde(default)]
    pub statistic: Option<Value>,
    #[serde(default)]
    pub restrictions: Option<i64>,
    #[serde(default)]
    pub has_control_notes: Option<bool>,
    #[serde(default)]
    pub preset: Option<PresetDto>,
    #[serde(default)]
    pub links: Vec<String>,
    #[serde(default)]
    pub sub_controls: IndexMap<String, DeviceDto>,
}
