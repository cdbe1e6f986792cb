// ── Device domain types ──

use std::fmt;

use dashmap::DashMap;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::details::DeviceDetails;
use super::location::Preset;

/// Position of a device in its graph's arena. Only meaningful for the
/// graph that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Device type, resolved once from the structure document's `type` string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceKind {
    Switch,
    LightController,
    LightControllerV2,
    Generic,
}

impl DeviceKind {
    pub fn from_type_name(type_name: &str) -> Self {
        match type_name {
            "Switch" => Self::Switch,
            "LightController" => Self::LightController,
            "LightControllerV2" => Self::LightControllerV2,
            _ => Self::Generic,
        }
    }
}

/// One node of the device forest.
///
/// Everything except the state values is fixed at build time. State values
/// are written by the live-state synchronizer and read concurrently.
#[derive(Debug)]
pub struct Device {
    pub id: String,
    /// Id commands for this device are addressed to (`uuidAction`, falling
    /// back to `id`).
    pub command_target_id: String,
    pub name: String,
    pub kind: DeviceKind,
    /// The raw `type` string, kept for generic devices.
    pub type_name: String,
    /// Effective room: own, else inherited from the parent.
    pub room_id: Option<String>,
    /// Effective category: own, else inherited from the parent.
    pub category_id: Option<String>,
    pub default_rating: Option<i64>,
    pub secured: bool,
    pub secured_details: bool,
    pub restrictions: Option<i64>,
    pub has_control_notes: bool,
    pub statistic: Option<Value>,
    pub raw_details: Option<Value>,
    pub details: DeviceDetails,
    pub preset: Option<Preset>,
    pub links: Vec<String>,
    /// Slot name → state id, in document order.
    pub states: IndexMap<String, String>,
    pub parent: Option<NodeId>,
    pub(crate) children: IndexMap<String, NodeId>,
    pub(crate) values: DashMap<String, String>,
}

impl Device {
    /// Current value of a state slot, if one has been received.
    pub fn state(&self, slot: &str) -> Option<String> {
        self.values.get(slot).map(|v| v.value().clone())
    }

    /// Snapshot of every slot that has a value.
    pub fn state_values(&self) -> IndexMap<String, String> {
        self.states
            .keys()
            .filter_map(|slot| self.state(slot).map(|v| (slot.clone(), v)))
            .collect()
    }

    /// Name of the first slot bound to `state_id`.
    pub fn slot_for(&self, state_id: &str) -> Option<&str> {
        self.states
            .iter()
            .find(|(_, id)| id.as_str() == state_id)
            .map(|(slot, _)| slot.as_str())
    }

    /// Child ids in document order.
    pub fn child_ids(&self) -> impl Iterator<Item = &str> {
        self.children.keys().map(String::as_str)
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    pub(crate) fn set_state(&self, slot: &str, value: String) {
        self.values.insert(slot.to_owned(), value);
    }
}
