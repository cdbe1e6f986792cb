// ── Device graph ──
//
// Arena of devices plus the lookup tables built from one structure
// document. Immutable once built except for per-device state values, so a
// published graph can be read from any thread without locking.

use std::collections::{BTreeMap, HashMap};

use indexmap::IndexMap;

use crate::model::{Category, Device, NodeId, Room};

/// A device found through the global index, with the slot the looked-up id
/// is bound to (if it is a state id).
#[derive(Debug, Clone, Copy)]
pub struct Resolved<'a> {
    pub node: NodeId,
    pub device: &'a Device,
    pub slot: Option<&'a str>,
}

#[derive(Debug, Default)]
pub struct DeviceGraph {
    pub(crate) nodes: Vec<Device>,
    pub(crate) roots: Vec<NodeId>,
    pub(crate) index: HashMap<String, NodeId>,
    pub(crate) rooms: IndexMap<String, Room>,
    pub(crate) categories: IndexMap<String, Category>,
    pub(crate) operating_modes: BTreeMap<i64, String>,
    pub(crate) last_modified: Option<String>,
}

impl DeviceGraph {
    // ── Index lookups ────────────────────────────────────────────────

    /// Look up any indexed id: a root device id, a command-target id, or a
    /// state id.
    pub fn resolve(&self, id: &str) -> Option<Resolved<'_>> {
        let node = *self.index.get(id)?;
        let device = self.node(node)?;
        Some(Resolved {
            node,
            device,
            slot: device.slot_for(id),
        })
    }

    /// The device registered under `id` in the global index.
    pub fn device(&self, id: &str) -> Option<&Device> {
        self.resolve(id).map(|r| r.device)
    }

    pub fn node(&self, node: NodeId) -> Option<&Device> {
        self.nodes.get(node.0)
    }

    /// Number of ids in the global index.
    pub fn index_len(&self) -> usize {
        self.index.len()
    }

    /// Every `(indexed id, node)` pair, in no particular order.
    pub fn index_entries(&self) -> impl Iterator<Item = (&str, NodeId)> {
        self.index.iter().map(|(id, node)| (id.as_str(), *node))
    }

    // ── Device traversal ─────────────────────────────────────────────

    /// Top-level devices in document order.
    pub fn roots(&self) -> impl Iterator<Item = &Device> {
        self.roots.iter().filter_map(|n| self.node(*n))
    }

    /// Every device, parents before their children.
    pub fn devices(&self) -> impl Iterator<Item = (NodeId, &Device)> {
        self.nodes.iter().enumerate().map(|(i, d)| (NodeId(i), d))
    }

    pub fn children_of<'a>(&'a self, device: &'a Device) -> impl Iterator<Item = &'a Device> {
        device.children.values().filter_map(|n| self.node(*n))
    }

    /// A child of `parent` by its own id. Children are not in the global
    /// index under their own id; this is how they are reached.
    pub fn child<'a>(&'a self, parent: &Device, child_id: &str) -> Option<&'a Device> {
        parent.children.get(child_id).and_then(|n| self.node(*n))
    }

    /// Number of devices at any depth.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    // ── Name queries ─────────────────────────────────────────────────

    /// First device (parents before children) whose name matches,
    /// ignoring case.
    pub fn find_by_name(&self, name: &str) -> Option<&Device> {
        let needle = name.to_lowercase();
        self.nodes.iter().find(|d| d.name.to_lowercase() == needle)
    }

    /// Devices whose effective room has this name, ignoring case.
    pub fn devices_in_room(&self, room_name: &str) -> Vec<&Device> {
        let needle = room_name.to_lowercase();
        self.nodes
            .iter()
            .filter(|d| self.room_of(d).is_some_and(|r| r.name.to_lowercase() == needle))
            .collect()
    }

    /// Devices whose effective category has this name, ignoring case.
    pub fn devices_in_category(&self, category_name: &str) -> Vec<&Device> {
        let needle = category_name.to_lowercase();
        self.nodes
            .iter()
            .filter(|d| {
                self.category_of(d)
                    .is_some_and(|c| c.name.to_lowercase() == needle)
            })
            .collect()
    }

    // ── Rooms, categories, operating modes ───────────────────────────

    pub fn room_of(&self, device: &Device) -> Option<&Room> {
        device.room_id.as_deref().and_then(|id| self.rooms.get(id))
    }

    pub fn category_of(&self, device: &Device) -> Option<&Category> {
        device
            .category_id
            .as_deref()
            .and_then(|id| self.categories.get(id))
    }

    pub fn room(&self, id: &str) -> Option<&Room> {
        self.rooms.get(id)
    }

    pub fn category(&self, id: &str) -> Option<&Category> {
        self.categories.get(id)
    }

    pub fn rooms(&self) -> impl Iterator<Item = &Room> {
        self.rooms.values()
    }

    pub fn categories(&self) -> impl Iterator<Item = &Category> {
        self.categories.values()
    }

    /// Operating mode id → name.
    pub fn operating_modes(&self) -> &BTreeMap<i64, String> {
        &self.operating_modes
    }

    pub fn operating_mode(&self, id: i64) -> Option<&str> {
        self.operating_modes.get(&id).map(String::as_str)
    }

    /// `lastModified` of the document this graph was built from.
    pub fn last_modified(&self) -> Option<&str> {
        self.last_modified.as_deref()
    }
}
