// ── Device graph builder ──
//
// Turns a structure document into a `DeviceGraph`. Every build starts from
// scratch; nothing is merged into a previous graph.
//
// Index rule:
//   - root devices are indexed under their own id
//   - any device whose command-target id differs from its id is also
//     indexed under the command-target id, at any depth
//   - every state id is indexed, at any depth
//   - child devices are reachable by their own id only through the
//     parent's children map

use std::collections::hash_map::Entry;

use indexmap::IndexMap;
use serde_json::Value;
use tracing::{debug, trace, warn};

use super::device_graph::DeviceGraph;
use super::structure::{DeviceDto, StructureDocument};
use crate::error::CoreError;
use crate::model::{Category, Device, DeviceDetails, DeviceKind, NodeId, Preset, Room};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BuildOptions {
    /// Skip typed detail decoding. Indexing is unaffected.
    pub reduced_detail: bool,
}

/// Effective placement handed from a parent to its children.
struct ParentLink<'a> {
    node: NodeId,
    room_id: Option<&'a str>,
    category_id: Option<&'a str>,
}

#[derive(Debug, Clone, Default)]
pub struct GraphBuilder {
    options: BuildOptions,
}

impl GraphBuilder {
    pub fn new(options: BuildOptions) -> Self {
        Self { options }
    }

    /// Decode and build from the raw structure document.
    pub fn build_from_str(&self, json: &str) -> Result<DeviceGraph, CoreError> {
        let doc: StructureDocument =
            serde_json::from_str(json).map_err(|e| CoreError::StructureDecode {
                message: e.to_string(),
            })?;
        self.build(doc)
    }

    pub fn build(&self, doc: StructureDocument) -> Result<DeviceGraph, CoreError> {
        let mut graph = DeviceGraph {
            last_modified: doc.last_modified,
            ..DeviceGraph::default()
        };

        for (id, dto) in doc.rooms {
            let room = Room {
                id: id.clone(),
                name: dto.name,
                image: dto.image,
                default_rating: dto.default_rating,
            };
            graph.rooms.insert(id, room);
        }

        for (id, dto) in doc.categories {
            let category = Category {
                id: id.clone(),
                name: dto.name,
                kind: dto.kind,
                color: dto.color,
            };
            graph.categories.insert(id, category);
        }

        for (key, dto) in doc.operating_modes {
            match key.trim().parse::<i64>() {
                Ok(id) => {
                    graph.operating_modes.insert(id, dto.into_name());
                }
                Err(_) => debug!(key, "skipping operating mode with non-numeric id"),
            }
        }

        for (id, dto) in doc.controls {
            let path = format!("controls/{id}");
            let node = self.add_device(&mut graph, id, dto, &path, None)?;
            graph.roots.push(node);
        }

        debug!(
            devices = graph.len(),
            roots = graph.roots.len(),
            indexed = graph.index_len(),
            rooms = graph.rooms.len(),
            categories = graph.categories.len(),
            "device graph built"
        );
        Ok(graph)
    }

    fn add_device(
        &self,
        graph: &mut DeviceGraph,
        id: String,
        mut dto: DeviceDto,
        path: &str,
        parent: Option<ParentLink<'_>>,
    ) -> Result<NodeId, CoreError> {
        let name = dto.name.take().ok_or_else(|| missing(path, "name"))?;
        let type_name = dto.type_name.take().ok_or_else(|| missing(path, "type"))?;
        let kind = DeviceKind::from_type_name(&type_name);

        let room_id = dto
            .room
            .take()
            .or_else(|| parent.as_ref().and_then(|p| p.room_id.map(str::to_owned)));
        let category_id = dto
            .cat
            .take()
            .or_else(|| parent.as_ref().and_then(|p| p.category_id.map(str::to_owned)));
        let command_target_id = dto.uuid_action.take().unwrap_or_else(|| id.clone());

        let details = if self.options.reduced_detail {
            DeviceDetails::None
        } else {
            DeviceDetails::decode(kind, dto.details.as_ref()).unwrap_or_else(|e| {
                warn!(path, error = %e, "undecodable device details; keeping raw JSON only");
                DeviceDetails::None
            })
        };

        let states = string_states(path, std::mem::take(&mut dto.states));
        let sub_controls = std::mem::take(&mut dto.sub_controls);

        let node = NodeId(graph.nodes.len());
        let parent_node = parent.as_ref().map(|p| p.node);

        // Global index registrations.
        for state_id in states.values() {
            register(graph, state_id, node);
        }
        if parent.is_none() {
            register(graph, &id, node);
        }
        if command_target_id != id {
            register(graph, &command_target_id, node);
        }

        if let Some(parent_device) = parent_node.and_then(|p| graph.nodes.get_mut(p.0)) {
            parent_device.children.insert(id.clone(), node);
        }

        graph.nodes.push(Device {
            id,
            command_target_id,
            name,
            kind,
            type_name,
            room_id,
            category_id,
            default_rating: dto.default_rating,
            secured: dto.is_secured.unwrap_or(false),
            secured_details: dto.secured_details.unwrap_or(false),
            restrictions: dto.restrictions,
            has_control_notes: dto.has_control_notes.unwrap_or(false),
            statistic: dto.statistic,
            raw_details: dto.details,
            details,
            preset: dto.preset.map(|p| Preset {
                id: p.uuid,
                name: p.name,
            }),
            links: dto.links,
            states,
            parent: parent_node,
            children: IndexMap::new(),
            values: dashmap::DashMap::new(),
        });

        for (child_id, child_dto) in sub_controls {
            let child_path = format!("{path}/subControls/{child_id}");
            let (room, category) = graph
                .nodes
                .get(node.0)
                .map(|d| (d.room_id.clone(), d.category_id.clone()))
                .unwrap_or_default();
            let link = ParentLink {
                node,
                room_id: room.as_deref(),
                category_id: category.as_deref(),
            };
            self.add_device(graph, child_id, child_dto, &child_path, Some(link))?;
        }

        Ok(node)
    }
}

fn missing(path: &str, field: &str) -> CoreError {
    CoreError::StructureParse {
        path: path.to_owned(),
        field: field.to_owned(),
    }
}

fn register(graph: &mut DeviceGraph, id: &str, node: NodeId) {
    match graph.index.entry(id.to_owned()) {
        Entry::Vacant(slot) => {
            slot.insert(node);
        }
        Entry::Occupied(mut slot) => {
            if *slot.get() != node {
                debug!(id, previous = %slot.get(), now = %node, "id indexed twice; last registration wins");
                slot.insert(node);
            }
        }
    }
}

fn string_states(path: &str, raw: IndexMap<String, Value>) -> IndexMap<String, String> {
    raw.into_iter()
        .filter_map(|(slot, value)| match value {
            Value::String(id) if !id.is_empty() => Some((slot, id)),
            other => {
                trace!(path, slot, value = %other, "skipping state slot without a string id");
                None
            }
        })
        .collect()
}
