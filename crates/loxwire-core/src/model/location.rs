// ── Room, category and preset types ──
//
// Flat lookup tables built once per structure load. Devices refer to them
// by id; the graph hands out shared references.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub id: String,
    pub name: String,
    pub image: Option<String>,
    pub default_rating: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub id: String,
    pub name: String,
    /// Category kind as the Miniserver names it (`lights`, `shading`, ...).
    pub kind: Option<String>,
    /// Display colour, `#RRGGBB`.
    pub color: Option<String>,
}

/// Template a device was instantiated from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preset {
    pub id: String,
    pub name: Option<String>,
}
