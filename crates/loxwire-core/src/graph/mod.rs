// ── Device graph ──
//
// The structure document decoded into an arena of devices with a global id
// index. Built by `GraphBuilder`, published by the controller through an
// `ArcSwap` so rebuilds replace the whole graph atomically.

pub mod builder;
pub mod device_graph;
pub mod structure;

pub use builder::{BuildOptions, GraphBuilder};
pub use device_graph::{DeviceGraph, Resolved};
pub use structure::StructureDocument;
