// ── Live state synchronizer ──
//
// Applies push-channel update frames to the published device graph and fans
// the resulting changes out to subscribers. Runs on the push channel's
// reader task, so every method here is synchronous and non-blocking.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use arc_swap::ArcSwap;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::trace;

use loxwire_api::websocket::{StateUpdate, UpdateSink};

use crate::graph::DeviceGraph;
use crate::model::NodeId;

/// One applied state update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateChange {
    /// The device's arena position in the graph that was current when the
    /// update was applied.
    pub node: NodeId,
    pub device_id: String,
    pub slot: String,
    pub value: String,
}

/// A registered change listener. Dropping it unregisters on the next
/// delivery; [`StateSynchronizer::unsubscribe`] does so immediately.
#[derive(Debug)]
pub struct Subscription {
    pub id: u64,
    pub rx: mpsc::UnboundedReceiver<StateChange>,
}

impl Subscription {
    /// Wait for the next change. `None` once unsubscribed.
    pub async fn recv(&mut self) -> Option<StateChange> {
        self.rx.recv().await
    }
}

pub struct StateSynchronizer {
    graph: Arc<ArcSwap<DeviceGraph>>,
    subscribers: DashMap<u64, mpsc::UnboundedSender<StateChange>>,
    next_subscriber: AtomicU64,
    applied: AtomicU64,
}

impl StateSynchronizer {
    /// Synchronize against whatever graph `graph` currently publishes.
    pub fn new(graph: Arc<ArcSwap<DeviceGraph>>) -> Self {
        Self {
            graph,
            subscribers: DashMap::new(),
            next_subscriber: AtomicU64::new(1),
            applied: AtomicU64::new(0),
        }
    }

    // ── Subscribers ──────────────────────────────────────────────────

    pub fn subscribe(&self) -> Subscription {
        let id = self.next_subscriber.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.insert(id, tx);
        Subscription { id, rx }
    }

    /// Returns `false` if `id` was not registered.
    pub fn unsubscribe(&self, id: u64) -> bool {
        self.subscribers.remove(&id).is_some()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Updates applied since construction.
    pub fn applied_count(&self) -> u64 {
        self.applied.load(Ordering::Relaxed)
    }

    // ── Applying updates ─────────────────────────────────────────────

    /// Apply one update. Returns the change, or `None` when the id is not
    /// a state id of any device in the current graph.
    pub fn apply(&self, update: &StateUpdate) -> Option<StateChange> {
        let graph = self.graph.load();

        let Some(resolved) = graph.resolve(&update.id) else {
            trace!(id = %update.id, "update for unknown id ignored");
            return None;
        };
        let Some(slot) = resolved.slot else {
            trace!(
                id = %update.id,
                device = %resolved.device.id,
                "update id is not a state slot; ignored"
            );
            return None;
        };

        resolved.device.set_state(slot, update.value.clone());
        self.applied.fetch_add(1, Ordering::Relaxed);

        let change = StateChange {
            node: resolved.node,
            device_id: resolved.device.id.clone(),
            slot: slot.to_owned(),
            value: update.value.clone(),
        };
        trace!(device = %change.device_id, slot = %change.slot, value = %change.value, "state updated");

        self.subscribers
            .retain(|_, tx| tx.send(change.clone()).is_ok());
        Some(change)
    }
}

impl UpdateSink for StateSynchronizer {
    fn on_update(&self, update: StateUpdate) {
        self.apply(&update);
    }
}
