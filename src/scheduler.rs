//! Viewport scheduler.
//!
//! Two queues decouple detection from evaluation: structural changes push
//! posts onto the "newly seen" queue, intersection updates move watched posts
//! that came within the margin onto the "ready to evaluate" queue. Whoever
//! owns the ready receiver runs the pipeline.

use crate::page::{Marker, PostNode};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

pub type ReadyReceiver = mpsc::UnboundedReceiver<Arc<dyn PostNode>>;

/// Where a watched post sits relative to the viewport.
pub struct IntersectionEntry {
    pub node: Arc<dyn PostNode>,
    /// Distance in pixels between the post and the viewport edge; 0 when
    /// any part of the post is inside the viewport.
    pub distance_px: u32,
}

impl IntersectionEntry {
    pub fn new(node: Arc<dyn PostNode>, distance_px: u32) -> Self {
        Self { node, distance_px }
    }

    pub fn visible(node: Arc<dyn PostNode>) -> Self {
        Self::new(node, 0)
    }
}

pub struct ViewportScheduler {
    margin_px: AtomicU32,
    seen_tx: mpsc::UnboundedSender<Arc<dyn PostNode>>,
    seen_rx: Mutex<mpsc::UnboundedReceiver<Arc<dyn PostNode>>>,
    watched: Mutex<HashMap<u64, Arc<dyn PostNode>>>,
    ready_tx: mpsc::UnboundedSender<Arc<dyn PostNode>>,
}

impl ViewportScheduler {
    /// Returns the scheduler and the receiving end of the ready queue.
    pub fn new(margin_px: u32) -> (Self, ReadyReceiver) {
        let (seen_tx, seen_rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = mpsc::unbounded_channel();
        let scheduler = Self {
            margin_px: AtomicU32::new(margin_px),
            seen_tx,
            seen_rx: Mutex::new(seen_rx),
            watched: Mutex::new(HashMap::new()),
            ready_tx,
        };
        (scheduler, ready_rx)
    }

    pub fn set_margin(&self, margin_px: u32) {
        self.margin_px.store(margin_px, Ordering::Relaxed);
    }

    /// Structural watcher: queues inserted posts for viewport watching.
    /// Never evaluates anything itself.
    pub fn on_insertions(&self, nodes: Vec<Arc<dyn PostNode>>) {
        for node in nodes {
            if node.has_marker(Marker::Observed) {
                continue;
            }
            if self.seen_tx.send(node).is_err() {
                log::warn!("Newly-seen queue closed");
                return;
            }
        }
    }

    /// Moves everything on the newly-seen queue into the watched set.
    pub fn register_pending(&self) -> usize {
        let mut seen = self.seen_rx.lock().unwrap_or_else(|p| p.into_inner());
        let mut watched = self.watched.lock().unwrap_or_else(|p| p.into_inner());
        let mut registered = 0;
        while let Ok(node) = seen.try_recv() {
            if watched.insert(node.node_key(), node).is_none() {
                registered += 1;
            }
        }
        registered
    }

    /// Viewport watcher: posts within the margin are marked observed,
    /// unwatched and queued for evaluation, at most once per page lifetime.
    pub fn on_intersections(&self, entries: Vec<IntersectionEntry>) -> usize {
        self.register_pending();
        let margin = self.margin_px.load(Ordering::Relaxed);

        let mut watched = self.watched.lock().unwrap_or_else(|p| p.into_inner());
        let mut queued = 0;
        for entry in entries {
            if entry.distance_px > margin {
                continue;
            }
            let Some(node) = watched.remove(&entry.node.node_key()) else {
                continue;
            };
            if node.has_marker(Marker::Observed) {
                continue;
            }
            node.set_marker(Marker::Observed);
            if self.ready_tx.send(node).is_err() {
                log::warn!("Ready queue closed");
                break;
            }
            queued += 1;
        }
        queued
    }

    /// Forgets nodes the host removed before they came near the viewport.
    pub fn on_removals(&self, node_keys: &[u64]) -> usize {
        self.register_pending();
        let mut watched = self.watched.lock().unwrap_or_else(|p| p.into_inner());
        let removed = node_keys
            .iter()
            .filter(|key| watched.remove(*key).is_some())
            .count();
        if removed > 0 {
            log::debug!("Stopped watching {removed} removed posts");
        }
        removed
    }

    pub fn watched_count(&self) -> usize {
        self.watched.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    /// Stops watching everything; posts already observed stay observed.
    pub fn clear(&self) {
        self.register_pending();
        self.watched
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clear();
    }
}
