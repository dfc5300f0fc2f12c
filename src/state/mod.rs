//! Mirrored mixer state.
//!
//! The bridge never invents composition state: the tree is populated only by
//! the mixer's feedback stream (or emptied by an explicit reset) and read by
//! the render tick and the console. [`StateStore`] is the one resource shared
//! across those execution contexts.

mod feedback;
mod tracker;
mod types;

pub use feedback::{parse_feedback, FeedbackUpdate};
pub use tracker::CompositionTracker;
pub use types::{CellView, ClipState, LayerState, PropertyMap, PropertyValue, Selection};

use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard};

use crate::osc::FeedbackMessage;

/// Thread-safe handle to the mirrored composition tree.
///
/// Cloning is cheap; every clone observes the same tree. Mutation happens
/// only through [`apply`](Self::apply) and [`reset`](Self::reset), each
/// holding the write lock for the duration of one message and doing no I/O
/// under it. Readers take the lock shared, so concurrent queries never block
/// each other.
#[derive(Clone, Default)]
pub struct StateStore {
    inner: Arc<RwLock<CompositionTracker>>,
}

impl StateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one feedback message atomically. Returns whether the address
    /// matched the dialect table; unmatched messages are ignored.
    pub fn apply(&self, msg: &FeedbackMessage) -> bool {
        // Parse outside the lock; only the mutation itself holds it.
        let Some(update) = parse_feedback(msg) else {
            return false;
        };
        self.inner.write().apply_update(update);
        true
    }

    /// Atomically discard all entities.
    pub fn reset(&self) {
        self.inner.write().reset();
    }

    /// Shared read access, consistent for the lifetime of the guard. Used by
    /// the render tick to see one snapshot for a whole frame.
    pub fn read(&self) -> RwLockReadGuard<'_, CompositionTracker> {
        self.inner.read()
    }

    pub fn clip_exists(&self, column: u32, layer: u32) -> bool {
        self.read().clip_exists(column, layer)
    }

    pub fn clip_playing(&self, column: u32, layer: u32) -> bool {
        self.read().clip_playing(column, layer)
    }

    pub fn selected_layer(&self) -> Option<u32> {
        self.read().selected_layer()
    }

    /// (column, layer) of the selected clip.
    pub fn selected_clip(&self) -> Option<(u32, u32)> {
        self.read().selected_clip()
    }

    pub fn selected_column(&self) -> Option<u32> {
        self.read().selected_column()
    }

    pub fn tempo_playing(&self) -> bool {
        self.read().tempo_playing()
    }
}
