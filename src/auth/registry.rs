//! In-flight request tracking.
//!
//! # Design Decisions
//! - One readers-writer lock around a plain map; insert/remove take write
//!   mode, lookup takes read mode
//! - The lock is scoped to the map operation only and is never held
//!   across the downstream dispatch, so relay hops that call back into
//!   the same logical request cannot deadlock

use std::collections::HashMap;
use std::sync::RwLock;

use super::context::RequestContext;

/// Map of hop identifier to the context registered under it. A relay hop
/// can only continue a context registered at lookup time.
#[derive(Debug, Default)]
pub struct ActiveRequestRegistry {
    active: RwLock<HashMap<String, RequestContext>>,
}

impl ActiveRequestRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a context under its hop identifier.
    pub fn insert(&self, context: RequestContext) {
        let mut active = self.active.write().expect("request registry poisoned");
        active.insert(context.hop_id.clone(), context);
    }

    /// Clone of the context registered under `hop_id`, if any.
    pub fn lookup(&self, hop_id: &str) -> Option<RequestContext> {
        let active = self.active.read().expect("request registry poisoned");
        active.get(hop_id).cloned()
    }

    /// Deregister a hop. Removing an unknown hop is a no-op.
    pub fn remove(&self, hop_id: &str) {
        let mut active = self.active.write().expect("request registry poisoned");
        active.remove(hop_id);
    }

    pub fn len(&self) -> usize {
        self.active.read().expect("request registry poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
