//! Port name → handle lookup cache
//!
//! Handles are only valid inside the session that issued them, so the owner
//! clears this whenever a session ends.

use std::collections::HashMap;

use crate::graph::{GraphSession, PortId};

#[derive(Debug, Default)]
pub struct PortCache {
    handles: HashMap<String, PortId>,
}

impl PortCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached handle for `name`, asking the session on a miss. `None` means
    /// the port is gone.
    pub fn resolve(&mut self, session: &dyn GraphSession, name: &str) -> Option<PortId> {
        if let Some(id) = self.handles.get(name) {
            return Some(*id);
        }

        let id = session.port_by_name(name)?;
        self.handles.insert(name.to_string(), id);
        Some(id)
    }

    pub fn evict(&mut self, name: &str) {
        self.handles.remove(name);
    }

    pub fn clear(&mut self) {
        self.handles.clear();
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}
