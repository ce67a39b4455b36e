//! Per-node watch registry: application-level observers of a specific
//! `NodeId`, independent of any view subscription (§4.7 "separate
//! registry").

use std::collections::HashMap;

use crate::node_store::{Node, NodeId};

/// Callbacks an application can register for one node id via
/// [`crate::graph::Graph::watch_node`].
#[derive(Default)]
pub struct NodeWatch {
    pub on_update: Option<Box<dyn FnMut(&Node)>>,
    pub on_delete: Option<Box<dyn FnMut(NodeId)>>,
}

#[derive(Default)]
pub struct WatchRegistry {
    watches: HashMap<NodeId, NodeWatch>,
}

impl WatchRegistry {
    pub fn new() -> Self {
        WatchRegistry::default()
    }

    pub fn watch(&mut self, id: NodeId, watch: NodeWatch) {
        self.watches.insert(id, watch);
    }

    pub fn unwatch(&mut self, id: NodeId) {
        self.watches.remove(&id);
    }

    pub fn is_watched(&self, id: NodeId) -> bool {
        self.watches.contains_key(&id)
    }

    pub fn notify_update(&mut self, node: &Node) {
        if let Some(w) = self.watches.get_mut(&node.id) {
            if let Some(cb) = w.on_update.as_mut() {
                cb(node);
            }
        }
    }

    /// Notifies and drops the watch, since the node no longer exists.
    pub fn notify_delete(&mut self, id: NodeId) {
        if let Some(mut w) = self.watches.remove(&id) {
            if let Some(cb) = w.on_delete.as_mut() {
                cb(id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node_store::NodeStore;
    use crate::schema::TypeId;
    use std::sync::{Arc, Mutex};

    #[test]
    fn notify_update_invokes_registered_callback() {
        let mut store = NodeStore::new();
        let id = store.insert(TypeId(0));
        let seen = Arc::new(Mutex::new(false));
        let seen2 = seen.clone();
        let mut reg = WatchRegistry::new();
        reg.watch(
            id,
            NodeWatch {
                on_update: Some(Box::new(move |_| *seen2.lock().unwrap() = true)),
                on_delete: None,
            },
        );
        reg.notify_update(store.get(id).unwrap());
        assert!(*seen.lock().unwrap());
    }

    #[test]
    fn unwatch_stops_further_notifications() {
        let mut store = NodeStore::new();
        let id = store.insert(TypeId(0));
        let count = Arc::new(Mutex::new(0));
        let count2 = count.clone();
        let mut reg = WatchRegistry::new();
        reg.watch(
            id,
            NodeWatch {
                on_update: Some(Box::new(move |_| *count2.lock().unwrap() += 1)),
                on_delete: None,
            },
        );
        reg.notify_update(store.get(id).unwrap());
        reg.unwatch(id);
        reg.notify_update(store.get(id).unwrap());
        assert_eq!(*count.lock().unwrap(), 1);
    }
}
