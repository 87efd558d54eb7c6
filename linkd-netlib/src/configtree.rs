//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

//! Path-addressed configuration/state tree with northbound subscriber
//! fan-out.
//!
//! The tree is the single data surface exposed over the northbound gNMI
//! service: its owner mirrors internal state into it and every mutation of
//! interest is broadcast to active subscribe streams.

use std::collections::BTreeMap;
use std::sync::{Mutex, RwLock};

use tokio::sync::mpsc;
use tracing::warn;

use crate::proto::gnmi;

/// A single element of a parsed string path.
#[derive(Clone, Debug, Eq, PartialEq)]
struct PathStep {
    name: String,
    key: BTreeMap<String, String>,
}

/// A node of the configuration/state tree.
///
/// Interior nodes carry no value; leaves carry a gNMI typed value.
#[derive(Debug, Default)]
pub struct Node {
    name: String,
    key: BTreeMap<String, String>,
    value: Option<gnmi::TypedValue>,
    children: Vec<Node>,
}

/// Callback invoked after northbound writes have been applied to the tree.
/// Receives the string paths that were changed.
pub type ConfigChangedCb = Box<dyn Fn(&[String]) + Send + Sync>;

/// A configuration/state tree shared between its owner and the northbound
/// gNMI service.
///
/// The owner mutates the tree and broadcasts notifications; the gNMI
/// service reads it, applies `Set` requests to it, and registers subscribe
/// responders with it.
#[derive(Default)]
pub struct Configurable {
    root: RwLock<Node>,
    responders:
        Mutex<Vec<mpsc::Sender<Result<gnmi::SubscribeResponse, tonic::Status>>>>,
    config_changed: Mutex<Option<ConfigChangedCb>>,
}

// ===== impl Node =====

impl Node {
    fn child(&self, step: &PathStep) -> Option<&Node> {
        self.children
            .iter()
            .find(|child| child.name == step.name && child.key == step.key)
    }

    fn child_mut(&mut self, step: &PathStep) -> Option<&mut Node> {
        self.children
            .iter_mut()
            .find(|child| child.name == step.name && child.key == step.key)
    }

    /// Adds (or replaces) the value at the given path, creating interior
    /// nodes as needed.
    pub fn add_path(&mut self, path: &str, value: Option<gnmi::TypedValue>) {
        let mut node = self;
        for step in parse_path(path) {
            if node.child(&step).is_none() {
                node.children.push(Node {
                    name: step.name.clone(),
                    key: step.key.clone(),
                    ..Default::default()
                });
            }
            node = node.child_mut(&step).unwrap();
        }
        if value.is_some() {
            node.value = value;
        }
    }

    /// Returns the node at the given path, if present.
    pub fn get_path(&self, path: &str) -> Option<&Node> {
        let mut node = self;
        for step in parse_path(path) {
            node = node.child(&step)?;
        }
        Some(node)
    }

    /// Deletes the subtree rooted at the given path. Returns false if no
    /// such node exists.
    pub fn delete_path(&mut self, path: &str) -> bool {
        let steps = parse_path(path);
        let Some((last, parents)) = steps.split_last() else {
            return false;
        };

        let mut node = self;
        for step in parents {
            match node.child_mut(step) {
                Some(child) => node = child,
                None => return false,
            }
        }

        let before = node.children.len();
        node.children
            .retain(|child| child.name != last.name || child.key != last.key);
        node.children.len() != before
    }

    /// Returns the node's value, if it is a leaf.
    pub fn value(&self) -> Option<&gnmi::TypedValue> {
        self.value.as_ref()
    }

    /// Collects all value-bearing descendants (including the node itself)
    /// as `(path, value)` pairs rooted at `prefix`.
    pub fn leaves(&self, prefix: &str) -> Vec<(String, gnmi::TypedValue)> {
        let mut leaves = vec![];
        self.collect_leaves(prefix, &mut leaves);
        leaves
    }

    fn collect_leaves(
        &self,
        path: &str,
        leaves: &mut Vec<(String, gnmi::TypedValue)>,
    ) {
        if let Some(value) = &self.value {
            leaves.push((path.to_owned(), value.clone()));
        }
        for child in &self.children {
            let elem = child.elem_string();
            let child_path = if path.is_empty() {
                elem
            } else {
                format!("{}/{}", path, elem)
            };
            child.collect_leaves(&child_path, leaves);
        }
    }

    fn elem_string(&self) -> String {
        let mut elem = self.name.clone();
        for (key, value) in &self.key {
            elem.push_str(&format!("[{key}={value}]"));
        }
        elem
    }
}

// ===== impl Configurable =====

impl Configurable {
    pub fn new() -> Configurable {
        Configurable::default()
    }

    /// Registers the callback invoked after northbound configuration
    /// writes.
    pub fn on_config_changed(&self, cb: ConfigChangedCb) {
        *self.config_changed.lock().unwrap() = Some(cb);
    }

    pub fn add_path(&self, path: &str, value: Option<gnmi::TypedValue>) {
        self.root.write().unwrap().add_path(path, value);
    }

    pub fn delete_path(&self, path: &str) -> bool {
        self.root.write().unwrap().delete_path(path)
    }

    /// Returns a clone of the leaf value at the given path.
    pub fn get_value(&self, path: &str) -> Option<gnmi::TypedValue> {
        self.root
            .read()
            .unwrap()
            .get_path(path)
            .and_then(|node| node.value().cloned())
    }

    /// Returns the `(path, value)` pairs of all leaves under the given
    /// path. An empty result means the path does not exist or carries no
    /// values.
    pub fn get_leaves(&self, path: &str) -> Vec<(String, gnmi::TypedValue)> {
        self.root
            .read()
            .unwrap()
            .get_path(path)
            .map(|node| node.leaves(path))
            .unwrap_or_default()
    }

    /// Notifies the owner that northbound writes changed the given paths.
    pub fn config_changed(&self, paths: &[String]) {
        if let Some(cb) = &*self.config_changed.lock().unwrap() {
            (cb)(paths);
        }
    }

    /// Registers a subscribe responder. The responder is removed once its
    /// receiving side is dropped.
    pub fn add_responder(
        &self,
        responder: mpsc::Sender<Result<gnmi::SubscribeResponse, tonic::Status>>,
    ) {
        self.responders.lock().unwrap().push(responder);
    }

    /// Broadcasts a subscribe response to all active responders, pruning
    /// the ones whose streams have gone away.
    pub fn send_to_all_responders(&self, response: gnmi::SubscribeResponse) {
        let mut responders = self.responders.lock().unwrap();
        responders.retain(|responder| {
            match responder.try_send(Ok(response.clone())) {
                Ok(_) => true,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!("subscriber channel full, dropping update");
                    true
                }
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            }
        });
    }

    /// Number of registered subscribe responders, including ones whose
    /// streams have gone away but haven't been pruned yet.
    pub fn responder_count(&self) -> usize {
        self.responders.lock().unwrap().len()
    }
}

impl std::fmt::Debug for Configurable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Configurable")
            .field("root", &self.root)
            .finish()
    }
}

// ===== helper functions =====

fn parse_path(path: &str) -> Vec<PathStep> {
    path.split('/')
        .filter(|elem| !elem.is_empty())
        .map(|elem| {
            let mut key = BTreeMap::new();
            let (name, rest) = match elem.find('[') {
                Some(pos) => (&elem[..pos], &elem[pos..]),
                None => (elem, ""),
            };
            for qualifier in rest.split('[').filter(|s| !s.is_empty()) {
                let qualifier = qualifier.trim_end_matches(']');
                if let Some((k, v)) = qualifier.split_once('=') {
                    key.insert(k.to_owned(), v.to_owned());
                }
            }
            PathStep {
                name: name.to_owned(),
                key,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::gnmi::TypedValue;
    use crate::proto::gnmi::typed_value::Value;

    fn int_val(value: i64) -> TypedValue {
        TypedValue {
            value: Some(Value::IntVal(value)),
        }
    }

    #[test]
    fn test_add_get() {
        let mut root = Node::default();
        root.add_path("config/emitFrequency", Some(int_val(5)));
        root.add_path("state/link[port=1]/egress-port", Some(int_val(7)));

        let node = root.get_path("config/emitFrequency").unwrap();
        assert_eq!(node.value(), Some(&int_val(5)));

        let node = root.get_path("state/link[port=1]/egress-port").unwrap();
        assert_eq!(node.value(), Some(&int_val(7)));

        // Distinct keys address distinct nodes.
        assert!(root.get_path("state/link[port=2]").is_none());
    }

    #[test]
    fn test_replace_value() {
        let mut root = Node::default();
        root.add_path("config/maxLinkAge", Some(int_val(30)));
        root.add_path("config/maxLinkAge", Some(int_val(42)));
        let node = root.get_path("config/maxLinkAge").unwrap();
        assert_eq!(node.value(), Some(&int_val(42)));
    }

    #[test]
    fn test_delete_subtree() {
        let mut root = Node::default();
        root.add_path("state/link[port=1]/egress-port", Some(int_val(7)));
        root.add_path("state/link[port=2]/egress-port", Some(int_val(9)));

        assert!(root.delete_path("state/link[port=1]"));
        assert!(root.get_path("state/link[port=1]").is_none());
        assert!(root.get_path("state/link[port=2]/egress-port").is_some());

        // Deleting again is a no-op.
        assert!(!root.delete_path("state/link[port=1]"));
    }

    #[test]
    fn test_leaves() {
        let mut root = Node::default();
        root.add_path("state/link[port=1]/egress-port", Some(int_val(7)));
        root.add_path(
            "state/link[port=1]/egress-device",
            Some(TypedValue {
                value: Some(Value::StringVal("devA".to_owned())),
            }),
        );

        let node = root.get_path("state/link[port=1]").unwrap();
        let mut leaves = node.leaves("state/link[port=1]");
        leaves.sort_by(|a, b| a.0.cmp(&b.0));
        assert_eq!(leaves.len(), 2);
        assert_eq!(leaves[0].0, "state/link[port=1]/egress-device");
        assert_eq!(leaves[1].0, "state/link[port=1]/egress-port");
    }

    #[test]
    fn test_responder_pruning() {
        let tree = Configurable::new();
        let (tx, mut rx) = mpsc::channel(4);
        tree.add_responder(tx);
        assert_eq!(tree.responder_count(), 1);

        tree.send_to_all_responders(gnmi::SubscribeResponse::default());
        assert!(rx.try_recv().is_ok());

        drop(rx);
        tree.send_to_all_responders(gnmi::SubscribeResponse::default());
        assert_eq!(tree.responder_count(), 0);
    }
}
