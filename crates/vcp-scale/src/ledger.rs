//! Record of every resource a run has acquired.
//!
//! Workers and setup push into the ledger right after each successful
//! create call; teardown reads a snapshot and releases everything in
//! order. Cancelled or failed workers therefore leave nothing behind that
//! teardown does not know about.

use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::placement::NodeVolumeMap;

/// Resources acquired by a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Acquired {
    /// Namespace created by the run, if it created one.
    pub namespace: Option<String>,
    /// Nodes carrying the run's label.
    pub labelled_nodes: Vec<String>,
    pub storage_classes: Vec<String>,
    pub claims: Vec<String>,
    pub pods: Vec<String>,
    /// Where bound volumes were attached.
    pub placements: NodeVolumeMap,
}

/// Thread-safe ledger shared by setup, workers and teardown.
#[derive(Debug, Default)]
pub struct ResourceLedger {
    acquired: Mutex<Acquired>,
}

impl ResourceLedger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Acquired> {
        self.acquired.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn record_namespace(&self, namespace: &str) {
        self.lock().namespace = Some(namespace.to_string());
    }

    pub fn record_node_label(&self, node: &str) {
        self.lock().labelled_nodes.push(node.to_string());
    }

    pub fn record_storage_class(&self, name: &str) {
        self.lock().storage_classes.push(name.to_string());
    }

    pub fn record_claim(&self, name: &str) {
        self.lock().claims.push(name.to_string());
    }

    pub fn record_pod(&self, name: &str) {
        self.lock().pods.push(name.to_string());
    }

    pub fn record_placement(&self, node: &str, volume_path: &str) {
        self.lock().placements.record(node, volume_path);
    }

    /// Copy of everything recorded so far.
    #[must_use]
    pub fn snapshot(&self) -> Acquired {
        self.lock().clone()
    }
}
