//! Node selectors and the node -> volume placement map.

use std::collections::BTreeMap;

use serde::Serialize;

/// Label key applied to every node for the duration of a run.
pub const NODE_LABEL_KEY: &str = "vsphere_e2e_label";

/// Prefix of the per-node label value.
pub const NODE_LABEL_VALUE_PREFIX: &str = "vsphere_e2e_";

/// Label pair that pins a pod to exactly one node.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NodeSelector {
    pub key: String,
    pub value: String,
}

impl NodeSelector {
    /// Selector for the node at `index` in the ready node list.
    #[must_use]
    pub fn for_index(index: usize) -> Self {
        Self {
            key: NODE_LABEL_KEY.to_string(),
            value: format!("{NODE_LABEL_VALUE_PREFIX}{index}"),
        }
    }
}

/// Volume paths grouped by the node they were attached to.
///
/// Per-node lists keep insertion order; merging appends.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct NodeVolumeMap(BTreeMap<String, Vec<String>>);

impl NodeVolumeMap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `volume_path` was attached to `node`.
    pub fn record(&mut self, node: &str, volume_path: &str) {
        self.0
            .entry(node.to_string())
            .or_default()
            .push(volume_path.to_string());
    }

    /// Append every list of `other` to the matching node's list.
    pub fn merge(&mut self, other: &Self) {
        for (node, volumes) in &other.0 {
            self.0
                .entry(node.clone())
                .or_default()
                .extend(volumes.iter().cloned());
        }
    }

    /// Volumes recorded for `node`.
    #[must_use]
    pub fn volumes_on(&self, node: &str) -> &[String] {
        self.0.get(node).map(Vec::as_slice).unwrap_or_default()
    }

    /// Nodes in name order.
    pub fn nodes(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Every `(node, volume path)` pair.
    pub fn pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().flat_map(|(node, volumes)| {
            volumes
                .iter()
                .map(move |volume| (node.as_str(), volume.as_str()))
        })
    }

    /// Total number of recorded volumes.
    #[must_use]
    pub fn volume_count(&self) -> usize {
        self.0.values().map(Vec::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.volume_count() == 0
    }

    /// Number of volumes per node.
    #[must_use]
    pub fn counts(&self) -> BTreeMap<String, usize> {
        self.0
            .iter()
            .map(|(node, volumes)| (node.clone(), volumes.len()))
            .collect()
    }
}
