//! Attach state as reported in `Node.status.volumesAttached`.
//!
//! The attach/detach controller records every disk it has attached through
//! the cloud provider under the node's status, keyed by the volume's unique
//! name: `kubernetes.io/vsphere-volume/<volume path>` for in-tree volumes,
//! `kubernetes.io/csi/<driver>^<handle>` for CSI ones.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Node;
use kube::api::Api;
use kube::Client;
use tracing::{debug, warn};

use super::traits::{ProviderError, VolumeProvider};

/// Unique-name prefix of in-tree vSphere volumes.
pub const VSPHERE_VOLUME_PREFIX: &str = "kubernetes.io/vsphere-volume/";

/// Provider reading attach state from node status.
#[derive(Clone)]
pub struct NodeStatusProvider {
    nodes: Api<Node>,
}

impl NodeStatusProvider {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self {
            nodes: Api::all(client),
        }
    }
}

/// Whether an attached-volume unique name refers to `volume_path`.
pub(crate) fn matches_volume(unique_name: &str, volume_path: &str) -> bool {
    unique_name == volume_path
        || unique_name.strip_prefix(VSPHERE_VOLUME_PREFIX) == Some(volume_path)
        || unique_name
            .rsplit_once('^')
            .is_some_and(|(_, handle)| handle == volume_path)
}

/// Unique names of the volumes attached to a node.
pub(crate) fn attached_volumes(node: &Node) -> impl Iterator<Item = &str> {
    node.status
        .as_ref()
        .and_then(|s| s.volumes_attached.as_ref())
        .into_iter()
        .flatten()
        .map(|v| v.name.as_str())
}

#[async_trait]
impl VolumeProvider for NodeStatusProvider {
    fn name(&self) -> &'static str {
        "vsphere-node-status"
    }

    async fn is_attached(&self, node: &str, volume_path: &str) -> Result<bool, ProviderError> {
        let Some(current) = self.nodes.get_opt(node).await? else {
            warn!(node = %node, "Node not found, treating its volumes as detached");
            return Ok(false);
        };

        let attached = attached_volumes(&current).any(|name| matches_volume(name, volume_path));
        debug!(node = %node, volume = %volume_path, attached, "Checked volume attach state");
        Ok(attached)
    }
}
