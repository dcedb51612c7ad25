//! Cluster trait and common types.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::placement::NodeSelector;
use crate::storage_class::StorageClassSpec;

/// Errors that can occur while talking to the orchestrator.
#[derive(Error, Debug)]
pub enum ClusterError {
    /// Kubernetes API request failed.
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// Manifest could not be built or parsed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Reading exec output failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A wait ran out of time.
    #[error("Timed out after {secs}s waiting for {what}")]
    Timeout { what: String, secs: u64 },

    /// Pod terminated instead of running.
    #[error("Pod {pod} entered phase {phase} while starting")]
    PodFailed { pod: String, phase: String },

    /// Pod is running but has no node assignment.
    #[error("Pod {0} is not assigned to a node")]
    Unscheduled(String),

    /// Bound persistent volume carries no volume path.
    #[error("Persistent volume {0} has no vSphere volume path")]
    MissingVolumePath(String),

    /// Command could not be run inside a pod.
    #[error("Exec in pod {pod} failed: {message}")]
    Exec { pod: String, message: String },

    /// Anything else the backend reports.
    #[error("{0}")]
    Other(String),
}

impl ClusterError {
    /// Timeout error for a wait of `limit`.
    #[must_use]
    pub fn timeout(what: impl Into<String>, limit: Duration) -> Self {
        Self::Timeout {
            what: what.into(),
            secs: limit.as_secs(),
        }
    }
}

/// A ready, schedulable node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeInfo {
    pub name: String,
    /// `spec.providerID`, e.g. `vsphere://4201...`.
    pub provider_id: Option<String>,
}

/// A claim to create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimRequest {
    pub storage_class: String,
    /// Requested size as a quantity string, e.g. `2Gi`.
    pub size: String,
}

/// A claim in bound phase and the volume backing it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundVolume {
    pub claim: String,
    pub persistent_volume: String,
    /// Cloud-provider disk path, e.g. `[vsanDatastore] kubevols/pvc-1.vmdk`.
    pub volume_path: String,
}

/// A pod mounting a batch of claims, pinned to one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodRequest {
    pub claims: Vec<String>,
    pub node_selector: NodeSelector,
    pub image: String,
}

/// Mount path of the claim at `index` inside a pod.
#[must_use]
pub fn volume_mount_path(index: usize) -> String {
    format!("/mnt/volume{}", index + 1)
}

/// A running pod and the node it landed on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledPod {
    pub name: String,
    pub node: String,
}

/// A pod and the claims it references.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodClaims {
    pub name: String,
    pub claims: Vec<String>,
}

/// Result of a command run inside a pod.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    pub success: bool,
}

/// Operations the scale run needs from the orchestrator.
#[async_trait]
pub trait Cluster: Send + Sync {
    /// Nodes that are ready, not cordoned and not tainted against scheduling.
    async fn ready_schedulable_nodes(&self) -> Result<Vec<NodeInfo>, ClusterError>;

    /// Add or overwrite a label on a node.
    async fn label_node(&self, node: &str, key: &str, value: &str) -> Result<(), ClusterError>;

    /// Remove a label from a node.
    async fn remove_node_label(&self, node: &str, key: &str) -> Result<(), ClusterError>;

    /// Create a namespace.
    async fn create_namespace(&self, name: &str) -> Result<(), ClusterError>;

    /// Delete a namespace; missing namespaces are not an error.
    async fn delete_namespace(&self, name: &str) -> Result<(), ClusterError>;

    /// Create a storage class, returning its name.
    async fn create_storage_class(&self, spec: &StorageClassSpec) -> Result<String, ClusterError>;

    /// Delete a storage class; missing classes are not an error.
    async fn delete_storage_class(&self, name: &str) -> Result<(), ClusterError>;

    /// Create a claim, returning its generated name.
    async fn create_claim(
        &self,
        namespace: &str,
        request: &ClaimRequest,
    ) -> Result<String, ClusterError>;

    /// Wait until every claim is bound, returning the volumes in claim order.
    async fn wait_claims_bound(
        &self,
        namespace: &str,
        claims: &[String],
        timeout: Duration,
    ) -> Result<Vec<BoundVolume>, ClusterError>;

    /// Create a pod, returning its generated name.
    async fn create_pod(&self, namespace: &str, request: &PodRequest)
        -> Result<String, ClusterError>;

    /// Wait until a pod is running and report its node.
    async fn wait_pod_running(
        &self,
        namespace: &str,
        pod: &str,
        timeout: Duration,
    ) -> Result<ScheduledPod, ClusterError>;

    /// Run a command in a pod's container.
    async fn exec_in_pod(
        &self,
        namespace: &str,
        pod: &str,
        command: &[String],
    ) -> Result<ExecOutput, ClusterError>;

    /// Pods created by the scale run in a namespace, with their claims.
    async fn list_pods(&self, namespace: &str) -> Result<Vec<PodClaims>, ClusterError>;

    /// Claims created by the scale run in a namespace.
    async fn list_claims(&self, namespace: &str) -> Result<Vec<String>, ClusterError>;

    /// Delete a pod and wait until it is gone.
    async fn delete_pod(
        &self,
        namespace: &str,
        pod: &str,
        timeout: Duration,
    ) -> Result<(), ClusterError>;

    /// Delete a claim; missing claims are not an error.
    async fn delete_claim(&self, namespace: &str, claim: &str) -> Result<(), ClusterError>;
}
