//! Top-level error type for a scale run.

use thiserror::Error;

use crate::cluster::ClusterError;
use crate::config::ConfigError;
use crate::partition::PartitionError;
use crate::provider::ProviderError;

/// Errors that abort a scale run.
#[derive(Error, Debug)]
pub enum ScaleError {
    /// Environment configuration is missing or invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The volume count cannot be split across the workers.
    #[error(transparent)]
    Partition(#[from] PartitionError),

    /// Orchestrator API call failed.
    #[error("Cluster error: {0}")]
    Cluster(#[from] ClusterError),

    /// Cloud provider volume API call failed.
    #[error("Volume provider error: {0}")]
    Provider(#[from] ProviderError),

    /// A bound volume is not attached to the node its pod runs on.
    #[error("Volume {volume_path} is not attached to node {node}")]
    NotAttached { node: String, volume_path: String },

    /// Writing or reading back a file on a mounted volume failed.
    #[error("Volume probe of {path} in pod {pod} failed: {reason}")]
    VolumeProbe {
        pod: String,
        path: String,
        reason: String,
    },

    /// No node selectors were available to pin pods.
    #[error("No node selectors available for scheduling pods")]
    NoNodeSelectors,

    /// A worker task panicked.
    #[error("Worker {worker} panicked: {message}")]
    WorkerPanicked { worker: usize, message: String },

    /// A worker task was cancelled before it reported a result.
    #[error("Worker {0} was cancelled")]
    WorkerCancelled(usize),

    /// The run was interrupted before the workers finished.
    #[error("Scale run interrupted")]
    Interrupted,
}

/// Result alias used across the crate.
pub type Result<T, E = ScaleError> = std::result::Result<T, E>;
