//! Orchestrator seam.
//!
//! This module contains the [`Cluster`] trait the scale run talks to and
//! [`KubeCluster`], its implementation over the Kubernetes API.

pub mod kubernetes;
pub mod traits;

pub use kubernetes::KubeCluster;
pub use traits::{
    volume_mount_path, BoundVolume, ClaimRequest, Cluster, ClusterError, ExecOutput, NodeInfo,
    PodClaims, PodRequest, ScheduledPod,
};
