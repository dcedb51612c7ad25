//! vSphere volume plugin life cycle at scale.
//!
//! This crate provisions a user-configurable number of persistent volumes
//! through four flavours of vSphere storage class, attaches them to pods
//! spread across the worker nodes of a cluster, and verifies that every
//! volume detaches again once the pods are gone.
//!
//! ## Flow
//!
//! ```text
//!  ScaleConfig (env)          ready nodes ──► node labels (vsphere_e2e_label=vsphere_e2e_<i>)
//!        │                                          │
//!        ▼                                          ▼
//!  partition(V, W) ──► worker 0 ─┐   claims ─► bound ─► pod (node selector) ─► probe
//!                      worker 1 ─┼──► JoinSet ──► merged NodeVolumeMap
//!                      worker … ─┘                           │
//!                                                            ▼
//!                     teardown: pods ─► wait for detach ─► claims ─► classes/labels
//! ```
//!
//! The orchestrator and the cloud provider sit behind the [`Cluster`] and
//! [`VolumeProvider`] traits; [`KubeCluster`] and [`NodeStatusProvider`] are
//! the implementations used against a live cluster.
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use vcp_scale::{KubeCluster, NodeStatusProvider, ScaleConfig, ScaleSettings, Scenario};
//!
//! let client = kube::Client::try_default().await?;
//! let scenario = Scenario::new(
//!     Arc::new(KubeCluster::new(client.clone())),
//!     Arc::new(NodeStatusProvider::new(client)),
//!     ScaleConfig::from_env()?,
//!     ScaleSettings::default(),
//! );
//! let outcome = scenario.run().await?;
//! ```

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cluster;
pub mod collector;
pub mod config;
pub mod error;
pub mod ledger;
pub mod partition;
pub mod placement;
pub mod provider;
pub mod report;
pub mod scenario;
pub mod storage_class;
pub mod teardown;
pub mod worker;

pub use cluster::{Cluster, ClusterError, KubeCluster};
pub use config::{ConfigError, ScaleConfig, ScaleSettings};
pub use error::{Result, ScaleError};
pub use placement::{NodeSelector, NodeVolumeMap};
pub use provider::{NodeStatusProvider, ProviderError, VolumeProvider};
pub use report::ScaleReport;
pub use scenario::{ScaleOutcome, Scenario, SkipReason};
