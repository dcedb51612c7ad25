//! The scale scenario end to end.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::cluster::{Cluster, NodeInfo};
use crate::collector::{merge, run_workers};
use crate::config::{ScaleConfig, ScaleSettings};
use crate::error::{Result, ScaleError};
use crate::ledger::ResourceLedger;
use crate::partition::partition;
use crate::placement::{NodeSelector, NodeVolumeMap};
use crate::provider::VolumeProvider;
use crate::report::ScaleReport;
use crate::storage_class::StorageClassSpec;
use crate::teardown::Teardown;
use crate::worker::WorkerContext;

/// Prefix of namespaces created by the run.
pub const NAMESPACE_PREFIX: &str = "vcp-at-scale";

/// Why a run did not start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Too few ready schedulable nodes.
    NotEnoughNodes { required: usize, found: usize },
    /// The nodes cannot hold the requested volumes.
    InsufficientAttachCapacity {
        volumes: usize,
        nodes: usize,
        capacity: usize,
    },
    /// A node is not backed by the required cloud provider.
    UnsupportedProvider {
        node: String,
        provider_id: Option<String>,
        required: String,
    },
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotEnoughNodes { required, found } => {
                write!(f, "requires at least {required} nodes (not {found})")
            }
            Self::InsufficientAttachCapacity {
                volumes,
                nodes,
                capacity,
            } => write!(
                f,
                "cannot attach {volumes} volumes to {nodes} nodes, maximum is {capacity}"
            ),
            Self::UnsupportedProvider {
                node,
                provider_id,
                required,
            } => write!(
                f,
                "node {node} has provider ID {:?}, {required} required",
                provider_id.as_deref().unwrap_or("<none>")
            ),
        }
    }
}

/// Result of [`Scenario::run`].
#[derive(Debug)]
pub enum ScaleOutcome {
    Completed(ScaleReport),
    Skipped(SkipReason),
}

/// Volumes and pods created by the workers.
struct Provisioned {
    volumes: NodeVolumeMap,
    pods: usize,
}

/// A configured scale run.
pub struct Scenario {
    cluster: Arc<dyn Cluster>,
    provider: Arc<dyn VolumeProvider>,
    config: ScaleConfig,
    settings: Arc<ScaleSettings>,
}

impl Scenario {
    #[must_use]
    pub fn new(
        cluster: Arc<dyn Cluster>,
        provider: Arc<dyn VolumeProvider>,
        config: ScaleConfig,
        settings: ScaleSettings,
    ) -> Self {
        Self {
            cluster,
            provider,
            config,
            settings: Arc::new(settings),
        }
    }

    /// Run to completion.
    ///
    /// # Errors
    /// See [`Scenario::run_until`].
    pub async fn run(&self) -> Result<ScaleOutcome> {
        self.run_until(std::future::pending::<()>()).await
    }

    /// Run until done or until `shutdown` resolves.
    ///
    /// Teardown runs on every path once setup has started, including a
    /// shutdown or a failed worker.
    ///
    /// # Errors
    /// Returns the first error of the run; a teardown error is returned only
    /// when the run itself succeeded.
    pub async fn run_until<F>(&self, shutdown: F) -> Result<ScaleOutcome>
    where
        F: Future<Output = ()>,
    {
        let started_at = Utc::now();
        let started = Instant::now();

        let nodes = self.cluster.ready_schedulable_nodes().await?;
        if let Some(reason) = self.check_preconditions(&nodes) {
            warn!(%reason, "⏭️  Skipping scale run");
            return Ok(ScaleOutcome::Skipped(reason));
        }

        let namespace = self.settings.namespace.clone().unwrap_or_else(|| {
            let suffix = uuid::Uuid::new_v4().simple().to_string();
            format!("{NAMESPACE_PREFIX}-{}", &suffix[..8])
        });
        let ledger = Arc::new(ResourceLedger::new());

        info!(
            namespace = %namespace,
            volumes = self.config.volume_count,
            per_pod = self.config.volumes_per_pod,
            workers = self.config.instances,
            nodes = nodes.len(),
            "🚀 Starting vSphere volume scale run"
        );

        let (stop_tx, stop_rx) = watch::channel(false);
        let body = self.provision(&nodes, &namespace, &ledger, stop_rx);
        tokio::pin!(body);

        let finished = tokio::select! {
            result = &mut body => Some(result),
            () = shutdown => None,
        };
        let result = match finished {
            Some(result) => result,
            None => {
                warn!("Shutdown requested, stopping workers");
                // Drain the workers before the ledger is read.
                let _ = stop_tx.send(true);
                if let Err(e) = body.await {
                    debug!(error = %e, "Run stopped");
                }
                Err(ScaleError::Interrupted)
            }
        };

        let acquired = ledger.snapshot();
        let volumes = match &result {
            Ok(provisioned) => provisioned.volumes.clone(),
            Err(_) => acquired.placements.clone(),
        };
        let teardown = Teardown {
            cluster: self.cluster.as_ref(),
            provider: self.provider.as_ref(),
            settings: &self.settings,
            namespace: &namespace,
        }
        .run(&acquired, &volumes)
        .await;

        match (result, teardown) {
            (Ok(provisioned), Ok(summary)) => {
                let report = ScaleReport {
                    namespace: namespace.clone(),
                    started_at,
                    elapsed_secs: started.elapsed().as_secs_f64(),
                    workers: self.config.instances,
                    volumes_created: provisioned.volumes.volume_count(),
                    pods_created: provisioned.pods,
                    volumes_per_node: provisioned.volumes.counts(),
                    teardown: summary,
                };
                info!(
                    volumes = report.volumes_created,
                    pods = report.pods_created,
                    elapsed_secs = report.elapsed_secs,
                    "🎉 Scale run completed"
                );
                Ok(ScaleOutcome::Completed(report))
            }
            (Ok(_), Err(e)) | (Err(e), Ok(_)) => Err(e),
            (Err(e), Err(teardown_error)) => {
                error!(error = %teardown_error, "Teardown also failed");
                Err(e)
            }
        }
    }

    /// Reason to skip the run, checked before anything is created.
    fn check_preconditions(&self, nodes: &[NodeInfo]) -> Option<SkipReason> {
        if let Some(required) = &self.settings.required_provider {
            let prefix = format!("{required}://");
            if let Some(node) = nodes.iter().find(|n| {
                !n.provider_id
                    .as_deref()
                    .is_some_and(|id| id.starts_with(&prefix))
            }) {
                return Some(SkipReason::UnsupportedProvider {
                    node: node.name.clone(),
                    provider_id: node.provider_id.clone(),
                    required: required.clone(),
                });
            }
        }

        if nodes.len() < self.settings.min_nodes {
            return Some(SkipReason::NotEnoughNodes {
                required: self.settings.min_nodes,
                found: nodes.len(),
            });
        }

        let capacity = self.settings.max_volumes_per_node.saturating_mul(nodes.len());
        if self.config.volume_count > capacity {
            return Some(SkipReason::InsufficientAttachCapacity {
                volumes: self.config.volume_count,
                nodes: nodes.len(),
                capacity,
            });
        }
        None
    }

    /// Setup plus workers; every acquisition goes through `ledger`.
    async fn provision(
        &self,
        nodes: &[NodeInfo],
        namespace: &str,
        ledger: &Arc<ResourceLedger>,
        stop: watch::Receiver<bool>,
    ) -> Result<Provisioned> {
        let stopped = || {
            if *stop.borrow() {
                Err(ScaleError::Interrupted)
            } else {
                Ok(())
            }
        };

        if self.settings.namespace.is_none() {
            self.cluster.create_namespace(namespace).await?;
            ledger.record_namespace(namespace);
        }

        let mut node_selectors = Vec::with_capacity(nodes.len());
        for (index, node) in nodes.iter().enumerate() {
            let selector = NodeSelector::for_index(index);
            self.cluster
                .label_node(&node.name, &selector.key, &selector.value)
                .await?;
            ledger.record_node_label(&node.name);
            node_selectors.push(selector);
        }
        info!(nodes = node_selectors.len(), "🏷️  Labelled nodes");
        stopped()?;

        let mut storage_classes = Vec::new();
        for spec in StorageClassSpec::vsphere_set(&self.config.spbm_policy_name, &self.config.datastore)
        {
            info!(storage_class = %spec.name, "Creating storage class");
            let name = self.cluster.create_storage_class(&spec).await?;
            ledger.record_storage_class(&name);
            storage_classes.push(name);
        }
        stopped()?;

        let shares = partition(self.config.volume_count, self.config.instances)?;
        info!(?shares, "Partitioned volumes across workers");

        let ctx = WorkerContext {
            cluster: self.cluster.clone(),
            provider: self.provider.clone(),
            ledger: ledger.clone(),
            settings: self.settings.clone(),
            namespace: namespace.to_string(),
            storage_classes: storage_classes.into(),
            node_selectors: node_selectors.into(),
            volumes_per_pod: self.config.volumes_per_pod,
        };
        let outputs = run_workers(&ctx, &shares, stop.clone()).await?;

        Ok(Provisioned {
            volumes: merge(&outputs),
            pods: outputs.iter().map(|o| o.pods.len()).sum(),
        })
    }
}
