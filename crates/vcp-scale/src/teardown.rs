//! Ordered release of everything a run acquired.
//!
//! Order is fixed: pods (one at a time, each waited for), then detach
//! confirmation for every placed volume, then claims, then storage classes,
//! node labels and the namespace. Claims (and the namespace holding them)
//! are only released once detach is confirmed; deleting them earlier can
//! leave a disk attached in the cloud with no claim pointing at it.

use serde::Serialize;
use tracing::{error, info, warn};

use crate::cluster::Cluster;
use crate::config::ScaleSettings;
use crate::error::{Result, ScaleError};
use crate::ledger::Acquired;
use crate::placement::{NodeVolumeMap, NODE_LABEL_KEY};
use crate::provider::{wait_for_detach, DetachTiming, VolumeProvider};

/// What teardown released.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TeardownSummary {
    pub pods_deleted: usize,
    pub volumes_detached: usize,
    pub claims_deleted: usize,
    pub storage_classes_deleted: usize,
    pub labels_removed: usize,
    pub namespace_deleted: bool,
}

/// Collaborators teardown releases resources through.
pub struct Teardown<'a> {
    pub cluster: &'a dyn Cluster,
    pub provider: &'a dyn VolumeProvider,
    pub settings: &'a ScaleSettings,
    pub namespace: &'a str,
}

fn keep_first(slot: &mut Option<ScaleError>, err: ScaleError) {
    error!(error = %err, "Teardown step failed");
    if slot.is_none() {
        *slot = Some(err);
    }
}

fn push_unique(list: &mut Vec<String>, item: &str) {
    if !list.iter().any(|existing| existing == item) {
        list.push(item.to_string());
    }
}

impl Teardown<'_> {
    /// Release `acquired`, confirming `volumes` detach before any claim goes.
    ///
    /// Every step runs even when an earlier one failed, except claim and
    /// namespace deletion, which are skipped unless detach was confirmed.
    ///
    /// # Errors
    /// Returns the first step that failed.
    pub async fn run(&self, acquired: &Acquired, volumes: &NodeVolumeMap) -> Result<TeardownSummary> {
        let mut summary = TeardownSummary::default();
        let mut first_error = None;
        let mut detach_safe = true;

        // Pods in the namespace first; fall back to the ledger when listing fails.
        let mut pods = Vec::new();
        let mut claims = Vec::new();
        match self.cluster.list_pods(self.namespace).await {
            Ok(listed) => {
                for pod in listed {
                    for claim in &pod.claims {
                        push_unique(&mut claims, claim);
                    }
                    push_unique(&mut pods, &pod.name);
                }
            }
            Err(e) => {
                detach_safe = false;
                keep_first(&mut first_error, e.into());
            }
        }
        for pod in &acquired.pods {
            push_unique(&mut pods, pod);
        }

        for pod in &pods {
            info!(pod = %pod, "🗑️  Deleting pod");
            match self
                .cluster
                .delete_pod(self.namespace, pod, self.settings.pod_delete_timeout)
                .await
            {
                Ok(()) => summary.pods_deleted += 1,
                Err(e) => {
                    detach_safe = false;
                    keep_first(&mut first_error, e.into());
                }
            }
        }

        if detach_safe {
            let timing = DetachTiming {
                interval: self.settings.detach_poll_interval,
                timeout: self.settings.detach_timeout,
            };
            match wait_for_detach(self.provider, volumes, timing).await {
                Ok(()) => summary.volumes_detached = volumes.volume_count(),
                Err(e) => {
                    detach_safe = false;
                    keep_first(&mut first_error, e.into());
                }
            }
        }

        // Also catches claims whose create call was cut short before the
        // ledger saw them.
        match self.cluster.list_claims(self.namespace).await {
            Ok(listed) => {
                for claim in &listed {
                    push_unique(&mut claims, claim);
                }
            }
            Err(e) => keep_first(&mut first_error, e.into()),
        }
        for claim in &acquired.claims {
            push_unique(&mut claims, claim);
        }
        if detach_safe {
            for claim in &claims {
                match self.cluster.delete_claim(self.namespace, claim).await {
                    Ok(()) => summary.claims_deleted += 1,
                    Err(e) => keep_first(&mut first_error, e.into()),
                }
            }
            info!(claims = summary.claims_deleted, "Deleted claims");
        } else if !claims.is_empty() {
            warn!(
                claims = claims.len(),
                namespace = %self.namespace,
                "Keeping claims: volume detach was not confirmed"
            );
        }

        for class in acquired.storage_classes.iter().rev() {
            match self.cluster.delete_storage_class(class).await {
                Ok(()) => summary.storage_classes_deleted += 1,
                Err(e) => keep_first(&mut first_error, e.into()),
            }
        }

        for node in &acquired.labelled_nodes {
            match self.cluster.remove_node_label(node, NODE_LABEL_KEY).await {
                Ok(()) => summary.labels_removed += 1,
                Err(e) => keep_first(&mut first_error, e.into()),
            }
        }

        if let Some(namespace) = &acquired.namespace {
            if detach_safe {
                match self.cluster.delete_namespace(namespace).await {
                    Ok(()) => summary.namespace_deleted = true,
                    Err(e) => keep_first(&mut first_error, e.into()),
                }
            } else {
                warn!(namespace = %namespace, "Keeping namespace: volume detach was not confirmed");
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => {
                info!(?summary, "🧹 Teardown complete");
                Ok(summary)
            }
        }
    }
}
