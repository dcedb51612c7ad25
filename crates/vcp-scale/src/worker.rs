//! Worker routine: create, bind, attach and probe one share of volumes.

use std::sync::Arc;

use tracing::{debug, info};

use crate::cluster::{volume_mount_path, BoundVolume, ClaimRequest, Cluster, PodRequest, ScheduledPod};
use crate::config::ScaleSettings;
use crate::error::{Result, ScaleError};
use crate::ledger::ResourceLedger;
use crate::partition::plan_batches;
use crate::placement::{NodeSelector, NodeVolumeMap};
use crate::provider::VolumeProvider;

/// Name of the file written on every mounted volume.
pub const PROBE_FILE: &str = "emptyFile.txt";

/// Everything a worker needs, shared between all workers of a run.
#[derive(Clone)]
pub struct WorkerContext {
    pub cluster: Arc<dyn Cluster>,
    pub provider: Arc<dyn VolumeProvider>,
    pub ledger: Arc<ResourceLedger>,
    pub settings: Arc<ScaleSettings>,
    pub namespace: String,
    /// Storage class names in rotation order.
    pub storage_classes: Arc<[String]>,
    /// Node selectors in rotation order.
    pub node_selectors: Arc<[NodeSelector]>,
    pub volumes_per_pod: usize,
}

/// What a worker created.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerOutput {
    pub worker: usize,
    pub volumes: NodeVolumeMap,
    pub pods: Vec<String>,
    pub claims: Vec<String>,
}

/// Command that writes `marker` to the probe file of volume `index` and
/// reads it back.
#[must_use]
pub fn probe_command(index: usize, marker: &str) -> Vec<String> {
    let file = format!("{}/{PROBE_FILE}", volume_mount_path(index));
    vec![
        "/bin/sh".to_string(),
        "-c".to_string(),
        format!("echo {marker} > {file} && cat {file}"),
    ]
}

/// Process `share` volumes in batches of `ctx.volumes_per_pod`.
///
/// # Errors
/// Returns the first API failure or failed verification; resources created
/// up to that point are already recorded in the ledger.
pub async fn run_worker(ctx: WorkerContext, worker: usize, share: usize) -> Result<WorkerOutput> {
    let batches = plan_batches(
        share,
        ctx.volumes_per_pod,
        ctx.storage_classes.len(),
        ctx.node_selectors.len(),
    )?;
    info!(worker, share, batches = batches.len(), "👷 Worker starting");

    let mut output = WorkerOutput {
        worker,
        ..WorkerOutput::default()
    };

    for batch in batches {
        let request = ClaimRequest {
            storage_class: ctx.storage_classes[batch.storage_class].clone(),
            size: ctx.settings.claim_size.clone(),
        };

        let mut claims = Vec::with_capacity(batch.size);
        for _ in 0..batch.size {
            let claim = ctx.cluster.create_claim(&ctx.namespace, &request).await?;
            ctx.ledger.record_claim(&claim);
            claims.push(claim);
        }
        debug!(
            worker,
            batch = batch.index,
            storage_class = %request.storage_class,
            claims = claims.len(),
            "Created claims, waiting for bound phase"
        );

        let volumes = ctx
            .cluster
            .wait_claims_bound(&ctx.namespace, &claims, ctx.settings.claim_bound_timeout)
            .await?;

        let node_selector = ctx
            .node_selectors
            .get(batch.node_selector)
            .cloned()
            .ok_or(ScaleError::NoNodeSelectors)?;
        let pod_request = PodRequest {
            claims: claims.clone(),
            node_selector,
            image: ctx.settings.pod_image.clone(),
        };
        let pod_name = ctx.cluster.create_pod(&ctx.namespace, &pod_request).await?;
        ctx.ledger.record_pod(&pod_name);

        let pod = ctx
            .cluster
            .wait_pod_running(&ctx.namespace, &pod_name, ctx.settings.pod_start_timeout)
            .await?;

        for volume in &volumes {
            output.volumes.record(&pod.node, &volume.volume_path);
            ctx.ledger.record_placement(&pod.node, &volume.volume_path);
        }

        verify_volumes_accessible(&ctx, &pod, &volumes).await?;
        info!(
            worker,
            batch = batch.index,
            pod = %pod.name,
            node = %pod.node,
            volumes = volumes.len(),
            "✅ Volumes attached and accessible"
        );

        output.pods.push(pod.name);
        output.claims.extend(claims);
    }

    info!(
        worker,
        pods = output.pods.len(),
        volumes = output.volumes.volume_count(),
        "Worker finished"
    );
    Ok(output)
}

/// Check every volume is attached to the pod's node and writable from
/// inside the pod.
async fn verify_volumes_accessible(
    ctx: &WorkerContext,
    pod: &ScheduledPod,
    volumes: &[BoundVolume],
) -> Result<()> {
    for (index, volume) in volumes.iter().enumerate() {
        if !ctx
            .provider
            .is_attached(&pod.node, &volume.volume_path)
            .await?
        {
            return Err(ScaleError::NotAttached {
                node: pod.node.clone(),
                volume_path: volume.volume_path.clone(),
            });
        }

        let marker = format!("{}-{}", pod.name, index + 1);
        let path = format!("{}/{PROBE_FILE}", volume_mount_path(index));
        let output = ctx
            .cluster
            .exec_in_pod(&ctx.namespace, &pod.name, &probe_command(index, &marker))
            .await?;

        if !output.success {
            return Err(ScaleError::VolumeProbe {
                pod: pod.name.clone(),
                path,
                reason: format!("command failed: {}", output.stderr.trim()),
            });
        }
        if output.stdout.trim() != marker {
            return Err(ScaleError::VolumeProbe {
                pod: pod.name.clone(),
                path,
                reason: format!("read back {:?}, expected {marker:?}", output.stdout.trim()),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probe_command_targets_mount() {
        let command = probe_command(1, "pod-x-2");
        assert_eq!(command[0], "/bin/sh");
        assert_eq!(command[1], "-c");
        assert_eq!(
            command[2],
            "echo pod-x-2 > /mnt/volume2/emptyFile.txt && cat /mnt/volume2/emptyFile.txt"
        );
    }
}
