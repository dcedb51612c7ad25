//! Cloud-provider volume seam.
//!
//! This module contains the [`VolumeProvider`] trait, the
//! [`NodeStatusProvider`] implementation and the detach wait shared by the
//! teardown.

pub mod node_status;
pub mod traits;

use std::sync::Arc;
use std::time::Duration;

use kube::Client;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::placement::NodeVolumeMap;

pub use node_status::NodeStatusProvider;
pub use traits::{ProviderError, VolumeProvider};

/// Resolve the provider handle for a cluster.
#[must_use]
pub fn resolve_provider(client: Client) -> Arc<dyn VolumeProvider> {
    let provider = NodeStatusProvider::new(client);
    info!(provider = provider.name(), "Resolved volume provider");
    Arc::new(provider)
}

/// Polling schedule of [`wait_for_detach`].
#[derive(Debug, Clone, Copy)]
pub struct DetachTiming {
    pub interval: Duration,
    pub timeout: Duration,
}

/// Wait until every `(node, volume)` pair of `volumes` reports detached.
///
/// Pairs already seen detached are not polled again.
///
/// # Errors
/// Returns [`ProviderError::StillAttached`] listing the remaining pairs when
/// `timing.timeout` elapses, or the first provider error.
pub async fn wait_for_detach(
    provider: &dyn VolumeProvider,
    volumes: &NodeVolumeMap,
    timing: DetachTiming,
) -> Result<(), ProviderError> {
    let deadline = Instant::now() + timing.timeout;
    let mut pending: Vec<(String, String)> = volumes
        .pairs()
        .map(|(node, volume)| (node.to_string(), volume.to_string()))
        .collect();

    info!(
        provider = provider.name(),
        volumes = pending.len(),
        "Waiting for volumes to detach"
    );

    loop {
        let mut attached = Vec::new();
        for (node, volume) in pending {
            if provider.is_attached(&node, &volume).await? {
                attached.push((node, volume));
            } else {
                debug!(node = %node, volume = %volume, "Volume detached");
            }
        }

        if attached.is_empty() {
            info!("All volumes detached");
            return Ok(());
        }
        if Instant::now() >= deadline {
            return Err(ProviderError::StillAttached {
                secs: timing.timeout.as_secs(),
                attached,
            });
        }

        debug!(remaining = attached.len(), "Volumes still attached");
        pending = attached;
        tokio::time::sleep(timing.interval).await;
    }
}
