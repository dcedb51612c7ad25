//! Volume provider trait and errors.

use async_trait::async_trait;
use thiserror::Error;

/// Errors that can occur while querying volume attach state.
#[derive(Error, Debug)]
pub enum ProviderError {
    /// Kubernetes API request failed.
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// Volumes were still attached when the wait ran out.
    #[error("{} volume(s) still attached after {secs}s: {}", .attached.len(), format_pairs(.attached))]
    StillAttached {
        secs: u64,
        attached: Vec<(String, String)>,
    },

    /// Backend-specific failure.
    #[error("{0}")]
    Backend(String),
}

fn format_pairs(pairs: &[(String, String)]) -> String {
    pairs
        .iter()
        .map(|(node, volume)| format!("{volume} on {node}"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Attach state of cloud-provider volumes.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VolumeProvider: Send + Sync {
    /// Short provider name used in logs.
    fn name(&self) -> &'static str;

    /// Whether `volume_path` is currently attached to `node`.
    async fn is_attached(&self, node: &str, volume_path: &str) -> Result<bool, ProviderError>;
}
