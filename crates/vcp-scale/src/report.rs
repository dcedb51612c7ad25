//! Summary of a completed run.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::teardown::TeardownSummary;

/// Outcome of a completed scale run.
#[derive(Debug, Clone, Serialize)]
pub struct ScaleReport {
    pub namespace: String,
    pub started_at: DateTime<Utc>,
    pub elapsed_secs: f64,
    pub workers: usize,
    pub volumes_created: usize,
    pub pods_created: usize,
    /// Volumes attached per node.
    pub volumes_per_node: BTreeMap<String, usize>,
    pub teardown: TeardownSummary,
}

impl fmt::Display for ScaleReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "📊 vSphere volume scale run")?;
        writeln!(f, "{}", "=".repeat(60))?;
        writeln!(f, "Namespace:        {}", self.namespace)?;
        writeln!(f, "Started:          {}", self.started_at.to_rfc3339())?;
        writeln!(f, "Elapsed:          {:.1}s", self.elapsed_secs)?;
        writeln!(f, "Workers:          {}", self.workers)?;
        writeln!(f, "Volumes created:  {}", self.volumes_created)?;
        writeln!(f, "Pods created:     {}", self.pods_created)?;
        writeln!(f)?;
        writeln!(f, "{:<40} {:>10}", "NODE", "VOLUMES")?;
        writeln!(f, "{}", "-".repeat(60))?;
        for (node, count) in &self.volumes_per_node {
            writeln!(f, "{node:<40} {count:>10}")?;
        }
        writeln!(f)?;
        write!(
            f,
            "Teardown: {} pods deleted, {} volumes detached, {} claims deleted",
            self.teardown.pods_deleted, self.teardown.volumes_detached, self.teardown.claims_deleted
        )
    }
}
