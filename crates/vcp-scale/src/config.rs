//! Run configuration.
//!
//! [`ScaleConfig`] holds the five values the run cannot start without, all
//! read from the environment with no defaults. Validation collects every
//! problem before failing so a misconfigured job reports them all at once.
//! [`ScaleSettings`] carries the tunables (timeouts, sizes, image) that do
//! have sensible defaults and are exposed as CLI flags.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Total number of volumes to create.
pub const ENV_VOLUME_COUNT: &str = "VCP_SCALE_VOLUME_COUNT";

/// Number of volumes attached to each pod.
pub const ENV_VOLUMES_PER_POD: &str = "VCP_SCALE_VOLUME_PER_POD";

/// Number of concurrent workers.
pub const ENV_INSTANCES: &str = "VCP_SCALE_INSTANCES";

/// SPBM storage policy used by one storage class variant.
pub const ENV_SPBM_POLICY_NAME: &str = "VSPHERE_SPBM_POLICY_NAME";

/// Datastore used by one storage class variant.
pub const ENV_DATASTORE: &str = "VSPHERE_DATASTORE";

/// Upper bound on concurrent workers.
pub const MAX_INSTANCES: usize = 5;

/// Maximum volumes the vSphere plugin can attach to a single node.
pub const DEFAULT_MAX_VOLUMES_PER_NODE: usize = 55;

/// Minimum number of ready schedulable nodes.
pub const DEFAULT_MIN_NODES: usize = 2;

/// Size requested by every claim.
pub const DEFAULT_CLAIM_SIZE: &str = "2Gi";

/// Image of the pod that mounts the volumes.
pub const DEFAULT_POD_IMAGE: &str = "busybox";

/// Cloud provider the cluster nodes must report.
pub const DEFAULT_PROVIDER: &str = "vsphere";

/// A single configuration problem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigProblem {
    /// Variable is unset or empty.
    Missing(&'static str),
    /// Variable is not a non-negative integer.
    NotANumber { var: &'static str, value: String },
    /// Variable must be at least one.
    Zero(&'static str),
    /// More workers than allowed.
    TooManyInstances { instances: usize, max: usize },
    /// More workers than volumes.
    InstancesExceedVolumes { instances: usize, volumes: usize },
}

impl fmt::Display for ConfigProblem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing(var) => write!(f, "{var} is not set"),
            Self::NotANumber { var, value } => {
                write!(f, "{var}={value:?} is not a valid number")
            }
            Self::Zero(var) => write!(f, "{var} must be greater than zero"),
            Self::TooManyInstances { instances, max } => {
                write!(f, "{ENV_INSTANCES}={instances} exceeds the maximum of {max}")
            }
            Self::InstancesExceedVolumes { instances, volumes } => write!(
                f,
                "{ENV_INSTANCES}={instances} must not exceed {ENV_VOLUME_COUNT}={volumes}"
            ),
        }
    }
}

/// Every problem found while reading the configuration.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid scale configuration: {}", join_problems(.problems))]
pub struct ConfigError {
    pub problems: Vec<ConfigProblem>,
}

fn join_problems(problems: &[ConfigProblem]) -> String {
    problems
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Required configuration of a scale run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScaleConfig {
    /// Total volumes to create.
    pub volume_count: usize,
    /// Volumes attached to each pod.
    pub volumes_per_pod: usize,
    /// Concurrent workers.
    pub instances: usize,
    /// Storage policy for the SPBM storage class.
    pub spbm_policy_name: String,
    /// Datastore for the user-specified-datastore storage class.
    pub datastore: String,
}

impl ScaleConfig {
    /// Read the configuration from the process environment.
    ///
    /// # Errors
    /// Returns a [`ConfigError`] listing every missing or invalid variable.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Read the configuration through an arbitrary variable lookup.
    ///
    /// # Errors
    /// Returns a [`ConfigError`] listing every missing or invalid variable.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut problems = Vec::new();

        let volume_count = read_count(&lookup, ENV_VOLUME_COUNT, &mut problems);
        let volumes_per_pod = read_count(&lookup, ENV_VOLUMES_PER_POD, &mut problems);
        let instances = read_count(&lookup, ENV_INSTANCES, &mut problems);
        let spbm_policy_name = read_string(&lookup, ENV_SPBM_POLICY_NAME, &mut problems);
        let datastore = read_string(&lookup, ENV_DATASTORE, &mut problems);

        if let Some(instances) = instances {
            if instances > MAX_INSTANCES {
                problems.push(ConfigProblem::TooManyInstances {
                    instances,
                    max: MAX_INSTANCES,
                });
            }
            if let Some(volumes) = volume_count {
                if instances > volumes {
                    problems.push(ConfigProblem::InstancesExceedVolumes { instances, volumes });
                }
            }
        }

        match (
            volume_count,
            volumes_per_pod,
            instances,
            spbm_policy_name,
            datastore,
        ) {
            (
                Some(volume_count),
                Some(volumes_per_pod),
                Some(instances),
                Some(spbm_policy_name),
                Some(datastore),
            ) if problems.is_empty() => Ok(Self {
                volume_count,
                volumes_per_pod,
                instances,
                spbm_policy_name,
                datastore,
            }),
            _ => Err(ConfigError { problems }),
        }
    }
}

fn read_string<F>(lookup: &F, var: &'static str, problems: &mut Vec<ConfigProblem>) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(var).map(|v| v.trim().to_string()) {
        Some(value) if !value.is_empty() => Some(value),
        _ => {
            problems.push(ConfigProblem::Missing(var));
            None
        }
    }
}

fn read_count<F>(lookup: &F, var: &'static str, problems: &mut Vec<ConfigProblem>) -> Option<usize>
where
    F: Fn(&str) -> Option<String>,
{
    let raw = read_string(lookup, var, problems)?;
    match raw.parse::<usize>() {
        Ok(0) => {
            problems.push(ConfigProblem::Zero(var));
            None
        }
        Ok(value) => Some(value),
        Err(_) => {
            problems.push(ConfigProblem::NotANumber { var, value: raw });
            None
        }
    }
}

/// Tunables of a scale run.
#[derive(Debug, Clone)]
pub struct ScaleSettings {
    /// Namespace to run in; a fresh one is created when unset.
    pub namespace: Option<String>,
    /// Storage requested by every claim.
    pub claim_size: String,
    /// Image of the pods that mount the volumes.
    pub pod_image: String,
    /// Attach limit per node used for the capacity precondition.
    pub max_volumes_per_node: usize,
    /// Minimum ready schedulable nodes.
    pub min_nodes: usize,
    /// Provider every node's `providerID` must name, if any.
    pub required_provider: Option<String>,
    /// How long claims may take to bind.
    pub claim_bound_timeout: Duration,
    /// How long a pod may take to reach `Running`.
    pub pod_start_timeout: Duration,
    /// How long a deleted pod may take to disappear.
    pub pod_delete_timeout: Duration,
    /// How long volumes may take to detach after their pods are gone.
    pub detach_timeout: Duration,
    /// Poll interval for claim, pod and node state.
    pub poll_interval: Duration,
    /// Poll interval for volume detach state.
    pub detach_poll_interval: Duration,
}

impl Default for ScaleSettings {
    fn default() -> Self {
        Self {
            namespace: None,
            claim_size: DEFAULT_CLAIM_SIZE.to_string(),
            pod_image: DEFAULT_POD_IMAGE.to_string(),
            max_volumes_per_node: DEFAULT_MAX_VOLUMES_PER_NODE,
            min_nodes: DEFAULT_MIN_NODES,
            required_provider: Some(DEFAULT_PROVIDER.to_string()),
            claim_bound_timeout: Duration::from_secs(300),
            pod_start_timeout: Duration::from_secs(300),
            pod_delete_timeout: Duration::from_secs(300),
            detach_timeout: Duration::from_secs(300),
            poll_interval: Duration::from_secs(2),
            detach_poll_interval: Duration::from_secs(10),
        }
    }
}
