//! In-memory cluster and volume provider for scenario tests.
//!
//! Claims bind immediately, pods land on the node whose labels match their
//! selector, and attachments are shared with [`FakeProvider`] so detach
//! follows pod deletion the way the cloud provider would.

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use vcp_scale::cluster::{
    BoundVolume, ClaimRequest, Cluster, ClusterError, ExecOutput, NodeInfo, PodClaims,
    PodRequest, ScheduledPod,
};
use vcp_scale::provider::{ProviderError, VolumeProvider};
use vcp_scale::storage_class::StorageClassSpec;
use vcp_scale::{ScaleConfig, ScaleSettings};

#[derive(Debug, Clone)]
pub struct FakeNode {
    pub name: String,
    pub provider_id: Option<String>,
    pub labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct FakePod {
    pub node: String,
    pub claims: Vec<String>,
}

/// Everything the fake cluster holds.
#[derive(Debug, Default)]
pub struct FakeState {
    pub nodes: Vec<FakeNode>,
    pub namespaces: BTreeSet<String>,
    pub storage_classes: BTreeSet<String>,
    /// `(namespace, claim)` -> storage class.
    pub claims: BTreeMap<(String, String), String>,
    pub pods: BTreeMap<(String, String), FakePod>,
    /// `(node, volume path)` pairs currently attached.
    pub attachments: BTreeSet<(String, String)>,
    /// Every claim ever created with its storage class.
    pub created_claims: Vec<(String, String)>,
    /// Mutating calls in the order they happened.
    pub events: Vec<String>,
    /// Claims deleted while their volume was still attached.
    pub deleted_while_attached: Vec<String>,
    pod_creates: usize,
    next_id: usize,
}

impl FakeState {
    /// Index of the first event starting with `prefix`.
    pub fn first_event(&self, prefix: &str) -> Option<usize> {
        self.events.iter().position(|e| e.starts_with(prefix))
    }

    /// Index of the last event starting with `prefix`.
    pub fn last_event(&self, prefix: &str) -> Option<usize> {
        self.events.iter().rposition(|e| e.starts_with(prefix))
    }

    pub fn count_events(&self, prefix: &str) -> usize {
        self.events.iter().filter(|e| e.starts_with(prefix)).count()
    }

    pub fn labelled_nodes(&self) -> usize {
        self.nodes
            .iter()
            .filter(|n| n.labels.contains_key(vcp_scale::placement::NODE_LABEL_KEY))
            .count()
    }

    fn next_name(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}{}", self.next_id)
    }
}

/// Failures the fake can be told to produce.
#[derive(Debug, Clone, Default)]
pub struct Faults {
    /// Fail the n-th pod creation (1-based).
    pub fail_pod_create: Option<usize>,
    /// Keep volumes attached after their pod is deleted.
    pub never_detach: bool,
    /// Return the wrong content from the probe read.
    pub corrupt_probe: bool,
    /// Delay before a pod reports running.
    pub pod_start_delay: Option<Duration>,
    /// Delay after a claim is stored but before its name is returned.
    pub claim_create_delay: Option<Duration>,
    /// Claims never bind; the wait reports a timeout.
    pub claims_never_bind: bool,
    /// Pods never start; the wait reports a timeout.
    pub pods_never_start: bool,
    /// Pods terminate in `Failed` instead of running.
    pub pods_fail: bool,
}

/// Volume path the fake assigns to a claim.
pub fn volume_path(claim: &str) -> String {
    format!("[vsanDatastore] kubevols/{claim}.vmdk")
}

pub struct FakeCluster {
    state: Arc<Mutex<FakeState>>,
    faults: Faults,
}

impl FakeCluster {
    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }
}

pub struct FakeProvider {
    state: Arc<Mutex<FakeState>>,
}

/// A fake cluster with `nodes` vSphere nodes and a provider sharing its state.
pub fn fake(nodes: usize, faults: Faults) -> (Arc<FakeCluster>, Arc<FakeProvider>, Arc<Mutex<FakeState>>) {
    let state = FakeState {
        nodes: (0..nodes)
            .map(|i| FakeNode {
                name: format!("node-{i}"),
                provider_id: Some(format!("vsphere://4201-{i}")),
                labels: BTreeMap::new(),
            })
            .collect(),
        ..FakeState::default()
    };
    let state = Arc::new(Mutex::new(state));
    (
        Arc::new(FakeCluster {
            state: state.clone(),
            faults,
        }),
        Arc::new(FakeProvider {
            state: state.clone(),
        }),
        state,
    )
}

pub fn config(volume_count: usize, volumes_per_pod: usize, instances: usize) -> ScaleConfig {
    ScaleConfig {
        volume_count,
        volumes_per_pod,
        instances,
        spbm_policy_name: "gold".to_string(),
        datastore: "vsanDatastore".to_string(),
    }
}

/// Settings with short waits suitable for paused time.
pub fn settings() -> ScaleSettings {
    ScaleSettings {
        claim_bound_timeout: Duration::from_secs(5),
        pod_start_timeout: Duration::from_secs(5),
        pod_delete_timeout: Duration::from_secs(5),
        detach_timeout: Duration::from_secs(30),
        poll_interval: Duration::from_millis(100),
        detach_poll_interval: Duration::from_secs(10),
        ..ScaleSettings::default()
    }
}

#[async_trait]
impl Cluster for FakeCluster {
    async fn ready_schedulable_nodes(&self) -> Result<Vec<NodeInfo>, ClusterError> {
        Ok(self
            .lock()
            .nodes
            .iter()
            .map(|n| NodeInfo {
                name: n.name.clone(),
                provider_id: n.provider_id.clone(),
            })
            .collect())
    }

    async fn label_node(&self, node: &str, key: &str, value: &str) -> Result<(), ClusterError> {
        let mut state = self.lock();
        state.events.push(format!("label_node {node}"));
        let node = state
            .nodes
            .iter_mut()
            .find(|n| n.name == node)
            .ok_or_else(|| ClusterError::Other(format!("no node {node}")))?;
        node.labels.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove_node_label(&self, node: &str, key: &str) -> Result<(), ClusterError> {
        let mut state = self.lock();
        state.events.push(format!("remove_node_label {node}"));
        if let Some(node) = state.nodes.iter_mut().find(|n| n.name == node) {
            node.labels.remove(key);
        }
        Ok(())
    }

    async fn create_namespace(&self, name: &str) -> Result<(), ClusterError> {
        let mut state = self.lock();
        state.events.push(format!("create_namespace {name}"));
        state.namespaces.insert(name.to_string());
        Ok(())
    }

    async fn delete_namespace(&self, name: &str) -> Result<(), ClusterError> {
        let mut state = self.lock();
        state.events.push(format!("delete_namespace {name}"));
        state.namespaces.remove(name);
        state.claims.retain(|(ns, _), _| ns != name);
        state.pods.retain(|(ns, _), _| ns != name);
        Ok(())
    }

    async fn create_storage_class(&self, spec: &StorageClassSpec) -> Result<String, ClusterError> {
        let mut state = self.lock();
        state.events.push(format!("create_storage_class {}", spec.name));
        state.storage_classes.insert(spec.name.clone());
        Ok(spec.name.clone())
    }

    async fn delete_storage_class(&self, name: &str) -> Result<(), ClusterError> {
        let mut state = self.lock();
        state.events.push(format!("delete_storage_class {name}"));
        state.storage_classes.remove(name);
        Ok(())
    }

    async fn create_claim(
        &self,
        namespace: &str,
        request: &ClaimRequest,
    ) -> Result<String, ClusterError> {
        let name = {
            let mut state = self.lock();
            if !state.storage_classes.contains(&request.storage_class) {
                return Err(ClusterError::Other(format!(
                    "storage class {} not found",
                    request.storage_class
                )));
            }
            let name = state.next_name("pvc-");
            state.events.push(format!("create_claim {name}"));
            state.claims.insert(
                (namespace.to_string(), name.clone()),
                request.storage_class.clone(),
            );
            state
                .created_claims
                .push((name.clone(), request.storage_class.clone()));
            name
        };

        if let Some(delay) = self.faults.claim_create_delay {
            tokio::time::sleep(delay).await;
        }
        Ok(name)
    }

    async fn wait_claims_bound(
        &self,
        namespace: &str,
        claims: &[String],
        timeout: Duration,
    ) -> Result<Vec<BoundVolume>, ClusterError> {
        if self.faults.claims_never_bind {
            tokio::time::sleep(timeout).await;
            return Err(ClusterError::timeout(
                format!("claim {namespace}/{} to bind", claims[0]),
                timeout,
            ));
        }
        let state = self.lock();
        claims
            .iter()
            .map(|claim| {
                if state
                    .claims
                    .contains_key(&(namespace.to_string(), claim.clone()))
                {
                    Ok(BoundVolume {
                        claim: claim.clone(),
                        persistent_volume: format!("pv-{claim}"),
                        volume_path: volume_path(claim),
                    })
                } else {
                    Err(ClusterError::Other(format!("claim {claim} not found")))
                }
            })
            .collect()
    }

    async fn create_pod(&self, namespace: &str, request: &PodRequest) -> Result<String, ClusterError> {
        let mut state = self.lock();
        state.pod_creates += 1;
        if self.faults.fail_pod_create == Some(state.pod_creates) {
            return Err(ClusterError::Other("pod quota exceeded".to_string()));
        }

        let selector = &request.node_selector;
        let node = state
            .nodes
            .iter()
            .find(|n| n.labels.get(&selector.key) == Some(&selector.value))
            .map(|n| n.name.clone())
            .ok_or_else(|| ClusterError::Other(format!("no node matches {}", selector.value)))?;

        let name = state.next_name("pvc-tester-");
        state.events.push(format!("create_pod {name}"));
        for claim in &request.claims {
            state.attachments.insert((node.clone(), volume_path(claim)));
        }
        state.pods.insert(
            (namespace.to_string(), name.clone()),
            FakePod {
                node,
                claims: request.claims.clone(),
            },
        );
        Ok(name)
    }

    async fn wait_pod_running(
        &self,
        namespace: &str,
        pod: &str,
        timeout: Duration,
    ) -> Result<ScheduledPod, ClusterError> {
        if let Some(delay) = self.faults.pod_start_delay {
            tokio::time::sleep(delay).await;
        }
        if self.faults.pods_never_start {
            tokio::time::sleep(timeout).await;
            return Err(ClusterError::timeout(
                format!("pod {namespace}/{pod} to run"),
                timeout,
            ));
        }
        if self.faults.pods_fail {
            return Err(ClusterError::PodFailed {
                pod: pod.to_string(),
                phase: "Failed".to_string(),
            });
        }
        let state = self.lock();
        let found = state
            .pods
            .get(&(namespace.to_string(), pod.to_string()))
            .ok_or_else(|| ClusterError::Other(format!("pod {pod} not found")))?;
        Ok(ScheduledPod {
            name: pod.to_string(),
            node: found.node.clone(),
        })
    }

    async fn exec_in_pod(
        &self,
        _namespace: &str,
        _pod: &str,
        command: &[String],
    ) -> Result<ExecOutput, ClusterError> {
        let script = command.last().cloned().unwrap_or_default();
        let marker = script
            .strip_prefix("echo ")
            .and_then(|rest| rest.split(" > ").next())
            .unwrap_or_default();
        let stdout = if self.faults.corrupt_probe {
            "garbage\n".to_string()
        } else {
            format!("{marker}\n")
        };
        Ok(ExecOutput {
            stdout,
            stderr: String::new(),
            success: true,
        })
    }

    async fn list_pods(&self, namespace: &str) -> Result<Vec<PodClaims>, ClusterError> {
        Ok(self
            .lock()
            .pods
            .iter()
            .filter(|((ns, _), _)| ns == namespace)
            .map(|((_, name), pod)| PodClaims {
                name: name.clone(),
                claims: pod.claims.clone(),
            })
            .collect())
    }

    async fn list_claims(&self, namespace: &str) -> Result<Vec<String>, ClusterError> {
        Ok(self
            .lock()
            .claims
            .keys()
            .filter(|(ns, _)| ns == namespace)
            .map(|(_, name)| name.clone())
            .collect())
    }

    async fn delete_pod(&self, namespace: &str, pod: &str, _timeout: Duration) -> Result<(), ClusterError> {
        let mut state = self.lock();
        state.events.push(format!("delete_pod {pod}"));
        if let Some(removed) = state.pods.remove(&(namespace.to_string(), pod.to_string())) {
            if !self.faults.never_detach {
                for claim in &removed.claims {
                    state
                        .attachments
                        .remove(&(removed.node.clone(), volume_path(claim)));
                }
            }
        }
        Ok(())
    }

    async fn delete_claim(&self, namespace: &str, claim: &str) -> Result<(), ClusterError> {
        let mut state = self.lock();
        state.events.push(format!("delete_claim {claim}"));
        let path = volume_path(claim);
        if state.attachments.iter().any(|(_, p)| *p == path) {
            state.deleted_while_attached.push(claim.to_string());
        }
        state
            .claims
            .remove(&(namespace.to_string(), claim.to_string()));
        Ok(())
    }
}

#[async_trait]
impl VolumeProvider for FakeProvider {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn is_attached(&self, node: &str, volume_path: &str) -> Result<bool, ProviderError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .attachments
            .contains(&(node.to_string(), volume_path.to_string())))
    }
}
