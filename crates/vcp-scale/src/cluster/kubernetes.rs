//! [`Cluster`] implementation over the Kubernetes API.

use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{
    Namespace, Node, PersistentVolume, PersistentVolumeClaim, Pod,
};
use k8s_openapi::api::storage::v1::StorageClass;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Status;
use kube::api::{Api, AttachParams, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::{Client, ResourceExt};
use serde_json::json;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::traits::{
    volume_mount_path, BoundVolume, ClaimRequest, Cluster, ClusterError, ExecOutput, NodeInfo,
    PodClaims, PodRequest, ScheduledPod,
};
use crate::storage_class::StorageClassSpec;

/// Label put on every pod the scale run creates.
pub const POD_APP_LABEL: &str = "vcp-at-scale";

/// Default polling interval for claim and pod state.
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Kubernetes-backed orchestrator.
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
    poll_interval: Duration,
}

impl KubeCluster {
    /// Create a cluster handle from a Kubernetes client.
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self {
            client,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Override the polling interval used by the wait operations.
    #[must_use]
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    fn nodes(&self) -> Api<Node> {
        Api::all(self.client.clone())
    }

    fn pods(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn claims(&self, namespace: &str) -> Api<PersistentVolumeClaim> {
        Api::namespaced(self.client.clone(), namespace)
    }

    /// Volume of a bound claim, or `None` while the claim is still pending.
    async fn bound_volume(
        &self,
        claims: &Api<PersistentVolumeClaim>,
        name: &str,
    ) -> Result<Option<BoundVolume>, ClusterError> {
        let claim = claims.get(name).await?;
        let phase = claim.status.as_ref().and_then(|s| s.phase.as_deref());
        let volume_name = claim.spec.as_ref().and_then(|s| s.volume_name.clone());

        match (phase, volume_name) {
            (Some("Bound"), Some(volume_name)) => {
                let volumes: Api<PersistentVolume> = Api::all(self.client.clone());
                let volume = volumes.get(&volume_name).await?;
                let volume_path = volume_path(&volume)
                    .ok_or_else(|| ClusterError::MissingVolumePath(volume_name.clone()))?;
                Ok(Some(BoundVolume {
                    claim: name.to_string(),
                    persistent_volume: volume_name,
                    volume_path,
                }))
            }
            _ => Ok(None),
        }
    }
}

/// True for nodes the scheduler may place test pods on.
pub(crate) fn is_ready_and_schedulable(node: &Node) -> bool {
    let spec = node.spec.as_ref();
    if spec.and_then(|s| s.unschedulable).unwrap_or(false) {
        return false;
    }

    let tainted = spec
        .and_then(|s| s.taints.as_ref())
        .is_some_and(|taints| {
            taints
                .iter()
                .any(|t| t.effect == "NoSchedule" || t.effect == "NoExecute")
        });
    if tainted {
        return false;
    }

    node.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .is_some_and(|conditions| {
            conditions
                .iter()
                .any(|c| c.type_ == "Ready" && c.status == "True")
        })
}

/// Cloud-provider disk path of a persistent volume.
///
/// In-tree vSphere volumes carry `vsphereVolume.volumePath`; CSI-migrated
/// ones only carry the CSI volume handle.
pub(crate) fn volume_path(volume: &PersistentVolume) -> Option<String> {
    let spec = volume.spec.as_ref()?;
    spec.vsphere_volume
        .as_ref()
        .map(|v| v.volume_path.clone())
        .or_else(|| spec.csi.as_ref().map(|c| c.volume_handle.clone()))
        .filter(|path| !path.is_empty())
}

/// Claim names referenced by a pod's volumes.
pub(crate) fn pod_claims(pod: &Pod) -> Vec<String> {
    pod.spec
        .as_ref()
        .and_then(|s| s.volumes.as_ref())
        .map(|volumes| {
            volumes
                .iter()
                .filter_map(|v| v.persistent_volume_claim.as_ref())
                .map(|c| c.claim_name.clone())
                .collect()
        })
        .unwrap_or_default()
}

/// Claim manifest with a generated name.
pub(crate) fn claim_manifest(request: &ClaimRequest) -> Result<PersistentVolumeClaim, ClusterError> {
    let claim = json!({
        "apiVersion": "v1",
        "kind": "PersistentVolumeClaim",
        "metadata": {
            "generateName": "pvc-",
            "labels": { "app": POD_APP_LABEL }
        },
        "spec": {
            "accessModes": ["ReadWriteOnce"],
            "storageClassName": request.storage_class,
            "resources": {
                "requests": { "storage": request.size }
            }
        }
    });
    Ok(serde_json::from_value(claim)?)
}

/// Pod manifest that keeps every claim of a batch mounted.
pub(crate) fn pod_manifest(request: &PodRequest) -> Result<Pod, ClusterError> {
    let mounts: Vec<_> = (0..request.claims.len())
        .map(|i| json!({ "name": format!("volume{}", i + 1), "mountPath": volume_mount_path(i) }))
        .collect();
    let volumes: Vec<_> = request
        .claims
        .iter()
        .enumerate()
        .map(|(i, claim)| {
            json!({
                "name": format!("volume{}", i + 1),
                "persistentVolumeClaim": { "claimName": claim, "readOnly": false }
            })
        })
        .collect();

    let pod = json!({
        "apiVersion": "v1",
        "kind": "Pod",
        "metadata": {
            "generateName": "pvc-tester-",
            "labels": { "app": POD_APP_LABEL }
        },
        "spec": {
            "containers": [{
                "name": "write-pod",
                "image": request.image,
                "command": ["/bin/sh"],
                "args": ["-c", "while true ; do sleep 2 ; done"],
                "volumeMounts": mounts,
                "securityContext": { "privileged": false }
            }],
            "restartPolicy": "OnFailure",
            "nodeSelector": { request.node_selector.key.clone(): request.node_selector.value.clone() },
            "volumes": volumes
        }
    });
    Ok(serde_json::from_value(pod)?)
}

/// Whether an exec finished with status `Success`. No status is a failure.
pub(crate) fn exec_succeeded(status: Option<&Status>) -> bool {
    status.is_some_and(|s| s.status.as_deref() == Some("Success"))
}

async fn read_stream<R: AsyncRead + Unpin>(stream: Option<R>) -> std::io::Result<String> {
    let mut out = String::new();
    if let Some(mut stream) = stream {
        stream.read_to_string(&mut out).await?;
    }
    Ok(out)
}

/// Selects the pods and claims the scale run created.
fn run_selector() -> ListParams {
    ListParams::default().labels(&format!("app={POD_APP_LABEL}"))
}

fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(ae) if ae.code == 404)
}

#[async_trait]
impl Cluster for KubeCluster {
    async fn ready_schedulable_nodes(&self) -> Result<Vec<NodeInfo>, ClusterError> {
        let nodes = self.nodes().list(&ListParams::default()).await?;
        let ready: Vec<NodeInfo> = nodes
            .items
            .iter()
            .filter(|n| is_ready_and_schedulable(n))
            .map(|n| NodeInfo {
                name: n.name_any(),
                provider_id: n.spec.as_ref().and_then(|s| s.provider_id.clone()),
            })
            .collect();
        debug!(total = nodes.items.len(), ready = ready.len(), "Listed nodes");
        Ok(ready)
    }

    async fn label_node(&self, node: &str, key: &str, value: &str) -> Result<(), ClusterError> {
        let patch = json!({ "metadata": { "labels": { key: value } } });
        self.nodes()
            .patch(node, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        debug!(node = %node, key = %key, value = %value, "Labelled node");
        Ok(())
    }

    async fn remove_node_label(&self, node: &str, key: &str) -> Result<(), ClusterError> {
        let patch = json!({ "metadata": { "labels": { key: null } } });
        match self
            .nodes()
            .patch(node, &PatchParams::default(), &Patch::Merge(&patch))
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if is_not_found(&e) => {
                warn!(node = %node, "Node gone before its label was removed");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn create_namespace(&self, name: &str) -> Result<(), ClusterError> {
        let namespaces: Api<Namespace> = Api::all(self.client.clone());
        let namespace: Namespace = serde_json::from_value(json!({
            "apiVersion": "v1",
            "kind": "Namespace",
            "metadata": { "name": name, "labels": { "app": POD_APP_LABEL } }
        }))?;
        namespaces.create(&PostParams::default(), &namespace).await?;
        info!(namespace = %name, "Created namespace");
        Ok(())
    }

    async fn delete_namespace(&self, name: &str) -> Result<(), ClusterError> {
        let namespaces: Api<Namespace> = Api::all(self.client.clone());
        match namespaces.delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn create_storage_class(&self, spec: &StorageClassSpec) -> Result<String, ClusterError> {
        let classes: Api<StorageClass> = Api::all(self.client.clone());
        let created = classes
            .create(&PostParams::default(), &spec.to_storage_class())
            .await?;
        Ok(created.name_any())
    }

    async fn delete_storage_class(&self, name: &str) -> Result<(), ClusterError> {
        let classes: Api<StorageClass> = Api::all(self.client.clone());
        match classes.delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn create_claim(
        &self,
        namespace: &str,
        request: &ClaimRequest,
    ) -> Result<String, ClusterError> {
        let claim = claim_manifest(request)?;
        let created = self
            .claims(namespace)
            .create(&PostParams::default(), &claim)
            .await?;
        Ok(created.name_any())
    }

    async fn wait_claims_bound(
        &self,
        namespace: &str,
        claims: &[String],
        timeout: Duration,
    ) -> Result<Vec<BoundVolume>, ClusterError> {
        let api = self.claims(namespace);
        let deadline = Instant::now() + timeout;
        let mut bound = Vec::with_capacity(claims.len());

        for claim in claims {
            loop {
                if let Some(volume) = self.bound_volume(&api, claim).await? {
                    debug!(claim = %claim, volume = %volume.persistent_volume, "Claim bound");
                    bound.push(volume);
                    break;
                }
                if Instant::now() >= deadline {
                    return Err(ClusterError::timeout(
                        format!("claim {namespace}/{claim} to bind"),
                        timeout,
                    ));
                }
                tokio::time::sleep(self.poll_interval).await;
            }
        }
        Ok(bound)
    }

    async fn create_pod(
        &self,
        namespace: &str,
        request: &PodRequest,
    ) -> Result<String, ClusterError> {
        let pod = pod_manifest(request)?;
        let created = self
            .pods(namespace)
            .create(&PostParams::default(), &pod)
            .await?;
        Ok(created.name_any())
    }

    async fn wait_pod_running(
        &self,
        namespace: &str,
        pod: &str,
        timeout: Duration,
    ) -> Result<ScheduledPod, ClusterError> {
        let api = self.pods(namespace);
        let deadline = Instant::now() + timeout;

        loop {
            let current = api.get(pod).await?;
            let phase = current
                .status
                .as_ref()
                .and_then(|s| s.phase.clone())
                .unwrap_or_default();

            match phase.as_str() {
                "Running" => {
                    let node = current
                        .spec
                        .as_ref()
                        .and_then(|s| s.node_name.clone())
                        .ok_or_else(|| ClusterError::Unscheduled(pod.to_string()))?;
                    return Ok(ScheduledPod {
                        name: pod.to_string(),
                        node,
                    });
                }
                "Failed" | "Succeeded" => {
                    return Err(ClusterError::PodFailed {
                        pod: pod.to_string(),
                        phase,
                    })
                }
                _ => {}
            }

            if Instant::now() >= deadline {
                return Err(ClusterError::timeout(
                    format!("pod {namespace}/{pod} to run"),
                    timeout,
                ));
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn exec_in_pod(
        &self,
        namespace: &str,
        pod: &str,
        command: &[String],
    ) -> Result<ExecOutput, ClusterError> {
        let mut attached = self
            .pods(namespace)
            .exec(pod, command.to_vec(), &AttachParams::default())
            .await?;

        let (stdout, stderr) = tokio::try_join!(
            read_stream(attached.stdout()),
            read_stream(attached.stderr())
        )?;

        let status = match attached.take_status() {
            Some(status) => status.await,
            None => None,
        };
        attached.join().await.map_err(|e| ClusterError::Exec {
            pod: pod.to_string(),
            message: e.to_string(),
        })?;

        let success = exec_succeeded(status.as_ref());
        if status.is_none() {
            warn!(pod = %pod, "Exec ended without a status, treating it as failed");
        }
        Ok(ExecOutput {
            stdout,
            stderr,
            success,
        })
    }

    async fn list_pods(&self, namespace: &str) -> Result<Vec<PodClaims>, ClusterError> {
        let pods = self.pods(namespace).list(&run_selector()).await?;
        Ok(pods
            .items
            .iter()
            .map(|pod| PodClaims {
                name: pod.name_any(),
                claims: pod_claims(pod),
            })
            .collect())
    }

    async fn list_claims(&self, namespace: &str) -> Result<Vec<String>, ClusterError> {
        let claims = self.claims(namespace).list(&run_selector()).await?;
        Ok(claims.items.iter().map(ResourceExt::name_any).collect())
    }

    async fn delete_pod(
        &self,
        namespace: &str,
        pod: &str,
        timeout: Duration,
    ) -> Result<(), ClusterError> {
        let api = self.pods(namespace);
        match api.delete(pod, &DeleteParams::default()).await {
            Ok(_) => {}
            Err(e) if is_not_found(&e) => return Ok(()),
            Err(e) => return Err(e.into()),
        }

        let deadline = Instant::now() + timeout;
        loop {
            match api.get_opt(pod).await? {
                None => {
                    debug!(pod = %pod, "Pod deleted");
                    return Ok(());
                }
                Some(_) if Instant::now() >= deadline => {
                    return Err(ClusterError::timeout(
                        format!("pod {namespace}/{pod} to be deleted"),
                        timeout,
                    ));
                }
                Some(_) => tokio::time::sleep(self.poll_interval).await,
            }
        }
    }

    async fn delete_claim(&self, namespace: &str, claim: &str) -> Result<(), ClusterError> {
        match self
            .claims(namespace)
            .delete(claim, &DeleteParams::default())
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
