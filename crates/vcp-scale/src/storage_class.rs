//! The four vSphere storage class variants volumes are provisioned from.

use std::collections::BTreeMap;

use k8s_openapi::api::storage::v1::StorageClass;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

/// In-tree vSphere volume provisioner.
pub const VSPHERE_PROVISIONER: &str = "kubernetes.io/vsphere-volume";

/// vSAN policy parameter: host failures to tolerate.
pub const PARAM_HOST_FAILURES_TO_TOLERATE: &str = "hostFailuresToTolerate";

/// SPBM storage policy parameter.
pub const PARAM_SPBM_POLICY: &str = "storagepolicyname";

/// Datastore parameter.
pub const PARAM_DATASTORE: &str = "datastore";

/// Which flavour of storage class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageClassKind {
    /// No parameters, provider defaults.
    Default,
    /// vSAN capability `hostFailuresToTolerate=1`.
    HostFailuresToTolerate,
    /// Named SPBM storage policy.
    SpbmPolicy,
    /// Named datastore.
    Datastore,
}

impl StorageClassKind {
    /// Fixed storage class name for this flavour.
    #[must_use]
    pub const fn class_name(self) -> &'static str {
        match self {
            Self::Default => "sc-default",
            Self::HostFailuresToTolerate => "sc-vsan",
            Self::SpbmPolicy => "sc-spbm",
            Self::Datastore => "sc-user-specified-ds",
        }
    }
}

/// A storage class to create for the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageClassSpec {
    pub name: String,
    pub kind: StorageClassKind,
    pub provisioner: String,
    pub parameters: BTreeMap<String, String>,
}

impl StorageClassSpec {
    fn new(kind: StorageClassKind, parameters: &[(&str, &str)]) -> Self {
        Self {
            name: kind.class_name().to_string(),
            kind,
            provisioner: VSPHERE_PROVISIONER.to_string(),
            parameters: parameters
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect(),
        }
    }

    /// The four classes in the order claims rotate through them.
    #[must_use]
    pub fn vsphere_set(spbm_policy_name: &str, datastore: &str) -> Vec<Self> {
        vec![
            Self::new(StorageClassKind::Default, &[]),
            Self::new(
                StorageClassKind::HostFailuresToTolerate,
                &[(PARAM_HOST_FAILURES_TO_TOLERATE, "1")],
            ),
            Self::new(
                StorageClassKind::SpbmPolicy,
                &[(PARAM_SPBM_POLICY, spbm_policy_name)],
            ),
            Self::new(StorageClassKind::Datastore, &[(PARAM_DATASTORE, datastore)]),
        ]
    }

    /// Render as a Kubernetes `StorageClass`.
    #[must_use]
    pub fn to_storage_class(&self) -> StorageClass {
        StorageClass {
            metadata: ObjectMeta {
                name: Some(self.name.clone()),
                ..ObjectMeta::default()
            },
            provisioner: self.provisioner.clone(),
            parameters: (!self.parameters.is_empty()).then(|| self.parameters.clone()),
            ..StorageClass::default()
        }
    }
}
