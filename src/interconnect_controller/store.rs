use std::fmt::Debug;

use async_trait::async_trait;
use k8s_openapi::{NamespaceResourceScope, api::core::v1::Pod};
use kube::{
    api::{Api, ListParams, Patch, PatchParams, PostParams},
    client::Client,
    runtime::events::Recorder,
    Resource, ResourceExt,
};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::json;
use tokio::time::{Duration, Instant};
use tracing::*;

use super::types::Interconnect;
use crate::{events_helper, Error, Result};

/// A namespaced object the controller reads and writes by name
pub trait StoreObject:
    Resource<DynamicType = (), Scope = NamespaceResourceScope>
    + Clone
    + Debug
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
}

impl<K> StoreObject for K where
    K: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + Clone
        + Debug
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static
{
}

/// Severity of a notice attached to a cluster
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Notice {
    Normal,
    Warning,
}

/// The cluster object store as seen by one reconcile pass.
///
/// Absence is `Ok(None)` from `get`, never an error. Failures are classified
/// into `Error::Conflict` (optimistic concurrency) and `Error::Transient`.
#[async_trait]
pub trait ClusterStore: Send + Sync {
    async fn get<K: StoreObject>(&self, ns: &str, name: &str) -> Result<Option<K>>;

    async fn list_pods(&self, ns: &str, selector: &str) -> Result<Vec<Pod>>;

    /// Create `obj`; losing a creation race is not an error
    async fn create<K: StoreObject>(&self, ns: &str, obj: &K) -> Result<()>;

    /// Replace `obj`, guarded by its resourceVersion
    async fn replace<K: StoreObject>(&self, ns: &str, obj: &K) -> Result<()>;

    /// Persist the cluster spec (defaults and stamped certificate secrets)
    async fn replace_cluster(&self, ic: &Interconnect) -> Result<()>;

    async fn replace_cluster_status(&self, ic: &Interconnect) -> Result<()>;

    /// Best effort; failures are swallowed
    async fn publish(&self, ic: &Interconnect, notice: Notice, reason: &str, note: String);
}

/// Which optional APIs the cluster serves, probed once at startup
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Capabilities {
    /// cert-manager.io is served: certificates can be issued
    pub cert_manager: bool,
    /// route.openshift.io is served: listeners are exposed with Routes instead of Ingresses
    pub openshift_routes: bool,
}

impl Capabilities {
    pub async fn probe(client: &Client) -> Result<Self> {
        let groups = client.list_api_groups().await.map_err(Error::KubeError)?;
        let served = |group: &str| groups.groups.iter().any(|g| g.name == group);
        let capabilities = Capabilities {
            cert_manager: served("cert-manager.io"),
            openshift_routes: served("route.openshift.io"),
        };
        info!(
            cert_manager = capabilities.cert_manager,
            openshift_routes = capabilities.openshift_routes,
            "Probed cluster capabilities"
        );
        Ok(capabilities)
    }
}

/// Point in time after which a pass makes no further store calls
#[derive(Clone, Copy, Debug)]
pub struct Deadline(Instant);

impl Deadline {
    pub fn after(timeout: Duration) -> Self {
        Deadline(Instant::now() + timeout)
    }

    pub fn check(&self, before: &str) -> Result<()> {
        if Instant::now() >= self.0 {
            return Err(Error::DeadlineExceeded(before.to_string()));
        }
        Ok(())
    }
}

/// `ClusterStore` backed by the Kubernetes API
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
    recorder: Recorder,
}

impl KubeStore {
    pub fn new(client: Client, recorder: Recorder) -> Self {
        KubeStore { client, recorder }
    }

    fn api<K: StoreObject>(&self, ns: &str) -> Api<K> {
        Api::namespaced(self.client.clone(), ns)
    }
}

#[async_trait]
impl ClusterStore for KubeStore {
    async fn get<K: StoreObject>(&self, ns: &str, name: &str) -> Result<Option<K>> {
        self.api::<K>(ns)
            .get_opt(name)
            .await
            .map_err(Error::from_store)
    }

    async fn list_pods(&self, ns: &str, selector: &str) -> Result<Vec<Pod>> {
        let pods = self
            .api::<Pod>(ns)
            .list(&ListParams::default().labels(selector))
            .await
            .map_err(Error::from_store)?;
        Ok(pods.items)
    }

    async fn create<K: StoreObject>(&self, ns: &str, obj: &K) -> Result<()> {
        match self.api::<K>(ns).create(&PostParams::default(), obj).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(resp)) if resp.code == 409 && resp.reason == "AlreadyExists" => {
                debug!("{} {} already exists", K::kind(&()), obj.name_any());
                Ok(())
            }
            Err(e) => Err(Error::from_store(e)),
        }
    }

    async fn replace<K: StoreObject>(&self, ns: &str, obj: &K) -> Result<()> {
        self.api::<K>(ns)
            .replace(&obj.name_any(), &PostParams::default(), obj)
            .await
            .map(|_| ())
            .map_err(Error::from_store)
    }

    async fn replace_cluster(&self, ic: &Interconnect) -> Result<()> {
        let ns = ic.namespace().ok_or(Error::MissingObjectKey("namespace"))?;
        self.replace(&ns, ic).await
    }

    async fn replace_cluster_status(&self, ic: &Interconnect) -> Result<()> {
        let ns = ic.namespace().ok_or(Error::MissingObjectKey("namespace"))?;
        // resourceVersion in the patch makes the write conditional
        let status = json!({
            "metadata": { "resourceVersion": ic.resource_version() },
            "status": ic.status,
        });
        self.api::<Interconnect>(&ns)
            .patch_status(&ic.name_any(), &PatchParams::default(), &Patch::Merge(&status))
            .await
            .map(|_| ())
            .map_err(Error::from_store)
    }

    async fn publish(&self, ic: &Interconnect, notice: Notice, reason: &str, note: String) {
        match notice {
            Notice::Normal => {
                events_helper::emit_info(&self.recorder, ic, reason, reason, note).await
            }
            Notice::Warning => {
                events_helper::emit_warning(&self.recorder, ic, reason, reason, note).await
            }
        }
    }
}
