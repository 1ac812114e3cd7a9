use chrono::{DateTime, Utc};
use clap::Parser;
use duration_string::DurationString;
use futures::StreamExt;
use k8s_openapi::api::{
    apps::v1::{DaemonSet, Deployment},
    core::v1::{ConfigMap, Pod, Service, ServiceAccount},
    networking::v1::Ingress,
    rbac::v1::{Role, RoleBinding},
};
use kube::{
    api::{Api, ListParams, ResourceExt},
    client::Client,
    runtime::{
        controller::{Action, Controller},
        events::{Recorder, Reporter},
        reflector::ObjectRef,
        watcher,
    },
};
use serde::Serialize;
use std::sync::Arc;
use tokio::{sync::RwLock, time::Duration};
use tracing::*;

use super::{
    cert_manager::{Certificate, Issuer},
    engine::{reconcile_pass, Settings},
    route::Route,
    store::{Capabilities, Deadline, KubeStore, StoreObject},
    types::{Interconnect, LABEL_RESOURCE_KEY},
    workload::DEFAULT_ROUTER_IMAGE,
};
use crate::{Error, Result};

/// Delay before retrying a pass that lost a write race or ran out of time
const FAST_RETRY: Duration = Duration::from_secs(1);

/// Operator settings, from flags or the environment
#[derive(Parser, Debug, Clone)]
#[command(version, about, long_about = None)]
pub struct OperatorArgs {
    /// Namespace to watch; all namespaces when empty
    #[arg(long, env = "WATCH_NAMESPACE", default_value = "")]
    pub watch_namespace: String,

    /// Router image used when a deployment plan names none
    #[arg(long, env = "QDROUTERD_IMAGE", default_value = DEFAULT_ROUTER_IMAGE)]
    pub router_image: String,

    /// Address of the health and diagnostics server
    #[arg(long, env = "BIND_ADDRESS", default_value = "0.0.0.0:8080")]
    pub bind: String,

    /// Time budget for the store calls of one reconcile pass
    #[arg(long, env = "PASS_TIMEOUT", default_value = "30s")]
    pub pass_timeout: DurationString,

    /// Requeue delay after a failed pass
    #[arg(long, env = "ERROR_REQUEUE", default_value = "5m")]
    pub error_requeue: DurationString,
}

impl OperatorArgs {
    pub fn namespace(&self) -> Option<&str> {
        Some(self.watch_namespace.as_str()).filter(|ns| !ns.is_empty())
    }
}

// Context for our reconciler
#[derive(Clone)]
pub struct Context {
    pub store: KubeStore,
    pub settings: Settings,
    pub pass_timeout: Duration,
    pub error_requeue: Duration,
    /// Diagnostics read by the web server
    pub diagnostics: Arc<RwLock<Diagnostics>>,
}

async fn reconcile_interconnect(ic: Arc<Interconnect>, ctx: Arc<Context>) -> Result<Action> {
    let ns = ic.namespace().ok_or(Error::MissingObjectKey("namespace"))?;
    {
        let mut diagnostics = ctx.diagnostics.write().await;
        diagnostics.last_event = Utc::now();
        diagnostics.reconcile_count += 1;
    }

    info!("Reconciling Interconnect \"{}\" in {}", ic.name_any(), ns);
    let deadline = Deadline::after(ctx.pass_timeout);
    let outcome = reconcile_pass(&ic, &ctx.store, &ctx.settings, deadline).await?;
    debug!("Interconnect {}/{}: {outcome}", ns, ic.name_any());
    if outcome.requeue() {
        Ok(Action::requeue(Duration::ZERO))
    } else {
        Ok(Action::await_change())
    }
}

/// Diagnostics to be exposed by the web server
#[derive(Clone, Serialize)]
pub struct Diagnostics {
    pub last_event: DateTime<Utc>,
    pub reconcile_count: u64,
    pub capabilities: Capabilities,
    #[serde(skip)]
    pub reporter: Reporter,
}
impl Default for Diagnostics {
    fn default() -> Self {
        Self {
            last_event: Utc::now(),
            reconcile_count: 0,
            capabilities: Capabilities::default(),
            reporter: "interconnect-operator".into(),
        }
    }
}
impl Diagnostics {
    fn recorder(&self, client: Client) -> Recorder {
        Recorder::new(client, self.reporter.clone())
    }
}

/// State shared between the controller and the web server
#[derive(Clone, Default)]
pub struct State {
    /// Diagnostics populated by the reconciler
    diagnostics: Arc<RwLock<Diagnostics>>,
}

impl State {
    /// State getter
    pub async fn diagnostics(&self) -> Diagnostics {
        self.diagnostics.read().await.clone()
    }

    // Create a Controller Context that can update State
    pub async fn to_context(
        &self,
        client: Client,
        capabilities: Capabilities,
        args: &OperatorArgs,
    ) -> Arc<Context> {
        let mut diagnostics = self.diagnostics.write().await;
        diagnostics.capabilities = capabilities;
        let recorder = diagnostics.recorder(client.clone());
        Arc::new(Context {
            store: KubeStore::new(client, recorder),
            settings: Settings {
                capabilities,
                router_image: args.router_image.clone(),
            },
            pass_timeout: args.pass_timeout.clone().into(),
            error_requeue: args.error_requeue.clone().into(),
            diagnostics: self.diagnostics.clone(),
        })
    }
}

fn interconnect_error_policy(ic: Arc<Interconnect>, error: &Error, ctx: Arc<Context>) -> Action {
    warn!("reconcile of Interconnect {} failed: {:?}", ic.name_any(), error);
    if error.is_fast_retry() {
        Action::requeue(FAST_RETRY)
    } else {
        Action::requeue(ctx.error_requeue)
    }
}

fn scoped_api<K: StoreObject>(client: &Client, namespace: Option<&str>) -> Api<K> {
    match namespace {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    }
}

/// Pods are owned by ReplicaSets and DaemonSets, so map them back through their label
fn pod_owner(pod: Pod) -> Option<ObjectRef<Interconnect>> {
    let ns = pod.namespace()?;
    let name = pod.labels().get(LABEL_RESOURCE_KEY)?;
    Some(ObjectRef::new(name).within(&ns))
}

pub async fn run(state: State, args: OperatorArgs) -> Result<()> {
    let client = Client::try_default().await.map_err(Error::KubeError)?;
    let namespace = args.namespace();
    let interconnects = scoped_api::<Interconnect>(&client, namespace);
    if let Err(e) = interconnects.list(&ListParams::default().limit(1)).await {
        error!("Interconnect CRD is not queryable; {e:?}. Is the CRD installed?");
        info!("Installation: cargo run --bin gencrd && kubectl apply -f interconnect.yaml");
        return Err(Error::KubeError(e));
    }
    let capabilities = Capabilities::probe(&client).await?;

    let owned = || watcher::Config::default().labels(LABEL_RESOURCE_KEY);
    let mut controller = Controller::new(interconnects, watcher::Config::default().any_semantic())
        .owns(scoped_api::<Role>(&client, namespace), owned())
        .owns(scoped_api::<RoleBinding>(&client, namespace), owned())
        .owns(scoped_api::<ServiceAccount>(&client, namespace), owned())
        .owns(scoped_api::<ConfigMap>(&client, namespace), owned())
        .owns(scoped_api::<Deployment>(&client, namespace), owned())
        .owns(scoped_api::<DaemonSet>(&client, namespace), owned())
        .owns(scoped_api::<Service>(&client, namespace), owned())
        .owns(scoped_api::<Ingress>(&client, namespace), owned())
        .watches(scoped_api::<Pod>(&client, namespace), owned(), pod_owner);
    if capabilities.cert_manager {
        controller = controller
            .owns(scoped_api::<Issuer>(&client, namespace), owned())
            .owns(scoped_api::<Certificate>(&client, namespace), owned());
    }
    if capabilities.openshift_routes {
        controller = controller.owns(scoped_api::<Route>(&client, namespace), owned());
    }

    info!(
        "Watching Interconnects in {}",
        namespace.unwrap_or("all namespaces")
    );
    controller
        .shutdown_on_signal()
        .run(
            reconcile_interconnect,
            interconnect_error_policy,
            state.to_context(client, capabilities, &args).await,
        )
        .filter_map(async |x| std::result::Result::ok(x))
        .for_each(|_| futures::future::ready(()))
        .await;
    Ok(())
}
