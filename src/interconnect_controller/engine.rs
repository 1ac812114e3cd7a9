//! One reconcile pass: walk the derived resources in dependency order and
//! perform at most one mutation before returning.

use std::fmt;

use k8s_openapi::api::{
    apps::v1::{DaemonSet, Deployment},
    core::v1::ServiceAccount,
    networking::v1::Ingress,
    rbac::v1::{Role, RoleBinding},
};
use kube::ResourceExt;
use tracing::*;

use super::{
    cert_manager::{Certificate, Issuer},
    certificates::{pending_profile_step, CertStep},
    config_map::{config_map_needs_update, update_config_map},
    defaults::{normalize, unsatisfiable_profiles},
    exposure::{ingress_needs_update, route_needs_update, update_ingress, update_route},
    rbac::{role_binding_needs_update, role_needs_update, update_role, update_role_binding},
    route::Route,
    service::{service_needs_update, update_service},
    store::{Capabilities, ClusterStore, Deadline, Notice, StoreObject},
    types::{Interconnect, InterconnectStatus, Listener},
    workload::{
        daemonset_needs_update, daemonset_template, deployment_needs_update, deployment_template,
        replicas, template_image, update_daemonset, update_deployment,
    },
};
use crate::{
    conditions::{ConditionHistory, ConditionType, PassEvent, Phase},
    Error, Result,
};

/// What a pass did
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    Created { kind: String, name: String },
    Updated { kind: String, name: String },
    StatusUpdated,
    SpecUpdated,
    /// The spec can not be satisfied in this cluster; nothing to do until it changes
    Blocked(String),
    /// Everything is present and correct
    Idle,
}

impl Outcome {
    pub fn requeue(&self) -> bool {
        !matches!(self, Outcome::Idle | Outcome::Blocked(_))
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Created { kind, name } => write!(f, "created {kind} {name}"),
            Outcome::Updated { kind, name } => write!(f, "updated {kind} {name}"),
            Outcome::StatusUpdated => write!(f, "updated status"),
            Outcome::SpecUpdated => write!(f, "updated spec"),
            Outcome::Blocked(reason) => write!(f, "blocked: {reason}"),
            Outcome::Idle => write!(f, "idle"),
        }
    }
}

/// Process-wide inputs to every pass
#[derive(Clone, Debug)]
pub struct Settings {
    pub capabilities: Capabilities,
    /// Router image used when the deployment plan names none
    pub router_image: String,
}

/// A derived resource to converge: its desired state and how to compare and patch it
struct Step<K> {
    desired: K,
    needs_update: fn(&K, &K) -> bool,
    apply_update: fn(&mut K, &K),
}

impl<K> Step<K> {
    fn new(desired: K, needs_update: fn(&K, &K) -> bool, apply_update: fn(&mut K, &K)) -> Self {
        Step {
            desired,
            needs_update,
            apply_update,
        }
    }

    /// For resources whose spec is never patched once created
    fn create_only(desired: K) -> Self {
        Step::new(desired, |_, _| false, |_, _| {})
    }
}

/// Result of converging one step
enum Ensured<K> {
    /// Present and correct
    Unchanged(K),
    Created(Outcome),
    Updated { outcome: Outcome, previous: K },
}

struct Pass<'a, S> {
    store: &'a S,
    settings: &'a Settings,
    deadline: Deadline,
    ns: String,
}

/// Run one pass for `ic` against `store`.
///
/// Returns after the first mutation, or `Outcome::Idle` when nothing needed changing.
pub async fn reconcile_pass<S: ClusterStore>(
    ic: &Interconnect,
    store: &S,
    settings: &Settings,
    deadline: Deadline,
) -> Result<Outcome> {
    let ns = ic.namespace().ok_or(Error::MissingObjectKey("namespace"))?;
    let pass = Pass {
        store,
        settings,
        deadline,
        ns,
    };
    pass.run(ic.clone()).await
}

fn kind_of<K: StoreObject>() -> String {
    K::kind(&()).to_string()
}

impl<S: ClusterStore> Pass<'_, S> {
    async fn run(&self, mut ic: Interconnect) -> Result<Outcome> {
        let caps = self.settings.capabilities;
        let mut status = ic.status_or_default();

        if status.rev_number.is_empty() {
            status.rev_number = ic.resource_version().unwrap_or_default();
            status.phase = status.phase.next(PassEvent::FirstTouch);
            status.append_condition(ConditionType::Provisioning, "provision spec to desired state");
            info!("Started provisioning Interconnect {}/{}", self.ns, ic.name_any());
            return self.write_status(&mut ic, status).await;
        }

        let normalized = normalize(&mut ic.spec, caps.cert_manager);
        if normalized.changed {
            info!("Persisting defaults for Interconnect {}/{}", self.ns, ic.name_any());
            self.persist_spec(&ic).await?;
            return Ok(Outcome::SpecUpdated);
        }

        if !caps.cert_manager {
            let unsatisfiable = unsatisfiable_profiles(&ic.spec);
            if !unsatisfiable.is_empty() {
                let reason = format!(
                    "sslProfiles {} need certificates but cert-manager is not installed",
                    unsatisfiable.join(", ")
                );
                return self.block(&mut ic, status, reason).await;
            }
        }
        if status.phase == Phase::Failed {
            status.phase = status.phase.next(PassEvent::Unblocked);
            info!("Interconnect {}/{} is no longer blocked", self.ns, ic.name_any());
            return self.write_status(&mut ic, status).await;
        }

        if let Some(outcome) = self.ensure_rbac(&ic).await? {
            return Ok(outcome);
        }
        if normalized.request_cert {
            if let Some(outcome) = self.advance_certificates(&mut ic).await? {
                return Ok(outcome);
            }
        }
        let config_map = Step::new(
            ic.create_owned_config_map(),
            config_map_needs_update,
            update_config_map,
        );
        if let Some(outcome) = self.ensure_step(config_map).await?.mutation() {
            return Ok(outcome);
        }
        if let Some(outcome) = self.ensure_workload(&mut ic, &mut status).await? {
            return Ok(outcome);
        }
        let service = Step::new(
            ic.create_owned_service(normalized.request_cert),
            service_needs_update,
            update_service,
        );
        if let Some(outcome) = self.ensure_step(service).await?.mutation() {
            return Ok(outcome);
        }
        if let Some(outcome) = self.ensure_exposure(&ic).await? {
            return Ok(outcome);
        }
        self.aggregate_pods(&mut ic, status).await
    }

    /// Fetch the step's resource by name; create it when absent, patch it when it drifted
    async fn ensure_step<K: StoreObject>(&self, step: Step<K>) -> Result<Ensured<K>> {
        let kind = kind_of::<K>();
        let name = step.desired.name_any();
        self.deadline.check(&format!("get {kind} {name}"))?;
        match self.store.get::<K>(&self.ns, &name).await? {
            None => {
                info!("Creating a new {kind} {}/{name}", self.ns);
                self.deadline.check(&format!("create {kind} {name}"))?;
                self.store.create(&self.ns, &step.desired).await?;
                Ok(Ensured::Created(Outcome::Created { kind, name }))
            }
            Some(current) if (step.needs_update)(&current, &step.desired) => {
                info!("Updating {kind} {}/{name}", self.ns);
                let mut updated = current.clone();
                (step.apply_update)(&mut updated, &step.desired);
                self.deadline.check(&format!("update {kind} {name}"))?;
                self.store.replace(&self.ns, &updated).await?;
                Ok(Ensured::Updated {
                    outcome: Outcome::Updated { kind, name },
                    previous: current,
                })
            }
            Some(current) => {
                debug!("{kind} {}/{name} is up to date", self.ns);
                Ok(Ensured::Unchanged(current))
            }
        }
    }

    async fn ensure_rbac(&self, ic: &Interconnect) -> Result<Option<Outcome>> {
        let role = Step::<Role>::new(ic.create_owned_role(), role_needs_update, update_role);
        if let Some(outcome) = self.ensure_step(role).await?.mutation() {
            return Ok(Some(outcome));
        }
        let binding = Step::<RoleBinding>::new(
            ic.create_owned_role_binding(),
            role_binding_needs_update,
            update_role_binding,
        );
        if let Some(outcome) = self.ensure_step(binding).await?.mutation() {
            return Ok(Some(outcome));
        }
        let sa = Step::<ServiceAccount>::create_only(ic.create_owned_sa());
        Ok(self.ensure_step(sa).await?.mutation())
    }

    /// Issue the next missing piece of the certificate chain
    async fn advance_certificates(&self, ic: &mut Interconnect) -> Result<Option<Outcome>> {
        if ic.spec.deployment_plan.issuer().is_none() {
            let issuer = Step::<Issuer>::create_only(ic.create_owned_self_signed_issuer());
            if let Some(outcome) = self.ensure_step(issuer).await?.mutation() {
                return Ok(Some(outcome));
            }
            let ca = Step::<Certificate>::create_only(ic.create_owned_self_signed_ca());
            if let Some(outcome) = self.ensure_step(ca).await?.mutation() {
                return Ok(Some(outcome));
            }
        }
        let ca_issuer = Step::<Issuer>::create_only(ic.create_owned_ca_issuer());
        if let Some(outcome) = self.ensure_step(ca_issuer).await?.mutation() {
            return Ok(Some(outcome));
        }

        let Some(step) = pending_profile_step(ic) else {
            return Ok(None);
        };
        let certificate = match &step {
            CertStep::CaCert(profile) => ic.create_owned_profile_ca(profile),
            CertStep::Credentials(profile) => ic.create_owned_profile_certificate(profile),
        };
        // An existing certificate from an earlier pass only needs stamping
        let created = self
            .ensure_step(Step::<Certificate>::create_only(certificate))
            .await?
            .mutation();
        ic.stamp_profile(&step);
        self.persist_spec(ic).await?;
        Ok(Some(created.unwrap_or(Outcome::SpecUpdated)))
    }

    /// Converge the router workload, then its replica count
    async fn ensure_workload(
        &self,
        ic: &mut Interconnect,
        status: &mut InterconnectStatus,
    ) -> Result<Option<Outcome>> {
        let image = &self.settings.router_image;
        if ic.runs_as_daemonset() {
            if self.keep_other_workload::<Deployment>(ic).await? {
                return Ok(None);
            }
            let step = Step::new(
                ic.create_owned_daemonset(image),
                daemonset_needs_update,
                update_daemonset,
            );
            return match self.ensure_step(step).await? {
                Ensured::Unchanged(_) => Ok(None),
                Ensured::Created(outcome) => self.workload_created(ic, status, outcome).await,
                Ensured::Updated { outcome, previous } => {
                    let previous = daemonset_template(&previous).and_then(template_image);
                    self.workload_updated(ic, status, outcome, previous.map(String::from))
                        .await
                }
            };
        }

        if self.keep_other_workload::<DaemonSet>(ic).await? {
            return Ok(None);
        }
        let desired = ic.create_owned_deployment(image);
        if let Some(outcome) = self.scale_deployment(ic, status, &desired).await? {
            return Ok(Some(outcome));
        }
        let step = Step::new(desired, deployment_needs_update, update_deployment);
        match self.ensure_step(step).await? {
            Ensured::Unchanged(_) => Ok(None),
            Ensured::Created(outcome) => self.workload_created(ic, status, outcome).await,
            Ensured::Updated { outcome, previous } => {
                let previous = deployment_template(&previous).and_then(template_image);
                self.workload_updated(ic, status, outcome, previous.map(String::from))
                    .await
            }
        }
    }

    /// Move a live Deployment to the requested size, carrying the template
    /// (and its `POD_COUNT`) along in the same update
    async fn scale_deployment(
        &self,
        ic: &mut Interconnect,
        status: &mut InterconnectStatus,
        desired: &Deployment,
    ) -> Result<Option<Outcome>> {
        let name = desired.name_any();
        self.deadline.check(&format!("get Deployment {name}"))?;
        let Some(mut live) = self.store.get::<Deployment>(&self.ns, &name).await? else {
            return Ok(None);
        };
        let current = replicas(&live);
        let size = ic.spec.deployment_plan.size;
        if current == size {
            return Ok(None);
        }
        let previous_image = deployment_template(&live)
            .and_then(template_image)
            .map(String::from);
        update_deployment(&mut live, desired);
        let (condition, reason) = if size > current {
            (ConditionType::ScalingUp, "scaling up")
        } else {
            (ConditionType::ScalingDown, "scaling down")
        };
        info!(
            "Scaling Deployment {}/{} from {current} to {size}",
            self.ns,
            live.name_any()
        );
        if let Some(spec) = live.spec.as_mut() {
            spec.replicas = Some(size);
        }
        self.deadline.check(&format!("scale Deployment {}", live.name_any()))?;
        self.store.replace(&self.ns, &live).await?;
        status.append_condition(condition, reason);
        let image = ic.router_image(&self.settings.router_image);
        if previous_image.as_deref() != Some(image.as_str()) {
            status.append_condition(ConditionType::Upgrading, &format!("upgrading to {image}"));
        }
        status.pod_names.clear();
        self.record(ic, status.clone()).await?;
        self.store
            .publish(
                ic,
                Notice::Normal,
                "Scaled",
                format!("Scaled Deployment `{}` from {current} to {size}", live.name_any()),
            )
            .await;
        Ok(Some(Outcome::Updated {
            kind: kind_of::<Deployment>(),
            name,
        }))
    }

    /// A workload of the other kind left behind by a placement change keeps serving
    async fn keep_other_workload<K: StoreObject>(&self, ic: &Interconnect) -> Result<bool> {
        let kind = kind_of::<K>();
        self.deadline.check(&format!("get {kind} {}", ic.name_any()))?;
        let existing = self.store.get::<K>(&self.ns, &ic.name_any()).await?;
        if existing.is_some() {
            warn!(
                "{kind} {}/{} exists but placement selects the other workload kind; leaving it in place",
                self.ns,
                ic.name_any()
            );
        }
        Ok(existing.is_some())
    }

    async fn workload_created(
        &self,
        ic: &mut Interconnect,
        status: &mut InterconnectStatus,
        outcome: Outcome,
    ) -> Result<Option<Outcome>> {
        status.append_condition(ConditionType::Deployed, "router workload deployed");
        self.record(ic, status.clone()).await?;
        self.store
            .publish(ic, Notice::Normal, "Deployed", format!("Router workload {outcome}"))
            .await;
        Ok(Some(outcome))
    }

    async fn workload_updated(
        &self,
        ic: &mut Interconnect,
        status: &mut InterconnectStatus,
        outcome: Outcome,
        previous_image: Option<String>,
    ) -> Result<Option<Outcome>> {
        let image = ic.router_image(&self.settings.router_image);
        if previous_image.as_deref() != Some(image.as_str()) {
            status.append_condition(ConditionType::Upgrading, &format!("upgrading to {image}"));
            self.record(ic, status.clone()).await?;
        }
        Ok(Some(outcome))
    }

    async fn ensure_exposure(&self, ic: &Interconnect) -> Result<Option<Outcome>> {
        let exposed: Vec<&Listener> = ic.exposed_listeners().collect();
        for listener in exposed {
            let ensured = if self.settings.capabilities.openshift_routes {
                let step = Step::<Route>::new(
                    ic.create_owned_route(listener),
                    route_needs_update,
                    update_route,
                );
                self.ensure_step(step).await?.mutation()
            } else {
                let step = Step::<Ingress>::new(
                    ic.create_owned_ingress(listener),
                    ingress_needs_update,
                    update_ingress,
                );
                self.ensure_step(step).await?.mutation()
            };
            if let Some(outcome) = ensured {
                if matches!(outcome, Outcome::Created { .. })
                    && listener.ssl_profile().is_none()
                    && !listener.http
                {
                    warn!(
                        "Exposing listener {} of {}/{} without an sslProfile",
                        listener.target_name(),
                        self.ns,
                        ic.name_any()
                    );
                }
                return Ok(Some(outcome));
            }
        }
        Ok(None)
    }

    async fn aggregate_pods(
        &self,
        ic: &mut Interconnect,
        mut status: InterconnectStatus,
    ) -> Result<Outcome> {
        self.deadline.check("list pods")?;
        let pods = self.store.list_pods(&self.ns, &ic.label_selector()).await?;
        let names: Vec<String> = pods
            .iter()
            .filter(|p| p.metadata.deletion_timestamp.is_none())
            .map(|p| p.name_any())
            .collect();
        let phase = status.phase.next(PassEvent::Converged);
        if names == status.pod_names && phase == status.phase {
            debug!("Interconnect {}/{} is converged", self.ns, ic.name_any());
            return Ok(Outcome::Idle);
        }
        status.pod_names = names;
        status.phase = phase;
        self.write_status(ic, status).await
    }

    async fn block(
        &self,
        ic: &mut Interconnect,
        mut status: InterconnectStatus,
        reason: String,
    ) -> Result<Outcome> {
        if status.phase != Phase::Failed {
            warn!("Interconnect {}/{} failed: {reason}", self.ns, ic.name_any());
            status.phase = status.phase.next(PassEvent::Blocked);
            self.write_status(ic, status).await?;
            self.store
                .publish(ic, Notice::Warning, "Failed", reason.clone())
                .await;
        }
        Ok(Outcome::Blocked(reason))
    }

    async fn persist_spec(&self, ic: &Interconnect) -> Result<()> {
        self.deadline.check("update Interconnect")?;
        self.store.replace_cluster(ic).await
    }

    async fn write_status(
        &self,
        ic: &mut Interconnect,
        status: InterconnectStatus,
    ) -> Result<Outcome> {
        self.deadline.check("update Interconnect status")?;
        ic.status = Some(status);
        self.store.replace_cluster_status(ic).await?;
        Ok(Outcome::StatusUpdated)
    }

    /// Status bookkeeping for a mutation already made in this pass; not subject to the deadline
    async fn record(&self, ic: &mut Interconnect, status: InterconnectStatus) -> Result<()> {
        ic.status = Some(status);
        self.store.replace_cluster_status(ic).await
    }
}

impl<K> Ensured<K> {
    fn mutation(self) -> Option<Outcome> {
        match self {
            Ensured::Unchanged(_) => None,
            Ensured::Created(outcome) | Ensured::Updated { outcome, .. } => Some(outcome),
        }
    }
}
