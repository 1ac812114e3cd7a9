use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::ResourceRequirements;
use kube::{
    api::ObjectMeta,
    CustomResource, Resource, ResourceExt,
};
use schemars::{
    JsonSchema,
    r#gen::SchemaGenerator,
    schema::{InstanceType, Schema, SchemaObject},
};
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;

use crate::conditions::{ConditionHistory, InterconnectCondition, Phase};

pub static LABEL_APP_KEY: &str = "application";
pub static LABEL_RESOURCE_KEY: &str = "interconnect_cr";
pub static DEFAULT_SSL_PROFILE: &str = "default";
pub static CONTAINER_CONFIG_DIR: &str = "/etc/qpid-dispatch/";
pub static CONFIG_TEMPLATE_KEY: &str = "qdrouterd.conf.template";
pub static CONTAINER_CERTS_DIR: &str = "/etc/qpid-dispatch-certs";
pub const DEFAULT_LIVENESS_PORT: i32 = 8888;
pub const AMQP_PORT: i32 = 5672;
pub const AMQPS_PORT: i32 = 5671;
pub const INTER_ROUTER_PORT: i32 = 55672;
pub const INTER_ROUTER_TLS_PORT: i32 = 55671;
pub const EDGE_PORT: i32 = 45672;

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
#[kube(
    group = "interconnectedcloud.github.io",
    version = "v1alpha1",
    kind = "Interconnect",
    derive = "Default",
    derive = "PartialEq",
    namespaced,
    shortname = "ic",
    doc = "Interconnect declares a cluster of AMQP message routers",
    printcolumn = r#"{"name":"Role","jsonPath":".spec.deploymentPlan.role","type":"string"}"#,
    printcolumn = r#"{"name":"Size","jsonPath":".spec.deploymentPlan.size","type":"integer"}"#,
    printcolumn = r#"{"name":"Phase","jsonPath":".status.phase","type":"string"}"#,
    status = "InterconnectStatus"
)]
pub struct InterconnectSpec {
    #[serde(default)]
    pub deployment_plan: DeploymentPlan,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub listeners: Vec<Listener>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inter_router_listeners: Vec<Listener>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub edge_listeners: Vec<Listener>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ssl_profiles: Vec<SslProfile>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub addresses: Vec<Address>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub auto_links: Vec<AutoLink>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub link_routes: Vec<LinkRoute>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub connectors: Vec<Connector>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inter_router_connectors: Vec<Connector>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub edge_connectors: Vec<Connector>,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema)]
pub enum RouterRole {
    #[serde(rename = "interior")]
    Interior,
    #[serde(rename = "edge")]
    Edge,
}

impl RouterRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            RouterRole::Interior => "interior",
            RouterRole::Edge => "edge",
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema)]
pub enum Placement {
    Any,
    Every,
    AntiAffinity,
    Node,
}

#[skip_serializing_none]
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentPlan {
    pub image: Option<String>,
    #[serde(default)]
    pub size: i32,
    pub role: Option<RouterRole>,
    pub placement: Option<Placement>,
    #[serde(default)]
    #[schemars(schema_with = "raw_object_schema")]
    pub resources: Option<ResourceRequirements>,
    /// Name of a secret holding an externally supplied CA
    pub issuer: Option<String>,
    #[serde(default)]
    pub liveness_port: i32,
}

impl DeploymentPlan {
    pub fn role(&self) -> RouterRole {
        self.role.unwrap_or(RouterRole::Interior)
    }

    pub fn placement(&self) -> Placement {
        self.placement.unwrap_or(Placement::Any)
    }

    pub fn issuer(&self) -> Option<&str> {
        non_empty(&self.issuer)
    }
}

#[skip_serializing_none]
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Listener {
    pub name: Option<String>,
    pub host: Option<String>,
    #[serde(default)]
    pub port: i32,
    #[serde(default, skip_serializing_if = "is_false")]
    pub route_container: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub http: bool,
    pub cost: Option<i32>,
    pub ssl_profile: Option<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub expose: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub authenticate_peer: bool,
    pub sasl_mechanisms: Option<String>,
}

impl Listener {
    pub fn on_port(port: i32) -> Self {
        Listener {
            port,
            ..Listener::default()
        }
    }

    pub fn with_ssl_profile(port: i32, profile: &str) -> Self {
        Listener {
            port,
            ssl_profile: Some(profile.to_string()),
            ..Listener::default()
        }
    }

    /// Join key shared by container ports, service ports and exposure objects
    pub fn target_name(&self) -> String {
        port_name(&self.name, self.port)
    }

    pub fn ssl_profile(&self) -> Option<&str> {
        non_empty(&self.ssl_profile)
    }
}

#[skip_serializing_none]
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Connector {
    pub name: Option<String>,
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub port: i32,
    #[serde(default, skip_serializing_if = "is_false")]
    pub route_container: bool,
    pub cost: Option<i32>,
    pub ssl_profile: Option<String>,
    pub verify_hostname: Option<bool>,
}

impl Connector {
    pub fn target_name(&self) -> String {
        port_name(&self.name, self.port)
    }
}

#[skip_serializing_none]
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SslProfile {
    pub name: String,
    /// Secret holding tls.crt and tls.key
    pub credentials: Option<String>,
    /// Secret holding the CA used to verify peers
    pub ca_cert: Option<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub require_client_certs: bool,
    pub ciphers: Option<String>,
    pub protocols: Option<String>,
}

impl SslProfile {
    pub fn named(name: &str) -> Self {
        SslProfile {
            name: name.to_string(),
            ..SslProfile::default()
        }
    }

    pub fn credentials(&self) -> Option<&str> {
        non_empty(&self.credentials)
    }

    pub fn ca_cert(&self) -> Option<&str> {
        non_empty(&self.ca_cert)
    }

    pub fn needs_credentials(&self) -> bool {
        self.credentials().is_none()
    }

    pub fn needs_ca_cert(&self) -> bool {
        self.require_client_certs && self.ca_cert().is_none()
    }

    /// Secrets to mount for this profile, deduplicated when the CA lives in the leaf secret
    pub fn secrets(&self) -> Vec<&str> {
        let mut secrets: Vec<&str> = self.credentials().into_iter().collect();
        if let Some(ca) = self.ca_cert() {
            if Some(ca) != self.credentials() {
                secrets.push(ca);
            }
        }
        secrets
    }
}

#[skip_serializing_none]
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Address {
    pub prefix: Option<String>,
    pub pattern: Option<String>,
    pub distribution: Option<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub waypoint: bool,
    pub ingress_phase: Option<i32>,
    pub egress_phase: Option<i32>,
    pub priority: Option<i32>,
}

#[skip_serializing_none]
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AutoLink {
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub direction: String,
    pub container_id: Option<String>,
    pub connection: Option<String>,
    pub external_prefix: Option<String>,
    pub phase: Option<i32>,
}

#[skip_serializing_none]
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LinkRoute {
    pub prefix: Option<String>,
    pub pattern: Option<String>,
    pub direction: Option<String>,
    pub container_id: Option<String>,
    pub connection: Option<String>,
    pub add_external_prefix: Option<String>,
    pub remove_external_prefix: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct InterconnectStatus {
    #[serde(default)]
    pub phase: Phase,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub rev_number: String,
    #[serde(default, rename = "pods")]
    pub pod_names: Vec<String>,
    #[serde(default)]
    pub conditions: Vec<InterconnectCondition>,
}

impl ConditionHistory for InterconnectStatus {
    fn conditions(&self) -> &Vec<InterconnectCondition> {
        &self.conditions
    }
    fn conditions_mut(&mut self) -> &mut Vec<InterconnectCondition> {
        &mut self.conditions
    }
}

impl Interconnect {
    /// Label pair carried by every derived resource and used to select the router pods
    pub fn selector_labels(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            (LABEL_APP_KEY.to_string(), self.name_any()),
            (LABEL_RESOURCE_KEY.to_string(), self.name_any()),
        ])
    }

    pub fn label_selector(&self) -> String {
        format!(
            "{LABEL_APP_KEY}={},{LABEL_RESOURCE_KEY}={}",
            self.name_any(),
            self.name_any()
        )
    }

    /// Metadata for a derived resource: labels, namespace and the owner edge back to this CR
    pub fn owned_meta(&self, name: &str) -> ObjectMeta {
        ObjectMeta {
            name: Some(name.to_string()),
            namespace: self.namespace(),
            labels: Some(self.selector_labels()),
            owner_references: self.controller_owner_ref(&()).map(|o| vec![o]),
            ..ObjectMeta::default()
        }
    }

    pub fn service_host(&self) -> String {
        format!(
            "{}.{}.svc.cluster.local",
            self.name_any(),
            self.namespace().unwrap_or_default()
        )
    }

    pub fn all_listeners(&self) -> impl Iterator<Item = &Listener> {
        self.spec
            .listeners
            .iter()
            .chain(self.spec.inter_router_listeners.iter())
            .chain(self.spec.edge_listeners.iter())
    }

    pub fn exposed_listeners(&self) -> impl Iterator<Item = &Listener> {
        self.all_listeners().filter(|l| l.expose)
    }

    pub fn exposure_name(&self, listener: &Listener) -> String {
        format!("{}-{}", self.name_any(), listener.target_name())
    }

    pub fn status_or_default(&self) -> InterconnectStatus {
        self.status.clone().unwrap_or_default()
    }
}

/// Directory a profile's secret is mounted at; the rendered config points into it
pub fn cert_mount_path(profile: &str, secret: &str) -> String {
    format!("{CONTAINER_CERTS_DIR}/{profile}/{secret}")
}

pub fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|s| !s.is_empty())
}

fn port_name(name: &Option<String>, port: i32) -> String {
    match non_empty(name) {
        Some(name) => name.to_string(),
        None => format!("port-{port}"),
    }
}

fn raw_object_schema(_: &mut SchemaGenerator) -> Schema {
    Schema::Object(SchemaObject {
        instance_type: Some(InstanceType::Object.into()),
        extensions: [(
            "x-kubernetes-preserve-unknown-fields".to_string(),
            serde_json::Value::Bool(true),
        )]
        .into_iter()
        .collect(),
        ..SchemaObject::default()
    })
}

fn is_false(value: &bool) -> bool {
    !*value
}
