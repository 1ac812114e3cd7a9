use k8s_openapi::api::networking::v1::{
    HTTPIngressPath, HTTPIngressRuleValue, Ingress, IngressBackend, IngressRule,
    IngressServiceBackend, IngressSpec, ServiceBackendPort,
};
use kube::ResourceExt;

use super::{
    route::{Route, RoutePort, RouteSpec, RouteTarget, RouteTls},
    types::{Interconnect, Listener},
};

impl Interconnect {
    /// Passthrough route: TLS terminates at the router, not at the edge
    pub fn create_owned_route(&self, listener: &Listener) -> Route {
        Route {
            metadata: self.owned_meta(&self.exposure_name(listener)),
            spec: RouteSpec {
                host: None,
                port: Some(RoutePort {
                    target_port: listener.target_name(),
                }),
                tls: Some(RouteTls {
                    termination: "passthrough".to_string(),
                    insecure_edge_termination_policy: Some("None".to_string()),
                }),
                to: RouteTarget {
                    kind: "Service".to_string(),
                    name: self.name_any(),
                },
            },
        }
    }

    pub fn create_owned_ingress(&self, listener: &Listener) -> Ingress {
        let name = self.exposure_name(listener);
        Ingress {
            spec: Some(IngressSpec {
                rules: Some(vec![IngressRule {
                    host: Some(format!("{}.{}", name, self.namespace().unwrap_or_default())),
                    http: Some(HTTPIngressRuleValue {
                        paths: vec![HTTPIngressPath {
                            path: Some("/".to_string()),
                            path_type: "Prefix".to_string(),
                            backend: IngressBackend {
                                service: Some(IngressServiceBackend {
                                    name: self.name_any(),
                                    port: Some(ServiceBackendPort {
                                        name: Some(listener.target_name()),
                                        number: None,
                                    }),
                                }),
                                ..IngressBackend::default()
                            },
                        }],
                    }),
                }]),
                ..IngressSpec::default()
            }),
            metadata: self.owned_meta(&name),
            ..Ingress::default()
        }
    }

    /// Host names clients use to reach the exposed listeners served with `profile`
    pub fn exposed_hosts(&self, profile: &str) -> Vec<String> {
        let ns = self.namespace().unwrap_or_default();
        self.exposed_listeners()
            .filter(|l| l.ssl_profile() == Some(profile))
            .map(|l| format!("{}.{}", self.exposure_name(l), ns))
            .collect()
    }
}

pub fn route_needs_update(current: &Route, desired: &Route) -> bool {
    current.spec.port != desired.spec.port
        || current.spec.tls != desired.spec.tls
        || current.spec.to != desired.spec.to
}

/// The route host is assigned by the router when left empty, so it is kept
pub fn update_route(current: &mut Route, desired: &Route) {
    current.spec.port = desired.spec.port.clone();
    current.spec.tls = desired.spec.tls.clone();
    current.spec.to = desired.spec.to.clone();
}

fn rules(ingress: &Ingress) -> Option<&Vec<IngressRule>> {
    ingress.spec.as_ref().and_then(|s| s.rules.as_ref())
}

pub fn ingress_needs_update(current: &Ingress, desired: &Ingress) -> bool {
    rules(current) != rules(desired)
}

pub fn update_ingress(current: &mut Ingress, desired: &Ingress) {
    let spec = current.spec.get_or_insert_with(IngressSpec::default);
    spec.rules = rules(desired).cloned();
}
