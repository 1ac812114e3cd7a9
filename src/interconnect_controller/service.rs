use std::collections::BTreeMap;

use k8s_openapi::{
    api::core::v1::{Service, ServicePort, ServiceSpec},
    apimachinery::pkg::util::intstr::IntOrString,
};
use kube::ResourceExt;

use super::types::Interconnect;

/// Asks the OpenShift service CA to issue a serving certificate for the Service
pub static SERVING_CERT_ANNOTATION: &str = "service.alpha.openshift.io/serving-cert-secret-name";

impl Interconnect {
    pub fn create_owned_service(&self, request_cert: bool) -> Service {
        let mut metadata = self.owned_meta(&self.name_any());
        if request_cert {
            metadata.annotations = Some(BTreeMap::from([(
                SERVING_CERT_ANNOTATION.to_string(),
                format!("{}-cert", self.name_any()),
            )]));
        }
        Service {
            metadata,
            spec: Some(ServiceSpec {
                selector: Some(self.selector_labels()),
                ports: Some(self.service_ports()),
                ..ServiceSpec::default()
            }),
            ..Service::default()
        }
    }

    fn service_ports(&self) -> Vec<ServicePort> {
        self.all_listeners()
            .map(|l| ServicePort {
                name: Some(l.target_name()),
                protocol: Some("TCP".to_string()),
                port: l.port,
                target_port: Some(IntOrString::Int(l.port)),
                ..ServicePort::default()
            })
            .collect()
    }
}

fn serving_cert(service: &Service) -> Option<&String> {
    service.annotations().get(SERVING_CERT_ANNOTATION)
}

fn ports(service: &Service) -> Vec<(Option<&String>, i32, Option<&IntOrString>)> {
    service
        .spec
        .as_ref()
        .and_then(|s| s.ports.as_ref())
        .map(|ports| {
            ports
                .iter()
                .map(|p| (p.name.as_ref(), p.port, p.target_port.as_ref()))
                .collect()
        })
        .unwrap_or_default()
}

fn selector(service: &Service) -> Option<&BTreeMap<String, String>> {
    service.spec.as_ref().and_then(|s| s.selector.as_ref())
}

pub fn service_needs_update(current: &Service, desired: &Service) -> bool {
    serving_cert(current) != serving_cert(desired)
        || selector(current) != selector(desired)
        || ports(current) != ports(desired)
}

pub fn update_service(current: &mut Service, desired: &Service) {
    match serving_cert(desired) {
        Some(secret) => {
            current
                .annotations_mut()
                .insert(SERVING_CERT_ANNOTATION.to_string(), secret.clone());
        }
        None => {
            current.annotations_mut().remove(SERVING_CERT_ANNOTATION);
        }
    }
    let desired_spec = desired.spec.clone().unwrap_or_default();
    let spec = current.spec.get_or_insert_with(ServiceSpec::default);
    spec.selector = desired_spec.selector;
    spec.ports = desired_spec.ports;
}
