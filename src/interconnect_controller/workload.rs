use k8s_openapi::{
    api::{
        apps::v1::{DaemonSet, DaemonSetSpec, Deployment, DeploymentSpec},
        core::v1::{
            Affinity, ConfigMapVolumeSource, Container, ContainerPort, EnvVar, EnvVarSource,
            HTTPGetAction, ObjectFieldSelector, PodAffinityTerm, PodAntiAffinity, PodSpec,
            PodTemplateSpec, Probe, SecretVolumeSource, Volume, VolumeMount,
        },
    },
    apimachinery::pkg::{
        apis::meta::v1::{LabelSelector, LabelSelectorRequirement, ObjectMeta},
        util::intstr::IntOrString,
    },
};
use kube::ResourceExt;

use super::types::*;

pub static DEFAULT_ROUTER_IMAGE: &str = "quay.io/interconnectedcloud/qdrouterd:1.8.0";
pub static TOPOLOGY_KEY: &str = "kubernetes.io/hostname";

impl Interconnect {
    pub fn router_image(&self, default_image: &str) -> String {
        non_empty(&self.spec.deployment_plan.image)
            .unwrap_or(default_image)
            .to_string()
    }

    /// The single qdrouterd container run by every router pod
    pub fn router_container(&self, default_image: &str) -> Container {
        let plan = &self.spec.deployment_plan;
        Container {
            name: self.name_any(),
            image: Some(self.router_image(default_image)),
            env: Some(vec![
                EnvVar {
                    name: "APPLICATION_NAME".to_string(),
                    value: Some(self.name_any()),
                    ..EnvVar::default()
                },
                EnvVar {
                    name: "QDROUTERD_CONF".to_string(),
                    value: Some(format!("{CONTAINER_CONFIG_DIR}{CONFIG_TEMPLATE_KEY}")),
                    ..EnvVar::default()
                },
                EnvVar {
                    name: "QDROUTERD_AUTO_MESH_DISCOVERY".to_string(),
                    value: Some("QUERY".to_string()),
                    ..EnvVar::default()
                },
                EnvVar {
                    name: "POD_COUNT".to_string(),
                    value: Some(plan.size.to_string()),
                    ..EnvVar::default()
                },
                field_ref_env("POD_NAMESPACE", "metadata.namespace"),
                field_ref_env("POD_IP", "status.podIP"),
            ]),
            liveness_probe: Some(Probe {
                initial_delay_seconds: Some(60),
                http_get: Some(HTTPGetAction {
                    port: IntOrString::Int(plan.liveness_port),
                    ..HTTPGetAction::default()
                }),
                ..Probe::default()
            }),
            ports: Some(self.container_ports()),
            resources: plan.resources.clone(),
            volume_mounts: Some(self.router_volume_mounts()),
            ..Container::default()
        }
    }

    fn container_ports(&self) -> Vec<ContainerPort> {
        self.all_listeners()
            .map(|l| ContainerPort {
                name: Some(l.target_name()),
                container_port: l.port,
                protocol: Some("TCP".to_string()),
                ..ContainerPort::default()
            })
            .collect()
    }

    fn router_volume_mounts(&self) -> Vec<VolumeMount> {
        let mut mounts = vec![VolumeMount {
            name: self.name_any(),
            mount_path: CONTAINER_CONFIG_DIR.to_string(),
            ..VolumeMount::default()
        }];
        for profile in &self.spec.ssl_profiles {
            for secret in profile.secrets() {
                mounts.push(VolumeMount {
                    name: secret.to_string(),
                    mount_path: cert_mount_path(&profile.name, secret),
                    ..VolumeMount::default()
                });
            }
        }
        mounts
    }

    fn router_volumes(&self) -> Vec<Volume> {
        let mut volumes = vec![Volume {
            name: self.name_any(),
            config_map: Some(ConfigMapVolumeSource {
                name: self.name_any(),
                ..ConfigMapVolumeSource::default()
            }),
            ..Volume::default()
        }];
        for profile in &self.spec.ssl_profiles {
            for secret in profile.secrets() {
                // Profiles may share a secret; a pod cannot declare a volume twice
                if volumes.iter().any(|v| v.name == secret) {
                    continue;
                }
                volumes.push(Volume {
                    name: secret.to_string(),
                    secret: Some(SecretVolumeSource {
                        secret_name: Some(secret.to_string()),
                        ..SecretVolumeSource::default()
                    }),
                    ..Volume::default()
                });
            }
        }
        volumes
    }

    fn router_affinity(&self) -> Option<Affinity> {
        if self.spec.deployment_plan.placement() != Placement::AntiAffinity {
            return None;
        }
        Some(Affinity {
            pod_anti_affinity: Some(PodAntiAffinity {
                required_during_scheduling_ignored_during_execution: Some(vec![PodAffinityTerm {
                    label_selector: Some(LabelSelector {
                        match_expressions: Some(vec![LabelSelectorRequirement {
                            key: LABEL_APP_KEY.to_string(),
                            operator: "In".to_string(),
                            values: Some(vec![self.name_any()]),
                        }]),
                        ..LabelSelector::default()
                    }),
                    topology_key: TOPOLOGY_KEY.to_string(),
                    ..PodAffinityTerm::default()
                }]),
                ..PodAntiAffinity::default()
            }),
            ..Affinity::default()
        })
    }

    fn router_pod_template(&self, default_image: &str) -> PodTemplateSpec {
        PodTemplateSpec {
            metadata: Some(ObjectMeta {
                labels: Some(self.selector_labels()),
                ..ObjectMeta::default()
            }),
            spec: Some(PodSpec {
                service_account_name: Some(self.name_any()),
                affinity: self.router_affinity(),
                containers: vec![self.router_container(default_image)],
                volumes: Some(self.router_volumes()),
                ..PodSpec::default()
            }),
        }
    }

    /// Whether this cluster runs one router per node rather than a sized Deployment
    pub fn runs_as_daemonset(&self) -> bool {
        self.spec.deployment_plan.placement() == Placement::Every
    }

    pub fn create_owned_deployment(&self, default_image: &str) -> Deployment {
        Deployment {
            metadata: self.owned_meta(&self.name_any()),
            spec: Some(DeploymentSpec {
                replicas: Some(self.spec.deployment_plan.size),
                selector: LabelSelector {
                    match_labels: Some(self.selector_labels()),
                    ..LabelSelector::default()
                },
                template: self.router_pod_template(default_image),
                ..DeploymentSpec::default()
            }),
            ..Deployment::default()
        }
    }

    pub fn create_owned_daemonset(&self, default_image: &str) -> DaemonSet {
        DaemonSet {
            metadata: self.owned_meta(&self.name_any()),
            spec: Some(DaemonSetSpec {
                selector: LabelSelector {
                    match_labels: Some(self.selector_labels()),
                    ..LabelSelector::default()
                },
                template: self.router_pod_template(default_image),
                ..DaemonSetSpec::default()
            }),
            ..DaemonSet::default()
        }
    }
}

fn field_ref_env(name: &str, field_path: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value_from: Some(EnvVarSource {
            field_ref: Some(ObjectFieldSelector {
                api_version: Some("v1".to_string()),
                field_path: field_path.to_string(),
            }),
            ..EnvVarSource::default()
        }),
        ..EnvVar::default()
    }
}

fn pod_spec(template: &PodTemplateSpec) -> Option<&PodSpec> {
    template.spec.as_ref()
}

/// Volumes reduced to the fields this controller sets
fn volume_sources(spec: Option<&PodSpec>) -> Vec<(String, Option<String>, Option<String>)> {
    spec.and_then(|s| s.volumes.as_ref())
        .map(|volumes| {
            volumes
                .iter()
                .map(|v| {
                    (
                        v.name.clone(),
                        v.config_map.as_ref().map(|c| c.name.clone()),
                        v.secret.as_ref().and_then(|s| s.secret_name.clone()),
                    )
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Compare the router container and volumes of two pod templates.
///
/// Only fields set by the builders take part; server-side defaults are ignored.
pub fn template_differs(current: &PodTemplateSpec, desired: &PodTemplateSpec) -> bool {
    let (current_spec, desired_spec) = (pod_spec(current), pod_spec(desired));
    let current_container = current_spec.and_then(|s| match s.containers.as_slice() {
        [only] => Some(only),
        _ => None,
    });
    let Some(desired_container) = desired_spec.and_then(|s| s.containers.first()) else {
        return false;
    };
    let Some(current_container) = current_container else {
        return true;
    };
    current_container.image != desired_container.image
        || current_container.env != desired_container.env
        || current_container.ports != desired_container.ports
        || current_container.volume_mounts != desired_container.volume_mounts
        || volume_sources(current_spec) != volume_sources(desired_spec)
}

/// Replace the router container and volumes, keeping everything else on the live template
pub fn update_template(current: &mut PodTemplateSpec, desired: &PodTemplateSpec) {
    let Some(desired_spec) = desired.spec.as_ref() else {
        return;
    };
    let spec = current.spec.get_or_insert_with(PodSpec::default);
    spec.containers = desired_spec.containers.clone();
    spec.volumes = desired_spec.volumes.clone();
}

pub fn template_image(template: &PodTemplateSpec) -> Option<&str> {
    pod_spec(template)
        .and_then(|s| s.containers.first())
        .and_then(|c| c.image.as_deref())
}

pub fn deployment_template(deployment: &Deployment) -> Option<&PodTemplateSpec> {
    deployment.spec.as_ref().map(|s| &s.template)
}

pub fn daemonset_template(daemonset: &DaemonSet) -> Option<&PodTemplateSpec> {
    daemonset.spec.as_ref().map(|s| &s.template)
}

pub fn deployment_needs_update(current: &Deployment, desired: &Deployment) -> bool {
    match (deployment_template(current), deployment_template(desired)) {
        (Some(c), Some(d)) => template_differs(c, d),
        (None, Some(_)) => true,
        _ => false,
    }
}

pub fn update_deployment(current: &mut Deployment, desired: &Deployment) {
    match (current.spec.as_mut(), deployment_template(desired)) {
        (Some(spec), Some(template)) => update_template(&mut spec.template, template),
        (None, _) => current.spec = desired.spec.clone(),
        _ => {}
    }
}

pub fn daemonset_needs_update(current: &DaemonSet, desired: &DaemonSet) -> bool {
    match (daemonset_template(current), daemonset_template(desired)) {
        (Some(c), Some(d)) => template_differs(c, d),
        (None, Some(_)) => true,
        _ => false,
    }
}

pub fn update_daemonset(current: &mut DaemonSet, desired: &DaemonSet) {
    match (current.spec.as_mut(), daemonset_template(desired)) {
        (Some(spec), Some(template)) => update_template(&mut spec.template, template),
        (None, _) => current.spec = desired.spec.clone(),
        _ => {}
    }
}

pub fn replicas(deployment: &Deployment) -> i32 {
    deployment
        .spec
        .as_ref()
        .and_then(|s| s.replicas)
        .unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interconnect_controller::defaults::normalize;

    fn cluster(spec: InterconnectSpec) -> Interconnect {
        let mut ic = Interconnect::new("amq", spec);
        ic.metadata.namespace = Some("msg".into());
        normalize(&mut ic.spec, false);
        ic
    }

    #[test]
    fn image_override() {
        let mut ic = cluster(InterconnectSpec::default());
        assert_eq!(ic.router_image(DEFAULT_ROUTER_IMAGE), DEFAULT_ROUTER_IMAGE);
        ic.spec.deployment_plan.image = Some("registry/qdrouterd:1.9".into());
        assert_eq!(ic.router_image(DEFAULT_ROUTER_IMAGE), "registry/qdrouterd:1.9");
    }

    #[test]
    fn shared_secret_volume_is_declared_once() {
        let ic = cluster(InterconnectSpec {
            ssl_profiles: vec![
                SslProfile {
                    credentials: Some("shared".into()),
                    ..SslProfile::named("a")
                },
                SslProfile {
                    credentials: Some("shared".into()),
                    ..SslProfile::named("b")
                },
            ],
            ..InterconnectSpec::default()
        });
        let volumes = ic.router_volumes();
        assert_eq!(volumes.len(), 2);
        assert_eq!(volumes[0].name, "amq");
        assert_eq!(volumes[1].name, "shared");
        let mounts = ic.router_volume_mounts();
        assert_eq!(mounts.len(), 3);
        assert_eq!(mounts[1].mount_path, "/etc/qpid-dispatch-certs/a/shared");
        assert_eq!(mounts[2].mount_path, "/etc/qpid-dispatch-certs/b/shared");
    }

    #[test]
    fn identical_templates_need_no_update() {
        let ic = cluster(InterconnectSpec::default());
        let desired = ic.create_owned_deployment(DEFAULT_ROUTER_IMAGE);
        let mut live = desired.clone();
        // Server-side defaults do not count as drift
        if let Some(spec) = live.spec.as_mut() {
            spec.revision_history_limit = Some(10);
            if let Some(volumes) = spec.template.spec.as_mut().and_then(|s| s.volumes.as_mut()) {
                volumes[0].config_map.as_mut().unwrap().default_mode = Some(420);
            }
        }
        assert!(!deployment_needs_update(&live, &desired));
    }

    #[test]
    fn image_change_is_drift() {
        let ic = cluster(InterconnectSpec::default());
        let live = ic.create_owned_deployment(DEFAULT_ROUTER_IMAGE);
        let desired = ic.create_owned_deployment("quay.io/interconnectedcloud/qdrouterd:1.9.0");
        assert!(deployment_needs_update(&live, &desired));

        let mut updated = live.clone();
        update_deployment(&mut updated, &desired);
        assert_eq!(
            deployment_template(&updated).and_then(template_image),
            Some("quay.io/interconnectedcloud/qdrouterd:1.9.0")
        );
        assert_eq!(replicas(&updated), 1);
    }
}
