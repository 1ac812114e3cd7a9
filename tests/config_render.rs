use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use operator::interconnect_controller::{
    normalize, Connector, DeploymentPlan, Interconnect, InterconnectSpec, RouterRole,
    CONFIG_TEMPLATE_KEY,
};
use operator::qdrouterd_config::render;

fn edge_spec() -> InterconnectSpec {
    InterconnectSpec {
        deployment_plan: DeploymentPlan {
            role: Some(RouterRole::Edge),
            ..DeploymentPlan::default()
        },
        edge_connectors: vec![Connector {
            host: "hub.msg.svc.cluster.local".into(),
            port: 45672,
            verify_hostname: Some(false),
            ..Connector::default()
        }],
        ..InterconnectSpec::default()
    }
}

#[test]
fn edge_router_connects_upstream() {
    let mut spec = edge_spec();
    normalize(&mut spec, false);
    let config = render(&spec);

    assert!(config.starts_with("\nrouter {\n    mode: edge\n    id: ${HOSTNAME}\n}\n"));
    // Edge routers accept no inter-router or edge links of their own
    assert!(!config.contains("role: inter-router"));
    assert!(!config.contains("role: edge\n    host: 0.0.0.0"));
    assert!(config.ends_with(
        "\nconnector {\n    role: edge\n    host: hub.msg.svc.cluster.local\
         \n    port: 45672\n    verifyHostname: false\n}"
    ));
}

#[test]
fn cert_manager_defaults_render_tls_listeners() {
    let mut spec = InterconnectSpec::default();
    normalize(&mut spec, true);
    spec.ssl_profiles[0].credentials = Some("amq-default-tls".into());
    let config = render(&spec);

    assert!(config.contains(
        "\nlistener {\n    host: 0.0.0.0\n    port: 5671\n    role: normal\n    sslProfile: default\n}"
    ));
    assert!(config.contains(
        "\nlistener {\n    role: inter-router\n    host: 0.0.0.0\n    port: 55671\n    sslProfile: default\n}"
    ));
    assert!(config.contains(
        "\nsslProfile {\n   name: default\
         \n   certFile: /etc/qpid-dispatch-certs/default/amq-default-tls/tls.crt\
         \n   privateKeyFile: /etc/qpid-dispatch-certs/default/amq-default-tls/tls.key\n}"
    ));
}

#[test]
fn rendering_is_deterministic() {
    let mut spec = edge_spec();
    normalize(&mut spec, true);
    assert_eq!(render(&spec), render(&spec.clone()));
}

#[test]
fn config_map_carries_the_rendered_template() {
    let mut ic = Interconnect::new("amq", InterconnectSpec::default());
    ic.metadata = ObjectMeta {
        name: Some("amq".into()),
        namespace: Some("msg".into()),
        uid: Some("dummy-uid".into()),
        ..ObjectMeta::default()
    };
    normalize(&mut ic.spec, false);

    let config_map = ic.create_owned_config_map();
    assert_eq!(config_map.metadata.name.as_deref(), Some("amq"));
    let data = config_map.data.unwrap();
    assert_eq!(data.len(), 1);
    assert_eq!(data[CONFIG_TEMPLATE_KEY], render(&ic.spec));
}
