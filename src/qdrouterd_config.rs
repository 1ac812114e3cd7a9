//! Rendering of the qdrouterd configuration file.
//!
//! The router reads this text at startup (after substituting `${HOSTNAME}`),
//! so the layout is a compatibility contract: sections always appear in the
//! same order separated by a blank line, even when empty.

use std::fmt::Display;

use crate::interconnect_controller::types::{
    cert_mount_path, non_empty, Address, AutoLink, Connector, InterconnectSpec, LinkRoute,
    Listener, SslProfile,
};

const INDENT: &str = "    ";
const SSL_PROFILE_INDENT: &str = "   ";

/// A single `stanza { key: value ... }` block
struct Stanza {
    text: String,
    indent: &'static str,
}

impl Stanza {
    fn new(kind: &str) -> Self {
        Self::with_indent(kind, INDENT)
    }

    fn with_indent(kind: &str, indent: &'static str) -> Self {
        Stanza {
            text: format!("\n{kind} {{"),
            indent,
        }
    }

    fn attr(mut self, key: &str, value: impl Display) -> Self {
        self.text
            .push_str(&format!("\n{}{key}: {value}", self.indent));
        self
    }

    fn text(self, key: &str, value: &Option<String>) -> Self {
        match non_empty(value) {
            Some(v) => self.attr(key, v),
            None => self,
        }
    }

    fn port(self, key: &str, value: i32) -> Self {
        if value != 0 { self.attr(key, value) } else { self }
    }

    fn number(self, key: &str, value: Option<i32>) -> Self {
        match value {
            Some(v) => self.attr(key, v),
            None => self,
        }
    }

    fn flag(self, key: &str, value: bool) -> Self {
        if value { self.attr(key, true) } else { self }
    }

    /// Hostname verification is the router default; only an explicit opt-out is written
    fn verify_hostname(self, value: Option<bool>) -> Self {
        match value {
            Some(false) => self.attr("verifyHostname", false),
            _ => self,
        }
    }

    fn finish(mut self) -> String {
        self.text.push_str("\n}");
        self.text
    }
}

fn route_role(route_container: bool) -> &'static str {
    if route_container {
        "route-container"
    } else {
        "normal"
    }
}

fn listener_host(listener: &Listener) -> &str {
    non_empty(&listener.host).unwrap_or("0.0.0.0")
}

fn listener(l: &Listener) -> String {
    Stanza::new("listener")
        .text("name", &l.name)
        .attr("host", listener_host(l))
        .port("port", l.port)
        .attr("role", route_role(l.route_container))
        .flag("http", l.http)
        .flag("authenticatePeer", l.authenticate_peer)
        .text("saslMechanisms", &l.sasl_mechanisms)
        .text("sslProfile", &l.ssl_profile)
        .finish()
}

fn router_listener(l: &Listener, role: &str) -> String {
    Stanza::new("listener")
        .text("name", &l.name)
        .attr("role", role)
        .attr("host", listener_host(l))
        .port("port", l.port)
        .number("cost", l.cost)
        .text("saslMechanisms", &l.sasl_mechanisms)
        .flag("authenticatePeer", l.authenticate_peer)
        .text("sslProfile", &l.ssl_profile)
        .finish()
}

fn ssl_profile(p: &SslProfile) -> String {
    let mut stanza = Stanza::with_indent("sslProfile", SSL_PROFILE_INDENT).attr("name", &p.name);
    if let Some(credentials) = p.credentials() {
        let dir = cert_mount_path(&p.name, credentials);
        stanza = stanza
            .attr("certFile", format!("{dir}/tls.crt"))
            .attr("privateKeyFile", format!("{dir}/tls.key"));
    }
    if let Some(ca) = p.ca_cert() {
        let dir = cert_mount_path(&p.name, ca);
        // A CA kept alongside the leaf is published as ca.crt
        let file = if Some(ca) == p.credentials() {
            "ca.crt"
        } else {
            "tls.crt"
        };
        stanza = stanza.attr("caCertFile", format!("{dir}/{file}"));
    }
    stanza
        .text("ciphers", &p.ciphers)
        .text("protocols", &p.protocols)
        .finish()
}

fn address(a: &Address) -> String {
    Stanza::new("address")
        .text("prefix", &a.prefix)
        .text("pattern", &a.pattern)
        .text("distribution", &a.distribution)
        .flag("waypoint", a.waypoint)
        .number("ingressPhase", a.ingress_phase)
        .number("egressPhase", a.egress_phase)
        .number("priority", a.priority)
        .finish()
}

/// Emits the lowercase `phase` attribute named in the qdrouterd autoLink schema,
/// not the capitalised `Phase` key older operator templates wrote.
fn auto_link(a: &AutoLink) -> String {
    let mut stanza = Stanza::new("autoLink");
    if !a.address.is_empty() {
        stanza = stanza.attr("addr", &a.address);
    }
    if !a.direction.is_empty() {
        stanza = stanza.attr("direction", &a.direction);
    }
    stanza
        .text("containerId", &a.container_id)
        .text("connection", &a.connection)
        .text("externalPrefix", &a.external_prefix)
        .number("phase", a.phase)
        .finish()
}

fn link_route(r: &LinkRoute) -> String {
    Stanza::new("linkRoute")
        .text("prefix", &r.prefix)
        .text("pattern", &r.pattern)
        .text("direction", &r.direction)
        .text("connection", &r.connection)
        .text("containerId", &r.container_id)
        .text("addExternalPrefix", &r.add_external_prefix)
        .text("removeExternalPrefix", &r.remove_external_prefix)
        .finish()
}

fn connector_host(stanza: Stanza, c: &Connector) -> Stanza {
    if c.host.is_empty() {
        stanza
    } else {
        stanza.attr("host", &c.host)
    }
}

fn connector(c: &Connector) -> String {
    let stanza = Stanza::new("connector").text("name", &c.name);
    connector_host(stanza, c)
        .port("port", c.port)
        .attr("role", route_role(c.route_container))
        .number("cost", c.cost)
        .text("sslProfile", &c.ssl_profile)
        .verify_hostname(c.verify_hostname)
        .finish()
}

fn router_connector(c: &Connector, role: &str) -> String {
    let stanza = Stanza::new("connector").text("name", &c.name).attr("role", role);
    connector_host(stanza, c)
        .port("port", c.port)
        .number("cost", c.cost)
        .text("sslProfile", &c.ssl_profile)
        .verify_hostname(c.verify_hostname)
        .finish()
}

fn section<T>(items: &[T], block: impl Fn(&T) -> String) -> String {
    items.iter().map(block).collect()
}

/// Render the configuration for a normalized spec.
///
/// Values pass through verbatim; nothing here validates the routing topology.
pub fn render(spec: &InterconnectSpec) -> String {
    let sections = [
        section(&spec.listeners, listener),
        section(&spec.inter_router_listeners, |l| {
            router_listener(l, "inter-router")
        }),
        section(&spec.edge_listeners, |l| router_listener(l, "edge")),
        section(&spec.ssl_profiles, ssl_profile),
        section(&spec.addresses, address),
        section(&spec.auto_links, auto_link),
        section(&spec.link_routes, link_route),
        section(&spec.connectors, connector),
        section(&spec.inter_router_connectors, |c| {
            router_connector(c, "inter-router")
        }),
        section(&spec.edge_connectors, |c| router_connector(c, "edge")),
    ];

    let mut config = format!(
        "\nrouter {{\n{INDENT}mode: {}\n{INDENT}id: ${{HOSTNAME}}\n}}\n",
        spec.deployment_plan.role().as_str()
    );
    config.push_str(&sections.join("\n"));
    config
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interconnect_controller::{defaults::normalize, types::*};

    const EMPTY_TAIL: &str = "\n\n\n\n\n\n\n";

    #[test]
    fn default_interior_config() {
        let mut spec = InterconnectSpec::default();
        normalize(&mut spec, false);
        let expected = String::from("\nrouter {\n    mode: interior\n    id: ${HOSTNAME}\n}\n")
            + "\nlistener {\n    host: 0.0.0.0\n    port: 5672\n    role: normal\n}"
            + "\nlistener {\n    host: 0.0.0.0\n    port: 8888\n    role: normal\n    http: true\n}"
            + "\n"
            + "\nlistener {\n    role: inter-router\n    host: 0.0.0.0\n    port: 55672\n}"
            + "\n"
            + "\nlistener {\n    role: edge\n    host: 0.0.0.0\n    port: 45672\n}"
            + EMPTY_TAIL;
        assert_eq!(render(&spec), expected);
    }

    #[test]
    fn empty_edge_spec_keeps_every_separator() {
        let spec = InterconnectSpec {
            deployment_plan: DeploymentPlan {
                role: Some(RouterRole::Edge),
                ..DeploymentPlan::default()
            },
            ..InterconnectSpec::default()
        };
        assert_eq!(
            render(&spec),
            "\nrouter {\n    mode: edge\n    id: ${HOSTNAME}\n}\n\n\n\n\n\n\n\n\n\n"
        );
    }

    #[test]
    fn ssl_profile_paths() {
        let shared = SslProfile {
            credentials: Some("ic-default-tls".into()),
            ca_cert: Some("ic-default-tls".into()),
            ciphers: Some("HIGH".into()),
            ..SslProfile::named("default")
        };
        assert_eq!(
            ssl_profile(&shared),
            "\nsslProfile {\n   name: default\
             \n   certFile: /etc/qpid-dispatch-certs/default/ic-default-tls/tls.crt\
             \n   privateKeyFile: /etc/qpid-dispatch-certs/default/ic-default-tls/tls.key\
             \n   caCertFile: /etc/qpid-dispatch-certs/default/ic-default-tls/ca.crt\
             \n   ciphers: HIGH\n}"
        );

        let split = SslProfile {
            ca_cert: Some("ic-mutual-ca".into()),
            ..SslProfile::named("mutual")
        };
        assert_eq!(
            ssl_profile(&split),
            "\nsslProfile {\n   name: mutual\
             \n   caCertFile: /etc/qpid-dispatch-certs/mutual/ic-mutual-ca/tls.crt\n}"
        );
    }

    #[test]
    fn connector_fields() {
        let c = Connector {
            name: Some("broker".into()),
            host: "broker.svc".into(),
            port: 5672,
            route_container: true,
            cost: Some(2),
            verify_hostname: Some(false),
            ..Connector::default()
        };
        assert_eq!(
            connector(&c),
            "\nconnector {\n    name: broker\n    host: broker.svc\n    port: 5672\
             \n    role: route-container\n    cost: 2\n    verifyHostname: false\n}"
        );

        let irc = Connector {
            host: "peer".into(),
            port: 55671,
            ssl_profile: Some("default".into()),
            verify_hostname: Some(true),
            ..Connector::default()
        };
        assert_eq!(
            router_connector(&irc, "inter-router"),
            "\nconnector {\n    role: inter-router\n    host: peer\n    port: 55671\
             \n    sslProfile: default\n}"
        );
    }

    #[test]
    fn routing_stanzas() {
        let a = Address {
            prefix: Some("queue".into()),
            distribution: Some("balanced".into()),
            waypoint: true,
            ingress_phase: Some(0),
            ..Address::default()
        };
        assert_eq!(
            address(&a),
            "\naddress {\n    prefix: queue\n    distribution: balanced\n    waypoint: true\
             \n    ingressPhase: 0\n}"
        );

        let link = AutoLink {
            address: "queue.a".into(),
            direction: "in".into(),
            connection: Some("broker".into()),
            phase: Some(1),
            ..AutoLink::default()
        };
        // qdrouterd only knows the lowercase `phase` attribute
        assert_eq!(
            auto_link(&link),
            "\nautoLink {\n    addr: queue.a\n    direction: in\n    connection: broker\
             \n    phase: 1\n}"
        );

        let route = LinkRoute {
            prefix: Some("topic".into()),
            direction: Some("out".into()),
            container_id: Some("c1".into()),
            ..LinkRoute::default()
        };
        assert_eq!(
            link_route(&route),
            "\nlinkRoute {\n    prefix: topic\n    direction: out\n    containerId: c1\n}"
        );
    }

    #[test]
    fn listener_order_changes_output() {
        let a = Listener::on_port(1000);
        let b = Listener {
            host: Some("127.0.0.1".into()),
            authenticate_peer: true,
            sasl_mechanisms: Some("PLAIN".into()),
            ..Listener::on_port(2000)
        };
        let forward = InterconnectSpec {
            listeners: vec![a.clone(), b.clone()],
            ..InterconnectSpec::default()
        };
        let reversed = InterconnectSpec {
            listeners: vec![b, a],
            ..InterconnectSpec::default()
        };
        assert_ne!(render(&forward), render(&reversed));
        assert_eq!(render(&forward), render(&forward.clone()));
        assert!(render(&forward).contains(
            "\nlistener {\n    host: 127.0.0.1\n    port: 2000\n    role: normal\
             \n    authenticatePeer: true\n    saslMechanisms: PLAIN\n}"
        ));
    }
}
