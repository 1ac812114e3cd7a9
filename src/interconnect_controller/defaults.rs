use super::types::*;

/// Outcome of filling defaults into a spec
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Normalized {
    /// TLS material must be issued for at least one profile
    pub request_cert: bool,
    /// The spec was modified and should be persisted
    pub changed: bool,
}

/// Fill structural defaults into `spec` in place.
///
/// `cert_manager` is whether certificates can be issued in this cluster; it
/// decides the default TLS listeners and gates the returned `request_cert`.
/// Calling this again on its own output changes nothing.
pub fn normalize(spec: &mut InterconnectSpec, cert_manager: bool) -> Normalized {
    let mut request_cert = false;
    let mut changed = false;

    let plan = &mut spec.deployment_plan;
    if plan.size == 0 {
        plan.size = 1;
        changed = true;
    }
    if plan.role.is_none() {
        plan.role = Some(RouterRole::Interior);
        changed = true;
    }
    if plan.placement.is_none() {
        plan.placement = Some(Placement::Any);
        changed = true;
    }
    if plan.liveness_port == 0 {
        plan.liveness_port = DEFAULT_LIVENESS_PORT;
        changed = true;
    }
    let liveness_port = plan.liveness_port;
    let role = plan.role();

    if spec.listeners.is_empty() {
        spec.listeners.push(Listener::on_port(AMQP_PORT));
        spec.listeners.push(Listener {
            http: true,
            ..Listener::on_port(liveness_port)
        });
        if cert_manager {
            spec.listeners
                .push(Listener::with_ssl_profile(AMQPS_PORT, DEFAULT_SSL_PROFILE));
        }
        changed = true;
    }

    if role == RouterRole::Interior {
        if spec.inter_router_listeners.is_empty() {
            let listener = if cert_manager {
                Listener::with_ssl_profile(INTER_ROUTER_TLS_PORT, DEFAULT_SSL_PROFILE)
            } else {
                Listener::on_port(INTER_ROUTER_PORT)
            };
            spec.inter_router_listeners.push(listener);
            changed = true;
        }
        if spec.edge_listeners.is_empty() {
            spec.edge_listeners.push(Listener::on_port(EDGE_PORT));
            changed = true;
        }
    }

    let uses_default_profile = spec
        .listeners
        .iter()
        .chain(spec.inter_router_listeners.iter())
        .any(|l| l.ssl_profile() == Some(DEFAULT_SSL_PROFILE));
    let has_default_profile = spec
        .ssl_profiles
        .iter()
        .any(|p| p.name == DEFAULT_SSL_PROFILE);
    if uses_default_profile && !has_default_profile {
        spec.ssl_profiles.push(SslProfile::named(DEFAULT_SSL_PROFILE));
        request_cert = true;
        changed = true;
    }

    if spec
        .ssl_profiles
        .iter()
        .any(|p| p.needs_credentials() || p.needs_ca_cert())
    {
        request_cert = true;
    }

    Normalized {
        request_cert: request_cert && cert_manager,
        changed,
    }
}

/// Profiles whose TLS material can never be produced without certificate issuance
pub fn unsatisfiable_profiles(spec: &InterconnectSpec) -> Vec<&str> {
    spec.ssl_profiles
        .iter()
        .filter(|p| p.needs_credentials() || p.needs_ca_cert())
        .map(|p| p.name.as_str())
        .collect()
}
