//! Builders for the CA chain and per-profile certificates issued through cert-manager.
//!
//! Without an external issuer the chain is: a self-signed Issuer, a CA
//! Certificate signed by it, and a CA Issuer backed by that certificate's
//! secret. Every profile certificate is signed by the CA Issuer.

use kube::ResourceExt;

use super::{
    cert_manager::{
        CaIssuer, Certificate, CertificateIssuerRef, CertificateSpec, Issuer, IssuerSpec,
        SelfSignedIssuer,
    },
    types::Interconnect,
};

/// The next piece of profile TLS material a cluster is missing
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CertStep {
    /// Leaf certificate for the named profile
    Credentials(String),
    /// CA certificate for verifying client certificates of the named profile
    CaCert(String),
}

impl Interconnect {
    pub fn self_signed_name(&self) -> String {
        format!("{}-selfsigned", self.name_any())
    }

    pub fn ca_issuer_name(&self) -> String {
        format!("{}-ca", self.name_any())
    }

    pub fn profile_credentials_name(&self, profile: &str) -> String {
        format!("{}-{profile}-tls", self.name_any())
    }

    pub fn profile_ca_name(&self, profile: &str) -> String {
        format!("{}-{profile}-ca", self.name_any())
    }

    /// Secret backing the CA issuer: the external issuer when configured, else the self-signed CA
    pub fn ca_secret_name(&self) -> String {
        match self.spec.deployment_plan.issuer() {
            Some(issuer) => issuer.to_string(),
            None => self.self_signed_name(),
        }
    }

    pub fn create_owned_self_signed_issuer(&self) -> Issuer {
        Issuer {
            metadata: self.owned_meta(&self.self_signed_name()),
            spec: IssuerSpec {
                self_signed: Some(SelfSignedIssuer {}),
                ca: None,
            },
        }
    }

    pub fn create_owned_self_signed_ca(&self) -> Certificate {
        Certificate {
            metadata: self.owned_meta(&self.self_signed_name()),
            spec: CertificateSpec {
                secret_name: self.self_signed_name(),
                common_name: Some(self.service_host()),
                dns_names: None,
                is_ca: Some(true),
                issuer_ref: CertificateIssuerRef::issuer(&self.self_signed_name()),
            },
        }
    }

    pub fn create_owned_ca_issuer(&self) -> Issuer {
        Issuer {
            metadata: self.owned_meta(&self.ca_issuer_name()),
            spec: IssuerSpec {
                self_signed: None,
                ca: Some(CaIssuer {
                    secret_name: self.ca_secret_name(),
                }),
            },
        }
    }

    /// Leaf certificate valid for the in-cluster service name and the hosts of
    /// exposed listeners served with this profile
    pub fn create_owned_profile_certificate(&self, profile: &str) -> Certificate {
        let name = self.profile_credentials_name(profile);
        let mut dns_names = vec![self.service_host()];
        dns_names.extend(self.exposed_hosts(profile));
        Certificate {
            metadata: self.owned_meta(&name),
            spec: CertificateSpec {
                secret_name: name,
                common_name: Some(self.service_host()),
                dns_names: Some(dns_names),
                is_ca: None,
                issuer_ref: CertificateIssuerRef::issuer(&self.ca_issuer_name()),
            },
        }
    }

    pub fn create_owned_profile_ca(&self, profile: &str) -> Certificate {
        let name = self.profile_ca_name(profile);
        Certificate {
            metadata: self.owned_meta(&name),
            spec: CertificateSpec {
                secret_name: name,
                common_name: Some(self.service_host()),
                dns_names: Some(vec![self.service_host()]),
                is_ca: Some(true),
                issuer_ref: CertificateIssuerRef::issuer(&self.ca_issuer_name()),
            },
        }
    }

    /// Record a generated secret on the profile; returns false if the profile is gone
    pub fn stamp_profile(&mut self, step: &CertStep) -> bool {
        let (profile, secret) = match step {
            CertStep::Credentials(p) => (p, self.profile_credentials_name(p)),
            CertStep::CaCert(p) => (p, self.profile_ca_name(p)),
        };
        let Some(sp) = self.spec.ssl_profiles.iter_mut().find(|sp| &sp.name == profile) else {
            return false;
        };
        match step {
            CertStep::Credentials(_) => sp.credentials = Some(secret),
            CertStep::CaCert(_) => sp.ca_cert = Some(secret),
        }
        true
    }
}

/// Next profile step, walking profiles in order: a profile's leaf before its client CA
pub fn pending_profile_step(ic: &Interconnect) -> Option<CertStep> {
    ic.spec.ssl_profiles.iter().find_map(|p| {
        if p.needs_credentials() {
            Some(CertStep::Credentials(p.name.clone()))
        } else if p.needs_ca_cert() {
            Some(CertStep::CaCert(p.name.clone()))
        } else {
            None
        }
    })
}
