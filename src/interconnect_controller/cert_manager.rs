//! The subset of the cert-manager.io/v1 API used to issue router certificates

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;

#[skip_serializing_none]
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[kube(
    group = "cert-manager.io",
    version = "v1",
    kind = "Issuer",
    plural = "issuers",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct IssuerSpec {
    pub self_signed: Option<SelfSignedIssuer>,
    pub ca: Option<CaIssuer>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct SelfSignedIssuer {}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CaIssuer {
    pub secret_name: String,
}

#[skip_serializing_none]
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[kube(
    group = "cert-manager.io",
    version = "v1",
    kind = "Certificate",
    plural = "certificates",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct CertificateSpec {
    pub secret_name: String,
    pub common_name: Option<String>,
    pub dns_names: Option<Vec<String>>,
    pub is_ca: Option<bool>,
    pub issuer_ref: CertificateIssuerRef,
}

#[skip_serializing_none]
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct CertificateIssuerRef {
    pub name: String,
    pub kind: Option<String>,
    pub group: Option<String>,
}

impl CertificateIssuerRef {
    /// Reference to a namespaced Issuer
    pub fn issuer(name: &str) -> Self {
        CertificateIssuerRef {
            name: name.to_string(),
            kind: Some("Issuer".to_string()),
            group: Some("cert-manager.io".to_string()),
        }
    }
}
