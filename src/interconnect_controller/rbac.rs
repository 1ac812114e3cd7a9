use k8s_openapi::api::{
    core::v1::ServiceAccount,
    rbac::v1::{PolicyRule, Role, RoleBinding, RoleRef, Subject},
};
use kube::ResourceExt;

use super::types::Interconnect;

impl Interconnect {
    pub fn create_owned_sa(&self) -> ServiceAccount {
        ServiceAccount {
            metadata: self.owned_meta(&self.name_any()),
            ..ServiceAccount::default()
        }
    }

    /// The router's auto-mesh discovery lists its peers' pods
    pub fn create_owned_role(&self) -> Role {
        Role {
            metadata: self.owned_meta(&self.name_any()),
            rules: Some(router_rules()),
        }
    }

    pub fn create_owned_role_binding(&self) -> RoleBinding {
        RoleBinding {
            metadata: self.owned_meta(&self.name_any()),
            role_ref: RoleRef {
                api_group: "rbac.authorization.k8s.io".to_string(),
                kind: "Role".to_string(),
                name: self.name_any(),
            },
            subjects: Some(vec![Subject {
                kind: "ServiceAccount".to_string(),
                name: self.name_any(),
                namespace: self.namespace(),
                ..Subject::default()
            }]),
        }
    }
}

fn router_rules() -> Vec<PolicyRule> {
    vec![PolicyRule {
        api_groups: Some(vec!["".to_string()]),
        resources: Some(vec!["pods".to_string()]),
        verbs: vec!["get".to_string(), "list".to_string(), "watch".to_string()],
        ..PolicyRule::default()
    }]
}

pub fn role_needs_update(current: &Role, desired: &Role) -> bool {
    current.rules != desired.rules
}

pub fn role_binding_needs_update(current: &RoleBinding, desired: &RoleBinding) -> bool {
    current.subjects != desired.subjects
}

/// Copy the mutable fields of `desired` onto the live object
pub fn update_role(current: &mut Role, desired: &Role) {
    current.rules = desired.rules.clone();
}

pub fn update_role_binding(current: &mut RoleBinding, desired: &RoleBinding) {
    current.subjects = desired.subjects.clone();
}
