use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::ConfigMap;
use kube::ResourceExt;

use super::types::{CONFIG_TEMPLATE_KEY, Interconnect};
use crate::qdrouterd_config;

impl Interconnect {
    pub fn create_owned_config_map(&self) -> ConfigMap {
        ConfigMap {
            metadata: self.owned_meta(&self.name_any()),
            data: Some(BTreeMap::from([(
                CONFIG_TEMPLATE_KEY.to_string(),
                qdrouterd_config::render(&self.spec),
            )])),
            ..ConfigMap::default()
        }
    }
}

fn template(config_map: &ConfigMap) -> Option<&String> {
    config_map
        .data
        .as_ref()
        .and_then(|d| d.get(CONFIG_TEMPLATE_KEY))
}

pub fn config_map_needs_update(current: &ConfigMap, desired: &ConfigMap) -> bool {
    template(current) != template(desired)
}

pub fn update_config_map(current: &mut ConfigMap, desired: &ConfigMap) {
    if let Some(config) = template(desired) {
        current
            .data
            .get_or_insert_with(BTreeMap::new)
            .insert(CONFIG_TEMPLATE_KEY.to_string(), config.clone());
    }
}
