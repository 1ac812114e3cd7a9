//! In-memory `ClusterStore` for exercising reconcile passes without a cluster

use std::{collections::BTreeMap, sync::Mutex};

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::{core::ErrorResponse, Resource, ResourceExt};
use serde::Serialize;
use serde_json::Value;

use super::{
    store::{ClusterStore, Notice, StoreObject},
    types::Interconnect,
};
use crate::{Error, Result};

/// Failure injected into the next mutating call
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Failure {
    Conflict,
    Transient,
}

type Key = (String, String, String);

#[derive(Default)]
struct Inner {
    objects: BTreeMap<Key, Value>,
    version: u64,
    mutations: Vec<String>,
    events: Vec<(Notice, String)>,
    fail_next: Option<Failure>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

fn key<K: Resource<DynamicType = ()>>(ns: &str, name: &str) -> Key {
    (
        format!("{}/{}", K::api_version(&()), K::kind(&())),
        ns.to_string(),
        name.to_string(),
    )
}

fn resource_version(value: &Value) -> Option<&str> {
    value["metadata"]["resourceVersion"].as_str()
}

impl Inner {
    fn next_version(&mut self) -> String {
        self.version += 1;
        self.version.to_string()
    }

    fn take_failure(&mut self) -> Result<()> {
        match self.fail_next.take() {
            Some(Failure::Conflict) => Err(Error::Conflict("injected conflict".to_string())),
            Some(Failure::Transient) => Err(Error::Transient(kube::Error::Api(ErrorResponse {
                status: "Failure".to_string(),
                message: "injected outage".to_string(),
                reason: "ServiceUnavailable".to_string(),
                code: 503,
            }))),
            None => Ok(()),
        }
    }

    /// Optimistic concurrency: a write carrying a resourceVersion must match the stored one
    fn check_version(&self, key: &Key, incoming: &Value) -> Result<()> {
        let Some(stored) = self.objects.get(key) else {
            return Err(Error::NotFound(format!("{} {}", key.0, key.2)));
        };
        match resource_version(incoming) {
            Some(rv) if Some(rv) != resource_version(stored) => Err(Error::Conflict(format!(
                "{} {} has been modified",
                key.0, key.2
            ))),
            _ => Ok(()),
        }
    }

    fn store(&mut self, key: Key, mut value: Value, verb: &str) {
        value["metadata"]["resourceVersion"] = Value::String(self.next_version());
        self.mutations.push(format!("{verb} {} {}", key.0, key.2));
        self.objects.insert(key, value);
    }
}

impl MemoryStore {
    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap()
    }

    /// Seed an object without counting it as a mutation
    pub fn insert<K: StoreObject>(&self, obj: &K) {
        let ns = obj.namespace().unwrap_or_default();
        let mut inner = self.lock();
        let mut value = serde_json::to_value(obj).unwrap();
        value["metadata"]["resourceVersion"] = Value::String(inner.next_version());
        inner.objects.insert(key::<K>(&ns, &obj.name_any()), value);
    }

    pub fn object<K: StoreObject>(&self, ns: &str, name: &str) -> Option<K> {
        self.lock()
            .objects
            .get(&key::<K>(ns, name))
            .map(|v| serde_json::from_value(v.clone()).unwrap())
    }

    pub fn cluster(&self, ns: &str, name: &str) -> Interconnect {
        self.object(ns, name).unwrap()
    }

    pub fn fail_next(&self, failure: Failure) {
        self.lock().fail_next = Some(failure);
    }

    /// Every mutating call so far, as "verb apiVersion/Kind name"
    pub fn mutations(&self) -> Vec<String> {
        self.lock().mutations.clone()
    }

    pub fn events(&self) -> Vec<(Notice, String)> {
        self.lock().events.clone()
    }

    fn write<T: Serialize>(&self, key: Key, obj: &T, verb: &str) -> Result<()> {
        let mut inner = self.lock();
        inner.take_failure()?;
        let value = serde_json::to_value(obj).map_err(Error::SerializationError)?;
        if verb != "create" {
            inner.check_version(&key, &value)?;
        } else if inner.objects.contains_key(&key) {
            return Ok(());
        }
        inner.store(key, value, verb);
        Ok(())
    }
}

fn matches_selector(pod: &Pod, selector: &str) -> bool {
    let labels = pod.labels();
    selector
        .split(',')
        .filter_map(|pair| pair.split_once('='))
        .all(|(k, v)| labels.get(k).map(String::as_str) == Some(v))
}

#[async_trait]
impl ClusterStore for MemoryStore {
    async fn get<K: StoreObject>(&self, ns: &str, name: &str) -> Result<Option<K>> {
        self.lock()
            .objects
            .get(&key::<K>(ns, name))
            .map(|v| serde_json::from_value(v.clone()).map_err(Error::SerializationError))
            .transpose()
    }

    async fn list_pods(&self, ns: &str, selector: &str) -> Result<Vec<Pod>> {
        let inner = self.lock();
        let pods = inner
            .objects
            .iter()
            .filter(|((kind, pod_ns, _), _)| kind == "v1/Pod" && pod_ns == ns)
            .map(|(_, v)| serde_json::from_value::<Pod>(v.clone()))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::SerializationError)?;
        Ok(pods
            .into_iter()
            .filter(|p| matches_selector(p, selector))
            .collect())
    }

    async fn create<K: StoreObject>(&self, ns: &str, obj: &K) -> Result<()> {
        self.write(key::<K>(ns, &obj.name_any()), obj, "create")
    }

    async fn replace<K: StoreObject>(&self, ns: &str, obj: &K) -> Result<()> {
        self.write(key::<K>(ns, &obj.name_any()), obj, "replace")
    }

    /// The status subresource is kept as stored
    async fn replace_cluster(&self, ic: &Interconnect) -> Result<()> {
        let key = key::<Interconnect>(&ic.namespace().unwrap_or_default(), &ic.name_any());
        let mut inner = self.lock();
        inner.take_failure()?;
        let mut value = serde_json::to_value(ic).map_err(Error::SerializationError)?;
        inner.check_version(&key, &value)?;
        value["status"] = inner.objects[&key]["status"].clone();
        inner.store(key, value, "replace");
        Ok(())
    }

    async fn replace_cluster_status(&self, ic: &Interconnect) -> Result<()> {
        let key = key::<Interconnect>(&ic.namespace().unwrap_or_default(), &ic.name_any());
        let mut inner = self.lock();
        inner.take_failure()?;
        let incoming = serde_json::to_value(ic).map_err(Error::SerializationError)?;
        inner.check_version(&key, &incoming)?;
        let mut value = inner.objects[&key].clone();
        value["status"] = incoming["status"].clone();
        inner.store(key, value, "status");
        Ok(())
    }

    async fn publish(&self, _ic: &Interconnect, notice: Notice, reason: &str, _note: String) {
        self.lock().events.push((notice, reason.to_string()));
    }
}
