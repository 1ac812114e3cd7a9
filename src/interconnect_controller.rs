pub mod cert_manager;
pub mod certificates;
pub mod config_map;
pub mod defaults;
pub mod engine;
pub mod exposure;
mod main;
pub mod rbac;
pub mod route;
pub mod service;
pub mod store;
pub mod types;
pub mod workload;

#[cfg(test)]
pub mod testing;

pub use cert_manager::*;
pub use certificates::CertStep;
pub use defaults::{Normalized, normalize, unsatisfiable_profiles};
pub use engine::{Outcome, Settings, reconcile_pass};
pub use main::*;
pub use route::*;
pub use service::SERVING_CERT_ANNOTATION;
pub use store::{Capabilities, ClusterStore, Deadline, KubeStore, Notice, StoreObject};
pub use types::*;
pub use workload::{DEFAULT_ROUTER_IMAGE, deployment_template, replicas, template_image};
