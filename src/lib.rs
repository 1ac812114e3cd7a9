use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("SerializationError: {0}")]
    SerializationError(#[source] serde_json::Error),

    #[error("Kube Error: {0}")]
    KubeError(#[source] kube::Error),

    #[error("Not Found: {0}")]
    NotFound(String),

    /// Optimistic concurrency check failed; the pass must start over from fresh state
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Store unavailable or rejected the request for a reason worth retrying with backoff
    #[error("Transient Store Error: {0}")]
    Transient(#[source] kube::Error),

    #[error("Deadline Exceeded before {0}")]
    DeadlineExceeded(String),

    #[error("Missing Object Key: {0}")]
    MissingObjectKey(&'static str),
}
pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    /// Classify a store failure by its API status code.
    pub fn from_store(error: kube::Error) -> Self {
        match &error {
            kube::Error::Api(resp) if resp.code == 404 => Error::NotFound(resp.message.clone()),
            kube::Error::Api(resp) if resp.code == 409 => Error::Conflict(resp.message.clone()),
            _ => Error::Transient(error),
        }
    }

    /// Errors that should be retried right away rather than after the error backoff
    pub fn is_fast_retry(&self) -> bool {
        matches!(self, Error::Conflict(_) | Error::DeadlineExceeded(_))
    }
}

pub mod conditions;
pub mod events_helper;
pub mod interconnect_controller;
pub mod qdrouterd_config;

/// Log and trace integrations
pub mod telemetry;
