use crate::engine::ServiceKind;
use bacwatch_core::{ObjectId, PropertyId};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("device {device_instance} not found")]
    NotFound { device_instance: u32 },
    #[error("request timed out")]
    Timeout,
    #[error("{service} rejected by remote device: {reason}")]
    Rejected { service: ServiceKind, reason: String },
    #[error("reading {property} of {object_id} failed: {source}")]
    PropertyRead {
        object_id: ObjectId,
        property: PropertyId,
        #[source]
        source: Box<ClientError>,
    },
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("unexpected {property} value from {object_id}")]
    UnexpectedValue {
        object_id: ObjectId,
        property: PropertyId,
    },
    #[error("unsupported response")]
    UnsupportedResponse,
    #[error("subscription lifetime must be non-zero; zero cancels")]
    InvalidLifetime,
    #[error("protocol engine is stopped")]
    EngineStopped,
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl ClientError {
    /// `true` when the remote device answered and declined the request.
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::Rejected { .. })
    }
}

/// Invalid or unreadable subscriber configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(String),
}
