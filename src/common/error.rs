//! Error types for needlestore

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    // === I/O Errors ===
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Corrupted data: {0}")]
    Corrupted(String),

    #[error("{0} is read-only")]
    ReadOnly(String),

    // === Super Block Errors ===
    #[error("Super block error: {0}")]
    SuperBlock(String),

    #[error("Super block extra size is {size} bigger than {max}")]
    SuperBlockExtraTooLarge { size: usize, max: usize },

    #[error("Unknown replication type: {0}")]
    InvalidReplicaPlacement(String),

    #[error("Invalid TTL: {0}")]
    InvalidTtl(String),

    // === Backend Errors ===
    #[error("Backend storage type {0} not found")]
    UnknownBackendType(String),

    #[error("Failed to create backend storage {name}: {reason}")]
    BackendBuild { name: String, reason: String },

    #[error("Backend storage {0} not found")]
    BackendNotFound(String),

    #[error("{operation} is not supported by the {backend} backend")]
    Unsupported {
        backend: String,
        operation: &'static str,
    },

    #[error("bucket {bucket} {operation} {key}: {source}")]
    ObjectStore {
        bucket: String,
        key: String,
        operation: &'static str,
        #[source]
        source: object_store::Error,
    },

    // === Volume Errors ===
    #[error("Volume {0} is closed")]
    VolumeClosed(String),

    #[error("Volume not initialized: {0}")]
    NotInitialized(String),

    #[error("Compact failed: {0}")]
    CompactFailed(String),

    // === Encoding Errors ===
    #[error("Protobuf decode error: {0}")]
    Decode(#[from] prost::DecodeError),

    #[error("Protobuf encode error: {0}")]
    Encode(#[from] prost::EncodeError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // === Config Errors ===
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    // === Generic ===
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Misconfiguration that a process must not paper over.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::UnknownBackendType(_)
                | Error::BackendBuild { .. }
                | Error::SuperBlockExtraTooLarge { .. }
                | Error::InvalidConfig(_)
                | Error::Config(_)
        )
    }

    /// The backend cannot perform this kind of operation at all.
    pub fn is_unsupported(&self) -> bool {
        matches!(self, Error::Unsupported { .. })
    }

    /// A write was refused because the target is not writable.
    pub fn is_permission_denied(&self) -> bool {
        match self {
            Error::Io(e) => e.kind() == std::io::ErrorKind::PermissionDenied,
            Error::ReadOnly(_) => true,
            _ => false,
        }
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Other(s.to_string())
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Other(s)
    }
}
