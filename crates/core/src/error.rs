use thiserror::Error;

/// A profile that cannot be bound to a detector implementation. Isolated per
/// profile: the scheduler logs it and continues with the remaining profiles.
#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("unknown detector id: {0}")]
    UnknownDetector(String),

    #[error("invalid profile {label}: {reason}")]
    Invalid { label: String, reason: String },
}

/// Failure raised by detector analysis code. Caught at the execution-unit
/// boundary; never reaches the scheduler or sibling units.
#[derive(Debug, Error)]
pub enum DetectionError {
    #[error("datastore error: {0}")]
    Datastore(#[from] DatastoreError),

    #[error("missing required parameter: {0}")]
    MissingParameter(String),

    #[error("invalid parameter {name}: {value}")]
    InvalidParameter { name: String, value: String },

    #[error("analysis failed: {0}")]
    Analysis(String),
}

/// Store failure, propagated as-is to the caller. The core applies no
/// automatic retry; retry policy belongs to the caller.
#[derive(Debug, Error)]
pub enum DatastoreError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("query error: {0}")]
    Query(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("serialization error: {0}")]
    Serialize(String),
}

/// Invalid or missing required configuration. Fatal at startup only.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value}")]
    Invalid { key: String, value: String },
}
