use thiserror::Error;

#[derive(Error, Debug)]
pub enum AuditError {
    #[error("Audit log is not configured (no log directory)")]
    NotConfigured,

    #[error("Audit storage error: {0}")]
    StorageError(#[from] std::io::Error),

    #[error("Audit entry serialization failed: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Audit log {path} is corrupted: {reason}")]
    ParseError { path: String, reason: String },

    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, AuditError>;
