use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GroupsError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Audit log error: {0}")]
    Audit(#[from] audit_engine::AuditError),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

/// Error taxonomy exposed to outer layers (HTTP mapping, CLI exit codes)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Forbidden,
    Configuration,
    NotFound,
    Conflict,
    Store,
    Internal,
}

impl GroupsError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::Forbidden(_) => ErrorKind::Forbidden,
            Self::Configuration(_) => ErrorKind::Configuration,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::Store(_) => ErrorKind::Store,
            Self::Audit(_) | Self::Internal(_) => ErrorKind::Internal,
        }
    }
}

impl From<sqlx::Error> for GroupsError {
    fn from(err: sqlx::Error) -> Self {
        Self::Store(format!("remote SQL query failed: {err}"))
    }
}

impl From<config_engine::ConfigError> for GroupsError {
    fn from(err: config_engine::ConfigError) -> Self {
        Self::Configuration(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, GroupsError>;
