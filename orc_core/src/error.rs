/// Core error type shared by every orchestrator component.
///
/// Variants line up with the error taxonomy in the job lifecycle design:
/// lock contention, config-layer failures, deploy failures, and readiness
/// failures each get their own variant so the error router can classify
/// without string matching.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("External error: {0}")]
    External(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("application lock unavailable: {0}")]
    Locked(String),

    #[error("deploy request failed: {0}")]
    DeployRequestFailed(String),

    #[error("hooks failed: {0:?}")]
    HooksFailed(Vec<String>),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<config::ConfigError> for Error {
    fn from(err: config::ConfigError) -> Self {
        Error::Config(err.to_string())
    }
}

impl Error {
    /// Stable machine-readable code for this error, matching the taxonomy
    /// used by the error router (`JOB_FAILED` event `details.code`).
    pub fn code(&self) -> &'static str {
        match self {
            Error::Locked(_) => "LOCKED",
            Error::Config(_) => "CONFIG_ERROR",
            Error::Validation(_) => "CONFIG_VALIDATION_ERROR",
            Error::DeployRequestFailed(_) => "DEPLOY_REQUEST_FAILED",
            Error::HooksFailed(_) => "HOOKS_FAILED",
            Error::Database(_) | Error::Storage(_) => "STORAGE_ERROR",
            Error::NotFound(_) => "NOT_FOUND",
            Error::External(_) => "EXTERNAL_ERROR",
            Error::Io(_) => "IO_ERROR",
            Error::Internal(_) => "INTERNAL",
        }
    }

    /// Normalize into the `{message, code, details}` shape the error
    /// router appends to `JOB_FAILED` events. This is the Rust equivalent
    /// of "objects exposing a to_dict capability are honored": every
    /// `Error` always has one, so the router never needs to downcast.
    pub fn to_normalized(&self) -> NormalizedError {
        let details = match self {
            Error::HooksFailed(names) => serde_json::json!({ "failed": names }),
            _ => serde_json::Value::Null,
        };
        NormalizedError {
            message: self.to_string(),
            code: self.code().to_string(),
            details,
        }
    }
}

/// Normalized error shape persisted on `JOB_FAILED` events and sent to
/// the Notifier collaborator.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct NormalizedError {
    pub message: String,
    pub code: String,
    #[serde(skip_serializing_if = "serde_json::Value::is_null")]
    pub details: serde_json::Value,
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
