use thiserror::Error;

#[derive(Debug, Error)]
pub enum CustodianError {
    /// Malformed queue row, missing identity field, or duplicate confirmation
    /// sources. Rejected before any side effect.
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("request_id already exists: {0}")]
    DuplicateRequest(String),

    #[error("request not found: {0}")]
    RequestNotFound(String),

    #[error("protected target blocked: {0}")]
    PolicyBlocked(String),

    /// Preflight-level fault: missing setting, unregistered action, missing
    /// policy gate.
    #[error("configuration fault: {0}")]
    Configuration(String),

    #[error("invalid workflow '{workflow}': {reason}")]
    InvalidWorkflow { workflow: String, reason: String },

    #[error("unknown action: {0}")]
    UnknownAction(String),

    #[error("invalid date '{0}': expected YYYY-MM-DD")]
    InvalidDate(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),
}

pub type Result<T> = std::result::Result<T, CustodianError>;
