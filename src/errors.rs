use crate::gateway::GatewayError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("VALIDATION: {0}")]
    Validation(String),
    #[error("REMOTE: {code}: {message}")]
    Remote { code: String, message: String },
    #[error("NOT_FOUND: {0}")]
    NotFound(String),
    #[error("INTERNAL: {0}")]
    Internal(String),
}

impl From<GatewayError> for SyncError {
    fn from(value: GatewayError) -> Self {
        Self::Remote {
            code: value.code,
            message: value.message,
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(value: serde_json::Error) -> Self {
        Self::Internal(value.to_string())
    }
}

pub type SyncResult<T> = Result<T, SyncError>;
