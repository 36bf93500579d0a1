//! Errors of the audit log and alert queries.

use thiserror::Error;
use uuid::Uuid;

/// Audit log and alert errors.
#[derive(Debug, Error)]
pub enum LoggingError {
    /// Unknown scope type filter
    #[error("Scope type \"{value}\" is not valid. Has to be one from list: {choices}")]
    InvalidScopeType {
        /// Requested scope type
        value: String,
        /// Comma separated valid choices
        choices: String,
    },

    /// Alert does not exist
    #[error("Alert {0} not found")]
    AlertNotFound(Uuid),

    /// Alert was acknowledged already
    #[error("Alert is already acknowledged")]
    AlreadyAcknowledged,

    /// Alert was not acknowledged
    #[error("Alert is not acknowledged")]
    NotAcknowledged,
}

impl LoggingError {
    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            LoggingError::InvalidScopeType { .. } => 400,
            LoggingError::AlertNotFound(_) => 404,
            LoggingError::AlreadyAcknowledged | LoggingError::NotAcknowledged => 409,
        }
    }

    /// Get the error code for API responses.
    pub fn error_code(&self) -> &'static str {
        match self {
            LoggingError::InvalidScopeType { .. } => "INVALID_SCOPE_TYPE",
            LoggingError::AlertNotFound(_) => "NOT_FOUND",
            LoggingError::AlreadyAcknowledged | LoggingError::NotAcknowledged => "CONFLICT",
        }
    }
}

/// Result type for audit log and alert operations.
pub type LoggingResult<T> = Result<T, LoggingError>;
