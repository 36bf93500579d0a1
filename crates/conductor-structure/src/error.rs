//! Error types for structure operations
//!
//! Errors raised while mutating the customer/project hierarchy, granting roles
//! or checking quotas.

use thiserror::Error;
use uuid::Uuid;

use crate::quotas::QuotaName;

/// Structure error types.
#[derive(Debug, Error)]
pub enum StructureError {
    /// Referenced entity does not exist
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Entity kind, e.g. "customer"
        kind: &'static str,
        /// Requested ID
        id: Uuid,
    },

    /// Entity violates a uniqueness constraint
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Actor is not allowed to perform the operation
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Quota would be exceeded by the requested change
    #[error("{name} quota limit is {limit}, requested usage is {requested}")]
    QuotaExceeded {
        /// Quota that would overflow
        name: QuotaName,
        /// Configured limit
        limit: f64,
        /// Usage after the change
        requested: f64,
    },

    /// Entity cannot be modified in its current state
    #[error("{0}")]
    Conflict(String),

    /// Input failed validation
    #[error("{field}: {message}")]
    Validation {
        /// Offending field
        field: &'static str,
        /// Human-readable message
        message: String,
    },
}

/// Result type for structure operations.
pub type StructureResult<T> = Result<T, StructureError>;

impl StructureError {
    /// Shorthand for a `NotFound` error.
    pub fn not_found(kind: &'static str, id: Uuid) -> Self {
        StructureError::NotFound { kind, id }
    }

    /// Shorthand for a `Validation` error.
    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        StructureError::Validation {
            field,
            message: message.into(),
        }
    }

    /// Get HTTP status code for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            StructureError::NotFound { .. } => 404,
            StructureError::PermissionDenied(_) => 403,
            StructureError::Conflict(_) => 409,
            StructureError::AlreadyExists(_)
            | StructureError::QuotaExceeded { .. }
            | StructureError::Validation { .. } => 400,
        }
    }

    /// Get error code for API responses.
    pub fn error_code(&self) -> &'static str {
        match self {
            StructureError::NotFound { .. } => "NOT_FOUND",
            StructureError::AlreadyExists(_) => "ALREADY_EXISTS",
            StructureError::PermissionDenied(_) => "PERMISSION_DENIED",
            StructureError::QuotaExceeded { .. } => "QUOTA_EXCEEDED",
            StructureError::Conflict(_) => "CONFLICT",
            StructureError::Validation { .. } => "VALIDATION_ERROR",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(StructureError::not_found("customer", Uuid::nil()).status_code(), 404);
        assert_eq!(StructureError::Conflict("busy".into()).status_code(), 409);
        assert_eq!(
            StructureError::QuotaExceeded {
                name: QuotaName::NcProjectCount,
                limit: 1.0,
                requested: 2.0,
            }
            .status_code(),
            400
        );
    }

    #[test]
    fn test_quota_message() {
        let err = StructureError::QuotaExceeded {
            name: QuotaName::NcUserCount,
            limit: 3.0,
            requested: 4.0,
        };
        assert_eq!(
            err.to_string(),
            "nc_user_count quota limit is 3, requested usage is 4"
        );
    }
}
