//! Error types for IaaS operations

use conductor_structure::StructureError;
use thiserror::Error;
use uuid::Uuid;

/// Message used when an entity cannot change in its current state.
pub const INCORRECT_STATE_MESSAGE: &str = "Cannot modify an object in its current state.";

/// IaaS error types.
#[derive(Debug, Error)]
pub enum IaasError {
    /// Entity is in a state that does not allow the operation
    #[error("{0}")]
    IncorrectState(String),

    /// Input failed validation
    #[error("{0}")]
    Validation(String),

    /// User may see the entity but not perform the operation
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Entity does not exist or is not visible to the user
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Entity kind, e.g. "instance"
        kind: &'static str,
        /// Requested ID
        id: Uuid,
    },

    /// Quota would be exceeded
    #[error("{0}")]
    QuotaExceeded(String),

    /// Uniqueness constraint violated
    #[error("Already exists: {0}")]
    AlreadyExists(String),
}

/// Result type for IaaS operations.
pub type IaasResult<T> = Result<T, IaasError>;

impl IaasError {
    /// Shorthand for a `NotFound` error.
    pub fn not_found(kind: &'static str, id: Uuid) -> Self {
        IaasError::NotFound { kind, id }
    }

    /// Generic incorrect state error.
    pub fn incorrect_state() -> Self {
        IaasError::IncorrectState(INCORRECT_STATE_MESSAGE.to_string())
    }

    /// Incorrect state error naming the attempted operation.
    pub fn operation_not_allowed(operation: &str) -> Self {
        IaasError::IncorrectState(format!(
            "Performing {} operation is not allowed for resource in its current state.",
            operation
        ))
    }

    /// Get HTTP status code for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            IaasError::IncorrectState(_) => 409,
            IaasError::PermissionDenied(_) => 403,
            IaasError::NotFound { .. } => 404,
            IaasError::Validation(_)
            | IaasError::QuotaExceeded(_)
            | IaasError::AlreadyExists(_) => 400,
        }
    }

    /// Get error code for API responses.
    pub fn error_code(&self) -> &'static str {
        match self {
            IaasError::IncorrectState(_) => "INCORRECT_STATE",
            IaasError::Validation(_) => "VALIDATION_ERROR",
            IaasError::PermissionDenied(_) => "PERMISSION_DENIED",
            IaasError::NotFound { .. } => "NOT_FOUND",
            IaasError::QuotaExceeded(_) => "QUOTA_EXCEEDED",
            IaasError::AlreadyExists(_) => "ALREADY_EXISTS",
        }
    }
}

impl From<StructureError> for IaasError {
    fn from(err: StructureError) -> Self {
        match err {
            StructureError::NotFound { kind, id } => IaasError::NotFound { kind, id },
            StructureError::AlreadyExists(msg) => IaasError::AlreadyExists(msg),
            StructureError::PermissionDenied(msg) => IaasError::PermissionDenied(msg),
            err @ StructureError::QuotaExceeded { .. } => IaasError::QuotaExceeded(err.to_string()),
            StructureError::Conflict(msg) => IaasError::IncorrectState(msg),
            err @ StructureError::Validation { .. } => IaasError::Validation(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conductor_structure::QuotaName;

    #[test]
    fn test_status_codes() {
        assert_eq!(IaasError::incorrect_state().status_code(), 409);
        assert_eq!(IaasError::not_found("flavor", Uuid::nil()).status_code(), 404);
        assert_eq!(IaasError::QuotaExceeded("ram".into()).status_code(), 400);
        assert_eq!(IaasError::PermissionDenied("resize".into()).error_code(), "PERMISSION_DENIED");
    }

    #[test]
    fn test_operation_message() {
        assert_eq!(
            IaasError::operation_not_allowed("stop").to_string(),
            "Performing stop operation is not allowed for resource in its current state."
        );
    }

    #[test]
    fn test_from_structure_error() {
        let err: IaasError = StructureError::QuotaExceeded {
            name: QuotaName::Vcpu,
            limit: 4.0,
            requested: 6.0,
        }
        .into();
        assert_eq!(err.status_code(), 400);
        assert_eq!(err.to_string(), "vcpu quota limit is 4, requested usage is 6");
    }
}
