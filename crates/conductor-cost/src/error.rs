//! Error types for cost tracking and billing

use thiserror::Error;
use uuid::Uuid;

/// Cost error types.
#[derive(Debug, Error)]
pub enum CostError {
    /// Period string is not "YYYY.MM"
    #[error("Value \"{0}\" should be valid be in format YYYY.MM")]
    InvalidYearMonth(String),

    /// Month outside 1..=12
    #[error("Month has to be from 1 to 12")]
    InvalidMonth,

    /// Range start is not before its end
    #[error("Start has to be earlier than end.")]
    InvalidRange,

    /// A manual estimate for the period already exists
    #[error("Estimate for given month already exists. Use PATCH request to update it.")]
    EstimateExists,

    /// Estimates of this scope type cannot be entered by hand
    #[error("Price estimates of {0} cannot be edited")]
    NotEditable(String),

    /// Service already has a price list
    #[error("Service can not have more than one price list")]
    DuplicatePriceList,

    /// Item key already used by the service
    #[error("Price list item with key {key} already exists for this service")]
    DuplicateItem {
        /// Item key
        key: String,
    },

    /// Entity does not exist
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Entity kind, e.g. "invoice"
        kind: &'static str,
        /// Requested ID
        id: Uuid,
    },

    /// Order cannot move from its current state
    #[error("Order cannot be {action} in state {state}")]
    IncorrectOrderState {
        /// Attempted action
        action: &'static str,
        /// Current state
        state: &'static str,
    },

    /// Billing backend call failed
    #[error("Billing backend error: {0}")]
    Billing(String),
}

/// Result type for cost operations.
pub type CostResult<T> = Result<T, CostError>;

impl CostError {
    /// Shorthand for a `NotFound` error.
    pub fn not_found(kind: &'static str, id: Uuid) -> Self {
        CostError::NotFound { kind, id }
    }

    /// Get HTTP status code for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            CostError::NotFound { .. } => 404,
            CostError::IncorrectOrderState { .. } => 409,
            CostError::Billing(_) => 500,
            _ => 400,
        }
    }

    /// Get error code for API responses.
    pub fn error_code(&self) -> &'static str {
        match self {
            CostError::InvalidYearMonth(_) | CostError::InvalidMonth | CostError::InvalidRange => {
                "INVALID_PERIOD"
            }
            CostError::EstimateExists
            | CostError::DuplicatePriceList
            | CostError::DuplicateItem { .. } => "ALREADY_EXISTS",
            CostError::NotEditable(_) => "NOT_EDITABLE",
            CostError::NotFound { .. } => "NOT_FOUND",
            CostError::IncorrectOrderState { .. } => "INCORRECT_STATE",
            CostError::Billing(_) => "BILLING_ERROR",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(CostError::InvalidMonth.status_code(), 400);
        assert_eq!(CostError::EstimateExists.status_code(), 400);
        assert_eq!(CostError::not_found("invoice", Uuid::nil()).status_code(), 404);
        assert_eq!(CostError::Billing("timeout".into()).status_code(), 500);
    }

    #[test]
    fn test_messages() {
        assert_eq!(
            CostError::InvalidYearMonth("2015-01".into()).to_string(),
            "Value \"2015-01\" should be valid be in format YYYY.MM"
        );
        assert_eq!(
            CostError::DuplicatePriceList.to_string(),
            "Service can not have more than one price list"
        );
    }
}
