//! Error types for authentication operations
//!
//! This module defines the errors raised while extracting, validating and
//! resolving API tokens.

use thiserror::Error;

/// Authentication error types.
#[derive(Debug, Error)]
pub enum AuthError {
    /// `Authorization: Token` without a token
    #[error("Invalid token. No credentials provided.")]
    NoCredentials,

    /// Token value contains whitespace
    #[error("Invalid token. Token string should not contain spaces.")]
    TokenContainsSpaces,

    /// Token has expired
    #[error("Token has expired")]
    TokenExpired,

    /// Token is invalid (malformed, bad signature, etc.)
    #[error("Invalid token: {0}")]
    InvalidToken(String),

    /// Token subject does not resolve to a user
    #[error("Invalid token. User not found.")]
    UserNotFound,

    /// User account is disabled
    #[error("User inactive or deleted.")]
    UserInactive,

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type for authentication operations.
pub type AuthResult<T> = Result<T, AuthError>;

impl AuthError {
    /// Check if this error should be logged at error level.
    ///
    /// Rejected credentials are expected and are not server errors.
    pub fn is_server_error(&self) -> bool {
        matches!(self, AuthError::Internal(_) | AuthError::ConfigError(_))
    }

    /// Get HTTP status code for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            AuthError::NoCredentials
            | AuthError::TokenContainsSpaces
            | AuthError::TokenExpired
            | AuthError::InvalidToken(_)
            | AuthError::UserNotFound
            | AuthError::UserInactive => 401,

            AuthError::ConfigError(_) | AuthError::Internal(_) => 500,
        }
    }

    /// Get error code for API responses.
    pub fn error_code(&self) -> &'static str {
        match self {
            AuthError::NoCredentials => "NO_CREDENTIALS",
            AuthError::TokenContainsSpaces => "MALFORMED_TOKEN",
            AuthError::TokenExpired => "TOKEN_EXPIRED",
            AuthError::InvalidToken(_) => "INVALID_TOKEN",
            AuthError::UserNotFound => "USER_NOT_FOUND",
            AuthError::UserInactive => "USER_INACTIVE",
            AuthError::ConfigError(_) => "CONFIG_ERROR",
            AuthError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(AuthError::NoCredentials.status_code(), 401);
        assert_eq!(AuthError::UserInactive.error_code(), "USER_INACTIVE");
        assert!(AuthError::ConfigError("no secret".into()).is_server_error());
        assert!(!AuthError::TokenExpired.is_server_error());
    }
}
