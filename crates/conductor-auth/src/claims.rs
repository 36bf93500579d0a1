//! Token claims
//!
//! Claims carried by Conductor API tokens.

use chrono::{DateTime, Utc};
use conductor_structure::User;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Default token issuer.
pub const DEFAULT_ISSUER: &str = "conductor";

/// Claims of an API token.
///
/// # Example
///
/// ```
/// use conductor_auth::TokenClaims;
/// use conductor_structure::User;
///
/// let user = User::new("alice", "alice@example.com");
/// let claims = TokenClaims::for_user(&user, chrono::Duration::hours(1));
/// assert_eq!(claims.user_id(), Some(user.id));
/// assert!(!claims.is_expired());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TokenClaims {
    // Standard JWT claims (RFC 7519)
    /// Subject (user ID)
    pub sub: String,

    /// Issuer
    pub iss: String,

    /// Expiration time (Unix timestamp)
    pub exp: i64,

    /// Issued at (Unix timestamp)
    pub iat: i64,

    /// Not before (Unix timestamp)
    pub nbf: i64,

    /// JWT ID (unique identifier for this token)
    pub jti: String,

    // Conductor claims
    /// Username at issue time
    pub username: String,

    /// Staff flag at issue time
    #[serde(default)]
    pub is_staff: bool,

    /// Support flag at issue time
    #[serde(default)]
    pub is_support: bool,
}

impl TokenClaims {
    /// Create claims for a user.
    pub fn for_user(user: &User, duration: chrono::Duration) -> Self {
        let now = Utc::now();
        let exp = now + duration;

        Self {
            sub: user.id.to_string(),
            iss: DEFAULT_ISSUER.to_string(),
            exp: exp.timestamp(),
            iat: now.timestamp(),
            nbf: now.timestamp(),
            jti: Uuid::now_v7().to_string(),
            username: user.username.clone(),
            is_staff: user.is_staff,
            is_support: user.is_support,
        }
    }

    /// Set the issuer.
    pub fn with_issuer(mut self, issuer: impl Into<String>) -> Self {
        self.iss = issuer.into();
        self
    }

    /// Get the user ID as UUID.
    pub fn user_id(&self) -> Option<Uuid> {
        Uuid::parse_str(&self.sub).ok()
    }

    /// Check if the token is expired.
    pub fn is_expired(&self) -> bool {
        Utc::now().timestamp() >= self.exp
    }

    /// Get expiration as DateTime.
    pub fn expires_at(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.exp, 0).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_claims_creation() {
        let user = User::new("root", "root@example.com").staff();
        let claims = TokenClaims::for_user(&user, Duration::hours(1));

        assert_eq!(claims.user_id(), Some(user.id));
        assert_eq!(claims.username, "root");
        assert!(claims.is_staff);
        assert!(!claims.is_support);
        assert_eq!(claims.iss, DEFAULT_ISSUER);
    }

    #[test]
    fn test_claims_expiration() {
        let user = User::new("bob", "bob@example.com");
        let mut claims = TokenClaims::for_user(&user, Duration::hours(1));
        claims.exp = Utc::now().timestamp() - 3600;

        assert!(claims.is_expired());
        assert!(claims.expires_at() < Utc::now());
    }
}
