//! Request authentication.
//!
//! [`Authenticator`] turns request credentials into a user, and records the
//! user on the current tracing span so audit records carry the actor.

use std::collections::HashMap;

use async_trait::async_trait;
use conductor_structure::User;
use tracing::field;
use uuid::Uuid;

use crate::claims::TokenClaims;
use crate::error::{AuthError, AuthResult};
use crate::jwt::TokenService;
use crate::token::extract_token;

/// Lookup of user accounts by ID.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Find a user.
    async fn find_user(&self, id: Uuid) -> Option<User>;
}

#[async_trait]
impl UserDirectory for HashMap<Uuid, User> {
    async fn find_user(&self, id: Uuid) -> Option<User> {
        self.get(&id).cloned()
    }
}

/// A resolved request user.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    /// The user account
    pub user: User,
    /// Claims of the presented token
    pub claims: TokenClaims,
}

/// Create a request span with an empty `user` field to be filled in by
/// [`Authenticator::authenticate`].
pub fn request_span(method: &str, path: &str) -> tracing::Span {
    tracing::info_span!("request", method, path, user = field::Empty)
}

/// Token authenticator.
#[derive(Debug)]
pub struct Authenticator<D> {
    tokens: TokenService,
    directory: D,
}

impl<D: UserDirectory> Authenticator<D> {
    /// Create an authenticator.
    pub fn new(tokens: TokenService, directory: D) -> Self {
        Self { tokens, directory }
    }

    /// Token service used for validation.
    pub fn tokens(&self) -> &TokenService {
        &self.tokens
    }

    /// Authenticate a request.
    ///
    /// # Returns
    ///
    /// `Ok(None)` when the request carries no token credentials
    ///
    /// # Errors
    ///
    /// Malformed or invalid tokens, unknown users and inactive users
    pub async fn authenticate(
        &self,
        authorization: Option<&str>,
        query: &HashMap<String, String>,
    ) -> AuthResult<Option<AuthenticatedUser>> {
        let Some(token) = extract_token(authorization, query)? else {
            return Ok(None);
        };

        let claims = self.tokens.validate(&token)?;
        let user_id = claims
            .user_id()
            .ok_or_else(|| AuthError::InvalidToken("Malformed subject".to_string()))?;
        let user = self
            .directory
            .find_user(user_id)
            .await
            .ok_or(AuthError::UserNotFound)?;
        if !user.is_active {
            tracing::debug!(user_id = %user.id, "Rejected token of inactive user");
            return Err(AuthError::UserInactive);
        }

        tracing::Span::current().record("user", field::display(&user.username));
        Ok(Some(AuthenticatedUser { user, claims }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (Authenticator<HashMap<Uuid, User>>, User, User) {
        let active = User::new("alice", "alice@example.com");
        let mut inactive = User::new("bob", "bob@example.com");
        inactive.is_active = false;
        let directory = HashMap::from([(active.id, active.clone()), (inactive.id, inactive.clone())]);
        let tokens = TokenService::with_secret("authenticator-test-secret").unwrap();
        (Authenticator::new(tokens, directory), active, inactive)
    }

    #[tokio::test]
    async fn test_authenticate_header_token() {
        let (auth, alice, _) = setup();
        let token = auth.tokens().issue(&alice).unwrap();
        let header = format!("Token {}", token);

        let span = request_span("GET", "/api/projects/");
        let _guard = span.enter();
        let resolved = auth
            .authenticate(Some(&header), &HashMap::new())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(resolved.user.id, alice.id);
        assert_eq!(resolved.claims.username, "alice");
    }

    #[tokio::test]
    async fn test_authenticate_query_token() {
        let (auth, alice, _) = setup();
        let token = auth.tokens().issue(&alice).unwrap();
        let query = HashMap::from([("x-auth-token".to_string(), format!("token {}", token))]);
        assert!(auth.authenticate(None, &query).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_anonymous_request() {
        let (auth, _, _) = setup();
        assert!(auth.authenticate(None, &HashMap::new()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_rejections() {
        let (auth, _, bob) = setup();
        let token = auth.tokens().issue(&bob).unwrap();
        let err = auth
            .authenticate(Some(&format!("Token {}", token)), &HashMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::UserInactive));

        let stranger = User::new("eve", "eve@example.com");
        let token = auth.tokens().issue(&stranger).unwrap();
        let err = auth
            .authenticate(Some(&format!("Token {}", token)), &HashMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::UserNotFound));

        let err = auth
            .authenticate(Some("Token"), &HashMap::new())
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 401);
    }
}
