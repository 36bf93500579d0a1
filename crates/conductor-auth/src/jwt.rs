//! JWT token generation and validation
//!
//! API tokens are HMAC-signed JWTs issued by [`TokenService`].

use crate::claims::{TokenClaims, DEFAULT_ISSUER};
use crate::error::{AuthError, AuthResult};
use chrono::Duration;
use conductor_structure::User;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::Rng;

/// Token configuration.
#[derive(Clone)]
pub struct TokenConfig {
    /// HMAC secret
    pub secret: String,

    /// Token issuer
    pub issuer: String,

    /// Token lifetime
    pub lifetime: Duration,
}

impl std::fmt::Debug for TokenConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenConfig")
            .field("secret", &"[REDACTED]")
            .field("issuer", &self.issuer)
            .field("lifetime", &self.lifetime)
            .finish()
    }
}

impl TokenConfig {
    /// Create a configuration with the default issuer and a one day lifetime.
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            issuer: DEFAULT_ISSUER.to_string(),
            lifetime: Duration::hours(24),
        }
    }

    /// Set the token lifetime.
    pub fn with_lifetime(mut self, lifetime: Duration) -> Self {
        self.lifetime = lifetime;
        self
    }

    /// Set the issuer.
    pub fn with_issuer(mut self, issuer: impl Into<String>) -> Self {
        self.issuer = issuer.into();
        self
    }
}

/// Generate a random alphanumeric secret suitable for HMAC signing.
pub fn generate_secret(length: usize) -> String {
    rand::thread_rng()
        .sample_iter(&rand::distributions::Alphanumeric)
        .take(length)
        .map(char::from)
        .collect()
}

/// Issues and validates API tokens.
pub struct TokenService {
    config: TokenConfig,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl std::fmt::Debug for TokenService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenService")
            .field("config", &self.config)
            .field("encoding_key", &"[REDACTED]")
            .field("decoding_key", &"[REDACTED]")
            .finish()
    }
}

impl TokenService {
    /// Create a token service.
    ///
    /// # Errors
    ///
    /// `ConfigError` if the secret is empty
    pub fn new(config: TokenConfig) -> AuthResult<Self> {
        if config.secret.is_empty() {
            return Err(AuthError::ConfigError(
                "Secret required for HMAC".to_string(),
            ));
        }
        let encoding_key = EncodingKey::from_secret(config.secret.as_bytes());
        let decoding_key = DecodingKey::from_secret(config.secret.as_bytes());
        Ok(Self {
            config,
            encoding_key,
            decoding_key,
        })
    }

    /// Create with a simple secret and default settings.
    pub fn with_secret(secret: impl Into<String>) -> AuthResult<Self> {
        Self::new(TokenConfig::new(secret))
    }

    /// Issue a token for a user.
    pub fn issue(&self, user: &User) -> AuthResult<String> {
        let claims =
            TokenClaims::for_user(user, self.config.lifetime).with_issuer(self.config.issuer.clone());
        self.encode_claims(&claims)
    }

    /// Encode existing claims.
    pub fn encode_claims(&self, claims: &TokenClaims) -> AuthResult<String> {
        let header = Header::new(Algorithm::HS256);
        encode(&header, claims, &self.encoding_key)
            .map_err(|e| AuthError::Internal(format!("Token encoding failed: {}", e)))
    }

    /// Validate and decode a token.
    pub fn validate(&self, token: &str) -> AuthResult<TokenClaims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[&self.config.issuer]);
        validation.validate_aud = false;
        validation.leeway = 0;

        let data = decode::<TokenClaims>(token, &self.decoding_key, &validation).map_err(|e| {
            match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::TokenExpired,
                jsonwebtoken::errors::ErrorKind::InvalidToken => {
                    AuthError::InvalidToken("Malformed token".to_string())
                }
                jsonwebtoken::errors::ErrorKind::InvalidSignature => {
                    AuthError::InvalidToken("Invalid signature".to_string())
                }
                jsonwebtoken::errors::ErrorKind::InvalidIssuer => {
                    AuthError::InvalidToken("Invalid issuer".to_string())
                }
                _ => AuthError::InvalidToken(e.to_string()),
            }
        })?;

        Ok(data.claims)
    }

    /// Get the configuration.
    pub fn config(&self) -> &TokenConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> TokenService {
        TokenService::with_secret("test-secret-that-is-long-enough").unwrap()
    }

    #[test]
    fn test_issue_and_validate() {
        let service = service();
        let user = User::new("alice", "alice@example.com").support();

        let token = service.issue(&user).unwrap();
        let claims = service.validate(&token).unwrap();

        assert_eq!(claims.user_id(), Some(user.id));
        assert_eq!(claims.username, "alice");
        assert!(claims.is_support);
    }

    #[test]
    fn test_expired_token() {
        let service = service();
        let user = User::new("alice", "alice@example.com");
        let mut claims = TokenClaims::for_user(&user, Duration::hours(1));
        claims.exp = chrono::Utc::now().timestamp() - 60;
        let token = service.encode_claims(&claims).unwrap();

        assert!(matches!(service.validate(&token), Err(AuthError::TokenExpired)));
    }

    #[test]
    fn test_wrong_secret_and_issuer() {
        let user = User::new("alice", "alice@example.com");
        let token = service().issue(&user).unwrap();

        let other = TokenService::with_secret("another-secret").unwrap();
        assert!(matches!(other.validate(&token), Err(AuthError::InvalidToken(_))));

        let foreign = TokenService::new(
            TokenConfig::new("test-secret-that-is-long-enough").with_issuer("elsewhere"),
        )
        .unwrap();
        let err = foreign.validate(&token).unwrap_err();
        assert_eq!(err.to_string(), "Invalid token: Invalid issuer");
    }

    #[test]
    fn test_empty_secret_rejected() {
        assert!(matches!(
            TokenService::with_secret(""),
            Err(AuthError::ConfigError(_))
        ));
        assert!(matches!(service().validate("garbage"), Err(AuthError::InvalidToken(_))));
    }

    #[test]
    fn test_generate_secret() {
        let secret = generate_secret(48);
        assert_eq!(secret.len(), 48);
        assert!(secret.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(secret, generate_secret(48));
    }
}
