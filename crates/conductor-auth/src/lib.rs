//! # Conductor Auth
//!
//! Token authentication for the Conductor API.
//!
//! ## Overview
//!
//! The conductor-auth crate handles:
//! - **Token extraction**: `Authorization: Token <key>` or the `x-auth-token`
//!   query parameter
//! - **Token service**: HMAC-signed JWT issue and validation
//! - **Authentication**: Resolving the token to an active user and recording
//!   that user on the request span
//!
//! ## Usage
//!
//! ```rust,no_run
//! use conductor_auth::{Authenticator, TokenService};
//! use conductor_structure::User;
//! use std::collections::HashMap;
//!
//! async fn authenticate_example() {
//!     let user = User::new("alice", "alice@example.com");
//!     let tokens = TokenService::with_secret("change-me").unwrap();
//!     let token = tokens.issue(&user).unwrap();
//!
//!     let directory = HashMap::from([(user.id, user)]);
//!     let auth = Authenticator::new(tokens, directory);
//!
//!     let header = format!("Token {}", token);
//!     let resolved = auth.authenticate(Some(&header), &HashMap::new()).await.unwrap();
//!     assert!(resolved.is_some());
//! }
//! ```

pub mod authenticator;
pub mod claims;
pub mod error;
pub mod jwt;
pub mod token;

pub use authenticator::{request_span, AuthenticatedUser, Authenticator, UserDirectory};
pub use claims::{TokenClaims, DEFAULT_ISSUER};
pub use error::{AuthError, AuthResult};
pub use jwt::{generate_secret, TokenConfig, TokenService};
pub use token::{extract_token, TOKEN_KEY};
