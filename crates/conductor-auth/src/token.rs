//! Token extraction from requests.

use std::collections::HashMap;

use crate::error::{AuthError, AuthResult};

/// Query parameter read when no `Authorization` header is present.
pub const TOKEN_KEY: &str = "x-auth-token";

/// Header keyword introducing a token.
pub const TOKEN_KEYWORD: &str = "token";

/// Extract the API token from the `Authorization` header or the
/// `x-auth-token` query parameter.
///
/// # Returns
///
/// `Ok(None)` when the request does not use token authentication
///
/// # Errors
///
/// - `NoCredentials` for a bare `Token` keyword
/// - `TokenContainsSpaces` when more than one value follows the keyword
///
/// # Example
///
/// ```
/// use conductor_auth::extract_token;
/// use std::collections::HashMap;
///
/// let none = HashMap::new();
/// assert_eq!(extract_token(Some("Token abc123"), &none).unwrap().as_deref(), Some("abc123"));
/// assert_eq!(extract_token(Some("Basic dXNlcg=="), &none).unwrap(), None);
///
/// let query = HashMap::from([("x-auth-token".to_string(), "token abc123".to_string())]);
/// assert_eq!(extract_token(None, &query).unwrap().as_deref(), Some("abc123"));
/// ```
pub fn extract_token(
    authorization: Option<&str>,
    query: &HashMap<String, String>,
) -> AuthResult<Option<String>> {
    let value = match authorization.filter(|h| !h.is_empty()) {
        Some(header) => header,
        None => query.get(TOKEN_KEY).map(String::as_str).unwrap_or(""),
    };

    let parts: Vec<&str> = value.split_whitespace().collect();
    match parts.as_slice() {
        [] => Ok(None),
        [keyword, ..] if !keyword.eq_ignore_ascii_case(TOKEN_KEYWORD) => Ok(None),
        [_] => Err(AuthError::NoCredentials),
        [_, token] => Ok(Some((*token).to_string())),
        _ => Err(AuthError::TokenContainsSpaces),
    }
}
