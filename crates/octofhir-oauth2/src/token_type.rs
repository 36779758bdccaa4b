//! Access token types (RFC 6749 §7.1).
//!
//! Only `Bearer` (RFC 6750) is built in. The token type contributes the
//! `token_type` field of the token response and knows how a resource server
//! finds the token in a request.

use std::sync::Arc;

use axum::http::{HeaderMap, header};
use indexmap::IndexMap;

use crate::AuthResult;
use crate::error::AuthError;
use crate::http::RequestParameters;
use crate::types::DataBag;

/// An access token type.
pub trait TokenType: Send + Sync {
    /// Value of `token_type`.
    fn name(&self) -> &'static str;

    /// Parameters added to every token response of this type.
    fn additional_information(&self) -> DataBag {
        DataBag::new().with("token_type", self.name())
    }

    /// Extracts the token value presented to a resource server.
    fn find(&self, headers: &HeaderMap, params: &RequestParameters) -> Option<String>;
}

/// `Bearer` tokens (RFC 6750).
#[derive(Debug, Clone, Copy, Default)]
pub struct BearerToken;

impl TokenType for BearerToken {
    fn name(&self) -> &'static str {
        "Bearer"
    }

    fn find(&self, headers: &HeaderMap, params: &RequestParameters) -> Option<String> {
        let from_header = headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| {
                v.split_once(' ')
                    .filter(|(scheme, _)| scheme.eq_ignore_ascii_case("bearer"))
                    .map(|(_, token)| token.trim().to_string())
            })
            .filter(|token| !token.is_empty());

        from_header.or_else(|| params.get("access_token").map(str::to_string))
    }
}

/// Registered token types and the default one.
#[derive(Clone, Default)]
pub struct TokenTypeManager {
    token_types: IndexMap<&'static str, Arc<dyn TokenType>>,
    default: Option<&'static str>,
}

impl TokenTypeManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry with `Bearer` as default.
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut manager = Self::new();
        manager.add(Arc::new(BearerToken), true);
        manager
    }

    /// Registers a token type. The first one added becomes the default
    /// unless a later one is added with `is_default`.
    pub fn add(&mut self, token_type: Arc<dyn TokenType>, is_default: bool) {
        let name = token_type.name();
        self.token_types.insert(name, token_type);
        if is_default || self.default.is_none() {
            self.default = Some(name);
        }
    }

    /// Returns a registered token type.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::InvalidRequest` if the type is unknown.
    pub fn get(&self, name: &str) -> AuthResult<Arc<dyn TokenType>> {
        self.token_types.get(name).cloned().ok_or_else(|| {
            AuthError::invalid_request(format!(
                "Unsupported token type \"{name}\". Please use one of the following: {}.",
                self.list().join(", ")
            ))
        })
    }

    /// The type used when the request does not ask for one.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Internal` if nothing is registered.
    pub fn default_type(&self) -> AuthResult<Arc<dyn TokenType>> {
        self.default
            .and_then(|name| self.token_types.get(name).cloned())
            .ok_or_else(|| AuthError::internal("No token type is registered."))
    }

    /// Picks the type named by the `token_type` parameter, or the default.
    ///
    /// # Errors
    ///
    /// Returns an error if the requested type is unknown.
    pub fn resolve(&self, params: &RequestParameters) -> AuthResult<Arc<dyn TokenType>> {
        match params.get("token_type") {
            Some(name) => self.get(name),
            None => self.default_type(),
        }
    }

    #[must_use]
    pub fn list(&self) -> Vec<&'static str> {
        self.token_types.keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_bearer_from_header_or_body() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("bearer abc"));
        assert_eq!(
            BearerToken.find(&headers, &RequestParameters::default()),
            Some("abc".to_string())
        );

        let params = RequestParameters::from_iter([("access_token", "xyz")]);
        assert_eq!(BearerToken.find(&HeaderMap::new(), &params), Some("xyz".to_string()));

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic Zm9vOmJhcg=="));
        assert_eq!(BearerToken.find(&headers, &RequestParameters::default()), None);
    }

    #[test]
    fn test_manager_resolves_default() {
        let manager = TokenTypeManager::with_defaults();
        let token_type = manager.resolve(&RequestParameters::default()).unwrap();
        assert_eq!(
            token_type.additional_information().get_str("token_type"),
            Some("Bearer")
        );

        let params = RequestParameters::from_iter([("token_type", "MAC")]);
        assert_eq!(manager.resolve(&params).err().unwrap().error_code(), "invalid_request");
    }

    #[test]
    fn test_empty_manager() {
        let err = TokenTypeManager::new().default_type().err().unwrap();
        assert_eq!(err.error_code(), "server_error");
    }
}
