//! `token_type_hint` dispatch for introspection (RFC 7662) and revocation
//! (RFC 7009).
//!
//! The hinted type is looked up first; when the token is not found there,
//! every other registered type is tried in registration order.

use std::sync::Arc;

use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json::{Map, Value};
use time::OffsetDateTime;

use crate::AuthResult;
use crate::error::AuthError;
use crate::storage::{AccessTokenRepository, AuthorizationCodeRepository, RefreshTokenRepository};
use crate::types::{
    AccessToken, AccessTokenId, AuthorizationCode, AuthorizationCodeId, ClientId, RefreshToken,
    RefreshTokenId, ResourceServerId,
};

/// A token found by value.
#[derive(Debug, Clone)]
pub enum Token {
    Access(AccessToken),
    Refresh(RefreshToken),
    Code(AuthorizationCode),
}

impl Token {
    /// Client the token was issued to.
    #[must_use]
    pub fn client_id(&self) -> &ClientId {
        match self {
            Self::Access(token) => token.client_id(),
            Self::Refresh(token) => token.client_id(),
            Self::Code(code) => code.client_id(),
        }
    }

    /// Resource server the token is restricted to.
    #[must_use]
    pub fn resource_server_id(&self) -> Option<&ResourceServerId> {
        match self {
            Self::Access(token) => token.resource_server_id(),
            Self::Refresh(token) => token.resource_server_id(),
            Self::Code(code) => code.resource_server_id(),
        }
    }

    /// Whether the token can still be used at `now`.
    #[must_use]
    pub fn is_active(&self, now: OffsetDateTime) -> bool {
        match self {
            Self::Access(token) => token.is_active(now),
            Self::Refresh(token) => token.is_active(now),
            Self::Code(code) => !code.is_used() && !code.is_revoked() && !code.has_expired(now),
        }
    }

    #[must_use]
    pub fn introspection_claims(&self) -> Map<String, Value> {
        match self {
            Self::Access(token) => token.introspection_claims(),
            Self::Refresh(token) => token.introspection_claims(),
            Self::Code(code) => code.introspection_claims(),
        }
    }
}

/// A token type that can be introspected and revoked.
#[async_trait]
pub trait TokenTypeHint: Send + Sync {
    /// Value of `token_type_hint`.
    fn hint(&self) -> &'static str;

    /// Looks the token up by value.
    ///
    /// # Errors
    ///
    /// Propagates repository errors.
    async fn find(&self, token: &str) -> AuthResult<Option<Token>>;

    /// Claims returned for an active token.
    fn introspect(&self, token: &Token) -> Map<String, Value> {
        token.introspection_claims()
    }

    /// Revokes the token.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Internal` if the token is of another type.
    async fn revoke(&self, token: Token) -> AuthResult<()>;
}

fn mismatch(hint: &str) -> AuthError {
    AuthError::internal(format!("The token is not handled by the \"{hint}\" hint."))
}

pub struct AccessTokenHint {
    access_tokens: Arc<dyn AccessTokenRepository>,
}

impl AccessTokenHint {
    #[must_use]
    pub fn new(access_tokens: Arc<dyn AccessTokenRepository>) -> Self {
        Self { access_tokens }
    }
}

#[async_trait]
impl TokenTypeHint for AccessTokenHint {
    fn hint(&self) -> &'static str {
        "access_token"
    }

    async fn find(&self, token: &str) -> AuthResult<Option<Token>> {
        Ok(self
            .access_tokens
            .find(&AccessTokenId::new(token))
            .await?
            .map(Token::Access))
    }

    async fn revoke(&self, token: Token) -> AuthResult<()> {
        let Token::Access(token) = token else {
            return Err(mismatch(self.hint()));
        };
        self.access_tokens.save(token.mark_as_revoked()).await
    }
}

pub struct RefreshTokenHint {
    refresh_tokens: Arc<dyn RefreshTokenRepository>,
}

impl RefreshTokenHint {
    #[must_use]
    pub fn new(refresh_tokens: Arc<dyn RefreshTokenRepository>) -> Self {
        Self { refresh_tokens }
    }
}

#[async_trait]
impl TokenTypeHint for RefreshTokenHint {
    fn hint(&self) -> &'static str {
        "refresh_token"
    }

    async fn find(&self, token: &str) -> AuthResult<Option<Token>> {
        Ok(self
            .refresh_tokens
            .find(&RefreshTokenId::new(token))
            .await?
            .map(Token::Refresh))
    }

    async fn revoke(&self, token: Token) -> AuthResult<()> {
        let Token::Refresh(token) = token else {
            return Err(mismatch(self.hint()));
        };
        self.refresh_tokens.save(token.mark_as_revoked()).await
    }
}

pub struct AuthorizationCodeHint {
    codes: Arc<dyn AuthorizationCodeRepository>,
}

impl AuthorizationCodeHint {
    #[must_use]
    pub fn new(codes: Arc<dyn AuthorizationCodeRepository>) -> Self {
        Self { codes }
    }
}

#[async_trait]
impl TokenTypeHint for AuthorizationCodeHint {
    fn hint(&self) -> &'static str {
        "auth_code"
    }

    async fn find(&self, token: &str) -> AuthResult<Option<Token>> {
        Ok(self
            .codes
            .find(&AuthorizationCodeId::new(token))
            .await?
            .map(Token::Code))
    }

    async fn revoke(&self, token: Token) -> AuthResult<()> {
        let Token::Code(code) = token else {
            return Err(mismatch(self.hint()));
        };
        self.codes.save(code.mark_as_revoked()).await
    }
}

/// Registered hints, keyed by name.
#[derive(Clone, Default)]
pub struct TokenTypeHintManager {
    hints: IndexMap<&'static str, Arc<dyn TokenTypeHint>>,
}

impl TokenTypeHintManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, hint: Arc<dyn TokenTypeHint>) {
        self.hints.insert(hint.hint(), hint);
    }

    #[must_use]
    pub fn list(&self) -> Vec<&'static str> {
        self.hints.keys().copied().collect()
    }

    /// Finds `token`, trying `hint` first.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::UnsupportedTokenType` if `hint` is not registered.
    pub async fn find(
        &self,
        token: &str,
        hint: Option<&str>,
    ) -> AuthResult<Option<(Arc<dyn TokenTypeHint>, Token)>> {
        let mut order = Vec::with_capacity(self.hints.len());
        if let Some(hint) = hint {
            let preferred = self.hints.get(hint).ok_or_else(|| {
                AuthError::unsupported_token_type(format!(
                    "Unsupported token type hint \"{hint}\". Please use one of the following: {}.",
                    self.list().join(", ")
                ))
            })?;
            order.push(preferred);
        }
        order.extend(
            self.hints
                .iter()
                .filter(|(name, _)| Some(**name) != hint)
                .map(|(_, h)| h),
        );

        for candidate in order {
            if let Some(found) = candidate.find(token).await? {
                return Ok(Some((Arc::clone(candidate), found)));
            }
        }
        Ok(None)
    }
}
