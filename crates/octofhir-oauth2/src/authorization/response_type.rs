//! Response types (RFC 6749 §3.1.1).

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use indexmap::IndexMap;
use time::OffsetDateTime;

use super::AuthorizationRequest;
use crate::AuthResult;
use crate::error::AuthError;
use crate::storage::{AccessTokenRepository, AuthorizationCodeRepository};
use crate::types::{DataBag, NewAccessToken, NewAuthorizationCode, UserAccount};

/// What the authorization endpoint hands back once the request is granted.
#[async_trait]
pub trait ResponseType: fmt::Debug + Send + Sync {
    /// Value of the `response_type` parameter.
    fn name(&self) -> &'static str;

    /// Grant types the issued artifact is exchanged with.
    fn associated_grant_types(&self) -> &'static [&'static str] {
        &[]
    }

    /// Response mode used when the client does not choose one.
    fn response_mode(&self) -> &'static str {
        "query"
    }

    /// Issues the artifact and adds it to the response parameters.
    ///
    /// # Errors
    ///
    /// Returns an error if the artifact cannot be issued.
    async fn process(&self, request: &mut AuthorizationRequest) -> AuthResult<()>;
}

fn authorized_user(request: &AuthorizationRequest) -> AuthResult<UserAccount> {
    request
        .user_account()
        .cloned()
        .ok_or_else(|| AuthError::internal("The user account is not set."))
}

/// `code`: issues an authorization code.
pub struct CodeResponseType {
    codes: Arc<dyn AuthorizationCodeRepository>,
    lifetime: Duration,
}

impl CodeResponseType {
    #[must_use]
    pub fn new(codes: Arc<dyn AuthorizationCodeRepository>, lifetime: Duration) -> Self {
        Self { codes, lifetime }
    }
}

impl fmt::Debug for CodeResponseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CodeResponseType")
            .field("lifetime", &self.lifetime)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ResponseType for CodeResponseType {
    fn name(&self) -> &'static str {
        "code"
    }

    fn associated_grant_types(&self) -> &'static [&'static str] {
        &["authorization_code"]
    }

    async fn process(&self, request: &mut AuthorizationRequest) -> AuthResult<()> {
        let user = authorized_user(request)?;
        let client = request.client();

        let mut parameters = DataBag::new();
        if let Some(scope) = request.get("scope") {
            parameters = parameters.with("scope", scope);
        }
        let issue_refresh_token = request.scope().iter().any(|s| s == "offline_access")
            && client.is_grant_type_allowed("refresh_token");

        let id = self.codes.generate_id();
        let recorded = self.codes.create(NewAuthorizationCode {
            id: id.clone(),
            client_id: client.client_id().clone(),
            user_account_id: user.id.clone(),
            query_parameters: request.query_parameters().to_data_bag(),
            redirect_uri: request
                .get("redirect_uri")
                .map(str::to_string)
                .or_else(|| request.redirect_uri().map(|uri| uri.to_string())),
            expires_at: OffsetDateTime::now_utc() + self.lifetime,
            parameters,
            metadata: DataBag::new(),
            resource_server_id: None,
            issue_refresh_token,
        });
        self.codes.save(recorded).await?;

        tracing::info!(
            client_id = %client.client_id(),
            user_account_id = %user.id,
            issue_refresh_token,
            "Authorization code issued"
        );
        request.set_response_parameter("code", id.into_inner());
        Ok(())
    }
}

/// `token`: the implicit grant, issuing an access token directly.
pub struct TokenResponseType {
    access_tokens: Arc<dyn AccessTokenRepository>,
    lifetime: Duration,
}

impl TokenResponseType {
    #[must_use]
    pub fn new(access_tokens: Arc<dyn AccessTokenRepository>, lifetime: Duration) -> Self {
        Self {
            access_tokens,
            lifetime,
        }
    }
}

impl fmt::Debug for TokenResponseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenResponseType")
            .field("lifetime", &self.lifetime)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ResponseType for TokenResponseType {
    fn name(&self) -> &'static str {
        "token"
    }

    fn associated_grant_types(&self) -> &'static [&'static str] {
        &["implicit"]
    }

    fn response_mode(&self) -> &'static str {
        "fragment"
    }

    async fn process(&self, request: &mut AuthorizationRequest) -> AuthResult<()> {
        let user = authorized_user(request)?;
        let client_id = request.client().client_id().clone();
        let now = OffsetDateTime::now_utc();

        let mut parameters = DataBag::new().with("token_type", "Bearer");
        if let Some(scope) = request.get("scope") {
            parameters = parameters.with("scope", scope);
        }

        let (token, events) = self.access_tokens.create(NewAccessToken {
            id: self.access_tokens.generate_id(),
            client_id: client_id.clone(),
            resource_owner_id: user.id.clone().into(),
            resource_server_id: None,
            expires_at: Some(now + self.lifetime),
            parameters,
            metadata: DataBag::new(),
        });
        self.access_tokens.save((token.clone(), events)).await?;

        tracing::info!(
            client_id = %client_id,
            user_account_id = %user.id,
            "Access token issued by implicit grant"
        );
        for (key, value) in token.response_data(now) {
            request.set_response_parameter(key, value);
        }
        Ok(())
    }
}

/// `none`: nothing is issued (OAuth 2.0 Multiple Response Types §4).
#[derive(Debug, Clone, Copy, Default)]
pub struct NoneResponseType;

#[async_trait]
impl ResponseType for NoneResponseType {
    fn name(&self) -> &'static str {
        "none"
    }

    async fn process(&self, _request: &mut AuthorizationRequest) -> AuthResult<()> {
        Ok(())
    }
}

/// Registered response types, keyed by name.
#[derive(Debug, Clone, Default)]
pub struct ResponseTypeManager {
    response_types: IndexMap<&'static str, Arc<dyn ResponseType>>,
}

impl ResponseTypeManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a response type, replacing one with the same name.
    pub fn add(&mut self, response_type: Arc<dyn ResponseType>) {
        self.response_types
            .insert(response_type.name(), response_type);
    }

    #[must_use]
    pub fn has(&self, name: &str) -> bool {
        self.response_types.contains_key(name)
    }

    /// Returns a registered response type.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::UnsupportedResponseType` if it is unknown.
    pub fn get(&self, name: &str) -> AuthResult<Arc<dyn ResponseType>> {
        self.response_types.get(name).cloned().ok_or_else(|| {
            AuthError::unsupported_response_type(format!(
                "The response type \"{name}\" is not supported by this server."
            ))
        })
    }

    #[must_use]
    pub fn list(&self) -> Vec<&'static str> {
        self.response_types.keys().copied().collect()
    }
}
