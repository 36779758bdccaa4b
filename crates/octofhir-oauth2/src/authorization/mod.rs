//! Authorization endpoint request model (RFC 6749 §4.1.1, OIDC Core §3.1.2).
//!
//! An [`AuthorizationRequest`] is built from the query string, completed by
//! the [parameter checkers](checker), then driven through the
//! [prompt hooks](hooks). When a hook needs the end user (login, account
//! selection, consent) the request is suspended in
//! [`AuthorizationRequestStorage`](crate::storage::AuthorizationRequestStorage)
//! under its `authorization_id`; the external UI records the outcome on the
//! stored request and sends the browser back to the endpoint.

pub mod checker;
pub mod hooks;
pub mod response_mode;
pub mod response_type;

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use time::OffsetDateTime;
use url::Url;
use uuid::Uuid;

use crate::AuthResult;
use crate::error::{AuthError, AuthorizationFailure};
use crate::http::RequestParameters;
use crate::types::{Client, DataBag, UserAccount};

use response_mode::ResponseMode;
use response_type::ResponseType;

pub use checker::{ParameterChecker, ParameterCheckerManager};
pub use hooks::{AuthorizationHook, AuthorizationHookManager, HookOutcome};
pub use response_mode::ResponseModeManager;
pub use response_type::ResponseTypeManager;

/// `prompt` values defined by OIDC Core §3.1.2.1.
pub const PROMPT_VALUES: [&str; 4] = ["none", "login", "consent", "select_account"];

/// `display` values defined by OIDC Core §3.1.2.1.
pub const DISPLAY_VALUES: [&str; 4] = ["page", "popup", "touch", "wap"];

/// An authorization request in progress.
#[derive(Debug, Clone)]
pub struct AuthorizationRequest {
    authorization_id: String,
    client: Client,
    query_parameters: RequestParameters,
    redirect_uri: Option<Url>,
    response_type: Option<Arc<dyn ResponseType>>,
    response_mode: Option<Arc<dyn ResponseMode>>,
    response_parameters: DataBag,
    user_account: Option<UserAccount>,
    user_authenticated_at: Option<OffsetDateTime>,
    account_selected: bool,
    consent: Option<bool>,
    created_at: OffsetDateTime,
}

impl AuthorizationRequest {
    /// Starts a request for `client`.
    #[must_use]
    pub fn new(client: Client, query_parameters: RequestParameters) -> Self {
        Self {
            authorization_id: Uuid::new_v4().to_string(),
            client,
            query_parameters,
            redirect_uri: None,
            response_type: None,
            response_mode: None,
            response_parameters: DataBag::new(),
            user_account: None,
            user_authenticated_at: None,
            account_selected: false,
            consent: None,
            created_at: OffsetDateTime::now_utc(),
        }
    }

    /// Key under which a suspended request is stored.
    #[must_use]
    pub fn authorization_id(&self) -> &str {
        &self.authorization_id
    }

    #[must_use]
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// The query parameters as received.
    #[must_use]
    pub fn query_parameters(&self) -> &RequestParameters {
        &self.query_parameters
    }

    /// Returns a query parameter.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.query_parameters.get(key)
    }

    #[must_use]
    pub fn created_at(&self) -> OffsetDateTime {
        self.created_at
    }

    /// Redirect URI validated against the client registration.
    #[must_use]
    pub fn redirect_uri(&self) -> Option<&Url> {
        self.redirect_uri.as_ref()
    }

    pub fn set_redirect_uri(&mut self, redirect_uri: Url) {
        self.redirect_uri = Some(redirect_uri);
    }

    /// The resolved response type.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Internal` if it has not been resolved yet.
    pub fn response_type(&self) -> AuthResult<&Arc<dyn ResponseType>> {
        self.response_type
            .as_ref()
            .ok_or_else(|| AuthError::internal("The response type has not been resolved."))
    }

    pub fn set_response_type(&mut self, response_type: Arc<dyn ResponseType>) {
        self.response_type = Some(response_type);
    }

    /// The resolved response mode.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Internal` if it has not been resolved yet.
    pub fn response_mode(&self) -> AuthResult<&Arc<dyn ResponseMode>> {
        self.response_mode
            .as_ref()
            .ok_or_else(|| AuthError::internal("The response mode has not been resolved."))
    }

    pub fn set_response_mode(&mut self, response_mode: Arc<dyn ResponseMode>) {
        self.response_mode = Some(response_mode);
    }

    /// Parameters sent back to the client.
    #[must_use]
    pub fn response_parameters(&self) -> &DataBag {
        &self.response_parameters
    }

    pub fn set_response_parameter(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.response_parameters = self.response_parameters.with(key, value);
    }

    /// The end user the request is authorized for.
    #[must_use]
    pub fn user_account(&self) -> Option<&UserAccount> {
        self.user_account.as_ref()
    }

    /// When the end user last authenticated, if known.
    #[must_use]
    pub fn user_authenticated_at(&self) -> Option<OffsetDateTime> {
        self.user_authenticated_at
    }

    /// Records the end user. The login UI passes the authentication time.
    pub fn set_user_account(
        &mut self,
        user_account: UserAccount,
        authenticated_at: Option<OffsetDateTime>,
    ) {
        self.user_account = Some(user_account);
        self.user_authenticated_at = authenticated_at;
    }

    #[must_use]
    pub fn is_account_selected(&self) -> bool {
        self.account_selected
    }

    pub fn select_account(&mut self) {
        self.account_selected = true;
    }

    /// The consent decision recorded by the UI, if any.
    #[must_use]
    pub fn consent(&self) -> Option<bool> {
        self.consent
    }

    pub fn allow(&mut self) {
        self.consent = Some(true);
    }

    pub fn deny(&mut self) {
        self.consent = Some(false);
    }

    /// The `prompt` values.
    #[must_use]
    pub fn prompt(&self) -> Vec<&str> {
        self.get("prompt")
            .map(|p| p.split_whitespace().collect())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn has_prompt(&self, value: &str) -> bool {
        self.prompt().contains(&value)
    }

    /// The requested scope tokens.
    #[must_use]
    pub fn scope(&self) -> Vec<String> {
        self.get("scope")
            .map(|s| s.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn state(&self) -> Option<&str> {
        self.get("state")
    }

    /// `max_age` in seconds, ignored when it is not a number.
    #[must_use]
    pub fn max_age(&self) -> Option<i64> {
        self.get("max_age").and_then(|v| v.parse().ok())
    }

    /// Returns `true` if a suspended request outlived `lifetime`.
    #[must_use]
    pub fn has_expired(&self, now: OffsetDateTime, lifetime: Duration) -> bool {
        self.created_at + lifetime <= now
    }

    /// Wraps `error` with the redirect context resolved so far.
    #[must_use]
    pub fn failure(&self, error: AuthError) -> AuthorizationFailure {
        AuthorizationFailure {
            error,
            client_id: Some(self.client.client_id().to_string()),
            redirect_uri: self.redirect_uri.clone(),
            state: self.state().map(str::to_string),
            response_mode: self.response_mode.clone(),
        }
    }
}
