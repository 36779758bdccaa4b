//! End-user interaction hooks (OIDC Core §3.1.2.1 `prompt`).
//!
//! Hooks run in ascending priority. Each one either finds its concern
//! satisfied or suspends the request, naming the UI the browser is sent to.
//! With `prompt=none` a hook that cannot proceed fails instead of
//! suspending.

use std::sync::Arc;

use async_trait::async_trait;
use axum::http::HeaderMap;
use time::OffsetDateTime;

use super::AuthorizationRequest;
use crate::AuthResult;
use crate::error::AuthError;
use crate::storage::{ConsentRepository, UserAccountDiscovery};

/// Result of a hook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookOutcome {
    /// Proceed with the next hook.
    Continue,
    /// Store the request and send the browser to this URI.
    Suspend(String),
}

/// One interaction concern.
#[async_trait]
pub trait AuthorizationHook: Send + Sync {
    /// Lower runs first.
    fn priority(&self) -> i32;

    /// Checks the concern.
    ///
    /// # Errors
    ///
    /// Returns the OAuth error to deliver to the client.
    async fn handle(
        &self,
        request: &mut AuthorizationRequest,
        headers: &HeaderMap,
    ) -> AuthResult<HookOutcome>;
}

async fn discover_user(
    discovery: &dyn UserAccountDiscovery,
    request: &mut AuthorizationRequest,
    headers: &HeaderMap,
) -> AuthResult<()> {
    if request.user_account().is_some() {
        return Ok(());
    }
    let found = discovery.find(request, headers).await?;
    if let Some(user) = found {
        tracing::debug!(user_account_id = %user.id, "End user discovered");
        request.set_user_account(user, None);
    }
    Ok(())
}

/// `prompt=none`: the end user must already be logged in.
pub struct NonePromptHook {
    discovery: Arc<dyn UserAccountDiscovery>,
}

impl NonePromptHook {
    #[must_use]
    pub fn new(discovery: Arc<dyn UserAccountDiscovery>) -> Self {
        Self { discovery }
    }
}

#[async_trait]
impl AuthorizationHook for NonePromptHook {
    fn priority(&self) -> i32 {
        0
    }

    async fn handle(
        &self,
        request: &mut AuthorizationRequest,
        headers: &HeaderMap,
    ) -> AuthResult<HookOutcome> {
        if !request.has_prompt("none") {
            return Ok(HookOutcome::Continue);
        }
        discover_user(self.discovery.as_ref(), request, headers).await?;
        if request.user_account().is_none() {
            return Err(AuthError::login_required(
                "The resource owner is not logged in.",
            ));
        }
        Ok(HookOutcome::Continue)
    }
}

/// `prompt=select_account`.
pub struct SelectAccountHook {
    uri: String,
}

impl SelectAccountHook {
    #[must_use]
    pub fn new(uri: impl Into<String>) -> Self {
        Self { uri: uri.into() }
    }
}

#[async_trait]
impl AuthorizationHook for SelectAccountHook {
    fn priority(&self) -> i32 {
        10
    }

    async fn handle(
        &self,
        request: &mut AuthorizationRequest,
        _headers: &HeaderMap,
    ) -> AuthResult<HookOutcome> {
        if request.has_prompt("select_account") && !request.is_account_selected() {
            return Ok(HookOutcome::Suspend(self.uri.clone()));
        }
        Ok(HookOutcome::Continue)
    }
}

/// The end user is logged in, recently enough for `prompt=login` and
/// `max_age`.
pub struct LoginHook {
    discovery: Arc<dyn UserAccountDiscovery>,
    uri: String,
}

impl LoginHook {
    #[must_use]
    pub fn new(discovery: Arc<dyn UserAccountDiscovery>, uri: impl Into<String>) -> Self {
        Self {
            discovery,
            uri: uri.into(),
        }
    }

    fn needs_reauthentication(request: &AuthorizationRequest, now: OffsetDateTime) -> bool {
        let authenticated_at = request.user_authenticated_at();
        if request.has_prompt("login")
            && authenticated_at.is_none_or(|at| at < request.created_at())
        {
            return true;
        }
        match request.max_age() {
            Some(max_age) => {
                authenticated_at.is_none_or(|at| (now - at).whole_seconds() > max_age)
            }
            None => false,
        }
    }
}

#[async_trait]
impl AuthorizationHook for LoginHook {
    fn priority(&self) -> i32 {
        20
    }

    async fn handle(
        &self,
        request: &mut AuthorizationRequest,
        headers: &HeaderMap,
    ) -> AuthResult<HookOutcome> {
        discover_user(self.discovery.as_ref(), request, headers).await?;

        let logged_in = request.user_account().is_some()
            && !Self::needs_reauthentication(request, OffsetDateTime::now_utc());
        if logged_in {
            return Ok(HookOutcome::Continue);
        }
        if request.has_prompt("none") {
            return Err(AuthError::login_required(
                "The resource owner must authenticate again.",
            ));
        }
        Ok(HookOutcome::Suspend(self.uri.clone()))
    }
}

/// The end user consented to the requested scope.
pub struct ConsentHook {
    consents: Arc<dyn ConsentRepository>,
    uri: String,
}

impl ConsentHook {
    #[must_use]
    pub fn new(consents: Arc<dyn ConsentRepository>, uri: impl Into<String>) -> Self {
        Self {
            consents,
            uri: uri.into(),
        }
    }
}

#[async_trait]
impl AuthorizationHook for ConsentHook {
    fn priority(&self) -> i32 {
        30
    }

    async fn handle(
        &self,
        request: &mut AuthorizationRequest,
        _headers: &HeaderMap,
    ) -> AuthResult<HookOutcome> {
        let user_id = request
            .user_account()
            .map(|u| u.id.clone())
            .ok_or_else(|| AuthError::internal("The user account is not set."))?;
        let client_id = request.client().client_id().clone();
        let scope = request.scope();

        match request.consent() {
            Some(false) => {
                tracing::info!(
                    client_id = %client_id,
                    user_account_id = %user_id,
                    "Consent denied"
                );
                Err(AuthError::access_denied(
                    "The resource owner denied access to the client.",
                ))
            }
            Some(true) => {
                self.consents.save_consent(&user_id, &client_id, &scope).await?;
                Ok(HookOutcome::Continue)
            }
            None => {
                let granted = self.consents.has_consent(&user_id, &client_id, &scope).await?;
                if granted && !request.has_prompt("consent") {
                    Ok(HookOutcome::Continue)
                } else if request.has_prompt("none") {
                    Err(AuthError::consent_required(
                        "The resource owner consent is required.",
                    ))
                } else {
                    Ok(HookOutcome::Suspend(self.uri.clone()))
                }
            }
        }
    }
}

/// Hooks sorted by priority.
#[derive(Clone, Default)]
pub struct AuthorizationHookManager {
    hooks: Vec<Arc<dyn AuthorizationHook>>,
}

impl AuthorizationHookManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a hook. Hooks of equal priority keep insertion order.
    pub fn add(&mut self, hook: Arc<dyn AuthorizationHook>) {
        self.hooks.push(hook);
        self.hooks.sort_by_key(|h| h.priority());
    }

    /// Runs the hooks until one suspends.
    ///
    /// # Errors
    ///
    /// Propagates the first hook failure.
    pub async fn run(
        &self,
        request: &mut AuthorizationRequest,
        headers: &HeaderMap,
    ) -> AuthResult<HookOutcome> {
        for hook in &self.hooks {
            if let HookOutcome::Suspend(uri) = hook.handle(request, headers).await? {
                return Ok(HookOutcome::Suspend(uri));
            }
        }
        Ok(HookOutcome::Continue)
    }
}
