//! Authorization request parameter checks.
//!
//! Checkers run in registration order and fill in the request as they go,
//! so a failure raised after the redirect URI checker can be delivered to
//! the client by redirect.

use std::sync::Arc;

use url::Url;

use super::{AuthorizationRequest, DISPLAY_VALUES, PROMPT_VALUES};
use super::response_mode::ResponseModeManager;
use super::response_type::ResponseTypeManager;
use crate::AuthResult;
use crate::config::AuthorizationConfig;
use crate::error::{AuthError, AuthorizationFailure};
use crate::pkce::PkceMethodManager;

/// One validation step of the authorization request.
pub trait ParameterChecker: Send + Sync {
    /// Validates the request, recording what it resolves.
    ///
    /// # Errors
    ///
    /// Returns the OAuth error to report to the client.
    fn check(&self, request: &mut AuthorizationRequest) -> AuthResult<()>;
}

/// `response_type` is present, registered and allowed for the client.
pub struct ResponseTypeChecker {
    response_types: ResponseTypeManager,
}

impl ResponseTypeChecker {
    #[must_use]
    pub fn new(response_types: ResponseTypeManager) -> Self {
        Self { response_types }
    }
}

impl ParameterChecker for ResponseTypeChecker {
    fn check(&self, request: &mut AuthorizationRequest) -> AuthResult<()> {
        let name = request
            .get("response_type")
            .ok_or_else(|| AuthError::missing_parameter("response_type"))?
            .to_string();
        let response_type = self.response_types.get(&name)?;
        if !request.client().is_response_type_allowed(&name) {
            return Err(AuthError::unauthorized_client(format!(
                "The response type \"{name}\" is not allowed for this client."
            )));
        }
        request.set_response_type(response_type);
        Ok(())
    }
}

/// Resolves the response mode.
///
/// The `response_mode` parameter is honored only when the policy allows it;
/// otherwise the response type default applies.
pub struct ResponseModeChecker {
    response_modes: ResponseModeManager,
    allow_parameter: bool,
}

impl ResponseModeChecker {
    #[must_use]
    pub fn new(response_modes: ResponseModeManager, allow_parameter: bool) -> Self {
        Self {
            response_modes,
            allow_parameter,
        }
    }
}

impl ParameterChecker for ResponseModeChecker {
    fn check(&self, request: &mut AuthorizationRequest) -> AuthResult<()> {
        let default_mode = request.response_type()?.response_mode();
        let name = match request.get("response_mode") {
            Some(explicit) if self.allow_parameter => explicit.to_string(),
            Some(explicit) => {
                tracing::debug!(response_mode = explicit, "Ignoring response_mode parameter");
                default_mode.to_string()
            }
            None => default_mode.to_string(),
        };
        let response_mode = self.response_modes.get(&name)?;
        request.set_response_mode(response_mode);
        Ok(())
    }
}

/// `redirect_uri` is an absolute URI without fragment, registered for the
/// client when the client registered any.
#[derive(Debug, Clone, Copy, Default)]
pub struct RedirectUriChecker;

impl ParameterChecker for RedirectUriChecker {
    fn check(&self, request: &mut AuthorizationRequest) -> AuthResult<()> {
        let registered = request.client().redirect_uris();

        let redirect_uri = match request.get("redirect_uri") {
            Some(raw) => {
                let uri = Url::parse(raw).map_err(|_| {
                    AuthError::invalid_request(
                        "The parameter \"redirect_uri\" must be a valid URI.",
                    )
                })?;
                if uri.fragment().is_some() {
                    return Err(AuthError::invalid_request(
                        "The parameter \"redirect_uri\" must not contain a fragment.",
                    ));
                }
                if !registered.is_empty() && !registered.iter().any(|r| r == raw) {
                    return Err(AuthError::invalid_request(
                        "The parameter \"redirect_uri\" is not registered for this client.",
                    ));
                }
                uri
            }
            None => match registered.as_slice() {
                [single] => Url::parse(single).map_err(|e| {
                    AuthError::internal_with_source("The registered redirect URI is invalid", e)
                })?,
                [] => return Err(AuthError::missing_parameter("redirect_uri")),
                _ => {
                    return Err(AuthError::invalid_request(
                        "The parameter \"redirect_uri\" is mandatory when several redirect URIs are registered.",
                    ));
                }
            },
        };

        request.set_redirect_uri(redirect_uri);
        Ok(())
    }
}

/// Echoes `state` back to the client.
#[derive(Debug, Clone, Copy, Default)]
pub struct StateChecker;

impl ParameterChecker for StateChecker {
    fn check(&self, request: &mut AuthorizationRequest) -> AuthResult<()> {
        if let Some(state) = request.state().map(str::to_string) {
            request.set_response_parameter("state", state);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DisplayChecker;

impl ParameterChecker for DisplayChecker {
    fn check(&self, request: &mut AuthorizationRequest) -> AuthResult<()> {
        match request.get("display") {
            Some(display) if !DISPLAY_VALUES.contains(&display) => {
                Err(AuthError::invalid_request(format!(
                    "Invalid parameter \"display\". Allowed values are {}.",
                    DISPLAY_VALUES.join(", ")
                )))
            }
            _ => Ok(()),
        }
    }
}

/// `prompt` values are known and `none` is never combined.
#[derive(Debug, Clone, Copy, Default)]
pub struct PromptChecker;

impl ParameterChecker for PromptChecker {
    fn check(&self, request: &mut AuthorizationRequest) -> AuthResult<()> {
        let prompt = request.prompt();
        if let Some(unknown) = prompt.iter().find(|p| !PROMPT_VALUES.contains(*p)) {
            return Err(AuthError::invalid_request(format!(
                "Invalid parameter \"prompt\". The value \"{unknown}\" is not supported."
            )));
        }
        if prompt.contains(&"none") && prompt.len() > 1 {
            return Err(AuthError::invalid_request(
                "Invalid parameter \"prompt\". Prompt value \"none\" must be used alone.",
            ));
        }
        Ok(())
    }
}

/// `claims` (OIDC Core §5.5) is a JSON object.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClaimsChecker;

impl ParameterChecker for ClaimsChecker {
    fn check(&self, request: &mut AuthorizationRequest) -> AuthResult<()> {
        let Some(claims) = request.get("claims") else {
            return Ok(());
        };
        match serde_json::from_str::<serde_json::Value>(claims) {
            Ok(serde_json::Value::Object(_)) => Ok(()),
            _ => Err(AuthError::invalid_request(
                "Invalid parameter \"claims\". It must be a JSON object.",
            )),
        }
    }
}

/// Checks the PKCE parameters (RFC 7636 §4.3).
pub struct CodeChallengeChecker {
    methods: PkceMethodManager,
    enforce_for_public_clients: bool,
}

impl CodeChallengeChecker {
    #[must_use]
    pub fn new(methods: PkceMethodManager, enforce_for_public_clients: bool) -> Self {
        Self {
            methods,
            enforce_for_public_clients,
        }
    }
}

impl ParameterChecker for CodeChallengeChecker {
    fn check(&self, request: &mut AuthorizationRequest) -> AuthResult<()> {
        let issues_code = request
            .response_type()?
            .name()
            .split_whitespace()
            .any(|t| t == "code");

        if request.get("code_challenge").is_none() {
            if request.get("code_challenge_method").is_some() {
                return Err(AuthError::invalid_request(
                    "The parameter \"code_challenge\" is mandatory when \"code_challenge_method\" is set.",
                ));
            }
            if issues_code && self.enforce_for_public_clients && request.client().is_public() {
                return Err(AuthError::invalid_request(
                    "Non-confidential clients must send a \"code_challenge\" parameter.",
                ));
            }
            return Ok(());
        }

        let method = request.get("code_challenge_method").unwrap_or("plain");
        self.methods.get(method)?;
        Ok(())
    }
}

/// `nonce` is required when an ID token is issued from the endpoint.
#[derive(Debug, Clone, Copy, Default)]
pub struct NonceChecker;

impl ParameterChecker for NonceChecker {
    fn check(&self, request: &mut AuthorizationRequest) -> AuthResult<()> {
        let issues_id_token = request
            .response_type()?
            .name()
            .split_whitespace()
            .any(|t| t == "id_token");
        if issues_id_token && request.get("nonce").is_none() {
            return Err(AuthError::missing_parameter("nonce"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ScopeChecker;

impl ParameterChecker for ScopeChecker {
    fn check(&self, request: &mut AuthorizationRequest) -> AuthResult<()> {
        match request.get("scope") {
            Some(scope) if !request.client().is_scope_allowed(scope) => Err(
                AuthError::invalid_scope("An unsupported scope was requested."),
            ),
            _ => Ok(()),
        }
    }
}

/// Ordered list of checkers.
#[derive(Clone, Default)]
pub struct ParameterCheckerManager {
    checkers: Vec<Arc<dyn ParameterChecker>>,
}

impl ParameterCheckerManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates the standard chain.
    #[must_use]
    pub fn with_defaults(
        response_types: ResponseTypeManager,
        response_modes: ResponseModeManager,
        pkce: PkceMethodManager,
        config: &AuthorizationConfig,
    ) -> Self {
        let mut manager = Self::new();
        manager.add(Arc::new(ResponseTypeChecker::new(response_types)));
        manager.add(Arc::new(ResponseModeChecker::new(
            response_modes,
            config.allow_response_mode_parameter,
        )));
        manager.add(Arc::new(RedirectUriChecker));
        manager.add(Arc::new(StateChecker));
        manager.add(Arc::new(DisplayChecker));
        manager.add(Arc::new(PromptChecker));
        manager.add(Arc::new(ClaimsChecker));
        manager.add(Arc::new(CodeChallengeChecker::new(
            pkce,
            config.enforce_pkce_for_public_clients,
        )));
        manager.add(Arc::new(NonceChecker));
        manager.add(Arc::new(ScopeChecker));
        manager
    }

    /// Appends a checker.
    pub fn add(&mut self, checker: Arc<dyn ParameterChecker>) {
        self.checkers.push(checker);
    }

    /// Runs every checker.
    ///
    /// # Errors
    ///
    /// Returns the first failure together with the redirect context resolved
    /// before it.
    pub fn check(&self, request: &mut AuthorizationRequest) -> Result<(), AuthorizationFailure> {
        for checker in &self.checkers {
            if let Err(error) = checker.check(request) {
                tracing::warn!(
                    client_id = %request.client().client_id(),
                    error = error.error_code(),
                    description = %error.description(),
                    "Authorization request rejected"
                );
                return Err(request.failure(error));
            }
        }
        Ok(())
    }
}
