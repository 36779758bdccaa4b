//! Default wiring of the engine.
//!
//! [`AuthorizationServer`] assembles the four endpoint pipes from an
//! [`AuthConfig`] and a set of repositories, and mounts them on an axum
//! [`Router`].

use std::sync::Arc;

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::extract::{Request, State};
use axum::response::Response;
use axum::routing::{get, post};

use crate::AuthResult;
use crate::assertion::parse_algorithms;
use crate::authorization::hooks::{ConsentHook, LoginHook, NonePromptHook, SelectAccountHook};
use crate::authorization::response_type::{CodeResponseType, NoneResponseType, TokenResponseType};
use crate::authorization::{
    AuthorizationHookManager, ParameterCheckerManager, ResponseModeManager, ResponseTypeManager,
};
use crate::client_auth::{
    AuthenticationMethodManager, ClientAssertionJwt, ClientSecretBasic, ClientSecretPost,
    NoneAuthentication,
};
use crate::config::AuthConfig;
use crate::endpoint::{
    AuthorizationEndpoint, IntrospectionEndpoint, RefreshTokenIssuer, RevocationEndpoint,
    TokenEndpoint,
};
use crate::error::AuthError;
use crate::grant::{
    AuthorizationCodeGrantType, ClientCredentialsGrantType, GrantTypeManager, JwtBearerGrantType,
    RefreshTokenGrantType,
};
use crate::http::{HttpRequest, error_response};
use crate::jwks::JwksCache;
use crate::pipe::{
    ClientAuthenticationMiddleware, FormBodyParserMiddleware, GrantTypeMiddleware,
    OAuth2ResponseMiddleware, Pipe, ResourceServerAuthenticationMiddleware,
};
use crate::pkce::PkceMethodManager;
use crate::storage::memory::{
    InMemoryAccessTokenRepository, InMemoryAuthorizationCodeRepository,
    InMemoryAuthorizationRequestStorage, InMemoryClientRepository, InMemoryConsentRepository,
    InMemoryRefreshTokenRepository, InMemoryResourceServerRepository,
    InMemoryTrustedIssuerRepository, InMemoryUserAccountRepository,
};
use crate::storage::{
    AccessTokenRepository, AuthorizationCodeRepository, AuthorizationRequestStorage,
    ClientRepository, ConsentRepository, RefreshTokenRepository, ResourceServerRepository,
    TrustedIssuerRepository, UserAccountDiscovery, UserAccountRepository,
};
use crate::token_type::TokenTypeManager;
use crate::token_type_hint::{
    AccessTokenHint, AuthorizationCodeHint, RefreshTokenHint, TokenTypeHintManager,
};

/// Largest request body accepted by the axum adapter.
const MAX_BODY_SIZE: usize = 64 * 1024;

/// Storage collaborators.
#[derive(Clone)]
pub struct Repositories {
    pub clients: Arc<dyn ClientRepository>,
    pub access_tokens: Arc<dyn AccessTokenRepository>,
    pub refresh_tokens: Arc<dyn RefreshTokenRepository>,
    pub authorization_codes: Arc<dyn AuthorizationCodeRepository>,
    pub user_accounts: Arc<dyn UserAccountRepository>,
    pub trusted_issuers: Arc<dyn TrustedIssuerRepository>,
    pub resource_servers: Arc<dyn ResourceServerRepository>,
    pub consents: Arc<dyn ConsentRepository>,
    pub authorization_requests: Arc<dyn AuthorizationRequestStorage>,
    /// Tells who is logged in. Session handling stays with the embedder.
    pub user_discovery: Arc<dyn UserAccountDiscovery>,
}

impl Repositories {
    /// In-memory repositories around the embedder's session lookup.
    #[must_use]
    pub fn in_memory(user_discovery: Arc<dyn UserAccountDiscovery>) -> Self {
        Self {
            clients: Arc::new(InMemoryClientRepository::new()),
            access_tokens: Arc::new(InMemoryAccessTokenRepository::new()),
            refresh_tokens: Arc::new(InMemoryRefreshTokenRepository::new()),
            authorization_codes: Arc::new(InMemoryAuthorizationCodeRepository::new()),
            user_accounts: Arc::new(InMemoryUserAccountRepository::new()),
            trusted_issuers: Arc::new(InMemoryTrustedIssuerRepository::new()),
            resource_servers: Arc::new(InMemoryResourceServerRepository::new()),
            consents: Arc::new(InMemoryConsentRepository::new()),
            authorization_requests: Arc::new(InMemoryAuthorizationRequestStorage::new()),
            user_discovery,
        }
    }
}

/// The four OAuth 2.0 endpoints, each behind its pipe.
pub struct AuthorizationServer {
    config: AuthConfig,
    token: Pipe,
    authorization: Pipe,
    introspection: Pipe,
    revocation: Pipe,
}

impl AuthorizationServer {
    /// Builds the endpoints with the built-in grant types, response types,
    /// client authentication methods and prompt hooks.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Configuration` if the configuration is invalid and
    /// an internal error if the JWKS client cannot be built.
    pub fn new(config: AuthConfig, repositories: Repositories) -> AuthResult<Self> {
        config
            .validate()
            .map_err(|e| AuthError::configuration(e.to_string()))?;

        let jwks = Arc::new(JwksCache::from_config(&config.jwks)?);
        let pkce = PkceMethodManager::with_defaults();
        let tokens = &config.tokens;

        let mut grant_types = GrantTypeManager::new();
        grant_types.add(Arc::new(AuthorizationCodeGrantType::new(
            repositories.authorization_codes.clone(),
            pkce.clone(),
        )));
        grant_types.add(Arc::new(RefreshTokenGrantType::new(
            repositories.refresh_tokens.clone(),
            tokens.refresh_token_rotation,
        )));
        grant_types.add(Arc::new(ClientCredentialsGrantType::new(
            tokens.issue_refresh_token_with_client_credentials,
        )));
        let mut jwt_bearer =
            JwtBearerGrantType::new(repositories.clients.clone(), jwks.clone(), &config);
        if config.jwt_bearer.trusted_issuers_enabled {
            jwt_bearer = jwt_bearer.with_trusted_issuers(
                repositories.trusted_issuers.clone(),
                Some(repositories.user_accounts.clone()),
            );
        }
        grant_types.add(Arc::new(jwt_bearer));

        let mut auth_methods = AuthenticationMethodManager::new();
        auth_methods.add(Arc::new(ClientSecretBasic));
        auth_methods.add(Arc::new(ClientSecretPost));
        auth_methods.add(Arc::new(NoneAuthentication));
        auth_methods.add(Arc::new(ClientAssertionJwt::new(
            jwks,
            config.client_assertion_audience(),
            parse_algorithms(&config.client_assertion.allowed_algorithms),
            config.client_assertion.leeway,
        )));

        let token_endpoint = TokenEndpoint::new(
            repositories.access_tokens.clone(),
            repositories.clients.clone(),
            repositories.user_accounts.clone(),
            TokenTypeManager::with_defaults(),
            tokens.access_token_lifetime,
        )
        .with_extension(Arc::new(RefreshTokenIssuer::new(
            repositories.refresh_tokens.clone(),
            tokens.refresh_token_lifetime,
        )));
        let token = Pipe::new(Arc::new(token_endpoint))
            .with(Arc::new(OAuth2ResponseMiddleware::new("token")))
            .with(Arc::new(FormBodyParserMiddleware))
            .with(Arc::new(ClientAuthenticationMiddleware::new(
                repositories.clients.clone(),
                auth_methods.clone(),
            )))
            .with(Arc::new(GrantTypeMiddleware::new(grant_types)));

        let authorization = Pipe::new(Arc::new(Self::authorization_endpoint(
            &config,
            &repositories,
            pkce,
        )))
        .with(Arc::new(OAuth2ResponseMiddleware::new("authorization")))
        .with(Arc::new(FormBodyParserMiddleware));

        let mut hints = TokenTypeHintManager::new();
        hints.add(Arc::new(AccessTokenHint::new(
            repositories.access_tokens.clone(),
        )));
        hints.add(Arc::new(RefreshTokenHint::new(
            repositories.refresh_tokens.clone(),
        )));
        hints.add(Arc::new(AuthorizationCodeHint::new(
            repositories.authorization_codes.clone(),
        )));

        let introspection = Pipe::new(Arc::new(IntrospectionEndpoint::new(hints.clone())))
            .with(Arc::new(OAuth2ResponseMiddleware::new("introspection")))
            .with(Arc::new(FormBodyParserMiddleware))
            .with(Arc::new(ResourceServerAuthenticationMiddleware::new(
                repositories.resource_servers.clone(),
            )));

        let revocation = Pipe::new(Arc::new(RevocationEndpoint::new(hints)))
            .with(Arc::new(OAuth2ResponseMiddleware::new("revocation")))
            .with(Arc::new(FormBodyParserMiddleware))
            .with(Arc::new(ClientAuthenticationMiddleware::new(
                repositories.clients.clone(),
                auth_methods,
            )));

        tracing::info!(
            issuer = %config.issuer,
            "OAuth2 authorization server initialized"
        );
        Ok(Self {
            config,
            token,
            authorization,
            introspection,
            revocation,
        })
    }

    fn authorization_endpoint(
        config: &AuthConfig,
        repositories: &Repositories,
        pkce: PkceMethodManager,
    ) -> AuthorizationEndpoint {
        let mut response_types = ResponseTypeManager::new();
        response_types.add(Arc::new(CodeResponseType::new(
            repositories.authorization_codes.clone(),
            config.tokens.authorization_code_lifetime,
        )));
        response_types.add(Arc::new(TokenResponseType::new(
            repositories.access_tokens.clone(),
            config.tokens.access_token_lifetime,
        )));
        response_types.add(Arc::new(NoneResponseType));

        let checkers = ParameterCheckerManager::with_defaults(
            response_types,
            ResponseModeManager::with_defaults(),
            pkce,
            &config.authorization,
        );

        let ui = &config.authorization;
        let discovery = &repositories.user_discovery;
        let mut hooks = AuthorizationHookManager::new();
        hooks.add(Arc::new(NonePromptHook::new(discovery.clone())));
        hooks.add(Arc::new(SelectAccountHook::new(ui.select_account_uri.clone())));
        hooks.add(Arc::new(LoginHook::new(discovery.clone(), ui.login_uri.clone())));
        hooks.add(Arc::new(ConsentHook::new(
            repositories.consents.clone(),
            ui.consent_uri.clone(),
        )));

        AuthorizationEndpoint::new(
            repositories.clients.clone(),
            repositories.authorization_requests.clone(),
            checkers,
            hooks,
            ui.suspended_request_lifetime,
        )
    }

    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    /// Pipe of `POST /token`.
    #[must_use]
    pub fn token(&self) -> &Pipe {
        &self.token
    }

    /// Pipe of `GET /authorize`.
    #[must_use]
    pub fn authorization(&self) -> &Pipe {
        &self.authorization
    }

    /// Pipe of `POST /introspect`.
    #[must_use]
    pub fn introspection(&self) -> &Pipe {
        &self.introspection
    }

    /// Pipe of `POST /revoke` and `GET /revoke`.
    #[must_use]
    pub fn revocation(&self) -> &Pipe {
        &self.revocation
    }

    /// Mounts the endpoints.
    pub fn router(self: Arc<Self>) -> Router {
        Router::new()
            .route("/token", post(token_handler))
            .route("/authorize", get(authorization_handler))
            .route("/introspect", post(introspection_handler))
            .route("/revoke", get(revocation_handler).post(revocation_handler))
            .with_state(self)
    }
}

async fn token_handler(
    State(server): State<Arc<AuthorizationServer>>,
    request: Request,
) -> Response {
    dispatch(server.token(), request).await
}

async fn authorization_handler(
    State(server): State<Arc<AuthorizationServer>>,
    request: Request,
) -> Response {
    dispatch(server.authorization(), request).await
}

async fn introspection_handler(
    State(server): State<Arc<AuthorizationServer>>,
    request: Request,
) -> Response {
    dispatch(server.introspection(), request).await
}

async fn revocation_handler(
    State(server): State<Arc<AuthorizationServer>>,
    request: Request,
) -> Response {
    dispatch(server.revocation(), request).await
}

/// Buffers the body and runs the request through `pipe`.
async fn dispatch(pipe: &Pipe, request: Request) -> Response {
    let (parts, body) = request.into_parts();
    let body = match to_bytes(body, MAX_BODY_SIZE).await {
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(e) => {
            tracing::warn!(error = %e, "Failed to read request body");
            let error = AuthError::invalid_request("The request body could not be read.");
            return error_response(&error, "oauth2").map(Body::from);
        }
    };

    pipe.dispatch(HttpRequest::from_parts(parts, body))
        .await
        .map(Body::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authorization::AuthorizationRequest;
    use crate::types::UserAccount;
    use async_trait::async_trait;
    use axum::http::{HeaderMap, StatusCode};
    use tower::ServiceExt;

    struct Nobody;

    #[async_trait]
    impl UserAccountDiscovery for Nobody {
        async fn find(
            &self,
            _request: &AuthorizationRequest,
            _headers: &HeaderMap,
        ) -> AuthResult<Option<UserAccount>> {
            Ok(None)
        }
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = AuthConfig {
            issuer: String::new(),
            ..AuthConfig::default()
        };
        let err = AuthorizationServer::new(config, Repositories::in_memory(Arc::new(Nobody)))
            .err()
            .unwrap();
        assert!(matches!(err, AuthError::Configuration { .. }));
    }

    #[tokio::test]
    async fn test_router_serves_token_endpoint() {
        let repositories = Repositories::in_memory(Arc::new(Nobody));
        let server = AuthorizationServer::new(AuthConfig::default(), repositories).unwrap();
        let router = Arc::new(server).router();

        let request = axum::http::Request::post("/token")
            .header("content-type", "application/x-www-form-urlencoded")
            .body(Body::from("grant_type=password"))
            .unwrap();
        let response = router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["error"], "unsupported_grant_type");
    }
}
