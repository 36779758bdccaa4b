//! Built-in pipe stages.

use std::sync::Arc;

use async_trait::async_trait;
use axum::http::{Method, header};

use super::{Middleware, Next, PipeResult};
use crate::client_auth::{AuthenticationMethodManager, parse_basic_auth};
use crate::crypto::constant_time_eq;
use crate::error::{AuthError, AuthorizationFailure, EndpointError};
use crate::grant::{GrantTypeManager, ResolvedGrantType};
use crate::http::{HttpRequest, HttpResponse, RequestParameters, body_parameters, error_response};
use crate::storage::{ClientRepository, ResourceServerRepository};
use crate::types::{DataBag, ResourceServer, ResourceServerId};

// =============================================================================
// Error rendering
// =============================================================================

/// Turns errors into OAuth 2.0 responses. Always the outermost stage.
///
/// Authorization endpoint failures whose redirect URI has been validated are
/// delivered to the client through the response mode; everything else is
/// rendered as a JSON error body.
#[derive(Debug, Clone)]
pub struct OAuth2ResponseMiddleware {
    realm: String,
}

impl OAuth2ResponseMiddleware {
    /// Creates the stage. `realm` is used in `WWW-Authenticate` challenges.
    #[must_use]
    pub fn new(realm: impl Into<String>) -> Self {
        Self {
            realm: realm.into(),
        }
    }

    fn render(&self, err: EndpointError) -> HttpResponse {
        let error = err.auth_error();
        if error.is_server_error() {
            tracing::error!(error = ?error, category = %error.category(), "OAuth2 request failed");
        } else {
            tracing::warn!(
                error = error.error_code(),
                description = %error.description(),
                category = %error.category(),
                "OAuth2 request rejected"
            );
        }

        match err {
            EndpointError::Auth(error) => error_response(&error, &self.realm),
            EndpointError::Authorization(failure) => self.redirect_or_render(*failure),
        }
    }

    fn redirect_or_render(&self, failure: AuthorizationFailure) -> HttpResponse {
        let (Some(redirect_uri), Some(response_mode)) =
            (&failure.redirect_uri, &failure.response_mode)
        else {
            return error_response(&failure.error, &self.realm);
        };

        let mut parameters = DataBag::new()
            .with("error", failure.error.error_code())
            .with("error_description", failure.error.description());
        if let Some(state) = &failure.state {
            parameters = parameters.with("state", state.as_str());
        }

        response_mode
            .build_response(redirect_uri, &parameters)
            .unwrap_or_else(|e| error_response(&e, &self.realm))
    }
}

#[async_trait]
impl Middleware for OAuth2ResponseMiddleware {
    async fn process(&self, request: HttpRequest, next: Next<'_>) -> PipeResult {
        match next.run(request).await {
            Ok(response) => Ok(response),
            Err(err) => Ok(self.render(err)),
        }
    }
}

// =============================================================================
// Body parsing
// =============================================================================

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// Decodes the request parameters into the request extensions: the query
/// string for `GET`, the form body for `POST`.
#[derive(Debug, Clone, Copy, Default)]
pub struct FormBodyParserMiddleware;

#[async_trait]
impl Middleware for FormBodyParserMiddleware {
    async fn process(&self, mut request: HttpRequest, next: Next<'_>) -> PipeResult {
        let params = match request.method() {
            &Method::GET => RequestParameters::from_query(&request),
            &Method::POST => {
                let is_form = request
                    .headers()
                    .get(header::CONTENT_TYPE)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.split(';').next())
                    .is_some_and(|v| v.trim().eq_ignore_ascii_case(FORM_CONTENT_TYPE));
                if !is_form {
                    return Err(AuthError::invalid_request(format!(
                        "The content type must be \"{FORM_CONTENT_TYPE}\"."
                    ))
                    .into());
                }
                RequestParameters::parse(request.body())
            }
            other => {
                return Err(AuthError::invalid_request(format!(
                    "The request method \"{other}\" is not supported."
                ))
                .into());
            }
        };
        request.extensions_mut().insert(params);
        next.run(request).await
    }
}

// =============================================================================
// Client authentication
// =============================================================================

/// Authenticates the client when the request carries client credentials.
///
/// Requests without credentials pass through; the endpoint decides whether
/// a client is required.
pub struct ClientAuthenticationMiddleware {
    clients: Arc<dyn ClientRepository>,
    methods: AuthenticationMethodManager,
}

impl ClientAuthenticationMiddleware {
    #[must_use]
    pub fn new(clients: Arc<dyn ClientRepository>, methods: AuthenticationMethodManager) -> Self {
        Self { clients, methods }
    }
}

#[async_trait]
impl Middleware for ClientAuthenticationMiddleware {
    async fn process(&self, mut request: HttpRequest, next: Next<'_>) -> PipeResult {
        let identification = self
            .methods
            .identify(request.headers(), body_parameters(&request)?)?;
        let Some(identification) = identification else {
            tracing::debug!("No client credentials in request");
            return next.run(request).await;
        };

        let client = self
            .clients
            .find(&identification.client_id)
            .await?
            .ok_or_else(|| AuthError::invalid_client("Client authentication failed."))?;
        let authenticated = self.methods.authenticate(&client, &identification).await?;

        tracing::debug!(
            client_id = %client.client_id(),
            auth_method = authenticated.auth_method,
            "Client authenticated"
        );
        request.extensions_mut().insert(authenticated);
        next.run(request).await
    }
}

// =============================================================================
// Resource server authentication
// =============================================================================

/// A resource server authenticated by an earlier stage.
#[derive(Debug, Clone)]
pub struct AuthenticatedResourceServer(pub ResourceServer);

/// Authenticates a resource server with HTTP Basic credentials.
pub struct ResourceServerAuthenticationMiddleware {
    resource_servers: Arc<dyn ResourceServerRepository>,
}

impl ResourceServerAuthenticationMiddleware {
    #[must_use]
    pub fn new(resource_servers: Arc<dyn ResourceServerRepository>) -> Self {
        Self { resource_servers }
    }
}

#[async_trait]
impl Middleware for ResourceServerAuthenticationMiddleware {
    async fn process(&self, mut request: HttpRequest, next: Next<'_>) -> PipeResult {
        let failed = || AuthError::invalid_client("Resource server authentication failed.");

        let (id, secret) = request
            .headers()
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_basic_auth)
            .ok_or_else(failed)?;

        let server = self
            .resource_servers
            .find(&ResourceServerId::new(id))
            .await?
            .filter(|s| !s.disabled && constant_time_eq(s.secret.as_bytes(), secret.as_bytes()))
            .ok_or_else(failed)?;

        tracing::debug!(resource_server_id = %server.id, "Resource server authenticated");
        request
            .extensions_mut()
            .insert(AuthenticatedResourceServer(server));
        next.run(request).await
    }
}

// =============================================================================
// Grant type resolution
// =============================================================================

/// Resolves `grant_type` for the token endpoint.
#[derive(Clone)]
pub struct GrantTypeMiddleware {
    grant_types: GrantTypeManager,
}

impl GrantTypeMiddleware {
    #[must_use]
    pub fn new(grant_types: GrantTypeManager) -> Self {
        Self { grant_types }
    }
}

#[async_trait]
impl Middleware for GrantTypeMiddleware {
    async fn process(&self, mut request: HttpRequest, next: Next<'_>) -> PipeResult {
        let grant_type = {
            let params = body_parameters(&request)?;
            let name = params
                .get("grant_type")
                .ok_or_else(|| AuthError::missing_parameter("grant_type"))?;
            self.grant_types.get(name)?
        };
        tracing::debug!(grant_type = grant_type.name(), "Grant type resolved");
        request
            .extensions_mut()
            .insert(ResolvedGrantType(grant_type));
        next.run(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authorization::response_mode::QueryResponseMode;
    use crate::http::HttpRequest;
    use crate::pipe::{Handler, Pipe};
    use crate::storage::memory::InMemoryResourceServerRepository;
    use axum::http::{HeaderValue, Request, StatusCode};
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use url::Url;

    struct Params;

    #[async_trait]
    impl Handler for Params {
        async fn handle(&self, request: HttpRequest) -> PipeResult {
            let params = body_parameters(&request)?;
            let body: serde_json::Map<_, _> = params
                .iter()
                .map(|(k, v)| (k.to_string(), serde_json::Value::from(v)))
                .collect();
            Ok(crate::http::json_response(StatusCode::OK, &body.into()))
        }
    }

    struct Fail(fn() -> EndpointError);

    #[async_trait]
    impl Handler for Fail {
        async fn handle(&self, _request: HttpRequest) -> PipeResult {
            Err((self.0)())
        }
    }

    fn form(body: &str) -> HttpRequest {
        Request::post("/token")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded; charset=UTF-8")
            .body(body.to_string())
            .unwrap()
    }

    #[tokio::test]
    async fn test_form_body_and_query() {
        let pipe = Pipe::new(Arc::new(Params)).with(Arc::new(FormBodyParserMiddleware));

        let response = pipe.dispatch(form("a=1&b=two")).await;
        assert_eq!(response.body(), r#"{"a":"1","b":"two"}"#);

        let request = Request::get("/authorize?x=1").body(String::new()).unwrap();
        let response = pipe.dispatch(request).await;
        assert_eq!(response.body(), r#"{"x":"1"}"#);
    }

    #[tokio::test]
    async fn test_post_requires_form_content_type() {
        let pipe = Pipe::new(Arc::new(Params))
            .with(Arc::new(OAuth2ResponseMiddleware::new("token")))
            .with(Arc::new(FormBodyParserMiddleware));
        let request = Request::post("/token")
            .header(header::CONTENT_TYPE, "application/json")
            .body("{}".to_string())
            .unwrap();
        let response = pipe.dispatch(request).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_redirectable_failure_is_redirected() {
        fn failure() -> EndpointError {
            AuthorizationFailure {
                error: AuthError::access_denied("denied"),
                client_id: Some("client-a".to_string()),
                redirect_uri: Some(Url::parse("https://app.example.com/cb").unwrap()),
                state: Some("xyz".to_string()),
                response_mode: Some(Arc::new(QueryResponseMode)),
            }
            .into()
        }
        let pipe = Pipe::new(Arc::new(Fail(failure)))
            .with(Arc::new(OAuth2ResponseMiddleware::new("authorize")));
        let response = pipe.dispatch(HttpRequest::new(String::new())).await;
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(
            response.headers()[header::LOCATION],
            "https://app.example.com/cb?error=access_denied&error_description=denied&state=xyz"
        );
    }

    #[tokio::test]
    async fn test_bare_failure_is_json() {
        fn failure() -> EndpointError {
            AuthorizationFailure::bare(AuthError::invalid_request("bad")).into()
        }
        let pipe = Pipe::new(Arc::new(Fail(failure)))
            .with(Arc::new(OAuth2ResponseMiddleware::new("authorize")));
        let response = pipe.dispatch(HttpRequest::new(String::new())).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(response.body().contains("\"error\":\"invalid_request\""));
    }

    #[tokio::test]
    async fn test_resource_server_authentication() {
        let servers = Arc::new(InMemoryResourceServerRepository::new());
        servers.insert(ResourceServer {
            id: ResourceServerId::new("api"),
            secret: "s3cret".to_string(),
            disabled: false,
        });
        servers.insert(ResourceServer {
            id: ResourceServerId::new("old-api"),
            secret: "s3cret".to_string(),
            disabled: true,
        });
        let pipe = Pipe::new(Arc::new(Params))
            .with(Arc::new(OAuth2ResponseMiddleware::new("introspection")))
            .with(Arc::new(FormBodyParserMiddleware))
            .with(Arc::new(ResourceServerAuthenticationMiddleware::new(servers)));

        let call = |credentials: &str| {
            let mut request = form("token=x");
            let value = format!("Basic {}", STANDARD.encode(credentials));
            request
                .headers_mut()
                .insert(header::AUTHORIZATION, HeaderValue::from_str(&value).unwrap());
            request
        };

        assert_eq!(pipe.dispatch(call("api:s3cret")).await.status(), StatusCode::OK);
        let response = pipe.dispatch(call("api:wrong")).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(response.headers().contains_key(header::WWW_AUTHENTICATE));
        assert_eq!(
            pipe.dispatch(call("old-api:s3cret")).await.status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            pipe.dispatch(form("token=x")).await.status(),
            StatusCode::UNAUTHORIZED
        );
    }
}
