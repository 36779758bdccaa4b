use std::sync::Arc;

use assert_json_diff::assert_json_eq;
use async_trait::async_trait;
use axum::http::{HeaderMap, Request, StatusCode, header};
use base64::Engine;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use octofhir_oauth2::authorization::AuthorizationRequest;
use octofhir_oauth2::grant::jwt_bearer::GRANT_TYPE_JWT_BEARER;
use octofhir_oauth2::http::{HttpRequest, HttpResponse};
use octofhir_oauth2::storage::memory::{
    InMemoryAccessTokenRepository, InMemoryAuthorizationRequestStorage, InMemoryClientRepository,
    InMemoryConsentRepository, InMemoryRefreshTokenRepository, InMemoryResourceServerRepository,
};
use octofhir_oauth2::storage::{
    AccessTokenRepository, AuthorizationRequestStorage, ClientRepository, ConsentRepository,
    RefreshTokenRepository, UserAccountDiscovery,
};
use octofhir_oauth2::types::{
    AccessTokenId, Aggregate, Client, ClientId, DataBag, RefreshTokenId, ResourceServer,
    ResourceServerId, UserAccount, UserAccountId,
};
use octofhir_oauth2::{AuthConfig, AuthResult, AuthorizationServer, Repositories};
use serde_json::{Value, json};
use time::OffsetDateTime;
use url::Url;

const ISSUER: &str = "https://as.example.com";
const REDIRECT_URI: &str = "https://app.example.com/cb";
const VERIFIER: &str = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
const CHALLENGE: &str = "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM";
const SIGNING_KEY: &[u8] = b"self-issued-signing-key-with-enough-bytes";

/// Logged-in user taken from the `x-user` header.
struct HeaderSession;

#[async_trait]
impl UserAccountDiscovery for HeaderSession {
    async fn find(
        &self,
        _request: &AuthorizationRequest,
        headers: &HeaderMap,
    ) -> AuthResult<Option<UserAccount>> {
        Ok(headers
            .get("x-user")
            .and_then(|v| v.to_str().ok())
            .map(UserAccount::new))
    }
}

struct TestServer {
    server: AuthorizationServer,
    clients: Arc<InMemoryClientRepository>,
    access_tokens: Arc<InMemoryAccessTokenRepository>,
    refresh_tokens: Arc<InMemoryRefreshTokenRepository>,
    consents: Arc<InMemoryConsentRepository>,
    requests: Arc<InMemoryAuthorizationRequestStorage>,
}

impl TestServer {
    async fn start(config: AuthConfig) -> Self {
        let clients = Arc::new(InMemoryClientRepository::new());
        let access_tokens = Arc::new(InMemoryAccessTokenRepository::new());
        let refresh_tokens = Arc::new(InMemoryRefreshTokenRepository::new());
        let consents = Arc::new(InMemoryConsentRepository::new());
        let requests = Arc::new(InMemoryAuthorizationRequestStorage::new());
        let resource_servers = Arc::new(InMemoryResourceServerRepository::new());
        resource_servers.insert(ResourceServer {
            id: ResourceServerId::new("api"),
            secret: "api-secret".to_string(),
            disabled: false,
        });

        let mut repositories = Repositories::in_memory(Arc::new(HeaderSession));
        repositories.clients = clients.clone();
        repositories.access_tokens = access_tokens.clone();
        repositories.refresh_tokens = refresh_tokens.clone();
        repositories.consents = consents.clone();
        repositories.authorization_requests = requests.clone();
        repositories.resource_servers = resource_servers;

        let server = AuthorizationServer::new(config, repositories).unwrap();
        let fixture = Self {
            server,
            clients,
            access_tokens,
            refresh_tokens,
            consents,
            requests,
        };
        fixture.register_clients().await;
        fixture
    }

    async fn register_clients(&self) {
        let clients = [
            (
                "web-app",
                DataBag::new()
                    .with("client_secret", "web-secret")
                    .with("redirect_uris", vec![REDIRECT_URI])
                    .with("grant_types", vec!["authorization_code", "refresh_token"]),
            ),
            (
                "spa",
                DataBag::new()
                    .with("token_endpoint_auth_method", "none")
                    .with("redirect_uris", vec![REDIRECT_URI]),
            ),
            (
                "service",
                DataBag::new()
                    .with("client_secret", "service-secret")
                    .with("grant_types", vec!["client_credentials"]),
            ),
            (
                "robot",
                DataBag::new()
                    .with(
                        "jwks",
                        json!({"keys": [{
                            "kty": "oct",
                            "kid": "robot-key",
                            "alg": "HS256",
                            "k": URL_SAFE_NO_PAD.encode(SIGNING_KEY),
                        }]}),
                    )
                    .with("grant_types", vec![GRANT_TYPE_JWT_BEARER]),
            ),
        ];
        for (id, parameters) in clients {
            let recorded = Client::create_empty().create(ClientId::new(id), None, parameters);
            self.clients.save(recorded).await.unwrap();
        }
    }

    async fn token(&self, body: &str, credentials: Option<(&str, &str)>) -> HttpResponse {
        let mut builder = Request::post("/token")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded");
        if let Some((id, secret)) = credentials {
            builder = builder.header(header::AUTHORIZATION, basic(id, secret));
        }
        let request: HttpRequest = builder.body(body.to_string()).unwrap();
        self.server.token().dispatch(request).await
    }

    async fn authorize(&self, query: &str, user: Option<&str>) -> HttpResponse {
        let mut builder = Request::get(format!("/authorize?{query}"));
        if let Some(user) = user {
            builder = builder.header("x-user", user);
        }
        let request: HttpRequest = builder.body(String::new()).unwrap();
        self.server.authorization().dispatch(request).await
    }

    async fn introspect(&self, token: &str) -> Value {
        let request: HttpRequest = Request::post("/introspect")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .header(header::AUTHORIZATION, basic("api", "api-secret"))
            .body(format!("token={token}"))
            .unwrap();
        let response = self.server.introspection().dispatch(request).await;
        assert_eq!(response.status(), StatusCode::OK);
        json_body(&response)
    }

    async fn revoke(&self, body: &str, credentials: (&str, &str)) -> HttpResponse {
        let request: HttpRequest = Request::post("/revoke")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .header(header::AUTHORIZATION, basic(credentials.0, credentials.1))
            .body(body.to_string())
            .unwrap();
        self.server.revocation().dispatch(request).await
    }

    /// Runs the code flow for `web-app` with a user who already consented.
    async fn issue_code(&self, scope: &str) -> String {
        let scopes: Vec<String> = scope.split(' ').map(str::to_string).collect();
        self.consents
            .save_consent(&UserAccountId::new("alice"), &ClientId::new("web-app"), &scopes)
            .await
            .unwrap();

        let query = format!(
            "response_type=code&client_id=web-app&redirect_uri={}&scope={}&state=s1",
            encode_component(REDIRECT_URI),
            encode_component(scope),
        );
        let response = self.authorize(&query, Some("alice")).await;
        assert_eq!(response.status(), StatusCode::FOUND);
        query_value(&location(&response), "code").unwrap()
    }
}

fn basic(id: &str, secret: &str) -> String {
    format!("Basic {}", STANDARD.encode(format!("{id}:{secret}")))
}

fn encode_component(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes()).collect()
}

fn json_body(response: &HttpResponse) -> Value {
    serde_json::from_str(response.body()).unwrap()
}

fn location(response: &HttpResponse) -> Url {
    let raw = response.headers()[header::LOCATION].to_str().unwrap();
    Url::options()
        .base_url(Some(&Url::parse(ISSUER).unwrap()))
        .parse(raw)
        .unwrap()
}

fn query_value(url: &Url, key: &str) -> Option<String> {
    url.query_pairs()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.into_owned())
}

fn config() -> AuthConfig {
    AuthConfig {
        issuer: ISSUER.to_string(),
        ..AuthConfig::default()
    }
}

fn code_exchange(code: &str) -> String {
    format!(
        "grant_type=authorization_code&code={code}&redirect_uri={}",
        encode_component(REDIRECT_URI)
    )
}

#[tokio::test]
async fn test_missing_grant_type() {
    let server = TestServer::start(config()).await;
    let response = server.token("", Some(("service", "service-secret"))).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let cache_control = response.headers()[header::CACHE_CONTROL].to_str().unwrap();
    assert!(cache_control.contains("no-store"));
    assert_json_eq!(
        json_body(&response),
        json!({
            "error": "invalid_request",
            "error_description": "The \"grant_type\" parameter is missing."
        })
    );
}

#[tokio::test]
async fn test_wrong_client_secret_is_challenged() {
    let server = TestServer::start(config()).await;
    let response = server
        .token("grant_type=client_credentials", Some(("service", "nope")))
        .await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(response.headers().contains_key(header::WWW_AUTHENTICATE));
    assert_eq!(json_body(&response)["error"], "invalid_client");
}

#[tokio::test]
async fn test_client_credentials_then_introspect_and_revoke() {
    let server = TestServer::start(config()).await;
    let response = server
        .token(
            "grant_type=client_credentials&scope=read",
            Some(("service", "service-secret")),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(&response);
    assert_eq!(body["token_type"], "Bearer");
    assert_eq!(body["scope"], "read");
    assert!(body.get("refresh_token").is_none());
    let token = body["access_token"].as_str().unwrap().to_string();

    let introspection = server.introspect(&token).await;
    assert_eq!(introspection["active"], true);
    assert_eq!(introspection["client_id"], "service");
    assert_eq!(introspection["sub"], "service");

    let response = server.revoke(&format!("token={token}"), ("service", "service-secret")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.body().is_empty());

    assert_json_eq!(server.introspect(&token).await, json!({"active": false}));
}

#[tokio::test]
async fn test_revoking_unknown_token_succeeds() {
    let server = TestServer::start(config()).await;
    let response = server
        .revoke("token=does-not-exist", ("service", "service-secret"))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.body().is_empty());
}

#[tokio::test]
async fn test_code_flow_with_refresh_token() {
    let server = TestServer::start(config()).await;
    let code = server.issue_code("read offline_access").await;

    let response = server
        .token(&code_exchange(&code), Some(("web-app", "web-secret")))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(&response);
    assert_eq!(body["scope"], "read offline_access");
    let access_token = body["access_token"].as_str().unwrap().to_string();
    let refresh_token = body["refresh_token"].as_str().unwrap().to_string();

    let stored = server
        .access_tokens
        .find(&AccessTokenId::new(access_token.clone()))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.resource_owner_id().as_str(), "alice");

    let rt = server
        .refresh_tokens
        .find(&RefreshTokenId::new(refresh_token.clone()))
        .await
        .unwrap()
        .unwrap();
    assert!(
        rt.access_token_ids()
            .contains(&AccessTokenId::new(access_token))
    );

    let response = server
        .token(
            &format!("grant_type=refresh_token&refresh_token={refresh_token}&scope=read"),
            Some(("web-app", "web-secret")),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let refreshed = json_body(&response);
    assert_eq!(refreshed["scope"], "read");

    let rt = server
        .refresh_tokens
        .find(&RefreshTokenId::new(refresh_token))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(rt.access_token_ids().len(), 2);
    assert!(!rt.is_revoked());
}

#[tokio::test]
async fn test_authorization_code_cannot_be_replayed() {
    let server = TestServer::start(config()).await;
    let code = server.issue_code("read").await;

    let first = server
        .token(&code_exchange(&code), Some(("web-app", "web-secret")))
        .await;
    assert_eq!(first.status(), StatusCode::OK);

    let second = server
        .token(&code_exchange(&code), Some(("web-app", "web-secret")))
        .await;
    assert_eq!(second.status(), StatusCode::BAD_REQUEST);
    assert_json_eq!(
        json_body(&second),
        json!({
            "error": "invalid_grant",
            "error_description": "The parameter \"code\" is invalid."
        })
    );
}

#[tokio::test]
async fn test_refresh_token_of_another_client_is_rejected() {
    let server = TestServer::start(config()).await;
    let code = server.issue_code("read offline_access").await;
    let body = json_body(
        &server
            .token(&code_exchange(&code), Some(("web-app", "web-secret")))
            .await,
    );
    let refresh_token = body["refresh_token"].as_str().unwrap();

    // `service` may not use the refresh_token grant at all; register one that may.
    let thief = Client::create_empty().create(
        ClientId::new("thief"),
        None,
        DataBag::new()
            .with("client_secret", "thief-secret")
            .with("grant_types", vec!["refresh_token"]),
    );
    server.clients.save(thief).await.unwrap();

    let response = server
        .token(
            &format!("grant_type=refresh_token&refresh_token={refresh_token}"),
            Some(("thief", "thief-secret")),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(&response)["error"], "invalid_grant");
}

#[tokio::test]
async fn test_refresh_token_rotation() {
    let mut config = config();
    config.tokens.refresh_token_rotation = true;
    let server = TestServer::start(config).await;
    let code = server.issue_code("read offline_access").await;
    let body = json_body(
        &server
            .token(&code_exchange(&code), Some(("web-app", "web-secret")))
            .await,
    );
    let original = body["refresh_token"].as_str().unwrap().to_string();

    let response = server
        .token(
            &format!("grant_type=refresh_token&refresh_token={original}"),
            Some(("web-app", "web-secret")),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let rotated = json_body(&response)["refresh_token"]
        .as_str()
        .unwrap()
        .to_string();
    assert_ne!(rotated, original);

    let old = server
        .refresh_tokens
        .find(&RefreshTokenId::new(original.clone()))
        .await
        .unwrap()
        .unwrap();
    assert!(old.is_revoked());

    let response = server
        .token(
            &format!("grant_type=refresh_token&refresh_token={original}"),
            Some(("web-app", "web-secret")),
        )
        .await;
    assert_eq!(json_body(&response)["error"], "invalid_grant");
}

#[tokio::test]
async fn test_narrowed_refresh_keeps_rotated_token_scope() {
    let mut config = config();
    config.tokens.refresh_token_rotation = true;
    let server = TestServer::start(config).await;
    let code = server.issue_code("read offline_access").await;
    let body = json_body(
        &server
            .token(&code_exchange(&code), Some(("web-app", "web-secret")))
            .await,
    );
    let original = body["refresh_token"].as_str().unwrap().to_string();

    let response = server
        .token(
            &format!("grant_type=refresh_token&refresh_token={original}&scope=read"),
            Some(("web-app", "web-secret")),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(&response);
    assert_eq!(body["scope"], "read");
    let rotated = body["refresh_token"].as_str().unwrap().to_string();

    let rt = server
        .refresh_tokens
        .find(&RefreshTokenId::new(rotated.clone()))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(rt.parameters().get_str("scope"), Some("read offline_access"));

    // The full scope can still be requested with the rotated token.
    let response = server
        .token(
            &format!("grant_type=refresh_token&refresh_token={rotated}"),
            Some(("web-app", "web-secret")),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(&response)["scope"], "read offline_access");
}

#[tokio::test]
async fn test_public_client_code_flow_with_pkce() {
    let server = TestServer::start(config()).await;
    server
        .consents
        .save_consent(
            &UserAccountId::new("bob"),
            &ClientId::new("spa"),
            &["read".to_string()],
        )
        .await
        .unwrap();

    let base = format!(
        "response_type=code&client_id=spa&redirect_uri={}&scope=read",
        encode_component(REDIRECT_URI)
    );

    // Public clients must send a challenge.
    let response = server.authorize(&base, Some("bob")).await;
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(
        query_value(&location(&response), "error").as_deref(),
        Some("invalid_request")
    );

    let query = format!("{base}&code_challenge={CHALLENGE}&code_challenge_method=S256");
    let response = server.authorize(&query, Some("bob")).await;
    assert_eq!(response.status(), StatusCode::FOUND);
    let code = query_value(&location(&response), "code").unwrap();

    let response = server
        .token(
            &format!("{}&client_id=spa&code_verifier=wrong-verifier", code_exchange(&code)),
            None,
        )
        .await;
    assert_eq!(json_body(&response)["error"], "invalid_grant");

    // A failed verification leaves the code unused.
    let response = server
        .token(
            &format!("{}&client_id=spa&code_verifier={VERIFIER}", code_exchange(&code)),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(json_body(&response)["access_token"].is_string());
}

#[tokio::test]
async fn test_login_and_consent_interaction() {
    let server = TestServer::start(config()).await;
    let query = format!(
        "response_type=code&client_id=web-app&redirect_uri={}&scope=read&state=s2",
        encode_component(REDIRECT_URI)
    );

    let response = server.authorize(&query, None).await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    let login = location(&response);
    assert_eq!(login.path(), "/login");
    let id = query_value(&login, "authorization_id").unwrap();

    // After login the session cookie identifies the user.
    let response = server
        .authorize(&format!("authorization_id={id}"), Some("alice"))
        .await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response).path(), "/consent");

    let mut suspended = server.requests.find(&id).await.unwrap().unwrap();
    suspended.allow();
    server.requests.save(&suspended).await.unwrap();

    let response = server
        .authorize(&format!("authorization_id={id}"), Some("alice"))
        .await;
    assert_eq!(response.status(), StatusCode::FOUND);
    let callback = location(&response);
    assert_eq!(query_value(&callback, "state").as_deref(), Some("s2"));
    assert!(query_value(&callback, "code").is_some());
    assert!(server.requests.is_empty());

    // Consent is remembered for the next request.
    let response = server.authorize(&query, Some("alice")).await;
    assert_eq!(response.status(), StatusCode::FOUND);
    assert!(query_value(&location(&response), "code").is_some());
}

#[tokio::test]
async fn test_denied_consent_is_redirected() {
    let server = TestServer::start(config()).await;
    let query = format!(
        "response_type=code&client_id=web-app&redirect_uri={}&scope=read&state=s3",
        encode_component(REDIRECT_URI)
    );
    let response = server.authorize(&query, Some("alice")).await;
    let id = query_value(&location(&response), "authorization_id").unwrap();

    let mut suspended = server.requests.find(&id).await.unwrap().unwrap();
    suspended.deny();
    server.requests.save(&suspended).await.unwrap();

    let response = server
        .authorize(&format!("authorization_id={id}"), Some("alice"))
        .await;
    assert_eq!(response.status(), StatusCode::FOUND);
    let callback = location(&response);
    assert_eq!(callback.host_str(), Some("app.example.com"));
    assert_eq!(query_value(&callback, "error").as_deref(), Some("access_denied"));
    assert_eq!(query_value(&callback, "state").as_deref(), Some("s3"));
}

#[tokio::test]
async fn test_prompt_none() {
    let server = TestServer::start(config()).await;
    let query = format!(
        "response_type=code&client_id=web-app&redirect_uri={}&scope=read&prompt=none",
        encode_component(REDIRECT_URI)
    );

    let response = server.authorize(&query, None).await;
    assert_eq!(
        query_value(&location(&response), "error").as_deref(),
        Some("login_required")
    );

    let combined = server
        .authorize(&query.replace("prompt=none", "prompt=none%20consent"), Some("alice"))
        .await;
    assert_eq!(combined.status(), StatusCode::FOUND);
    assert_eq!(
        query_value(&location(&combined), "error").as_deref(),
        Some("invalid_request")
    );

    let response = server.authorize(&query, Some("alice")).await;
    assert_eq!(
        query_value(&location(&response), "error").as_deref(),
        Some("consent_required")
    );

    server
        .consents
        .save_consent(
            &UserAccountId::new("alice"),
            &ClientId::new("web-app"),
            &["read".to_string()],
        )
        .await
        .unwrap();
    let response = server.authorize(&query, Some("alice")).await;
    assert_eq!(response.status(), StatusCode::FOUND);
    assert!(query_value(&location(&response), "code").is_some());
}

#[tokio::test]
async fn test_unknown_client_gets_json_error() {
    let server = TestServer::start(config()).await;
    let query = format!(
        "response_type=code&client_id=ghost&redirect_uri={}",
        encode_component(REDIRECT_URI)
    );
    let response = server.authorize(&query, Some("alice")).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(!response.headers().contains_key(header::LOCATION));
    assert_eq!(json_body(&response)["error"], "invalid_request");
}

fn self_assertion(iss: &str, sub: &str) -> String {
    let mut header = Header::new(Algorithm::HS256);
    header.kid = Some("robot-key".to_string());
    let claims = json!({
        "iss": iss,
        "sub": sub,
        "aud": ISSUER,
        "exp": OffsetDateTime::now_utc().unix_timestamp() + 300,
        "jti": "robot-1",
    });
    encode(&header, &claims, &EncodingKey::from_secret(SIGNING_KEY)).unwrap()
}

#[tokio::test]
async fn test_jwt_bearer_self_issued_assertion() {
    let server = TestServer::start(config()).await;
    let assertion = self_assertion("robot", "robot");
    let body = format!(
        "grant_type={}&assertion={assertion}",
        encode_component(GRANT_TYPE_JWT_BEARER)
    );

    let response = server.token(&body, None).await;
    assert_eq!(response.status(), StatusCode::OK);
    let token = json_body(&response)["access_token"]
        .as_str()
        .unwrap()
        .to_string();

    let stored = server
        .access_tokens
        .find(&AccessTokenId::new(token))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.client_id().as_str(), "robot");
    assert_eq!(stored.resource_owner_id().as_str(), "robot");
}

#[tokio::test]
async fn test_jwt_bearer_forged_signature() {
    let server = TestServer::start(config()).await;
    let mut header = Header::new(Algorithm::HS256);
    header.kid = Some("robot-key".to_string());
    let claims = json!({
        "iss": "robot",
        "sub": "robot",
        "aud": ISSUER,
        "exp": OffsetDateTime::now_utc().unix_timestamp() + 300,
    });
    let forged = encode(
        &header,
        &claims,
        &EncodingKey::from_secret(b"not-the-registered-key-at-all"),
    )
    .unwrap();
    let body = format!(
        "grant_type={}&assertion={forged}",
        encode_component(GRANT_TYPE_JWT_BEARER)
    );

    let response = server.token(&body, None).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(&response)["error"], "invalid_grant");
}
