//! Token introspection endpoint (RFC 7662).

use async_trait::async_trait;
use axum::http::StatusCode;
use serde_json::{Map, Value};
use time::OffsetDateTime;

use crate::error::AuthError;
use crate::http::{HttpRequest, body_parameters, json_response, no_cache};
use crate::pipe::{AuthenticatedResourceServer, Handler, PipeResult};
use crate::token_type_hint::TokenTypeHintManager;

/// `POST /introspect`. Only authenticated resource servers may call it.
///
/// Tokens restricted to another resource server are reported inactive.
pub struct IntrospectionEndpoint {
    hints: TokenTypeHintManager,
}

impl IntrospectionEndpoint {
    #[must_use]
    pub fn new(hints: TokenTypeHintManager) -> Self {
        Self { hints }
    }
}

#[async_trait]
impl Handler for IntrospectionEndpoint {
    async fn handle(&self, request: HttpRequest) -> PipeResult {
        let server = request
            .extensions()
            .get::<AuthenticatedResourceServer>()
            .ok_or_else(|| AuthError::invalid_client("Resource server authentication failed."))?;
        let params = body_parameters(&request)?;
        let token = params
            .get("token")
            .ok_or_else(|| AuthError::invalid_request("The parameter \"token\" is missing."))?;

        let mut body = Map::new();
        match self.hints.find(token, params.get("token_type_hint")).await? {
            Some((hint, found))
                if found.is_active(OffsetDateTime::now_utc())
                    && found
                        .resource_server_id()
                        .is_none_or(|rs| rs == &server.0.id) =>
            {
                body.insert("active".to_string(), Value::Bool(true));
                body.extend(hint.introspect(&found));
            }
            _ => {
                body.insert("active".to_string(), Value::Bool(false));
            }
        }

        tracing::debug!(
            resource_server_id = %server.0.id,
            active = body["active"].as_bool(),
            "Token introspected"
        );
        let mut response = json_response(StatusCode::OK, &Value::Object(body));
        no_cache(response.headers_mut());
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::RequestParameters;
    use crate::storage::AccessTokenRepository;
    use crate::storage::memory::InMemoryAccessTokenRepository;
    use crate::token_type_hint::AccessTokenHint;
    use crate::types::{
        AccessTokenId, ClientId, DataBag, NewAccessToken, ResourceOwnerId, ResourceServer,
        ResourceServerId,
    };
    use std::sync::Arc;

    async fn endpoint(resource_server_id: Option<&str>) -> IntrospectionEndpoint {
        let repo = Arc::new(InMemoryAccessTokenRepository::new());
        let recorded = repo.create(NewAccessToken {
            id: AccessTokenId::new("AT-1"),
            client_id: ClientId::new("client-a"),
            resource_owner_id: ResourceOwnerId::new("alice"),
            resource_server_id: resource_server_id.map(ResourceServerId::new),
            expires_at: None,
            parameters: DataBag::new().with("scope", "read"),
            metadata: DataBag::new(),
        });
        repo.save(recorded).await.unwrap();

        let mut hints = TokenTypeHintManager::new();
        hints.add(Arc::new(AccessTokenHint::new(repo)));
        IntrospectionEndpoint::new(hints)
    }

    fn request(body: &str, server: &str) -> HttpRequest {
        let mut request = HttpRequest::new(body.to_string());
        request.extensions_mut().insert(RequestParameters::parse(body));
        request
            .extensions_mut()
            .insert(AuthenticatedResourceServer(ResourceServer {
                id: ResourceServerId::new(server),
                secret: "secret".to_string(),
                disabled: false,
            }));
        request
    }

    fn body(response: &crate::http::HttpResponse) -> Value {
        serde_json::from_str(response.body()).unwrap()
    }

    #[tokio::test]
    async fn test_active_token() {
        let endpoint = endpoint(None).await;
        let response = endpoint.handle(request("token=AT-1", "api")).await.unwrap();
        let body = body(&response);
        assert_eq!(body["active"], true);
        assert_eq!(body["client_id"], "client-a");
        assert_eq!(body["sub"], "alice");
        assert_eq!(body["scope"], "read");
    }

    #[tokio::test]
    async fn test_unknown_token_is_inactive() {
        let endpoint = endpoint(None).await;
        let response = endpoint.handle(request("token=nope", "api")).await.unwrap();
        assert_eq!(response.body(), r#"{"active":false}"#);
    }

    #[tokio::test]
    async fn test_token_of_another_resource_server_is_inactive() {
        let endpoint = endpoint(Some("billing")).await;
        let response = endpoint.handle(request("token=AT-1", "api")).await.unwrap();
        assert_eq!(body(&response)["active"], false);

        let response = endpoint
            .handle(request("token=AT-1", "billing"))
            .await
            .unwrap();
        assert_eq!(body(&response)["aud"], "billing");
    }

    #[tokio::test]
    async fn test_missing_token() {
        let endpoint = endpoint(None).await;
        let err = endpoint.handle(request("", "api")).await.unwrap_err();
        assert_eq!(err.auth_error().error_code(), "invalid_request");
    }
}
