//! Token revocation endpoint (RFC 7009).
//!
//! `GET` with a `callback` parameter answers in JSONP, errors included, so
//! that browser clients can revoke tokens across origins.

use async_trait::async_trait;
use axum::http::{Method, StatusCode};

use crate::AuthResult;
use crate::client_auth::AuthenticatedClient;
use crate::error::AuthError;
use crate::http::{
    HttpRequest, HttpResponse, RequestParameters, body_parameters, empty_response,
    error_response, jsonp_response,
};
use crate::pipe::{Handler, PipeResult};
use crate::token_type_hint::TokenTypeHintManager;

/// `POST /revoke`, or `GET /revoke` with a JSONP callback.
pub struct RevocationEndpoint {
    hints: TokenTypeHintManager,
}

impl RevocationEndpoint {
    #[must_use]
    pub fn new(hints: TokenTypeHintManager) -> Self {
        Self { hints }
    }

    async fn revoke(
        &self,
        client: Option<&AuthenticatedClient>,
        params: &RequestParameters,
    ) -> AuthResult<HttpResponse> {
        let client = client
            .map(|auth| &auth.client)
            .ok_or_else(|| AuthError::invalid_client("Client authentication failed."))?;
        let token = params
            .get("token")
            .ok_or_else(|| AuthError::invalid_request("The parameter \"token\" is missing."))?;

        let Some((hint, found)) = self.hints.find(token, params.get("token_type_hint")).await?
        else {
            tracing::debug!(client_id = %client.client_id(), "Revocation of unknown token ignored");
            return Ok(empty_response(StatusCode::OK));
        };

        if found.client_id() != client.client_id() {
            tracing::warn!(
                client_id = %client.client_id(),
                owner = %found.client_id(),
                "Revocation of a token issued to another client"
            );
            return Err(AuthError::invalid_request("The parameter \"token\" is invalid."));
        }

        hint.revoke(found).await?;
        tracing::info!(
            client_id = %client.client_id(),
            token_type = hint.hint(),
            "Token revoked"
        );
        Ok(empty_response(StatusCode::OK))
    }
}

#[async_trait]
impl Handler for RevocationEndpoint {
    async fn handle(&self, request: HttpRequest) -> PipeResult {
        let params = body_parameters(&request)?;
        let client = request.extensions().get::<AuthenticatedClient>();
        let outcome = self.revoke(client, params).await;

        let callback = params
            .get("callback")
            .filter(|_| request.method() == Method::GET);
        let Some(callback) = callback else {
            return Ok(outcome?);
        };

        let response = match outcome {
            Ok(response) => response,
            Err(err) => {
                tracing::warn!(error = err.error_code(), "Revocation failed");
                error_response(&err, "revocation")
            }
        };
        Ok(jsonp_response(callback, response)?)
    }
}
