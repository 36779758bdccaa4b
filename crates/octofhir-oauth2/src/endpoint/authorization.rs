//! Authorization endpoint (RFC 6749 §3.1).
//!
//! A request is validated by the parameter checkers, then walks through the
//! hooks. A hook may suspend it while the end user logs in, picks an account
//! or consents; the request is then stored and the user agent is sent to the
//! external page with the `authorization_id`. Coming back to this endpoint
//! with that identifier resumes the request where it stopped.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::http::{HeaderValue, StatusCode, header};
use time::OffsetDateTime;

use crate::authorization::{
    AuthorizationHookManager, AuthorizationRequest, HookOutcome, ParameterCheckerManager,
};
use crate::error::{AuthError, AuthorizationFailure, EndpointError};
use crate::http::{
    HttpRequest, HttpResponse, RequestParameters, body_parameters, empty_response, no_cache,
};
use crate::pipe::{Handler, PipeResult};
use crate::storage::{AuthorizationRequestStorage, ClientRepository};
use crate::types::ClientId;

/// `GET /authorize`.
pub struct AuthorizationEndpoint {
    clients: Arc<dyn ClientRepository>,
    storage: Arc<dyn AuthorizationRequestStorage>,
    checkers: ParameterCheckerManager,
    hooks: AuthorizationHookManager,
    request_lifetime: Duration,
}

impl AuthorizationEndpoint {
    #[must_use]
    pub fn new(
        clients: Arc<dyn ClientRepository>,
        storage: Arc<dyn AuthorizationRequestStorage>,
        checkers: ParameterCheckerManager,
        hooks: AuthorizationHookManager,
        request_lifetime: Duration,
    ) -> Self {
        Self {
            clients,
            storage,
            checkers,
            hooks,
            request_lifetime,
        }
    }

    /// Validates a new request.
    async fn start(
        &self,
        params: &RequestParameters,
    ) -> Result<AuthorizationRequest, EndpointError> {
        let client_id = params
            .get("client_id")
            .ok_or_else(|| AuthorizationFailure::bare(AuthError::missing_parameter("client_id")))?;

        let client = match self.clients.find(&ClientId::new(client_id)).await? {
            Some(client) if !client.is_deleted() => client,
            _ => {
                return Err(AuthorizationFailure::bare(AuthError::invalid_request(
                    "The parameter \"client_id\" is invalid.",
                ))
                .into());
            }
        };

        let mut authorization = AuthorizationRequest::new(client, params.clone());
        self.checkers.check(&mut authorization)?;
        Ok(authorization)
    }

    /// Loads a suspended request.
    async fn resume(
        &self,
        authorization_id: &str,
    ) -> Result<AuthorizationRequest, EndpointError> {
        let authorization = self.storage.find(authorization_id).await?.ok_or_else(|| {
            AuthorizationFailure::bare(AuthError::invalid_request(
                "The parameter \"authorization_id\" is invalid.",
            ))
        })?;

        if authorization.has_expired(OffsetDateTime::now_utc(), self.request_lifetime) {
            self.storage.remove(authorization_id).await?;
            return Err(authorization
                .failure(AuthError::invalid_request("The authorization request expired."))
                .into());
        }

        tracing::debug!(
            authorization_id,
            client_id = %authorization.client().client_id(),
            "Authorization request resumed"
        );
        Ok(authorization)
    }

    async fn suspend(&self, authorization: &AuthorizationRequest, uri: &str) -> PipeResult {
        self.storage.save(authorization).await?;

        let separator = if uri.contains('?') { '&' } else { '?' };
        let location = format!(
            "{uri}{separator}authorization_id={}",
            authorization.authorization_id()
        );
        tracing::debug!(
            authorization_id = authorization.authorization_id(),
            location = %location,
            "Authorization request suspended"
        );
        Ok(see_other(&location)?)
    }
}

fn see_other(location: &str) -> Result<HttpResponse, AuthError> {
    let value = HeaderValue::from_str(location)
        .map_err(|e| AuthError::internal_with_source("Invalid interaction location", e))?;
    let mut response = empty_response(StatusCode::SEE_OTHER);
    response.headers_mut().insert(header::LOCATION, value);
    no_cache(response.headers_mut());
    Ok(response)
}

#[async_trait]
impl Handler for AuthorizationEndpoint {
    async fn handle(&self, request: HttpRequest) -> PipeResult {
        let params = body_parameters(&request)?;
        let resumed = params.get("authorization_id");
        let mut authorization = match resumed {
            Some(id) => self.resume(id).await?,
            None => self.start(params).await?,
        };

        let outcome = self
            .hooks
            .run(&mut authorization, request.headers())
            .await
            .map_err(|e| authorization.failure(e))?;
        if let HookOutcome::Suspend(uri) = outcome {
            return self.suspend(&authorization, &uri).await;
        }

        let response_type = Arc::clone(authorization.response_type()?);
        response_type
            .process(&mut authorization)
            .await
            .map_err(|e| authorization.failure(e))?;

        if let Some(id) = resumed {
            self.storage.remove(id).await?;
        }

        let redirect_uri = authorization
            .redirect_uri()
            .ok_or_else(|| AuthError::internal("The redirect URI has not been resolved."))?;
        let response_mode = authorization.response_mode()?;

        tracing::info!(
            client_id = %authorization.client().client_id(),
            response_type = response_type.name(),
            response_mode = response_mode.name(),
            "Authorization request completed"
        );
        Ok(response_mode.build_response(redirect_uri, authorization.response_parameters())?)
    }
}
