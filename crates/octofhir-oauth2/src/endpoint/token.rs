//! Token endpoint (RFC 6749 §3.2).
//!
//! Runs behind the form body, client authentication and grant type stages.
//! The grant type decides what the access token carries; the endpoint mints
//! and stores it, then lets the extensions add to the response.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use time::OffsetDateTime;

use super::extension::TokenEndpointExtension;
use crate::AuthResult;
use crate::client_auth::AuthenticatedClient;
use crate::error::AuthError;
use crate::grant::{GrantTypeData, ResolvedGrantType};
use crate::http::{HttpRequest, body_parameters, token_response};
use crate::pipe::{Handler, PipeResult};
use crate::storage::{AccessTokenRepository, ClientRepository, UserAccountRepository};
use crate::token_type::TokenTypeManager;
use crate::types::{
    AccessToken, Client, ClientId, NewAccessToken, ResourceOwner, ResourceOwnerId, UserAccount,
    UserAccountId,
};

/// `POST /token`.
pub struct TokenEndpoint {
    access_tokens: Arc<dyn AccessTokenRepository>,
    clients: Arc<dyn ClientRepository>,
    users: Arc<dyn UserAccountRepository>,
    token_types: TokenTypeManager,
    extensions: Vec<Arc<dyn TokenEndpointExtension>>,
    access_token_lifetime: Duration,
}

impl TokenEndpoint {
    #[must_use]
    pub fn new(
        access_tokens: Arc<dyn AccessTokenRepository>,
        clients: Arc<dyn ClientRepository>,
        users: Arc<dyn UserAccountRepository>,
        token_types: TokenTypeManager,
        access_token_lifetime: Duration,
    ) -> Self {
        Self {
            access_tokens,
            clients,
            users,
            token_types,
            extensions: Vec::new(),
            access_token_lifetime,
        }
    }

    /// Registers an extension. Extensions run in registration order.
    #[must_use]
    pub fn with_extension(mut self, extension: Arc<dyn TokenEndpointExtension>) -> Self {
        self.extensions.push(extension);
        self
    }

    async fn issue_access_token(
        &self,
        client: &Client,
        data: &GrantTypeData,
    ) -> AuthResult<AccessToken> {
        let (token, events) = self.access_tokens.create(NewAccessToken {
            id: self.access_tokens.generate_id(),
            client_id: client.client_id().clone(),
            resource_owner_id: data.resource_owner_id()?.clone(),
            resource_server_id: data.resource_server_id().cloned(),
            expires_at: Some(OffsetDateTime::now_utc() + self.access_token_lifetime),
            parameters: data.parameters().clone(),
            metadata: data.metadata().clone(),
        });
        self.access_tokens.save((token.clone(), events)).await?;
        Ok(token)
    }

    /// Resolves the owner of a token: the client itself, a user account, or
    /// another client.
    async fn resource_owner(
        &self,
        client: &Client,
        owner: &ResourceOwnerId,
    ) -> AuthResult<ResourceOwner> {
        if owner.as_str() == client.client_id().as_str() {
            return Ok(ResourceOwner::Client(client.clone()));
        }

        let user_id = UserAccountId::new(owner.as_str());
        if let Some(user) = self.users.find(&user_id).await? {
            return Ok(ResourceOwner::User(user));
        }
        if let Some(other) = self.clients.find(&ClientId::new(owner.as_str())).await? {
            return Ok(ResourceOwner::Client(other));
        }

        tracing::debug!(resource_owner_id = %owner, "Resource owner not registered locally");
        Ok(ResourceOwner::User(UserAccount::new(user_id)))
    }
}

#[async_trait]
impl Handler for TokenEndpoint {
    async fn handle(&self, request: HttpRequest) -> PipeResult {
        let grant_type = request
            .extensions()
            .get::<ResolvedGrantType>()
            .map(|resolved| Arc::clone(&resolved.0))
            .ok_or_else(|| AuthError::internal("The grant type has not been resolved."))?;
        let params = body_parameters(&request)?;
        grant_type.check_request(params)?;

        let authenticated = request
            .extensions()
            .get::<AuthenticatedClient>()
            .map(|auth| auth.client.clone());
        let mut data = GrantTypeData::for_client(authenticated);
        grant_type.prepare_response(params, &mut data).await?;

        let client = match data.client() {
            Ok(client) if !client.is_deleted() => client.clone(),
            _ => return Err(AuthError::invalid_client("Client authentication failed.").into()),
        };
        if !client.is_grant_type_allowed(grant_type.name()) {
            return Err(AuthError::unauthorized_client(format!(
                "The grant type \"{}\" is unauthorized for this client.",
                grant_type.name()
            ))
            .into());
        }

        let token_type = self.token_types.resolve(params)?;
        for (key, value) in token_type.additional_information().iter() {
            data.set_parameter(key.clone(), value.clone());
        }

        for extension in &self.extensions {
            extension.before_access_token_issuance(params, &mut data).await?;
        }
        grant_type.grant(params, &mut data).await?;

        let access_token = self.issue_access_token(&client, &data).await?;
        tracing::info!(
            client_id = %client.client_id(),
            grant_type = grant_type.name(),
            resource_owner_id = %access_token.resource_owner_id(),
            "Access token issued"
        );

        let owner = self
            .resource_owner(&client, access_token.resource_owner_id())
            .await?;
        let mut body = access_token.response_data(OffsetDateTime::now_utc());
        for extension in &self.extensions {
            extension
                .after_access_token_issuance(&client, &owner, &access_token, &mut body)
                .await?;
        }

        Ok(token_response(body))
    }
}
