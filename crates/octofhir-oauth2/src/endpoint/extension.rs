//! Token endpoint extensions.
//!
//! Extensions observe every access token issuance. Refresh token issuance is
//! itself an extension.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};
use time::OffsetDateTime;

use crate::AuthResult;
use crate::grant::{GrantTypeData, METADATA_ISSUE_REFRESH_TOKEN, METADATA_REFRESH_TOKEN_ID};
use crate::http::RequestParameters;
use crate::storage::RefreshTokenRepository;
use crate::types::{
    AccessToken, Client, NewRefreshToken, RefreshToken, RefreshTokenId, ResourceOwner,
};

/// Hooks around access token issuance.
#[async_trait]
pub trait TokenEndpointExtension: Send + Sync {
    /// Runs after the grant checks, before the grant decision.
    ///
    /// # Errors
    ///
    /// Returns an OAuth error to abort the request.
    async fn before_access_token_issuance(
        &self,
        _params: &RequestParameters,
        _data: &mut GrantTypeData,
    ) -> AuthResult<()> {
        Ok(())
    }

    /// Runs once the access token is stored. May add fields to the response.
    ///
    /// # Errors
    ///
    /// Returns an error to abort the request.
    async fn after_access_token_issuance(
        &self,
        _client: &Client,
        _resource_owner: &ResourceOwner,
        _access_token: &AccessToken,
        _response: &mut Map<String, Value>,
    ) -> AuthResult<()> {
        Ok(())
    }
}

/// Issues refresh tokens and links refreshed access tokens to their origin.
pub struct RefreshTokenIssuer {
    refresh_tokens: Arc<dyn RefreshTokenRepository>,
    lifetime: Duration,
}

impl RefreshTokenIssuer {
    #[must_use]
    pub fn new(refresh_tokens: Arc<dyn RefreshTokenRepository>, lifetime: Duration) -> Self {
        Self {
            refresh_tokens,
            lifetime,
        }
    }

    /// Records the access token on the refresh token it was minted from and
    /// returns that refresh token. With rotation the old refresh token is
    /// revoked in the same append.
    async fn link_origin(
        &self,
        access_token: &AccessToken,
        rotate: bool,
    ) -> AuthResult<Option<RefreshToken>> {
        let Some(origin) = access_token.metadata().get_str(METADATA_REFRESH_TOKEN_ID) else {
            return Ok(None);
        };
        let Some(refresh_token) = self.refresh_tokens.find(&RefreshTokenId::new(origin)).await?
        else {
            tracing::warn!(refresh_token_id = origin, "Originating refresh token not found");
            return Ok(None);
        };

        let (linked, mut events) = refresh_token.add_access_token(access_token.id().clone());
        let linked = if rotate {
            let (revoked, more) = linked.mark_as_revoked();
            events.extend(more);
            tracing::debug!(refresh_token_id = origin, "Refresh token rotated out");
            revoked
        } else {
            linked
        };
        self.refresh_tokens.save((linked.clone(), events)).await?;
        Ok(Some(linked))
    }
}

#[async_trait]
impl TokenEndpointExtension for RefreshTokenIssuer {
    async fn after_access_token_issuance(
        &self,
        client: &Client,
        resource_owner: &ResourceOwner,
        access_token: &AccessToken,
        response: &mut Map<String, Value>,
    ) -> AuthResult<()> {
        let issue = access_token
            .metadata()
            .get(METADATA_ISSUE_REFRESH_TOKEN)
            .ok()
            .and_then(Value::as_bool)
            .unwrap_or(false);

        let origin = self.link_origin(access_token, issue).await?;

        if !issue || !client.is_grant_type_allowed("refresh_token") {
            return Ok(());
        }

        // A rotated refresh token keeps the scope it replaces (RFC 6749 §6).
        let parameters = match &origin {
            Some(origin) => origin.parameters().clone(),
            None => access_token.parameters().without("token_type"),
        };
        let id = self.refresh_tokens.generate_id();
        let (token, mut events) = self.refresh_tokens.create(NewRefreshToken {
            id: id.clone(),
            client_id: client.client_id().clone(),
            resource_owner_id: resource_owner.id(),
            resource_server_id: access_token.resource_server_id().cloned(),
            expires_at: Some(OffsetDateTime::now_utc() + self.lifetime),
            parameters,
            metadata: Default::default(),
        });
        let (token, more) = token.add_access_token(access_token.id().clone());
        events.extend(more);
        self.refresh_tokens.save((token, events)).await?;

        tracing::info!(
            client_id = %client.client_id(),
            resource_owner_id = %resource_owner.id(),
            "Refresh token issued"
        );
        response.insert("refresh_token".to_string(), Value::from(id.into_inner()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::AccessTokenRepository;
    use crate::storage::memory::{InMemoryAccessTokenRepository, InMemoryRefreshTokenRepository};
    use crate::types::{Aggregate, ClientId, DataBag, NewAccessToken, ResourceOwnerId};

    fn client(grant_types: &[&str]) -> Client {
        Client::create_empty()
            .create(
                ClientId::new("client-a"),
                None,
                DataBag::new().with("grant_types", grant_types.to_vec()),
            )
            .0
    }

    fn access_token(metadata: DataBag) -> AccessToken {
        InMemoryAccessTokenRepository::new()
            .create(NewAccessToken {
                id: "AT-1".into(),
                client_id: ClientId::new("client-a"),
                resource_owner_id: ResourceOwnerId::new("alice"),
                resource_server_id: None,
                expires_at: None,
                parameters: DataBag::new()
                    .with("token_type", "Bearer")
                    .with("scope", "read"),
                metadata,
            })
            .0
    }

    #[tokio::test]
    async fn test_issues_refresh_token() {
        let repo = Arc::new(InMemoryRefreshTokenRepository::new());
        let issuer = RefreshTokenIssuer::new(repo.clone(), Duration::from_secs(60));
        let client = client(&["authorization_code", "refresh_token"]);
        let owner = ResourceOwner::Client(client.clone());
        let token = access_token(DataBag::new().with(METADATA_ISSUE_REFRESH_TOKEN, true));

        let mut response = Map::new();
        issuer
            .after_access_token_issuance(&client, &owner, &token, &mut response)
            .await
            .unwrap();

        let id = response["refresh_token"].as_str().unwrap();
        let stored = repo.find(&RefreshTokenId::new(id)).await.unwrap().unwrap();
        assert_eq!(stored.parameters().get_str("scope"), Some("read"));
        assert!(!stored.parameters().has("token_type"));
        assert!(stored.access_token_ids().contains(token.id()));
    }

    #[tokio::test]
    async fn test_no_refresh_token_without_grant() {
        let repo = Arc::new(InMemoryRefreshTokenRepository::new());
        let issuer = RefreshTokenIssuer::new(repo, Duration::from_secs(60));
        let client = client(&["authorization_code"]);
        let owner = ResourceOwner::Client(client.clone());
        let token = access_token(DataBag::new().with(METADATA_ISSUE_REFRESH_TOKEN, true));

        let mut response = Map::new();
        issuer
            .after_access_token_issuance(&client, &owner, &token, &mut response)
            .await
            .unwrap();
        assert!(!response.contains_key("refresh_token"));
    }

    #[tokio::test]
    async fn test_refreshed_token_is_linked_and_rotated() {
        let repo = Arc::new(InMemoryRefreshTokenRepository::new());
        let origin = repo.generate_id();
        let recorded = repo.create(NewRefreshToken {
            id: origin.clone(),
            client_id: ClientId::new("client-a"),
            resource_owner_id: ResourceOwnerId::new("alice"),
            resource_server_id: None,
            expires_at: None,
            parameters: DataBag::new().with("scope", "read"),
            metadata: DataBag::new(),
        });
        repo.save(recorded).await.unwrap();

        let issuer = RefreshTokenIssuer::new(repo.clone(), Duration::from_secs(60));
        let client = client(&["refresh_token"]);
        let owner = ResourceOwner::Client(client.clone());

        let linked_only =
            access_token(DataBag::new().with(METADATA_REFRESH_TOKEN_ID, origin.as_str()));
        let mut response = Map::new();
        issuer
            .after_access_token_issuance(&client, &owner, &linked_only, &mut response)
            .await
            .unwrap();
        let stored = repo.find(&origin).await.unwrap().unwrap();
        assert!(stored.access_token_ids().contains(linked_only.id()));
        assert!(!stored.is_revoked());

        let rotated = access_token(
            DataBag::new()
                .with(METADATA_REFRESH_TOKEN_ID, origin.as_str())
                .with(METADATA_ISSUE_REFRESH_TOKEN, true),
        );
        issuer
            .after_access_token_issuance(&client, &owner, &rotated, &mut response)
            .await
            .unwrap();
        assert!(repo.find(&origin).await.unwrap().unwrap().is_revoked());
        assert_ne!(response["refresh_token"], origin.as_str());
    }

    #[tokio::test]
    async fn test_rotation_keeps_original_scope() {
        let repo = Arc::new(InMemoryRefreshTokenRepository::new());
        let origin = repo.generate_id();
        let recorded = repo.create(NewRefreshToken {
            id: origin.clone(),
            client_id: ClientId::new("client-a"),
            resource_owner_id: ResourceOwnerId::new("alice"),
            resource_server_id: None,
            expires_at: None,
            parameters: DataBag::new().with("scope", "read write"),
            metadata: DataBag::new(),
        });
        repo.save(recorded).await.unwrap();

        let issuer = RefreshTokenIssuer::new(repo.clone(), Duration::from_secs(60));
        let client = client(&["refresh_token"]);
        let owner = ResourceOwner::Client(client.clone());

        // The access token was narrowed to `read`.
        let narrowed = access_token(
            DataBag::new()
                .with(METADATA_REFRESH_TOKEN_ID, origin.as_str())
                .with(METADATA_ISSUE_REFRESH_TOKEN, true),
        );
        let mut response = Map::new();
        issuer
            .after_access_token_issuance(&client, &owner, &narrowed, &mut response)
            .await
            .unwrap();

        let id = response["refresh_token"].as_str().unwrap();
        let rotated = repo.find(&RefreshTokenId::new(id)).await.unwrap().unwrap();
        assert_eq!(rotated.parameters().get_str("scope"), Some("read write"));
        assert!(rotated.access_token_ids().contains(narrowed.id()));
    }
}
