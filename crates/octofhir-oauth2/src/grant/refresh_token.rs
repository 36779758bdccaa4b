//! Refresh token grant (RFC 6749 §6).

use std::sync::Arc;

use async_trait::async_trait;
use time::OffsetDateTime;

use super::{
    GrantType, GrantTypeData, METADATA_ISSUE_REFRESH_TOKEN, METADATA_REFRESH_TOKEN_ID,
    is_scope_subset,
};
use crate::AuthResult;
use crate::error::AuthError;
use crate::http::RequestParameters;
use crate::storage::RefreshTokenRepository;
use crate::types::RefreshTokenId;

/// Exchanges a refresh token for a new access token.
///
/// With rotation enabled, the presented token is revoked and a new one is
/// issued alongside the access token.
pub struct RefreshTokenGrantType {
    refresh_tokens: Arc<dyn RefreshTokenRepository>,
    rotation: bool,
}

impl RefreshTokenGrantType {
    /// Creates the grant type.
    #[must_use]
    pub fn new(refresh_tokens: Arc<dyn RefreshTokenRepository>, rotation: bool) -> Self {
        Self {
            refresh_tokens,
            rotation,
        }
    }
}

#[async_trait]
impl GrantType for RefreshTokenGrantType {
    fn name(&self) -> &'static str {
        "refresh_token"
    }

    fn required_parameters(&self) -> &'static [&'static str] {
        &["refresh_token"]
    }

    async fn grant(&self, params: &RequestParameters, data: &mut GrantTypeData) -> AuthResult<()> {
        let client_id = data.client()?.client_id().clone();
        let token_id = RefreshTokenId::new(params.require("refresh_token")?);
        let invalid = || AuthError::invalid_grant("The parameter \"refresh_token\" is invalid.");

        let token = self
            .refresh_tokens
            .find(&token_id)
            .await?
            .ok_or_else(invalid)?;

        if token.client_id() != &client_id {
            tracing::warn!(
                client_id = %client_id,
                owner = %token.client_id(),
                "Refresh token presented by another client"
            );
            return Err(invalid());
        }
        if token.is_revoked() {
            return Err(AuthError::invalid_grant("The refresh token has been revoked."));
        }
        if token.has_expired(OffsetDateTime::now_utc()) {
            return Err(AuthError::invalid_grant("The refresh token expired."));
        }

        match params.get("scope") {
            Some(requested) => {
                let granted = token
                    .parameters()
                    .get_string_list("scope")
                    .unwrap_or_default();
                if !is_scope_subset(requested, &granted) {
                    return Err(AuthError::invalid_scope(format!(
                        "An unsupported scope was requested. Available scopes are {}.",
                        granted.join(", ")
                    )));
                }
                data.set_parameter("scope", requested);
            }
            None => {
                for (key, value) in token.parameters().iter() {
                    data.set_parameter(key.clone(), value.clone());
                }
            }
        }

        data.set_resource_owner_id(token.resource_owner_id().clone());
        data.set_resource_server_id(token.resource_server_id().cloned());
        data.set_metadata(METADATA_REFRESH_TOKEN_ID, token.id().as_str());
        if self.rotation {
            data.set_metadata(METADATA_ISSUE_REFRESH_TOKEN, true);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::InMemoryRefreshTokenRepository;
    use crate::types::{Aggregate, Client, ClientId, DataBag, NewRefreshToken, ResourceOwnerId};
    use time::Duration;

    fn client(id: &str) -> Client {
        Client::create_empty()
            .create(ClientId::new(id), None, DataBag::new())
            .0
    }

    async fn issue(
        repo: &InMemoryRefreshTokenRepository,
        expires_in: Duration,
        revoked: bool,
    ) -> String {
        let id = repo.generate_id();
        let (token, mut events) = repo.create(NewRefreshToken {
            id: id.clone(),
            client_id: ClientId::new("client-a"),
            resource_owner_id: ResourceOwnerId::new("alice"),
            resource_server_id: None,
            expires_at: Some(OffsetDateTime::now_utc() + expires_in),
            parameters: DataBag::new().with("scope", "read write"),
            metadata: DataBag::new(),
        });
        let token = if revoked {
            let (revoked, more) = token.mark_as_revoked();
            events.extend(more);
            revoked
        } else {
            token
        };
        repo.save((token, events)).await.unwrap();
        id.into_inner()
    }

    fn request(token: &str, scope: Option<&str>) -> RequestParameters {
        let mut params = RequestParameters::from_iter([("refresh_token", token)]);
        if let Some(scope) = scope {
            params.insert("scope", scope);
        }
        params
    }

    #[tokio::test]
    async fn test_refresh() {
        let repo = Arc::new(InMemoryRefreshTokenRepository::new());
        let token = issue(&repo, Duration::hours(1), false).await;
        let grant = RefreshTokenGrantType::new(repo, false);

        let mut data = GrantTypeData::for_client(Some(client("client-a")));
        grant.grant(&request(&token, None), &mut data).await.unwrap();
        assert_eq!(data.resource_owner_id().unwrap().as_str(), "alice");
        assert_eq!(data.parameters().get_str("scope"), Some("read write"));
        assert_eq!(
            data.metadata().get_str(METADATA_REFRESH_TOKEN_ID),
            Some(token.as_str())
        );
        assert!(!data.metadata().has(METADATA_ISSUE_REFRESH_TOKEN));
    }

    #[tokio::test]
    async fn test_token_of_another_client_is_invalid_grant() {
        let repo = Arc::new(InMemoryRefreshTokenRepository::new());
        let token = issue(&repo, Duration::hours(1), false).await;
        let grant = RefreshTokenGrantType::new(repo, false);

        let mut data = GrantTypeData::for_client(Some(client("client-b")));
        let err = grant.grant(&request(&token, None), &mut data).await.unwrap_err();
        assert_eq!(err.error_code(), "invalid_grant");
    }

    #[tokio::test]
    async fn test_revoked_and_expired() {
        let repo = Arc::new(InMemoryRefreshTokenRepository::new());
        let revoked = issue(&repo, Duration::hours(1), true).await;
        let expired = issue(&repo, Duration::seconds(-5), false).await;
        let grant = RefreshTokenGrantType::new(repo, false);

        let mut data = GrantTypeData::for_client(Some(client("client-a")));
        let err = grant.grant(&request(&revoked, None), &mut data).await.unwrap_err();
        assert_eq!(err.error_code(), "invalid_grant");
        let err = grant.grant(&request(&expired, None), &mut data).await.unwrap_err();
        assert_eq!(err.description(), "The refresh token expired.");
    }

    #[tokio::test]
    async fn test_scope_narrowing() {
        let repo = Arc::new(InMemoryRefreshTokenRepository::new());
        let token = issue(&repo, Duration::hours(1), false).await;
        let grant = RefreshTokenGrantType::new(repo, true);

        let mut data = GrantTypeData::for_client(Some(client("client-a")));
        grant
            .grant(&request(&token, Some("read")), &mut data)
            .await
            .unwrap();
        assert_eq!(data.parameters().get_str("scope"), Some("read"));
        assert!(data.metadata().has(METADATA_ISSUE_REFRESH_TOKEN));

        let err = grant
            .grant(&request(&token, Some("read admin")), &mut data)
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "invalid_scope");
    }
}
