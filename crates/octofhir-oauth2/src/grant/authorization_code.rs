//! Authorization code grant (RFC 6749 §4.1.3, RFC 7636 §4.6).

use std::sync::Arc;

use async_trait::async_trait;
use time::OffsetDateTime;
use url::Url;

use super::{
    GrantType, GrantTypeData, METADATA_AUTHORIZATION_CODE_ID, METADATA_ISSUE_REFRESH_TOKEN,
};
use crate::AuthResult;
use crate::error::AuthError;
use crate::http::RequestParameters;
use crate::pkce::{PkceMethodManager, is_valid_verifier};
use crate::storage::AuthorizationCodeRepository;
use crate::types::AuthorizationCodeId;

/// Exchanges an authorization code for an access token.
///
/// The code is marked as used before the token is issued, so it can be
/// exchanged once.
pub struct AuthorizationCodeGrantType {
    codes: Arc<dyn AuthorizationCodeRepository>,
    pkce: PkceMethodManager,
}

impl AuthorizationCodeGrantType {
    /// Creates the grant type.
    #[must_use]
    pub fn new(codes: Arc<dyn AuthorizationCodeRepository>, pkce: PkceMethodManager) -> Self {
        Self { codes, pkce }
    }
}

fn invalid_code() -> AuthError {
    AuthError::invalid_grant("The parameter \"code\" is invalid.")
}

/// Exact match, or the same URL once both sides are parsed.
fn same_redirect_uri(sent: &str, recorded: &str) -> bool {
    sent == recorded
        || matches!(
            (Url::parse(sent), Url::parse(recorded)),
            (Ok(a), Ok(b)) if a == b
        )
}

#[async_trait]
impl GrantType for AuthorizationCodeGrantType {
    fn name(&self) -> &'static str {
        "authorization_code"
    }

    fn associated_response_types(&self) -> &'static [&'static str] {
        &["code"]
    }

    fn required_parameters(&self) -> &'static [&'static str] {
        &["code", "redirect_uri"]
    }

    async fn grant(&self, params: &RequestParameters, data: &mut GrantTypeData) -> AuthResult<()> {
        let client_id = data.client()?.client_id().clone();
        let code_id = AuthorizationCodeId::new(params.require("code")?);

        let code = self.codes.find(&code_id).await?.ok_or_else(invalid_code)?;

        if code.is_used() || code.is_revoked() {
            tracing::warn!(
                client_id = %client_id,
                used = code.is_used(),
                revoked = code.is_revoked(),
                "Authorization code replayed"
            );
            return Err(invalid_code());
        }
        if code.client_id() != &client_id {
            tracing::warn!(client_id = %client_id, "Authorization code issued to another client");
            return Err(invalid_code());
        }
        if code.has_expired(OffsetDateTime::now_utc()) {
            return Err(AuthError::invalid_grant("The authorization code expired."));
        }
        if let Some(expected) = code.redirect_uri()
            && !params
                .get("redirect_uri")
                .is_some_and(|sent| same_redirect_uri(sent, expected))
        {
            return Err(AuthError::invalid_grant(
                "The parameter \"redirect_uri\" is invalid.",
            ));
        }

        if let Some((method, challenge)) = code.pkce_challenge() {
            let verifier = params.get("code_verifier").ok_or_else(|| {
                AuthError::invalid_grant("The parameter \"code_verifier\" is missing.")
            })?;
            if !is_valid_verifier(verifier) {
                return Err(AuthError::invalid_grant(
                    "The parameter \"code_verifier\" is malformed.",
                ));
            }
            let method = self
                .pkce
                .get(&method)
                .map_err(|e| AuthError::invalid_grant(e.description()))?;
            if !method.is_challenge_verified(verifier, &challenge) {
                return Err(AuthError::invalid_grant(
                    "Invalid parameter \"code_verifier\".",
                ));
            }
        }

        self.codes.save(code.mark_as_used()).await?;
        tracing::debug!(client_id = %client_id, "Authorization code marked as used");

        data.set_resource_owner_id(code.user_account_id().clone().into());
        data.set_resource_server_id(code.resource_server_id().cloned());
        for (key, value) in code.parameters().iter() {
            data.set_parameter(key.clone(), value.clone());
        }
        data.set_metadata(METADATA_AUTHORIZATION_CODE_ID, code.id().as_str());
        if code.issue_refresh_token() {
            data.set_metadata(METADATA_ISSUE_REFRESH_TOKEN, true);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::sha256_base64url;
    use crate::storage::memory::InMemoryAuthorizationCodeRepository;
    use crate::types::{
        Aggregate, Client, ClientId, DataBag, NewAuthorizationCode, UserAccountId,
    };
    use time::Duration;

    const VERIFIER: &str = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";

    fn client(id: &str) -> Client {
        Client::create_empty()
            .create(ClientId::new(id), None, DataBag::new())
            .0
    }

    async fn setup(
        query: DataBag,
        ttl: Duration,
    ) -> (
        AuthorizationCodeGrantType,
        Arc<InMemoryAuthorizationCodeRepository>,
        String,
    ) {
        let repo = Arc::new(InMemoryAuthorizationCodeRepository::new());
        let id = repo.generate_id();
        let recorded = repo.create(NewAuthorizationCode {
            id: id.clone(),
            client_id: ClientId::new("client-a"),
            user_account_id: UserAccountId::new("alice"),
            query_parameters: query,
            redirect_uri: Some("https://app.example.com/cb".to_string()),
            expires_at: OffsetDateTime::now_utc() + ttl,
            parameters: DataBag::new().with("scope", "openid profile"),
            metadata: DataBag::new(),
            resource_server_id: None,
            issue_refresh_token: true,
        });
        repo.save(recorded).await.unwrap();
        let grant =
            AuthorizationCodeGrantType::new(repo.clone(), PkceMethodManager::with_defaults());
        (grant, repo, id.into_inner())
    }

    fn params(code: &str, extra: &[(&str, &str)]) -> RequestParameters {
        let mut params = RequestParameters::from_iter([
            ("code", code),
            ("redirect_uri", "https://app.example.com/cb"),
        ]);
        for (k, v) in extra {
            params.insert(*k, *v);
        }
        params
    }

    #[tokio::test]
    async fn test_code_can_be_exchanged_once() {
        let (grant, repo, code) = setup(DataBag::new(), Duration::seconds(30)).await;

        let mut data = GrantTypeData::for_client(Some(client("client-a")));
        grant.grant(&params(&code, &[]), &mut data).await.unwrap();
        assert_eq!(data.resource_owner_id().unwrap().as_str(), "alice");
        assert_eq!(data.parameters().get_str("scope"), Some("openid profile"));
        assert!(data.metadata().has(METADATA_ISSUE_REFRESH_TOKEN));

        let stored = repo.find(&AuthorizationCodeId::new(&code)).await.unwrap().unwrap();
        assert!(stored.is_used());

        let mut data = GrantTypeData::for_client(Some(client("client-a")));
        let err = grant.grant(&params(&code, &[]), &mut data).await.unwrap_err();
        assert_eq!(err.error_code(), "invalid_grant");
        assert_eq!(err.description(), "The parameter \"code\" is invalid.");
    }

    #[tokio::test]
    async fn test_code_of_another_client() {
        let (grant, _, code) = setup(DataBag::new(), Duration::seconds(30)).await;
        let mut data = GrantTypeData::for_client(Some(client("client-b")));
        let err = grant.grant(&params(&code, &[]), &mut data).await.unwrap_err();
        assert_eq!(err.error_code(), "invalid_grant");
    }

    #[tokio::test]
    async fn test_expired_code() {
        let (grant, _, code) = setup(DataBag::new(), Duration::seconds(-1)).await;
        let mut data = GrantTypeData::for_client(Some(client("client-a")));
        let err = grant.grant(&params(&code, &[]), &mut data).await.unwrap_err();
        assert_eq!(err.description(), "The authorization code expired.");
    }

    #[tokio::test]
    async fn test_redirect_uri_must_match() {
        let (grant, _, code) = setup(DataBag::new(), Duration::seconds(30)).await;
        let mut data = GrantTypeData::for_client(Some(client("client-a")));
        let mut request = params(&code, &[]);
        request.insert("redirect_uri", "https://evil.example.com/cb");
        let err = grant.grant(&request, &mut data).await.unwrap_err();
        assert!(err.description().contains("redirect_uri"));
    }

    #[tokio::test]
    async fn test_pkce_s256() {
        let query = DataBag::new()
            .with("code_challenge", sha256_base64url(VERIFIER.as_bytes()))
            .with("code_challenge_method", "S256");
        let (grant, _, code) = setup(query, Duration::seconds(30)).await;

        let mut data = GrantTypeData::for_client(Some(client("client-a")));
        let err = grant.grant(&params(&code, &[]), &mut data).await.unwrap_err();
        assert!(err.description().contains("code_verifier"));

        let err = grant
            .grant(&params(&code, &[("code_verifier", "wrong-verifier")]), &mut data)
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "invalid_grant");

        grant
            .grant(&params(&code, &[("code_verifier", VERIFIER)]), &mut data)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_malformed_verifier_leaves_code_unused() {
        let query = DataBag::new()
            .with("code_challenge", sha256_base64url(VERIFIER.as_bytes()))
            .with("code_challenge_method", "S256");
        let (grant, repo, code) = setup(query, Duration::seconds(30)).await;

        let mut data = GrantTypeData::for_client(Some(client("client-a")));
        let malformed = format!("{VERIFIER}+");
        let err = grant
            .grant(&params(&code, &[("code_verifier", &malformed)]), &mut data)
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "invalid_grant");
        assert_eq!(
            err.description(),
            "The parameter \"code_verifier\" is malformed."
        );

        let stored = repo.find(&AuthorizationCodeId::new(&code)).await.unwrap().unwrap();
        assert!(!stored.is_used());
    }

    #[tokio::test]
    async fn test_pkce_plain_default_method() {
        let query = DataBag::new().with("code_challenge", VERIFIER);
        let (grant, _, code) = setup(query, Duration::seconds(30)).await;
        let mut data = GrantTypeData::for_client(Some(client("client-a")));
        grant
            .grant(&params(&code, &[("code_verifier", VERIFIER)]), &mut data)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_unknown_code() {
        let (grant, _, _) = setup(DataBag::new(), Duration::seconds(30)).await;
        let mut data = GrantTypeData::for_client(Some(client("client-a")));
        let err = grant.grant(&params("nope", &[]), &mut data).await.unwrap_err();
        assert_eq!(err.error_code(), "invalid_grant");
    }
}
