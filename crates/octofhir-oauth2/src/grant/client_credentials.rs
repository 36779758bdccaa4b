//! Client credentials grant (RFC 6749 §4.4).

use async_trait::async_trait;

use super::{GrantType, GrantTypeData, METADATA_ISSUE_REFRESH_TOKEN};
use crate::AuthResult;
use crate::error::AuthError;
use crate::http::RequestParameters;

/// Issues a token on behalf of the authenticated client itself.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClientCredentialsGrantType {
    issue_refresh_token: bool,
}

impl ClientCredentialsGrantType {
    /// Creates the grant type.
    ///
    /// RFC 6749 §4.4.3 says a refresh token SHOULD NOT be included;
    /// `issue_refresh_token` overrides that.
    #[must_use]
    pub fn new(issue_refresh_token: bool) -> Self {
        Self {
            issue_refresh_token,
        }
    }
}

#[async_trait]
impl GrantType for ClientCredentialsGrantType {
    fn name(&self) -> &'static str {
        "client_credentials"
    }

    async fn grant(&self, params: &RequestParameters, data: &mut GrantTypeData) -> AuthResult<()> {
        let client = data.client()?;
        if client.is_public() {
            return Err(AuthError::invalid_client(
                "The client is not a confidential client.",
            ));
        }

        let owner = client.client_id().clone();
        if let Some(scope) = params.get("scope") {
            if !client.is_scope_allowed(scope) {
                return Err(AuthError::invalid_scope(format!(
                    "The scope \"{scope}\" is not allowed for this client."
                )));
            }
            data.set_parameter("scope", scope);
        }

        data.set_resource_owner_id(owner.into());
        if self.issue_refresh_token {
            data.set_metadata(METADATA_ISSUE_REFRESH_TOKEN, true);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Aggregate, Client, ClientId, DataBag};

    fn client(parameters: DataBag) -> Client {
        Client::create_empty()
            .create(ClientId::new("service"), None, parameters)
            .0
    }

    #[tokio::test]
    async fn test_owner_is_client() {
        let mut data = GrantTypeData::for_client(Some(client(
            DataBag::new().with("scope", "system/*.read"),
        )));
        let params = RequestParameters::from_iter([("scope", "system/*.read")]);
        ClientCredentialsGrantType::new(false)
            .grant(&params, &mut data)
            .await
            .unwrap();

        assert_eq!(data.resource_owner_id().unwrap().as_str(), "service");
        assert_eq!(data.parameters().get_str("scope"), Some("system/*.read"));
        assert!(!data.metadata().has(METADATA_ISSUE_REFRESH_TOKEN));
    }

    #[tokio::test]
    async fn test_refresh_token_flag() {
        let mut data = GrantTypeData::for_client(Some(client(DataBag::new())));
        ClientCredentialsGrantType::new(true)
            .grant(&RequestParameters::default(), &mut data)
            .await
            .unwrap();
        assert!(data.metadata().has(METADATA_ISSUE_REFRESH_TOKEN));
    }

    #[tokio::test]
    async fn test_rejects_public_client_and_unknown_scope() {
        let mut data = GrantTypeData::for_client(Some(client(
            DataBag::new().with("token_endpoint_auth_method", "none"),
        )));
        let err = ClientCredentialsGrantType::default()
            .grant(&RequestParameters::default(), &mut data)
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "invalid_client");

        let mut data = GrantTypeData::for_client(Some(client(
            DataBag::new().with("scope", "read"),
        )));
        let params = RequestParameters::from_iter([("scope", "admin")]);
        let err = ClientCredentialsGrantType::default()
            .grant(&params, &mut data)
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "invalid_scope");
    }
}
