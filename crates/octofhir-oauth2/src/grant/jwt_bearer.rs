//! JWT bearer grant (RFC 7523 §2.1).
//!
//! Two kinds of assertion are accepted:
//!
//! - self-issued (`iss == sub`): the client asserts its own identity with a
//!   key from its registration, and the token is issued to the client;
//! - third-party: a registered trusted issuer asserts the identity of a user
//!   account or client, when trusted issuers are enabled.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use jsonwebtoken::Algorithm;
use jsonwebtoken::jwk::JwkSet;
use time::OffsetDateTime;

use super::{GrantType, GrantTypeData};
use crate::AuthResult;
use crate::assertion::{self, AssertionRules};
use crate::config::AuthConfig;
use crate::error::AuthError;
use crate::http::RequestParameters;
use crate::jwks::{JwksCache, find_decoding_key};
use crate::storage::{ClientRepository, TrustedIssuerRepository, UserAccountRepository};
use crate::types::{ClientId, ResourceOwnerId, UserAccountId};

/// `grant_type` value of the JWT bearer grant.
pub const GRANT_TYPE_JWT_BEARER: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

/// Decrypts JWE-wrapped assertions.
#[async_trait]
pub trait AssertionDecrypter: Send + Sync {
    /// Returns the compact JWS nested in `jwe`.
    ///
    /// # Errors
    ///
    /// Returns an error if the assertion cannot be decrypted.
    async fn decrypt(&self, jwe: &str) -> AuthResult<String>;
}

/// Exchanges a signed JWT assertion for an access token.
pub struct JwtBearerGrantType {
    clients: Arc<dyn ClientRepository>,
    jwks: Arc<JwksCache>,
    trusted_issuers: Option<Arc<dyn TrustedIssuerRepository>>,
    user_accounts: Option<Arc<dyn UserAccountRepository>>,
    decrypter: Option<Arc<dyn AssertionDecrypter>>,
    encryption_required: bool,
    audience: String,
    allowed_algorithms: Vec<Algorithm>,
    leeway: Duration,
    max_lifetime: Duration,
}

/// Keys and algorithms an assertion is verified with.
struct Verification {
    key_set: JwkSet,
    allowed_algorithms: Vec<Algorithm>,
    resource_owner_id: ResourceOwnerId,
}

impl JwtBearerGrantType {
    /// Creates the grant type for self-issued assertions.
    #[must_use]
    pub fn new(
        clients: Arc<dyn ClientRepository>,
        jwks: Arc<JwksCache>,
        config: &AuthConfig,
    ) -> Self {
        Self {
            clients,
            jwks,
            trusted_issuers: None,
            user_accounts: None,
            decrypter: None,
            encryption_required: config.jwt_bearer.encryption_required,
            audience: config.jwt_bearer_audience().to_string(),
            allowed_algorithms: assertion::parse_algorithms(&config.jwt_bearer.allowed_algorithms),
            leeway: config.jwt_bearer.leeway,
            max_lifetime: config.jwt_bearer.max_lifetime,
        }
    }

    /// Accepts assertions from registered trusted issuers.
    ///
    /// Subjects are looked up in `user_accounts` first, then in the client
    /// repository.
    #[must_use]
    pub fn with_trusted_issuers(
        mut self,
        trusted_issuers: Arc<dyn TrustedIssuerRepository>,
        user_accounts: Option<Arc<dyn UserAccountRepository>>,
    ) -> Self {
        self.trusted_issuers = Some(trusted_issuers);
        self.user_accounts = user_accounts;
        self
    }

    /// Enables JWE decryption.
    #[must_use]
    pub fn with_decrypter(mut self, decrypter: Arc<dyn AssertionDecrypter>) -> Self {
        self.decrypter = Some(decrypter);
        self
    }

    async fn unwrap_assertion(&self, raw: &str) -> AuthResult<String> {
        if !assertion::is_encrypted(raw) {
            if self.encryption_required {
                return Err(AuthError::invalid_request(
                    "The assertion must be encrypted.",
                ));
            }
            return Ok(raw.to_string());
        }

        let Some(decrypter) = &self.decrypter else {
            return Err(AuthError::invalid_request(
                "Encrypted assertions are not supported.",
            ));
        };
        match decrypter.decrypt(raw).await {
            Ok(jws) => Ok(jws),
            Err(e) if self.encryption_required => {
                tracing::warn!(error = %e, "Unable to decrypt the assertion");
                Err(AuthError::invalid_request("Unable to decrypt the assertion."))
            }
            Err(e) => {
                tracing::debug!(error = %e, "Assertion decryption failed, using it as is");
                Ok(raw.to_string())
            }
        }
    }

    async fn self_issued(
        &self,
        issuer: &str,
        data: &mut GrantTypeData,
    ) -> AuthResult<Verification> {
        let client = self
            .clients
            .find(&ClientId::new(issuer))
            .await?
            .filter(|c| !c.is_deleted())
            .ok_or_else(|| {
                AuthError::invalid_grant("Unable to find the issuer of the assertion.")
            })?;

        if data.has_client() && data.client()?.client_id() != client.client_id() {
            return Err(AuthError::invalid_grant(
                "The assertion was not issued by the authenticated client.",
            ));
        }

        let key_set = self
            .jwks
            .client_key_set(&client)
            .await
            .map_err(|e| AuthError::invalid_grant(e.description()))?;
        let resource_owner_id = client.client_id().clone().into();
        if !data.has_client() {
            data.set_client(client);
        }

        Ok(Verification {
            key_set,
            allowed_algorithms: self.allowed_algorithms.clone(),
            resource_owner_id,
        })
    }

    async fn third_party(
        &self,
        trusted_issuers: &dyn TrustedIssuerRepository,
        issuer: &str,
        subject: &str,
    ) -> AuthResult<Verification> {
        let trusted = trusted_issuers
            .find(issuer)
            .await?
            .ok_or_else(|| {
                AuthError::invalid_grant("Unable to find the issuer of the assertion.")
            })?;

        let resource_owner_id = self.find_resource_owner(subject).await?.ok_or_else(|| {
            AuthError::invalid_grant(format!(
                "Unable to find the resource owner \"{subject}\"."
            ))
        })?;

        Ok(Verification {
            key_set: trusted.jwks,
            allowed_algorithms: trusted.allowed_algorithms,
            resource_owner_id,
        })
    }

    async fn find_resource_owner(&self, subject: &str) -> AuthResult<Option<ResourceOwnerId>> {
        if let Some(users) = &self.user_accounts
            && let Some(user) = users.find(&UserAccountId::new(subject)).await?
        {
            return Ok(Some(user.id.into()));
        }
        Ok(self
            .clients
            .find(&ClientId::new(subject))
            .await?
            .filter(|c| !c.is_deleted())
            .map(|c| c.client_id().clone().into()))
    }
}

#[async_trait]
impl GrantType for JwtBearerGrantType {
    fn name(&self) -> &'static str {
        GRANT_TYPE_JWT_BEARER
    }

    fn required_parameters(&self) -> &'static [&'static str] {
        &["assertion"]
    }

    async fn prepare_response(
        &self,
        params: &RequestParameters,
        data: &mut GrantTypeData,
    ) -> AuthResult<()> {
        let jws = self.unwrap_assertion(params.require("assertion")?).await?;
        let header = assertion::decode_header(&jws)?;
        let claims = assertion::peek_claims(&jws)?;

        let verification = if claims.iss == claims.sub {
            self.self_issued(&claims.iss, data).await?
        } else if let Some(trusted_issuers) = &self.trusted_issuers {
            self.third_party(trusted_issuers.as_ref(), &claims.iss, &claims.sub)
                .await?
        } else {
            return Err(AuthError::invalid_grant(
                "Unable to find the issuer of the assertion.",
            ));
        };

        if !verification.allowed_algorithms.contains(&header.alg) {
            return Err(AuthError::invalid_grant(format!(
                "The algorithm \"{:?}\" is not allowed.",
                header.alg
            )));
        }

        let key = find_decoding_key(&verification.key_set, header.kid.as_deref(), header.alg)?;
        let rules = AssertionRules {
            algorithm: header.alg,
            audience: &self.audience,
            leeway: self.leeway,
            max_lifetime: Some(self.max_lifetime),
        };
        let now = OffsetDateTime::now_utc().unix_timestamp();
        let verified = assertion::verify(&jws, &key, &rules, now).map_err(|e| {
            tracing::warn!(issuer = %claims.iss, error = %e, "Assertion rejected");
            AuthError::invalid_grant(format!("The assertion is invalid: {e}"))
        })?;

        tracing::debug!(
            issuer = %verified.iss,
            subject = %verified.sub,
            "JWT bearer assertion verified"
        );
        data.set_resource_owner_id(verification.resource_owner_id);
        if let Some(jti) = verified.jti {
            data.set_metadata("assertion_jti", jti);
        }
        Ok(())
    }

    async fn grant(&self, params: &RequestParameters, data: &mut GrantTypeData) -> AuthResult<()> {
        data.resource_owner_id()?;
        if let Some(scope) = params.get("scope") {
            if !data.client()?.is_scope_allowed(scope) {
                return Err(AuthError::invalid_scope(format!(
                    "The scope \"{scope}\" is not allowed for this client."
                )));
            }
            data.set_parameter("scope", scope);
        }
        Ok(())
    }
}
