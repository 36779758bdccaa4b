//! Non-aggregate parties: end users, resource servers and trusted issuers.

use jsonwebtoken::Algorithm;
use jsonwebtoken::jwk::JwkSet;
use serde::{Deserialize, Serialize};

use crate::types::client::Client;
use crate::types::data_bag::DataBag;
use crate::types::id::{ResourceOwnerId, ResourceServerId, UserAccountId};

/// An end-user account known to the embedding application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserAccount {
    /// Account identifier, used as the token subject.
    pub id: UserAccountId,
    /// Profile claims (name, email, ...).
    #[serde(default)]
    pub claims: DataBag,
}

impl UserAccount {
    /// Creates an account without claims.
    #[must_use]
    pub fn new(id: impl Into<UserAccountId>) -> Self {
        Self {
            id: id.into(),
            claims: DataBag::new(),
        }
    }
}

/// The entity a token is issued on behalf of.
#[derive(Debug, Clone)]
pub enum ResourceOwner {
    /// The client itself (client_credentials, self-issued assertions).
    Client(Client),
    /// An end user.
    User(UserAccount),
}

impl ResourceOwner {
    /// Identifier of the owner.
    #[must_use]
    pub fn id(&self) -> ResourceOwnerId {
        match self {
            Self::Client(client) => client.client_id().clone().into(),
            Self::User(user) => user.id.clone().into(),
        }
    }
}

/// A protected API allowed to call the introspection endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceServer {
    /// Resource server identifier.
    pub id: ResourceServerId,
    /// Shared secret used with HTTP Basic authentication.
    pub secret: String,
    /// Disabled servers cannot authenticate.
    #[serde(default)]
    pub disabled: bool,
}

/// An external assertion issuer trusted by the JWT bearer grant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrustedIssuer {
    /// Value of the `iss` claim.
    pub issuer: String,
    /// Keys used to verify the issuer's assertions.
    pub jwks: JwkSet,
    /// Signature algorithms the issuer may use.
    pub allowed_algorithms: Vec<Algorithm>,
}
