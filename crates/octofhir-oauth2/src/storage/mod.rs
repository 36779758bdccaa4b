//! Repository contracts.
//!
//! The engine never talks to a database directly. Aggregate repositories
//! receive the `(aggregate, events)` pair produced by a mutator and must
//! append the events; `find` rebuilds the aggregate from its history (a
//! read-through cache in front of the event log is allowed, but a cache miss
//! must fall back to the log).
//!
//! No optimistic-concurrency check is performed by the engine. Backends that
//! need one should reject an append whose history changed since `find`.
//!
//! [`memory`] provides an in-process implementation of every contract.

pub mod memory;

use async_trait::async_trait;
use axum::http::HeaderMap;

use crate::AuthResult;
use crate::authorization::AuthorizationRequest;
use crate::types::{
    AccessToken, AccessTokenId, Aggregate, AuthorizationCode, AuthorizationCodeId, Client,
    ClientId, Event, NewAccessToken, NewAuthorizationCode, NewRefreshToken, RefreshToken,
    RefreshTokenId, ResourceServer, ResourceServerId, TrustedIssuer, UserAccount, UserAccountId,
};

/// An aggregate together with the events that produced its current state.
pub type Recorded<A> = (A, Vec<Event<<A as Aggregate>::Payload>>);

/// Registered clients.
#[async_trait]
pub trait ClientRepository: Send + Sync {
    /// Finds a client by its public identifier.
    ///
    /// Deleted clients are returned too; callers check `is_deleted()`.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn find(&self, client_id: &ClientId) -> AuthResult<Option<Client>>;

    /// Appends the events of a client mutation.
    ///
    /// # Errors
    ///
    /// Returns an error if the events cannot be stored.
    async fn save(&self, client: Recorded<Client>) -> AuthResult<()>;
}

/// Issued access tokens.
#[async_trait]
pub trait AccessTokenRepository: Send + Sync {
    /// Generates the identifier of a new token.
    fn generate_id(&self) -> AccessTokenId {
        AccessTokenId::generate()
    }

    /// Builds a new token. Nothing is stored until [`save`](Self::save).
    fn create(&self, new: NewAccessToken) -> Recorded<AccessToken> {
        AccessToken::create_empty().create(new)
    }

    /// Finds a token by identifier, whatever its status.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn find(&self, id: &AccessTokenId) -> AuthResult<Option<AccessToken>>;

    /// Appends the events of a token mutation.
    ///
    /// # Errors
    ///
    /// Returns an error if the events cannot be stored.
    async fn save(&self, token: Recorded<AccessToken>) -> AuthResult<()>;
}

/// Issued refresh tokens.
#[async_trait]
pub trait RefreshTokenRepository: Send + Sync {
    /// Generates the identifier of a new token.
    fn generate_id(&self) -> RefreshTokenId {
        RefreshTokenId::generate()
    }

    /// Builds a new token. Nothing is stored until [`save`](Self::save).
    fn create(&self, new: NewRefreshToken) -> Recorded<RefreshToken> {
        RefreshToken::create_empty().create(new)
    }

    /// Finds a token by identifier, whatever its status.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn find(&self, id: &RefreshTokenId) -> AuthResult<Option<RefreshToken>>;

    /// Appends the events of a token mutation.
    ///
    /// # Errors
    ///
    /// Returns an error if the events cannot be stored.
    async fn save(&self, token: Recorded<RefreshToken>) -> AuthResult<()>;
}

/// Issued authorization codes.
#[async_trait]
pub trait AuthorizationCodeRepository: Send + Sync {
    /// Generates the identifier of a new code.
    fn generate_id(&self) -> AuthorizationCodeId {
        AuthorizationCodeId::generate()
    }

    /// Builds a new code. Nothing is stored until [`save`](Self::save).
    fn create(&self, new: NewAuthorizationCode) -> Recorded<AuthorizationCode> {
        AuthorizationCode::create_empty().create(new)
    }

    /// Finds a code by identifier, whatever its status.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn find(&self, id: &AuthorizationCodeId) -> AuthResult<Option<AuthorizationCode>>;

    /// Appends the events of a code mutation.
    ///
    /// # Errors
    ///
    /// Returns an error if the events cannot be stored.
    async fn save(&self, code: Recorded<AuthorizationCode>) -> AuthResult<()>;
}

/// End-user accounts.
#[async_trait]
pub trait UserAccountRepository: Send + Sync {
    /// Finds an account by identifier.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn find(&self, id: &UserAccountId) -> AuthResult<Option<UserAccount>>;
}

/// Issuers whose assertions the JWT bearer grant accepts.
#[async_trait]
pub trait TrustedIssuerRepository: Send + Sync {
    /// Finds an issuer by its `iss` value.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn find(&self, issuer: &str) -> AuthResult<Option<TrustedIssuer>>;
}

/// Resource servers allowed to introspect tokens.
#[async_trait]
pub trait ResourceServerRepository: Send + Sync {
    /// Finds a resource server by identifier.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn find(&self, id: &ResourceServerId) -> AuthResult<Option<ResourceServer>>;
}

/// Consent previously granted by end users.
#[async_trait]
pub trait ConsentRepository: Send + Sync {
    /// Returns `true` if `user` already granted `client` every scope in `scope`.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn has_consent(
        &self,
        user: &UserAccountId,
        client: &ClientId,
        scope: &[String],
    ) -> AuthResult<bool>;

    /// Records that `user` granted `client` the given scopes.
    ///
    /// # Errors
    ///
    /// Returns an error if the consent cannot be stored.
    async fn save_consent(
        &self,
        user: &UserAccountId,
        client: &ClientId,
        scope: &[String],
    ) -> AuthResult<()>;
}

/// Authorization requests suspended while the end user interacts with the
/// external login, account selection or consent pages.
///
/// The external UI loads the request by `authorization_id`, records the
/// outcome on it and saves it back before sending the user agent to the
/// authorization endpoint again.
#[async_trait]
pub trait AuthorizationRequestStorage: Send + Sync {
    /// Stores or replaces a request under its `authorization_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the request cannot be stored.
    async fn save(&self, request: &AuthorizationRequest) -> AuthResult<()>;

    /// Loads a suspended request.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn find(&self, authorization_id: &str) -> AuthResult<Option<AuthorizationRequest>>;

    /// Removes a request once it has completed.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn remove(&self, authorization_id: &str) -> AuthResult<()>;
}

/// Resolves the end user behind an authorization request.
///
/// Session and cookie handling belong to the embedding application; this
/// trait is the only thing the engine needs from it.
#[async_trait]
pub trait UserAccountDiscovery: Send + Sync {
    /// Returns the currently authenticated end user, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the session backend fails.
    async fn find(
        &self,
        request: &AuthorizationRequest,
        headers: &HeaderMap,
    ) -> AuthResult<Option<UserAccount>>;
}
