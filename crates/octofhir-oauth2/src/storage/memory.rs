//! In-memory repositories.
//!
//! Aggregates are kept as append-only event logs in a [`DashMap`], with a
//! second map acting as a read-through cache of replayed state. Suitable for
//! tests and single-instance deployments; nothing survives a restart.

use std::collections::HashSet;

use async_trait::async_trait;
use dashmap::DashMap;

use crate::AuthResult;
use crate::authorization::AuthorizationRequest;
use crate::error::AuthError;
use crate::storage::{
    AccessTokenRepository, AuthorizationCodeRepository, AuthorizationRequestStorage,
    ClientRepository, ConsentRepository, Recorded, RefreshTokenRepository,
    ResourceServerRepository, TrustedIssuerRepository, UserAccountRepository,
};
use crate::types::{
    AccessToken, AccessTokenId, Aggregate, AuthorizationCode, AuthorizationCodeId, Client,
    ClientId, Event, RefreshToken, RefreshTokenId, ResourceServer, ResourceServerId,
    TrustedIssuer, UserAccount, UserAccountId,
};

/// Event log for one aggregate type with a replay cache in front of it.
pub struct EventStore<A: Aggregate> {
    events: DashMap<String, Vec<Event<A::Payload>>>,
    cache: DashMap<String, A>,
}

impl<A: Aggregate> Default for EventStore<A> {
    fn default() -> Self {
        Self {
            events: DashMap::new(),
            cache: DashMap::new(),
        }
    }
}

impl<A: Aggregate> EventStore<A> {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads an aggregate: cache first, then replay of the log.
    ///
    /// # Errors
    ///
    /// Propagates replay errors.
    pub fn load(&self, id: &str) -> AuthResult<Option<A>> {
        if let Some(hit) = self.cache.get(id) {
            return Ok(Some(hit.clone()));
        }

        let Some(history) = self.events.get(id) else {
            return Ok(None);
        };
        if history.is_empty() {
            return Ok(None);
        }

        let aggregate = A::replay(history.iter())?;
        drop(history);
        tracing::trace!(domain_id = %id, "Aggregate rebuilt from event log");
        self.cache.insert(id.to_string(), aggregate.clone());
        Ok(Some(aggregate))
    }

    /// Appends the events of a mutation and refreshes the cache.
    ///
    /// The cached state is the stored state with the new events folded on
    /// top; the caller's snapshot only names the aggregate, so a stale
    /// snapshot cannot roll back events appended by another writer.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::UnsupportedEvent` if an event belongs to another
    /// aggregate.
    pub fn append(&self, (aggregate, events): Recorded<A>) -> AuthResult<()> {
        let id = aggregate.domain_id().to_string();
        if id.is_empty() {
            return Err(AuthError::storage("cannot store an aggregate without identifier"));
        }
        if let Some(foreign) = events.iter().find(|e| e.domain_id != id) {
            return Err(AuthError::unsupported_event(format!(
                "event {} belongs to \"{}\", not \"{}\"",
                foreign.event_id, foreign.domain_id, id
            )));
        }

        if events.is_empty() {
            return Ok(());
        }

        let mut history = self.events.entry(id.clone()).or_default();
        let current = match self.cache.get(&id) {
            Some(hit) => hit.clone(),
            None => A::replay(history.iter())?,
        };
        let next = events.iter().try_fold(current, |state, event| state.apply(event))?;
        history.extend(events);
        self.cache.insert(id, next);
        Ok(())
    }

    /// Returns a copy of the recorded history of an aggregate.
    #[must_use]
    pub fn history(&self, id: &str) -> Vec<Event<A::Payload>> {
        self.events
            .get(id)
            .map(|h| h.value().clone())
            .unwrap_or_default()
    }

    /// Drops the cached state of an aggregate; the log is kept.
    pub fn evict(&self, id: &str) {
        self.cache.remove(id);
    }
}

// =============================================================================
// Aggregate repositories
// =============================================================================

/// In-memory [`ClientRepository`].
#[derive(Default)]
pub struct InMemoryClientRepository {
    store: EventStore<Client>,
}

impl InMemoryClientRepository {
    /// Creates an empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Underlying event store.
    #[must_use]
    pub fn store(&self) -> &EventStore<Client> {
        &self.store
    }
}

#[async_trait]
impl ClientRepository for InMemoryClientRepository {
    async fn find(&self, client_id: &ClientId) -> AuthResult<Option<Client>> {
        self.store.load(client_id.as_str())
    }

    async fn save(&self, client: Recorded<Client>) -> AuthResult<()> {
        self.store.append(client)
    }
}

/// In-memory [`AccessTokenRepository`].
#[derive(Default)]
pub struct InMemoryAccessTokenRepository {
    store: EventStore<AccessToken>,
}

impl InMemoryAccessTokenRepository {
    /// Creates an empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Underlying event store.
    #[must_use]
    pub fn store(&self) -> &EventStore<AccessToken> {
        &self.store
    }
}

#[async_trait]
impl AccessTokenRepository for InMemoryAccessTokenRepository {
    async fn find(&self, id: &AccessTokenId) -> AuthResult<Option<AccessToken>> {
        self.store.load(id.as_str())
    }

    async fn save(&self, token: Recorded<AccessToken>) -> AuthResult<()> {
        self.store.append(token)
    }
}

/// In-memory [`RefreshTokenRepository`].
#[derive(Default)]
pub struct InMemoryRefreshTokenRepository {
    store: EventStore<RefreshToken>,
}

impl InMemoryRefreshTokenRepository {
    /// Creates an empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Underlying event store.
    #[must_use]
    pub fn store(&self) -> &EventStore<RefreshToken> {
        &self.store
    }
}

#[async_trait]
impl RefreshTokenRepository for InMemoryRefreshTokenRepository {
    async fn find(&self, id: &RefreshTokenId) -> AuthResult<Option<RefreshToken>> {
        self.store.load(id.as_str())
    }

    async fn save(&self, token: Recorded<RefreshToken>) -> AuthResult<()> {
        self.store.append(token)
    }
}

/// In-memory [`AuthorizationCodeRepository`].
#[derive(Default)]
pub struct InMemoryAuthorizationCodeRepository {
    store: EventStore<AuthorizationCode>,
}

impl InMemoryAuthorizationCodeRepository {
    /// Creates an empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Underlying event store.
    #[must_use]
    pub fn store(&self) -> &EventStore<AuthorizationCode> {
        &self.store
    }
}

#[async_trait]
impl AuthorizationCodeRepository for InMemoryAuthorizationCodeRepository {
    async fn find(&self, id: &AuthorizationCodeId) -> AuthResult<Option<AuthorizationCode>> {
        self.store.load(id.as_str())
    }

    async fn save(&self, code: Recorded<AuthorizationCode>) -> AuthResult<()> {
        self.store.append(code)
    }
}

// =============================================================================
// Plain lookups
// =============================================================================

/// In-memory [`UserAccountRepository`].
#[derive(Default)]
pub struct InMemoryUserAccountRepository {
    accounts: DashMap<UserAccountId, UserAccount>,
}

impl InMemoryUserAccountRepository {
    /// Creates an empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces an account.
    pub fn insert(&self, account: UserAccount) {
        self.accounts.insert(account.id.clone(), account);
    }
}

#[async_trait]
impl UserAccountRepository for InMemoryUserAccountRepository {
    async fn find(&self, id: &UserAccountId) -> AuthResult<Option<UserAccount>> {
        Ok(self.accounts.get(id).map(|a| a.value().clone()))
    }
}

/// In-memory [`TrustedIssuerRepository`].
#[derive(Default)]
pub struct InMemoryTrustedIssuerRepository {
    issuers: DashMap<String, TrustedIssuer>,
}

impl InMemoryTrustedIssuerRepository {
    /// Creates an empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces an issuer.
    pub fn insert(&self, issuer: TrustedIssuer) {
        self.issuers.insert(issuer.issuer.clone(), issuer);
    }
}

#[async_trait]
impl TrustedIssuerRepository for InMemoryTrustedIssuerRepository {
    async fn find(&self, issuer: &str) -> AuthResult<Option<TrustedIssuer>> {
        Ok(self.issuers.get(issuer).map(|i| i.value().clone()))
    }
}

/// In-memory [`ResourceServerRepository`].
#[derive(Default)]
pub struct InMemoryResourceServerRepository {
    servers: DashMap<ResourceServerId, ResourceServer>,
}

impl InMemoryResourceServerRepository {
    /// Creates an empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a resource server.
    pub fn insert(&self, server: ResourceServer) {
        self.servers.insert(server.id.clone(), server);
    }
}

#[async_trait]
impl ResourceServerRepository for InMemoryResourceServerRepository {
    async fn find(&self, id: &ResourceServerId) -> AuthResult<Option<ResourceServer>> {
        Ok(self.servers.get(id).map(|s| s.value().clone()))
    }
}

/// In-memory [`ConsentRepository`].
#[derive(Default)]
pub struct InMemoryConsentRepository {
    grants: DashMap<(UserAccountId, ClientId), HashSet<String>>,
}

impl InMemoryConsentRepository {
    /// Creates an empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConsentRepository for InMemoryConsentRepository {
    async fn has_consent(
        &self,
        user: &UserAccountId,
        client: &ClientId,
        scope: &[String],
    ) -> AuthResult<bool> {
        Ok(self
            .grants
            .get(&(user.clone(), client.clone()))
            .is_some_and(|granted| scope.iter().all(|s| granted.contains(s))))
    }

    async fn save_consent(
        &self,
        user: &UserAccountId,
        client: &ClientId,
        scope: &[String],
    ) -> AuthResult<()> {
        self.grants
            .entry((user.clone(), client.clone()))
            .or_default()
            .extend(scope.iter().cloned());
        Ok(())
    }
}

/// In-memory [`AuthorizationRequestStorage`].
#[derive(Default)]
pub struct InMemoryAuthorizationRequestStorage {
    requests: DashMap<String, AuthorizationRequest>,
}

impl InMemoryAuthorizationRequestStorage {
    /// Creates an empty storage.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of suspended requests.
    #[must_use]
    pub fn len(&self) -> usize {
        self.requests.len()
    }

    /// Returns `true` if no request is suspended.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }
}

#[async_trait]
impl AuthorizationRequestStorage for InMemoryAuthorizationRequestStorage {
    async fn save(&self, request: &AuthorizationRequest) -> AuthResult<()> {
        self.requests
            .insert(request.authorization_id().to_string(), request.clone());
        Ok(())
    }

    async fn find(&self, authorization_id: &str) -> AuthResult<Option<AuthorizationRequest>> {
        Ok(self
            .requests
            .get(authorization_id)
            .map(|r| r.value().clone()))
    }

    async fn remove(&self, authorization_id: &str) -> AuthResult<()> {
        self.requests.remove(authorization_id);
        Ok(())
    }
}
