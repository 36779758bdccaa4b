//! # octofhir-oauth2
//!
//! Event-sourced OAuth 2.0 / OpenID Connect authorization server engine.
//!
//! This crate provides:
//! - Event-sourced aggregates for clients, access tokens, refresh tokens and
//!   authorization codes
//! - The authorization_code, refresh_token, client_credentials and JWT bearer
//!   (RFC 7523) grant types
//! - The authorization request pipeline with PKCE and login, consent and
//!   account selection interaction
//! - Token introspection (RFC 7662) and revocation (RFC 7009)
//! - A middleware pipe that composes request stages in front of each endpoint
//!
//! ## Modules
//!
//! - [`types`] - Domain aggregates, identifiers and parameter bags
//! - [`storage`] - Repository contracts and in-memory implementations
//! - [`grant`] - Grant types
//! - [`authorization`] - Authorization request validation and interaction hooks
//! - [`endpoint`] - Token, authorization, introspection and revocation endpoints
//! - [`pipe`] - Request pipeline and its built-in stages
//! - [`server`] - Default wiring and axum router
//!
//! Persistence, session handling and login/consent pages are provided by the
//! embedding application through the traits in [`storage`].

pub mod assertion;
pub mod authorization;
pub mod client_auth;
pub mod config;
pub mod crypto;
pub mod endpoint;
pub mod error;
pub mod grant;
pub mod http;
pub mod jwks;
pub mod pipe;
pub mod pkce;
pub mod server;
pub mod storage;
pub mod token_type;
pub mod token_type_hint;
pub mod types;

pub use config::{AuthConfig, ConfigError};
pub use error::{AuthError, AuthorizationFailure, EndpointError, ErrorCategory};
pub use pipe::{Handler, Middleware, Pipe};
pub use server::{AuthorizationServer, Repositories};

/// Type alias for authorization server results.
pub type AuthResult<T> = Result<T, AuthError>;

/// Prelude module for convenient imports.
///
/// ```ignore
/// use octofhir_oauth2::prelude::*;
/// ```
pub mod prelude {
    pub use crate::AuthResult;
    pub use crate::authorization::{AuthorizationRequest, HookOutcome};
    pub use crate::config::{AuthConfig, ConfigError};
    pub use crate::error::{AuthError, AuthorizationFailure, EndpointError, ErrorCategory};
    pub use crate::grant::{GrantType, GrantTypeData, GrantTypeManager};
    pub use crate::http::{HttpRequest, HttpResponse, RequestParameters};
    pub use crate::pipe::{Handler, Middleware, Next, Pipe, PipeResult};
    pub use crate::server::{AuthorizationServer, Repositories};
    pub use crate::storage::{
        AccessTokenRepository, AuthorizationCodeRepository, AuthorizationRequestStorage,
        ClientRepository, ConsentRepository, RefreshTokenRepository, ResourceServerRepository,
        TrustedIssuerRepository, UserAccountDiscovery, UserAccountRepository,
    };
    pub use crate::types::{
        AccessToken, AuthorizationCode, Client, ClientId, DataBag, RefreshToken, ResourceOwner,
        UserAccount, UserAccountId,
    };
}
