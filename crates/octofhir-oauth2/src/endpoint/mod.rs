//! OAuth 2.0 endpoints.
//!
//! Each endpoint is the [`Handler`](crate::pipe::Handler) at the end of a
//! pipe; the stages in front of it parse the body and authenticate the
//! caller.

pub mod authorization;
pub mod extension;
pub mod introspection;
pub mod revocation;
pub mod token;

pub use authorization::AuthorizationEndpoint;
pub use extension::{RefreshTokenIssuer, TokenEndpointExtension};
pub use introspection::IntrospectionEndpoint;
pub use revocation::RevocationEndpoint;
pub use token::TokenEndpoint;
