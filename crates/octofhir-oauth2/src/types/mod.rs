//! Domain types.
//!
//! The four aggregates (client, access token, refresh token, authorization
//! code) are event sourced and immutable: mutators return the new value and
//! the events that produced it.

pub mod access_token;
pub mod authorization_code;
pub mod client;
pub mod data_bag;
pub mod event;
pub mod id;
pub mod parties;
pub mod refresh_token;

pub use access_token::{AccessToken, AccessTokenEvent, NewAccessToken};
pub use authorization_code::{AuthorizationCode, AuthorizationCodeEvent, NewAuthorizationCode};
pub use client::{Client, ClientEvent, auth_method};
pub use data_bag::DataBag;
pub use event::{Aggregate, Event};
pub use id::{
    AccessTokenId, AuthorizationCodeId, ClientId, RefreshTokenId, ResourceOwnerId,
    ResourceServerId, UserAccountId, generate_token_value,
};
pub use parties::{ResourceOwner, ResourceServer, TrustedIssuer, UserAccount};
pub use refresh_token::{NewRefreshToken, RefreshToken, RefreshTokenEvent};
