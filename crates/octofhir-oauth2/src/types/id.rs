//! Opaque identifier newtypes.
//!
//! All identifiers wrap a string and compare by value. Token and code
//! identifiers double as the bearer value handed to clients, so freshly
//! generated ones carry 256 bits of randomness.

use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;
use serde::{Deserialize, Serialize};

/// Generates a 256-bit random value encoded as unpadded base64url.
#[must_use]
pub fn generate_token_value() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wraps an existing identifier value.
            #[must_use]
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Returns the identifier as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consumes the identifier and returns the inner string.
            #[must_use]
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

macro_rules! random_id {
    ($name:ident) => {
        impl $name {
            /// Generates a new random identifier.
            #[must_use]
            pub fn generate() -> Self {
                Self(generate_token_value())
            }
        }
    };
}

string_id!(
    /// Public identifier of a registered client.
    ClientId
);
string_id!(
    /// Identifier of an access token; also its bearer value.
    AccessTokenId
);
string_id!(
    /// Identifier of a refresh token; also its bearer value.
    RefreshTokenId
);
string_id!(
    /// Identifier of an authorization code; also the `code` value.
    AuthorizationCodeId
);
string_id!(
    /// Identifier of the entity on whose behalf a token is issued.
    ResourceOwnerId
);
string_id!(
    /// Identifier of a resource server allowed to introspect tokens.
    ResourceServerId
);
string_id!(
    /// Identifier of an end-user account.
    UserAccountId
);

random_id!(AccessTokenId);
random_id!(RefreshTokenId);
random_id!(AuthorizationCodeId);
random_id!(ClientId);

impl From<ClientId> for ResourceOwnerId {
    fn from(id: ClientId) -> Self {
        Self(id.0)
    }
}

impl From<UserAccountId> for ResourceOwnerId {
    fn from(id: UserAccountId) -> Self {
        Self(id.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_compare_by_value() {
        assert_eq!(ClientId::new("abc"), ClientId::from("abc"));
        assert_ne!(ClientId::new("abc"), ClientId::new("abd"));
    }

    #[test]
    fn test_generated_values_are_distinct_and_url_safe() {
        let a = AccessTokenId::generate();
        let b = AccessTokenId::generate();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 43);
        assert!(
            a.as_str()
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        );
    }

    #[test]
    fn test_serde_is_transparent() {
        let id = RefreshTokenId::new("rt-1");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"rt-1\"");
        let parsed: RefreshTokenId = serde_json::from_str("\"rt-1\"").unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn test_resource_owner_from_client() {
        let owner: ResourceOwnerId = ClientId::new("CLIENT_ID").into();
        assert_eq!(owner.as_str(), "CLIENT_ID");
    }
}
