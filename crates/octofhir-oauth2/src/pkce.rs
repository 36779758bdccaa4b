//! PKCE (Proof Key for Code Exchange, RFC 7636).
//!
//! The authorization endpoint only records `code_challenge` and
//! `code_challenge_method` (after checking the method is registered); the
//! verifier is checked when the code is exchanged at the token endpoint.
//!
//! # Example
//!
//! ```
//! use octofhir_oauth2::pkce::PkceMethodManager;
//!
//! let methods = PkceMethodManager::with_defaults();
//! let s256 = methods.get("S256").unwrap();
//! assert!(s256.is_challenge_verified(
//!     "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk",
//!     "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM",
//! ));
//! ```

use std::sync::Arc;

use indexmap::IndexMap;

use crate::AuthResult;
use crate::crypto::{constant_time_eq, sha256_base64url};
use crate::error::AuthError;

// =============================================================================
// Methods
// =============================================================================

/// A code challenge transformation.
pub trait PkceMethod: Send + Sync {
    /// Method name as sent in `code_challenge_method`.
    fn name(&self) -> &'static str;

    /// Returns `true` if `verifier` matches `challenge` under this method.
    fn is_challenge_verified(&self, verifier: &str, challenge: &str) -> bool;
}

/// `plain`: the challenge is the verifier.
#[derive(Debug, Clone, Copy, Default)]
pub struct Plain;

impl PkceMethod for Plain {
    fn name(&self) -> &'static str {
        "plain"
    }

    fn is_challenge_verified(&self, verifier: &str, challenge: &str) -> bool {
        constant_time_eq(verifier.as_bytes(), challenge.as_bytes())
    }
}

/// `S256`: the challenge is `BASE64URL(SHA256(verifier))`.
#[derive(Debug, Clone, Copy, Default)]
pub struct S256;

impl PkceMethod for S256 {
    fn name(&self) -> &'static str {
        "S256"
    }

    fn is_challenge_verified(&self, verifier: &str, challenge: &str) -> bool {
        constant_time_eq(sha256_base64url(verifier.as_bytes()).as_bytes(), challenge.as_bytes())
    }
}

// =============================================================================
// Registry
// =============================================================================

/// Registered PKCE methods, keyed by name.
#[derive(Clone, Default)]
pub struct PkceMethodManager {
    methods: IndexMap<&'static str, Arc<dyn PkceMethod>>,
}

impl PkceMethodManager {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry with `plain` and `S256`.
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut manager = Self::new();
        manager.add(Arc::new(Plain));
        manager.add(Arc::new(S256));
        manager
    }

    /// Registers a method, replacing any method with the same name.
    pub fn add(&mut self, method: Arc<dyn PkceMethod>) {
        self.methods.insert(method.name(), method);
    }

    /// Returns `true` if the method is registered.
    #[must_use]
    pub fn has(&self, name: &str) -> bool {
        self.methods.contains_key(name)
    }

    /// Returns a registered method.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::InvalidRequest` if the method is unknown.
    pub fn get(&self, name: &str) -> AuthResult<Arc<dyn PkceMethod>> {
        self.methods.get(name).cloned().ok_or_else(|| {
            AuthError::invalid_request(format!(
                "Unsupported \"code_challenge_method\" \"{name}\". Please use one of the following: {}.",
                self.names().join(", ")
            ))
        })
    }

    /// Registered method names, in registration order.
    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        self.methods.keys().copied().collect()
    }
}

/// Checks a `code_verifier` against RFC 7636 §4.1: 43 to 128 characters from
/// the unreserved set `[A-Za-z0-9-._~]`.
#[must_use]
pub fn is_valid_verifier(verifier: &str) -> bool {
    (43..=128).contains(&verifier.len())
        && verifier
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'.' | b'_' | b'~'))
}
