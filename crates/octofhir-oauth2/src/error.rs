//! OAuth 2.0 error taxonomy.
//!
//! Every failure in the engine surfaces as an [`AuthError`], which maps onto the
//! RFC 6749 / 7009 / 7662 / OIDC error vocabulary. Authorization endpoint
//! failures are wrapped in an [`AuthorizationFailure`] that remembers the
//! redirect context, so the outermost pipe stage can decide once whether the
//! error is rendered as JSON or delivered to the client's redirect URI.

use std::fmt;
use std::sync::Arc;

use axum::http::StatusCode;
use url::Url;

use crate::authorization::response_mode::ResponseMode;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors raised while processing OAuth 2.0 and OpenID Connect requests.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// The request is missing a parameter or is otherwise malformed.
    #[error("Invalid request: {message}")]
    InvalidRequest {
        /// Description of why the request is invalid.
        message: String,
    },

    /// Client authentication failed.
    #[error("Invalid client: {message}")]
    InvalidClient {
        /// Description of why the client is invalid.
        message: String,
    },

    /// The grant, code or refresh token is invalid, expired, revoked or
    /// issued to another client.
    #[error("Invalid grant: {message}")]
    InvalidGrant {
        /// Description of why the grant is invalid.
        message: String,
    },

    /// The authenticated client may not use this grant or response type.
    #[error("Unauthorized client: {message}")]
    UnauthorizedClient {
        /// Description of why the client is not authorized.
        message: String,
    },

    /// The grant type is not registered on this server.
    #[error("Unsupported grant type: {grant_type}")]
    UnsupportedGrantType {
        /// The requested grant type.
        grant_type: String,
    },

    /// The requested scope is invalid, unknown or exceeds what was granted.
    #[error("Invalid scope: {message}")]
    InvalidScope {
        /// Description of why the scope is invalid.
        message: String,
    },

    /// The `token_type_hint` names a token type this server does not support.
    #[error("Unsupported token type: {message}")]
    UnsupportedTokenType {
        /// Description including the supported hints.
        message: String,
    },

    /// The response type is not supported or not allowed for the client.
    #[error("Unsupported response type: {message}")]
    UnsupportedResponseType {
        /// Description of why the response type was rejected.
        message: String,
    },

    /// The resource owner or the server denied the request.
    #[error("Access denied: {message}")]
    AccessDenied {
        /// Description of why access was denied.
        message: String,
    },

    /// `prompt=none` was requested but the end user is not authenticated.
    #[error("Login required: {message}")]
    LoginRequired {
        /// Description of the missing authentication.
        message: String,
    },

    /// `prompt=none` was requested but consent has not been granted yet.
    #[error("Consent required: {message}")]
    ConsentRequired {
        /// Description of the missing consent.
        message: String,
    },

    /// `prompt=none` was requested but the end user must pick an account.
    #[error("Account selection required: {message}")]
    AccountSelectionRequired {
        /// Description of the missing selection.
        message: String,
    },

    /// A parameter or metadata key was read but is not present.
    #[error("Key not found: {key}")]
    KeyNotFound {
        /// The missing key.
        key: String,
    },

    /// An event was applied to an aggregate it does not belong to.
    #[error("Unsupported event: {message}")]
    UnsupportedEvent {
        /// Description of the mismatch.
        message: String,
    },

    /// A repository failed to load or persist data.
    #[error("Storage error: {message}")]
    Storage {
        /// Description of the storage error.
        message: String,
    },

    /// The server configuration is invalid.
    #[error("Configuration error: {message}")]
    Configuration {
        /// Description of the configuration error.
        message: String,
    },

    /// An unexpected internal error occurred.
    #[error("Internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
        /// Underlying cause, if any.
        #[source]
        source: Option<BoxError>,
    },
}

impl AuthError {
    /// Creates a new `InvalidRequest` error.
    #[must_use]
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    /// Creates an `InvalidRequest` error for a missing parameter.
    #[must_use]
    pub fn missing_parameter(name: &str) -> Self {
        Self::invalid_request(format!("The \"{name}\" parameter is missing."))
    }

    /// Creates an `InvalidRequest` error naming several missing parameters.
    #[must_use]
    pub fn missing_parameters(names: &[&str]) -> Self {
        match names {
            [single] => Self::missing_parameter(single),
            many => {
                let joined = many
                    .iter()
                    .map(|n| format!("\"{n}\""))
                    .collect::<Vec<_>>()
                    .join(", ");
                Self::invalid_request(format!("The {joined} parameters are missing."))
            }
        }
    }

    /// Creates a new `InvalidClient` error.
    #[must_use]
    pub fn invalid_client(message: impl Into<String>) -> Self {
        Self::InvalidClient {
            message: message.into(),
        }
    }

    /// Creates a new `InvalidGrant` error.
    #[must_use]
    pub fn invalid_grant(message: impl Into<String>) -> Self {
        Self::InvalidGrant {
            message: message.into(),
        }
    }

    /// Creates a new `UnauthorizedClient` error.
    #[must_use]
    pub fn unauthorized_client(message: impl Into<String>) -> Self {
        Self::UnauthorizedClient {
            message: message.into(),
        }
    }

    /// Creates a new `UnsupportedGrantType` error.
    #[must_use]
    pub fn unsupported_grant_type(grant_type: impl Into<String>) -> Self {
        Self::UnsupportedGrantType {
            grant_type: grant_type.into(),
        }
    }

    /// Creates a new `InvalidScope` error.
    #[must_use]
    pub fn invalid_scope(message: impl Into<String>) -> Self {
        Self::InvalidScope {
            message: message.into(),
        }
    }

    /// Creates a new `UnsupportedTokenType` error.
    #[must_use]
    pub fn unsupported_token_type(message: impl Into<String>) -> Self {
        Self::UnsupportedTokenType {
            message: message.into(),
        }
    }

    /// Creates a new `UnsupportedResponseType` error.
    #[must_use]
    pub fn unsupported_response_type(message: impl Into<String>) -> Self {
        Self::UnsupportedResponseType {
            message: message.into(),
        }
    }

    /// Creates a new `AccessDenied` error.
    #[must_use]
    pub fn access_denied(message: impl Into<String>) -> Self {
        Self::AccessDenied {
            message: message.into(),
        }
    }

    /// Creates a new `LoginRequired` error.
    #[must_use]
    pub fn login_required(message: impl Into<String>) -> Self {
        Self::LoginRequired {
            message: message.into(),
        }
    }

    /// Creates a new `ConsentRequired` error.
    #[must_use]
    pub fn consent_required(message: impl Into<String>) -> Self {
        Self::ConsentRequired {
            message: message.into(),
        }
    }

    /// Creates a new `AccountSelectionRequired` error.
    #[must_use]
    pub fn account_selection_required(message: impl Into<String>) -> Self {
        Self::AccountSelectionRequired {
            message: message.into(),
        }
    }

    /// Creates a new `KeyNotFound` error.
    #[must_use]
    pub fn key_not_found(key: impl Into<String>) -> Self {
        Self::KeyNotFound { key: key.into() }
    }

    /// Creates a new `UnsupportedEvent` error.
    #[must_use]
    pub fn unsupported_event(message: impl Into<String>) -> Self {
        Self::UnsupportedEvent {
            message: message.into(),
        }
    }

    /// Creates a new `Storage` error.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Creates a new `Configuration` error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Creates a new `Internal` error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a new `Internal` error wrapping an underlying cause.
    #[must_use]
    pub fn internal_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Internal {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Returns `true` if this is a client error (4xx category).
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        self.http_status().is_client_error()
    }

    /// Returns `true` if this is a server error (5xx category).
    #[must_use]
    pub fn is_server_error(&self) -> bool {
        self.http_status().is_server_error()
    }

    /// Returns the error category for logging purposes.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidClient { .. } | Self::InvalidGrant { .. } => ErrorCategory::Authentication,
            Self::UnauthorizedClient { .. }
            | Self::InvalidScope { .. }
            | Self::AccessDenied { .. } => ErrorCategory::Authorization,
            Self::LoginRequired { .. }
            | Self::ConsentRequired { .. }
            | Self::AccountSelectionRequired { .. } => ErrorCategory::Interaction,
            Self::InvalidRequest { .. }
            | Self::UnsupportedGrantType { .. }
            | Self::UnsupportedTokenType { .. }
            | Self::UnsupportedResponseType { .. } => ErrorCategory::Validation,
            Self::Storage { .. } => ErrorCategory::Infrastructure,
            Self::Configuration { .. } => ErrorCategory::Configuration,
            Self::KeyNotFound { .. } | Self::UnsupportedEvent { .. } | Self::Internal { .. } => {
                ErrorCategory::Internal
            }
        }
    }

    /// Returns the OAuth 2.0 error code written to the `error` field.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidRequest { .. } => "invalid_request",
            Self::InvalidClient { .. } => "invalid_client",
            Self::InvalidGrant { .. } => "invalid_grant",
            Self::UnauthorizedClient { .. } => "unauthorized_client",
            Self::UnsupportedGrantType { .. } => "unsupported_grant_type",
            Self::InvalidScope { .. } => "invalid_scope",
            Self::UnsupportedTokenType { .. } => "unsupported_token_type",
            Self::UnsupportedResponseType { .. } => "unsupported_response_type",
            Self::AccessDenied { .. } => "access_denied",
            Self::LoginRequired { .. } => "login_required",
            Self::ConsentRequired { .. } => "consent_required",
            Self::AccountSelectionRequired { .. } => "account_selection_required",
            Self::KeyNotFound { .. }
            | Self::UnsupportedEvent { .. }
            | Self::Storage { .. }
            | Self::Configuration { .. }
            | Self::Internal { .. } => "server_error",
        }
    }

    /// Returns the HTTP status used when the error is rendered as JSON.
    #[must_use]
    pub fn http_status(&self) -> StatusCode {
        match self {
            Self::InvalidClient { .. } => StatusCode::UNAUTHORIZED,
            Self::AccessDenied { .. } => StatusCode::FORBIDDEN,
            Self::KeyNotFound { .. }
            | Self::UnsupportedEvent { .. }
            | Self::Storage { .. }
            | Self::Configuration { .. }
            | Self::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        }
    }

    /// Returns the text written to the `error_description` field.
    ///
    /// Server errors never leak their internal message.
    #[must_use]
    pub fn description(&self) -> String {
        match self {
            Self::InvalidRequest { message }
            | Self::InvalidClient { message }
            | Self::InvalidGrant { message }
            | Self::UnauthorizedClient { message }
            | Self::InvalidScope { message }
            | Self::UnsupportedTokenType { message }
            | Self::UnsupportedResponseType { message }
            | Self::AccessDenied { message }
            | Self::LoginRequired { message }
            | Self::ConsentRequired { message }
            | Self::AccountSelectionRequired { message } => message.clone(),
            Self::UnsupportedGrantType { grant_type } => {
                format!("The grant type \"{grant_type}\" is not supported by this server.")
            }
            Self::KeyNotFound { .. }
            | Self::UnsupportedEvent { .. }
            | Self::Storage { .. }
            | Self::Configuration { .. }
            | Self::Internal { .. } => {
                "The authorization server encountered an unexpected condition.".to_string()
            }
        }
    }
}

impl From<serde_json::Error> for AuthError {
    fn from(err: serde_json::Error) -> Self {
        Self::internal_with_source("JSON serialization failed", err)
    }
}

/// Categories of OAuth errors for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Client or grant verification failed.
    Authentication,
    /// The caller is known but not allowed to do this.
    Authorization,
    /// End-user interaction is needed.
    Interaction,
    /// Request validation errors.
    Validation,
    /// Repository errors.
    Infrastructure,
    /// Configuration errors.
    Configuration,
    /// Internal server errors.
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Authentication => write!(f, "authentication"),
            Self::Authorization => write!(f, "authorization"),
            Self::Interaction => write!(f, "interaction"),
            Self::Validation => write!(f, "validation"),
            Self::Infrastructure => write!(f, "infrastructure"),
            Self::Configuration => write!(f, "configuration"),
            Self::Internal => write!(f, "internal"),
        }
    }
}

// =============================================================================
// Authorization endpoint failures
// =============================================================================

/// An error raised while processing an authorization request, together with
/// the redirect context resolved so far.
///
/// `redirect_uri` is only populated once it has been validated against the
/// client's registration. Until then the failure is rendered as JSON.
#[derive(Debug, thiserror::Error)]
#[error("{error}")]
pub struct AuthorizationFailure {
    /// The underlying OAuth error.
    #[source]
    pub error: AuthError,
    /// Client the request was made for, if it could be resolved.
    pub client_id: Option<String>,
    /// Trusted redirect URI.
    pub redirect_uri: Option<Url>,
    /// The `state` parameter to echo back.
    pub state: Option<String>,
    /// Response mode used to deliver the error.
    pub response_mode: Option<Arc<dyn ResponseMode>>,
}

impl AuthorizationFailure {
    /// Wraps an error that occurred before any context was resolved.
    #[must_use]
    pub fn bare(error: AuthError) -> Self {
        Self {
            error,
            client_id: None,
            redirect_uri: None,
            state: None,
            response_mode: None,
        }
    }

    /// Returns `true` if the error can be delivered by redirect.
    #[must_use]
    pub fn is_redirectable(&self) -> bool {
        self.redirect_uri.is_some() && self.response_mode.is_some()
    }
}

/// Error returned by pipe stages and endpoints.
#[derive(Debug, thiserror::Error)]
pub enum EndpointError {
    /// A plain OAuth error, rendered as JSON.
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// An authorization endpoint error that may be delivered by redirect.
    #[error(transparent)]
    Authorization(Box<AuthorizationFailure>),
}

impl From<AuthorizationFailure> for EndpointError {
    fn from(failure: AuthorizationFailure) -> Self {
        Self::Authorization(Box::new(failure))
    }
}

impl EndpointError {
    /// Returns the underlying OAuth error.
    #[must_use]
    pub fn auth_error(&self) -> &AuthError {
        match self {
            Self::Auth(err) => err,
            Self::Authorization(failure) => &failure.error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_error_display() {
        let err = AuthError::invalid_client("client not found");
        assert_eq!(err.to_string(), "Invalid client: client not found");

        let err = AuthError::unsupported_grant_type("password");
        assert_eq!(err.to_string(), "Unsupported grant type: password");

        let err = AuthError::key_not_found("scope");
        assert_eq!(err.to_string(), "Key not found: scope");
    }

    #[test]
    fn test_missing_parameter_descriptions() {
        assert_eq!(
            AuthError::missing_parameter("grant_type").description(),
            "The \"grant_type\" parameter is missing."
        );
        assert_eq!(
            AuthError::missing_parameters(&["code", "redirect_uri"]).description(),
            "The \"code\", \"redirect_uri\" parameters are missing."
        );
    }

    #[test]
    fn test_error_code_and_status() {
        let err = AuthError::invalid_client("bad secret");
        assert_eq!(err.error_code(), "invalid_client");
        assert_eq!(err.http_status(), StatusCode::UNAUTHORIZED);

        let err = AuthError::invalid_grant("used");
        assert_eq!(err.error_code(), "invalid_grant");
        assert_eq!(err.http_status(), StatusCode::BAD_REQUEST);

        let err = AuthError::unsupported_token_type("nope");
        assert_eq!(err.error_code(), "unsupported_token_type");
        assert_eq!(err.http_status(), StatusCode::BAD_REQUEST);

        let err = AuthError::storage("db down");
        assert_eq!(err.error_code(), "server_error");
        assert_eq!(err.http_status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_server_errors_hide_details() {
        let err = AuthError::storage("connection refused to 10.0.0.3");
        assert!(!err.description().contains("10.0.0.3"));
        assert!(err.is_server_error());
        assert!(!err.is_client_error());
    }

    #[test]
    fn test_internal_error_keeps_source() {
        let cause = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err = AuthError::from(cause);
        assert!(err.source().is_some());
        assert_eq!(err.category(), ErrorCategory::Internal);
    }

    #[test]
    fn test_error_category() {
        assert_eq!(
            AuthError::invalid_client("x").category(),
            ErrorCategory::Authentication
        );
        assert_eq!(
            AuthError::consent_required("x").category(),
            ErrorCategory::Interaction
        );
        assert_eq!(
            AuthError::unauthorized_client("x").category(),
            ErrorCategory::Authorization
        );
        assert_eq!(ErrorCategory::Interaction.to_string(), "interaction");
    }

    #[test]
    fn test_bare_authorization_failure_is_not_redirectable() {
        let failure = AuthorizationFailure::bare(AuthError::invalid_request("x"));
        assert!(!failure.is_redirectable());
        let err = EndpointError::from(failure);
        assert_eq!(err.auth_error().error_code(), "invalid_request");
    }
}
