//! HTTP request parameters and OAuth 2.0 wire responses.
//!
//! Requests and responses use the `http` types re-exported by axum with a
//! `String` body, so endpoints can be driven directly in tests and mounted
//! in an axum router through [`crate::server`].

use axum::http::{HeaderMap, HeaderValue, Request, Response, StatusCode, header};
use indexmap::IndexMap;
use serde_json::{Map, Value, json};
use url::Url;

use crate::AuthResult;
use crate::error::AuthError;
use crate::types::DataBag;

/// Inbound request with its raw body.
pub type HttpRequest = Request<String>;

/// Outbound response with its serialized body.
pub type HttpResponse = Response<String>;

// =============================================================================
// Request parameters
// =============================================================================

/// Decoded `application/x-www-form-urlencoded` parameters.
///
/// Parameters sent without a value are treated as omitted (RFC 6749 §3.1).
/// When a name repeats, the first occurrence wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestParameters(IndexMap<String, String>);

impl RequestParameters {
    /// Decodes a form body or a query string.
    #[must_use]
    pub fn parse(encoded: &str) -> Self {
        let mut params = IndexMap::new();
        for (key, value) in url::form_urlencoded::parse(encoded.as_bytes()) {
            if value.is_empty() {
                continue;
            }
            params
                .entry(key.into_owned())
                .or_insert_with(|| value.into_owned());
        }
        Self(params)
    }

    /// Decodes the query string of a request URI.
    #[must_use]
    pub fn from_query(request: &HttpRequest) -> Self {
        request.uri().query().map(Self::parse).unwrap_or_default()
    }

    /// Returns a parameter value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Returns `true` if the parameter was sent with a value.
    #[must_use]
    pub fn has(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Returns a required parameter.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::InvalidRequest` if the parameter is missing.
    pub fn require(&self, key: &str) -> AuthResult<&str> {
        self.get(key).ok_or_else(|| AuthError::missing_parameter(key))
    }

    /// Adds or replaces a parameter.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    /// Iterates over the parameters in request order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Copies the parameters into a [`DataBag`].
    #[must_use]
    pub fn to_data_bag(&self) -> DataBag {
        self.0.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for RequestParameters {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// Returns the parameters decoded by the form body stage.
///
/// # Errors
///
/// Returns `AuthError::Internal` if the body was not parsed by an earlier
/// pipe stage.
pub fn body_parameters(request: &HttpRequest) -> AuthResult<&RequestParameters> {
    request
        .extensions()
        .get::<RequestParameters>()
        .ok_or_else(|| AuthError::internal("The request body has not been parsed."))
}

// =============================================================================
// Responses
// =============================================================================

fn base_response(status: StatusCode, content_type: &'static str, body: String) -> HttpResponse {
    let mut response = Response::new(body);
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}

/// Adds the RFC 6749 §5.1 cache prevention headers.
pub fn no_cache(headers: &mut HeaderMap) {
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("no-cache, no-store, max-age=0, must-revalidate, private"),
    );
    headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
}

/// JSON response with the given status.
#[must_use]
pub fn json_response(status: StatusCode, body: &Value) -> HttpResponse {
    base_response(status, "application/json; charset=UTF-8", body.to_string())
}

/// `200` token endpoint response with cache prevention headers.
#[must_use]
pub fn token_response(body: Map<String, Value>) -> HttpResponse {
    let mut response = json_response(StatusCode::OK, &Value::Object(body));
    no_cache(response.headers_mut());
    response
}

/// Response without a body.
#[must_use]
pub fn empty_response(status: StatusCode) -> HttpResponse {
    let mut response = Response::new(String::new());
    *response.status_mut() = status;
    response
}

/// HTML response.
#[must_use]
pub fn html_response(status: StatusCode, body: String) -> HttpResponse {
    base_response(status, "text/html; charset=UTF-8", body)
}

/// `302 Found` redirect to `location`.
///
/// # Errors
///
/// Returns `AuthError::Internal` if the URL is not a valid header value.
pub fn redirect_response(location: &Url) -> AuthResult<HttpResponse> {
    let value = HeaderValue::from_str(location.as_str())
        .map_err(|e| AuthError::internal_with_source("Invalid redirect location", e))?;
    let mut response = empty_response(StatusCode::FOUND);
    response.headers_mut().insert(header::LOCATION, value);
    no_cache(response.headers_mut());
    Ok(response)
}

/// `{"error": ..., "error_description": ...}` body for an error.
#[must_use]
pub fn error_body(error: &AuthError) -> Value {
    json!({
        "error": error.error_code(),
        "error_description": error.description(),
    })
}

/// JSON error response.
///
/// `401` responses carry a `WWW-Authenticate` challenge for `realm`.
#[must_use]
pub fn error_response(error: &AuthError, realm: &str) -> HttpResponse {
    let status = error.http_status();
    let mut response = json_response(status, &error_body(error));
    no_cache(response.headers_mut());

    if status == StatusCode::UNAUTHORIZED {
        let challenge = build_www_authenticate_header(realm, error);
        if let Ok(value) = HeaderValue::from_str(&challenge) {
            response
                .headers_mut()
                .insert(header::WWW_AUTHENTICATE, value);
        }
    }
    response
}

fn build_www_authenticate_header(realm: &str, error: &AuthError) -> String {
    let description = error.description().replace('"', "'");
    format!(
        "Basic realm=\"{realm}\", error=\"{}\", error_description=\"{description}\"",
        error.error_code()
    )
}

/// Wraps a JSON body as `callback(body)` for JSONP clients.
///
/// # Errors
///
/// Returns `AuthError::InvalidRequest` if the callback is not a plain
/// JavaScript identifier path.
pub fn jsonp_response(callback: &str, response: HttpResponse) -> AuthResult<HttpResponse> {
    let valid = !callback.is_empty()
        && callback.len() <= 128
        && callback
            .split('.')
            .all(|part| {
                let mut chars = part.chars();
                chars
                    .next()
                    .is_some_and(|c| c.is_ascii_alphabetic() || c == '_' || c == '$')
                    && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
            });
    if !valid {
        return Err(AuthError::invalid_request(
            "The parameter \"callback\" is invalid.",
        ));
    }

    let (mut parts, body) = response.into_parts();
    let body = format!("/**/{callback}({body})");
    parts.headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/javascript; charset=UTF-8"),
    );
    Ok(Response::from_parts(parts, body))
}

/// Escapes text for HTML element and attribute content.
#[must_use]
pub fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            c => out.push(c),
        }
    }
    out
}
