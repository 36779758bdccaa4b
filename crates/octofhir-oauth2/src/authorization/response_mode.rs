//! Response modes (OAuth 2.0 Multiple Response Type Encoding Practices,
//! Form Post Response Mode).

use std::fmt;
use std::sync::Arc;

use axum::http::StatusCode;
use indexmap::IndexMap;
use serde_json::Value;
use url::Url;

use crate::AuthResult;
use crate::error::AuthError;
use crate::http::{HttpResponse, escape_html, html_response, no_cache, redirect_response};
use crate::types::DataBag;

/// Delivers authorization response parameters to the client.
pub trait ResponseMode: fmt::Debug + Send + Sync {
    /// Value of the `response_mode` parameter.
    fn name(&self) -> &'static str;

    /// Builds the response carrying `parameters` to `redirect_uri`.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Internal` if the response cannot be built.
    fn build_response(&self, redirect_uri: &Url, parameters: &DataBag) -> AuthResult<HttpResponse>;
}

fn as_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .map(as_text)
            .collect::<Vec<_>>()
            .join(" "),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Parameters appended to the redirect URI query.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryResponseMode;

impl ResponseMode for QueryResponseMode {
    fn name(&self) -> &'static str {
        "query"
    }

    fn build_response(&self, redirect_uri: &Url, parameters: &DataBag) -> AuthResult<HttpResponse> {
        let mut location = redirect_uri.clone();
        {
            let mut query = location.query_pairs_mut();
            for (key, value) in parameters.iter() {
                query.append_pair(key, &as_text(value));
            }
        }
        redirect_response(&location)
    }
}

/// Parameters encoded in the redirect URI fragment.
#[derive(Debug, Clone, Copy, Default)]
pub struct FragmentResponseMode;

impl ResponseMode for FragmentResponseMode {
    fn name(&self) -> &'static str {
        "fragment"
    }

    fn build_response(&self, redirect_uri: &Url, parameters: &DataBag) -> AuthResult<HttpResponse> {
        let mut fragment = url::form_urlencoded::Serializer::new(String::new());
        for (key, value) in parameters.iter() {
            fragment.append_pair(key, &as_text(value));
        }
        let mut location = redirect_uri.clone();
        location.set_fragment(Some(&fragment.finish()));
        redirect_response(&location)
    }
}

/// Auto-submitting HTML form posting the parameters to the redirect URI.
#[derive(Debug, Clone, Copy, Default)]
pub struct FormPostResponseMode;

impl ResponseMode for FormPostResponseMode {
    fn name(&self) -> &'static str {
        "form_post"
    }

    fn build_response(&self, redirect_uri: &Url, parameters: &DataBag) -> AuthResult<HttpResponse> {
        let inputs: String = parameters
            .iter()
            .map(|(key, value)| {
                format!(
                    "<input type=\"hidden\" name=\"{}\" value=\"{}\"/>",
                    escape_html(key),
                    escape_html(&as_text(value))
                )
            })
            .collect();

        let body = format!(
            "<!DOCTYPE html>\n<html>\n<head><title>Submit This Form</title></head>\n\
             <body onload=\"javascript:document.forms[0].submit()\">\n\
             <form method=\"post\" action=\"{}\">{inputs}</form>\n</body>\n</html>",
            escape_html(redirect_uri.as_str())
        );
        let mut response = html_response(StatusCode::OK, body);
        no_cache(response.headers_mut());
        Ok(response)
    }
}

/// Registered response modes, keyed by name.
#[derive(Debug, Clone, Default)]
pub struct ResponseModeManager {
    modes: IndexMap<&'static str, Arc<dyn ResponseMode>>,
}

impl ResponseModeManager {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry with `query`, `fragment` and `form_post`.
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut manager = Self::new();
        manager.add(Arc::new(QueryResponseMode));
        manager.add(Arc::new(FragmentResponseMode));
        manager.add(Arc::new(FormPostResponseMode));
        manager
    }

    /// Registers a mode, replacing one with the same name.
    pub fn add(&mut self, mode: Arc<dyn ResponseMode>) {
        self.modes.insert(mode.name(), mode);
    }

    /// Returns `true` if the mode is registered.
    #[must_use]
    pub fn has(&self, name: &str) -> bool {
        self.modes.contains_key(name)
    }

    /// Returns a registered mode.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::InvalidRequest` if the mode is unknown.
    pub fn get(&self, name: &str) -> AuthResult<Arc<dyn ResponseMode>> {
        self.modes.get(name).cloned().ok_or_else(|| {
            AuthError::invalid_request(format!(
                "Unsupported response mode \"{name}\". Please use one of the following: {}.",
                self.list().join(", ")
            ))
        })
    }

    /// Registered mode names.
    #[must_use]
    pub fn list(&self) -> Vec<&'static str> {
        self.modes.keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::header;

    fn redirect_uri() -> Url {
        Url::parse("https://app.example.com/cb?tenant=1").unwrap()
    }

    fn parameters() -> DataBag {
        DataBag::new().with("code", "abc def").with("state", "xyz")
    }

    #[test]
    fn test_query_keeps_existing_query() {
        let response = QueryResponseMode
            .build_response(&redirect_uri(), &parameters())
            .unwrap();
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(
            response.headers()[header::LOCATION],
            "https://app.example.com/cb?tenant=1&code=abc+def&state=xyz"
        );
    }

    #[test]
    fn test_fragment() {
        let response = FragmentResponseMode
            .build_response(&redirect_uri(), &parameters())
            .unwrap();
        assert_eq!(
            response.headers()[header::LOCATION],
            "https://app.example.com/cb?tenant=1#code=abc+def&state=xyz"
        );
    }

    #[test]
    fn test_form_post_escapes_values() {
        let params = DataBag::new().with("state", "\"><script>");
        let response = FormPostResponseMode
            .build_response(&redirect_uri(), &params)
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.body().contains("value=\"&quot;&gt;&lt;script&gt;\""));
        assert!(response.body().contains("action=\"https://app.example.com/cb?tenant=1\""));
        assert!(!response.body().contains("<script>"));
    }

    #[test]
    fn test_manager() {
        let manager = ResponseModeManager::with_defaults();
        assert_eq!(manager.list(), ["query", "fragment", "form_post"]);
        assert!(manager.has("form_post"));
        let err = manager.get("web_message").unwrap_err();
        assert_eq!(err.error_code(), "invalid_request");
    }
}
