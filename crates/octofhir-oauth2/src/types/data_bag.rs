//! Immutable, ordered parameter container.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::AuthResult;
use crate::error::AuthError;

/// An immutable ordered map from string keys to JSON values.
///
/// Used for client registration metadata and for the parameter and metadata
/// bags carried by tokens and codes. `with` returns a new bag; an existing
/// bag is never changed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DataBag(IndexMap<String, Value>);

impl DataBag {
    /// Creates an empty bag.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if the key is present.
    #[must_use]
    pub fn has(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Returns the value stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::KeyNotFound` if the key is absent.
    pub fn get(&self, key: &str) -> AuthResult<&Value> {
        self.0.get(key).ok_or_else(|| AuthError::key_not_found(key))
    }

    /// Returns the value under `key` if it is a string.
    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    /// Returns the value under `key` as a list of strings.
    ///
    /// Accepts either a JSON array of strings or a single space-separated
    /// string, so that `scope`-like values can be stored either way.
    #[must_use]
    pub fn get_string_list(&self, key: &str) -> Option<Vec<String>> {
        match self.0.get(key)? {
            Value::Array(items) => Some(
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect(),
            ),
            Value::String(s) => Some(s.split_whitespace().map(str::to_string).collect()),
            _ => None,
        }
    }

    /// Returns a new bag with `key` set to `value`.
    #[must_use]
    pub fn with(&self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        let mut next = self.0.clone();
        next.insert(key.into(), value.into());
        Self(next)
    }

    /// Returns a new bag with every entry of `other` added or overridden.
    #[must_use]
    pub fn with_parameters(&self, other: &DataBag) -> Self {
        let mut next = self.0.clone();
        for (key, value) in &other.0 {
            next.insert(key.clone(), value.clone());
        }
        Self(next)
    }

    /// Returns a new bag without `key`.
    #[must_use]
    pub fn without(&self, key: &str) -> Self {
        let mut next = self.0.clone();
        next.shift_remove(key);
        Self(next)
    }

    /// Iterates over the entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if the bag has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Converts the bag into a JSON object map.
    #[must_use]
    pub fn into_json_map(self) -> serde_json::Map<String, Value> {
        self.0.into_iter().collect()
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for DataBag {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

impl From<serde_json::Map<String, Value>> for DataBag {
    fn from(map: serde_json::Map<String, Value>) -> Self {
        Self(map.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_with_does_not_mutate_original() {
        let original = DataBag::new().with("scope", "openid");
        let updated = original.with("scope", "openid profile");

        assert_eq!(original.get_str("scope"), Some("openid"));
        assert_eq!(updated.get_str("scope"), Some("openid profile"));
    }

    #[test]
    fn test_get_missing_key_fails() {
        let bag = DataBag::new();
        let err = bag.get("nonce").unwrap_err();
        assert!(matches!(err, AuthError::KeyNotFound { ref key } if key == "nonce"));
        assert!(!bag.has("nonce"));
    }

    #[test]
    fn test_with_parameters_overrides_and_keeps_order() {
        let a: DataBag = [("a", json!(1)), ("b", json!(2))].into_iter().collect();
        let b: DataBag = [("b", json!(3)), ("c", json!(4))].into_iter().collect();

        let merged = a.with_parameters(&b);
        let keys: Vec<_> = merged.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, ["a", "b", "c"]);
        assert_eq!(merged.get("b").unwrap(), &json!(3));
    }

    #[test]
    fn test_string_list_accepts_array_or_space_separated() {
        let bag = DataBag::new()
            .with("grant_types", json!(["authorization_code", "refresh_token"]))
            .with("scope", "openid email");

        assert_eq!(
            bag.get_string_list("grant_types").unwrap(),
            vec!["authorization_code", "refresh_token"]
        );
        assert_eq!(bag.get_string_list("scope").unwrap(), vec!["openid", "email"]);
        assert!(bag.get_string_list("missing").is_none());
    }

    #[test]
    fn test_serializes_as_plain_object() {
        let bag = DataBag::new().with("x", 1).with("y", "z");
        assert_eq!(serde_json::to_value(&bag).unwrap(), json!({"x": 1, "y": "z"}));
    }
}
