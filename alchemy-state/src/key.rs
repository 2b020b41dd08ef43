//! Mapping between logical state keys and stored object names
//!
//! Logical keys are `/`-separated resource paths. Object storage treats `/`
//! as its own hierarchy separator, so every `/` in a key is stored as `:`.
//! Keys containing `:` are rejected, which keeps the mapping reversible.

use alchemy_core::Scope;

use crate::backend::{StoreError, StoreResult};

/// Default namespace root for stored objects
pub const DEFAULT_PREFIX: &str = "alchemy";

const SEPARATOR: char = '/';
const SUBSTITUTE: char = ':';

/// Check that a logical key can be stored
pub fn validate_key(key: &str) -> StoreResult<()> {
    if key.is_empty() {
        return Err(StoreError::invalid_key(key, "key must not be empty"));
    }
    if key.contains(SUBSTITUTE) {
        return Err(StoreError::invalid_key(
            key,
            format!("key must not contain '{}'", SUBSTITUTE),
        ));
    }
    Ok(())
}

/// Replace every `/` with `:`
pub fn escape(key: &str) -> String {
    key.replace(SEPARATOR, &SUBSTITUTE.to_string())
}

/// Replace every `:` with `/`
pub fn unescape(name: &str) -> String {
    name.replace(SUBSTITUTE, &SEPARATOR.to_string())
}

/// Object names for one scope: `<prefix>/<scope path>/<escaped key>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyCodec {
    prefix: String,
}

impl KeyCodec {
    /// Compute the key prefix for a scope; `None` uses [`DEFAULT_PREFIX`]
    pub fn new(prefix: Option<&str>, scope: &Scope) -> Self {
        let root = prefix.unwrap_or(DEFAULT_PREFIX).trim_end_matches(SEPARATOR);
        let prefix = if root.is_empty() {
            format!("{}/", scope.path())
        } else {
            format!("{}/{}/", root, scope.path())
        };
        Self { prefix }
    }

    /// The key prefix, always ending with `/`
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Object name for a logical key
    pub fn encode(&self, key: &str) -> StoreResult<String> {
        validate_key(key)?;
        Ok(format!("{}{}", self.prefix, escape(key)))
    }

    /// Logical key for an object name
    ///
    /// Returns `None` for names outside this scope, including names that
    /// belong to a nested scope (they still contain a `/` after the prefix).
    pub fn decode(&self, name: &str) -> Option<String> {
        let rest = name.strip_prefix(&self.prefix)?;
        if rest.is_empty() || rest.contains(SEPARATOR) {
            return None;
        }
        Some(unescape(rest))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codec() -> KeyCodec {
        KeyCodec::new(None, &Scope::from_chain(["app", "prod"]).unwrap())
    }

    #[test]
    fn test_default_prefix() {
        assert_eq!(codec().prefix(), "alchemy/app/prod/");
    }

    #[test]
    fn test_custom_prefix() {
        let scope = Scope::from_chain(["app", "prod"]).unwrap();
        assert_eq!(
            KeyCodec::new(Some("states"), &scope).prefix(),
            "states/app/prod/"
        );
        assert_eq!(
            KeyCodec::new(Some("team/states/"), &scope).prefix(),
            "team/states/app/prod/"
        );
        assert_eq!(KeyCodec::new(Some(""), &scope).prefix(), "app/prod/");
    }

    #[test]
    fn test_encode() {
        let codec = codec();
        assert_eq!(
            codec.encode("db/password").unwrap(),
            "alchemy/app/prod/db:password"
        );
        assert_eq!(codec.encode("bucket").unwrap(), "alchemy/app/prod/bucket");
        assert_eq!(codec.encode("a//b/").unwrap(), "alchemy/app/prod/a::b:");
    }

    #[test]
    fn test_encode_rejects_invalid_keys() {
        let codec = codec();
        assert!(matches!(
            codec.encode(""),
            Err(StoreError::InvalidKey { .. })
        ));
        assert!(matches!(
            codec.encode("db:password"),
            Err(StoreError::InvalidKey { .. })
        ));
    }

    #[test]
    fn test_decode_inverts_encode() {
        let codec = codec();
        let keys = ["db/password", "bucket", "a/b/c/d", "/leading", "trailing/", "a//b"];
        for key in keys {
            let name = codec.encode(key).unwrap();
            assert_eq!(codec.decode(&name).as_deref(), Some(key));
        }
    }

    #[test]
    fn test_distinct_keys_encode_distinctly() {
        let codec = codec();
        let keys = ["a/b", "a:b", "ab", "a/b/", "a//b"];
        let names: std::collections::HashSet<String> = keys
            .iter()
            .filter_map(|key| codec.encode(key).ok())
            .collect();
        // "a:b" is rejected; the remaining four stay distinct
        assert_eq!(names.len(), 4);
    }

    #[test]
    fn test_decode_ignores_other_scopes() {
        let codec = codec();
        assert_eq!(codec.decode("alchemy/app/dev/db:password"), None);
        assert_eq!(codec.decode("alchemy/app/prod/"), None);
        assert_eq!(codec.decode("alchemy/app/prod/nested/db:password"), None);
        assert_eq!(codec.decode("other"), None);
    }
}
