//! State store trait and error types

use std::collections::HashMap;

use alchemy_core::Value;
use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use thiserror::Error;

use crate::object::ObjectError;
use crate::state::State;

/// Errors that can occur when interacting with a state store
#[derive(Debug, Error)]
pub enum StoreError {
    /// Configuration error (missing credentials, bad attribute, ...)
    #[error("Backend configuration error: {0}")]
    Configuration(String),

    /// The bucket/container does not exist; it is never created by the store
    #[error("Container not found: {0}")]
    ContainerNotFound(String),

    /// The logical key cannot be mapped to an object name
    #[error("Invalid state key '{key}': {reason}")]
    InvalidKey { key: String, reason: String },

    /// Stored state is corrupted or in an unknown format
    #[error("Invalid state file: {0}")]
    InvalidState(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Secret could not be encrypted or decrypted
    #[error("Secret error: {0}")]
    Secret(String),

    /// Local I/O error
    #[error("I/O error: {0}")]
    Io(String),

    /// The backend type is not supported
    #[error("Unsupported backend type: {0}")]
    UnsupportedBackend(String),

    /// Error reported by the object storage service, passed through as is
    #[error(transparent)]
    Storage(#[from] ObjectError),
}

impl StoreError {
    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Create an unsupported backend error
    pub fn unsupported_backend(backend_type: impl Into<String>) -> Self {
        Self::UnsupportedBackend(backend_type.into())
    }

    /// Create an invalid key error
    pub fn invalid_key(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidKey {
            key: key.into(),
            reason: reason.into(),
        }
    }
}

/// Result type for state store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Persistence contract used by the resource lifecycle engine
///
/// Keys are logical resource paths (`db/password`); implementations own the
/// mapping to whatever their storage needs. Data operations initialize the
/// store on first use, so calling [`StateStore::init`] up front is optional.
///
/// Independent operations are never serialized against each other. Callers
/// must ensure there is at most one concurrent writer per key; no store
/// enforces it.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Prepare the store; repeated calls after a success are no-ops
    async fn init(&self) -> StoreResult<()>;

    /// Tear down whatever `init` set up, if the store owns it
    async fn deinit(&self) -> StoreResult<()>;

    /// All logical keys in this store's scope, in no particular order
    async fn list(&self) -> StoreResult<Vec<String>>;

    /// Number of keys in this store's scope
    async fn count(&self) -> StoreResult<usize> {
        Ok(self.list().await?.len())
    }

    /// Read the state for a key
    ///
    /// Returns `None` if no state exists for the key. A cyclic output comes
    /// back as `SharedMap` nodes referencing each other; call
    /// [`SharedMap::clear`](alchemy_core::SharedMap::clear) on one of them
    /// once the state is no longer needed, or the cycle is never freed.
    async fn get(&self, key: &str) -> StoreResult<Option<State>>;

    /// Read several keys concurrently; keys without state are left out
    async fn get_batch(&self, keys: &[String]) -> StoreResult<HashMap<String, State>>;

    /// Read every state in this store's scope
    ///
    /// Cyclic outputs must be broken by the caller as for [`StateStore::get`].
    async fn all(&self) -> StoreResult<HashMap<String, State>> {
        let keys = self.list().await?;
        self.get_batch(&keys).await
    }

    /// Write the state for a key, replacing any previous state
    async fn set(&self, key: &str, state: &State) -> StoreResult<()>;

    /// Remove the state for a key; removing a missing key succeeds
    async fn delete(&self, key: &str) -> StoreResult<()>;
}

/// Issue `get` for every key with at most `concurrency` requests in flight
///
/// Every request runs to completion; if any failed, the first error observed
/// is returned instead of the partial map.
pub(crate) async fn fetch_batch<S>(
    store: &S,
    keys: &[String],
    concurrency: usize,
) -> StoreResult<HashMap<String, State>>
where
    S: StateStore + ?Sized,
{
    let results: Vec<(String, StoreResult<Option<State>>)> = stream::iter(keys.iter().cloned())
        .map(|key| async move {
            let result = store.get(&key).await;
            (key, result)
        })
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await;

    let mut states = HashMap::with_capacity(results.len());
    let mut first_error = None;

    for (key, result) in results {
        match result {
            Ok(Some(state)) => {
                states.insert(key, state);
            }
            Ok(None) => {}
            Err(err) => {
                if first_error.is_none() {
                    first_error = Some(err);
                }
            }
        }
    }

    match first_error {
        Some(err) => Err(err),
        None => Ok(states),
    }
}

/// Configuration for a state backend
#[derive(Debug, Clone)]
pub struct BackendConfig {
    /// Backend type (e.g., "s3", "local", "memory")
    pub backend_type: String,
    /// Backend-specific attributes
    pub attributes: HashMap<String, Value>,
}

impl BackendConfig {
    pub fn new(backend_type: impl Into<String>) -> Self {
        Self {
            backend_type: backend_type.into(),
            attributes: HashMap::new(),
        }
    }

    /// Set an attribute value
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Get a string attribute value
    pub fn get_string(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).and_then(Value::as_str)
    }

    /// Get a string attribute value, accepting secrets as well
    pub fn get_sensitive(&self, key: &str) -> Option<&str> {
        match self.attributes.get(key) {
            Some(Value::String(s)) => Some(s.as_str()),
            Some(Value::Secret(s)) => Some(s.expose()),
            _ => None,
        }
    }

    /// Get a boolean attribute value
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.attributes.get(key).and_then(Value::as_bool)
    }

    /// Get a boolean attribute with a default value
    pub fn get_bool_or(&self, key: &str, default: bool) -> bool {
        self.get_bool(key).unwrap_or(default)
    }

    /// Get an integer attribute value
    pub fn get_int(&self, key: &str) -> Option<i64> {
        self.attributes.get(key).and_then(Value::as_int)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_display() {
        let error = StoreError::unsupported_backend("azure");
        assert_eq!(error.to_string(), "Unsupported backend type: azure");

        let error = StoreError::ContainerNotFound("alchemy-state".to_string());
        assert_eq!(error.to_string(), "Container not found: alchemy-state");

        let error = StoreError::invalid_key("a:b", "must not contain ':'");
        assert_eq!(
            error.to_string(),
            "Invalid state key 'a:b': must not contain ':'"
        );
    }

    #[test]
    fn test_storage_error_is_transparent() {
        let inner = ObjectError::Transport("connection reset".to_string());
        let expected = inner.to_string();
        let error = StoreError::from(inner);
        assert_eq!(error.to_string(), expected);
    }

    #[test]
    fn test_backend_config_attributes() {
        let config = BackendConfig::new("s3")
            .with_attribute("bucket", "my-state")
            .with_attribute("force_path_style", true)
            .with_attribute("batch_concurrency", 4i64)
            .with_attribute("secret_access_key", alchemy_core::Secret::new("s3cr3t"));

        assert_eq!(config.get_string("bucket"), Some("my-state"));
        assert_eq!(config.get_string("force_path_style"), None);
        assert!(config.get_bool_or("force_path_style", false));
        assert!(!config.get_bool_or("missing", false));
        assert_eq!(config.get_int("batch_concurrency"), Some(4));
        assert_eq!(config.get_sensitive("secret_access_key"), Some("s3cr3t"));
        assert_eq!(config.get_string("secret_access_key"), None);
    }
}
