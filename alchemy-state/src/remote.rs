//! State store backed by remote object storage
//!
//! Every state is one object named `<prefix>/<scope path>/<escaped key>`
//! holding the JSON envelope produced by [`StateCodec`].

use std::collections::HashMap;

use alchemy_core::{Scope, Secret};
use async_trait::async_trait;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::backend::{BackendConfig, StateStore, StoreError, StoreResult, fetch_batch};
use crate::codec::StateCodec;
use crate::key::KeyCodec;
use crate::object::ObjectStorage;
use crate::state::State;

/// Content type of stored state objects
pub const STATE_CONTENT_TYPE: &str = "application/json";

/// Default cap on concurrent requests issued by `get_batch`
pub const DEFAULT_BATCH_CONCURRENCY: usize = 16;

/// Options shared by every remote store regardless of the storage service
#[derive(Debug, Clone)]
pub struct RemoteStoreOptions {
    /// Namespace root for object names (default: "alchemy")
    pub prefix: Option<String>,
    /// Passphrase used to encrypt secrets; secrets are stored in clear text without it
    pub passphrase: Option<Secret>,
    /// Maximum number of concurrent reads in `get_batch`
    pub batch_concurrency: usize,
}

impl RemoteStoreOptions {
    /// Read `prefix`, `passphrase` and `batch_concurrency` attributes
    pub fn from_config(config: &BackendConfig) -> StoreResult<Self> {
        let batch_concurrency = match config.get_int("batch_concurrency") {
            None => DEFAULT_BATCH_CONCURRENCY,
            Some(n) if n > 0 => n as usize,
            Some(n) => {
                return Err(StoreError::configuration(format!(
                    "batch_concurrency must be positive, got {}",
                    n
                )));
            }
        };

        Ok(Self {
            prefix: config.get_string("prefix").map(str::to_string),
            passphrase: config.get_sensitive("passphrase").map(Secret::new),
            batch_concurrency,
        })
    }
}

impl Default for RemoteStoreOptions {
    fn default() -> Self {
        Self {
            prefix: None,
            passphrase: None,
            batch_concurrency: DEFAULT_BATCH_CONCURRENCY,
        }
    }
}

/// State store persisting one object per state in a bucket/container
///
/// Construction does no I/O. The container is checked once, on `init` or on
/// the first data operation, and is never created or deleted by the store.
pub struct RemoteStateStore<O> {
    storage: O,
    scope: Scope,
    keys: KeyCodec,
    codec: StateCodec,
    batch_concurrency: usize,
    ready: OnceCell<()>,
}

impl<O: ObjectStorage> RemoteStateStore<O> {
    pub fn new(storage: O, scope: Scope, options: RemoteStoreOptions) -> Self {
        let keys = KeyCodec::new(options.prefix.as_deref(), &scope);
        let codec = StateCodec::from_passphrase(options.passphrase.as_ref().map(Secret::expose));

        Self {
            storage,
            scope,
            keys,
            codec,
            batch_concurrency: options.batch_concurrency.max(1),
            ready: OnceCell::new(),
        }
    }

    /// The underlying object storage client
    pub fn storage(&self) -> &O {
        &self.storage
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    /// Prefix of every object name written by this store
    pub fn key_prefix(&self) -> &str {
        self.keys.prefix()
    }

    /// Run the container check unless it already succeeded
    ///
    /// Concurrent callers share one in-flight check. A failed check is not
    /// remembered, so the next call tries again.
    pub async fn ensure_ready(&self) -> StoreResult<()> {
        self.ready
            .get_or_try_init(|| self.check_container())
            .await
            .map(|_| ())
    }

    async fn check_container(&self) -> StoreResult<()> {
        let container = self.storage.container();

        match self.storage.container_exists().await {
            Ok(true) => {
                info!(container, prefix = self.keys.prefix(), "state store ready");
                Ok(())
            }
            Ok(false) => Err(StoreError::ContainerNotFound(container.to_string())),
            Err(err) if err.is_not_found() => {
                Err(StoreError::ContainerNotFound(container.to_string()))
            }
            Err(err) => Err(err.into()),
        }
    }
}

#[async_trait]
impl<O: ObjectStorage> StateStore for RemoteStateStore<O> {
    async fn init(&self) -> StoreResult<()> {
        self.ensure_ready().await
    }

    async fn deinit(&self) -> StoreResult<()> {
        // The container outlives the store; nothing to tear down.
        Ok(())
    }

    async fn list(&self) -> StoreResult<Vec<String>> {
        self.ensure_ready().await?;

        let prefix = self.keys.prefix();
        let mut keys = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let page = self
                .storage
                .list_page(prefix, continuation.as_deref())
                .await?;
            keys.extend(page.names.iter().filter_map(|name| self.keys.decode(name)));

            match page.next {
                Some(next) => continuation = Some(next),
                None => break,
            }
        }

        debug!(prefix, count = keys.len(), "listed states");
        Ok(keys)
    }

    async fn get(&self, key: &str) -> StoreResult<Option<State>> {
        self.ensure_ready().await?;
        let name = self.keys.encode(key)?;

        match self.storage.get(&name).await {
            Ok(bytes) => {
                debug!(key, object = %name, bytes = bytes.len(), "read state");
                self.codec.deserialize(&bytes, Some(&self.scope)).map(Some)
            }
            Err(err) if err.is_not_found() => {
                debug!(key, object = %name, "no state");
                Ok(None)
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn get_batch(&self, keys: &[String]) -> StoreResult<HashMap<String, State>> {
        self.ensure_ready().await?;
        fetch_batch(self, keys, self.batch_concurrency).await
    }

    async fn set(&self, key: &str, state: &State) -> StoreResult<()> {
        self.ensure_ready().await?;
        let name = self.keys.encode(key)?;
        let body = self.codec.serialize(state)?;

        debug!(key, object = %name, bytes = body.len(), "writing state");
        self.storage.put(&name, body, STATE_CONTENT_TYPE).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        self.ensure_ready().await?;
        let name = self.keys.encode(key)?;

        match self.storage.delete(&name).await {
            Ok(()) => {
                debug!(key, object = %name, "deleted state");
                Ok(())
            }
            Err(err) if err.is_not_found() => {
                debug!(key, object = %name, "state already absent");
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::{MemoryObjectStorage, ObjectError, ObjectPage, ObjectResult};
    use crate::state::StateStatus;
    use alchemy_core::Value;
    use futures_util::future::join_all;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn scope(chain: &[&str]) -> Scope {
        Scope::from_chain(chain.iter().copied()).unwrap()
    }

    fn store_with(storage: MemoryObjectStorage) -> RemoteStateStore<MemoryObjectStorage> {
        RemoteStateStore::new(storage, scope(&["app", "prod"]), RemoteStoreOptions::default())
    }

    fn store() -> RemoteStateStore<MemoryObjectStorage> {
        store_with(MemoryObjectStorage::new("alchemy-state"))
    }

    fn state(id: &str) -> State {
        State::new("azure::BlobContainer", id, format!("app/prod/{}", id))
            .with_status(StateStatus::Created)
            .with_output(Value::from(format!("https://example/{}", id)))
    }

    #[tokio::test]
    async fn test_set_get_list_delete() {
        let store = store();
        assert_eq!(store.key_prefix(), "alchemy/app/prod/");

        let password = state("password");
        store.set("db/password", &password).await.unwrap();

        assert_eq!(store.storage().names(), ["alchemy/app/prod/db:password"]);
        assert_eq!(
            store
                .storage()
                .content_type("alchemy/app/prod/db:password")
                .as_deref(),
            Some(STATE_CONTENT_TYPE)
        );
        assert_eq!(store.list().await.unwrap(), ["db/password"]);

        let read = store.get("db/password").await.unwrap().unwrap();
        assert!(read.same_content(&password));
        assert_eq!(read.scope.as_ref(), Some(store.scope()));

        store.delete("db/password").await.unwrap();
        assert!(store.list().await.unwrap().is_empty());
        assert!(store.storage().names().is_empty());
    }

    #[tokio::test]
    async fn test_set_overwrites() {
        let store = store();
        store.set("bucket", &state("bucket")).await.unwrap();

        let updated = state("bucket").with_status(StateStatus::Updated).with_seq(2);
        store.set("bucket", &updated).await.unwrap();

        let read = store.get("bucket").await.unwrap().unwrap();
        assert!(read.same_content(&updated));
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_get_missing_returns_none() {
        let store = store();
        assert!(store.get("never/written").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let store = store();
        store.set("bucket", &state("bucket")).await.unwrap();
        store.delete("bucket").await.unwrap();
        store.delete("bucket").await.unwrap();
        store.delete("never/written").await.unwrap();
    }

    #[tokio::test]
    async fn test_invalid_key() {
        let store = store();
        let result = store.set("db:password", &state("password")).await;
        assert!(matches!(result, Err(StoreError::InvalidKey { .. })));
        assert!(matches!(
            store.get("").await,
            Err(StoreError::InvalidKey { .. })
        ));
    }

    #[tokio::test]
    async fn test_remote_errors_propagate() {
        let store = store();
        store.storage().fail_on("alchemy/app/prod/broken");

        assert!(matches!(
            store.get("broken").await,
            Err(StoreError::Storage(ObjectError::Service {
                status: Some(500),
                ..
            }))
        ));
        assert!(matches!(
            store.delete("broken").await,
            Err(StoreError::Storage(_))
        ));
        assert!(matches!(
            store.set("broken", &state("broken")).await,
            Err(StoreError::Storage(_))
        ));
    }

    #[tokio::test]
    async fn test_list_excludes_other_scopes() {
        let storage = MemoryObjectStorage::new("alchemy-state");
        let prod = store_with(storage);

        prod.set("a", &state("a")).await.unwrap();
        prod.set("b/c", &state("c")).await.unwrap();

        // Objects from a sibling scope, a nested scope, and another prefix
        for name in [
            "alchemy/app/dev/a",
            "alchemy/app/prod/nested/a",
            "other/app/prod/a",
        ] {
            prod.storage()
                .put(name, b"{}".to_vec(), STATE_CONTENT_TYPE)
                .await
                .unwrap();
        }

        let mut keys = prod.list().await.unwrap();
        keys.sort();
        assert_eq!(keys, ["a", "b/c"]);
        assert_eq!(prod.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_list_drains_pagination() {
        let store = store_with(MemoryObjectStorage::new("alchemy-state").with_page_size(2));
        for i in 0..7 {
            let key = format!("res/{}", i);
            store.set(&key, &state(&i.to_string())).await.unwrap();
        }

        let mut keys = store.list().await.unwrap();
        keys.sort();
        let expected: Vec<String> = (0..7).map(|i| format!("res/{}", i)).collect();
        assert_eq!(keys, expected);
    }

    #[tokio::test]
    async fn test_get_batch_omits_missing() {
        let store = store();
        store.set("k1", &state("k1")).await.unwrap();

        let batch = store
            .get_batch(&["k1".to_string(), "k2".to_string()])
            .await
            .unwrap();

        assert_eq!(batch.len(), 1);
        assert!(batch["k1"].same_content(&state("k1")));
        assert!(!batch.contains_key("k2"));
    }

    #[tokio::test]
    async fn test_get_batch_reports_failure() {
        let store = store();
        store.set("k1", &state("k1")).await.unwrap();
        store.storage().fail_on("alchemy/app/prod/k2");

        let result = store
            .get_batch(&["k1".to_string(), "k2".to_string()])
            .await;
        assert!(matches!(result, Err(StoreError::Storage(_))));
    }

    /// Records the highest number of `get` calls running at once
    struct InFlightStorage {
        inner: MemoryObjectStorage,
        current: AtomicUsize,
        peak: AtomicUsize,
    }

    impl InFlightStorage {
        fn new() -> Self {
            Self {
                inner: MemoryObjectStorage::new("alchemy-state"),
                current: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ObjectStorage for InFlightStorage {
        fn container(&self) -> &str {
            self.inner.container()
        }

        async fn container_exists(&self) -> ObjectResult<bool> {
            self.inner.container_exists().await
        }

        async fn get(&self, name: &str) -> ObjectResult<Vec<u8>> {
            let running = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(running, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            let result = self.inner.get(name).await;
            self.current.fetch_sub(1, Ordering::SeqCst);
            result
        }

        async fn put(&self, name: &str, body: Vec<u8>, content_type: &str) -> ObjectResult<()> {
            self.inner.put(name, body, content_type).await
        }

        async fn delete(&self, name: &str) -> ObjectResult<()> {
            self.inner.delete(name).await
        }

        async fn list_page(
            &self,
            prefix: &str,
            continuation: Option<&str>,
        ) -> ObjectResult<ObjectPage> {
            self.inner.list_page(prefix, continuation).await
        }
    }

    #[tokio::test]
    async fn test_get_batch_respects_concurrency_cap() {
        let store = RemoteStateStore::new(
            InFlightStorage::new(),
            scope(&["app", "prod"]),
            RemoteStoreOptions {
                batch_concurrency: 3,
                ..RemoteStoreOptions::default()
            },
        );
        let keys: Vec<String> = (0..20).map(|i| format!("key{}", i)).collect();
        for key in &keys {
            store.set(key, &state(key)).await.unwrap();
        }

        let states = store.get_batch(&keys).await.unwrap();
        assert_eq!(states.len(), 20);
        assert_eq!(store.storage().peak.load(Ordering::SeqCst), 3);
        assert_eq!(store.storage().current.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_all() {
        let store = RemoteStateStore::new(
            MemoryObjectStorage::new("alchemy-state").with_page_size(3),
            scope(&["app", "prod"]),
            RemoteStoreOptions {
                batch_concurrency: 2,
                ..RemoteStoreOptions::default()
            },
        );
        for key in ["a", "b/c", "d/e/f", "g", "h"] {
            store.set(key, &state(key)).await.unwrap();
        }

        let all = store.all().await.unwrap();
        assert_eq!(all.len(), 5);
        assert!(all["d/e/f"].same_content(&state("d/e/f")));
    }

    #[tokio::test]
    async fn test_lazy_init_on_first_use() {
        let store = store();
        assert_eq!(store.storage().exists_checks(), 0);

        assert!(store.get("anything").await.unwrap().is_none());
        assert_eq!(store.storage().exists_checks(), 1);

        store.init().await.unwrap();
        store.list().await.unwrap();
        assert_eq!(store.storage().exists_checks(), 1);
    }

    #[tokio::test]
    async fn test_missing_container() {
        let store = store_with(MemoryObjectStorage::new("alchemy-state").without_container());

        assert!(matches!(
            store.get("db/password").await,
            Err(StoreError::ContainerNotFound(name)) if name == "alchemy-state"
        ));
        assert!(matches!(
            store.init().await,
            Err(StoreError::ContainerNotFound(_))
        ));

        // Failures are not cached; the store becomes usable once the container exists
        store.storage().create_container();
        store.init().await.unwrap();
        assert!(store.get("db/password").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_concurrent_first_use_checks_once() {
        let store = store();

        let results = join_all((0..8).map(|i| {
            let store = &store;
            async move { store.get(&format!("k{}", i)).await }
        }))
        .await;

        assert!(results.iter().all(|r| matches!(r, Ok(None))));
        assert_eq!(store.storage().exists_checks(), 1);
    }

    #[tokio::test]
    async fn test_deinit_keeps_data() {
        let store = store();
        store.set("bucket", &state("bucket")).await.unwrap();
        store.deinit().await.unwrap();

        assert_eq!(store.storage().names().len(), 1);
        assert!(store.get("bucket").await.unwrap().is_some());
    }

    #[test]
    fn test_options_from_config() {
        let config = BackendConfig::new("s3")
            .with_attribute("prefix", "team")
            .with_attribute("passphrase", Secret::new("correct horse"))
            .with_attribute("batch_concurrency", 4i64);
        let options = RemoteStoreOptions::from_config(&config).unwrap();
        assert_eq!(options.prefix.as_deref(), Some("team"));
        assert_eq!(
            options.passphrase.as_ref().map(Secret::expose),
            Some("correct horse")
        );
        assert!(!format!("{:?}", options).contains("correct horse"));
        assert_eq!(options.batch_concurrency, 4);

        let defaults = RemoteStoreOptions::from_config(&BackendConfig::new("s3")).unwrap();
        assert_eq!(defaults.prefix, None);
        assert_eq!(defaults.batch_concurrency, DEFAULT_BATCH_CONCURRENCY);

        let invalid = BackendConfig::new("s3").with_attribute("batch_concurrency", 0i64);
        assert!(matches!(
            RemoteStoreOptions::from_config(&invalid),
            Err(StoreError::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn test_custom_prefix_and_encrypted_secrets() {
        let store = RemoteStateStore::new(
            MemoryObjectStorage::new("alchemy-state"),
            scope(&["app", "prod"]),
            RemoteStoreOptions {
                prefix: Some("team".to_string()),
                passphrase: Some(Secret::new("correct horse")),
                ..RemoteStoreOptions::default()
            },
        );
        let secret = state("key").with_output(Value::secret("account-key"));
        store.set("storage/key", &secret).await.unwrap();

        assert_eq!(store.storage().names(), ["team/app/prod/storage:key"]);
        let raw = store
            .storage()
            .get("team/app/prod/storage:key")
            .await
            .unwrap();
        assert!(!String::from_utf8_lossy(&raw).contains("account-key"));

        let read = store.get("storage/key").await.unwrap().unwrap();
        assert_eq!(read.output, Value::secret("account-key"));
    }
}
