//! Local file backend for state storage
//!
//! Each state is a JSON file at `<root>/<scope path>/<escaped key>.json`
//! (default root: `.alchemy`). Writes go through a temporary file and a
//! rename so a crash never leaves a truncated state behind.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use alchemy_core::Scope;
use async_trait::async_trait;
use tracing::debug;

use crate::backend::{BackendConfig, StateStore, StoreError, StoreResult, fetch_batch};
use crate::codec::StateCodec;
use crate::key::{escape, unescape, validate_key};
use crate::remote::DEFAULT_BATCH_CONCURRENCY;
use crate::state::State;

const STATE_EXTENSION: &str = ".json";

/// Local directory backend for development and single-machine use
#[derive(Debug)]
pub struct LocalStateStore {
    /// Directory holding this scope's state files
    dir: PathBuf,
    scope: Scope,
    codec: StateCodec,
}

impl LocalStateStore {
    /// Default root directory
    pub const DEFAULT_ROOT: &'static str = ".alchemy";

    /// Create a store under `.alchemy` in the current directory
    pub fn new(scope: Scope) -> Self {
        Self::with_root(Self::DEFAULT_ROOT, scope)
    }

    /// Create a store under a specific root directory
    pub fn with_root(root: impl Into<PathBuf>, scope: Scope) -> Self {
        let dir = scope
            .chain()
            .iter()
            .fold(root.into(), |dir, name| dir.join(name));

        Self {
            dir,
            scope,
            codec: StateCodec::new(),
        }
    }

    /// Encrypt secrets with a passphrase
    pub fn with_passphrase(mut self, passphrase: &str) -> Self {
        self.codec = StateCodec::with_passphrase(passphrase);
        self
    }

    /// Create a LocalStateStore from configuration (`path`, `passphrase`)
    pub fn from_config(config: &BackendConfig, scope: Scope) -> StoreResult<Self> {
        let root = config.get_string("path").unwrap_or(Self::DEFAULT_ROOT);
        let store = Self::with_root(root, scope);

        Ok(match config.get_sensitive("passphrase") {
            Some(passphrase) => store.with_passphrase(passphrase),
            None => store,
        })
    }

    /// Directory holding this scope's state files
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    fn path_for(&self, key: &str) -> StoreResult<PathBuf> {
        validate_key(key)?;
        Ok(self.dir.join(format!("{}{}", escape(key), STATE_EXTENSION)))
    }
}

#[async_trait]
impl StateStore for LocalStateStore {
    async fn init(&self) -> StoreResult<()> {
        tokio::fs::create_dir_all(&self.dir).await.map_err(|e| {
            StoreError::Io(format!(
                "Failed to create state directory {}: {}",
                self.dir.display(),
                e
            ))
        })
    }

    async fn deinit(&self) -> StoreResult<()> {
        match tokio::fs::remove_dir_all(&self.dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::Io(format!(
                "Failed to remove state directory {}: {}",
                self.dir.display(),
                e
            ))),
        }
    }

    async fn list(&self) -> StoreResult<Vec<String>> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(StoreError::Io(format!(
                    "Failed to read state directory {}: {}",
                    self.dir.display(),
                    e
                )));
            }
        };

        let mut keys = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StoreError::Io(format!("Failed to read state directory: {}", e)))?
        {
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else {
                continue;
            };
            if let Some(stem) = name.strip_suffix(STATE_EXTENSION)
                && !stem.is_empty()
                && entry.file_type().await.is_ok_and(|t| t.is_file())
            {
                keys.push(unescape(stem));
            }
        }

        Ok(keys)
    }

    async fn get(&self, key: &str) -> StoreResult<Option<State>> {
        let path = self.path_for(key)?;

        let content = match tokio::fs::read(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(StoreError::Io(format!(
                    "Failed to read state file {}: {}",
                    path.display(),
                    e
                )));
            }
        };

        self.codec
            .deserialize(&content, Some(&self.scope))
            .map(Some)
    }

    async fn get_batch(&self, keys: &[String]) -> StoreResult<HashMap<String, State>> {
        fetch_batch(self, keys, DEFAULT_BATCH_CONCURRENCY).await
    }

    async fn set(&self, key: &str, state: &State) -> StoreResult<()> {
        let path = self.path_for(key)?;
        let content = self.codec.serialize(state)?;

        self.init().await?;

        let tmp_path = path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, content)
            .await
            .map_err(|e| StoreError::Io(format!("Failed to write state file: {}", e)))?;
        tokio::fs::rename(&tmp_path, &path)
            .await
            .map_err(|e| StoreError::Io(format!("Failed to write state file: {}", e)))?;

        debug!(key, path = %path.display(), "wrote state");
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        let path = self.path_for(key)?;

        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::Io(format!(
                "Failed to remove state file {}: {}",
                path.display(),
                e
            ))),
        }
    }
}
