//! Backend implementations for state storage

mod local;
mod s3;

pub use local::LocalStateStore;
pub use s3::{
    ACCESS_KEY_ID_ENV, DEFAULT_BUCKET, DEFAULT_REGION, S3ObjectStorage, S3StateStore,
    S3StoreOptions, SECRET_ACCESS_KEY_ENV,
};

use alchemy_core::Scope;
use tracing::debug;

use crate::backend::{BackendConfig, StateStore, StoreError, StoreResult};
use crate::object::MemoryObjectStorage;
use crate::remote::{RemoteStateStore, RemoteStoreOptions};

/// Create a state store for `scope` from configuration
///
/// This function dispatches to the appropriate backend implementation
/// based on the backend_type in the configuration. No network request is
/// made here; remote stores check their container on first use.
pub fn create_backend(config: &BackendConfig, scope: Scope) -> StoreResult<Box<dyn StateStore>> {
    debug!(backend = %config.backend_type, scope = %scope, "creating state store");

    match config.backend_type.as_str() {
        "s3" => {
            let options = S3StoreOptions::from_config(config)?;
            Ok(Box::new(S3StateStore::s3(scope, options)?))
        }
        "local" => Ok(Box::new(LocalStateStore::from_config(config, scope)?)),
        "memory" => {
            let bucket = config.get_string("bucket").unwrap_or(DEFAULT_BUCKET);
            let options = RemoteStoreOptions::from_config(config)?;
            Ok(Box::new(RemoteStateStore::new(
                MemoryObjectStorage::new(bucket),
                scope,
                options,
            )))
        }
        other => Err(StoreError::unsupported_backend(other)),
    }
}
