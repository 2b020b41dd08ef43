//! Alchemy State Management
//!
//! This crate persists the state of every resource the Alchemy lifecycle
//! engine manages. States are stored per scope (`app/stage/...`) under a
//! logical key (`db/password`) in a remote object store, on the local
//! filesystem, or in memory.
//!
//! # Overview
//!
//! - **State**: The persisted record of one resource
//! - **StateStore**: A trait for state stores (remote, local, memory)
//! - **StateCodec**: The JSON envelope that keeps shared references, cycles
//!   and secrets intact
//! - **ObjectStorage**: The minimal object storage client a remote store
//!   runs on
//!
//! # Example
//!
//! ```ignore
//! use alchemy_core::Scope;
//! use alchemy_state::{create_backend, BackendConfig, State};
//!
//! let config = BackendConfig::new("s3")
//!     .with_attribute("bucket", "my-state-bucket")
//!     .with_attribute("region", "ap-northeast-1");
//! let scope = Scope::from_chain(["my-app", "prod"])?;
//!
//! let store = create_backend(&config, scope)?;
//!
//! // Container is checked on first use
//! store.set("db/password", &State::new("random::Password", "password", "my-app/prod/db/password")).await?;
//!
//! for (key, state) in store.all().await? {
//!     println!("{}: {}", key, state.status);
//! }
//! ```

pub mod backend;
pub mod backends;
pub mod codec;
pub mod key;
pub mod object;
pub mod remote;
pub mod secret;
pub mod state;

// Re-export main types for convenience
pub use backend::{BackendConfig, StateStore, StoreError, StoreResult};
pub use backends::{LocalStateStore, S3ObjectStorage, S3StateStore, S3StoreOptions, create_backend};
pub use codec::StateCodec;
pub use key::KeyCodec;
pub use object::{MemoryObjectStorage, ObjectError, ObjectPage, ObjectStorage};
pub use remote::{RemoteStateStore, RemoteStoreOptions};
pub use secret::SecretCipher;
pub use state::{State, StateStatus};
