//! Object storage capability consumed by the remote state store

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use thiserror::Error;

/// Provider error codes that mean "no such object"
const NOT_FOUND_CODES: [&str; 3] = ["NoSuchKey", "NotFound", "BlobNotFound"];

/// Errors reported by an object storage client
#[derive(Debug, Error)]
pub enum ObjectError {
    /// The object (or container) does not exist
    #[error("Object not found: {0}")]
    NotFound(String),

    /// The service answered with an error
    #[error("Storage service error: {message} (status: {status:?}, code: {code:?})")]
    Service {
        status: Option<u16>,
        code: Option<String>,
        message: String,
    },

    /// The request never got an answer
    #[error("Storage transport error: {0}")]
    Transport(String),
}

impl ObjectError {
    /// Whether this error means the object is missing
    ///
    /// Recognized by variant, by HTTP status 404, or by provider error code.
    pub fn is_not_found(&self) -> bool {
        match self {
            ObjectError::NotFound(_) => true,
            ObjectError::Service { status, code, .. } => {
                *status == Some(404)
                    || code
                        .as_deref()
                        .is_some_and(|code| NOT_FOUND_CODES.contains(&code))
            }
            ObjectError::Transport(_) => false,
        }
    }
}

/// Result type for object storage operations
pub type ObjectResult<T> = Result<T, ObjectError>;

/// One page of a prefix listing
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectPage {
    /// Full object names
    pub names: Vec<String>,
    /// Continuation token for the next page, `None` on the last page
    pub next: Option<String>,
}

/// Minimal object storage client
///
/// Object names are opaque to the client; `/` may carry hierarchy meaning
/// for the service, which is why state keys never contain it once encoded.
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Name of the bucket/container all operations target
    fn container(&self) -> &str;

    /// Check that the container exists
    async fn container_exists(&self) -> ObjectResult<bool>;

    /// Fetch an object's content
    async fn get(&self, name: &str) -> ObjectResult<Vec<u8>>;

    /// Create or overwrite an object
    async fn put(&self, name: &str, body: Vec<u8>, content_type: &str) -> ObjectResult<()>;

    /// Delete an object
    async fn delete(&self, name: &str) -> ObjectResult<()>;

    /// List object names starting with `prefix`, one page at a time
    async fn list_page(&self, prefix: &str, continuation: Option<&str>)
    -> ObjectResult<ObjectPage>;
}

/// Default page size of [`MemoryObjectStorage`] listings
pub const DEFAULT_PAGE_SIZE: usize = 1000;

#[derive(Debug, Clone)]
struct StoredObject {
    body: Vec<u8>,
    content_type: String,
}

/// In-process object storage for tests and dry runs
#[derive(Debug)]
pub struct MemoryObjectStorage {
    container: String,
    container_exists: AtomicBool,
    objects: Mutex<BTreeMap<String, StoredObject>>,
    failing: Mutex<HashSet<String>>,
    page_size: usize,
    exists_checks: AtomicUsize,
}

impl MemoryObjectStorage {
    /// Create storage whose container already exists
    pub fn new(container: impl Into<String>) -> Self {
        Self {
            container: container.into(),
            container_exists: AtomicBool::new(true),
            objects: Mutex::new(BTreeMap::new()),
            failing: Mutex::new(HashSet::new()),
            page_size: DEFAULT_PAGE_SIZE,
            exists_checks: AtomicUsize::new(0),
        }
    }

    /// Start without the container
    pub fn without_container(self) -> Self {
        self.container_exists.store(false, Ordering::SeqCst);
        self
    }

    /// Limit listing pages to `page_size` names
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn create_container(&self) {
        self.container_exists.store(true, Ordering::SeqCst);
    }

    /// Make every request for `name` fail with a service error
    pub fn fail_on(&self, name: impl Into<String>) {
        lock(&self.failing).insert(name.into());
    }

    /// How many times the container existence was checked
    pub fn exists_checks(&self) -> usize {
        self.exists_checks.load(Ordering::SeqCst)
    }

    /// All stored object names
    pub fn names(&self) -> Vec<String> {
        lock(&self.objects).keys().cloned().collect()
    }

    /// Content type an object was stored with
    pub fn content_type(&self, name: &str) -> Option<String> {
        lock(&self.objects)
            .get(name)
            .map(|object| object.content_type.clone())
    }

    fn check(&self, name: &str) -> ObjectResult<()> {
        if !self.container_exists.load(Ordering::SeqCst) {
            return Err(ObjectError::Service {
                status: Some(404),
                code: Some("ContainerNotFound".to_string()),
                message: format!("container {} does not exist", self.container),
            });
        }
        if lock(&self.failing).contains(name) {
            return Err(ObjectError::Service {
                status: Some(500),
                code: Some("InternalError".to_string()),
                message: format!("injected failure for {}", name),
            });
        }
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[async_trait]
impl ObjectStorage for MemoryObjectStorage {
    fn container(&self) -> &str {
        &self.container
    }

    async fn container_exists(&self) -> ObjectResult<bool> {
        self.exists_checks.fetch_add(1, Ordering::SeqCst);
        // Give concurrent callers a chance to interleave.
        tokio::task::yield_now().await;
        Ok(self.container_exists.load(Ordering::SeqCst))
    }

    async fn get(&self, name: &str) -> ObjectResult<Vec<u8>> {
        self.check(name)?;
        lock(&self.objects)
            .get(name)
            .map(|object| object.body.clone())
            .ok_or_else(|| ObjectError::NotFound(name.to_string()))
    }

    async fn put(&self, name: &str, body: Vec<u8>, content_type: &str) -> ObjectResult<()> {
        self.check(name)?;
        lock(&self.objects).insert(
            name.to_string(),
            StoredObject {
                body,
                content_type: content_type.to_string(),
            },
        );
        Ok(())
    }

    async fn delete(&self, name: &str) -> ObjectResult<()> {
        self.check(name)?;
        lock(&self.objects)
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| ObjectError::NotFound(name.to_string()))
    }

    async fn list_page(
        &self,
        prefix: &str,
        continuation: Option<&str>,
    ) -> ObjectResult<ObjectPage> {
        self.check(prefix)?;
        let objects = lock(&self.objects);

        let mut matching = objects
            .keys()
            .filter(|name| name.starts_with(prefix))
            .filter(|name| continuation.is_none_or(|after| name.as_str() > after));

        let names: Vec<String> = matching.by_ref().take(self.page_size).cloned().collect();
        let next = if matching.next().is_some() {
            names.last().cloned()
        } else {
            None
        };

        Ok(ObjectPage { names, next })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_not_found() {
        assert!(ObjectError::NotFound("a".to_string()).is_not_found());
        assert!(
            ObjectError::Service {
                status: Some(404),
                code: None,
                message: String::new(),
            }
            .is_not_found()
        );
        assert!(
            ObjectError::Service {
                status: None,
                code: Some("BlobNotFound".to_string()),
                message: String::new(),
            }
            .is_not_found()
        );
        assert!(
            !ObjectError::Service {
                status: Some(403),
                code: Some("AccessDenied".to_string()),
                message: String::new(),
            }
            .is_not_found()
        );
        assert!(!ObjectError::Transport("timeout".to_string()).is_not_found());
    }

    #[tokio::test]
    async fn test_memory_round_trip() {
        let storage = MemoryObjectStorage::new("alchemy-state");
        assert!(storage.get("missing").await.unwrap_err().is_not_found());

        storage
            .put("key", b"bytes".to_vec(), "application/json")
            .await
            .unwrap();
        assert_eq!(storage.get("key").await.unwrap(), b"bytes".to_vec());
        assert_eq!(
            storage.content_type("key").as_deref(),
            Some("application/json")
        );

        storage.delete("key").await.unwrap();
        assert!(storage.delete("key").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_memory_pagination() {
        let storage = MemoryObjectStorage::new("alchemy-state").with_page_size(2);
        for name in ["p/a", "p/b", "p/c", "q/d", "p/e"] {
            storage.put(name, Vec::new(), "text/plain").await.unwrap();
        }

        let first = storage.list_page("p/", None).await.unwrap();
        assert_eq!(first.names, ["p/a", "p/b"]);
        assert_eq!(first.next.as_deref(), Some("p/b"));

        let second = storage.list_page("p/", first.next.as_deref()).await.unwrap();
        assert_eq!(second.names, ["p/c", "p/e"]);
        assert_eq!(second.next, None);
    }

    #[tokio::test]
    async fn test_memory_missing_container() {
        let storage = MemoryObjectStorage::new("alchemy-state").without_container();
        assert!(!storage.container_exists().await.unwrap());
        assert!(storage.put("a", Vec::new(), "text/plain").await.is_err());

        storage.create_container();
        assert!(storage.container_exists().await.unwrap());
        assert_eq!(storage.exists_checks(), 2);
    }

    #[tokio::test]
    async fn test_memory_injected_failure() {
        let storage = MemoryObjectStorage::new("alchemy-state");
        storage.fail_on("broken");
        let err = storage.get("broken").await.unwrap_err();
        assert!(!err.is_not_found());
        assert!(matches!(err, ObjectError::Service { status: Some(500), .. }));
    }
}
