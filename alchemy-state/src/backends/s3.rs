//! S3 object storage for the remote state store

use alchemy_core::{Scope, Secret};
use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::primitives::ByteStream;

use crate::backend::{BackendConfig, StoreError, StoreResult};
use crate::object::{ObjectError, ObjectPage, ObjectResult, ObjectStorage};
use crate::remote::{RemoteStateStore, RemoteStoreOptions};

/// Environment variable read when no access key id is configured
pub const ACCESS_KEY_ID_ENV: &str = "AWS_ACCESS_KEY_ID";

/// Environment variable read when no secret access key is configured
pub const SECRET_ACCESS_KEY_ENV: &str = "AWS_SECRET_ACCESS_KEY";

/// Bucket used when none is configured
pub const DEFAULT_BUCKET: &str = "alchemy-state";

/// Region used when none is configured
pub const DEFAULT_REGION: &str = "us-east-1";

/// Remote state store on S3
pub type S3StateStore = RemoteStateStore<S3ObjectStorage>;

/// Options for an S3-backed state store
#[derive(Debug, Clone, Default)]
pub struct S3StoreOptions {
    /// Bucket name (default: "alchemy-state")
    pub bucket: Option<String>,
    /// AWS region (default: "us-east-1")
    pub region: Option<String>,
    /// Endpoint of an S3-compatible service
    pub endpoint: Option<String>,
    /// Address buckets as `endpoint/bucket` instead of `bucket.endpoint`
    pub force_path_style: bool,
    /// Falls back to `AWS_ACCESS_KEY_ID`
    pub access_key_id: Option<String>,
    /// Falls back to `AWS_SECRET_ACCESS_KEY`
    pub secret_access_key: Option<Secret>,
    /// Options shared with other remote stores
    pub store: RemoteStoreOptions,
}

impl S3StoreOptions {
    /// Read options from backend attributes
    pub fn from_config(config: &BackendConfig) -> StoreResult<Self> {
        Ok(Self {
            bucket: config
                .get_string("bucket")
                .or_else(|| config.get_string("container"))
                .map(str::to_string),
            region: config.get_string("region").map(str::to_string),
            endpoint: config.get_string("endpoint").map(str::to_string),
            force_path_style: config.get_bool_or("force_path_style", false),
            access_key_id: config.get_string("access_key_id").map(str::to_string),
            secret_access_key: config.get_sensitive("secret_access_key").map(Secret::new),
            store: RemoteStoreOptions::from_config(config)?,
        })
    }

    /// Resolve the access key pair, falling back to the environment
    pub fn resolve_credentials(&self) -> StoreResult<(String, Secret)> {
        let access_key_id = self
            .access_key_id
            .clone()
            .or_else(|| env_var(ACCESS_KEY_ID_ENV))
            .ok_or_else(|| {
                StoreError::configuration(format!(
                    "Missing access key id: set access_key_id or {}",
                    ACCESS_KEY_ID_ENV
                ))
            })?;

        let secret_access_key = self
            .secret_access_key
            .clone()
            .or_else(|| env_var(SECRET_ACCESS_KEY_ENV).map(Secret::new))
            .ok_or_else(|| {
                StoreError::configuration(format!(
                    "Missing secret access key: set secret_access_key or {}",
                    SECRET_ACCESS_KEY_ENV
                ))
            })?;

        Ok((access_key_id, secret_access_key))
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|value| !value.is_empty())
}

/// S3 client bound to one bucket
pub struct S3ObjectStorage {
    client: Client,
    bucket: String,
    region: String,
}

impl S3ObjectStorage {
    /// Build the client without touching the network
    pub fn new(options: &S3StoreOptions) -> StoreResult<Self> {
        let (access_key_id, secret_access_key) = options.resolve_credentials()?;
        let bucket = options
            .bucket
            .clone()
            .unwrap_or_else(|| DEFAULT_BUCKET.to_string());
        let region = options
            .region
            .clone()
            .unwrap_or_else(|| DEFAULT_REGION.to_string());

        let credentials = Credentials::new(
            access_key_id,
            secret_access_key.into_inner(),
            None,
            None,
            "alchemy-state",
        );

        let mut builder = aws_sdk_s3::config::Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(region.clone()))
            .credentials_provider(credentials)
            .force_path_style(options.force_path_style);
        if let Some(endpoint) = &options.endpoint {
            builder = builder.endpoint_url(endpoint);
        }

        Ok(Self {
            client: Client::from_conf(builder.build()),
            bucket,
            region,
        })
    }

    pub fn region(&self) -> &str {
        &self.region
    }
}

impl RemoteStateStore<S3ObjectStorage> {
    /// Create an S3-backed store for a scope
    pub fn s3(scope: Scope, options: S3StoreOptions) -> StoreResult<Self> {
        let storage = S3ObjectStorage::new(&options)?;
        Ok(Self::new(storage, scope, options.store))
    }
}

#[async_trait]
impl ObjectStorage for S3ObjectStorage {
    fn container(&self) -> &str {
        &self.bucket
    }

    async fn container_exists(&self) -> ObjectResult<bool> {
        match self.client.head_bucket().bucket(&self.bucket).send().await {
            Ok(_) => Ok(true),
            Err(err) => {
                // HeadBucket returns 404 for non-existent buckets
                let err = object_error(err);
                if err.is_not_found() {
                    Ok(false)
                } else {
                    Err(err)
                }
            }
        }
    }

    async fn get(&self, name: &str) -> ObjectResult<Vec<u8>> {
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(name)
            .send()
            .await
            .map_err(object_error)?;

        let body = output
            .body
            .collect()
            .await
            .map_err(|e| ObjectError::Transport(e.to_string()))?;
        Ok(body.into_bytes().to_vec())
    }

    async fn put(&self, name: &str, body: Vec<u8>, content_type: &str) -> ObjectResult<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(name)
            .body(ByteStream::from(body))
            .content_type(content_type)
            .send()
            .await
            .map_err(object_error)?;

        Ok(())
    }

    async fn delete(&self, name: &str) -> ObjectResult<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(name)
            .send()
            .await
            .map_err(object_error)?;

        Ok(())
    }

    async fn list_page(
        &self,
        prefix: &str,
        continuation: Option<&str>,
    ) -> ObjectResult<ObjectPage> {
        let output = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(prefix)
            .set_continuation_token(continuation.map(str::to_string))
            .send()
            .await
            .map_err(object_error)?;

        let names = output
            .contents()
            .iter()
            .filter_map(|object| object.key().map(str::to_string))
            .collect();
        let next = if output.is_truncated().unwrap_or(false) {
            output.next_continuation_token().map(str::to_string)
        } else {
            None
        };

        Ok(ObjectPage { names, next })
    }
}

/// Classify an SDK error by HTTP status and S3 error code
fn object_error<E>(err: SdkError<E>) -> ObjectError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
{
    let message = DisplayErrorContext(&err).to_string();
    match &err {
        SdkError::DispatchFailure(_) | SdkError::TimeoutError(_) => ObjectError::Transport(message),
        _ => ObjectError::Service {
            status: err.raw_response().map(|raw| raw.status().as_u16()),
            code: err.code().map(str::to_string),
            message,
        },
    }
}
