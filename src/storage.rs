use async_trait::async_trait;
use aws_sdk_s3 as s3;
use s3::primitives::ByteStream;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::error::{AccessError, AccessResult};

/// StorageService
///
/// Blob store for book PDFs that are too large to keep inline. The real implementation talks to
/// S3/MinIO; `MockStorageService` keeps objects in memory for tests.
#[async_trait]
pub trait StorageService: Send + Sync {
    /// Ensures the configured bucket exists. Used by the local setup to provision MinIO.
    async fn ensure_bucket_exists(&self);

    async fn put_object(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> AccessResult<()>;

    /// Missing objects are `NotFound`.
    async fn get_object(&self, key: &str) -> AccessResult<Vec<u8>>;

    async fn delete_object(&self, key: &str) -> AccessResult<()>;
}

/// StorageState
///
/// The concrete type used to share the storage service across the application state.
pub type StorageState = Arc<dyn StorageService>;

fn unavailable(context: &str, e: impl std::fmt::Debug) -> AccessError {
    tracing::error!("{} failed: {:?}", context, e);
    AccessError::StorageUnavailable(format!("{} failed", context))
}

/// S3StorageClient
///
/// `StorageService` over the AWS SDK. `force_path_style(true)` is required for MinIO.
#[derive(Clone)]
pub struct S3StorageClient {
    client: s3::Client,
    bucket_name: String,
}

impl S3StorageClient {
    pub async fn new(
        endpoint: &str,
        region: &str,
        access_key: &str,
        secret_key: &str,
        bucket: &str,
    ) -> Self {
        let credentials =
            s3::config::Credentials::new(access_key, secret_key, None, None, "static");

        let config = s3::Config::builder()
            .credentials_provider(credentials)
            .endpoint_url(endpoint)
            .region(s3::config::Region::new(region.to_string()))
            .behavior_version_latest()
            .force_path_style(true)
            .build();

        Self {
            client: s3::Client::from_conf(config),
            bucket_name: bucket.to_string(),
        }
    }
}

#[async_trait]
impl StorageService for S3StorageClient {
    /// CreateBucket is idempotent; an "already owned" error is expected and ignored.
    async fn ensure_bucket_exists(&self) {
        if let Err(e) = self
            .client
            .create_bucket()
            .bucket(&self.bucket_name)
            .send()
            .await
        {
            tracing::debug!("create_bucket: {:?}", e);
        }
    }

    async fn put_object(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> AccessResult<()> {
        self.client
            .put_object()
            .bucket(&self.bucket_name)
            .key(sanitize_key(key))
            .content_type(content_type)
            .body(ByteStream::from(bytes))
            .send()
            .await
            .map_err(|e| unavailable("put_object", e))?;
        Ok(())
    }

    async fn get_object(&self, key: &str) -> AccessResult<Vec<u8>> {
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket_name)
            .key(sanitize_key(key))
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error().is_some_and(|se| se.is_no_such_key()) {
                    AccessError::NotFound
                } else {
                    unavailable("get_object", e)
                }
            })?;

        let data = output
            .body
            .collect()
            .await
            .map_err(|e| unavailable("get_object body", e))?;
        Ok(data.into_bytes().to_vec())
    }

    async fn delete_object(&self, key: &str) -> AccessResult<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket_name)
            .key(sanitize_key(key))
            .send()
            .await
            .map_err(|e| unavailable("delete_object", e))?;
        Ok(())
    }
}

/// sanitize_key
///
/// Removes directory navigation segments (`..`, `.`) and empty segments from an object key.
pub fn sanitize_key(key: &str) -> String {
    key.split('/')
        .filter(|segment| !segment.is_empty() && *segment != ".." && *segment != ".")
        .collect::<Vec<_>>()
        .join("/")
}

/// MockStorageService
///
/// In-memory `StorageService` for tests.
#[derive(Clone, Default)]
pub struct MockStorageService {
    objects: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    /// When true, all operations return a simulated failure.
    pub should_fail: bool,
}

impl MockStorageService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_failing() -> Self {
        Self {
            should_fail: true,
            ..Self::default()
        }
    }

    pub fn object_count(&self) -> usize {
        self.objects.lock().map(|o| o.len()).unwrap_or(0)
    }

    fn objects(&self) -> AccessResult<std::sync::MutexGuard<'_, HashMap<String, Vec<u8>>>> {
        if self.should_fail {
            return Err(AccessError::StorageUnavailable(
                "Mock Storage Error: Simulation requested".to_string(),
            ));
        }
        self.objects
            .lock()
            .map_err(|_| AccessError::StorageUnavailable("mock storage poisoned".to_string()))
    }
}

#[async_trait]
impl StorageService for MockStorageService {
    async fn ensure_bucket_exists(&self) {}

    async fn put_object(&self, key: &str, bytes: Vec<u8>, _content_type: &str) -> AccessResult<()> {
        self.objects()?.insert(sanitize_key(key), bytes);
        Ok(())
    }

    async fn get_object(&self, key: &str) -> AccessResult<Vec<u8>> {
        self.objects()?
            .get(&sanitize_key(key))
            .cloned()
            .ok_or(AccessError::NotFound)
    }

    async fn delete_object(&self, key: &str) -> AccessResult<()> {
        self.objects()?.remove(&sanitize_key(key));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_key() {
        assert_eq!(sanitize_key("books/../../etc/passwd"), "books/etc/passwd");
        assert_eq!(sanitize_key("/books//./a.pdf"), "books/a.pdf");
    }
}
