//! S3-compatible object store backend.

use std::sync::Arc;

use async_trait::async_trait;
use object_store::aws::AmazonS3Builder;
use object_store::path::Path as ObjectPath;
use object_store::{Certificate, ClientOptions, ObjectStore, PutPayload};
use tracing::debug;

use super::StorageError;
use super::backend::StorageBackend;
use crate::config::{S3Config, TlsVerify};

/// Stores the saved-metrics document as a single object.
pub struct S3Backend {
    store: Arc<dyn ObjectStore>,
    bucket: String,
    key: ObjectPath,
}

impl S3Backend {
    /// Build the backend from configuration. `key` is the object path inside the bucket.
    pub fn from_config(config: &S3Config, key: &str) -> Result<Self, StorageError> {
        let key = ObjectPath::parse(key.trim_start_matches('/'))
            .map_err(|e| StorageError::Config(format!("invalid object key '{}': {}", key, e)))?;

        let mut builder = AmazonS3Builder::from_env()
            .with_bucket_name(&config.bucket)
            .with_region(&config.region)
            .with_client_options(client_options(&config.verify)?);

        if let Some(url) = &config.url {
            builder = builder
                .with_endpoint(url)
                .with_allow_http(url.starts_with("http://"))
                .with_virtual_hosted_style_request(false);
        }
        if let Some(key_id) = &config.key_id {
            builder = builder.with_access_key_id(key_id);
        }
        if let Some(secret) = &config.secret_key {
            builder = builder.with_secret_access_key(secret);
        }

        let store = builder
            .build()
            .map_err(|e| StorageError::Config(e.to_string()))?;

        Ok(Self::with_store(Arc::new(store), &config.bucket, key))
    }

    /// Wrap an existing object store.
    pub fn with_store(store: Arc<dyn ObjectStore>, bucket: &str, key: ObjectPath) -> Self {
        Self {
            store,
            bucket: bucket.to_string(),
            key,
        }
    }
}

fn client_options(verify: &TlsVerify) -> Result<ClientOptions, StorageError> {
    let options = ClientOptions::new();
    match verify {
        TlsVerify::Enabled => Ok(options),
        TlsVerify::Disabled => Ok(options.with_allow_invalid_certificates(true)),
        TlsVerify::CustomCa(path) => {
            let pem = std::fs::read(path).map_err(|e| {
                StorageError::Config(format!("cannot read CA file {}: {}", path.display(), e))
            })?;
            let certificate = Certificate::from_pem(&pem).map_err(|e| {
                StorageError::Config(format!("invalid CA file {}: {}", path.display(), e))
            })?;
            Ok(options.with_root_certificate(certificate))
        }
    }
}

#[async_trait]
impl StorageBackend for S3Backend {
    fn location(&self) -> String {
        format!("s3://{}/{}", self.bucket, self.key)
    }

    async fn read(&self) -> Result<Option<Vec<u8>>, StorageError> {
        let result = match self.store.get(&self.key).await {
            Ok(result) => result,
            Err(object_store::Error::NotFound { .. }) => return Ok(None),
            Err(e) => return Err(StorageError::read(self.location(), e)),
        };

        let bytes = result
            .bytes()
            .await
            .map_err(|e| StorageError::read(self.location(), e))?;
        debug!(location = %self.location(), size = bytes.len(), "Downloaded saved metrics");
        Ok(Some(bytes.to_vec()))
    }

    async fn write(&self, data: &[u8]) -> Result<(), StorageError> {
        self.store
            .put(&self.key, PutPayload::from(data.to_vec()))
            .await
            .map_err(|e| StorageError::write(self.location(), e))?;
        debug!(location = %self.location(), size = data.len(), "Uploaded saved metrics");
        Ok(())
    }
}
