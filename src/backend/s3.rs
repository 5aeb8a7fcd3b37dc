//! S3 backend
//!
//! Read-oriented: `read_at` is a ranged GET and `get_stat` a HEAD. Files
//! from this backend do not expose the writable capability, so writes,
//! truncation and instantiation fail with `Error::Unsupported`.
//!
//! Properties:
//!
//! | Key                     | Description                           |
//! |-------------------------|---------------------------------------|
//! | `aws_access_key_id`     | Access key; empty uses the environment |
//! | `aws_secret_access_key` | Secret key                            |
//! | `region`                | AWS region                            |
//! | `bucket`                | Bucket name (required)                |
//! | `endpoint`              | Optional S3-compatible endpoint       |
//! | `request_timeout_secs`  | Optional per-request timeout          |

use crate::backend::{
    normalize_key, BackendStorage, BackendStorageFactory, BackendStorageFile, FileStat,
    StorageType, StringProperties,
};
use crate::common::{Error, Result};
use async_trait::async_trait;
use object_store::aws::AmazonS3Builder;
use object_store::path::Path as ObjectPath;
use object_store::{ClientOptions, ObjectStore};
use std::collections::HashMap;
use std::fmt;
use std::io;
use std::sync::Arc;
use std::time::Duration;

const STORAGE_TYPE: &str = "s3";

const ACCESS_KEY_ID: &str = "aws_access_key_id";
const SECRET_ACCESS_KEY: &str = "aws_secret_access_key";
const REGION: &str = "region";
const BUCKET: &str = "bucket";
const ENDPOINT: &str = "endpoint";
const REQUEST_TIMEOUT_SECS: &str = "request_timeout_secs";

#[derive(Debug, Default)]
pub struct S3BackendFactory;

impl BackendStorageFactory for S3BackendFactory {
    fn storage_type(&self) -> StorageType {
        StorageType::from(STORAGE_TYPE)
    }

    fn build_storage(
        &self,
        configuration: &dyn StringProperties,
        id: &str,
    ) -> Result<Arc<dyn BackendStorage>> {
        Ok(Arc::new(S3BackendStorage::new(configuration, id)?))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct S3Settings {
    aws_access_key_id: String,
    aws_secret_access_key: String,
    region: String,
    bucket: String,
    endpoint: Option<String>,
    request_timeout_secs: Option<u64>,
}

impl S3Settings {
    fn from_properties(configuration: &dyn StringProperties) -> Result<Self> {
        let optional = |key: &str| Some(configuration.get_string(key)).filter(|v| !v.is_empty());
        let request_timeout_secs = optional(REQUEST_TIMEOUT_SECS)
            .map(|v| {
                v.parse::<u64>().map_err(|_| {
                    Error::InvalidConfig(format!("{} must be a number, got {}", REQUEST_TIMEOUT_SECS, v))
                })
            })
            .transpose()?;

        Ok(Self {
            aws_access_key_id: configuration.get_string(ACCESS_KEY_ID),
            aws_secret_access_key: configuration.get_string(SECRET_ACCESS_KEY),
            region: configuration.get_string(REGION),
            bucket: configuration.get_string(BUCKET),
            endpoint: optional(ENDPOINT),
            request_timeout_secs,
        })
    }

    fn build_client(&self) -> Result<Arc<dyn ObjectStore>> {
        let mut builder = AmazonS3Builder::new().with_bucket_name(&self.bucket);
        if !self.region.is_empty() {
            builder = builder.with_region(&self.region);
        }
        if !self.aws_access_key_id.is_empty() {
            builder = builder.with_access_key_id(&self.aws_access_key_id);
        }
        if !self.aws_secret_access_key.is_empty() {
            builder = builder.with_secret_access_key(&self.aws_secret_access_key);
        }
        if let Some(endpoint) = &self.endpoint {
            builder = builder
                .with_endpoint(endpoint)
                .with_virtual_hosted_style_request(false)
                .with_allow_http(endpoint.starts_with("http://"));
        }
        if let Some(secs) = self.request_timeout_secs {
            builder =
                builder.with_client_options(ClientOptions::new().with_timeout(Duration::from_secs(secs)));
        }

        let store = builder
            .build()
            .map_err(|e| Error::InvalidConfig(format!("s3 bucket {}: {}", self.bucket, e)))?;
        Ok(Arc::new(store))
    }
}

pub struct S3BackendStorage {
    id: String,
    settings: S3Settings,
    client: Arc<dyn ObjectStore>,
}

impl S3BackendStorage {
    /// Build from properties; no request is sent until a file is read.
    pub fn new(configuration: &dyn StringProperties, id: &str) -> Result<Self> {
        let settings = S3Settings::from_properties(configuration)?;
        let client = settings.build_client()?;
        tracing::info!(
            "created backend storage s3.{} for region {} bucket {}",
            id,
            settings.region,
            settings.bucket
        );
        Ok(Self {
            id: id.to_string(),
            settings,
            client,
        })
    }

    /// Use a caller-supplied object store client, e.g. one shared with other components.
    pub fn with_client(
        configuration: &dyn StringProperties,
        id: &str,
        client: Arc<dyn ObjectStore>,
    ) -> Result<Self> {
        Ok(Self {
            id: id.to_string(),
            settings: S3Settings::from_properties(configuration)?,
            client,
        })
    }

    pub fn bucket(&self) -> &str {
        &self.settings.bucket
    }

    pub fn region(&self) -> &str {
        &self.settings.region
    }
}

impl BackendStorage for S3BackendStorage {
    fn storage_type(&self) -> StorageType {
        StorageType::from(STORAGE_TYPE)
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn to_properties(&self) -> HashMap<String, String> {
        let s = &self.settings;
        let mut m = HashMap::new();
        m.insert(ACCESS_KEY_ID.to_string(), s.aws_access_key_id.clone());
        m.insert(SECRET_ACCESS_KEY.to_string(), s.aws_secret_access_key.clone());
        m.insert(REGION.to_string(), s.region.clone());
        m.insert(BUCKET.to_string(), s.bucket.clone());
        if let Some(endpoint) = &s.endpoint {
            m.insert(ENDPOINT.to_string(), endpoint.clone());
        }
        if let Some(secs) = s.request_timeout_secs {
            m.insert(REQUEST_TIMEOUT_SECS.to_string(), secs.to_string());
        }
        m
    }

    fn new_storage_file(&self, key: &str) -> Arc<dyn BackendStorageFile> {
        Arc::new(S3BackendStorageFile {
            client: self.client.clone(),
            bucket: self.settings.bucket.clone(),
            key: normalize_key(key).to_string(),
        })
    }
}

pub struct S3BackendStorageFile {
    client: Arc<dyn ObjectStore>,
    bucket: String,
    key: String,
}

impl S3BackendStorageFile {
    pub fn key(&self) -> &str {
        &self.key
    }

    fn location(&self) -> ObjectPath {
        ObjectPath::from(self.key.as_str())
    }

    fn remote_error(&self, operation: &'static str, source: object_store::Error) -> Error {
        Error::ObjectStore {
            bucket: self.bucket.clone(),
            key: self.key.clone(),
            operation,
            source,
        }
    }
}

#[async_trait]
impl BackendStorageFile for S3BackendStorageFile {
    async fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let end = offset.checked_add(buf.len() as u64).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("read of {} bytes at offset {} overflows {}", buf.len(), offset, self.key),
            )
        })?;
        let range = offset..end;
        let bytes = self
            .client
            .get_range(&self.location(), range)
            .await
            .map_err(|e| self.remote_error("GetObject", e))?;

        let n = bytes.len().min(buf.len());
        buf[..n].copy_from_slice(&bytes[..n]);
        Ok(n)
    }

    async fn get_stat(&self) -> Result<FileStat> {
        let meta = self
            .client
            .head(&self.location())
            .await
            .map_err(|e| self.remote_error("HeadObject", e))?;
        Ok(FileStat {
            size: meta.size,
            modified: meta.last_modified,
        })
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }

    fn backend_name(&self) -> &str {
        STORAGE_TYPE
    }
}

impl fmt::Display for S3BackendStorageFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key)
    }
}
