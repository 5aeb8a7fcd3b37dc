//! Pluggable storage backends for volume data files
//!
//! A [`BackendStorage`] is a connection or bucket scoped handle built by a
//! [`BackendStorageFactory`] from string properties. It mints
//! [`BackendStorageFile`] handles, one per object key.
//!
//! File capabilities are split in two:
//! - [`BackendStorageFile`]: positional reads, stat, close
//! - [`WritableBackendStorageFile`]: adds positional writes, truncate and
//!   instantiate-from-local-file
//!
//! Backends that can only be read (S3) never hand out the writable view, so
//! "this backend cannot mutate" surfaces as [`Error::Unsupported`] instead of
//! an I/O failure.

pub mod disk;
pub mod memory;
pub mod registry;
pub mod s3;

pub use disk::DiskFile;
pub use memory::{MemoryBackendFactory, MemoryBackendStorage};
pub use registry::{BackendRegistry, STORAGE_BACKEND_PREFIX};
pub use s3::{S3BackendFactory, S3BackendStorage};

use crate::common::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

/// Name a factory registers under, e.g. `"s3"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StorageType(String);

impl StorageType {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StorageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StorageType {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Read access to flat string configuration.
pub trait StringProperties {
    /// Missing keys read as the empty string.
    fn get_string(&self, key: &str) -> String;
}

/// Owned property map used at configuration and coordinator boundaries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Properties {
    map: HashMap<String, String>,
}

impl Properties {
    pub fn new(map: HashMap<String, String>) -> Self {
        Self { map }
    }

    pub fn into_inner(self) -> HashMap<String, String> {
        self.map
    }
}

impl From<HashMap<String, String>> for Properties {
    fn from(map: HashMap<String, String>) -> Self {
        Self::new(map)
    }
}

impl StringProperties for Properties {
    fn get_string(&self, key: &str) -> String {
        self.map.get(key).cloned().unwrap_or_default()
    }
}

/// Size and modification time of a backend object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    pub size: u64,
    pub modified: DateTime<Utc>,
}

/// One addressable byte range in a backend.
#[async_trait]
pub trait BackendStorageFile: Send + Sync + fmt::Display {
    /// Read up to `buf.len()` bytes at `offset`; fewer only at end of data.
    async fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize>;

    async fn get_stat(&self) -> Result<FileStat>;

    async fn close(&self) -> Result<()>;

    /// Short backend name for logs and errors, e.g. `"disk"`.
    fn backend_name(&self) -> &str;

    fn as_writable(&self) -> Option<&dyn WritableBackendStorageFile> {
        None
    }
}

/// Mutation capabilities of a backend file.
#[async_trait]
pub trait WritableBackendStorageFile: BackendStorageFile {
    async fn write_at(&self, buf: &[u8], offset: u64) -> Result<usize>;

    async fn truncate(&self, size: u64) -> Result<()>;

    /// Replace this file's contents with a local file, once, when tiering a volume.
    async fn instantiate(&self, src: &Path) -> Result<()>;
}

/// Borrow the writable view of `file` or fail with [`Error::Unsupported`].
pub fn require_writable<'a>(
    file: &'a dyn BackendStorageFile,
    operation: &'static str,
) -> Result<&'a dyn WritableBackendStorageFile> {
    file.as_writable().ok_or_else(|| Error::Unsupported {
        backend: file.backend_name().to_string(),
        operation,
    })
}

/// A connection-scoped backend, immutable once built.
pub trait BackendStorage: Send + Sync {
    fn storage_type(&self) -> StorageType;

    fn id(&self) -> &str;

    /// Properties that rebuild an equivalent backend through its factory.
    fn to_properties(&self) -> HashMap<String, String>;

    fn new_storage_file(&self, key: &str) -> Arc<dyn BackendStorageFile>;
}

pub trait BackendStorageFactory: Send + Sync {
    fn storage_type(&self) -> StorageType;

    fn build_storage(
        &self,
        configuration: &dyn StringProperties,
        id: &str,
    ) -> Result<Arc<dyn BackendStorage>>;
}

/// Object keys are stored without a leading separator.
pub(crate) fn normalize_key(key: &str) -> &str {
    key.strip_prefix('/').unwrap_or(key)
}
