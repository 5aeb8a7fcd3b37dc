//! In-process backend
//!
//! Objects live in a shared map owned by the backend, so every file handle
//! minted for the same key sees the same bytes. Used for ephemeral volumes
//! and tests.

use crate::backend::{
    normalize_key, BackendStorage, BackendStorageFactory, BackendStorageFile, FileStat,
    StorageType, StringProperties, WritableBackendStorageFile,
};
use crate::common::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::io;
use std::path::Path;
use std::sync::Arc;

const STORAGE_TYPE: &str = "memory";

#[derive(Debug, Default)]
pub struct MemoryBackendFactory;

impl BackendStorageFactory for MemoryBackendFactory {
    fn storage_type(&self) -> StorageType {
        StorageType::from(STORAGE_TYPE)
    }

    fn build_storage(
        &self,
        _configuration: &dyn StringProperties,
        id: &str,
    ) -> Result<Arc<dyn BackendStorage>> {
        Ok(Arc::new(MemoryBackendStorage::new(id)))
    }
}

struct MemoryObject {
    data: Vec<u8>,
    modified: DateTime<Utc>,
}

type ObjectMap = Arc<Mutex<HashMap<String, MemoryObject>>>;

pub struct MemoryBackendStorage {
    id: String,
    objects: ObjectMap,
}

impl MemoryBackendStorage {
    pub fn new(id: &str) -> Self {
        tracing::info!("created backend storage {}.{}", STORAGE_TYPE, id);
        Self {
            id: id.to_string(),
            objects: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Number of objects currently held
    pub fn len(&self) -> usize {
        self.objects.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.lock().is_empty()
    }
}

impl BackendStorage for MemoryBackendStorage {
    fn storage_type(&self) -> StorageType {
        StorageType::from(STORAGE_TYPE)
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn to_properties(&self) -> HashMap<String, String> {
        HashMap::new()
    }

    fn new_storage_file(&self, key: &str) -> Arc<dyn BackendStorageFile> {
        Arc::new(MemoryFile {
            key: normalize_key(key).to_string(),
            objects: self.objects.clone(),
        })
    }
}

pub struct MemoryFile {
    key: String,
    objects: ObjectMap,
}

impl MemoryFile {
    fn not_found(&self) -> Error {
        Error::NotFound(format!("{}://{}", STORAGE_TYPE, self.key))
    }
}

#[async_trait]
impl BackendStorageFile for MemoryFile {
    async fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        let objects = self.objects.lock();
        let object = objects.get(&self.key).ok_or_else(|| self.not_found())?;
        let len = object.data.len() as u64;
        if offset >= len {
            return Ok(0);
        }
        let start = offset as usize;
        let n = buf.len().min(object.data.len() - start);
        buf[..n].copy_from_slice(&object.data[start..start + n]);
        Ok(n)
    }

    async fn get_stat(&self) -> Result<FileStat> {
        let objects = self.objects.lock();
        let object = objects.get(&self.key).ok_or_else(|| self.not_found())?;
        Ok(FileStat {
            size: object.data.len() as u64,
            modified: object.modified,
        })
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }

    fn backend_name(&self) -> &str {
        STORAGE_TYPE
    }

    fn as_writable(&self) -> Option<&dyn WritableBackendStorageFile> {
        Some(self)
    }
}

#[async_trait]
impl WritableBackendStorageFile for MemoryFile {
    async fn write_at(&self, buf: &[u8], offset: u64) -> Result<usize> {
        let end = usize::try_from(offset)
            .ok()
            .and_then(|start| start.checked_add(buf.len()))
            .ok_or_else(|| out_of_range(&self.key, offset))?;
        let mut objects = self.objects.lock();
        let object = objects.entry(self.key.clone()).or_insert_with(|| MemoryObject {
            data: Vec::new(),
            modified: Utc::now(),
        });
        if object.data.len() < end {
            object.data.resize(end, 0);
        }
        object.data[end - buf.len()..end].copy_from_slice(buf);
        object.modified = Utc::now();
        Ok(buf.len())
    }

    async fn truncate(&self, size: u64) -> Result<()> {
        let len = usize::try_from(size).map_err(|_| out_of_range(&self.key, size))?;
        let mut objects = self.objects.lock();
        let object = objects.get_mut(&self.key).ok_or_else(|| self.not_found())?;
        object.data.resize(len, 0);
        object.modified = Utc::now();
        Ok(())
    }

    async fn instantiate(&self, src: &Path) -> Result<()> {
        let data = std::fs::read(src)?;
        self.objects.lock().insert(
            self.key.clone(),
            MemoryObject {
                data,
                modified: Utc::now(),
            },
        );
        Ok(())
    }
}

fn out_of_range(key: &str, offset: u64) -> Error {
    io::Error::new(
        io::ErrorKind::InvalidInput,
        format!("offset {} out of range for {}", offset, key),
    )
    .into()
}

impl fmt::Display for MemoryFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key)
    }
}
