//! Volume info file (`<name>.vif`)
//!
//! JSON sidecar written when a volume's data file has been moved to a
//! remote backend. Its presence binds the volume to that remote object.

use crate::common::Result;
use serde::{Deserialize, Serialize};
use std::io;
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFile {
    pub backend_type: String,
    pub backend_id: String,
    pub key: String,
    #[serde(default)]
    pub file_size: u64,
    /// Unix seconds
    #[serde(default)]
    pub modified_time: u64,
}

impl RemoteFile {
    /// Registry key of the backend holding this file, `type.id`.
    pub fn backend_name(&self) -> String {
        format!("{}.{}", self.backend_type, self.backend_id)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeInfo {
    #[serde(default)]
    pub version: u32,
    #[serde(default)]
    pub files: Vec<RemoteFile>,
}

impl VolumeInfo {
    /// Read `path`; `None` when the file does not exist.
    pub fn maybe_load(path: impl AsRef<Path>) -> Result<Option<Self>> {
        let data = match std::fs::read(path.as_ref()) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_slice(&data)?))
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let data = serde_json::to_vec_pretty(self)?;
        std::fs::write(path, data)?;
        Ok(())
    }

    /// The remote object the data file lives in, if any.
    pub fn remote_file(&self) -> Option<&RemoteFile> {
        self.files.first()
    }
}
