//! Needle map
//!
//! Maps needle ids to their location in the `.dat` file. The in-memory map
//! is rebuilt on load by replaying the `.idx` file, an append-only log of
//! fixed 16-byte big-endian entries:
//!
//! ```text
//! [key: u64][offset: u32, in 8-byte units][size: u32]
//! ```
//!
//! A size of `u32::MAX` marks a deletion. Counters follow the log, not the
//! live set: every put adds to `file_count` and `content_size`, and an
//! overwrite or delete adds the replaced entry to the deletion counters.

use crate::common::{Error, Result};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, Read, Write};
use std::path::{Path, PathBuf};

pub type NeedleId = u64;

pub const NEEDLE_MAP_ENTRY_SIZE: usize = 16;
pub const NEEDLE_PADDING_SIZE: u64 = 8;
pub const TOMBSTONE_FILE_SIZE: u32 = u32::MAX;

/// Accounting view of a needle map, read by the volume.
///
/// Every accessor returns zero once the map is closed.
pub trait NeedleMapper: Send + Sync {
    fn content_size(&self) -> u64;
    fn deleted_size(&self) -> u64;
    fn file_count(&self) -> u64;
    fn deleted_count(&self) -> u64;
    fn max_file_key(&self) -> NeedleId;
    fn index_file_size(&self) -> u64;
    fn close(&mut self) -> Result<()>;
}

/// Location of one live needle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NeedleValue {
    pub key: NeedleId,
    /// Offset in units of [`NEEDLE_PADDING_SIZE`]
    pub offset: u32,
    pub size: u32,
}

impl NeedleValue {
    pub fn actual_offset(&self) -> u64 {
        self.offset as u64 * NEEDLE_PADDING_SIZE
    }

    fn to_bytes(self) -> [u8; NEEDLE_MAP_ENTRY_SIZE] {
        let mut buf = [0u8; NEEDLE_MAP_ENTRY_SIZE];
        buf[0..8].copy_from_slice(&self.key.to_be_bytes());
        buf[8..12].copy_from_slice(&self.offset.to_be_bytes());
        buf[12..16].copy_from_slice(&self.size.to_be_bytes());
        buf
    }

    fn from_bytes(buf: &[u8; NEEDLE_MAP_ENTRY_SIZE]) -> Self {
        Self {
            key: u64::from_be_bytes([
                buf[0], buf[1], buf[2], buf[3], buf[4], buf[5], buf[6], buf[7],
            ]),
            offset: u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]),
            size: u32::from_be_bytes([buf[12], buf[13], buf[14], buf[15]]),
        }
    }

    fn is_live(&self) -> bool {
        self.offset > 0 && self.size != TOMBSTONE_FILE_SIZE
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct MapMetric {
    file_count: u64,
    file_bytes: u64,
    deletion_count: u64,
    deletion_bytes: u64,
    max_file_key: NeedleId,
}

impl MapMetric {
    fn log_put(&mut self, key: NeedleId, old_size: Option<u32>, new_size: u32) {
        self.max_file_key = self.max_file_key.max(key);
        self.file_count += 1;
        self.file_bytes += new_size as u64;
        if let Some(old_size) = old_size {
            self.log_delete(old_size);
        }
    }

    fn log_delete(&mut self, deleted_size: u32) {
        self.deletion_count += 1;
        self.deletion_bytes += deleted_size as u64;
    }
}

/// HashMap-backed needle map persisted to an `.idx` log.
#[derive(Debug)]
pub struct MemoryNeedleMap {
    map: HashMap<NeedleId, NeedleValue>,
    metric: MapMetric,
    path: PathBuf,
    index_file: Option<File>,
    index_size: u64,
    read_only: bool,
    closed: bool,
}

impl MemoryNeedleMap {
    /// Open `path` for appending, creating it if missing, and replay it.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(&path)?;
        Self::replay(path, Some(file), false)
    }

    /// Replay `path` without opening it for writes; a missing file is an empty map.
    pub fn load_read_only(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        match File::open(&path) {
            Ok(file) => Self::replay(path, Some(file), true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Self::replay(path, None, true),
            Err(e) => Err(e.into()),
        }
    }

    fn replay(path: PathBuf, file: Option<File>, read_only: bool) -> Result<Self> {
        let mut nm = Self {
            map: HashMap::new(),
            metric: MapMetric::default(),
            path,
            index_file: None,
            index_size: 0,
            read_only,
            closed: false,
        };

        if let Some(file) = &file {
            let mut reader = BufReader::new(file);
            let mut entry = [0u8; NEEDLE_MAP_ENTRY_SIZE];
            loop {
                match reader.read_exact(&mut entry) {
                    Ok(()) => {
                        nm.apply(NeedleValue::from_bytes(&entry));
                        nm.index_size += NEEDLE_MAP_ENTRY_SIZE as u64;
                    }
                    Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
                    Err(e) => return Err(e.into()),
                }
            }

            let file_size = file.metadata()?.len();
            if file_size != nm.index_size {
                tracing::warn!(
                    "index file {} has {} trailing bytes, ignoring",
                    nm.path.display(),
                    file_size - nm.index_size
                );
            }
        }

        tracing::debug!(
            "loaded index file {}: {} live needles, max key {}",
            nm.path.display(),
            nm.map.len(),
            nm.metric.max_file_key
        );
        nm.index_file = if read_only { None } else { file };
        Ok(nm)
    }

    fn apply(&mut self, value: NeedleValue) {
        if value.is_live() {
            let old = self.map.insert(value.key, value).map(|old| old.size);
            self.metric.log_put(value.key, old, value.size);
        } else if let Some(old) = self.map.remove(&value.key) {
            self.metric.max_file_key = self.metric.max_file_key.max(value.key);
            self.metric.log_delete(old.size);
        }
    }

    fn append(&mut self, value: NeedleValue) -> Result<()> {
        if self.closed {
            return Err(Error::Other(format!(
                "index file {} is closed",
                self.path.display()
            )));
        }
        let file = self
            .index_file
            .as_mut()
            .ok_or_else(|| Error::ReadOnly(self.path.display().to_string()))?;
        file.write_all(&value.to_bytes())?;
        self.index_size += NEEDLE_MAP_ENTRY_SIZE as u64;
        Ok(())
    }

    /// Record a needle stored at byte `offset` of the data file.
    pub fn put(&mut self, key: NeedleId, offset: u64, size: u32) -> Result<()> {
        if offset % NEEDLE_PADDING_SIZE != 0 || offset == 0 {
            return Err(Error::Corrupted(format!(
                "needle {} offset {} is not a padded data offset",
                key, offset
            )));
        }
        let offset = u32::try_from(offset / NEEDLE_PADDING_SIZE).map_err(|_| {
            Error::Corrupted(format!("needle {} offset {} out of range", key, offset))
        })?;
        if size == TOMBSTONE_FILE_SIZE {
            return Err(Error::Corrupted(format!("needle {} has tombstone size", key)));
        }

        let value = NeedleValue { key, offset, size };
        self.append(value)?;
        self.apply(value);
        Ok(())
    }

    pub fn get(&self, key: NeedleId) -> Option<NeedleValue> {
        if self.closed {
            return None;
        }
        self.map.get(&key).copied()
    }

    /// Drop a needle; returns the removed entry, `None` if it was not live.
    pub fn delete(&mut self, key: NeedleId) -> Result<Option<NeedleValue>> {
        let Some(old) = self.get(key) else {
            return Ok(None);
        };
        let tombstone = NeedleValue {
            key,
            offset: old.offset,
            size: TOMBSTONE_FILE_SIZE,
        };
        self.append(tombstone)?;
        self.apply(tombstone);
        Ok(Some(old))
    }

    pub fn len(&self) -> usize {
        if self.closed {
            0
        } else {
            self.map.len()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn when_open(&self, value: u64) -> u64 {
        if self.closed {
            0
        } else {
            value
        }
    }
}

impl NeedleMapper for MemoryNeedleMap {
    fn content_size(&self) -> u64 {
        self.when_open(self.metric.file_bytes)
    }

    fn deleted_size(&self) -> u64 {
        self.when_open(self.metric.deletion_bytes)
    }

    fn file_count(&self) -> u64 {
        self.when_open(self.metric.file_count)
    }

    fn deleted_count(&self) -> u64 {
        self.when_open(self.metric.deletion_count)
    }

    fn max_file_key(&self) -> NeedleId {
        self.when_open(self.metric.max_file_key)
    }

    fn index_file_size(&self) -> u64 {
        self.when_open(self.index_size)
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        if let Some(file) = self.index_file.take() {
            file.sync_all()?;
        }
        self.map.clear();
        Ok(())
    }
}
