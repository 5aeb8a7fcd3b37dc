//! Volume state and accounting
//!
//! A volume owns one super block, at most one data backend handle and at
//! most one needle map. All three live behind a single async mutex; data
//! reads clone the backend handle under the lock and run outside it.

use crate::backend::BackendStorageFile;
use crate::common::{timestamp_now, Error, Result, METRICS};
use crate::proto::VolumeInformationMessage;
use crate::volume::needle_map::{NeedleId, NeedleMapper};
use crate::volume::{RemoteFile, ReplicaPlacement, SuperBlock, Ttl, Version};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

pub type VolumeId = u32;

/// Label of the gauge counting loaded volumes per collection.
pub(crate) const VOLUME_GAUGE: &str = "volume";

/// `<dir>/<collection>_<id>`, or `<dir>/<id>` without a collection.
pub fn volume_file_name(dir: impl AsRef<Path>, collection: &str, id: VolumeId) -> PathBuf {
    if collection.is_empty() {
        dir.as_ref().join(id.to_string())
    } else {
        dir.as_ref().join(format!("{}_{}", collection, id))
    }
}

/// Append `.ext` to a base file name without touching dots already in it.
pub(crate) fn with_extension(base: &Path, ext: &str) -> PathBuf {
    let mut name = base.as_os_str().to_os_string();
    name.push(".");
    name.push(ext);
    PathBuf::from(name)
}

/// Counters read from the needle map in one critical section.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NeedleMapSnapshot {
    pub content_size: u64,
    pub deleted_size: u64,
    pub file_count: u64,
    pub deleted_count: u64,
    pub max_file_key: NeedleId,
    pub index_file_size: u64,
}

impl NeedleMapSnapshot {
    fn of(nm: Option<&dyn NeedleMapper>) -> Self {
        match nm {
            Some(nm) => Self {
                content_size: nm.content_size(),
                deleted_size: nm.deleted_size(),
                file_count: nm.file_count(),
                deleted_count: nm.deleted_count(),
                max_file_key: nm.max_file_key(),
                index_file_size: nm.index_file_size(),
            },
            None => Self::default(),
        }
    }
}

/// Physical sizes of a volume. All zero when the backend is absent or
/// cannot be stat'ed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VolumeFileStat {
    pub dat_size: u64,
    pub idx_size: u64,
    pub modified: Option<DateTime<Utc>>,
}

pub(crate) struct VolumeState {
    pub(crate) super_block: SuperBlock,
    pub(crate) data_backend: Option<Arc<dyn BackendStorageFile>>,
    pub(crate) nm: Option<Box<dyn NeedleMapper>>,
    pub(crate) remote_file: Option<RemoteFile>,
    pub(crate) last_modified_ts_seconds: u64,
    pub(crate) last_append_at_ns: u64,
    pub(crate) last_compact_index_offset: u64,
    pub(crate) last_compact_revision: u16,
    pub(crate) is_compacting: bool,
}

impl VolumeState {
    pub(crate) fn snapshot(&self) -> NeedleMapSnapshot {
        NeedleMapSnapshot::of(self.nm.as_deref())
    }
}

pub struct Volume {
    pub id: VolumeId,
    pub collection: String,
    dir: PathBuf,
    pub(crate) read_only: AtomicBool,
    pub(crate) state: Mutex<VolumeState>,
}

impl Volume {
    /// A volume with nothing bound yet. `None` placement or TTL means the
    /// super block is read from an existing data file on load.
    pub fn unloaded(
        dir: impl Into<PathBuf>,
        collection: &str,
        id: VolumeId,
        replica_placement: Option<ReplicaPlacement>,
        ttl: Option<Ttl>,
    ) -> Self {
        Self {
            id,
            collection: collection.to_string(),
            dir: dir.into(),
            read_only: AtomicBool::new(false),
            state: Mutex::new(VolumeState {
                super_block: SuperBlock::new(replica_placement, ttl),
                data_backend: None,
                nm: None,
                remote_file: None,
                last_modified_ts_seconds: 0,
                last_append_at_ns: 0,
                last_compact_index_offset: 0,
                last_compact_revision: 0,
                is_compacting: false,
            }),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Base path of this volume's files, without extension.
    pub fn file_name(&self) -> PathBuf {
        volume_file_name(&self.dir, &self.collection, self.id)
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only.load(Ordering::SeqCst)
    }

    pub fn mark_read_only(&self, read_only: bool) {
        self.read_only.store(read_only, Ordering::SeqCst);
    }

    pub async fn super_block(&self) -> SuperBlock {
        self.state.lock().await.super_block.clone()
    }

    pub async fn version(&self) -> Version {
        self.state.lock().await.super_block.version
    }

    pub async fn replica_placement(&self) -> ReplicaPlacement {
        self.state.lock().await.super_block.replica_placement()
    }

    pub async fn ttl(&self) -> Ttl {
        self.state.lock().await.super_block.ttl()
    }

    pub async fn need_to_replicate(&self) -> bool {
        self.replica_placement().await.copy_count() > 1
    }

    pub async fn is_loaded(&self) -> bool {
        self.state.lock().await.data_backend.is_some()
    }

    /// Remote object this volume's data lives in, if bound to one.
    pub async fn remote_file(&self) -> Option<RemoteFile> {
        self.state.lock().await.remote_file.clone()
    }

    pub async fn last_modified_ts_seconds(&self) -> u64 {
        self.state.lock().await.last_modified_ts_seconds
    }

    pub async fn last_append_at_ns(&self) -> u64 {
        self.state.lock().await.last_append_at_ns
    }

    /// Note a needle appended at `append_at_ns`.
    pub async fn record_append(&self, append_at_ns: u64) {
        let mut state = self.state.lock().await;
        state.last_append_at_ns = append_at_ns;
        let seconds = append_at_ns / 1_000_000_000;
        if state.last_modified_ts_seconds < seconds {
            state.last_modified_ts_seconds = seconds;
        }
    }

    pub async fn accounting(&self) -> NeedleMapSnapshot {
        self.state.lock().await.snapshot()
    }

    pub async fn content_size(&self) -> u64 {
        self.accounting().await.content_size
    }

    pub async fn deleted_size(&self) -> u64 {
        self.accounting().await.deleted_size
    }

    pub async fn file_count(&self) -> u64 {
        self.accounting().await.file_count
    }

    pub async fn deleted_count(&self) -> u64 {
        self.accounting().await.deleted_count
    }

    pub async fn max_file_key(&self) -> NeedleId {
        self.accounting().await.max_file_key
    }

    pub async fn index_file_size(&self) -> u64 {
        self.accounting().await.index_file_size
    }

    /// Best-effort stat: failures are logged and reported as zeros.
    pub async fn file_stat(&self) -> VolumeFileStat {
        let state = self.state.lock().await;
        let Some(backend) = &state.data_backend else {
            return VolumeFileStat::default();
        };
        match backend.get_stat().await {
            Ok(stat) => VolumeFileStat {
                dat_size: stat.size,
                idx_size: state.snapshot().index_file_size,
                modified: Some(stat.modified),
            },
            Err(e) => {
                tracing::warn!("failed to read file size {}: {}", backend, e);
                VolumeFileStat::default()
            }
        }
    }

    /// Read from the data file without holding the volume lock during I/O.
    pub async fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        let backend = self.data_backend().await?;
        backend.read_at(buf, offset).await
    }

    /// Read `len` bytes at `offset`; shorter only at the end of the data file.
    pub async fn read_range(&self, offset: u64, len: usize) -> Result<Bytes> {
        let mut buf = vec![0u8; len];
        let n = self.read_at(&mut buf, offset).await?;
        buf.truncate(n);
        Ok(Bytes::from(buf))
    }

    pub(crate) async fn data_backend(&self) -> Result<Arc<dyn BackendStorageFile>> {
        self.state
            .lock()
            .await
            .data_backend
            .clone()
            .ok_or_else(|| Error::VolumeClosed(self.file_name().display().to_string()))
    }

    /// Release the needle map, then the data file. Safe to call repeatedly.
    pub async fn close(&self) {
        let mut state = self.state.lock().await;
        if let Some(mut nm) = state.nm.take() {
            if let Err(e) = nm.close() {
                tracing::warn!("failed to close index of volume {}: {}", self.id, e);
            }
        }
        if let Some(backend) = state.data_backend.take() {
            if let Err(e) = backend.close().await {
                tracing::warn!("failed to close volume data file {}: {}", backend, e);
            }
            METRICS.volume_counter(&self.collection, VOLUME_GAUGE).dec();
            tracing::info!("closed volume {}", self.id);
        }
    }

    /// Whether the TTL has run out. Never true before the master has
    /// announced a size limit, for an empty volume, or without a TTL.
    pub async fn expired(&self, volume_size_limit: u64) -> bool {
        self.expired_at(volume_size_limit, timestamp_now()).await
    }

    pub async fn expired_at(&self, volume_size_limit: u64, now_seconds: u64) -> bool {
        if volume_size_limit == 0 {
            return false;
        }
        let state = self.state.lock().await;
        if state.snapshot().content_size == 0 {
            return false;
        }
        ttl_expired(
            state.super_block.ttl,
            state.last_modified_ts_seconds,
            now_seconds,
        )
    }

    /// Whether an expired volume has waited out its removal delay of
    /// `min(ttl / 10, max_delay_minutes)`.
    pub async fn expired_long_enough(&self, max_delay_minutes: u32) -> bool {
        self.expired_long_enough_at(max_delay_minutes, timestamp_now())
            .await
    }

    pub async fn expired_long_enough_at(&self, max_delay_minutes: u32, now_seconds: u64) -> bool {
        let state = self.state.lock().await;
        ttl_removal_due(
            state.super_block.ttl,
            state.last_modified_ts_seconds,
            max_delay_minutes,
            now_seconds,
        )
    }

    /// Point-in-time report for the master.
    pub async fn to_volume_information_message(&self) -> VolumeInformationMessage {
        let stat = self.file_stat().await;
        let state = self.state.lock().await;
        let counters = state.snapshot();
        let (remote_storage_name, remote_storage_key) = match &state.remote_file {
            Some(remote) => (remote.backend_name(), remote.key.clone()),
            None => (String::new(), String::new()),
        };

        VolumeInformationMessage {
            id: self.id,
            size: stat.dat_size,
            collection: self.collection.clone(),
            file_count: counters.file_count,
            delete_count: counters.deleted_count,
            deleted_byte_count: counters.deleted_size,
            read_only: self.is_read_only(),
            replica_placement: state.super_block.replica_placement().byte() as u32,
            version: state.super_block.version as u32,
            ttl: state.super_block.ttl().to_u32(),
            compact_revision: state.super_block.compaction_revision as u32,
            modified_at_second: stat.modified.map(|t| t.timestamp()).unwrap_or(0),
            remote_storage_name,
            remote_storage_key,
        }
    }
}

fn ttl_expired(ttl: Option<Ttl>, last_modified_seconds: u64, now_seconds: u64) -> bool {
    let Some(ttl) = ttl.filter(|t| t.minutes() > 0) else {
        return false;
    };
    let lived_minutes = (now_seconds as i64 - last_modified_seconds as i64) / 60;
    tracing::debug!(
        "now:{} lastModified:{} ttl:{} lived:{}",
        now_seconds,
        last_modified_seconds,
        ttl,
        lived_minutes
    );
    (ttl.minutes() as i64) < lived_minutes
}

fn ttl_removal_due(
    ttl: Option<Ttl>,
    last_modified_seconds: u64,
    max_delay_minutes: u32,
    now_seconds: u64,
) -> bool {
    let Some(ttl) = ttl.filter(|t| t.minutes() > 0) else {
        return false;
    };
    let removal_delay = (ttl.minutes() / 10).min(max_delay_minutes);
    (ttl.minutes() as u64 + removal_delay as u64) * 60 + last_modified_seconds < now_seconds
}

impl fmt::Display for Volume {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let data_file = match self.state.try_lock() {
            Ok(state) => match &state.data_backend {
                Some(backend) => backend.to_string(),
                None => "<closed>".to_string(),
            },
            Err(_) => "<busy>".to_string(),
        };
        write!(
            f,
            "Id:{}, dir:{}, Collection:{}, dataFile:{}, readOnly:{}",
            self.id,
            self.dir.display(),
            self.collection,
            data_file,
            self.is_read_only()
        )
    }
}
