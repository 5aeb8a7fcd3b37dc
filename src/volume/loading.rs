//! Binding a volume to its data file
//!
//! Load order: a `.vif` naming a remote object wins; otherwise the local
//! `.dat` is opened (read-only if its mode bits say so) or created. The
//! super block is then read, or written to an empty file, and the needle map
//! is replayed from `.idx`.

use crate::backend::{
    require_writable, BackendRegistry, BackendStorageFile, DiskFile, WritableBackendStorageFile,
};
use crate::common::{timestamp_now, unix_seconds, Error, Result, METRICS};
use crate::volume::state::{with_extension, VolumeState, VOLUME_GAUGE};
use crate::volume::{
    read_super_block, MemoryNeedleMap, NeedleMapper, ReplicaPlacement, Ttl, Volume, VolumeId,
    VolumeInfo, CURRENT_VERSION, SUPER_BLOCK_SIZE,
};
use chrono::{DateTime, Utc};
use std::fs::Metadata;
use std::io;
use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::Arc;

impl Volume {
    /// Construct and load a volume.
    ///
    /// Pass `None` for `replica_placement` and `ttl` to take them from an
    /// existing data file; a new data file needs both.
    pub async fn new(
        dir: impl Into<std::path::PathBuf>,
        collection: &str,
        id: VolumeId,
        replica_placement: Option<ReplicaPlacement>,
        ttl: Option<Ttl>,
        registry: &BackendRegistry,
    ) -> Result<Self> {
        let v = Self::unloaded(dir, collection, id, replica_placement, ttl);
        v.load(registry).await?;
        Ok(v)
    }

    /// Bind the data file and needle map. On failure nothing stays bound.
    pub async fn load(&self, registry: &BackendRegistry) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.data_backend.is_some() {
            return Err(Error::Other(format!(
                "volume {} is already loaded",
                self.file_name().display()
            )));
        }

        if let Err(e) = self.bind(&mut state, registry).await {
            state.data_backend = None;
            state.nm = None;
            state.remote_file = None;
            self.read_only.store(false, Ordering::SeqCst);
            return Err(e);
        }

        METRICS.volume_counter(&self.collection, VOLUME_GAUGE).inc();
        tracing::info!(
            "loaded volume {} version {} replication {} ttl {} read_only {}",
            self.id,
            state.super_block.version,
            state.super_block.replica_placement(),
            state.super_block.ttl(),
            self.is_read_only()
        );
        Ok(())
    }

    async fn bind(&self, state: &mut VolumeState, registry: &BackendRegistry) -> Result<()> {
        let file_name = self.file_name();
        let mut already_has_super_block = false;

        if let Some(info) = VolumeInfo::maybe_load(with_extension(&file_name, "vif"))? {
            if let Some(remote) = info.remote_file() {
                let backend_name = remote.backend_name();
                let storage = registry
                    .get(&backend_name)
                    .ok_or_else(|| Error::BackendNotFound(backend_name.clone()))?;
                state.data_backend = Some(storage.new_storage_file(&remote.key));
                state.last_modified_ts_seconds = remote.modified_time;
                state.remote_file = Some(remote.clone());
                self.read_only.store(true, Ordering::SeqCst);
                already_has_super_block = true;
                tracing::info!(
                    "volume {} is bound to remote file {} on {}",
                    self.id,
                    remote.key,
                    backend_name
                );
            }
        }

        let dat_path = with_extension(&file_name, "dat");
        if state.data_backend.is_none() {
            match std::fs::metadata(&dat_path) {
                Ok(metadata) => {
                    let (can_read, can_write) = check_file(&metadata);
                    if !can_read {
                        return Err(io::Error::new(
                            io::ErrorKind::PermissionDenied,
                            format!("cannot read volume data file {}", dat_path.display()),
                        )
                        .into());
                    }
                    let file = if can_write {
                        DiskFile::open(&dat_path)?
                    } else {
                        tracing::warn!(
                            "opening volume data file {} read-only",
                            dat_path.display()
                        );
                        self.read_only.store(true, Ordering::SeqCst);
                        DiskFile::open_read_only(&dat_path)?
                    };
                    state.last_modified_ts_seconds = metadata
                        .modified()
                        .map(|t| unix_seconds(DateTime::<Utc>::from(t)))
                        .unwrap_or(0);
                    if metadata.len() >= SUPER_BLOCK_SIZE as u64 {
                        already_has_super_block = true;
                    }
                    state.data_backend = Some(Arc::new(file));
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    state.data_backend = Some(Arc::new(DiskFile::create(&dat_path)?));
                    state.last_modified_ts_seconds = timestamp_now();
                    tracing::info!("created volume data file {}", dat_path.display());
                }
                Err(e) => return Err(e.into()),
            }
        }

        if already_has_super_block {
            let backend = backend_of(state, &dat_path)?;
            state.super_block = read_super_block(backend.as_ref()).await?;
        } else {
            if !state.super_block.initialized() {
                return Err(Error::NotInitialized(format!(
                    "volume {} has no super block and no replication or ttl to write one",
                    file_name.display()
                )));
            }
            self.maybe_write_super_block(state, &dat_path).await?;
        }

        let idx_path = with_extension(&file_name, "idx");
        let nm = if self.is_read_only() {
            MemoryNeedleMap::load_read_only(&idx_path)?
        } else {
            MemoryNeedleMap::load(&idx_path)?
        };
        state.nm = Some(Box::new(nm) as Box<dyn NeedleMapper>);
        Ok(())
    }

    /// Write the in-memory super block when the data file is empty.
    ///
    /// A write refused for permission recreates the file and retries; only a
    /// successful retry clears the read-only flag.
    async fn maybe_write_super_block(&self, state: &mut VolumeState, dat_path: &Path) -> Result<()> {
        let backend = backend_of(state, dat_path)?;
        let stat = backend.get_stat().await.map_err(|e| {
            tracing::warn!("failed to stat data file {}: {}", backend, e);
            e
        })?;
        if stat.size != 0 {
            return Ok(());
        }

        state.super_block.version = CURRENT_VERSION;
        let header = state.super_block.to_bytes()?;
        let writable = require_writable(backend.as_ref(), "write_at")?;
        match writable.write_at(&header, 0).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_permission_denied() => {
                tracing::warn!(
                    "volume data file {} is read-only but empty, recreating it",
                    dat_path.display()
                );
                let file = Arc::new(DiskFile::create(dat_path)?);
                state.data_backend = Some(file.clone());
                file.write_at(&header, 0).await?;
                self.read_only.store(false, Ordering::SeqCst);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

fn backend_of(state: &VolumeState, dat_path: &Path) -> Result<Arc<dyn BackendStorageFile>> {
    state
        .data_backend
        .clone()
        .ok_or_else(|| Error::VolumeClosed(dat_path.display().to_string()))
}

/// Owner read and write permission, from mode bits rather than an open attempt.
#[cfg(unix)]
fn check_file(metadata: &Metadata) -> (bool, bool) {
    use std::os::unix::fs::PermissionsExt;
    let mode = metadata.permissions().mode();
    (mode & 0o400 != 0, mode & 0o200 != 0)
}

#[cfg(not(unix))]
fn check_file(metadata: &Metadata) -> (bool, bool) {
    (true, !metadata.permissions().readonly())
}
