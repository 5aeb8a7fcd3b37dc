//! Compaction bookkeeping
//!
//! The copy itself runs elsewhere; the volume only records where the index
//! stood when compaction began and bumps the super block revision once the
//! compacted file is committed.

use crate::backend::require_writable;
use crate::common::{Error, Result};
use crate::volume::Volume;

/// Compaction fields of a volume at one moment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompactionState {
    pub is_compacting: bool,
    pub last_compact_index_offset: u64,
    pub last_compact_revision: u16,
}

impl Volume {
    /// Deleted bytes as a fraction of content bytes; 0 for an empty volume.
    pub async fn garbage_level(&self) -> f64 {
        let counters = self.accounting().await;
        if counters.content_size == 0 {
            return 0.0;
        }
        counters.deleted_size as f64 / counters.content_size as f64
    }

    pub async fn is_compacting(&self) -> bool {
        self.state.lock().await.is_compacting
    }

    pub async fn compaction_state(&self) -> CompactionState {
        let state = self.state.lock().await;
        CompactionState {
            is_compacting: state.is_compacting,
            last_compact_index_offset: state.last_compact_index_offset,
            last_compact_revision: state.last_compact_revision,
        }
    }

    /// Remember the index size and revision the compacted copy starts from.
    pub async fn begin_compaction(&self) -> Result<CompactionState> {
        let mut state = self.state.lock().await;
        if state.data_backend.is_none() {
            return Err(Error::VolumeClosed(self.file_name().display().to_string()));
        }
        if state.is_compacting {
            return Err(Error::CompactFailed(format!(
                "volume {} is already compacting",
                self.id
            )));
        }
        state.is_compacting = true;
        state.last_compact_index_offset = state.snapshot().index_file_size;
        state.last_compact_revision = state.super_block.compaction_revision;
        tracing::info!(
            "compacting volume {} from index offset {} revision {}",
            self.id,
            state.last_compact_index_offset,
            state.last_compact_revision
        );
        Ok(CompactionState {
            is_compacting: true,
            last_compact_index_offset: state.last_compact_index_offset,
            last_compact_revision: state.last_compact_revision,
        })
    }

    /// Bump the compaction revision and rewrite the super block header.
    ///
    /// Returns the new revision. The compacting flag is cleared either way;
    /// on failure the in-memory revision is left unchanged.
    pub async fn commit_compaction(&self) -> Result<u16> {
        let mut state = self.state.lock().await;
        if !state.is_compacting {
            return Err(Error::CompactFailed(format!(
                "volume {} is not compacting",
                self.id
            )));
        }
        state.is_compacting = false;

        let backend = state
            .data_backend
            .clone()
            .ok_or_else(|| Error::VolumeClosed(self.file_name().display().to_string()))?;
        let writable = require_writable(backend.as_ref(), "commit_compaction")?;

        let mut super_block = state.super_block.clone();
        super_block.compaction_revision = state.last_compact_revision.wrapping_add(1);
        let header = super_block.to_bytes()?;
        writable
            .write_at(&header, 0)
            .await
            .map_err(|e| Error::CompactFailed(format!("volume {}: {}", self.id, e)))?;

        let appended = state
            .snapshot()
            .index_file_size
            .saturating_sub(state.last_compact_index_offset);
        if appended > 0 {
            tracing::debug!(
                "volume {} index grew {} bytes during compaction",
                self.id,
                appended
            );
        }

        let revision = super_block.compaction_revision;
        state.super_block = super_block;
        tracing::info!("committed compaction of volume {} at revision {}", self.id, revision);
        Ok(revision)
    }

    pub async fn cancel_compaction(&self) {
        let mut state = self.state.lock().await;
        if state.is_compacting {
            state.is_compacting = false;
            tracing::info!("cancelled compaction of volume {}", self.id);
        }
    }
}
