//! Volumes
//!
//! A volume is one `.dat` data file fronted by a super block, with:
//! - an `.idx` needle map for accounting
//! - an optional `.vif` binding the data to a remote backend
//! - TTL expiry decisions
//! - compaction bookkeeping

pub mod info;
mod loading;
pub mod needle_map;
pub mod replica_placement;
pub mod state;
pub mod super_block;
pub mod ttl;
pub mod vacuum;

pub use info::{RemoteFile, VolumeInfo};
pub use needle_map::{MemoryNeedleMap, NeedleId, NeedleMapper, NeedleValue};
pub use replica_placement::ReplicaPlacement;
pub use state::{volume_file_name, NeedleMapSnapshot, Volume, VolumeFileStat, VolumeId};
pub use super_block::{
    read_super_block, SuperBlock, Version, CURRENT_VERSION, MAX_SUPER_BLOCK_EXTRA_SIZE,
    SUPER_BLOCK_SIZE, VERSION1, VERSION2, VERSION3,
};
pub use ttl::{Ttl, TtlUnit};
pub use vacuum::CompactionState;
