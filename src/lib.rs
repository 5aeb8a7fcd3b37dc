//! # needlestore
//!
//! Volume storage engine for a distributed blob store:
//! - Super block codec for the head of every volume data file
//! - Pluggable backends (local disk, in-process memory, S3) behind one registry
//! - Volume lifecycle with read-only recovery and remote binding
//! - TTL expiry and compaction bookkeeping
//!
//! ## Architecture
//!
//! ```text
//!  config / master backend list
//!              │
//!     ┌────────▼─────────┐
//!     │ BackendRegistry  │  type.id -> BackendStorage
//!     └────────┬─────────┘
//!              │ new_storage_file(key)
//!     ┌────────▼─────────┐      ┌────────────┐
//!     │      Volume      ├──────► SuperBlock │
//!     │  .dat .idx .vif  │      └────────────┘
//!     └────────┬─────────┘
//!              │
//!   ┌──────────┼───────────┐
//!   │          │           │
//! ┌─▼──┐   ┌───▼────┐   ┌──▼──┐
//! │disk│   │ memory │   │ s3  │
//! └────┘   └────────┘   └─────┘
//! ```
//!
//! ## Usage
//!
//! ```bash
//! # Create an empty volume
//! needlestore create --id 3 --collection pics --replication 001 --ttl 3d
//!
//! # Print a data file's super block
//! needlestore inspect ./data/volume/pics_3.dat
//!
//! # Load a volume and report its state
//! needlestore status --id 3 --collection pics
//!
//! # Show configured backends
//! needlestore backends --config needlestore.toml
//! ```

#![allow(clippy::result_large_err)]

pub mod backend;
pub mod common;
pub mod proto;
pub mod volume;

// Re-export commonly used types
pub use backend::BackendRegistry;
pub use common::{Config, Error, Result};
pub use volume::Volume;

/// Current version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build info
pub const BUILD_INFO: &str = concat!(env!("CARGO_PKG_VERSION"), " (", env!("CARGO_PKG_NAME"), ")");
