//! Configuration for needlestore components
//!
//! Settings come from an optional TOML file layered under `NEEDLESTORE__*`
//! environment variables. The same layered source also carries the
//! `[storage.backend.<type>.<id>]` tables consumed by the backend registry.

use crate::common::Result;
use crate::volume::{ReplicaPlacement, Ttl};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const ENV_PREFIX: &str = "NEEDLESTORE";

/// Global configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Volume-specific config
    #[serde(default)]
    pub volume: VolumeConfig,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            volume: VolumeConfig::default(),
            log_level: default_log_level(),
        }
    }
}

impl Config {
    /// Build the layered configuration source.
    ///
    /// A missing file is not an error; environment variables use `__` as the
    /// nesting separator, e.g. `NEEDLESTORE__VOLUME__DIR`.
    pub fn source(path: Option<&Path>) -> Result<config::Config> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(false));
        }
        let source = builder
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?;
        Ok(source)
    }

    /// Deserialize typed settings out of a layered source.
    pub fn from_source(source: &config::Config) -> Result<Self> {
        Ok(source.clone().try_deserialize()?)
    }

    /// Convenience for `source` followed by `from_source`.
    pub fn load(path: Option<&Path>) -> Result<(Self, config::Config)> {
        let source = Self::source(path)?;
        let config = Self::from_source(&source)?;
        Ok((config, source))
    }
}

/// Volume configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeConfig {
    /// Directory holding `.dat`, `.idx` and `.vif` files
    #[serde(default = "default_dir")]
    pub dir: PathBuf,

    /// Collection new volumes are created in
    #[serde(default)]
    pub collection: String,

    /// Replica placement for new volumes, e.g. "001"
    #[serde(default = "default_replication")]
    pub replication: String,

    /// TTL for new volumes, e.g. "3d"; empty means no TTL
    #[serde(default)]
    pub ttl: String,

    /// Size limit announced by the master; 0 until known
    #[serde(default = "default_volume_size_limit_mb")]
    pub volume_size_limit_mb: u64,

    /// Upper bound on the grace period before an expired volume is removed
    #[serde(default = "default_ttl_removal_delay")]
    pub ttl_removal_delay_minutes: u32,
}

fn default_dir() -> PathBuf {
    PathBuf::from("./data/volume")
}
fn default_replication() -> String {
    "000".to_string()
}
fn default_volume_size_limit_mb() -> u64 {
    30 * 1000
}
fn default_ttl_removal_delay() -> u32 {
    10
}

impl Default for VolumeConfig {
    fn default() -> Self {
        Self {
            dir: default_dir(),
            collection: String::new(),
            replication: default_replication(),
            ttl: String::new(),
            volume_size_limit_mb: default_volume_size_limit_mb(),
            ttl_removal_delay_minutes: default_ttl_removal_delay(),
        }
    }
}

impl VolumeConfig {
    pub fn replica_placement(&self) -> Result<ReplicaPlacement> {
        self.replication.parse()
    }

    pub fn ttl(&self) -> Result<Ttl> {
        self.ttl.parse()
    }

    pub fn volume_size_limit_bytes(&self) -> u64 {
        self.volume_size_limit_mb * 1024 * 1024
    }
}
