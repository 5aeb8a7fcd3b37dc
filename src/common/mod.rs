//! Common utilities and types shared across needlestore

pub mod config;
pub mod error;
pub mod metrics;
pub mod utils;

pub use config::{Config, VolumeConfig};
pub use error::{Error, Result};
pub use metrics::METRICS;
pub use utils::{format_bytes, timestamp_now, unix_seconds};
