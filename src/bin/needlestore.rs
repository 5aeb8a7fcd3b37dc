//! CLI for local volume operations

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use needlestore::backend::DiskFile;
use needlestore::common::format_bytes;
use needlestore::volume::{read_super_block, ReplicaPlacement, Ttl};
use needlestore::{BackendRegistry, Config, Volume};
use std::path::PathBuf;
use tracing_subscriber::prelude::*;

#[derive(Parser)]
#[command(name = "needlestore")]
#[command(about = "needlestore volume storage engine CLI")]
#[command(version)]
struct Cli {
    /// Configuration file (TOML); NEEDLESTORE__* variables override it
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error); defaults to the configured level
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the super block of a volume data file
    Inspect {
        /// Path to a .dat file
        path: PathBuf,
    },

    /// Create an empty volume
    Create {
        /// Volume id
        #[arg(long)]
        id: u32,

        /// Collection (configured collection if omitted)
        #[arg(long)]
        collection: Option<String>,

        /// Replica placement, e.g. 001 (configured value if omitted)
        #[arg(long)]
        replication: Option<String>,

        /// Time to live, e.g. 3d (configured value if omitted)
        #[arg(long)]
        ttl: Option<String>,
    },

    /// Load a volume and report its accounting and expiry state
    Status {
        /// Volume id
        #[arg(long)]
        id: u32,

        /// Collection (configured collection if omitted)
        #[arg(long)]
        collection: Option<String>,
    },

    /// Print the backends built from configuration
    Backends,
}

fn init_tracing(level: &str) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| level.to_string().into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn exit_if_fatal(e: needlestore::Error) -> anyhow::Error {
    if e.is_fatal() {
        tracing::error!("{}", e);
        std::process::exit(1);
    }
    e.into()
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let (config, source) = Config::load(cli.config.as_deref()).context("loading configuration")?;
    init_tracing(cli.log_level.as_deref().unwrap_or(&config.log_level));

    let registry = BackendRegistry::with_default_factories();
    registry
        .load_configuration(&source)
        .map_err(exit_if_fatal)?;

    match cli.command {
        Commands::Inspect { path } => {
            let file = DiskFile::open_read_only(&path)
                .with_context(|| format!("opening {}", path.display()))?;
            let super_block = read_super_block(&file).await?;
            println!("Super block of {}:", path.display());
            println!("  Version: {}", super_block.version);
            println!("  Replication: {}", super_block.replica_placement());
            println!("  TTL: {}", super_block.ttl());
            println!("  Compaction revision: {}", super_block.compaction_revision);
            println!("  Block size: {}", super_block.block_size());
            if let Some(ec) = super_block.extra.and_then(|extra| extra.erasure_coding) {
                println!(
                    "  Erasure coding: {}+{} volumes {:?}",
                    ec.data, ec.parity, ec.volume_ids
                );
            }
        }

        Commands::Create {
            id,
            collection,
            replication,
            ttl,
        } => {
            let volume_config = &config.volume;
            let collection = collection.unwrap_or_else(|| volume_config.collection.clone());
            let replica_placement: ReplicaPlacement = match replication {
                Some(r) => r.parse()?,
                None => volume_config.replica_placement()?,
            };
            let ttl: Ttl = match ttl {
                Some(t) => t.parse()?,
                None => volume_config.ttl()?,
            };

            std::fs::create_dir_all(&volume_config.dir)
                .with_context(|| format!("creating {}", volume_config.dir.display()))?;
            let volume = Volume::new(
                &volume_config.dir,
                &collection,
                id,
                Some(replica_placement),
                Some(ttl),
                &registry,
            )
            .await
            .map_err(exit_if_fatal)?;
            println!("Created volume {}", volume.file_name().display());
            volume.close().await;
        }

        Commands::Status { id, collection } => {
            let volume_config = &config.volume;
            let collection = collection.unwrap_or_else(|| volume_config.collection.clone());
            let volume = Volume::new(&volume_config.dir, &collection, id, None, None, &registry)
                .await
                .map_err(exit_if_fatal)?;

            let info = volume.to_volume_information_message().await;
            let stat = volume.file_stat().await;
            println!("Volume {}:", volume.file_name().display());
            println!("  Data size: {}", format_bytes(stat.dat_size));
            println!("  Index size: {}", format_bytes(stat.idx_size));
            println!("  Files: {} ({} deleted)", info.file_count, info.delete_count);
            println!("  Deleted bytes: {}", format_bytes(info.deleted_byte_count));
            println!("  Garbage level: {:.2}", volume.garbage_level().await);
            println!("  Read-only: {}", info.read_only);
            println!("  Compaction revision: {}", info.compact_revision);
            println!(
                "  Expired: {}",
                volume
                    .expired(volume_config.volume_size_limit_bytes())
                    .await
            );
            println!(
                "  Removable: {}",
                volume
                    .expired_long_enough(volume_config.ttl_removal_delay_minutes)
                    .await
            );
            if !info.remote_storage_name.is_empty() {
                println!(
                    "  Remote: {} {}",
                    info.remote_storage_name, info.remote_storage_key
                );
            }
            volume.close().await;
        }

        Commands::Backends => {
            let backends = registry.export_configuration();
            if backends.is_empty() {
                println!("No backends configured");
            }
            for backend in backends {
                println!("{}.{}", backend.r#type, backend.id);
                let mut properties: Vec<_> = backend.properties.into_iter().collect();
                properties.sort();
                for (key, value) in properties {
                    if key.contains("secret") {
                        println!("  {} = ********", key);
                    } else {
                        println!("  {} = {}", key, value);
                    }
                }
            }
        }
    }

    Ok(())
}
