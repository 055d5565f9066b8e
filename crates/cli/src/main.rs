//! s3fs-mount - Mount an S3 bucket as a read-only filesystem.
//!
//! Usage:
//!   s3fs-mount <BUCKET> <MOUNT_POINT> [OPTIONS]
//!
//! Settings are resolved from built-in defaults, then `--config <file.json>`,
//! then individual flags.

mod config;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use rusty_s3fs_storage_crt::CrtStorageClient;
use rusty_s3fs_vfs::{mount, MountSettings, ReadEngine, S3Vfs};
use tracing::info;
use tracing_subscriber::EnvFilter;

use config::{MountConfig, Overrides};

#[derive(Parser)]
#[command(name = "s3fs-mount")]
#[command(about = "Mount an S3 bucket as a read-only filesystem")]
#[command(version)]
struct Cli {
    /// Bucket to mount
    bucket: String,

    /// Directory to mount at
    mount_point: PathBuf,

    /// JSON file with `storage` and `vfs` sections
    #[arg(short, long, env = "S3FS_CONFIG")]
    config: Option<PathBuf>,

    /// Allow other users to access the mount
    #[arg(long)]
    allow_other: bool,

    /// Enable debug-level logging
    #[arg(short, long)]
    verbose: bool,

    #[command(flatten)]
    overrides: Overrides,
}

/// Initialize tracing. `RUST_LOG` wins unless `verbose` is set.
fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).compact().init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config: MountConfig = MountConfig::resolve(cli.config.as_deref(), &cli.overrides)?;

    // Engine calls block, so the runtime must not own the thread that mounts.
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("s3fs-io")
        .build()
        .context("building tokio runtime")?;

    let client: CrtStorageClient = runtime
        .block_on(CrtStorageClient::new(config.storage.clone()))
        .context("creating S3 client")?;

    let engine = ReadEngine::new(
        Arc::new(client),
        runtime.handle().clone(),
        cli.bucket.clone(),
        config.vfs,
    )
    .context("starting read engine")?;

    let settings = MountSettings {
        fs_name: format!("s3fs:{}", cli.bucket),
        allow_other: cli.allow_other,
    };
    info!(
        bucket = %cli.bucket,
        mount_point = %cli.mount_point.display(),
        region = %config.storage.region,
        "Starting mount"
    );
    mount(S3Vfs::new(Arc::new(engine)), &cli.mount_point, &settings)
        .context("mounting filesystem")?;

    info!("Unmounted");
    Ok(())
}
