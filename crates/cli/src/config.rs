//! Mount configuration: defaults, then an optional JSON file, then flags.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use rusty_s3fs_storage::StorageSettings;
use rusty_s3fs_vfs::{RangeCacheOptions, VfsOptions};
use serde::{Deserialize, Serialize};

/// Everything needed to build a client and an engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MountConfig {
    pub storage: StorageSettings,
    pub vfs: VfsOptions,
}

/// Command-line settings that override the config file.
#[derive(Debug, Clone, Default, Args)]
pub struct Overrides {
    /// AWS region of the bucket
    #[arg(long, env = "AWS_REGION")]
    pub region: Option<String>,

    /// Custom S3-compatible endpoint URL
    #[arg(long, env = "S3FS_ENDPOINT")]
    pub endpoint: Option<String>,

    /// Maximum concurrent backend connections
    #[arg(long)]
    pub max_connections: Option<usize>,

    /// Bytes per buffer block
    #[arg(long)]
    pub block_size: Option<usize>,

    /// Bytes fetched ahead of the furthest read
    #[arg(long)]
    pub read_ahead_size: Option<u64>,

    /// Idle time before a block already read past is dropped
    #[arg(long)]
    pub buffer_timeout_ms: Option<u64>,

    /// Idle time before a stream is closed
    #[arg(long)]
    pub stream_idle_timeout_secs: Option<u64>,

    /// Longest a read waits for its bytes
    #[arg(long)]
    pub read_wait_timeout_secs: Option<u64>,

    /// Byte budget of the range cache
    #[arg(long)]
    pub range_cache_max_bytes: Option<u64>,

    /// Turn off the range cache
    #[arg(long)]
    pub no_range_cache: bool,
}

impl MountConfig {
    /// Read a JSON config file. Missing fields take their defaults.
    ///
    /// # Arguments
    /// * `path` - Path to the JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let text: String = fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("parsing config file {}", path.display()))
    }

    /// Defaults, overlaid by `path` when given, overlaid by `overrides`.
    pub fn resolve(path: Option<&Path>, overrides: &Overrides) -> Result<Self> {
        let mut config: MountConfig = match path {
            Some(p) => Self::load(p)?,
            None => Self::default(),
        };
        config.apply(overrides);
        config.vfs.validate().context("invalid engine options")?;
        Ok(config)
    }

    /// Overlay the flags that were set.
    pub fn apply(&mut self, overrides: &Overrides) {
        if let Some(ref region) = overrides.region {
            self.storage.region = region.clone();
        }
        if let Some(ref endpoint) = overrides.endpoint {
            self.storage.endpoint = Some(endpoint.clone());
        }
        if let Some(n) = overrides.max_connections {
            self.storage.max_connections = n;
        }

        let stream = &mut self.vfs.stream;
        if let Some(size) = overrides.block_size {
            stream.block_size = size;
        }
        if let Some(size) = overrides.read_ahead_size {
            stream.read_ahead_size = size;
        }
        if let Some(ms) = overrides.buffer_timeout_ms {
            stream.buffer_timeout_ms = ms;
        }
        if let Some(secs) = overrides.read_wait_timeout_secs {
            stream.read_wait_timeout_ms = Duration::from_secs(secs).as_millis() as u64;
        }
        if let Some(secs) = overrides.stream_idle_timeout_secs {
            self.vfs.pool.idle_timeout_ms = Duration::from_secs(secs).as_millis() as u64;
        }

        if let Some(bytes) = overrides.range_cache_max_bytes {
            self.vfs.range_cache.max_bytes = bytes;
        }
        if overrides.no_range_cache {
            self.vfs.range_cache = RangeCacheOptions {
                enabled: false,
                ..self.vfs.range_cache.clone()
            };
        }
    }
}
