//! Fingerprint set configuration

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use crate::routing::MAX_FP_BITS;
use crate::{Error, Result};

/// Default file stem for shard artifacts
pub const DEFAULT_NAME: &str = "fingerprints";

/// Storage backend used for every shard of a partitioned set
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShardBackend {
    /// Hash set in memory, snapshots written on checkpoint
    Memory,
    /// In-memory buffer bounded by the memory budget, spilled to a sorted run on disk
    #[default]
    Disk,
}

impl fmt::Display for ShardBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShardBackend::Memory => write!(f, "memory"),
            ShardBackend::Disk => write!(f, "disk"),
        }
    }
}

/// Configuration for a partitioned fingerprint set
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FpSetConfig {
    /// log2 of the shard count
    pub bits: u32,
    /// Memory budget in bytes, split evenly across shards
    pub total_memory: u64,
    /// Directory holding shard data and checkpoint files
    pub metadata_dir: PathBuf,
    /// File stem; shard `i` uses `<name>_<i>`
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default)]
    pub backend: ShardBackend,
    /// Number of worker threads expected to call `put` concurrently
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

fn default_name() -> String {
    DEFAULT_NAME.to_string()
}

fn default_concurrency() -> usize {
    1
}

impl FpSetConfig {
    /// Create a configuration rooted at `base_dir`
    ///
    /// ```text
    /// base_dir/
    ///   states/
    ///     fingerprints_0.fp
    ///     fingerprints_0.fp.chkpt
    ///     fingerprints_1.fp
    ///     ...
    /// ```
    pub fn from_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            bits: 1,
            total_memory: 64 * 1024 * 1024,
            metadata_dir: base_dir.into().join("states"),
            name: default_name(),
            backend: ShardBackend::default(),
            concurrency: default_concurrency(),
        }
    }

    pub fn with_bits(mut self, bits: u32) -> Self {
        self.bits = bits;
        self
    }

    pub fn with_memory(mut self, total_memory: u64) -> Self {
        self.total_memory = total_memory;
        self
    }

    pub fn with_backend(mut self, backend: ShardBackend) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Number of shards
    pub fn shard_count(&self) -> usize {
        1usize << self.bits.min(MAX_FP_BITS)
    }

    /// Memory budget of a single shard
    pub fn shard_memory(&self) -> u64 {
        self.total_memory / self.shard_count() as u64
    }

    /// Check that the configuration describes a usable set
    pub fn validate(&self) -> Result<()> {
        if self.bits > MAX_FP_BITS {
            return Err(Error::InvalidBits {
                bits: self.bits,
                max: MAX_FP_BITS,
            });
        }
        if self.shard_memory() == 0 {
            return Err(Error::InvalidConfig(format!(
                "total_memory {} is too small for {} shards",
                self.total_memory,
                self.shard_count()
            )));
        }
        if self.name.is_empty() {
            return Err(Error::InvalidConfig("name must not be empty".into()));
        }
        Ok(())
    }

    /// Load configuration from a JSON file
    pub fn load(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a JSON file
    pub fn save(&self, path: impl AsRef<std::path::Path>) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path.as_ref(), content)?;
        Ok(())
    }
}

impl Default for FpSetConfig {
    fn default() -> Self {
        Self::from_base_dir("./fpstore-data")
    }
}
