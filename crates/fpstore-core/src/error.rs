//! Error types for fpstore

use std::path::PathBuf;

use thiserror::Error;

use crate::run_format::RunFormatError;
use crate::Fingerprint;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Snapshot encoding error: {0}")]
    Snapshot(String),

    #[error("Invalid fingerprint bits: {bits} > {max}")]
    InvalidBits { bits: u32, max: u32 },

    #[error("Shard count mismatch: {bits} bits needs {expected} shards, got {actual}")]
    ShardCountMismatch {
        bits: u32,
        expected: usize,
        actual: usize,
    },

    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Fingerprint set {name} is already initialized")]
    AlreadyInitialized { name: String },

    #[error("Fingerprint set is not initialized")]
    NotInitialized,

    #[error("Fingerprint set {name} is closed")]
    Closed { name: String },

    #[error("Fingerprint {fp:#018x} already present during recovery")]
    AlreadyPresent { fp: Fingerprint },

    #[error("Checkpoint not found: {}", .path.display())]
    CheckpointMissing { path: PathBuf },

    #[error("Run file {}: {source}", .path.display())]
    RunFormat {
        path: PathBuf,
        source: RunFormatError,
    },

    #[error("Trace log ends at offset {offset} before recovery pointer {recover_ptr}")]
    TraceTruncated { offset: u64, recover_ptr: u64 },

    #[error("Recovery cannot start from phase {phase}")]
    RecoveryPhase { phase: String },

    #[error("Shard {shard} failed in {op}: {source}")]
    Shard {
        shard: usize,
        op: &'static str,
        #[source]
        source: Box<Error>,
    },

    #[error("{op} failed on {} shards: {}", .failures.len(), summarize(.failures))]
    FanOut {
        op: &'static str,
        failures: Vec<ShardFailure>,
    },
}

/// One shard's failure inside a fan-out operation
#[derive(Debug)]
pub struct ShardFailure {
    pub shard: usize,
    pub error: Error,
}

fn summarize(failures: &[ShardFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("[{}] {}", f.shard, f.error))
        .collect::<Vec<_>>()
        .join("; ")
}

impl Error {
    /// Attach shard index and operation to an error raised by a shard
    pub fn in_shard(self, shard: usize, op: &'static str) -> Self {
        Error::Shard {
            shard,
            op,
            source: Box::new(self),
        }
    }

    /// Collapse the failures of a fan-out into a single result
    ///
    /// No failures is `Ok`, a single failure keeps its shard context and
    /// anything more is reported as `FanOut`.
    pub fn from_failures(
        op: &'static str,
        mut failures: Vec<ShardFailure>,
    ) -> crate::Result<()> {
        match failures.len() {
            0 => Ok(()),
            1 => {
                let ShardFailure { shard, error } = failures.remove(0);
                Err(error.in_shard(shard, op))
            }
            _ => Err(Error::FanOut { op, failures }),
        }
    }

    /// True if the trace log and the shards disagree about what was seen
    pub fn is_consistency_violation(&self) -> bool {
        match self {
            Error::AlreadyPresent { .. } => true,
            Error::Shard { source, .. } => source.is_consistency_violation(),
            Error::FanOut { failures, .. } => {
                failures.iter().any(|f| f.error.is_consistency_violation())
            }
            _ => false,
        }
    }
}
