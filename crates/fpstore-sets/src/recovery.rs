//! Rebuilding a fingerprint set from the trace log
//!
//! After a crash the shards are reset and every fingerprint recorded in the
//! trace log before the recovery pointer is inserted again. A fingerprint that
//! shows up twice means the log and the set disagree, and replay stops there.

use std::fmt;
use std::io::Read;
use std::time::Instant;

use fpstore_core::{Error, Result, TraceLog};

use crate::fpset::FpSet;
use crate::metrics;
use crate::multi::MultiFpSet;

/// Records between progress log lines
const PROGRESS_INTERVAL: u64 = 1 << 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryPhase {
    NotStarted,
    Preparing,
    Replaying,
    Completed,
}

impl fmt::Display for RecoveryPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecoveryPhase::NotStarted => write!(f, "not-started"),
            RecoveryPhase::Preparing => write!(f, "preparing"),
            RecoveryPhase::Replaying => write!(f, "replaying"),
            RecoveryPhase::Completed => write!(f, "completed"),
        }
    }
}

/// Outcome of a successful replay
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryStats {
    /// Fingerprints inserted
    pub replayed: u64,
    /// Trace bytes consumed
    pub bytes_read: u64,
    /// Fingerprints inserted per shard, in index order
    pub per_shard: Vec<u64>,
}

/// One-shot replay of a trace log into a `MultiFpSet`
pub struct Replayer<'a> {
    set: &'a MultiFpSet,
    phase: RecoveryPhase,
}

impl<'a> Replayer<'a> {
    pub fn new(set: &'a MultiFpSet) -> Self {
        Self {
            set,
            phase: RecoveryPhase::NotStarted,
        }
    }

    pub fn phase(&self) -> RecoveryPhase {
        self.phase
    }

    /// Reset every shard, replay `log` up to its recovery pointer, then
    /// finalize every shard
    pub fn run<R: Read>(&mut self, log: &mut TraceLog<R>) -> Result<RecoveryStats> {
        if self.phase != RecoveryPhase::NotStarted {
            return Err(Error::RecoveryPhase {
                phase: self.phase.to_string(),
            });
        }
        let start = Instant::now();
        let router = self.set.router();
        let start_offset = log.position();
        tracing::info!(
            shards = self.set.shard_count(),
            recover_ptr = log.recover_ptr(),
            "Starting recovery from trace log"
        );

        self.phase = RecoveryPhase::Preparing;
        self.set.prepare_recovery()?;

        self.phase = RecoveryPhase::Replaying;
        let mut stats = RecoveryStats {
            per_shard: vec![0; self.set.shard_count()],
            ..Default::default()
        };
        while let Some(record) = log.next_record()? {
            let fp = record.fingerprint;
            if let Err(e) = self.set.recover_fp(fp) {
                if e.is_consistency_violation() {
                    tracing::error!(
                        fp = format_args!("{fp:#018x}"),
                        offset = log.position(),
                        "Trace log repeats a fingerprint; set and log disagree"
                    );
                }
                return Err(e);
            }
            stats.replayed += 1;
            stats.per_shard[router.route(fp)] += 1;

            if stats.replayed % PROGRESS_INTERVAL == 0 {
                tracing::debug!(
                    replayed = stats.replayed,
                    offset = log.position(),
                    "Recovery progress"
                );
            }
        }
        stats.bytes_read = log.position() - start_offset;

        self.set.complete_recovery()?;
        self.phase = RecoveryPhase::Completed;

        let elapsed = start.elapsed();
        metrics::record_recovery(stats.replayed, elapsed);
        for (shard, size) in self.set.shard_sizes().into_iter().enumerate() {
            metrics::set_shard_size(shard, size);
        }
        tracing::info!(
            replayed = stats.replayed,
            bytes = stats.bytes_read,
            elapsed_ms = elapsed.as_millis() as u64,
            "Recovery complete"
        );
        Ok(stats)
    }
}
