//! Metrics for the fingerprint set
//!
//! Only shard indices and outcomes are used as labels, never fingerprints.
//! Nothing is recorded unless the embedding process installs a recorder.

use metrics::{counter, gauge, histogram};
use std::time::Duration;

pub const OUTCOME_SEEN: &str = "seen";
pub const OUTCOME_NEW: &str = "new";

pub const PHASE_BEGIN: &str = "begin";
pub const PHASE_COMMIT: &str = "commit";

pub fn record_put(seen: bool) {
    let outcome = if seen { OUTCOME_SEEN } else { OUTCOME_NEW };
    counter!("fpset_put_total", "outcome" => outcome).increment(1);
}

pub fn record_checkpoint(phase: &'static str, duration: Duration) {
    counter!("fpset_checkpoint_total", "phase" => phase).increment(1);
    histogram!("fpset_checkpoint_duration_seconds", "phase" => phase)
        .record(duration.as_secs_f64());
}

pub fn record_recovery(replayed: u64, duration: Duration) {
    counter!("fpset_recovered_fingerprints_total").increment(replayed);
    histogram!("fpset_recovery_duration_seconds").record(duration.as_secs_f64());
}

pub fn record_flush(entries: u64, duration: Duration) {
    counter!("fpset_disk_flush_total").increment(1);
    histogram!("fpset_disk_flush_entries").record(entries as f64);
    histogram!("fpset_disk_flush_duration_seconds").record(duration.as_secs_f64());
}

pub fn set_shard_size(shard: usize, size: u64) {
    gauge!("fpset_shard_size", "shard" => shard.to_string()).set(size as f64);
}
