//! The capability contract every shard implements

use std::path::Path;

use fpstore_core::{Fingerprint, Result};

/// A set of 64-bit fingerprints with checkpoint and recovery support
///
/// Implementations synchronise internally: `put` and `contains` may be called
/// from many threads at once, and concurrent `put` calls for the same
/// fingerprint must not both report it absent. Checkpoint and recovery
/// methods are only called while no `put`/`contains` traffic is running.
pub trait FpSet: Send + Sync {
    /// Prepare on-disk storage under `metadir` using `name` as the file stem.
    ///
    /// May be called at most once.
    fn init(&mut self, concurrency: usize, metadir: &Path, name: &str) -> Result<()>;

    /// Returns true iff `fp` was already present; inserts it otherwise.
    fn put(&self, fp: Fingerprint) -> Result<bool>;

    /// Returns true iff `fp` is present.
    fn contains(&self, fp: Fingerprint) -> Result<bool>;

    /// Number of distinct fingerprints held.
    fn size(&self) -> u64;

    /// Diagnostic self-check statistic.
    fn check_fps(&self) -> Result<f64>;

    /// Start a checkpoint under the set's own name.
    fn begin_checkpoint(&self) -> Result<()>;

    /// Make the checkpoint started by `begin_checkpoint` durable.
    fn commit_checkpoint(&self) -> Result<()>;

    /// Start a checkpoint under an explicit file stem.
    fn begin_checkpoint_named(&self, name: &str) -> Result<()>;

    /// Make a named checkpoint durable.
    fn commit_checkpoint_named(&self, name: &str) -> Result<()>;

    /// Replace the contents with those of a committed named checkpoint.
    fn recover_named(&self, name: &str) -> Result<()>;

    /// Reset to an empty set ready for `recover_fp`.
    fn prepare_recovery(&self) -> Result<()>;

    /// Insert a fingerprint read back from the trace log.
    ///
    /// Fails with `Error::AlreadyPresent` if `fp` is already held.
    fn recover_fp(&self, fp: Fingerprint) -> Result<()>;

    /// Finish a replay started by `prepare_recovery`.
    fn complete_recovery(&self) -> Result<()>;

    /// Release resources. Later operations fail with `Error::Closed`.
    fn close(&self) -> Result<()>;

    /// Close, and delete on-disk artifacts when `cleanup` is set.
    fn exit(&self, cleanup: bool) -> Result<()>;
}

/// Collision indicator over fingerprints in ascending order
///
/// Returns `1 / d` for the smallest gap `d` between neighbours, or 0 when
/// fewer than two fingerprints are given.
pub(crate) fn min_gap_statistic<I>(sorted: I) -> f64
where
    I: IntoIterator<Item = Fingerprint>,
{
    let mut iter = sorted.into_iter();
    let Some(mut prev) = iter.next() else {
        return 0.0;
    };
    let mut min_gap: Option<u64> = None;
    for fp in iter {
        let gap = fp - prev;
        min_gap = Some(min_gap.map_or(gap, |m| m.min(gap)));
        prev = fp;
    }
    min_gap.map_or(0.0, |gap| 1.0 / gap as f64)
}
