//! Partitioned fingerprint set
//!
//! `MultiFpSet` owns `2^bits` shards and a [`ShardRouter`]. Point operations
//! go to exactly one shard; lifecycle operations fan out to every shard in
//! index order. The aggregate holds no lock of its own.

use std::io::Read;
use std::path::Path;
use std::time::Instant;

use fpstore_core::{
    shard_name, Error, Fingerprint, FpSetConfig, Result, ShardBackend, ShardFailure, ShardRouter,
    TraceLog,
};

use crate::disk::DiskFpSet;
use crate::fpset::FpSet;
use crate::mem::MemFpSet;
use crate::metrics;
use crate::recovery::{RecoveryStats, Replayer};

/// Fingerprint set split into independent shards by the top `bits` bits
pub struct MultiFpSet {
    router: ShardRouter,
    shards: Vec<Box<dyn FpSet>>,
}

impl MultiFpSet {
    /// Build `2^bits` shards of `backend`, each budgeted `total_memory / 2^bits`
    pub fn new(bits: u32, total_memory: u64, backend: ShardBackend) -> Result<Self> {
        let router = ShardRouter::new(bits)?;
        let shard_memory = total_memory >> bits;
        let shards = (0..router.shard_count())
            .map(|_| -> Box<dyn FpSet> {
                match backend {
                    ShardBackend::Memory => Box::new(MemFpSet::new()),
                    ShardBackend::Disk => Box::new(DiskFpSet::new(shard_memory)),
                }
            })
            .collect();
        Ok(Self { router, shards })
    }

    /// Compose already-built shards; there must be exactly `2^bits` of them
    pub fn from_shards(bits: u32, shards: Vec<Box<dyn FpSet>>) -> Result<Self> {
        let router = ShardRouter::new(bits)?;
        if shards.len() != router.shard_count() {
            return Err(Error::ShardCountMismatch {
                bits,
                expected: router.shard_count(),
                actual: shards.len(),
            });
        }
        Ok(Self { router, shards })
    }

    /// Build the shards described by `config` without initializing them
    pub fn from_config(config: &FpSetConfig) -> Result<Self> {
        config.validate()?;
        Self::new(config.bits, config.total_memory, config.backend)
    }

    /// Build and initialize a set from `config`
    pub fn open(config: &FpSetConfig) -> Result<Self> {
        let mut set = Self::from_config(config)?;
        set.init(config.concurrency, &config.metadata_dir, &config.name)?;
        Ok(set)
    }

    /// Rebuild the contents by replaying `log` up to its recovery pointer
    pub fn recover<R: Read>(&self, log: &mut TraceLog<R>) -> Result<RecoveryStats> {
        Replayer::new(self).run(log)
    }

    pub fn router(&self) -> &ShardRouter {
        &self.router
    }

    pub fn bits(&self) -> u32 {
        self.router.bits()
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Size of each shard, in index order
    pub fn shard_sizes(&self) -> Vec<u64> {
        self.shards.iter().map(|s| s.size()).collect()
    }

    /// Run `f` on every shard, collecting failures instead of stopping
    fn fan_out<F>(&self, op: &'static str, mut f: F) -> Result<()>
    where
        F: FnMut(usize, &dyn FpSet) -> Result<()>,
    {
        let failures = self
            .shards
            .iter()
            .enumerate()
            .filter_map(|(shard, set)| {
                f(shard, set.as_ref()).err().map(|error| {
                    tracing::warn!(shard, op, error = %error, "Shard operation failed");
                    ShardFailure { shard, error }
                })
            })
            .collect();
        Error::from_failures(op, failures)
    }

    fn publish_sizes(&self) {
        for (shard, size) in self.shard_sizes().into_iter().enumerate() {
            metrics::set_shard_size(shard, size);
        }
    }
}

impl FpSet for MultiFpSet {
    fn init(&mut self, concurrency: usize, metadir: &Path, name: &str) -> Result<()> {
        let mut failures = Vec::new();
        for (shard, set) in self.shards.iter_mut().enumerate() {
            if let Err(error) = set.init(concurrency, metadir, &shard_name(name, shard)) {
                tracing::warn!(shard, op = "init", error = %error, "Shard operation failed");
                failures.push(ShardFailure { shard, error });
            }
        }
        Error::from_failures("init", failures)?;

        tracing::info!(
            shards = self.shards.len(),
            bits = self.router.bits(),
            dir = %metadir.display(),
            name,
            "Fingerprint set initialized"
        );
        Ok(())
    }

    fn put(&self, fp: Fingerprint) -> Result<bool> {
        let shard = self.router.route(fp);
        let seen = self.shards[shard]
            .put(fp)
            .map_err(|e| e.in_shard(shard, "put"))?;
        metrics::record_put(seen);
        Ok(seen)
    }

    fn contains(&self, fp: Fingerprint) -> Result<bool> {
        let shard = self.router.route(fp);
        self.shards[shard]
            .contains(fp)
            .map_err(|e| e.in_shard(shard, "contains"))
    }

    /// Sum of shard sizes; not a consistent snapshot while `put` is running
    fn size(&self) -> u64 {
        self.shards.iter().map(|s| s.size()).sum()
    }

    /// Largest per-shard statistic. This approximates the whole-set value:
    /// gaps that straddle a shard boundary are not considered.
    fn check_fps(&self) -> Result<f64> {
        let mut max = f64::NEG_INFINITY;
        for (shard, set) in self.shards.iter().enumerate() {
            let value = set.check_fps().map_err(|e| e.in_shard(shard, "check_fps"))?;
            max = max.max(value);
        }
        Ok(max)
    }

    fn begin_checkpoint(&self) -> Result<()> {
        let start = Instant::now();
        self.fan_out("begin_checkpoint", |_, set| set.begin_checkpoint())?;
        metrics::record_checkpoint(metrics::PHASE_BEGIN, start.elapsed());
        tracing::info!(elapsed_ms = start.elapsed().as_millis() as u64, "Checkpoint started");
        Ok(())
    }

    fn commit_checkpoint(&self) -> Result<()> {
        let start = Instant::now();
        self.fan_out("commit_checkpoint", |_, set| set.commit_checkpoint())?;
        metrics::record_checkpoint(metrics::PHASE_COMMIT, start.elapsed());
        self.publish_sizes();
        tracing::info!(size = self.size(), "Checkpoint committed");
        Ok(())
    }

    fn begin_checkpoint_named(&self, name: &str) -> Result<()> {
        let start = Instant::now();
        self.fan_out("begin_checkpoint", |shard, set| {
            set.begin_checkpoint_named(&shard_name(name, shard))
        })?;
        metrics::record_checkpoint(metrics::PHASE_BEGIN, start.elapsed());
        tracing::info!(name, "Named checkpoint started");
        Ok(())
    }

    fn commit_checkpoint_named(&self, name: &str) -> Result<()> {
        let start = Instant::now();
        self.fan_out("commit_checkpoint", |shard, set| {
            set.commit_checkpoint_named(&shard_name(name, shard))
        })?;
        metrics::record_checkpoint(metrics::PHASE_COMMIT, start.elapsed());
        self.publish_sizes();
        tracing::info!(name, size = self.size(), "Named checkpoint committed");
        Ok(())
    }

    fn recover_named(&self, name: &str) -> Result<()> {
        self.fan_out("recover_named", |shard, set| {
            set.recover_named(&shard_name(name, shard))
        })?;
        self.publish_sizes();
        tracing::info!(name, size = self.size(), "Restored from named checkpoint");
        Ok(())
    }

    fn prepare_recovery(&self) -> Result<()> {
        self.fan_out("prepare_recovery", |_, set| set.prepare_recovery())
    }

    fn recover_fp(&self, fp: Fingerprint) -> Result<()> {
        let shard = self.router.route(fp);
        self.shards[shard]
            .recover_fp(fp)
            .map_err(|e| e.in_shard(shard, "recover_fp"))
    }

    fn complete_recovery(&self) -> Result<()> {
        self.fan_out("complete_recovery", |_, set| set.complete_recovery())
    }

    fn close(&self) -> Result<()> {
        self.fan_out("close", |_, set| set.close())
    }

    fn exit(&self, cleanup: bool) -> Result<()> {
        let result = self.fan_out("exit", |_, set| set.exit(cleanup));
        tracing::info!(cleanup, ok = result.is_ok(), "Fingerprint set exited");
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    const QUADRANT_FPS: [u64; 4] = [
        0x0000_0000_0000_0001,
        0x4000_0000_0000_0002,
        0x8000_0000_0000_0003,
        0xC000_0000_0000_0004,
    ];

    fn open_set(dir: &Path, bits: u32, backend: ShardBackend) -> MultiFpSet {
        let mut set = MultiFpSet::new(bits, 1 << 20, backend).unwrap();
        set.init(1, dir, "fp").unwrap();
        set
    }

    /// Shard that refuses lifecycle calls
    struct BrokenShard;

    impl FpSet for BrokenShard {
        fn init(&mut self, _: usize, _: &Path, _: &str) -> Result<()> {
            Ok(())
        }
        fn put(&self, _: Fingerprint) -> Result<bool> {
            Err(Error::NotInitialized)
        }
        fn contains(&self, _: Fingerprint) -> Result<bool> {
            Ok(false)
        }
        fn size(&self) -> u64 {
            0
        }
        fn check_fps(&self) -> Result<f64> {
            Ok(0.0)
        }
        fn begin_checkpoint(&self) -> Result<()> {
            Err(Error::NotInitialized)
        }
        fn commit_checkpoint(&self) -> Result<()> {
            Err(Error::NotInitialized)
        }
        fn begin_checkpoint_named(&self, _: &str) -> Result<()> {
            Err(Error::NotInitialized)
        }
        fn commit_checkpoint_named(&self, _: &str) -> Result<()> {
            Err(Error::NotInitialized)
        }
        fn recover_named(&self, _: &str) -> Result<()> {
            Err(Error::NotInitialized)
        }
        fn prepare_recovery(&self) -> Result<()> {
            Ok(())
        }
        fn recover_fp(&self, _: Fingerprint) -> Result<()> {
            Ok(())
        }
        fn complete_recovery(&self) -> Result<()> {
            Ok(())
        }
        fn close(&self) -> Result<()> {
            Err(Error::Closed { name: "broken".into() })
        }
        fn exit(&self, _: bool) -> Result<()> {
            self.close()
        }
    }

    #[test]
    fn test_four_shard_routing() {
        let dir = tempfile::tempdir().unwrap();
        let set = open_set(dir.path(), 2, ShardBackend::Memory);

        for fp in QUADRANT_FPS {
            assert!(!set.put(fp).unwrap());
        }
        assert_eq!(set.shard_sizes(), vec![1, 1, 1, 1]);
        assert_eq!(set.size(), 4);

        assert!(set.put(0x4000_0000_0000_0002).unwrap());
        assert_eq!(set.size(), 4);
        assert!(!set.contains(0x4000_0000_0000_0003).unwrap());
    }

    #[test]
    fn test_zero_bits_single_shard() {
        let dir = tempfile::tempdir().unwrap();
        let set = open_set(dir.path(), 0, ShardBackend::Disk);
        assert_eq!(set.shard_count(), 1);

        for fp in QUADRANT_FPS {
            set.put(fp).unwrap();
        }
        assert_eq!(set.shard_sizes(), vec![4]);
    }

    #[test]
    fn test_from_shards_count_checked() {
        let shards: Vec<Box<dyn FpSet>> = vec![Box::new(MemFpSet::new())];
        let err = MultiFpSet::from_shards(1, shards).err().unwrap();
        assert!(matches!(
            err,
            Error::ShardCountMismatch { expected: 2, actual: 1, .. }
        ));
    }

    #[test]
    fn test_invalid_bits() {
        let err = MultiFpSet::new(31, 1 << 20, ShardBackend::Memory).err().unwrap();
        assert!(matches!(err, Error::InvalidBits { bits: 31, .. }));
    }

    #[test]
    fn test_shard_files_named_by_index() {
        let dir = tempfile::tempdir().unwrap();
        let set = open_set(dir.path(), 1, ShardBackend::Disk);
        set.put(1).unwrap();
        set.put(u64::MAX).unwrap();

        set.begin_checkpoint().unwrap();
        set.commit_checkpoint().unwrap();
        assert!(dir.path().join("fp_0.fp.chkpt").exists());
        assert!(dir.path().join("fp_1.fp.chkpt").exists());

        set.begin_checkpoint_named("snap").unwrap();
        set.commit_checkpoint_named("snap").unwrap();
        assert!(dir.path().join("snap_0.fp.chkpt").exists());
        assert!(dir.path().join("snap_1.fp.chkpt").exists());
    }

    #[test]
    fn test_named_checkpoint_restore() {
        let dir = tempfile::tempdir().unwrap();
        let set = open_set(dir.path(), 2, ShardBackend::Memory);
        for fp in QUADRANT_FPS {
            set.put(fp).unwrap();
        }
        set.begin_checkpoint_named("snap").unwrap();
        set.commit_checkpoint_named("snap").unwrap();

        set.put(0x4000_0000_0000_00FF).unwrap();
        set.recover_named("snap").unwrap();

        assert_eq!(set.size(), 4);
        assert!(!set.contains(0x4000_0000_0000_00FF).unwrap());
        for fp in QUADRANT_FPS {
            assert!(set.contains(fp).unwrap());
        }
    }

    #[test]
    fn test_check_fps_is_max_over_shards() {
        let dir = tempfile::tempdir().unwrap();
        let set = open_set(dir.path(), 1, ShardBackend::Memory);
        set.put(10).unwrap();
        set.put(14).unwrap();
        set.put(0x8000_0000_0000_0000).unwrap();
        set.put(0x8000_0000_0000_0002).unwrap();
        assert_eq!(set.check_fps().unwrap(), 0.5);
    }

    #[test]
    fn test_point_errors_carry_shard() {
        let shards: Vec<Box<dyn FpSet>> =
            vec![Box::new(MemFpSet::new()), Box::new(BrokenShard)];
        let set = MultiFpSet::from_shards(1, shards).unwrap();

        assert!(!set.put(1).unwrap());
        let err = set.put(u64::MAX).unwrap_err();
        assert!(matches!(err, Error::Shard { shard: 1, op: "put", .. }));
    }

    #[test]
    fn test_fan_out_continues_past_failures() {
        let dir = tempfile::tempdir().unwrap();
        let shards: Vec<Box<dyn FpSet>> = vec![
            Box::new(BrokenShard),
            Box::new(MemFpSet::new()),
            Box::new(BrokenShard),
            Box::new(MemFpSet::new()),
        ];
        let mut set = MultiFpSet::from_shards(2, shards).unwrap();
        set.init(1, dir.path(), "fp").unwrap();
        set.put(0x4000_0000_0000_0001).unwrap();

        let err = set.begin_checkpoint().unwrap_err();
        match err {
            Error::FanOut { op, failures } => {
                assert_eq!(op, "begin_checkpoint");
                let shards: Vec<_> = failures.iter().map(|f| f.shard).collect();
                assert_eq!(shards, vec![0, 2]);
            }
            other => panic!("unexpected error: {other}"),
        }
        // healthy shards still wrote their checkpoints
        assert!(dir.path().join("fp_1.fp.tmp").exists());
        assert!(dir.path().join("fp_3.fp.tmp").exists());

        assert!(matches!(set.close(), Err(Error::FanOut { .. })));
        assert!(matches!(
            set.contains(0x4000_0000_0000_0001),
            Err(Error::Shard { shard: 1, .. })
        ));
    }

    #[test]
    fn test_concurrent_put_reports_new_once() {
        let dir = tempfile::tempdir().unwrap();
        let set = Arc::new(open_set(dir.path(), 2, ShardBackend::Disk));

        let handles: Vec<_> = (0..8u64)
            .map(|t| {
                let set = set.clone();
                std::thread::spawn(move || {
                    let mut fresh = 0;
                    for i in 0..500u64 {
                        // every thread walks the same values from a different start
                        let fp = ((i + t * 61) % 500).wrapping_mul(0x9E37_79B9_7F4A_7C15);
                        if !set.put(fp).unwrap() {
                            fresh += 1;
                        }
                    }
                    fresh
                })
            })
            .collect();
        let fresh: u64 = handles.into_iter().map(|h| h.join().unwrap()).sum();

        assert_eq!(fresh, 500);
        assert_eq!(set.size(), 500);
    }

    #[test]
    fn test_exit_cleanup_removes_shard_files() {
        let dir = tempfile::tempdir().unwrap();
        let set = open_set(dir.path(), 1, ShardBackend::Disk);
        set.put(5).unwrap();
        set.begin_checkpoint().unwrap();
        set.commit_checkpoint().unwrap();

        set.exit(true).unwrap();
        assert!(!dir.path().join("fp_0.fp").exists());
        assert!(!dir.path().join("fp_0.fp.chkpt").exists());
    }
}
