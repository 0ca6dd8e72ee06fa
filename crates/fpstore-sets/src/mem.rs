//! In-memory fingerprint set
//!
//! Holds every fingerprint in a hash set; the memory budget is not enforced.
//! Checkpoints are bincode snapshots of the sorted fingerprints.

use std::collections::HashSet;
use std::io::Write;
use std::path::Path;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};

use fpstore_core::{Error, Fingerprint, Result};

use crate::files::ShardFiles;
use crate::fpset::{min_gap_statistic, FpSet};

const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct MemSnapshot {
    version: u32,
    fingerprints: Vec<Fingerprint>,
}

#[derive(Default)]
struct MemState {
    files: Option<ShardFiles>,
    fps: HashSet<Fingerprint>,
    closed: bool,
}

impl MemState {
    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            let name = self.files.as_ref().map(|f| f.name().to_string()).unwrap_or_default();
            return Err(Error::Closed { name });
        }
        Ok(())
    }

    fn files(&self) -> Result<&ShardFiles> {
        self.ensure_open()?;
        self.files.as_ref().ok_or(Error::NotInitialized)
    }

    fn sorted(&self) -> Vec<Fingerprint> {
        let mut fps: Vec<_> = self.fps.iter().copied().collect();
        fps.sort_unstable();
        fps
    }
}

/// Fingerprint set kept entirely in memory
#[derive(Default)]
pub struct MemFpSet {
    state: RwLock<MemState>,
}

impl MemFpSet {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, MemState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, MemState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl FpSet for MemFpSet {
    fn init(&mut self, _concurrency: usize, metadir: &Path, name: &str) -> Result<()> {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(files) = &state.files {
            return Err(Error::AlreadyInitialized {
                name: files.name().to_string(),
            });
        }
        std::fs::create_dir_all(metadir)?;
        state.files = Some(ShardFiles::new(metadir, name));
        Ok(())
    }

    fn put(&self, fp: Fingerprint) -> Result<bool> {
        let mut state = self.write();
        state.ensure_open()?;
        Ok(!state.fps.insert(fp))
    }

    fn contains(&self, fp: Fingerprint) -> Result<bool> {
        let state = self.read();
        state.ensure_open()?;
        Ok(state.fps.contains(&fp))
    }

    fn size(&self) -> u64 {
        self.read().fps.len() as u64
    }

    fn check_fps(&self) -> Result<f64> {
        let state = self.read();
        state.ensure_open()?;
        Ok(min_gap_statistic(state.sorted()))
    }

    fn begin_checkpoint(&self) -> Result<()> {
        let name = self.read().files()?.name().to_string();
        self.begin_checkpoint_named(&name)
    }

    fn commit_checkpoint(&self) -> Result<()> {
        let name = self.read().files()?.name().to_string();
        self.commit_checkpoint_named(&name)
    }

    fn begin_checkpoint_named(&self, name: &str) -> Result<()> {
        let state = self.read();
        let tmp = state.files()?.checkpoint_tmp(name);
        let snapshot = MemSnapshot {
            version: SNAPSHOT_VERSION,
            fingerprints: state.sorted(),
        };
        drop(state);

        let data = bincode::serialize(&snapshot).map_err(|e| Error::Snapshot(e.to_string()))?;
        let mut file = std::fs::File::create(&tmp)?;
        file.write_all(&data)?;
        file.sync_all()?;

        tracing::debug!(
            path = %tmp.display(),
            entries = snapshot.fingerprints.len(),
            "Memory shard checkpoint written"
        );
        Ok(())
    }

    fn commit_checkpoint_named(&self, name: &str) -> Result<()> {
        let state = self.read();
        state.files()?.commit(name)?;
        Ok(())
    }

    fn recover_named(&self, name: &str) -> Result<()> {
        let mut state = self.write();
        let path = state.files()?.checkpoint(name);
        let data = std::fs::read(&path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => Error::CheckpointMissing { path: path.clone() },
            _ => Error::Io(e),
        })?;
        let snapshot: MemSnapshot =
            bincode::deserialize(&data).map_err(|e| Error::Snapshot(e.to_string()))?;
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(Error::Snapshot(format!(
                "{}: unsupported snapshot version {}",
                path.display(),
                snapshot.version
            )));
        }
        state.fps = snapshot.fingerprints.into_iter().collect();
        Ok(())
    }

    fn prepare_recovery(&self) -> Result<()> {
        let mut state = self.write();
        state.ensure_open()?;
        state.fps.clear();
        Ok(())
    }

    fn recover_fp(&self, fp: Fingerprint) -> Result<()> {
        let mut state = self.write();
        state.ensure_open()?;
        if !state.fps.insert(fp) {
            return Err(Error::AlreadyPresent { fp });
        }
        Ok(())
    }

    fn complete_recovery(&self) -> Result<()> {
        self.read().ensure_open()
    }

    fn close(&self) -> Result<()> {
        let mut state = self.write();
        state.closed = true;
        state.fps = HashSet::new();
        Ok(())
    }

    fn exit(&self, cleanup: bool) -> Result<()> {
        self.close()?;
        let state = self.read();
        if let (true, Some(files)) = (cleanup, &state.files) {
            files.remove_all()?;
        }
        Ok(())
    }
}
