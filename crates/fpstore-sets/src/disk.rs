//! Disk-backed fingerprint set
//!
//! New fingerprints collect in an in-memory buffer sized from the shard's
//! memory budget. When the buffer fills it is merged with the on-disk sorted
//! run into a new run file, which replaces the old one by rename. Lookups
//! check the buffer first, then binary search the memory-mapped run.
//!
//! The run file is never modified in place, so a mapped run stays valid until
//! it is dropped. Checkpoints are copies of the run taken right after a flush.

use std::collections::HashSet;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

use memmap2::Mmap;

use fpstore_core::run_format::{entry_at, run_contains, RunHeader};
use fpstore_core::{Error, Fingerprint, Result};

use crate::files::{remove_if_exists, sync_dir, ShardFiles};
use crate::fpset::{min_gap_statistic, FpSet};
use crate::metrics;

/// Approximate memory cost of one buffered fingerprint in a hash set
pub const BUFFERED_FP_BYTES: u64 = 16;

/// Immutable sorted run mapped from disk
struct SortedRun {
    map: Mmap,
    len: usize,
}

impl SortedRun {
    /// Map the run at `path`, or `None` if there is no such file
    fn open(path: &Path) -> Result<Option<Self>> {
        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        // SAFETY: run files belong to this shard and are only ever replaced by
        // rename, never truncated or rewritten while mapped.
        let map = unsafe { Mmap::map(&file)? };
        let header = RunHeader::validate(&map).map_err(|source| Error::RunFormat {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Some(Self {
            map,
            len: header.entry_count as usize,
        }))
    }

    fn contains(&self, fp: Fingerprint) -> bool {
        run_contains(&self.map, self.len, fp)
    }

    fn iter(&self) -> impl Iterator<Item = Fingerprint> + '_ {
        (0..self.len).map(move |i| entry_at(&self.map, i))
    }
}

/// Merge a run with sorted, disjoint buffered fingerprints into a new run file
fn write_merged(path: &Path, run: Option<&SortedRun>, buffer: &[Fingerprint]) -> Result<u64> {
    let total = (run.map_or(0, |r| r.len) + buffer.len()) as u64;
    let mut writer = BufWriter::new(File::create(path)?);
    writer.write_all(&RunHeader::new(total).to_bytes())?;

    let mut old = run.into_iter().flat_map(|r| r.iter()).peekable();
    let mut new = buffer.iter().copied().peekable();
    loop {
        let next = match (old.peek().copied(), new.peek().copied()) {
            (Some(a), Some(b)) if a < b => old.next(),
            (_, Some(_)) => new.next(),
            (Some(_), None) => old.next(),
            (None, None) => break,
        };
        if let Some(fp) = next {
            writer.write_all(&fp.to_le_bytes())?;
        }
    }

    let file = writer.into_inner().map_err(|e| e.into_error())?;
    file.sync_all()?;
    Ok(total)
}

/// Map the run written at `staged` and move it over the live data file
///
/// The caller's current run is left untouched when this fails, and the staged
/// file is removed.
fn install_run(files: &ShardFiles, staged: &Path) -> Result<SortedRun> {
    let installed = SortedRun::open(staged)
        .and_then(|run| run.ok_or(Error::CheckpointMissing { path: staged.to_path_buf() }))
        .and_then(|run| {
            std::fs::rename(staged, files.data())?;
            sync_dir(files.dir())?;
            Ok(run)
        });
    if installed.is_err() {
        let _ = remove_if_exists(staged);
    }
    installed
}

struct DiskState {
    files: Option<ShardFiles>,
    buffer: HashSet<Fingerprint>,
    run: Option<SortedRun>,
    closed: bool,
}

impl DiskState {
    fn ensure_open(&self) -> Result<&ShardFiles> {
        let files = self.files.as_ref().ok_or(Error::NotInitialized)?;
        if self.closed {
            return Err(Error::Closed {
                name: files.name().to_string(),
            });
        }
        Ok(files)
    }

    fn contains(&self, fp: Fingerprint) -> bool {
        self.buffer.contains(&fp) || self.run.as_ref().is_some_and(|r| r.contains(fp))
    }

    fn size(&self) -> u64 {
        (self.buffer.len() + self.run.as_ref().map_or(0, |r| r.len)) as u64
    }

    /// Move the buffer into a new run file
    fn flush(&mut self) -> Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let files = self.ensure_open()?.clone();
        let start = Instant::now();

        let mut buffered: Vec<_> = self.buffer.iter().copied().collect();
        buffered.sort_unstable();

        let merge_path = files.merge_tmp();
        let total = write_merged(&merge_path, self.run.as_ref(), &buffered)?;
        self.run = Some(install_run(&files, &merge_path)?);
        self.buffer.clear();

        metrics::record_flush(buffered.len() as u64, start.elapsed());
        tracing::debug!(
            shard = files.name(),
            flushed = buffered.len(),
            total,
            "Flushed fingerprint buffer to disk"
        );
        Ok(())
    }

    /// Drop all contents, in memory and on disk
    fn reset(&mut self) -> Result<()> {
        let files = self.ensure_open()?.clone();
        self.buffer.clear();
        self.run = None;
        remove_if_exists(&files.data())?;
        remove_if_exists(&files.merge_tmp())
    }
}

/// Fingerprint set with a bounded memory buffer over a sorted run on disk
pub struct DiskFpSet {
    capacity: usize,
    state: RwLock<DiskState>,
}

impl DiskFpSet {
    /// Create a set that buffers up to `memory / BUFFERED_FP_BYTES` fingerprints
    pub fn new(memory: u64) -> Self {
        Self::with_capacity((memory / BUFFERED_FP_BYTES).max(1) as usize)
    }

    /// Create a set that flushes after `capacity` buffered fingerprints
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            state: RwLock::new(DiskState {
                files: None,
                buffer: HashSet::with_capacity(capacity.min(1 << 16)),
                run: None,
                closed: false,
            }),
        }
    }

    /// Maximum number of fingerprints held in memory
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Fingerprints currently buffered in memory
    pub fn buffered(&self) -> usize {
        self.read().buffer.len()
    }

    fn read(&self) -> RwLockReadGuard<'_, DiskState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, DiskState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn insert(&self, state: &mut DiskState, fp: Fingerprint) -> Result<()> {
        state.buffer.insert(fp);
        if state.buffer.len() >= self.capacity {
            state.flush()?;
        }
        Ok(())
    }
}

impl FpSet for DiskFpSet {
    fn init(&mut self, concurrency: usize, metadir: &Path, name: &str) -> Result<()> {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(files) = &state.files {
            return Err(Error::AlreadyInitialized {
                name: files.name().to_string(),
            });
        }
        std::fs::create_dir_all(metadir)?;
        let files = ShardFiles::new(metadir, name);
        remove_if_exists(&files.data())?;
        remove_if_exists(&files.merge_tmp())?;

        tracing::debug!(
            shard = name,
            dir = %metadir.display(),
            capacity = self.capacity,
            concurrency,
            "Disk shard initialized"
        );
        state.files = Some(files);
        Ok(())
    }

    fn put(&self, fp: Fingerprint) -> Result<bool> {
        let mut state = self.write();
        state.ensure_open()?;
        if state.contains(fp) {
            return Ok(true);
        }
        self.insert(&mut state, fp)?;
        Ok(false)
    }

    fn contains(&self, fp: Fingerprint) -> Result<bool> {
        let state = self.read();
        state.ensure_open()?;
        Ok(state.contains(fp))
    }

    fn size(&self) -> u64 {
        self.read().size()
    }

    fn check_fps(&self) -> Result<f64> {
        let mut state = self.write();
        state.flush()?;
        state.ensure_open()?;
        Ok(state.run.as_ref().map_or(0.0, |r| min_gap_statistic(r.iter())))
    }

    fn begin_checkpoint(&self) -> Result<()> {
        let name = self.read().ensure_open()?.name().to_string();
        self.begin_checkpoint_named(&name)
    }

    fn commit_checkpoint(&self) -> Result<()> {
        let name = self.read().ensure_open()?.name().to_string();
        self.commit_checkpoint_named(&name)
    }

    fn begin_checkpoint_named(&self, name: &str) -> Result<()> {
        let mut state = self.write();
        state.flush()?;
        let files = state.ensure_open()?;
        let tmp = files.checkpoint_tmp(name);

        if state.run.is_some() {
            std::fs::copy(files.data(), &tmp)?;
            File::open(&tmp)?.sync_all()?;
        } else {
            write_merged(&tmp, None, &[])?;
        }

        tracing::debug!(
            shard = files.name(),
            path = %tmp.display(),
            entries = state.size(),
            "Disk shard checkpoint written"
        );
        Ok(())
    }

    fn commit_checkpoint_named(&self, name: &str) -> Result<()> {
        let state = self.read();
        state.ensure_open()?.commit(name)?;
        Ok(())
    }

    fn recover_named(&self, name: &str) -> Result<()> {
        let mut state = self.write();
        let files = state.ensure_open()?.clone();
        let checkpoint = files.checkpoint(name);
        if !checkpoint.exists() {
            return Err(Error::CheckpointMissing { path: checkpoint });
        }
        // validate before touching the live data
        SortedRun::open(&checkpoint)?;

        let merge_path = files.merge_tmp();
        if let Err(e) = std::fs::copy(&checkpoint, &merge_path) {
            let _ = remove_if_exists(&merge_path);
            return Err(e.into());
        }
        let run = install_run(&files, &merge_path)?;
        state.run = Some(run);
        state.buffer.clear();

        tracing::info!(
            shard = files.name(),
            checkpoint = %checkpoint.display(),
            entries = state.size(),
            "Disk shard restored from checkpoint"
        );
        Ok(())
    }

    fn prepare_recovery(&self) -> Result<()> {
        self.write().reset()
    }

    fn recover_fp(&self, fp: Fingerprint) -> Result<()> {
        let mut state = self.write();
        state.ensure_open()?;
        if state.contains(fp) {
            return Err(Error::AlreadyPresent { fp });
        }
        self.insert(&mut state, fp)
    }

    fn complete_recovery(&self) -> Result<()> {
        self.write().flush()
    }

    fn close(&self) -> Result<()> {
        let mut state = self.write();
        if state.closed {
            return Ok(());
        }
        let flushed = state.flush();
        state.closed = true;
        state.run = None;
        state.buffer = HashSet::new();
        flushed
    }

    fn exit(&self, cleanup: bool) -> Result<()> {
        let closed = self.close();
        if cleanup {
            if let Some(files) = &self.read().files {
                files.remove_all()?;
            }
        }
        closed
    }
}
