//! File naming shared by the shard backends

use std::io;
use std::path::{Path, PathBuf};

use fpstore_core::{Error, Result};

/// Location of one shard's files
#[derive(Debug, Clone)]
pub struct ShardFiles {
    dir: PathBuf,
    name: String,
}

impl ShardFiles {
    pub fn new(dir: &Path, name: &str) -> Self {
        Self {
            dir: dir.to_path_buf(),
            name: name.to_string(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Live data file: `<name>.fp`
    pub fn data(&self) -> PathBuf {
        self.dir.join(format!("{}.fp", self.name))
    }

    /// Scratch file used while rewriting the data file
    pub fn merge_tmp(&self) -> PathBuf {
        self.dir.join(format!("{}.fp.merge", self.name))
    }

    /// Checkpoint in progress for `stem`
    pub fn checkpoint_tmp(&self, stem: &str) -> PathBuf {
        self.dir.join(format!("{}.fp.tmp", stem))
    }

    /// Committed checkpoint for `stem`
    pub fn checkpoint(&self, stem: &str) -> PathBuf {
        self.dir.join(format!("{}.fp.chkpt", stem))
    }

    /// Atomically promote the checkpoint begun for `stem`
    pub fn commit(&self, stem: &str) -> Result<PathBuf> {
        let tmp = self.checkpoint_tmp(stem);
        let committed = self.checkpoint(stem);
        std::fs::rename(&tmp, &committed).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => Error::CheckpointMissing { path: tmp.clone() },
            _ => Error::Io(e),
        })?;
        sync_dir(&self.dir)?;
        Ok(committed)
    }

    /// Delete the data file and the default checkpoint files
    pub fn remove_all(&self) -> Result<()> {
        for path in [
            self.data(),
            self.merge_tmp(),
            self.checkpoint_tmp(&self.name),
            self.checkpoint(&self.name),
        ] {
            remove_if_exists(&path)?;
        }
        Ok(())
    }
}

pub fn remove_if_exists(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Persist renames inside `dir`
#[cfg(unix)]
pub fn sync_dir(dir: &Path) -> Result<()> {
    std::fs::File::open(dir)?.sync_all()?;
    Ok(())
}

#[cfg(not(unix))]
pub fn sync_dir(_dir: &Path) -> Result<()> {
    Ok(())
}
