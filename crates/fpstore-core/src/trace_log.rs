//! Read-only access to the exploration trace log during recovery
//!
//! The trace log itself is written by the exploration engine. Next to it the
//! engine keeps `<trace>.chkpt`, holding the recovery pointer: the byte offset
//! up to which the log was covered by the last committed checkpoint.

use std::fs::File;
use std::io::{self, BufReader, Cursor, Read, Write};
use std::path::{Path, PathBuf};

use crate::trace_format::TraceRecord;
use crate::{Error, Result};

/// Path of the recovery pointer file belonging to a trace log
pub fn recover_ptr_path(trace: &Path) -> PathBuf {
    let mut name = trace.as_os_str().to_owned();
    name.push(".chkpt");
    PathBuf::from(name)
}

/// Read the recovery pointer stored next to `trace`
pub fn read_recover_ptr(trace: &Path) -> Result<u64> {
    let path = recover_ptr_path(trace);
    let data = std::fs::read(&path).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => Error::CheckpointMissing { path: path.clone() },
        _ => Error::Io(e),
    })?;
    if data.len() != 8 {
        return Err(Error::Io(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("{}: expected 8 bytes, got {}", path.display(), data.len()),
        )));
    }
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&data);
    Ok(u64::from_be_bytes(buf))
}

/// Durably record `ptr` as the recovery pointer of `trace`
///
/// Writes a temporary file and renames it over the pointer file.
pub fn write_recover_ptr(trace: &Path, ptr: u64) -> Result<()> {
    let path = recover_ptr_path(trace);
    let mut tmp = path.clone().into_os_string();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    {
        let mut file = File::create(&tmp)?;
        file.write_all(&ptr.to_be_bytes())?;
        file.sync_all()?;
    }
    std::fs::rename(&tmp, &path)?;
    Ok(())
}

/// Sequential reader over a trace log, bounded by a recovery pointer
pub struct TraceLog<R> {
    reader: R,
    position: u64,
    recover_ptr: u64,
}

impl TraceLog<BufReader<File>> {
    /// Open a trace log file together with its recovery pointer file
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let recover_ptr = read_recover_ptr(path)?;
        Self::open_with_ptr(path, recover_ptr)
    }

    /// Open a trace log file with an explicit recovery pointer
    pub fn open_with_ptr(path: impl AsRef<Path>, recover_ptr: u64) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        Ok(Self::new(BufReader::new(file), recover_ptr))
    }
}

impl TraceLog<Cursor<Vec<u8>>> {
    /// In-memory trace log
    pub fn from_bytes(data: Vec<u8>, recover_ptr: u64) -> Self {
        Self::new(Cursor::new(data), recover_ptr)
    }

    /// Encode `records` into an in-memory log whose pointer covers all of them
    ///
    /// Fails if a record cannot be encoded, e.g. a predecessor above `NAT_MAX`.
    pub fn from_records(records: &[TraceRecord]) -> Result<Self> {
        let mut data = Vec::new();
        for record in records {
            record.write_to(&mut data)?;
        }
        let len = data.len() as u64;
        Ok(Self::from_bytes(data, len))
    }
}

impl<R: Read> TraceLog<R> {
    /// Wrap a reader positioned at the start of the log
    pub fn new(reader: R, recover_ptr: u64) -> Self {
        Self {
            reader,
            position: 0,
            recover_ptr,
        }
    }

    /// Current byte offset into the log
    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn recover_ptr(&self) -> u64 {
        self.recover_ptr
    }

    /// Next record before the recovery pointer, or `None` once it is reached
    pub fn next_record(&mut self) -> Result<Option<TraceRecord>> {
        if self.position >= self.recover_ptr {
            return Ok(None);
        }
        match TraceRecord::read_from(&mut self.reader) {
            Ok((record, n)) => {
                self.position += n as u64;
                Ok(Some(record))
            }
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Err(Error::TraceTruncated {
                offset: self.position,
                recover_ptr: self.recover_ptr,
            }),
            Err(e) => Err(e.into()),
        }
    }
}
