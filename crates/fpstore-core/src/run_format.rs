//! Sorted run file format used by disk-backed shards
//!
//! A run file is a fixed header followed by `entry_count` fingerprints in
//! strictly ascending order, each stored as a little-endian u64. The same
//! layout is used for a shard's live data file and for its checkpoints.

use crate::Fingerprint;

/// Magic bytes identifying a fingerprint run file
pub const RUN_MAGIC: [u8; 4] = *b"FPR1";

/// Header size in bytes
pub const RUN_HEADER_SIZE: usize = 16;

/// Bytes per fingerprint
pub const RUN_ENTRY_SIZE: usize = 8;

/// Run file header
///
/// All integers are little-endian.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunHeader {
    /// Magic bytes: "FPR1"
    pub magic: [u8; 4],
    /// Format version (currently 1)
    pub version: u16,
    /// Bytes per entry (8)
    pub entry_size: u16,
    /// Number of fingerprints following the header
    pub entry_count: u64,
}

impl RunHeader {
    /// Current format version
    pub const VERSION: u16 = 1;

    pub fn new(entry_count: u64) -> Self {
        Self {
            magic: RUN_MAGIC,
            version: Self::VERSION,
            entry_size: RUN_ENTRY_SIZE as u16,
            entry_count,
        }
    }

    /// Serialize header to bytes
    pub fn to_bytes(&self) -> [u8; RUN_HEADER_SIZE] {
        let mut buf = [0u8; RUN_HEADER_SIZE];
        buf[0..4].copy_from_slice(&self.magic);
        buf[4..6].copy_from_slice(&self.version.to_le_bytes());
        buf[6..8].copy_from_slice(&self.entry_size.to_le_bytes());
        buf[8..16].copy_from_slice(&self.entry_count.to_le_bytes());
        buf
    }

    /// Parse header from bytes
    pub fn from_bytes(data: &[u8]) -> Result<Self, RunFormatError> {
        if data.len() < RUN_HEADER_SIZE {
            return Err(RunFormatError::HeaderTooShort { actual: data.len() });
        }

        let mut magic = [0u8; 4];
        magic.copy_from_slice(&data[0..4]);
        if magic != RUN_MAGIC {
            return Err(RunFormatError::InvalidMagic { actual: magic });
        }

        let version = u16::from_le_bytes([data[4], data[5]]);
        if version != Self::VERSION {
            return Err(RunFormatError::UnsupportedVersion { actual: version });
        }
        let entry_size = u16::from_le_bytes([data[6], data[7]]);
        if entry_size as usize != RUN_ENTRY_SIZE {
            return Err(RunFormatError::EntrySize { actual: entry_size });
        }
        let mut count = [0u8; 8];
        count.copy_from_slice(&data[8..16]);

        Ok(Self {
            magic,
            version,
            entry_size,
            entry_count: u64::from_le_bytes(count),
        })
    }

    /// Total file size this header describes, or `None` if it overflows u64
    pub fn file_size(&self) -> Option<u64> {
        self.entry_count
            .checked_mul(RUN_ENTRY_SIZE as u64)
            .and_then(|n| n.checked_add(RUN_HEADER_SIZE as u64))
    }

    /// Check a complete run file image against its header
    pub fn validate(data: &[u8]) -> Result<Self, RunFormatError> {
        let header = Self::from_bytes(data)?;
        let expected = header.file_size().ok_or(RunFormatError::CountOverflow {
            entry_count: header.entry_count,
        })?;
        if expected != data.len() as u64 {
            return Err(RunFormatError::SizeMismatch {
                expected,
                actual: data.len() as u64,
            });
        }
        Ok(header)
    }
}

/// Fingerprint stored at entry `index` of a validated run image
#[inline]
pub fn entry_at(data: &[u8], index: usize) -> Fingerprint {
    let start = RUN_HEADER_SIZE + index * RUN_ENTRY_SIZE;
    let mut buf = [0u8; RUN_ENTRY_SIZE];
    buf.copy_from_slice(&data[start..start + RUN_ENTRY_SIZE]);
    Fingerprint::from_le_bytes(buf)
}

/// Binary search a validated run image for `fp`
pub fn run_contains(data: &[u8], entry_count: usize, fp: Fingerprint) -> bool {
    let (mut lo, mut hi) = (0usize, entry_count);
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        let entry = entry_at(data, mid);
        if entry == fp {
            return true;
        }
        if entry < fp {
            lo = mid + 1;
        } else {
            hi = mid;
        }
    }
    false
}

/// Errors for run file parsing
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunFormatError {
    /// Header is too short
    HeaderTooShort { actual: usize },
    /// Invalid magic bytes
    InvalidMagic { actual: [u8; 4] },
    /// Written by an unknown format version
    UnsupportedVersion { actual: u16 },
    /// Entry size is not 8
    EntrySize { actual: u16 },
    /// File size doesn't match header
    SizeMismatch { expected: u64, actual: u64 },
    /// Entry count too large for any file
    CountOverflow { entry_count: u64 },
}

impl core::fmt::Display for RunFormatError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            RunFormatError::HeaderTooShort { actual } => {
                write!(f, "Header too short: need {} bytes, got {}", RUN_HEADER_SIZE, actual)
            }
            RunFormatError::InvalidMagic { actual } => {
                write!(f, "Invalid magic: expected {:?}, got {:?}", RUN_MAGIC, actual)
            }
            RunFormatError::UnsupportedVersion { actual } => {
                write!(
                    f,
                    "Unsupported version: expected {}, got {}",
                    RunHeader::VERSION,
                    actual
                )
            }
            RunFormatError::EntrySize { actual } => {
                write!(f, "Invalid entry size: expected {}, got {}", RUN_ENTRY_SIZE, actual)
            }
            RunFormatError::SizeMismatch { expected, actual } => {
                write!(f, "File size mismatch: expected {} bytes, got {}", expected, actual)
            }
            RunFormatError::CountOverflow { entry_count } => {
                write!(f, "Entry count {} overflows the file size", entry_count)
            }
        }
    }
}

impl std::error::Error for RunFormatError {}
