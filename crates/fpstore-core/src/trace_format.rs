//! Trace log record format
//!
//! The exploration engine appends one record per discovered state:
//!
//! ```text
//! +-------------------------+------------------+
//! | predecessor (4 or 8 B)  | fingerprint (8B) |
//! +-------------------------+------------------+
//! ```
//!
//! All integers are big-endian. The predecessor is a natural long: values up
//! to `0x7FFF_FFFF` take four bytes, larger ones take eight bytes with the top
//! bit set as a width marker.

use std::io::{self, Read, Write};

use crate::Fingerprint;

/// Largest predecessor that fits the short (4 byte) encoding
pub const SHORT_NAT_MAX: u64 = 0x7FFF_FFFF;

/// Largest encodable predecessor
pub const NAT_MAX: u64 = 0x7FFF_FFFF_FFFF_FFFF;

const LONG_MARKER: u64 = 0x8000_0000_0000_0000;

/// One trace log entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceRecord {
    /// Location of the predecessor record; not interpreted by the fingerprint set
    pub predecessor: u64,
    /// Fingerprint of the discovered state
    pub fingerprint: Fingerprint,
}

impl TraceRecord {
    pub fn new(predecessor: u64, fingerprint: Fingerprint) -> Self {
        Self {
            predecessor,
            fingerprint,
        }
    }

    /// Encoded size of this record in bytes
    pub fn encoded_len(&self) -> usize {
        nat_len(self.predecessor) + 8
    }

    /// Append this record to `writer`
    pub fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<usize> {
        let n = write_nat(writer, self.predecessor)?;
        writer.write_all(&self.fingerprint.to_be_bytes())?;
        Ok(n + 8)
    }

    /// Read the next record, returning it with the number of bytes consumed
    pub fn read_from<R: Read>(reader: &mut R) -> io::Result<(Self, usize)> {
        let (predecessor, n) = read_nat(reader)?;
        let mut fp = [0u8; 8];
        reader.read_exact(&mut fp)?;
        Ok((Self::new(predecessor, Fingerprint::from_be_bytes(fp)), n + 8))
    }
}

fn nat_len(value: u64) -> usize {
    if value > SHORT_NAT_MAX {
        8
    } else {
        4
    }
}

/// Write a natural long, returning the number of bytes written
pub fn write_nat<W: Write>(writer: &mut W, value: u64) -> io::Result<usize> {
    if value > NAT_MAX {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("natural long out of range: {:#x}", value),
        ));
    }
    if value > SHORT_NAT_MAX {
        writer.write_all(&(value | LONG_MARKER).to_be_bytes())?;
        Ok(8)
    } else {
        writer.write_all(&(value as u32).to_be_bytes())?;
        Ok(4)
    }
}

/// Read a natural long, returning the value and the number of bytes read
pub fn read_nat<R: Read>(reader: &mut R) -> io::Result<(u64, usize)> {
    let mut high = [0u8; 4];
    reader.read_exact(&mut high)?;
    let high = u32::from_be_bytes(high);
    if high & 0x8000_0000 == 0 {
        return Ok((high as u64, 4));
    }
    let mut low = [0u8; 4];
    reader.read_exact(&mut low)?;
    let value = (((high as u64) << 32) | u32::from_be_bytes(low) as u64) & NAT_MAX;
    Ok((value, 8))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_short_predecessor_layout() {
        let record = TraceRecord::new(5, 0xC000_0000_0000_0004);
        let mut buf = Vec::new();
        assert_eq!(record.write_to(&mut buf).unwrap(), 12);
        assert_eq!(buf.len(), record.encoded_len());
        assert_eq!(&buf[0..4], &[0, 0, 0, 5]);
        assert_eq!(&buf[4..12], &[0xC0, 0, 0, 0, 0, 0, 0, 4]);
    }

    #[test]
    fn test_long_predecessor_layout() {
        let record = TraceRecord::new(0x1_0000_0000, 42);
        let mut buf = Vec::new();
        assert_eq!(record.write_to(&mut buf).unwrap(), 16);
        assert_eq!(buf[0], 0x80, "width marker must be set");

        let (decoded, n) = TraceRecord::read_from(&mut Cursor::new(&buf)).unwrap();
        assert_eq!(n, 16);
        assert_eq!(decoded, record);
    }

    #[test]
    fn test_nat_boundaries() {
        for value in [0, SHORT_NAT_MAX, SHORT_NAT_MAX + 1, NAT_MAX] {
            let mut buf = Vec::new();
            let written = write_nat(&mut buf, value).unwrap();
            let (read, consumed) = read_nat(&mut Cursor::new(&buf)).unwrap();
            assert_eq!(read, value);
            assert_eq!(written, consumed);
        }
        assert!(write_nat(&mut Vec::new(), NAT_MAX + 1).is_err());
    }

    #[test]
    fn test_truncated_record() {
        let mut buf = Vec::new();
        TraceRecord::new(1, 2).write_to(&mut buf).unwrap();
        buf.truncate(10);
        let err = TraceRecord::read_from(&mut Cursor::new(&buf)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }
}
