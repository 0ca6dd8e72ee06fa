//! Shard routing: determines which shard owns a fingerprint

use std::ops::RangeInclusive;

use crate::{Error, Fingerprint, Result};

/// Largest supported routing width (2^30 shards)
pub const MAX_FP_BITS: u32 = 30;

/// Top `bits` bits of `fp`, i.e. the index of the shard that owns it.
///
/// `bits == 0` sends everything to shard 0; widths above 64 act as 64.
#[inline]
pub fn route(fp: Fingerprint, bits: u32) -> usize {
    fp.checked_shr(64u32.saturating_sub(bits)).unwrap_or(0) as usize
}

/// Routes fingerprints to one of `2^bits` shards by their high-order bits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShardRouter {
    bits: u32,
}

impl ShardRouter {
    /// Create a router over `2^bits` shards
    pub fn new(bits: u32) -> Result<Self> {
        if bits > MAX_FP_BITS {
            return Err(Error::InvalidBits {
                bits,
                max: MAX_FP_BITS,
            });
        }
        Ok(Self { bits })
    }

    /// Route a fingerprint to its shard
    #[inline]
    pub fn route(&self, fp: Fingerprint) -> usize {
        route(fp, self.bits)
    }

    pub fn bits(&self) -> u32 {
        self.bits
    }

    /// Number of shards this router distributes over
    pub fn shard_count(&self) -> usize {
        1usize << self.bits
    }

    /// Check whether shard `index` owns `fp`
    pub fn owns(&self, index: usize, fp: Fingerprint) -> bool {
        self.route(fp) == index
    }

    /// Inclusive fingerprint range owned by shard `index`
    pub fn bounds(&self, index: usize) -> RangeInclusive<Fingerprint> {
        if self.bits == 0 {
            return 0..=Fingerprint::MAX;
        }
        let shift = 64 - self.bits;
        let low = (index as u64) << shift;
        let high = low | (Fingerprint::MAX >> self.bits);
        low..=high
    }
}
