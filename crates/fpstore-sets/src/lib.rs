//! Shard backends and the partitioned fingerprint set
//!
//! This crate provides:
//! 1. The `FpSet` contract shared by shards and the aggregate
//! 2. A memory backend and a disk backend with a bounded buffer
//! 3. `MultiFpSet`, which routes fingerprints to `2^bits` shards
//! 4. Trace log replay after a crash
//!
//! ## Usage
//!
//! ```no_run
//! use fpstore_core::{FpSetConfig, TraceLog};
//! use fpstore_sets::{FpSet, MultiFpSet};
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = FpSetConfig::from_base_dir("./run").with_bits(4);
//!     let set = MultiFpSet::open(&config)?;
//!
//!     let stats = set.recover(&mut TraceLog::open("./run/MC.st")?)?;
//!     println!("replayed {} fingerprints", stats.replayed);
//!
//!     if !set.put(0xDEAD_BEEF_0000_0001)? {
//!         // new state, explore it
//!     }
//!     set.begin_checkpoint()?;
//!     set.commit_checkpoint()?;
//!     set.exit(false)?;
//!     Ok(())
//! }
//! ```

mod disk;
mod files;
mod fpset;
mod mem;
pub mod metrics;
mod multi;
mod recovery;

pub use disk::{DiskFpSet, BUFFERED_FP_BYTES};
pub use files::ShardFiles;
pub use fpset::FpSet;
pub use mem::MemFpSet;
pub use multi::MultiFpSet;
pub use recovery::{RecoveryPhase, RecoveryStats, Replayer};
