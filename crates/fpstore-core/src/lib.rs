//! fpstore-core: Core types and routing logic for the partitioned fingerprint set
//!
//! An exploration engine reduces every discovered state to a 64-bit
//! fingerprint and asks the fingerprint set "seen before?". To keep memory
//! bounded and checkpoints cheap, the set is split into `2^bits` independent
//! shards:
//!
//! - **Routing**: a fingerprint belongs to the shard named by its top `bits`
//!   bits. The mapping is stateless and never changes after construction, so
//!   every fingerprint lives in exactly one shard.
//! - **Durability**: each shard checkpoints its own files. After a crash the
//!   set is rebuilt by replaying the engine's trace log up to the recovery
//!   pointer recorded with the last checkpoint.
//!
//! ## On-disk naming
//!
//! | Artifact | Path |
//! |----------|------|
//! | Shard data | `<metadir>/<name>_<i>.fp` |
//! | Checkpoint in progress | `<metadir>/<name>_<i>.fp.tmp` |
//! | Committed checkpoint | `<metadir>/<name>_<i>.fp.chkpt` |
//! | Recovery pointer | `<trace>.chkpt` |
//!
//! The `_<i>` suffix is part of the durable format.

mod config;
mod error;
mod routing;
pub mod run_format;
pub mod trace_format;
pub mod trace_log;

pub use config::{FpSetConfig, ShardBackend, DEFAULT_NAME};
pub use error::{Error, ShardFailure};
pub use routing::{route, ShardRouter, MAX_FP_BITS};
pub use trace_format::TraceRecord;
pub use trace_log::TraceLog;

pub type Result<T> = std::result::Result<T, Error>;

/// 64-bit state fingerprint
pub type Fingerprint = u64;

/// Name of shard `index` for a set named `name`
pub fn shard_name(name: &str, index: usize) -> String {
    format!("{}_{}", name, index)
}
