//! fpstore: partitioned fingerprint set for state-space exploration
//!
//! Re-exports the routing and file formats from `fpstore-core` and the shard
//! backends from `fpstore-sets`.

pub use fpstore_core::*;
pub use fpstore_sets::*;
