//! Fingerprint set tooling
//!
//! Run with:
//! ```bash
//! cargo run -p fpstore-sets --bin fpstore -- route --bits 4 0xC000000000000004
//! cargo run -p fpstore-sets --bin fpstore -- replay --config fpset.json --trace MC.st
//! ```

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use fpstore_core::{FpSetConfig, ShardRouter, TraceLog};
use fpstore_sets::{FpSet, MultiFpSet};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "fpstore")]
#[command(about = "Inspect and rebuild partitioned fingerprint sets")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show which shard owns a fingerprint
    Route {
        /// log2 of the shard count
        #[arg(long, default_value = "1")]
        bits: u32,

        /// Fingerprint, decimal or 0x-prefixed hex
        #[arg(value_parser = parse_fingerprint)]
        fingerprint: u64,
    },

    /// Rebuild a fingerprint set from a trace log
    Replay {
        /// JSON fingerprint set configuration
        #[arg(long)]
        config: PathBuf,

        /// Trace log file
        #[arg(long)]
        trace: PathBuf,

        /// Recovery pointer; read from `<trace>.chkpt` when omitted
        #[arg(long)]
        recover_ptr: Option<u64>,

        /// Checkpoint the rebuilt set before exiting
        #[arg(long)]
        checkpoint: bool,
    },
}

fn parse_fingerprint(s: &str) -> Result<u64, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(&hex.replace('_', ""), 16),
        None => s.replace('_', "").parse(),
    };
    parsed.map_err(|e| format!("invalid fingerprint {s:?}: {e}"))
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("fpstore=info".parse()?))
        .init();

    match Args::parse().command {
        Command::Route { bits, fingerprint } => {
            let router = ShardRouter::new(bits)?;
            let shard = router.route(fingerprint);
            let bounds = router.bounds(shard);
            println!(
                "{:#018x} -> shard {} of {} [{:#018x}..={:#018x}]",
                fingerprint,
                shard,
                router.shard_count(),
                bounds.start(),
                bounds.end()
            );
        }
        Command::Replay {
            config,
            trace,
            recover_ptr,
            checkpoint,
        } => {
            let config = FpSetConfig::load(&config)
                .with_context(|| format!("loading config {}", config.display()))?;
            let set = MultiFpSet::open(&config)?;

            let mut log = match recover_ptr {
                Some(ptr) => TraceLog::open_with_ptr(&trace, ptr)?,
                None => TraceLog::open(&trace)?,
            };
            let stats = set
                .recover(&mut log)
                .with_context(|| format!("replaying {}", trace.display()))?;

            println!(
                "[OK] replayed {} fingerprints ({} bytes) into {} shards",
                stats.replayed,
                stats.bytes_read,
                set.shard_count()
            );
            for (shard, (replayed, size)) in stats
                .per_shard
                .iter()
                .zip(set.shard_sizes())
                .enumerate()
            {
                println!("  shard {}: replayed {} size {}", shard, replayed, size);
            }
            println!("  check_fps: {:e}", set.check_fps()?);

            if checkpoint {
                set.begin_checkpoint()?;
                set.commit_checkpoint()?;
                println!("[OK] checkpoint committed under {}", config.metadata_dir.display());
            }
            set.exit(false)?;
        }
    }
    Ok(())
}
