//! End-to-end: checkpoint, crash, recover from the trace log on disk

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use fpstore::trace_log::{read_recover_ptr, write_recover_ptr};
use fpstore::{
    Error, FpSet, FpSetConfig, MultiFpSet, RecoveryPhase, Replayer, ShardBackend, TraceLog,
    TraceRecord,
};

const QUADRANT_FPS: [u64; 4] = [
    0x0000_0000_0000_0001,
    0x4000_0000_0000_0002,
    0x8000_0000_0000_0003,
    0xC000_0000_0000_0004,
];

/// Append records to a trace file and return the offset after the last one
fn append_trace(path: &Path, records: &[TraceRecord]) -> u64 {
    let file = File::options().create(true).append(true).open(path).unwrap();
    let mut writer = BufWriter::new(file);
    for record in records {
        record.write_to(&mut writer).unwrap();
    }
    writer.flush().unwrap();
    std::fs::metadata(path).unwrap().len()
}

fn config(dir: &Path, backend: ShardBackend) -> FpSetConfig {
    FpSetConfig::from_base_dir(dir)
        .with_bits(2)
        .with_memory(1 << 12)
        .with_backend(backend)
        .with_name("MC")
}

fn crash_and_recover(backend: ShardBackend) {
    let dir = tempfile::tempdir().unwrap();
    let trace = dir.path().join("MC.st");
    let config = config(dir.path(), backend);

    // first run: explore, log, checkpoint after the first four states
    let set = MultiFpSet::open(&config).unwrap();
    let before: Vec<_> = QUADRANT_FPS
        .iter()
        .enumerate()
        .map(|(i, fp)| TraceRecord::new(i as u64, *fp))
        .collect();
    for record in &before {
        assert!(!set.put(record.fingerprint).unwrap());
    }
    let ptr = append_trace(&trace, &before);
    set.begin_checkpoint().unwrap();
    set.commit_checkpoint().unwrap();
    write_recover_ptr(&trace, ptr).unwrap();

    // more states after the checkpoint, then the process dies
    let after = [
        TraceRecord::new(1, 0x4000_0000_0000_0010),
        TraceRecord::new(0x1_0000_0000, 0xF000_0000_0000_0000),
    ];
    for record in &after {
        set.put(record.fingerprint).unwrap();
    }
    append_trace(&trace, &after);
    drop(set);

    // second run
    assert_eq!(read_recover_ptr(&trace).unwrap(), ptr);
    let set = MultiFpSet::open(&config).unwrap();
    let stats = set.recover(&mut TraceLog::open(&trace).unwrap()).unwrap();

    assert_eq!(stats.replayed, 4);
    assert_eq!(stats.bytes_read, ptr);
    assert_eq!(stats.per_shard, vec![1, 1, 1, 1]);
    assert_eq!(set.size(), 4);
    for fp in QUADRANT_FPS {
        assert!(set.contains(fp).unwrap());
    }
    for record in &after {
        assert!(!set.contains(record.fingerprint).unwrap());
    }
    set.exit(true).unwrap();
}

#[test]
fn test_crash_recovery_memory_backend() {
    crash_and_recover(ShardBackend::Memory);
}

#[test]
fn test_crash_recovery_disk_backend() {
    crash_and_recover(ShardBackend::Disk);
}

#[test]
fn test_four_shard_layout() {
    let dir = tempfile::tempdir().unwrap();
    let set = MultiFpSet::open(&config(dir.path(), ShardBackend::Disk)).unwrap();

    for fp in QUADRANT_FPS {
        assert!(!set.contains(fp).unwrap());
        assert!(!set.put(fp).unwrap());
    }
    for (shard, fp) in QUADRANT_FPS.iter().enumerate() {
        assert_eq!(set.router().route(*fp), shard);
        assert!(set.router().bounds(shard).contains(fp));
    }
    assert_eq!(set.shard_sizes(), vec![1, 1, 1, 1]);
    assert_eq!(set.size(), set.shard_sizes().iter().sum::<u64>());
    for fp in QUADRANT_FPS {
        assert!(set.put(fp).unwrap());
    }
}

#[test]
fn test_recover_from_named_checkpoint_then_replay_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let set = MultiFpSet::open(&config(dir.path(), ShardBackend::Disk)).unwrap();
    for fp in QUADRANT_FPS {
        set.put(fp).unwrap();
    }
    set.begin_checkpoint_named("level3").unwrap();
    set.commit_checkpoint_named("level3").unwrap();
    for i in 0..4 {
        assert!(dir.path().join("states").join(format!("level3_{i}.fp.chkpt")).exists());
    }

    set.put(0x8000_0000_0000_00AA).unwrap();
    set.recover_named("level3").unwrap();
    assert_eq!(set.size(), 4);

    // a log that repeats a fingerprint is a consistency violation
    let records = [
        TraceRecord::new(0, QUADRANT_FPS[2]),
        TraceRecord::new(0, QUADRANT_FPS[2]),
    ];
    let mut replayer = Replayer::new(&set);
    let err = replayer.run(&mut TraceLog::from_records(&records).unwrap()).unwrap_err();
    assert!(err.is_consistency_violation());
    assert!(matches!(err, Error::Shard { shard: 2, .. }));
    assert_eq!(replayer.phase(), RecoveryPhase::Replaying);
}

#[test]
fn test_missing_recover_ptr() {
    let dir = tempfile::tempdir().unwrap();
    let trace = dir.path().join("MC.st");
    append_trace(&trace, &[TraceRecord::new(0, 1)]);

    assert!(matches!(
        TraceLog::open(&trace).err().unwrap(),
        Error::CheckpointMissing { .. }
    ));
}

#[test]
fn test_config_file_drives_set() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fpset.json");
    config(dir.path(), ShardBackend::Memory)
        .with_bits(3)
        .save(&path)
        .unwrap();

    let loaded = FpSetConfig::load(&path).unwrap();
    let set = MultiFpSet::from_config(&loaded).unwrap();
    assert_eq!(set.shard_count(), 8);
    assert_eq!(set.bits(), 3);
}
