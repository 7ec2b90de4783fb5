//! Tests for snapshot persistence

use super::*;
use crate::key::NodeKey;
use parking_lot::Mutex;
use std::fs;
use tempfile::TempDir;

/// Two-shard in-memory source that records restores
struct VecSource {
    shards: Vec<Vec<(NodeKey, Vec<u8>)>>,
    restored: Mutex<Vec<(NodeKey, Vec<u8>)>>,
}

impl VecSource {
    fn new(shards: Vec<Vec<(NodeKey, Vec<u8>)>>) -> Self {
        Self {
            shards,
            restored: Mutex::new(Vec::new()),
        }
    }
}

impl SnapshotSource for VecSource {
    fn snapshot_kind(&self) -> SnapshotKind {
        SnapshotKind::Lru
    }

    fn shard_count(&self) -> usize {
        self.shards.len()
    }

    fn copy_shard(&self, shard: usize, out: &mut RecordBuffer) {
        for (key, value) in &self.shards[shard] {
            out.push(key, value);
        }
    }

    fn restore(&self, key: &NodeKey, value: &[u8]) {
        self.restored.lock().push((*key, value.to_vec()));
    }
}

fn key(n: u8) -> NodeKey {
    NodeKey::new([n; 32])
}

fn sample_source() -> VecSource {
    VecSource::new(vec![
        vec![(key(1), b"one".to_vec()), (key(2), vec![])],
        vec![(key(3), vec![0xff; 300])],
        vec![],
    ])
}

#[test]
fn test_header_encoded_len_matches_bincode() {
    let header = SnapshotHeader::new(SnapshotKind::Fast, 3, 16, 0, &[]);
    let size = bincode::serialized_size(&header).unwrap() as usize;
    assert_eq!(size, SnapshotHeader::encoded_len());
}

#[test]
fn test_save_and_load_round_trip() {
    let dir = TempDir::new().unwrap();
    let source = sample_source();

    let report = save_snapshot(&source, dir.path(), 2).unwrap();
    assert_eq!(report.files_written, 3);
    assert_eq!(report.entries_written, 3);
    assert!(dir.path().join(shard_file_name(2)).exists());

    let target = VecSource::new(vec![vec![]]);
    let loaded = load_snapshot(&target, dir.path());
    assert_eq!(loaded.files_loaded, 3);
    assert_eq!(loaded.files_skipped, 0);
    assert_eq!(loaded.entries_restored, 3);

    let restored = target.restored.lock();
    assert_eq!(restored[0], (key(1), b"one".to_vec()));
    assert_eq!(restored[1], (key(2), vec![]));
    assert_eq!(restored[2], (key(3), vec![0xff; 300]));
}

#[test]
fn test_corrupt_file_is_skipped_not_fatal() {
    let dir = TempDir::new().unwrap();
    save_snapshot(&sample_source(), dir.path(), 1).unwrap();

    // Flip a payload byte in shard 1
    let path = dir.path().join(shard_file_name(1));
    let mut bytes = fs::read(&path).unwrap();
    let last = bytes.len() - 1;
    bytes[last] ^= 0x55;
    fs::write(&path, bytes).unwrap();

    let target = VecSource::new(vec![vec![]]);
    let loaded = load_snapshot(&target, dir.path());
    assert_eq!(loaded.files_loaded, 2);
    assert_eq!(loaded.files_skipped, 1);
    assert_eq!(loaded.entries_restored, 2);
}

#[test]
fn test_truncated_and_garbage_files_are_rejected() {
    let dir = TempDir::new().unwrap();
    save_snapshot(&sample_source(), dir.path(), 4).unwrap();

    let path = dir.path().join(shard_file_name(0));
    let bytes = fs::read(&path).unwrap();
    fs::write(&path, &bytes[..bytes.len() - 2]).unwrap();
    assert!(read_snapshot_file(&path).unwrap_err().is_corruption());

    fs::write(&path, b"not a snapshot").unwrap();
    assert!(read_snapshot_file(&path).is_err());

    let mut junk = vec![0u8; SnapshotHeader::encoded_len() + 8];
    junk[..4].copy_from_slice(&0xdead_beefu32.to_le_bytes());
    fs::write(&path, junk).unwrap();
    assert!(read_snapshot_file(&path).unwrap_err().is_corruption());
}

#[test]
fn test_future_version_is_version_mismatch() {
    let dir = TempDir::new().unwrap();
    save_snapshot(&sample_source(), dir.path(), 1).unwrap();

    // version is the u16 right after the u32 magic
    let path = dir.path().join(shard_file_name(0));
    let mut bytes = fs::read(&path).unwrap();
    bytes[4..6].copy_from_slice(&(SNAPSHOT_VERSION + 1).to_le_bytes());
    fs::write(&path, bytes).unwrap();

    match read_snapshot_file(&path) {
        Err(CacheError::VersionMismatch { actual_version, .. }) => {
            assert_eq!(actual_version, u32::from(SNAPSHOT_VERSION + 1));
        }
        other => panic!("expected version mismatch, got {other:?}"),
    }
}

#[test]
fn test_failed_save_keeps_previous_snapshot() {
    let dir = TempDir::new().unwrap();
    save_snapshot(&sample_source(), dir.path(), 1).unwrap();

    // A directory squatting on the target name makes the rename fail
    let blocked = dir.path().join(shard_file_name(0));
    fs::remove_file(&blocked).unwrap();
    fs::create_dir(&blocked).unwrap();
    fs::write(blocked.join("keep"), b"x").unwrap();

    assert!(save_snapshot(&sample_source(), dir.path(), 1).is_err());

    // No temp files left behind, and other shards still hold valid data
    let leftovers: Vec<_> = fs::read_dir(dir.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().contains(".tmp."))
        .collect();
    assert!(leftovers.is_empty());
    assert!(read_snapshot_file(&dir.path().join(shard_file_name(1))).is_ok());
}

#[test]
fn test_stale_shard_files_are_pruned() {
    let dir = TempDir::new().unwrap();
    save_snapshot(&sample_source(), dir.path(), 2).unwrap();
    assert!(dir.path().join(shard_file_name(2)).exists());

    let smaller = VecSource::new(vec![vec![(key(9), b"nine".to_vec())]]);
    save_snapshot(&smaller, dir.path(), 2).unwrap();
    assert!(dir.path().join(shard_file_name(0)).exists());
    assert!(!dir.path().join(shard_file_name(1)).exists());
    assert!(!dir.path().join(shard_file_name(2)).exists());
}

#[test]
fn test_missing_directory_loads_empty() {
    let dir = TempDir::new().unwrap();
    let target = VecSource::new(vec![vec![]]);
    let report = load_snapshot(&target, &dir.path().join("nope"));
    assert_eq!(report, LoadReport::default());
}

#[test]
fn test_zero_concurrency_rejected() {
    let dir = TempDir::new().unwrap();
    assert!(save_snapshot(&sample_source(), dir.path(), 0).is_err());
}

#[test]
fn test_file_name_parsing() {
    assert_eq!(parse_shard_file_name(&shard_file_name(17)), Some(17));
    assert_eq!(parse_shard_file_name("shard-0001.tmp.abc"), None);
    assert_eq!(parse_shard_file_name("other.snap"), None);

    assert!(is_temp_file_name("shard-0001.tmp.6f1c"));
    assert!(!is_temp_file_name(&shard_file_name(1)));
    assert!(!is_temp_file_name("notes.tmp.6f1c"));
}

#[test]
fn test_load_removes_leftover_temp_files() {
    let dir = TempDir::new().unwrap();
    save_snapshot(&sample_source(), dir.path(), 2).unwrap();

    // Left behind by a save interrupted before its rename
    let leftover = dir.path().join("shard-0001.tmp.1b2c3d4e");
    fs::write(&leftover, b"partial").unwrap();
    let unrelated = dir.path().join("notes.tmp.1b2c3d4e");
    fs::write(&unrelated, b"keep").unwrap();

    let target = VecSource::new(vec![vec![]]);
    let loaded = load_snapshot(&target, dir.path());
    assert_eq!(loaded.files_loaded, 3);
    assert_eq!(loaded.files_skipped, 0);
    assert!(!leftover.exists());
    assert!(unrelated.exists());
}
