//! Snapshot persistence for warm restarts
//!
//! Each shard is written to its own file under the snapshot directory. Saves
//! copy a shard's entries into a buffer under the shard lock and perform all
//! file I/O after the lock is released. Loads never fail on bad files: a file
//! that does not validate is logged and skipped, leaving that part of the
//! cache cold. Temporary files left by an interrupted save are removed when
//! the directory is loaded.

mod format;
mod reader;
mod writer;

pub use format::{
    is_temp_file_name, parse_shard_file_name, shard_file_name, RecordBuffer, Records, SnapshotHeader, SnapshotKind,
    RECORD_HEADER_LEN, SNAPSHOT_EXTENSION, SNAPSHOT_MAGIC, SNAPSHOT_VERSION,
};
pub use reader::{read_snapshot_file, SnapshotFile};
pub use writer::write_snapshot_file;

use crate::errors::{CacheError, RecoveryHint, Result};
use crate::key::NodeKey;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, warn};

/// A sharded store whose shards can be copied out for a snapshot
pub trait SnapshotSource: Sync {
    fn snapshot_kind(&self) -> SnapshotKind;

    fn shard_count(&self) -> usize;

    /// Append the live entries of `shard` to `out`, oldest first.
    ///
    /// Implementations hold the shard lock only while copying.
    fn copy_shard(&self, shard: usize, out: &mut RecordBuffer);

    /// Insert an entry read back from a snapshot
    fn restore(&self, key: &NodeKey, value: &[u8]);
}

/// Outcome of a successful save
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SaveReport {
    pub files_written: usize,
    pub entries_written: u64,
    pub bytes_written: u64,
}

/// Outcome of a load; never an error
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub files_loaded: usize,
    pub files_skipped: usize,
    pub entries_restored: u64,
}

impl LoadReport {
    #[must_use]
    pub fn merge(&self, other: &LoadReport) -> LoadReport {
        LoadReport {
            files_loaded: self.files_loaded + other.files_loaded,
            files_skipped: self.files_skipped + other.files_skipped,
            entries_restored: self.entries_restored + other.entries_restored,
        }
    }
}

fn save_one<S: SnapshotSource + ?Sized>(
    source: &S,
    dir: &Path,
    shard: usize,
) -> Result<SaveReport> {
    let started = Instant::now();
    let mut records = RecordBuffer::new();
    source.copy_shard(shard, &mut records);

    let header = SnapshotHeader::new(
        source.snapshot_kind(),
        shard as u32,
        source.shard_count() as u32,
        records.len(),
        records.as_bytes(),
    );
    let path = dir.join(shard_file_name(shard));
    write_snapshot_file(&path, &header, records.as_bytes())?;

    debug!(
        shard,
        entries = records.len(),
        bytes = records.as_bytes().len(),
        elapsed_us = started.elapsed().as_micros() as u64,
        "Wrote shard snapshot"
    );

    Ok(SaveReport {
        files_written: 1,
        entries_written: records.len(),
        bytes_written: records.as_bytes().len() as u64,
    })
}

/// Snapshot every shard of `source` into `dir` using up to `concurrency`
/// worker threads. Shard `i` is handled by worker `i % workers`.
///
/// Returns the first error encountered; shards written before the error keep
/// their new files, the rest keep whatever was there before.
pub fn save_snapshot<S: SnapshotSource + ?Sized>(
    source: &S,
    dir: &Path,
    concurrency: usize,
) -> Result<SaveReport> {
    if concurrency == 0 {
        return Err(CacheError::Configuration {
            message: "save concurrency must be at least 1".to_string(),
            recovery_hint: RecoveryHint::UseDefault {
                value: "4".to_string(),
            },
        });
    }

    std::fs::create_dir_all(dir).map_err(|e| CacheError::Io {
        path: dir.to_path_buf(),
        operation: "create snapshot directory",
        source: e,
        recovery_hint: RecoveryHint::CheckPermissions {
            path: dir.to_path_buf(),
        },
    })?;

    let started = Instant::now();
    let shard_count = source.shard_count();
    let workers = concurrency.min(shard_count).max(1);

    let results: Vec<Result<SaveReport>> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..workers)
            .map(|worker| {
                scope.spawn(move || {
                    let mut report = SaveReport::default();
                    for shard in (worker..shard_count).step_by(workers) {
                        let one = save_one(source, dir, shard)?;
                        report.files_written += one.files_written;
                        report.entries_written += one.entries_written;
                        report.bytes_written += one.bytes_written;
                    }
                    Ok(report)
                })
            })
            .collect();

        handles
            .into_iter()
            .map(|handle| match handle.join() {
                Ok(result) => result,
                Err(_) => Err(CacheError::Io {
                    path: dir.to_path_buf(),
                    operation: "snapshot worker",
                    source: std::io::Error::new(std::io::ErrorKind::Other, "worker panicked"),
                    recovery_hint: RecoveryHint::None,
                }),
            })
            .collect()
    });

    let mut total = SaveReport::default();
    for result in results {
        let report = result?;
        total.files_written += report.files_written;
        total.entries_written += report.entries_written;
        total.bytes_written += report.bytes_written;
    }

    prune_stale_files(dir, shard_count);

    info!(
        dir = %dir.display(),
        files = total.files_written,
        entries = total.entries_written,
        bytes = total.bytes_written,
        workers,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Saved cache snapshot"
    );

    Ok(total)
}

/// Remove snapshot files left behind by a cache with more shards
fn prune_stale_files(dir: &Path, shard_count: usize) {
    for path in snapshot_files(dir) {
        let stale = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(parse_shard_file_name)
            .is_some_and(|index| index >= shard_count);
        if stale {
            if let Err(e) = std::fs::remove_file(&path) {
                warn!(path = %path.display(), error = %e, "Failed to remove stale snapshot file");
            }
        }
    }
}

/// Remove temporary files of saves that never finished. Returns how many
/// were removed.
fn sweep_temp_files(dir: &Path) -> usize {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return 0;
    };

    let mut removed = 0;
    for path in entries.filter_map(|entry| entry.ok().map(|e| e.path())) {
        let is_temp = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(is_temp_file_name);
        if !is_temp || !path.is_file() {
            continue;
        }
        match std::fs::remove_file(&path) {
            Ok(()) => removed += 1,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to remove leftover temporary snapshot file")
            }
        }
    }
    if removed > 0 {
        debug!(dir = %dir.display(), removed, "Removed leftover temporary snapshot files");
    }
    removed
}

fn snapshot_files(dir: &Path) -> Vec<PathBuf> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => return Vec::new(),
    };

    let mut files: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .and_then(parse_shard_file_name)
                .is_some()
        })
        .collect();
    files.sort();
    files
}

/// Restore every valid snapshot file in `dir` into `target`.
///
/// Entries are re-routed by key, so a snapshot written with a different shard
/// count loads correctly. A missing directory yields an empty report.
pub fn load_snapshot<S: SnapshotSource + ?Sized>(target: &S, dir: &Path) -> LoadReport {
    let mut report = LoadReport::default();
    if !dir.is_dir() {
        debug!(dir = %dir.display(), "No snapshot directory, starting cold");
        return report;
    }

    let started = Instant::now();
    sweep_temp_files(dir);
    for path in snapshot_files(dir) {
        match read_snapshot_file(&path) {
            Ok(file) => {
                if file.header.kind() != target.snapshot_kind() {
                    debug!(
                        path = %path.display(),
                        written_as = ?file.header.kind(),
                        loading_as = ?target.snapshot_kind(),
                        "Loading snapshot written by another strategy"
                    );
                }
                for (key, value) in file.records().flatten() {
                    target.restore(&key, value);
                    report.entries_restored += 1;
                }
                report.files_loaded += 1;
            }
            Err(e) => {
                warn!(
                    path = %path.display(),
                    error = %e,
                    "Skipping unusable snapshot file"
                );
                report.files_skipped += 1;
            }
        }
    }

    info!(
        dir = %dir.display(),
        loaded = report.files_loaded,
        skipped = report.files_skipped,
        entries = report.entries_restored,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Loaded cache snapshot"
    );

    report
}

#[cfg(test)]
mod tests;
