//! Atomic snapshot file writes

use crate::errors::{CacheError, RecoveryHint, Result, SerializationOp};
use crate::storage::format::SnapshotHeader;
use std::fs::{self, File};
use std::io::{BufWriter, ErrorKind, Write};
use std::path::Path;

fn io_hint(error: &std::io::Error, path: &Path) -> RecoveryHint {
    match error.kind() {
        ErrorKind::PermissionDenied => RecoveryHint::CheckPermissions {
            path: path.to_path_buf(),
        },
        ErrorKind::WriteZero | ErrorKind::OutOfMemory => RecoveryHint::CheckDiskSpace,
        _ if error.raw_os_error() == Some(28) => RecoveryHint::CheckDiskSpace, // ENOSPC
        _ => RecoveryHint::None,
    }
}

/// Write header and payload to `path`.
///
/// Data goes to a uniquely named temporary file first and is renamed over
/// `path` only after it has been fully written and synced, so a failed
/// write never clobbers an earlier snapshot.
pub fn write_snapshot_file(path: &Path, header: &SnapshotHeader, payload: &[u8]) -> Result<()> {
    let header_bytes = bincode::serialize(header).map_err(|e| CacheError::Serialization {
        key: path.display().to_string(),
        operation: SerializationOp::Encode,
        source: Box::new(e),
        recovery_hint: RecoveryHint::None,
    })?;

    let temp_path = path.with_extension(format!("tmp.{}", uuid::Uuid::new_v4()));

    let result = write_and_sync(&temp_path, &header_bytes, payload);
    if let Err(e) = result {
        let _ = fs::remove_file(&temp_path);
        return Err(e);
    }

    match fs::rename(&temp_path, path) {
        Ok(()) => Ok(()),
        Err(e) => {
            let _ = fs::remove_file(&temp_path);
            let recovery_hint = io_hint(&e, path);
            Err(CacheError::Io {
                path: path.to_path_buf(),
                operation: "atomic rename",
                source: e,
                recovery_hint,
            })
        }
    }
}

fn write_and_sync(temp_path: &Path, header_bytes: &[u8], payload: &[u8]) -> Result<()> {
    let wrap = |operation: &'static str| {
        move |e: std::io::Error| {
            let recovery_hint = io_hint(&e, temp_path);
            CacheError::Io {
                path: temp_path.to_path_buf(),
                operation,
                source: e,
                recovery_hint,
            }
        }
    };

    let file = File::create(temp_path).map_err(wrap("create snapshot file"))?;
    let mut writer = BufWriter::new(file);
    writer
        .write_all(header_bytes)
        .map_err(wrap("write snapshot header"))?;
    writer
        .write_all(payload)
        .map_err(wrap("write snapshot payload"))?;
    let file = writer
        .into_inner()
        .map_err(|e| wrap("flush snapshot file")(e.into_error()))?;
    file.sync_all().map_err(wrap("sync snapshot file"))?;
    Ok(())
}
