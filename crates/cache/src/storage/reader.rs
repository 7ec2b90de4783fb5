//! Snapshot file reads with header and checksum verification

use crate::errors::{CacheError, RecoveryHint, Result, SerializationOp};
use crate::storage::format::{Records, SnapshotHeader};
use std::path::Path;

/// A snapshot file that passed every integrity check
#[derive(Debug)]
pub struct SnapshotFile {
    pub header: SnapshotHeader,
    payload: Vec<u8>,
}

impl SnapshotFile {
    pub fn records(&self) -> Records<'_> {
        Records::new(&self.payload)
    }
}

/// Read and fully validate one snapshot file.
///
/// Every record is walked once so that a file which decodes only partially is
/// rejected as a whole instead of being half applied.
pub fn read_snapshot_file(path: &Path) -> Result<SnapshotFile> {
    let name = path.display().to_string();

    let data = std::fs::read(path).map_err(|e| CacheError::Io {
        path: path.to_path_buf(),
        operation: "read snapshot file",
        source: e,
        recovery_hint: RecoveryHint::ClearAndRetry,
    })?;

    let header_len = SnapshotHeader::encoded_len();
    if data.len() < header_len {
        return Err(CacheError::Corruption {
            key: name,
            reason: format!(
                "File too short for header: {} < {} bytes",
                data.len(),
                header_len
            ),
            recovery_hint: RecoveryHint::ClearAndRetry,
        });
    }

    let header: SnapshotHeader =
        bincode::deserialize(&data[..header_len]).map_err(|e| CacheError::Serialization {
            key: name.clone(),
            operation: SerializationOp::Decode,
            source: Box::new(e),
            recovery_hint: RecoveryHint::ClearAndRetry,
        })?;

    header.validate(&name)?;

    let mut payload = data;
    payload.drain(..header_len);
    header.validate_payload(&name, &payload)?;

    let mut count = 0u64;
    for record in Records::new(&payload) {
        if let Err(offset) = record {
            return Err(CacheError::Corruption {
                key: name,
                reason: format!("Truncated record at payload offset {offset}"),
                recovery_hint: RecoveryHint::ClearAndRetry,
            });
        }
        count += 1;
    }

    if count != header.entry_count {
        return Err(CacheError::Corruption {
            key: name,
            reason: format!(
                "Entry count mismatch: header says {}, payload holds {}",
                header.entry_count, count
            ),
            recovery_hint: RecoveryHint::ClearAndRetry,
        });
    }

    Ok(SnapshotFile { header, payload })
}
