//! Snapshot file format definitions
//!
//! A snapshot file holds the live entries of one shard:
//!
//! ```text
//! +-----------------+----------------------------------------------+
//! | SnapshotHeader  | record*                                      |
//! | (bincode, 50 B) | key (32 B) | value_len (u32 LE) | value bytes  |
//! +-----------------+----------------------------------------------+
//! ```
//!
//! Records are written oldest first so that replaying them in order
//! reconstructs approximate recency.

use crate::errors::{CacheError, RecoveryHint, Result};
use crate::key::{NodeKey, KEY_LEN};
use crc32c::crc32c;
use serde::{Deserialize, Serialize};
use std::time::SystemTime;

/// Magic number for snapshot files: "TNSC" (Trie Node Snapshot Cache)
pub const SNAPSHOT_MAGIC: u32 = 0x544E_5343;

/// Current snapshot format version
pub const SNAPSHOT_VERSION: u16 = 1;

/// File extension of completed snapshot files
pub const SNAPSHOT_EXTENSION: &str = "snap";

/// Per-record overhead in the payload besides the value bytes
pub const RECORD_HEADER_LEN: usize = KEY_LEN + 4;

/// Strategy that produced a snapshot. Informational only: records are plain
/// key/value pairs and may be loaded into any strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum SnapshotKind {
    Lru = 1,
    Fast = 2,
}

/// Fixed-size header at the start of every snapshot file
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[repr(C)]
pub struct SnapshotHeader {
    magic: u32,
    version: u16,
    kind: SnapshotKind,
    /// Index of the shard this file was written from
    pub shard_index: u32,
    /// Shard count of the cache that wrote the file
    pub shard_count: u32,
    /// Number of records in the payload
    pub entry_count: u64,
    /// Payload length in bytes
    pub payload_len: u64,
    /// CRC32C of the payload
    pub data_crc: u32,
    /// Seconds since the epoch when written
    pub timestamp: u64,
    /// CRC32C of the header with this field zeroed
    header_crc: u32,
}

impl SnapshotHeader {
    pub fn new(
        kind: SnapshotKind,
        shard_index: u32,
        shard_count: u32,
        entry_count: u64,
        payload: &[u8],
    ) -> Self {
        let mut header = Self {
            magic: SNAPSHOT_MAGIC,
            version: SNAPSHOT_VERSION,
            kind,
            shard_index,
            shard_count,
            entry_count,
            payload_len: payload.len() as u64,
            data_crc: crc32c(payload),
            timestamp: SystemTime::now()
                .duration_since(SystemTime::UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
            header_crc: 0,
        };
        header.header_crc = header.calculate_crc();
        header
    }

    /// Encoded header length. bincode's default options use fixed-width
    /// integers, so every header encodes to the same size.
    pub fn encoded_len() -> usize {
        // magic + version + kind + shard_index + shard_count + entry_count
        // + payload_len + data_crc + timestamp + header_crc
        4 + 2 + 4 + 4 + 4 + 8 + 8 + 4 + 8 + 4
    }

    pub fn kind(&self) -> SnapshotKind {
        self.kind
    }

    pub fn version(&self) -> u16 {
        self.version
    }

    fn calculate_crc(&self) -> u32 {
        let mut temp = *self;
        temp.header_crc = 0;

        match bincode::serialize(&temp) {
            Ok(bytes) => crc32c(&bytes),
            Err(_) => 0,
        }
    }

    /// Validate magic, version and header checksum
    pub fn validate(&self, file: &str) -> Result<()> {
        if self.magic != SNAPSHOT_MAGIC {
            return Err(CacheError::Corruption {
                key: file.to_string(),
                reason: format!(
                    "Invalid magic number: expected {:08x}, got {:08x}",
                    SNAPSHOT_MAGIC, self.magic
                ),
                recovery_hint: RecoveryHint::ClearAndRetry,
            });
        }

        if self.version != SNAPSHOT_VERSION {
            return Err(CacheError::VersionMismatch {
                key: file.to_string(),
                expected_version: u32::from(SNAPSHOT_VERSION),
                actual_version: u32::from(self.version),
                recovery_hint: RecoveryHint::ClearAndRetry,
            });
        }

        let expected_crc = self.calculate_crc();
        if self.header_crc != expected_crc {
            return Err(CacheError::Corruption {
                key: file.to_string(),
                reason: format!(
                    "Header CRC mismatch: expected {:08x}, got {:08x}",
                    expected_crc, self.header_crc
                ),
                recovery_hint: RecoveryHint::ClearAndRetry,
            });
        }

        Ok(())
    }

    /// Validate a payload against the length and checksum in this header
    pub fn validate_payload(&self, file: &str, payload: &[u8]) -> Result<()> {
        if payload.len() as u64 != self.payload_len {
            return Err(CacheError::Corruption {
                key: file.to_string(),
                reason: format!(
                    "Truncated payload: expected {} bytes, got {}",
                    self.payload_len,
                    payload.len()
                ),
                recovery_hint: RecoveryHint::ClearAndRetry,
            });
        }

        let actual = crc32c(payload);
        if actual != self.data_crc {
            return Err(CacheError::Corruption {
                key: file.to_string(),
                reason: format!(
                    "Data CRC mismatch: expected {:08x}, got {:08x}",
                    self.data_crc, actual
                ),
                recovery_hint: RecoveryHint::ClearAndRetry,
            });
        }

        Ok(())
    }
}

/// Snapshot file name for a shard
pub fn shard_file_name(shard_index: usize) -> String {
    format!("shard-{shard_index:04}.{SNAPSHOT_EXTENSION}")
}

/// Parse the shard index out of a snapshot file name
pub fn parse_shard_file_name(name: &str) -> Option<usize> {
    name.strip_prefix("shard-")?
        .strip_suffix(".snap")?
        .parse()
        .ok()
}

/// Whether `name` is the temporary file of a shard save that never finished
pub fn is_temp_file_name(name: &str) -> bool {
    name.strip_prefix("shard-")
        .and_then(|rest| rest.split_once(".tmp."))
        .is_some_and(|(index, _)| index.parse::<usize>().is_ok())
}

/// Append-only buffer of encoded snapshot records
#[derive(Debug, Default)]
pub struct RecordBuffer {
    bytes: Vec<u8>,
    count: u64,
}

impl RecordBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(bytes: usize) -> Self {
        Self {
            bytes: Vec::with_capacity(bytes),
            count: 0,
        }
    }

    #[inline]
    pub fn push(&mut self, key: &NodeKey, value: &[u8]) {
        self.bytes.extend_from_slice(key.as_bytes());
        self.bytes
            .extend_from_slice(&(value.len() as u32).to_le_bytes());
        self.bytes.extend_from_slice(value);
        self.count += 1;
    }

    pub fn len(&self) -> u64 {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

/// Iterator over the records of a validated payload
pub struct Records<'a> {
    payload: &'a [u8],
    offset: usize,
}

impl<'a> Records<'a> {
    pub fn new(payload: &'a [u8]) -> Self {
        Self { payload, offset: 0 }
    }
}

impl<'a> Iterator for Records<'a> {
    /// `Err(offset)` marks a record that runs past the end of the payload
    type Item = std::result::Result<(NodeKey, &'a [u8]), usize>;

    fn next(&mut self) -> Option<Self::Item> {
        let rest = &self.payload[self.offset..];
        if rest.is_empty() {
            return None;
        }
        if rest.len() < RECORD_HEADER_LEN {
            let at = self.offset;
            self.offset = self.payload.len();
            return Some(Err(at));
        }

        let key = NodeKey::from_slice(&rest[..KEY_LEN])?;
        let mut len_bytes = [0u8; 4];
        len_bytes.copy_from_slice(&rest[KEY_LEN..RECORD_HEADER_LEN]);
        let len = u32::from_le_bytes(len_bytes) as usize;

        let end = RECORD_HEADER_LEN + len;
        if rest.len() < end {
            let at = self.offset;
            self.offset = self.payload.len();
            return Some(Err(at));
        }

        self.offset += end;
        Some(Ok((key, &rest[RECORD_HEADER_LEN..end])))
    }
}
