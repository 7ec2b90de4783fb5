//! Core error type definitions

use std::path::PathBuf;
use std::time::Duration;

/// Result type for cache lifecycle operations
pub type Result<T> = std::result::Result<T, CacheError>;

/// Re-export CacheError as Error for convenience
pub use CacheError as Error;

/// Error type for cache lifecycle operations
#[derive(Debug)]
pub enum CacheError {
    /// I/O errors while reading or writing snapshot files
    Io {
        path: PathBuf,
        operation: &'static str,
        source: std::io::Error,
        recovery_hint: RecoveryHint,
    },

    /// Encoding or decoding of a snapshot header or config file failed
    Serialization {
        key: String,
        operation: SerializationOp,
        source: Box<dyn std::error::Error + Send + Sync>,
        recovery_hint: RecoveryHint,
    },

    /// Snapshot contents failed a magic, length or checksum check
    Corruption {
        key: String,
        reason: String,
        recovery_hint: RecoveryHint,
    },

    /// Snapshot written by an incompatible format version
    VersionMismatch {
        key: String,
        expected_version: u32,
        actual_version: u32,
        recovery_hint: RecoveryHint,
    },

    /// Invalid construction-time configuration
    Configuration {
        message: String,
        recovery_hint: RecoveryHint,
    },

    /// Lifecycle operation attempted on a closed cache
    Closed {
        operation: &'static str,
        recovery_hint: RecoveryHint,
    },
}

/// Suggested action for an operator or caller after an error
#[derive(Debug, Clone, PartialEq)]
pub enum RecoveryHint {
    /// Retry the operation after the given delay
    Retry { after: Duration },

    /// Check permissions on the given path
    CheckPermissions { path: PathBuf },

    /// Check disk space and clean up if needed
    CheckDiskSpace,

    /// Fall back to a default value
    UseDefault { value: String },

    /// Delete the offending file and start cold
    ClearAndRetry,

    /// Manual intervention required
    Manual { instructions: String },

    /// Nothing to do
    None,
}

/// Serialization operation types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SerializationOp {
    Encode,
    Decode,
}
