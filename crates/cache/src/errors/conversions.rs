//! Error conversion utilities

use super::types::{CacheError, RecoveryHint};
use std::path::PathBuf;
use std::time::Duration;

impl From<std::io::Error> for CacheError {
    fn from(error: std::io::Error) -> Self {
        use std::io::ErrorKind;

        let recovery_hint = match error.kind() {
            ErrorKind::PermissionDenied => RecoveryHint::CheckPermissions {
                path: PathBuf::from("."),
            },
            ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted => {
                RecoveryHint::Retry {
                    after: Duration::from_millis(100),
                }
            }
            ErrorKind::UnexpectedEof | ErrorKind::InvalidData => RecoveryHint::ClearAndRetry,
            _ => RecoveryHint::None,
        };

        Self::Io {
            path: PathBuf::from("."),
            operation: "unknown",
            source: error,
            recovery_hint,
        }
    }
}
