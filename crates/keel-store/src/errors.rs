//! Error handling for keel-store
//!
//! Maps `rusqlite` failures onto the canonical [`ExError`] kinds and
//! provides constructors for migration and schema-file errors.

use keel_core::errors::{ExError, ExErrorKind};
use rusqlite::ErrorCode;

/// Result type alias using ExError
pub type Result<T> = std::result::Result<T, ExError>;

/// Create a migration error
pub fn migration_error(table: &str, reason: &str) -> ExError {
    ExError::new(ExErrorKind::Persistence)
        .with_op("migrate")
        .with_message(format!("Creating table {} failed: {}", table, reason))
}

/// Create a checksum mismatch error
pub fn checksum_mismatch(table: &str, expected: &str, actual: &str) -> ExError {
    ExError::new(ExErrorKind::ChecksumMismatch)
        .with_op("migrate")
        .with_key(table.to_string())
        .with_message(format!(
            "Table {} was applied with checksum {} but the schema now renders {}",
            table, expected, actual
        ))
}

/// Create a schema file validation error
pub fn schema_file_error(reason: &str) -> ExError {
    ExError::new(ExErrorKind::InvalidSchema)
        .with_op("schema_file")
        .with_message(reason.to_string())
}

/// Create a configuration error
pub fn config_error(reason: &str) -> ExError {
    ExError::new(ExErrorKind::InvalidOperation)
        .with_op("store_config")
        .with_message(reason.to_string())
}

/// Map a rusqlite error onto the canonical kinds
///
/// Constraint failures keep the store's message verbatim so callers can see
/// which constraint fired.
pub fn from_rusqlite(err: rusqlite::Error) -> ExError {
    if let rusqlite::Error::SqliteFailure(failure, message) = &err {
        let text = message.clone().unwrap_or_else(|| err.to_string());
        match failure.code {
            ErrorCode::ConstraintViolation => {
                return ExError::new(ExErrorKind::ConstraintViolation)
                    .with_op("sqlite")
                    .with_message(text)
            }
            ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked => {
                return ExError::new(ExErrorKind::Timeout)
                    .with_op("sqlite")
                    .with_message(text)
            }
            _ => {}
        }
    }
    ExError::new(ExErrorKind::Persistence)
        .with_op("sqlite")
        .with_message(err.to_string())
}

/// Create an IO error
pub fn io_error(operation: &str, err: std::io::Error) -> ExError {
    ExError::new(ExErrorKind::Io)
        .with_op(operation.to_string())
        .with_message(err.to_string())
}
