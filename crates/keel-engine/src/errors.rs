//! Error constructors for session-level failures

use keel_core::errors::{ExError, ExErrorKind};

/// Result type alias using ExError
pub type Result<T> = std::result::Result<T, ExError>;

pub fn session_closed(op: &str) -> ExError {
    ExError::new(ExErrorKind::SessionClosed)
        .with_op(op.to_string())
        .with_message("session is closed")
}

pub fn invalid_operation(op: &str, message: impl Into<String>) -> ExError {
    ExError::new(ExErrorKind::InvalidOperation)
        .with_op(op.to_string())
        .with_message(message)
}

pub fn stale_write(model: &str, key: &str, message: impl Into<String>) -> ExError {
    ExError::new(ExErrorKind::StaleWrite)
        .with_op("flush")
        .with_model(model.to_string())
        .with_key(key.to_string())
        .with_message(message)
}

pub fn dangling(model: &str, relationship: &str, target: impl Into<String>) -> ExError {
    ExError::new(ExErrorKind::DanglingReference)
        .with_model(model.to_string())
        .with_field(relationship.to_string())
        .with_key(target)
        .with_message(format!(
            "{}.{} points at a row that does not exist",
            model, relationship
        ))
}

/// Attach flush context to a storage failure
///
/// The storage message is kept verbatim; the operation, model and key of the
/// failing step are added around it.
pub fn in_step(err: ExError, op: &str, model: &str, key: Option<&str>) -> ExError {
    let message = err.message().to_string();
    let mut wrapped = ExError::new(err.kind())
        .with_op(op.to_string())
        .with_model(model.to_string())
        .with_message(message);
    if let Some(key) = key {
        wrapped = wrapped.with_key(key.to_string());
    }
    wrapped.with_source(err)
}
