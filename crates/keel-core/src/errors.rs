use thiserror::Error;

/// Result type alias using KeelError
pub type Result<T> = std::result::Result<T, KeelError>;

// ========== Error Facility ==========

/// Coarse error families surfaced to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    Schema,
    Query,
    Reference,
    Constraint,
    Concurrency,
    Validation,
    Session,
    Infrastructure,
}

/// Canonical error kind taxonomy
///
/// Every error produced anywhere in Keel is classified by exactly one kind.
/// Each kind maps to a stable error code usable for programmatic handling
/// and test assertions, and to one [`ErrorCategory`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExErrorKind {
    // Schema
    DuplicateModel,
    InvalidSchema,
    UnknownModel,
    ChecksumMismatch,

    // Query
    UnresolvedField,
    TypeMismatch,
    InvalidQuery,
    MultipleResults,

    // Reference
    DanglingReference,
    AmbiguousReference,

    // Constraint
    ConstraintViolation,
    DuplicateKey,

    // Concurrency
    StaleWrite,
    Timeout,

    // Validation
    Validation,

    // Session
    ForeignInstance,
    DetachedInstance,
    SessionClosed,
    InvalidOperation,

    // Infrastructure
    Persistence,
    Serialization,
    Io,
    Internal,
}

impl ExErrorKind {
    /// Get the stable error code for this kind
    pub fn code(&self) -> &'static str {
        match self {
            ExErrorKind::DuplicateModel => "ERR_DUPLICATE_MODEL",
            ExErrorKind::InvalidSchema => "ERR_INVALID_SCHEMA",
            ExErrorKind::UnknownModel => "ERR_UNKNOWN_MODEL",
            ExErrorKind::ChecksumMismatch => "ERR_CHECKSUM_MISMATCH",
            ExErrorKind::UnresolvedField => "ERR_UNRESOLVED_FIELD",
            ExErrorKind::TypeMismatch => "ERR_TYPE_MISMATCH",
            ExErrorKind::InvalidQuery => "ERR_INVALID_QUERY",
            ExErrorKind::MultipleResults => "ERR_MULTIPLE_RESULTS",
            ExErrorKind::DanglingReference => "ERR_DANGLING_REFERENCE",
            ExErrorKind::AmbiguousReference => "ERR_AMBIGUOUS_REFERENCE",
            ExErrorKind::ConstraintViolation => "ERR_CONSTRAINT_VIOLATION",
            ExErrorKind::DuplicateKey => "ERR_DUPLICATE_KEY",
            ExErrorKind::StaleWrite => "ERR_STALE_WRITE",
            ExErrorKind::Timeout => "ERR_TIMEOUT",
            ExErrorKind::Validation => "ERR_VALIDATION",
            ExErrorKind::ForeignInstance => "ERR_FOREIGN_INSTANCE",
            ExErrorKind::DetachedInstance => "ERR_DETACHED_INSTANCE",
            ExErrorKind::SessionClosed => "ERR_SESSION_CLOSED",
            ExErrorKind::InvalidOperation => "ERR_INVALID_OPERATION",
            ExErrorKind::Persistence => "ERR_PERSISTENCE",
            ExErrorKind::Serialization => "ERR_SERIALIZATION",
            ExErrorKind::Io => "ERR_IO",
            ExErrorKind::Internal => "ERR_INTERNAL",
        }
    }

    /// Get the family this kind belongs to
    pub fn category(&self) -> ErrorCategory {
        match self {
            ExErrorKind::DuplicateModel
            | ExErrorKind::InvalidSchema
            | ExErrorKind::UnknownModel
            | ExErrorKind::ChecksumMismatch => ErrorCategory::Schema,
            ExErrorKind::UnresolvedField
            | ExErrorKind::TypeMismatch
            | ExErrorKind::InvalidQuery
            | ExErrorKind::MultipleResults => ErrorCategory::Query,
            ExErrorKind::DanglingReference | ExErrorKind::AmbiguousReference => {
                ErrorCategory::Reference
            }
            ExErrorKind::ConstraintViolation | ExErrorKind::DuplicateKey => {
                ErrorCategory::Constraint
            }
            ExErrorKind::StaleWrite | ExErrorKind::Timeout => ErrorCategory::Concurrency,
            ExErrorKind::Validation => ErrorCategory::Validation,
            ExErrorKind::ForeignInstance
            | ExErrorKind::DetachedInstance
            | ExErrorKind::SessionClosed
            | ExErrorKind::InvalidOperation => ErrorCategory::Session,
            ExErrorKind::Persistence
            | ExErrorKind::Serialization
            | ExErrorKind::Io
            | ExErrorKind::Internal => ErrorCategory::Infrastructure,
        }
    }
}

/// Canonical structured error type
///
/// Carries the classification used for programmatic handling plus the
/// mapping context (model, field, key, operation) needed to find the
/// offending instance or statement.
#[derive(Debug, Clone)]
pub struct ExError {
    kind: ExErrorKind,
    op: Option<String>,
    model: Option<String>,
    field: Option<String>,
    key: Option<String>,
    message: String,
    source: Option<Box<ExError>>,
}

impl ExError {
    /// Create a new error with the specified kind
    pub fn new(kind: ExErrorKind) -> Self {
        Self {
            kind,
            op: None,
            model: None,
            field: None,
            key: None,
            message: String::new(),
            source: None,
        }
    }

    /// Add operation context
    pub fn with_op(mut self, op: impl Into<String>) -> Self {
        self.op = Some(op.into());
        self
    }

    /// Add model context
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Add field (or relationship) context
    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    /// Add primary-key context
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Add custom message
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// Add source error
    pub fn with_source(mut self, source: ExError) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Get the error kind
    pub fn kind(&self) -> ExErrorKind {
        self.kind
    }

    /// Get the error family
    pub fn category(&self) -> ErrorCategory {
        self.kind.category()
    }

    /// Get the stable error code
    pub fn code(&self) -> &'static str {
        self.kind.code()
    }

    pub fn op(&self) -> Option<&str> {
        self.op.as_deref()
    }

    pub fn model(&self) -> Option<&str> {
        self.model.as_deref()
    }

    pub fn field(&self) -> Option<&str> {
        self.field.as_deref()
    }

    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    /// Get the error message
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Get the source error, if any
    pub fn source_error(&self) -> Option<&ExError> {
        self.source.as_deref()
    }
}

impl std::fmt::Display for ExError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {:?}", self.code(), self.kind)?;
        if let Some(op) = &self.op {
            write!(f, " in operation '{}'", op)?;
        }
        if !self.message.is_empty() {
            write!(f, ": {}", self.message)?;
        }
        if let Some(model) = &self.model {
            write!(f, " (model: {})", model)?;
        }
        if let Some(field) = &self.field {
            write!(f, " (field: {})", field)?;
        }
        if let Some(key) = &self.key {
            write!(f, " (key: {})", key)?;
        }
        Ok(())
    }
}

impl std::error::Error for ExError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_deref()
            .map(|s| s as &(dyn std::error::Error + 'static))
    }
}

// ========== End Error Facility ==========

/// Typed errors raised by the in-memory kernel
#[derive(Error, Debug, Clone, PartialEq)]
pub enum KeelError {
    // ===== Schema Errors =====
    /// Model name already registered with a different definition
    #[error("Model {model} is already registered with a conflicting definition")]
    DuplicateModel { model: String },

    /// Model definition cannot be mapped to a table
    #[error("Invalid schema for model {model}: {reason}")]
    InvalidSchema { model: String, reason: String },

    /// Model name not present in the registry
    #[error("Unknown model: {model}")]
    UnknownModel { model: String },

    // ===== Query Errors =====
    /// Field or relationship path does not exist on the model
    #[error("Unresolved field '{path}' on model {model}")]
    UnresolvedField { model: String, path: String },

    /// Literal does not match the field's semantic type
    #[error("Type mismatch on {model}.{field}: expected {expected}, found {found}")]
    TypeMismatch {
        model: String,
        field: String,
        expected: String,
        found: String,
    },

    /// Query shape not supported for the requested operation
    #[error("Invalid query on model {model}: {reason}")]
    InvalidQuery { model: String, reason: String },

    /// A single-row lookup matched several rows
    #[error("Expected at most one {model}, found {count}")]
    MultipleResults { model: String, count: usize },

    // ===== Reference Errors =====
    /// Foreign key points at a row that does not exist
    #[error("Dangling reference {model}.{relationship} -> {target}")]
    DanglingReference {
        model: String,
        relationship: String,
        target: String,
    },

    /// Relationship target given in two conflicting ways
    #[error("Ambiguous reference {model}.{relationship}: {reason}")]
    AmbiguousReference {
        model: String,
        relationship: String,
        reason: String,
    },

    // ===== Constraint Errors =====
    /// Another tracked instance already holds this key
    #[error("Duplicate key {key} for model {model}")]
    DuplicateKey { model: String, key: String },

    // ===== Validation Errors =====
    /// Field value rejected by the validator
    #[error("Validation failed for {model}.{field}: {reason}")]
    Validation {
        model: String,
        field: String,
        reason: String,
    },

    // ===== Session Errors =====
    /// Handle belongs to a different session
    #[error("Instance {handle} belongs to another session")]
    ForeignInstance { handle: String },

    /// Handle no longer refers to a tracked instance
    #[error("Instance {handle} is detached")]
    DetachedInstance { handle: String },

    /// Operation not allowed in the instance's current state
    #[error("Invalid operation: {reason}")]
    InvalidOperation { reason: String },

    // ===== Infrastructure Errors =====
    #[error("Serialization error: {reason}")]
    Serialization { reason: String },

    #[error("Internal error: {reason}")]
    Internal { reason: String },
}

impl From<serde_json::Error> for KeelError {
    fn from(err: serde_json::Error) -> Self {
        KeelError::Serialization {
            reason: err.to_string(),
        }
    }
}

impl From<KeelError> for ExError {
    fn from(err: KeelError) -> Self {
        let message = err.to_string();
        match err {
            KeelError::DuplicateModel { model } => ExError::new(ExErrorKind::DuplicateModel)
                .with_op("register")
                .with_model(model)
                .with_message(message),
            KeelError::InvalidSchema { model, .. } => ExError::new(ExErrorKind::InvalidSchema)
                .with_op("register")
                .with_model(model)
                .with_message(message),
            KeelError::UnknownModel { model } => ExError::new(ExErrorKind::UnknownModel)
                .with_op("resolve")
                .with_model(model)
                .with_message(message),
            KeelError::UnresolvedField { model, path } => {
                ExError::new(ExErrorKind::UnresolvedField)
                    .with_op("compile")
                    .with_model(model)
                    .with_field(path)
                    .with_message(message)
            }
            KeelError::TypeMismatch { model, field, .. } => ExError::new(ExErrorKind::TypeMismatch)
                .with_op("compile")
                .with_model(model)
                .with_field(field)
                .with_message(message),
            KeelError::InvalidQuery { model, .. } => ExError::new(ExErrorKind::InvalidQuery)
                .with_op("compile")
                .with_model(model)
                .with_message(message),
            KeelError::MultipleResults { model, .. } => {
                ExError::new(ExErrorKind::MultipleResults)
                    .with_model(model)
                    .with_message(message)
            }
            KeelError::DanglingReference {
                model,
                relationship,
                target,
            } => ExError::new(ExErrorKind::DanglingReference)
                .with_op("resolve")
                .with_model(model)
                .with_field(relationship)
                .with_key(target)
                .with_message(message),
            KeelError::AmbiguousReference {
                model,
                relationship,
                ..
            } => ExError::new(ExErrorKind::AmbiguousReference)
                .with_model(model)
                .with_field(relationship)
                .with_message(message),
            KeelError::DuplicateKey { model, key } => ExError::new(ExErrorKind::DuplicateKey)
                .with_model(model)
                .with_key(key)
                .with_message(message),
            KeelError::Validation { model, field, .. } => ExError::new(ExErrorKind::Validation)
                .with_op("validate")
                .with_model(model)
                .with_field(field)
                .with_message(message),
            KeelError::ForeignInstance { handle } => ExError::new(ExErrorKind::ForeignInstance)
                .with_key(handle)
                .with_message(message),
            KeelError::DetachedInstance { handle } => {
                ExError::new(ExErrorKind::DetachedInstance)
                    .with_key(handle)
                    .with_message(message)
            }
            KeelError::InvalidOperation { .. } => {
                ExError::new(ExErrorKind::InvalidOperation).with_message(message)
            }
            KeelError::Serialization { .. } => {
                ExError::new(ExErrorKind::Serialization).with_message(message)
            }
            KeelError::Internal { .. } => ExError::new(ExErrorKind::Internal).with_message(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_unique() {
        let kinds = [
            ExErrorKind::DuplicateModel,
            ExErrorKind::InvalidSchema,
            ExErrorKind::UnknownModel,
            ExErrorKind::ChecksumMismatch,
            ExErrorKind::UnresolvedField,
            ExErrorKind::TypeMismatch,
            ExErrorKind::InvalidQuery,
            ExErrorKind::MultipleResults,
            ExErrorKind::DanglingReference,
            ExErrorKind::AmbiguousReference,
            ExErrorKind::ConstraintViolation,
            ExErrorKind::DuplicateKey,
            ExErrorKind::StaleWrite,
            ExErrorKind::Timeout,
            ExErrorKind::Validation,
            ExErrorKind::ForeignInstance,
            ExErrorKind::DetachedInstance,
            ExErrorKind::SessionClosed,
            ExErrorKind::InvalidOperation,
            ExErrorKind::Persistence,
            ExErrorKind::Serialization,
            ExErrorKind::Io,
            ExErrorKind::Internal,
        ];
        let codes: std::collections::HashSet<_> = kinds.iter().map(|k| k.code()).collect();
        assert_eq!(codes.len(), kinds.len());
    }

    #[test]
    fn test_display_includes_context() {
        let err = ExError::new(ExErrorKind::ConstraintViolation)
            .with_op("insert")
            .with_model("User")
            .with_key("7")
            .with_message("UNIQUE constraint failed: user.email");
        let text = err.to_string();
        assert!(text.starts_with("[ERR_CONSTRAINT_VIOLATION]"));
        assert!(text.contains("in operation 'insert'"));
        assert!(text.contains("UNIQUE constraint failed: user.email"));
        assert!(text.contains("(model: User)"));
        assert!(text.contains("(key: 7)"));
    }

    #[test]
    fn test_source_chain_is_exposed() {
        use std::error::Error;
        let inner = ExError::new(ExErrorKind::Timeout).with_message("database is locked");
        let outer = ExError::new(ExErrorKind::Persistence).with_source(inner);
        let source = outer.source().map(|s| s.to_string()).unwrap_or_default();
        assert!(source.contains("ERR_TIMEOUT"));
        assert_eq!(outer.source_error().map(ExError::kind), Some(ExErrorKind::Timeout));
    }
}
