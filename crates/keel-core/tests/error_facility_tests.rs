use keel_core::errors::{ErrorCategory, ExError, ExErrorKind, KeelError};

#[test]
fn test_unknown_model_verifiable_by_kind() {
    let err = KeelError::UnknownModel {
        model: "Ghost".to_string(),
    };

    let ex_err: ExError = err.into();

    assert_eq!(ex_err.kind(), ExErrorKind::UnknownModel);
    assert_eq!(ex_err.code(), "ERR_UNKNOWN_MODEL");
    assert_eq!(ex_err.category(), ErrorCategory::Schema);
    assert_eq!(ex_err.model(), Some("Ghost"));
}

#[test]
fn test_type_mismatch_carries_field() {
    let err = KeelError::TypeMismatch {
        model: "Post".to_string(),
        field: "title".to_string(),
        expected: "text".to_string(),
        found: "integer".to_string(),
    };

    let ex_err: ExError = err.into();

    assert_eq!(ex_err.kind(), ExErrorKind::TypeMismatch);
    assert_eq!(ex_err.category(), ErrorCategory::Query);
    assert_eq!(ex_err.field(), Some("title"));
    assert!(ex_err.message().contains("expected text, found integer"));
}

#[test]
fn test_dangling_reference_identifies_target() {
    let err = KeelError::DanglingReference {
        model: "Post".to_string(),
        relationship: "author".to_string(),
        target: "User#7".to_string(),
    };

    let ex_err: ExError = err.into();

    assert_eq!(ex_err.kind(), ExErrorKind::DanglingReference);
    assert_eq!(ex_err.category(), ErrorCategory::Reference);
    assert_eq!(ex_err.field(), Some("author"));
    assert_eq!(ex_err.key(), Some("User#7"));
}

#[test]
fn test_ambiguous_reference_is_reference_error() {
    let ex_err: ExError = KeelError::AmbiguousReference {
        model: "Post".to_string(),
        relationship: "author".to_string(),
        reason: "'author_id' is given more than one target".to_string(),
    }
    .into();
    assert_eq!(ex_err.category(), ErrorCategory::Reference);
    assert_eq!(ex_err.code(), "ERR_AMBIGUOUS_REFERENCE");
}

#[test]
fn test_session_errors_share_category() {
    for kind in [
        ExErrorKind::ForeignInstance,
        ExErrorKind::DetachedInstance,
        ExErrorKind::SessionClosed,
        ExErrorKind::InvalidOperation,
    ] {
        assert_eq!(kind.category(), ErrorCategory::Session);
    }
    assert_eq!(ExErrorKind::StaleWrite.category(), ErrorCategory::Concurrency);
    assert_eq!(ExErrorKind::Timeout.category(), ErrorCategory::Concurrency);
    assert_eq!(
        ExErrorKind::ConstraintViolation.category(),
        ErrorCategory::Constraint
    );
}

#[test]
fn test_builder_context_survives_display() {
    let err = ExError::new(ExErrorKind::StaleWrite)
        .with_op("update")
        .with_model("Post")
        .with_key("3")
        .with_message("row version 2 no longer current");

    let text = err.to_string();
    assert!(text.contains("ERR_STALE_WRITE"));
    assert!(text.contains("row version 2 no longer current"));
    assert_eq!(err.op(), Some("update"));
}

#[test]
fn test_serde_json_error_converts() {
    let parse: Result<serde_json::Value, _> = serde_json::from_str("{");
    let err: KeelError = parse.unwrap_err().into();
    let ex_err: ExError = err.into();
    assert_eq!(ex_err.kind(), ExErrorKind::Serialization);
}
