// Integration tests for the per-model repository facade and bulk deletes.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use common::{blog_registry, memory_session};
use keel_core::query::{col, Query};
use keel_core::{ExErrorKind, NewInstance};
use keel_engine::Repository;

#[test]
fn test_create_then_find_by_unique_email() {
    // Given a user created through the repository and committed
    let registry = blog_registry();
    let mut session = memory_session(&registry);
    let created = {
        let mut users = Repository::new(&mut session, "User");
        users
            .create(NewInstance::new("User").set("email", "a@x.com"))
            .unwrap()
    };
    session.commit().unwrap();

    // When looking it up by email
    let mut users = Repository::new(&mut session, "User");
    let found = users.get_by("email", "a@x.com").unwrap();
    let missing = users.get_by("email", "z@x.com").unwrap();

    // Then the same instance comes back
    assert_eq!(found, Some(created));
    assert_eq!(missing, None);
}

#[test]
fn test_get_by_refuses_non_unique_fields() {
    let registry = blog_registry();
    let mut session = memory_session(&registry);
    let mut users = Repository::new(&mut session, "User");

    let err = users.get_by("name", "Alice").unwrap_err();
    let unknown = users.get_by("nickname", "al").unwrap_err();

    assert_eq!(err.kind(), ExErrorKind::InvalidQuery);
    assert_eq!(unknown.kind(), ExErrorKind::UnresolvedField);
}

#[test]
fn test_repository_guards_its_model() {
    let registry = blog_registry();
    let mut session = memory_session(&registry);
    let tag = session.add(NewInstance::new("Tag").set("label", "rust")).unwrap();
    let mut users = Repository::new(&mut session, "User");

    let wrong_draft = users
        .create(NewInstance::new("Tag").set("label", "orm"))
        .unwrap_err();
    let wrong_delete = users.delete(tag).unwrap_err();

    assert_eq!(wrong_draft.kind(), ExErrorKind::InvalidOperation);
    assert_eq!(wrong_delete.kind(), ExErrorKind::InvalidOperation);
}

#[test]
fn test_all_and_select() {
    let registry = blog_registry();
    let mut session = memory_session(&registry);
    let mut users = Repository::new(&mut session, "User");
    let a = users
        .create(NewInstance::new("User").set("email", "a@x.com").set("name", "Ann"))
        .unwrap();
    let b = users
        .create(NewInstance::new("User").set("email", "b@x.com").set("name", "Ben"))
        .unwrap();

    assert_eq!(users.all().unwrap(), vec![a, b]);
    assert_eq!(users.select(col("name").eq("Ben")).unwrap(), vec![b]);
    assert_eq!(users.get(1_i64).unwrap(), Some(a));
}

#[test]
fn test_query_one_with_several_matches() {
    let registry = blog_registry();
    let mut session = memory_session(&registry);
    session.add(NewInstance::new("Tag").set("label", "a")).unwrap();
    session.add(NewInstance::new("Tag").set("label", "b")).unwrap();

    let err = session.query_one(&Query::new("Tag")).unwrap_err();

    assert_eq!(err.kind(), ExErrorKind::MultipleResults);
    assert_eq!(err.model(), Some("Tag"));
}

#[test]
fn test_bulk_delete_detaches_matching_instances() {
    // Given three stored tags, two of them tracked
    let registry = blog_registry();
    let mut session = memory_session(&registry);
    let rust = session.add(NewInstance::new("Tag").set("label", "rust")).unwrap();
    let orm = session.add(NewInstance::new("Tag").set("label", "orm")).unwrap();
    session.add(NewInstance::new("Tag").set("label", "sql")).unwrap();
    session.flush().unwrap();

    // When deleting every tag but one directly in storage
    let mut tags = Repository::new(&mut session, "Tag");
    let deleted = tags.bulk_delete(col("label").ne("orm")).unwrap();

    // Then the rows are gone and their instances are no longer tracked
    assert_eq!(deleted, 2);
    assert_eq!(
        session.instance(rust).unwrap_err().kind(),
        ExErrorKind::DetachedInstance
    );
    assert!(session.instance(orm).is_ok());
    assert_eq!(session.query(&Query::new("Tag")).unwrap(), vec![orm]);
}

#[test]
fn test_bulk_delete_without_matches() {
    let registry = blog_registry();
    let mut session = memory_session(&registry);

    let deleted = session
        .bulk_delete(&Query::new("Tag").filter(col("label").eq("none")))
        .unwrap();

    assert_eq!(deleted, 0);
}
