// Integration tests for flushing the unit of work to SQLite.
// Covers dependency ordering, cycle breaking, many-to-many links,
// constraint failures and retry after a failed flush.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use common::{blog_registry, memory_session, memory_storage, node_registry, FailingStorage};
use keel_core::query::{col, Query};
use keel_core::{ExErrorKind, InstanceState, KeyValue, NewInstance, Value};
use keel_engine::{Session, SessionOptions};
use std::sync::Arc;

fn user(email: &str) -> NewInstance {
    NewInstance::new("User").set("email", email)
}

#[test]
fn test_parent_and_child_round_trip() {
    // Given a pending user and a post linked to it by handle
    let registry = blog_registry();
    let mut session = memory_session(&registry);
    let alice = session.add(user("a@x.com").set("name", "Alice")).unwrap();
    let post = session
        .add(NewInstance::new("Post").set("title", "Hello").link("author", alice))
        .unwrap();

    // When flushing
    let report = session.flush().unwrap();

    // Then the user is inserted before the post and the FK is filled in
    let kinds: Vec<(&str, &str)> = report
        .operations
        .iter()
        .map(|op| (op.kind.as_str(), op.model.as_str()))
        .collect();
    assert_eq!(kinds, vec![("insert", "User"), ("insert", "Post")]);
    assert_eq!(report.inserted, 2);
    assert!(report.flush_id.is_some());

    let alice_id = session.value(alice, "id").unwrap();
    assert!(matches!(alice_id, Value::Integer(_)));
    assert_eq!(session.value(post, "author_id").unwrap(), alice_id);
    assert_eq!(session.instance(post).unwrap().state(), InstanceState::Persistent);
    assert_eq!(session.instance(post).unwrap().version(), Some(1));
    assert!(session.pending_changes().is_empty());

    // And a fresh read of the row agrees
    session.commit().unwrap();
    let found = session
        .query(&Query::new("Post").filter(col("author.email").eq("a@x.com")))
        .unwrap();
    assert_eq!(found, vec![post]);
}

#[test]
fn test_collection_side_link_repoints_pending_child() {
    // Given a post that requires an author
    let registry = blog_registry();
    let mut session = memory_session(&registry);
    let post = session.add(NewInstance::new("Post").set("title", "First")).err();
    // A post without an author is rejected up front
    assert_eq!(post.unwrap().kind(), ExErrorKind::Validation);

    let alice = session.add(user("a@x.com")).unwrap();
    let post = session
        .add(NewInstance::new("Post").set("title", "First").link("author", alice))
        .unwrap();
    let bob = session.add(user("b@x.com")).unwrap();
    session.link(bob, "posts", post).unwrap();

    // When flushing
    session.flush().unwrap();

    // Then the post belongs to bob, the last link applied
    assert_eq!(session.value(post, "author_id").unwrap(), session.value(bob, "id").unwrap());
}

#[test]
fn test_self_reference_cycle_is_broken_with_relink() {
    // Given two pending users mentoring each other
    let registry = blog_registry();
    let mut session = memory_session(&registry);
    let ann = session.add(user("ann@x.com")).unwrap();
    let ben = session.add(user("ben@x.com").link("mentor", ann)).unwrap();
    session.link(ann, "mentor", ben).unwrap();

    // When flushing
    let report = session.flush().unwrap();

    // Then one FK was written after both rows existed
    assert_eq!(report.inserted, 2);
    assert!(report.operations.iter().any(|op| op.kind == "relink"));
    assert_eq!(session.value(ann, "mentor_id").unwrap(), session.value(ben, "id").unwrap());
    assert_eq!(session.value(ben, "mentor_id").unwrap(), session.value(ann, "id").unwrap());

    // And both directions resolve from a fresh session over the same data
    session.commit().unwrap();
    let ann_id = session.value(ann, "id").unwrap();
    let ben_id = session.value(ben, "id").unwrap();
    session.rollback().unwrap();
    let ann = session.get("User", KeyValue::from_value(&ann_id).unwrap()).unwrap().unwrap();
    let mentor = session.resolve(ann, "mentor").unwrap().one().unwrap();
    assert_eq!(session.value(mentor, "id").unwrap(), ben_id);
    let back = session.resolve(mentor, "mentor").unwrap().one().unwrap();
    assert_eq!(back, ann);
}

#[test]
fn test_deletes_run_children_first() {
    // Given a stored user with one post
    let registry = blog_registry();
    let mut session = memory_session(&registry);
    let alice = session.add(user("a@x.com")).unwrap();
    let post = session
        .add(NewInstance::new("Post").set("title", "Bye").link("author", alice))
        .unwrap();
    session.flush().unwrap();

    // When deleting the parent before the child
    session.delete(alice).unwrap();
    session.delete(post).unwrap();
    let report = session.flush().unwrap();

    // Then the restricting post row goes first
    let deleted: Vec<&str> = report
        .operations
        .iter()
        .filter(|op| op.kind == "delete")
        .map(|op| op.model.as_str())
        .collect();
    assert_eq!(deleted, vec!["Post", "User"]);
    assert_eq!(
        session.instance(alice).unwrap_err().kind(),
        ExErrorKind::DetachedInstance
    );
    assert!(session.query(&Query::new("User")).unwrap().is_empty());
}

#[test]
fn test_deleting_pending_instance_issues_nothing() {
    let registry = blog_registry();
    let mut session = memory_session(&registry);
    let ghost = session.add(user("ghost@x.com")).unwrap();

    session.delete(ghost).unwrap();
    let report = session.flush().unwrap();

    assert!(report.is_empty());
    assert_eq!(session.tracked(), 0);
}

#[test]
fn test_update_writes_only_dirty_fields_and_bumps_version() {
    // Given a stored post
    let registry = blog_registry();
    let mut session = memory_session(&registry);
    let alice = session.add(user("a@x.com")).unwrap();
    let post = session
        .add(NewInstance::new("Post").set("title", "Draft").link("author", alice))
        .unwrap();
    session.flush().unwrap();

    // When the title changes
    session.set(post, "title", "Final").unwrap();
    let report = session.flush().unwrap();

    // Then one update is issued and the version moves on
    assert_eq!(report.updated, 1);
    assert_eq!(report.inserted, 0);
    assert_eq!(session.instance(post).unwrap().version(), Some(2));
    assert!(!session.instance(post).unwrap().is_dirty());
}

#[test]
fn test_many_to_many_link_and_unlink() {
    // Given a stored post and two tags
    let registry = blog_registry();
    let mut session = memory_session(&registry);
    let alice = session.add(user("a@x.com")).unwrap();
    let post = session
        .add(NewInstance::new("Post").set("title", "Tagged").link("author", alice))
        .unwrap();
    let rust = session.add(NewInstance::new("Tag").set("label", "rust")).unwrap();
    let orm = session.add(NewInstance::new("Tag").set("label", "orm")).unwrap();
    session.link(post, "tags", rust).unwrap();
    session.link(post, "tags", orm).unwrap();

    // When flushing
    let report = session.flush().unwrap();

    // Then link rows follow both inserts
    assert_eq!(report.linked, 2);
    let last_insert = report.operations.iter().rposition(|op| op.kind == "insert").unwrap();
    let first_link = report.operations.iter().position(|op| op.kind == "link").unwrap();
    assert!(last_insert < first_link);
    assert_eq!(session.resolve(post, "tags").unwrap().many(), &[rust, orm]);
    assert_eq!(session.resolve(rust, "posts").unwrap().many(), &[post]);

    // When one tag is unlinked
    session.unlink(post, "tags", rust).unwrap();
    let report = session.flush().unwrap();

    // Then only the other remains
    assert_eq!(report.unlinked, 1);
    assert_eq!(session.resolve(post, "tags").unwrap().many(), &[orm]);
}

#[test]
fn test_unique_violation_keeps_changes_for_retry() {
    // Given two pending users sharing an email
    let registry = blog_registry();
    let mut session = memory_session(&registry);
    let first = session.add(user("dup@x.com")).unwrap();
    let second = session.add(user("dup@x.com")).unwrap();

    // When flushing
    let err = session.flush().unwrap_err();

    // Then the store's constraint error surfaces with model context
    assert_eq!(err.kind(), ExErrorKind::ConstraintViolation);
    assert_eq!(err.model(), Some("User"));
    assert!(err.message().contains("UNIQUE constraint failed: user.email"));

    // And nothing was written, nothing was settled
    assert_eq!(session.pending_changes().len(), 2);
    assert_eq!(session.instance(first).unwrap().state(), InstanceState::Pending);
    assert_eq!(session.value(first, "id").unwrap(), Value::Null);

    // When the conflict is fixed, the retry succeeds
    session.set(second, "email", "other@x.com").unwrap();
    let report = session.flush().unwrap();
    assert_eq!(report.inserted, 2);
    assert_eq!(session.query(&Query::new("User")).unwrap().len(), 2);
}

#[test]
fn test_unique_violation_leaves_committed_row_intact() {
    // Given a user flushed and committed
    let registry = blog_registry();
    let mut session = memory_session(&registry);
    let first = session.add(user("taken@x.com")).unwrap();
    session.flush().unwrap();
    session.commit().unwrap();
    let first_id = session.value(first, "id").unwrap();

    // When a second user with the same email is flushed
    let second = session.add(user("taken@x.com")).unwrap();
    let err = session.flush().unwrap_err();

    // Then the store rejects it
    assert_eq!(err.kind(), ExErrorKind::ConstraintViolation);
    assert_eq!(err.model(), Some("User"));

    // And the first user keeps its state, key and row
    let instance = session.instance(first).unwrap();
    assert_eq!(instance.state(), InstanceState::Persistent);
    assert_eq!(instance.key(), Some(&KeyValue::Integer(1)));
    assert_eq!(first_id, Value::Integer(1));
    session.expunge(second).unwrap();
    let stored = session
        .query(&Query::new("User").filter(col("email").eq("taken@x.com")))
        .unwrap();
    assert_eq!(stored, vec![first]);
}

#[test]
fn test_self_referencing_deletes_remove_children_first() {
    // Given a committed parent node with one child
    let registry = node_registry();
    let mut session = memory_session(&registry);
    let parent = session
        .add(NewInstance::new("Node").set("label", "root"))
        .unwrap();
    let child = session
        .add(NewInstance::new("Node").set("label", "leaf").link("parent", parent))
        .unwrap();
    session.commit().unwrap();

    // When deleting the parent before the child
    session.delete(parent).unwrap();
    session.delete(child).unwrap();
    let report = session.flush().unwrap();

    // Then the child row goes first and both are gone
    let keys: Vec<Option<&str>> = report.operations.iter().map(|op| op.key.as_deref()).collect();
    assert_eq!(keys, vec![Some("2"), Some("1")]);
    assert_eq!(report.deleted, 2);
    assert!(session.query(&Query::new("Node")).unwrap().is_empty());
}

#[test]
fn test_storage_failure_mid_flush_rolls_back_and_retries() {
    // Given storage that fails the first post insert
    let registry = blog_registry();
    let (storage, log) = FailingStorage::new(memory_storage(&registry), "INSERT INTO \"post\"");
    let mut session =
        Session::open(Arc::clone(&registry), Box::new(storage), SessionOptions::default()).unwrap();
    let alice = session.add(user("a@x.com")).unwrap();
    let post = session
        .add(NewInstance::new("Post").set("title", "Retry").link("author", alice))
        .unwrap();

    // When the first flush fails after the user row was written
    let err = session.flush().unwrap_err();

    // Then the error names the failing step and the user insert was undone
    assert_eq!(err.kind(), ExErrorKind::Persistence);
    assert_eq!(err.op(), Some("insert"));
    assert_eq!(err.model(), Some("Post"));
    assert_eq!(session.instance(alice).unwrap().state(), InstanceState::Pending);
    assert_eq!(session.pending_changes().len(), 2);

    // When retrying
    session.flush().unwrap();

    // Then both rows exist exactly once
    assert_eq!(session.query(&Query::new("User")).unwrap(), vec![alice]);
    assert_eq!(session.query(&Query::new("Post")).unwrap(), vec![post]);
    let statements = log.lock().unwrap();
    assert_eq!(
        statements.iter().filter(|s| s.starts_with("INSERT INTO \"user\"")).count(),
        2
    );
}

#[test]
fn test_link_to_expunged_instance_is_dangling() {
    // Given a post linked to a user that is then dropped from the session
    let registry = blog_registry();
    let mut session = memory_session(&registry);
    let alice = session.add(user("a@x.com")).unwrap();
    session
        .add(NewInstance::new("Post").set("title", "Orphan").link("author", alice))
        .unwrap();
    session.expunge(alice).unwrap();

    // When flushing
    let err = session.flush().unwrap_err();

    // Then the reference is reported as dangling
    assert_eq!(err.kind(), ExErrorKind::DanglingReference);
}

#[test]
fn test_autoflush_makes_pending_rows_visible_to_queries() {
    let registry = blog_registry();

    let mut eager = memory_session(&registry);
    eager.add(user("a@x.com")).unwrap();
    assert_eq!(eager.query(&Query::new("User")).unwrap().len(), 1);

    let mut manual = Session::open(
        Arc::clone(&registry),
        Box::new(memory_storage(&registry)),
        SessionOptions::default().autoflush(false),
    )
    .unwrap();
    manual.add(user("a@x.com")).unwrap();
    assert!(manual.query(&Query::new("User")).unwrap().is_empty());
    assert_eq!(manual.pending_changes().len(), 1);
}
