#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use common::{blog_models, blog_registry, passport_registry};
use keel_core::model::{FieldDef, ModelDefinition, OnDelete, RelationshipDef};
use keel_core::registry::{RelationshipShape, VERSION_COLUMN};
use keel_core::model::StorageType;
use keel_core::{FieldCodec, KeelError, SchemaRegistry, Value};
use std::sync::Arc;

/// Stores text upper-cased
#[derive(Debug)]
struct ShoutCodec;

impl FieldCodec for ShoutCodec {
    fn storage_type(&self) -> StorageType {
        StorageType::Text
    }

    fn to_storage(&self, value: &Value) -> Result<Value, String> {
        value
            .as_str()
            .map(|s| Value::Text(s.to_uppercase()))
            .ok_or_else(|| format!("expected text, found {}", value.type_name()))
    }

    fn to_field(&self, stored: Value) -> Result<Value, String> {
        Ok(stored)
    }
}

#[test]
fn test_foreign_key_to_unregistered_model_stores_nothing() {
    // Given an empty registry
    let mut registry = SchemaRegistry::new();

    // When a batch references a model that is not part of it
    let err = registry
        .register_all(vec![
            ModelDefinition::new("User").field(FieldDef::integer("id").primary_key()),
            ModelDefinition::new("Post")
                .field(FieldDef::integer("id").primary_key())
                .field(FieldDef::foreign_key("owner_id", "Account")),
        ])
        .unwrap_err();

    // Then the batch fails with a schema error and nothing is registered
    assert!(matches!(err, KeelError::InvalidSchema { ref model, .. } if model == "Post"));
    assert!(registry.is_empty());
    assert!(matches!(
        registry.resolve("User"),
        Err(KeelError::UnknownModel { .. })
    ));
}

#[test]
fn test_identical_reregistration_is_noop() {
    let mut registry = blog_registry();
    let before = registry.resolve("Tag").unwrap().clone();

    let again = registry
        .register(blog_models().into_iter().find(|m| m.name == "Tag").unwrap())
        .unwrap();

    assert_eq!(again, before);
    assert_eq!(registry.models().count(), 4);
}

#[test]
fn test_conflicting_reregistration_rejected() {
    let mut registry = blog_registry();
    let err = registry
        .register(
            ModelDefinition::new("Tag")
                .field(FieldDef::integer("id").primary_key())
                .field(FieldDef::text("label")),
        )
        .unwrap_err();
    assert_eq!(
        err,
        KeelError::DuplicateModel {
            model: "Tag".to_string()
        }
    );
}

#[test]
fn test_dependency_order_parents_first() {
    let registry = blog_registry();
    let order: Vec<&str> = registry
        .dependency_order()
        .iter()
        .map(|d| d.model.as_str())
        .collect();
    assert_eq!(order, vec!["User", "Post", "Tag", "Comment"]);
}

#[test]
fn test_descriptor_shape() {
    let registry = blog_registry();
    let post = registry.resolve("Post").unwrap();

    assert_eq!(post.table, "post");
    assert_eq!(post.primary_key, "id");
    assert!(post.pk_column().unwrap().auto_increment);
    assert_eq!(post.version_column.as_deref(), Some(VERSION_COLUMN));
    assert_eq!(post.columns.last().unwrap().name, VERSION_COLUMN);

    let fk = post.foreign_key("author_id").unwrap();
    assert_eq!(fk.target_table, "user");
    assert_eq!(fk.target_column, "id");
    assert_eq!(fk.on_delete, OnDelete::Restrict);

    assert!(post.indexes.iter().any(|i| i.name == "ix_post_title" && !i.unique));
}

#[test]
fn test_shared_link_table_registered_once() {
    let registry = blog_registry();
    let links: Vec<_> = registry.associations().collect();
    assert_eq!(links.len(), 1);
    assert_eq!(links[0].table, "post_tags");
    assert_eq!(links[0].left.column, "post_id");
    assert_eq!(links[0].right.column, "tag_id");

    let tag = registry.resolve("Tag").unwrap();
    match &tag.relationship("posts").unwrap().shape {
        RelationshipShape::ManyToMany {
            local_column,
            remote_column,
            ..
        } => {
            assert_eq!(local_column, "tag_id");
            assert_eq!(remote_column, "post_id");
        }
        other => panic!("unexpected shape {:?}", other),
    }
}

#[test]
fn test_foreign_key_type_must_match_target_key() {
    let mut registry = SchemaRegistry::new();
    registry
        .register(ModelDefinition::new("Account").field(FieldDef::uuid("id").primary_key()))
        .unwrap();

    let err = registry
        .register(
            ModelDefinition::new("Session")
                .field(FieldDef::integer("id").primary_key())
                .field(FieldDef::foreign_key("account_id", "Account")),
        )
        .unwrap_err();

    assert!(matches!(
        err,
        KeelError::InvalidSchema { reason, .. } if reason.contains("account_id")
    ));
    assert!(!registry.contains("Session"));
}

#[test]
fn test_missing_and_duplicate_primary_keys() {
    let mut registry = SchemaRegistry::new();
    let none = registry
        .register(ModelDefinition::new("Note").field(FieldDef::text("body")))
        .unwrap_err();
    assert!(matches!(
        none,
        KeelError::InvalidSchema { reason, .. } if reason.contains("missing primary key")
    ));

    let two = registry
        .register(
            ModelDefinition::new("Note")
                .field(FieldDef::integer("a").primary_key())
                .field(FieldDef::integer("b").primary_key()),
        )
        .unwrap_err();
    assert!(matches!(two, KeelError::InvalidSchema { .. }));
}

#[test]
fn test_unknown_custom_codec_rejected() {
    let mut registry = SchemaRegistry::new();
    let err = registry
        .register(
            ModelDefinition::new("Doc")
                .field(FieldDef::integer("id").primary_key())
                .field(FieldDef::custom("payload", "msgpack")),
        )
        .unwrap_err();
    assert!(matches!(err, KeelError::InvalidSchema { reason, .. } if reason.contains("payload")));
}

#[test]
fn test_relationship_needs_matching_foreign_key() {
    let mut registry = SchemaRegistry::new();
    let err = registry
        .register_all(vec![
            ModelDefinition::new("User").field(FieldDef::integer("id").primary_key()),
            ModelDefinition::new("Post")
                .field(FieldDef::integer("id").primary_key())
                .field(FieldDef::integer("author_id"))
                .relationship(RelationshipDef::many_to_one("author", "User", "author_id")),
        ])
        .unwrap_err();
    assert!(matches!(err, KeelError::InvalidSchema { .. }));
    assert!(registry.is_empty());
}

#[test]
fn test_one_to_one_needs_unique_key() {
    // Given: a one-to-one whose foreign key is not unique
    let mut registry = SchemaRegistry::new();
    let err = registry
        .register_all(vec![
            ModelDefinition::new("Person").field(FieldDef::integer("id").primary_key()),
            ModelDefinition::new("Passport")
                .field(FieldDef::integer("id").primary_key())
                .field(FieldDef::foreign_key("holder_id", "Person"))
                .relationship(RelationshipDef::one_to_one("holder", "Person", "holder_id")),
        ])
        .unwrap_err();

    // Then: registration fails and nothing is stored
    assert!(matches!(err, KeelError::InvalidSchema { reason, .. } if reason.contains("unique")));
    assert!(registry.is_empty());

    // And: with a unique key both sides are single-valued
    let registry = passport_registry();
    let person = registry.resolve("Person").unwrap();
    let passport = person.relationship("passport").unwrap();
    assert!(!passport.is_collection());
    assert_eq!(passport.shape.back_column(), Some("holder_id"));
    let holder = registry.resolve("Passport").unwrap().relationship("holder").unwrap();
    assert_eq!(holder.shape.parent_columns(), Some(("holder_id", "id")));
    assert!(matches!(holder.shape, RelationshipShape::OneToOne { .. }));
}

#[test]
fn test_registries_are_independent() {
    let a = blog_registry();
    let b = SchemaRegistry::new();
    assert!(a.contains("User"));
    assert!(!b.contains("User"));
}

#[test]
fn test_registered_codec_maps_custom_fields() {
    // Given a registry with a custom codec
    let mut registry = SchemaRegistry::new();
    registry.register_codec("shout", Arc::new(ShoutCodec)).unwrap();

    // When a model uses it
    let descriptor = registry
        .register(
            ModelDefinition::new("Sign")
                .field(FieldDef::integer("id").primary_key())
                .field(FieldDef::custom("text", "shout")),
        )
        .unwrap();

    // Then values are encoded through the codec
    assert_eq!(descriptor.column("text").unwrap().storage, StorageType::Text);
    assert_eq!(
        registry
            .encode_column(&descriptor, "text", &Value::Text("stop".into()))
            .unwrap(),
        Value::Text("STOP".into())
    );

    // And the name cannot be taken twice
    let again = registry.register_codec("shout", Arc::new(ShoutCodec)).unwrap_err();
    assert!(matches!(again, KeelError::InvalidOperation { .. }));
    let builtin = registry.register_codec("json", Arc::new(ShoutCodec)).unwrap_err();
    assert!(matches!(builtin, KeelError::InvalidOperation { .. }));
}
