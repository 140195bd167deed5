#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use common::{blog_registry, fixture};
use keel_core::model::{DefaultValue, LoadStrategy, OnDelete, SemanticType, Value};
use keel_core::registry::descriptor::RelationshipShape;
use keel_core::{ExErrorKind, SchemaRegistry};
use keel_store::schema_file::{load_into, parse_schema_file, parse_schema_str, to_definitions};

#[test]
fn test_blog_fixture_registers_in_dependency_order() {
    // Given: the blog schema file
    // When: it is loaded into a fresh registry
    let registry = blog_registry();

    // Then: parents come before children
    let order: Vec<&str> = registry
        .dependency_order()
        .into_iter()
        .map(|d| d.model.as_str())
        .collect();
    assert_eq!(order, vec!["User", "Post", "Tag"]);

    // And: the shared link table exists once
    assert_eq!(registry.associations().count(), 1);
    assert!(registry.association("post_tags").is_some());
}

#[test]
fn test_fields_carry_declared_options() {
    let file = parse_schema_file(&fixture("blog.yaml")).unwrap();
    let defs = to_definitions(&file).unwrap();
    let post = defs.iter().find(|d| d.name == "Post").unwrap();

    assert!(post.versioned);
    assert_eq!(post.unique_together, vec![vec!["title".to_string(), "author_id".to_string()]]);
    assert_eq!(post.get_field("created_at").unwrap().default, Some(DefaultValue::Now));
    assert_eq!(
        post.get_field("status").unwrap().default,
        Some(DefaultValue::Value(Value::Enum("Draft".to_string())))
    );
    assert!(matches!(
        post.get_field("meta").unwrap().ty,
        SemanticType::Custom(ref codec) if codec == "json"
    ));
    assert_eq!(
        post.get_field("author_id").unwrap().references.as_ref().unwrap().on_delete,
        OnDelete::Cascade
    );

    let user = defs.iter().find(|d| d.name == "User").unwrap();
    assert_eq!(
        user.get_field("perms").unwrap().default,
        Some(DefaultValue::Value(Value::Flags(1)))
    );
}

#[test]
fn test_relationship_shapes() {
    let registry = blog_registry();
    let post = registry.resolve("Post").unwrap();

    let author = post.relationship("author").unwrap();
    assert_eq!(author.strategy, LoadStrategy::Eager);
    assert!(matches!(author.shape, RelationshipShape::ManyToOne { .. }));

    let tags = post.relationship("tags").unwrap();
    match &tags.shape {
        RelationshipShape::ManyToMany { table, .. } => assert_eq!(table, "post_tags"),
        other => panic!("unexpected shape {:?}", other),
    }
}

#[test]
fn test_one_to_one_kinds_need_a_unique_key() {
    // Given: a one-to-one pair declared in a schema file
    let yaml = |unique: bool| {
        format!(
            r#"
schema_version: 0
models:
  - name: Author
    fields:
      - {{ name: id, type: integer, primary_key: true }}
    relationships:
      - {{ name: book, kind: one_to_one_back, target: Book, via: author_id, optional: true }}
  - name: Book
    fields:
      - {{ name: id, type: integer, primary_key: true }}
      - {{ name: author_id, type: integer, references: Author, unique: {} }}
    relationships:
      - {{ name: author, kind: one_to_one, target: Author, via: author_id }}
"#,
            unique
        )
    };

    // When: the key is unique
    let defs = to_definitions(&parse_schema_str(&yaml(true)).unwrap()).unwrap();
    let mut registry = SchemaRegistry::new();
    registry.register_all(defs).unwrap();

    // Then: both sides are single-valued
    let book = registry.resolve("Author").unwrap().relationship("book").unwrap();
    assert!(!book.is_collection());
    assert!(matches!(
        &book.shape,
        RelationshipShape::OneToOneBack { remote_column } if remote_column == "author_id"
    ));
    let author = registry.resolve("Book").unwrap().relationship("author").unwrap();
    assert!(matches!(author.shape, RelationshipShape::OneToOne { .. }));

    // And: a non-unique key is rejected at registration
    let defs = to_definitions(&parse_schema_str(&yaml(false)).unwrap()).unwrap();
    let err = SchemaRegistry::new().register_all(defs).unwrap_err();
    assert!(err.to_string().contains("unique"));
}

#[test]
fn test_unknown_enum_reference_rejected() {
    let file = parse_schema_str(
        r#"
schema_version: 0
models:
  - name: Task
    fields:
      - { name: id, type: integer, primary_key: true }
      - { name: state, type: "enum:Missing" }
"#,
    )
    .unwrap();
    let err = to_definitions(&file).unwrap_err();
    assert_eq!(err.kind(), ExErrorKind::InvalidSchema);
    assert!(err.message().contains("Task.state"));
}

#[test]
fn test_unknown_keys_rejected() {
    let err = parse_schema_str(
        r#"
schema_version: 0
models:
  - name: Task
    colour: red
    fields:
      - { name: id, type: integer, primary_key: true }
"#,
    )
    .unwrap_err();
    assert!(err.message().contains("YAML parse error"));
}

#[test]
fn test_unregistered_reference_stores_nothing() {
    // Given: a file whose only model references a model that is not declared
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.yaml");
    std::fs::write(
        &path,
        r#"
schema_version: 0
models:
  - name: Order
    fields:
      - { name: id, type: integer, primary_key: true }
      - { name: customer_id, type: integer, references: Customer }
"#,
    )
    .unwrap();

    // When: it is loaded
    let mut registry = SchemaRegistry::new();
    let err = load_into(&mut registry, &path).unwrap_err();

    // Then: registration fails as a schema error and nothing is stored
    assert_eq!(err.kind(), ExErrorKind::InvalidSchema);
    assert!(registry.is_empty());
}

#[test]
fn test_missing_file_is_io_error() {
    let err = parse_schema_file(&fixture("does-not-exist.yaml")).unwrap_err();
    assert_eq!(err.kind(), ExErrorKind::Io);
}
