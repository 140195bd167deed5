//! CLI integration tests
//!
//! Run the `keel` binary against schema files written to a scratch
//! directory.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use rusqlite::Connection;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

const SCHEMA: &str = r#"
schema_version: 0
models:
  - name: Post
    fields:
      - { name: id, type: integer, primary_key: true }
      - { name: title, type: text, index: true }
      - { name: author_id, type: integer, references: User, on_delete: cascade }
    relationships:
      - { name: author, kind: many_to_one, target: User, via: author_id }
      - { name: tags, kind: many_to_many, target: Tag, link_table: post_tags }
  - name: User
    fields:
      - { name: id, type: integer, primary_key: true }
      - { name: email, type: email, unique: true }
  - name: Tag
    fields:
      - { name: id, type: integer, primary_key: true }
      - { name: label, type: text, unique: true }
"#;

fn write_schema(dir: &TempDir, content: &str) -> PathBuf {
    let path = dir.path().join("schema.yaml");
    fs::write(&path, content).unwrap();
    path
}

fn keel(args: &[&str], cwd: &Path) -> Output {
    Command::new(env!("CARGO_BIN_EXE_keel"))
        .current_dir(cwd)
        .args(args)
        .output()
        .expect("Failed to execute CLI")
}

#[test]
fn test_schema_check_lists_tables_parents_first() {
    // Given: a schema declaring Post before the User it references
    let dir = TempDir::new().unwrap();
    let schema = write_schema(&dir, SCHEMA);

    // When: checking it
    let output = keel(&["schema", "check", schema.to_str().unwrap()], dir.path());

    // Then: tables are listed in creation order
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    let user = stdout.find("User -> user").expect("user listed");
    let post = stdout.find("Post -> post").expect("post listed");
    assert!(user < post);
    assert!(stdout.contains("(link) post_tags"));
}

#[test]
fn test_schema_ddl_prints_create_statements() {
    let dir = TempDir::new().unwrap();
    let schema = write_schema(&dir, SCHEMA);

    let output = keel(&["schema", "ddl", schema.to_str().unwrap()], dir.path());

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains(r#"CREATE TABLE IF NOT EXISTS "user""#));
    assert!(stdout.contains(r#"CREATE TABLE IF NOT EXISTS "post_tags""#));
    assert!(stdout.contains("ON DELETE CASCADE"));
}

#[test]
fn test_migrate_creates_tables_once() {
    // Given: an empty directory and a schema file
    let dir = TempDir::new().unwrap();
    let schema = write_schema(&dir, SCHEMA);
    let db_path = dir.path().join("data").join("blog.db");
    let args = [
        "migrate",
        schema.to_str().unwrap(),
        "--db",
        db_path.to_str().unwrap(),
    ];

    // When: migrating twice
    let first = keel(&args, dir.path());
    let second = keel(&args, dir.path());

    // Then: the first run creates every table, the second changes nothing
    assert!(first.status.success(), "{}", String::from_utf8_lossy(&first.stderr));
    assert!(String::from_utf8_lossy(&first.stdout).contains("✓ Created post"));
    assert!(second.status.success());
    assert!(String::from_utf8_lossy(&second.stdout).contains("4 table(s) already up to date"));

    let conn = Connection::open(&db_path).unwrap();
    let count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name IN ('user', 'post', 'tag', 'post_tags')",
            [],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(count, 4);
}

#[test]
fn test_invalid_schema_exits_with_error() {
    // Given: a schema referencing an undeclared model
    let dir = TempDir::new().unwrap();
    let schema = write_schema(
        &dir,
        r#"
schema_version: 0
models:
  - name: Post
    fields:
      - { name: id, type: integer, primary_key: true }
      - { name: author_id, type: integer, references: Ghost }
"#,
    );

    let output = keel(&["schema", "check", schema.to_str().unwrap()], dir.path());

    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).starts_with("Error: "));
}

#[test]
fn test_unsupported_schema_version_is_rejected() {
    let dir = TempDir::new().unwrap();
    let schema = write_schema(&dir, "schema_version: 3\nmodels: []\n");

    let output = keel(&["schema", "ddl", schema.to_str().unwrap()], dir.path());

    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("schema_version"));
}
