#![allow(dead_code)]

use keel_core::model::{FieldDef, ModelDefinition, OnDelete, RelationshipDef};
use keel_core::sql::Statement;
use keel_core::{ExError, ExecOutcome, ExErrorKind, Row, SchemaRegistry, Storage};
use keel_engine::{Session, SessionOptions};
use keel_store::{SqliteStorage, StoreConfig};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// User, Post and Tag
///
/// - `User.mentor` is an optional self-reference (`SET NULL`)
/// - `Post.author` is a required, lazy many-to-one (`RESTRICT`)
/// - `Post.tags` / `Tag.posts` share the `post_tags` link table
/// - `Post` is versioned
pub fn blog_registry() -> Arc<SchemaRegistry> {
    let user = ModelDefinition::new("User")
        .field(FieldDef::integer("id").primary_key())
        .field(FieldDef::email("email").unique())
        .field(FieldDef::text("name").optional())
        .field(
            FieldDef::foreign_key("mentor_id", "User")
                .optional()
                .on_delete(OnDelete::SetNull),
        )
        .relationship(RelationshipDef::many_to_one("mentor", "User", "mentor_id").optional())
        .relationship(RelationshipDef::one_to_many("posts", "Post", "author_id"));

    let post = ModelDefinition::new("Post")
        .versioned()
        .field(FieldDef::integer("id").primary_key())
        .field(FieldDef::text("title").indexed())
        .field(FieldDef::foreign_key("author_id", "User"))
        .relationship(RelationshipDef::many_to_one("author", "User", "author_id"))
        .relationship(RelationshipDef::many_to_many("tags", "Tag").link_table("post_tags"));

    let tag = ModelDefinition::new("Tag")
        .field(FieldDef::integer("id").primary_key())
        .field(FieldDef::text("label").unique())
        .relationship(RelationshipDef::many_to_many("posts", "Post").link_table("post_tags"));

    let mut registry = SchemaRegistry::new();
    registry
        .register_all(vec![user, post, tag])
        .expect("blog models register");
    Arc::new(registry)
}

/// Same as [`blog_registry`] with `Post.tags` loaded eagerly
pub fn eager_tags_registry() -> Arc<SchemaRegistry> {
    let base = blog_registry();
    let mut registry = SchemaRegistry::new();
    let mut definitions = Vec::new();
    for name in ["User", "Post", "Tag"] {
        let mut def = base.definition(name).expect("defined").clone();
        if name == "Post" {
            for rel in def.relationships.iter_mut() {
                if rel.name == "tags" {
                    *rel = rel.clone().eager();
                }
            }
        }
        definitions.push(def);
    }
    registry.register_all(definitions).expect("models register");
    Arc::new(registry)
}

/// `Node{id, parent_id}` tree with a restricting self-reference
pub fn node_registry() -> Arc<SchemaRegistry> {
    let node = ModelDefinition::new("Node")
        .field(FieldDef::integer("id").primary_key())
        .field(FieldDef::text("label"))
        .field(FieldDef::foreign_key("parent_id", "Node").optional())
        .relationship(RelationshipDef::many_to_one("parent", "Node", "parent_id").optional())
        .relationship(RelationshipDef::one_to_many("children", "Node", "parent_id"));

    let mut registry = SchemaRegistry::new();
    registry.register(node).expect("node model registers");
    Arc::new(registry)
}

/// Two one-to-one pairs
///
/// - `Book.author` holds a required unique key; `Author.book` is the back side
/// - `Login.account` holds an optional unique key; `Account.login` is the back side
pub fn one_to_one_registry() -> Arc<SchemaRegistry> {
    let author = ModelDefinition::new("Author")
        .field(FieldDef::integer("id").primary_key())
        .field(FieldDef::text("name"))
        .relationship(RelationshipDef::one_to_one_back("book", "Book", "author_id").optional());

    let book = ModelDefinition::new("Book")
        .field(FieldDef::integer("id").primary_key())
        .field(FieldDef::text("title"))
        .field(FieldDef::foreign_key("author_id", "Author").unique())
        .relationship(RelationshipDef::one_to_one("author", "Author", "author_id"));

    let account = ModelDefinition::new("Account")
        .field(FieldDef::integer("id").primary_key())
        .field(FieldDef::email("email").unique())
        .relationship(RelationshipDef::one_to_one_back("login", "Login", "account_id").optional());

    let login = ModelDefinition::new("Login")
        .field(FieldDef::integer("id").primary_key())
        .field(FieldDef::text("token"))
        .field(FieldDef::foreign_key("account_id", "Account").optional().unique())
        .relationship(RelationshipDef::one_to_one("account", "Account", "account_id").optional());

    let mut registry = SchemaRegistry::new();
    registry
        .register_all(vec![author, book, account, login])
        .expect("one-to-one models register");
    Arc::new(registry)
}

/// In-memory storage with the registry's schema applied
pub fn memory_storage(registry: &SchemaRegistry) -> SqliteStorage {
    let mut storage = SqliteStorage::in_memory().expect("in-memory storage");
    keel_store::migrations::apply_schema(storage.connection().expect("open"), registry)
        .expect("schema applies");
    storage
}

/// Session over a fresh in-memory database
pub fn memory_session(registry: &Arc<SchemaRegistry>) -> Session {
    let storage = memory_storage(registry);
    Session::open(Arc::clone(registry), Box::new(storage), SessionOptions::default())
        .expect("session opens")
}

/// Apply the registry's schema to a database file
pub fn prepare_file(path: &Path, registry: &SchemaRegistry) -> StoreConfig {
    let config = StoreConfig::file(path);
    let mut conn = keel_store::db::open_with(&config).expect("file opens");
    keel_store::migrations::apply_schema(&mut conn, registry).expect("schema applies");
    config
}

pub fn file_session(config: &StoreConfig, registry: &Arc<SchemaRegistry>) -> Session {
    Session::open_sqlite(Arc::clone(registry), config, SessionOptions::default())
        .expect("session opens")
}

/// Storage wrapper counting the read queries issued through it
pub struct CountingStorage {
    inner: SqliteStorage,
    queries: Arc<AtomicUsize>,
}

impl CountingStorage {
    pub fn new(inner: SqliteStorage) -> (Self, Arc<AtomicUsize>) {
        let queries = Arc::new(AtomicUsize::new(0));
        (
            Self {
                inner,
                queries: Arc::clone(&queries),
            },
            queries,
        )
    }
}

impl Storage for CountingStorage {
    fn begin(&mut self) -> Result<(), ExError> {
        self.inner.begin()
    }
    fn execute(&mut self, statement: &Statement) -> Result<ExecOutcome, ExError> {
        self.inner.execute(statement)
    }
    fn query(&mut self, statement: &Statement) -> Result<Vec<Row>, ExError> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        self.inner.query(statement)
    }
    fn savepoint(&mut self, name: &str) -> Result<(), ExError> {
        self.inner.savepoint(name)
    }
    fn release(&mut self, name: &str) -> Result<(), ExError> {
        self.inner.release(name)
    }
    fn rollback_to(&mut self, name: &str) -> Result<(), ExError> {
        self.inner.rollback_to(name)
    }
    fn commit(&mut self) -> Result<(), ExError> {
        self.inner.commit()
    }
    fn rollback(&mut self) -> Result<(), ExError> {
        self.inner.rollback()
    }
    fn in_transaction(&self) -> bool {
        self.inner.in_transaction()
    }
    fn close(&mut self) -> Result<(), ExError> {
        self.inner.close()
    }
}

/// Storage wrapper failing the first write whose SQL contains a marker,
/// and recording every write statement it was asked to run
pub struct FailingStorage {
    inner: SqliteStorage,
    marker: Option<String>,
    pub log: Arc<Mutex<Vec<String>>>,
}

impl FailingStorage {
    pub fn new(inner: SqliteStorage, marker: &str) -> (Self, Arc<Mutex<Vec<String>>>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                inner,
                marker: Some(marker.to_string()),
                log: Arc::clone(&log),
            },
            log,
        )
    }
}

impl Storage for FailingStorage {
    fn begin(&mut self) -> Result<(), ExError> {
        self.inner.begin()
    }
    fn execute(&mut self, statement: &Statement) -> Result<ExecOutcome, ExError> {
        self.log.lock().unwrap().push(statement.sql.clone());
        if let Some(marker) = &self.marker {
            if statement.sql.contains(marker.as_str()) {
                self.marker = None;
                return Err(ExError::new(ExErrorKind::Persistence).with_message("disk I/O error"));
            }
        }
        self.inner.execute(statement)
    }
    fn query(&mut self, statement: &Statement) -> Result<Vec<Row>, ExError> {
        self.inner.query(statement)
    }
    fn savepoint(&mut self, name: &str) -> Result<(), ExError> {
        self.inner.savepoint(name)
    }
    fn release(&mut self, name: &str) -> Result<(), ExError> {
        self.inner.release(name)
    }
    fn rollback_to(&mut self, name: &str) -> Result<(), ExError> {
        self.inner.rollback_to(name)
    }
    fn commit(&mut self) -> Result<(), ExError> {
        self.inner.commit()
    }
    fn rollback(&mut self) -> Result<(), ExError> {
        self.inner.rollback()
    }
    fn in_transaction(&self) -> bool {
        self.inner.in_transaction()
    }
    fn close(&mut self) -> Result<(), ExError> {
        self.inner.close()
    }
}
