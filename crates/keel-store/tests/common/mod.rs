#![allow(dead_code)]

use keel_core::model::{FieldDef, ModelDefinition};
use keel_core::SchemaRegistry;
use std::path::PathBuf;

pub fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

/// Registry loaded from `fixtures/blog.yaml`
pub fn blog_registry() -> SchemaRegistry {
    let mut registry = SchemaRegistry::new();
    keel_store::schema_file::load_into(&mut registry, &fixture("blog.yaml"))
        .expect("blog fixture registers");
    registry
}

/// `Account{id, email unique}` with an optional extra column
pub fn account_registry(with_nickname: bool) -> SchemaRegistry {
    let mut model = ModelDefinition::new("Account")
        .field(FieldDef::integer("id").primary_key())
        .field(FieldDef::email("email").unique());
    if with_nickname {
        model = model.field(FieldDef::text("nickname").optional());
    }
    let mut registry = SchemaRegistry::new();
    registry.register(model).expect("account registers");
    registry
}
