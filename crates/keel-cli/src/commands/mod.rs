//! CLI command implementations

pub mod migrate;
pub mod schema;

use keel_core::SchemaRegistry;
use keel_store::schema_file;
use std::path::Path;

/// Load a schema file into a fresh registry
pub(crate) fn load_registry(path: &Path) -> Result<SchemaRegistry, Box<dyn std::error::Error>> {
    let mut registry = SchemaRegistry::new();
    schema_file::load_into(&mut registry, path)?;
    Ok(registry)
}
