//! YAML schema files
//!
//! Provides:
//! - Schema file format v0
//! - Parser with validation and conversion to model definitions

pub mod format_v0;
pub mod parser;

pub use format_v0::SchemaFileV0;
pub use parser::{load_into, parse_schema_file, parse_schema_str, to_definitions};
