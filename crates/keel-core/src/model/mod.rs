//! Declarative model layer
//!
//! Values, semantic types, fields, relationships and whole model
//! definitions, plus the conversion between semantic and stored values.

pub mod convert;
pub mod definition;
pub mod field;
pub mod relationship;
pub mod types;
pub mod value;

pub use definition::ModelDefinition;
pub use field::{DefaultValue, FieldDef, ForeignKeyRef, OnDelete};
pub use relationship::{Association, LoadStrategy, RelationKind, RelationshipDef};
pub use types::{EnumDef, EnumMember, EnumRepr, EnumValue, FlagsDef, SemanticType, StorageType};
pub use value::{KeyValue, Value};
