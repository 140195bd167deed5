//! Keel Core - in-memory mapping kernel
//!
//! Everything here is pure: no connection is opened and no statement is
//! executed. The crate provides:
//! - Model definitions, semantic types and field codecs
//! - The schema registry deriving table descriptors
//! - Query expressions compiled to parameterized statements
//! - Instances, the identity map and the unit-of-work flush planner
//! - The storage port implemented by `keel-store`
//! - Error and logging facilities shared by every Keel crate

pub mod codec;
pub mod errors;
pub mod identity;
pub mod instance;
pub mod logging_facility;
pub mod model;
pub mod query;
pub mod registry;
pub mod sql;
pub mod storage;
pub mod unit_of_work;
pub mod validation;

// Re-export commonly used types
pub use codec::{FieldCodec, JsonCodec};
pub use errors::{ErrorCategory, ExError, ExErrorKind, KeelError, Result};
pub use identity::IdentityMap;
pub use instance::{Instance, InstanceHandle, InstanceState, NewInstance};
pub use model::{
    EnumDef, EnumRepr, FieldDef, FlagsDef, KeyValue, LoadStrategy, ModelDefinition, OnDelete,
    RelationshipDef, SemanticType, Value,
};
pub use query::{col, exists, exists_where, Predicate, Query, QueryPlan};
pub use registry::{SchemaRegistry, TableDescriptor};
pub use sql::Statement;
pub use storage::{ExecOutcome, Row, Storage};
pub use validation::{StandardValidator, Validator};
