//! Query builder and compiler

pub mod compile;
pub mod expr;
pub mod plan;

pub use compile::{compile, compile_collection_load, compile_keys};
pub use expr::{col, exists, exists_where, Column, CompareOp, Direction, OrderBy, Predicate, Query};
pub use plan::{CollectionLoad, ProjectedColumn, Projection, QueryPlan};
