//! Keel Engine - sessions over a storage connection
//!
//! A [`Session`] owns one connection and one transaction. It tracks
//! instances in an identity map, records changes in a unit of work and
//! flushes them in dependency order inside a savepoint. Relationships are
//! resolved lazily and cached per session generation.

pub mod errors;
pub mod flush;
mod hydrate;
pub mod repository;
pub mod resolver;
pub mod scope;
pub mod session;

pub use errors::Result;
pub use flush::{FlushOperation, FlushReport};
pub use repository::Repository;
pub use resolver::{Peek, Resolved};
pub use scope::{with_session, with_store_session};
pub use session::{Outcome, Session, SessionOptions};
