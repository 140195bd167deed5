//! Scoped sessions
//!
//! The closure's result decides the outcome: `Ok` commits, `Err` rolls
//! back. The connection is released on every exit path, including a
//! failing commit.

use crate::errors::Result;
use crate::session::{Outcome, Session, SessionOptions};
use keel_core::errors::ExError;
use keel_core::{SchemaRegistry, Storage};
use keel_store::{SqliteStorage, StoreConfig};
use std::sync::Arc;

/// Run `f` in a session over `storage`, committing when it succeeds
///
/// # Errors
///
/// The closure's error (after rollback), or the commit error.
pub fn with_session<T, F>(
    registry: Arc<SchemaRegistry>,
    storage: Box<dyn Storage>,
    options: SessionOptions,
    f: F,
) -> Result<T>
where
    F: FnOnce(&mut Session) -> Result<T>,
{
    let mut session = Session::open(registry, storage, options)?;
    match f(&mut session) {
        Ok(value) => {
            session.close(Outcome::Commit)?;
            Ok(value)
        }
        Err(err) => {
            if let Err(close_err) = session.close(Outcome::Rollback) {
                log_close_failure(&session, &close_err);
            }
            Err(err)
        }
    }
}

/// [`with_session`] over a SQLite connection opened from `config`
///
/// # Errors
///
/// Connection errors, then as [`with_session`].
pub fn with_store_session<T, F>(
    registry: Arc<SchemaRegistry>,
    config: &StoreConfig,
    options: SessionOptions,
    f: F,
) -> Result<T>
where
    F: FnOnce(&mut Session) -> Result<T>,
{
    let storage = SqliteStorage::open(config)?;
    with_session(registry, Box::new(storage), options, f)
}

fn log_close_failure(session: &Session, err: &ExError) {
    tracing::error!(
        component = module_path!(),
        op = "session_close",
        session_id = %session.id(),
        error = %err,
        "rollback after failed scope did not complete"
    );
}
