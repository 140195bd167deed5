//! Unit of work
//!
//! The [`Changeset`] records what changed since the last flush; the planner
//! turns it into an ordered [`FlushPlan`]. Neither touches storage: the
//! engine renders and executes the plan.

pub mod changeset;
pub mod planner;

pub use changeset::{ChangeEntry, Changeset, DeleteOutcome, LinkEntry, LinkOp, Operation};
pub use planner::{plan, FlushPlan, FlushStep};
