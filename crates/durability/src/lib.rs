//! Mutation log for the entity store
//!
//! The log records every accepted mutation under its operation id, tracks
//! commit status (pending vs. committed to the chain) and compaction
//! bookkeeping, and answers the reverse lookups the query planner needs
//! (operation → entity, entity → operations).

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod log;

pub use log::{AppendOutcome, CommitMode, CommitStatus, LogEntry, MutationLog};
