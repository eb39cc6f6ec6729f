//! Keyspace: per-database mappings, expiration, and background
//! reclamation.

pub mod expire;
pub mod keyspace;
pub mod lazyfree;

pub use expire::{ActiveExpireCursor, ExpireCycleReport};
pub use keyspace::{Db, LookupFlags, LookupOutcome};
pub use lazyfree::{reclaim_effort, LazyFree};
