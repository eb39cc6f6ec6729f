//! Physical value representations.
//!
//! Compact encodings (listpack, quicklist, intset) trade CPU on access
//! for dense memory; the general encodings (hash table, skip list,
//! stream radix tree) trade memory for operation cost. Migration between
//! them is strictly compact -> general and happens in the command paths
//! that observe a configured threshold being crossed.

pub mod intset;
pub mod listpack;
pub mod quicklist;
pub mod rax;
pub mod skiplist;
pub mod stream;

pub use intset::IntSet;
pub use listpack::{ListPack, LpEntry, LpRef};
pub use quicklist::{ListEnd, QuickList};
pub use rax::Rax;
pub use skiplist::{SkipList, ZSet};
pub use stream::{ConsumerGroup, Nack, Stream, StreamEntry, StreamError, StreamId};
