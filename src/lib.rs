//! # CORAL - In-Memory Data Structure Store Engine
//!
//! The core value engine of a Redis-compatible key-value server.
//!
//! ## Architecture
//!
//! - `core`: configuration and the per-command clock
//! - `value`: the tagged polymorphic object, shared pool, conversions
//! - `encodings`: listpack, quicklist, intset, skiplist, rax, stream
//! - `db`: the keyspace, expiration, background reclamation
//! - `blocking`: client blocking, key readiness, per-type servers
//! - `notify`: keyspace notifications and the class mask
//! - `pubsub`: the channel hub the notification bus fans out through
//! - `memory`: allocation accounting, size estimation, the doctor
//! - `rdb`: the typed-dump contract
//! - `commands`: command handlers over parsed argument vectors
//! - `engine`: the single-threaded executor context

#![warn(clippy::all)]

// Core services - configuration and clocks
pub mod core;

// Value objects and their physical representations
pub mod encodings;
pub mod value;

// Keyspace
pub mod db;

// Blocking and readiness
pub mod blocking;

// Notifications and fan-out
pub mod notify;
pub mod pubsub;

// Memory introspection
pub mod memory;

// Typed-dump contract
pub mod rdb;

// Command surface
pub mod commands;

// Client records
pub mod client;

// The executor context
pub mod engine;

// Every figure MEMORY STATS reports flows from this accounting wrapper.
#[global_allocator]
static GLOBAL_ALLOCATOR: memory::CountingAllocator = memory::CountingAllocator;

// Re-export commonly used types
pub use client::{Client, ClientId};
pub use commands::reply::Reply;
pub use crate::core::config::{Config, MaxmemoryPolicy};
pub use engine::Engine;
pub use value::{Encoding, Obj, Object, ObjectBody, ValueType};

/// Re-export version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
