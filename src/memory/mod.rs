//! Memory introspection: allocation accounting, per-value size
//! estimation, the overhead report, and the doctor.

pub mod alloc;
pub mod doctor;
pub mod stats;
pub mod usage;

pub use alloc::CountingAllocator;
pub use stats::{DbOverhead, MemoryOverhead};
pub use usage::{compute_size, DEFAULT_SAMPLES};
