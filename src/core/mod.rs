//! Foundational engine services: configuration and the command clock.

pub mod clock;
pub mod config;

pub use clock::{lru_clock, CommandClock, LRU_CLOCK_MAX, LRU_CLOCK_RESOLUTION_MS};
pub use config::{Config, MaxmemoryPolicy};
