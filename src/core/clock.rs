//! Millisecond wall clock, cached per command.
//!
//! Expiration math must not drift between the sub-operations of a single
//! command (a BLMOVE served from the ready queue looks the same key up
//! twice). The engine refreshes the cached instant once at command entry
//! and everything downstream reads that snapshot.

use std::time::{SystemTime, UNIX_EPOCH};

/// Resolution of the per-object LRU clock.
pub const LRU_CLOCK_RESOLUTION_MS: u64 = 1000;

/// The LRU clock wraps at 24 bits.
pub const LRU_CLOCK_MAX: u32 = (1 << 24) - 1;

/// Current wall time in milliseconds since the epoch.
pub fn mstime() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// 24-bit coarse clock used by the per-object `lru` field in LRU mode.
pub fn lru_clock(now_ms: i64) -> u32 {
    ((now_ms as u64 / LRU_CLOCK_RESOLUTION_MS) & LRU_CLOCK_MAX as u64) as u32
}

/// Wall-clock snapshot taken once per top-level command.
#[derive(Debug, Clone, Copy)]
pub struct CommandClock {
    now_ms: i64,
    /// Depth of nested serving contexts. While positive, `refresh` keeps
    /// the snapshot fixed so repeated lookups observe one instant.
    fixed_depth: u32,
}

impl CommandClock {
    pub fn new() -> Self {
        Self {
            now_ms: mstime(),
            fixed_depth: 0,
        }
    }

    /// The cached instant in milliseconds.
    #[inline]
    pub fn now_ms(&self) -> i64 {
        self.now_ms
    }

    /// Re-read the wall clock unless a fixed-time section is open.
    pub fn refresh(&mut self) {
        if self.fixed_depth == 0 {
            self.now_ms = mstime();
        }
    }

    /// Enter a fixed-time section (ready-key serving does this so a key
    /// looked up twice cannot expire between the two lookups).
    pub fn push_fixed(&mut self) {
        self.fixed_depth += 1;
    }

    pub fn pop_fixed(&mut self) {
        debug_assert!(self.fixed_depth > 0);
        self.fixed_depth -= 1;
    }

    /// Override the snapshot. Tests use this to step virtual time.
    pub fn set_now_ms(&mut self, now_ms: i64) {
        self.now_ms = now_ms;
    }
}

impl Default for CommandClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lru_clock_wraps_at_24_bits() {
        assert_eq!(lru_clock(0), 0);
        assert_eq!(lru_clock(1000), 1);
        let wrapped = lru_clock(((LRU_CLOCK_MAX as i64) + 1) * 1000);
        assert_eq!(wrapped, 0);
    }

    #[test]
    fn test_fixed_section_freezes_snapshot() {
        let mut clock = CommandClock::new();
        clock.set_now_ms(42);
        clock.push_fixed();
        clock.refresh();
        assert_eq!(clock.now_ms(), 42);
        clock.pop_fixed();
        clock.refresh();
        assert!(clock.now_ms() >= 42);
    }
}
