//! Allocation accounting.
//!
//! A thin counting wrapper around the system allocator tracks live
//! bytes and the high-water mark, the numbers MEMORY STATS and the
//! fragmentation ratios are computed from. Resident-set size comes from
//! `/proc/self/statm` where available, falling back to the allocator
//! figure elsewhere.

use std::alloc::{GlobalAlloc, Layout, System};
use std::sync::atomic::{AtomicUsize, Ordering};

static ALLOCATED: AtomicUsize = AtomicUsize::new(0);
static PEAK: AtomicUsize = AtomicUsize::new(0);

pub struct CountingAllocator;

fn account_alloc(size: usize) {
    let now = ALLOCATED.fetch_add(size, Ordering::Relaxed) + size;
    PEAK.fetch_max(now, Ordering::Relaxed);
}

fn account_dealloc(size: usize) {
    ALLOCATED.fetch_sub(size, Ordering::Relaxed);
}

unsafe impl GlobalAlloc for CountingAllocator {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let ptr = System.alloc(layout);
        if !ptr.is_null() {
            account_alloc(layout.size());
        }
        ptr
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        System.dealloc(ptr, layout);
        account_dealloc(layout.size());
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        let new_ptr = System.realloc(ptr, layout, new_size);
        if !new_ptr.is_null() {
            account_dealloc(layout.size());
            account_alloc(new_size);
        }
        new_ptr
    }
}

/// Live bytes the allocator has handed out.
pub fn used_memory() -> usize {
    ALLOCATED.load(Ordering::Relaxed)
}

/// High-water mark of [`used_memory`].
pub fn peak_memory() -> usize {
    PEAK.load(Ordering::Relaxed)
}

/// Resident-set size of the process in bytes.
pub fn resident_set_size() -> usize {
    #[cfg(target_os = "linux")]
    {
        if let Ok(statm) = std::fs::read_to_string("/proc/self/statm") {
            if let Some(resident_pages) = statm
                .split_whitespace()
                .nth(1)
                .and_then(|f| f.parse::<usize>().ok())
            {
                return resident_pages * 4096;
            }
        }
    }
    used_memory()
}

/// MEMORY PURGE hook: ask the allocator to give unused pages back. The
/// system allocator has no such interface, so this reports zero
/// reclaimed; a jemalloc-backed build would wire its purge here.
pub fn purge() -> usize {
    0
}

/// MEMORY MALLOC-STATS text.
pub fn allocator_stats_report() -> String {
    format!(
        "allocator: system\nallocated: {}\npeak: {}\nresident: {}\n",
        used_memory(),
        peak_memory(),
        resident_set_size()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_track_allocations() {
        // Other test threads allocate concurrently, so only monotone
        // claims are safe here.
        let before = used_memory();
        let buf = vec![0u8; 1 << 16];
        assert!(used_memory() >= (1 << 16));
        assert!(peak_memory() >= before.max(1 << 16));
        drop(buf);
        assert!(peak_memory() >= 1 << 16);
    }

    #[test]
    fn test_rss_is_plausible() {
        assert!(resident_set_size() > 0);
    }
}
