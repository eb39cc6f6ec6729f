//! The immortal shared-integer pool.
//!
//! Small non-negative integers are interned once and handed out as
//! aliases; the pool's own handle keeps them alive for the process
//! lifetime, so their reported refcount is a sentinel rather than a
//! meaningful count. Interning is disabled whenever the eviction policy
//! needs a private LRU/LFU field per keyspace entry.

use std::sync::Arc;

use once_cell::sync::Lazy;

use super::object::{Obj, Object};

/// Size of the interned pool: integers in `[0, SHARED_INTEGERS)`.
pub const SHARED_INTEGERS: i64 = 10_000;

/// Refcount sentinel reported for immortal objects.
pub const SHARED_REFCOUNT: i64 = i32::MAX as i64;

static INTEGER_POOL: Lazy<Vec<Obj>> = Lazy::new(|| {
    (0..SHARED_INTEGERS)
        .map(|v| Arc::new(Object::create_string_from_i64(v)))
        .collect()
});

/// A pooled handle for `value`, if it is in the interned range.
pub fn shared_integer(value: i64) -> Option<Obj> {
    if (0..SHARED_INTEGERS).contains(&value) {
        Some(Arc::clone(&INTEGER_POOL[value as usize]))
    } else {
        None
    }
}

/// Whether this handle aliases a pool entry.
pub fn is_shared(obj: &Obj) -> bool {
    match obj.as_i64() {
        Some(v) if (0..SHARED_INTEGERS).contains(&v) => {
            Arc::ptr_eq(obj, &INTEGER_POOL[v as usize])
        }
        _ => false,
    }
}

/// The refcount OBJECT REFCOUNT reports: the strong count, or the
/// immortal sentinel for pool members.
pub fn refcount(obj: &Obj) -> i64 {
    if is_shared(obj) {
        SHARED_REFCOUNT
    } else {
        Arc::strong_count(obj) as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_hands_out_aliases() {
        let a = shared_integer(42).unwrap();
        let b = shared_integer(42).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(is_shared(&a));
        assert_eq!(refcount(&a), SHARED_REFCOUNT);
    }

    #[test]
    fn test_out_of_range_is_private() {
        assert!(shared_integer(-1).is_none());
        assert!(shared_integer(SHARED_INTEGERS).is_none());
        let private = Arc::new(Object::create_string_from_i64(42));
        assert!(!is_shared(&private));
        assert_eq!(refcount(&private), 1);
    }
}
