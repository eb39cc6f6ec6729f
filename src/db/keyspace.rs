//! The per-database keyspace.
//!
//! A [`Db`] holds four mappings keyed by raw byte strings: the value
//! dictionary (which owns its values), the expire table (a strict
//! subset of the dictionary's keys), the blocked-client registry, and
//! the ready-key latch set used to deduplicate readiness signaling.
//!
//! Lookups apply lazy expiration: a read that finds a dead key deletes
//! it and reports a miss. The evicted value is handed back to the
//! caller so the engine can decide between inline drop and the
//! background reclaimer, and can emit the `expired` notification.

use std::collections::{HashMap, HashSet};

use crate::blocking::list::BlockedClientList;
use crate::core::config::Config;
use crate::value::Obj;

/// Behavior switches for keyspace lookups.
#[derive(Debug, Clone, Copy, Default)]
pub struct LookupFlags {
    /// Do not update the value's LRU/LFU field.
    pub notouch: bool,
    /// Suppress the key-miss notification (the caller consults
    /// `missed` in the outcome).
    pub nonotify: bool,
    /// Exclude this lookup from hit/miss counters.
    pub nostats: bool,
    /// Do not expire-evict on this lookup.
    pub noexpire: bool,
}

impl LookupFlags {
    /// Plain read.
    pub fn read() -> Self {
        Self::default()
    }

    /// Lookup used while serving ready keys: invisible to stats and
    /// miss notifications.
    pub fn serving() -> Self {
        Self {
            nonotify: true,
            nostats: true,
            ..Self::default()
        }
    }
}

/// What a lookup observed, including the side effects the engine still
/// has to carry out (notifications, reclaim of an expired value).
#[derive(Debug, Default)]
pub struct LookupOutcome {
    pub value: Option<Obj>,
    /// Set when lazy expiration evicted the key during this lookup.
    pub expired_value: Option<Obj>,
    /// True when the read missed and the miss is notifiable.
    pub missed: bool,
}

#[derive(Debug)]
pub struct Db {
    pub id: usize,
    dict: HashMap<Vec<u8>, Obj>,
    expires: HashMap<Vec<u8>, i64>,
    /// key -> clients blocked on it, FIFO.
    pub blocking_keys: HashMap<Vec<u8>, BlockedClientList>,
    /// Keys already queued on the global ready list this command.
    pub ready_keys: HashSet<Vec<u8>>,
    /// Keys modified since the collaborator (WATCH / client-side
    /// tracking) last drained the log.
    modified_log: Vec<Vec<u8>>,
    pub stat_hits: u64,
    pub stat_misses: u64,
}

impl Db {
    pub fn new(id: usize) -> Self {
        Self {
            id,
            dict: HashMap::new(),
            expires: HashMap::new(),
            blocking_keys: HashMap::new(),
            ready_keys: HashSet::new(),
            modified_log: Vec::new(),
            stat_hits: 0,
            stat_misses: 0,
        }
    }

    pub fn key_count(&self) -> usize {
        self.dict.len()
    }

    pub fn expires_count(&self) -> usize {
        self.expires.len()
    }

    pub fn contains(&self, key: &[u8]) -> bool {
        self.dict.contains_key(key)
    }

    /// Raw dictionary access, no expiration logic. The memory reporter
    /// and the dump path use this.
    pub fn get_raw(&self, key: &[u8]) -> Option<&Obj> {
        self.dict.get(key)
    }

    /// Mutable handle slot for in-place value edits. Copy-on-write
    /// promotion happens at the call site via `make_owned`.
    pub fn get_raw_mut(&mut self, key: &[u8]) -> Option<&mut Obj> {
        self.dict.get_mut(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = (&Vec<u8>, &Obj)> {
        self.dict.iter()
    }

    pub fn expire_deadline(&self, key: &[u8]) -> Option<i64> {
        self.expires.get(key).copied()
    }

    fn is_expired(&self, key: &[u8], now_ms: i64) -> bool {
        matches!(self.expires.get(key), Some(&deadline) if now_ms >= deadline)
    }

    /// Look a key up, honoring lazy expiration and the given flags.
    pub fn lookup(
        &mut self,
        key: &[u8],
        now_ms: i64,
        flags: LookupFlags,
        config: &Config,
    ) -> LookupOutcome {
        let mut outcome = LookupOutcome::default();

        if !flags.noexpire && self.is_expired(key, now_ms) {
            outcome.expired_value = self.remove(key);
        }

        match self.dict.get(key) {
            Some(value) => {
                if !flags.notouch {
                    value.touch(
                        config.maxmemory_policy,
                        now_ms,
                        config.lfu_log_factor,
                        config.lfu_decay_time,
                    );
                }
                if !flags.nostats {
                    self.stat_hits += 1;
                }
                outcome.value = Some(Obj::clone(value));
            }
            None => {
                if !flags.nostats {
                    self.stat_misses += 1;
                }
                outcome.missed = !flags.nonotify;
            }
        }
        outcome
    }

    /// Add a new key. Fails (returns false) when the key is present.
    pub fn add(&mut self, key: &[u8], value: Obj) -> bool {
        if self.dict.contains_key(key) {
            return false;
        }
        self.dict.insert(key.to_vec(), value);
        true
    }

    /// Replace an existing key's value, returning the old one. The
    /// expire record is dropped unless `keepttl`.
    pub fn overwrite(&mut self, key: &[u8], value: Obj, keepttl: bool) -> Option<Obj> {
        let old = self.dict.insert(key.to_vec(), value);
        debug_assert!(old.is_some(), "overwrite of a missing key");
        if !keepttl {
            self.expires.remove(key);
        }
        old
    }

    /// Remove a key from the dictionary and the expire table. The
    /// caller owns the returned value and chooses how to tear it down.
    pub fn remove(&mut self, key: &[u8]) -> Option<Obj> {
        let value = self.dict.remove(key)?;
        self.expires.remove(key);
        Some(value)
    }

    /// Attach an absolute-millisecond deadline. The key must exist.
    pub fn set_expire(&mut self, key: &[u8], deadline_ms: i64) {
        assert!(
            self.dict.contains_key(key),
            "expire set on a key missing from the dictionary"
        );
        self.expires.insert(key.to_vec(), deadline_ms);
    }

    /// Drop the expire record; true if one existed.
    pub fn remove_expire(&mut self, key: &[u8]) -> bool {
        self.expires.remove(key).is_some()
    }

    /// Record a modification for cache-invalidation collaborators.
    pub fn signal_modified(&mut self, key: &[u8]) {
        self.modified_log.push(key.to_vec());
    }

    /// Drain the modification log (WATCH-style collaborators poll it).
    pub fn take_modified(&mut self) -> Vec<Vec<u8>> {
        std::mem::take(&mut self.modified_log)
    }

    /// Sample up to `count` expire-table entries starting at a rotating
    /// offset, for the active expire cycle.
    pub fn sample_expires(&self, offset: usize, count: usize) -> Vec<(Vec<u8>, i64)> {
        if self.expires.is_empty() {
            return Vec::new();
        }
        let skip = offset % self.expires.len();
        self.expires
            .iter()
            .skip(skip)
            .chain(self.expires.iter().take(skip))
            .take(count)
            .map(|(k, &d)| (k.clone(), d))
            .collect()
    }

    /// Every key/value pair leaves; the caller disposes of the values.
    pub fn clear(&mut self) -> Vec<(Vec<u8>, Obj)> {
        self.expires.clear();
        self.dict.drain().collect()
    }

    /// Consistency probe used by tests: every expire entry must name a
    /// live key.
    pub fn check_expires_subset_of_dict(&self) -> bool {
        self.expires.keys().all(|k| self.dict.contains_key(k))
    }
}
