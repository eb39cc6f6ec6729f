//! Engine configuration.
//!
//! Every tunable the value engine owns lives here: encoding-promotion
//! thresholds, the eviction policy that gates shared integers and the
//! LRU/LFU field interpretation, the keyspace-notification mask, and the
//! knobs of the active-expire and lazy-free machinery.

use serde::{Deserialize, Serialize};

use crate::notify::NotifyClass;

/// Eviction policy. Only the facets the value engine reacts to are
/// modeled: whether per-key LRU or LFU tracking is in effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MaxmemoryPolicy {
    /// No eviction; shared integers may be used freely.
    NoEviction,
    /// Approximated LRU tracking; shared integers are disallowed.
    AllKeysLru,
    /// Approximated LFU tracking; shared integers are disallowed.
    AllKeysLfu,
}

impl MaxmemoryPolicy {
    /// True when every keyspace value needs a private LRU/LFU field,
    /// which rules out interned shared integers.
    pub fn forbids_shared_integers(self) -> bool {
        !matches!(self, MaxmemoryPolicy::NoEviction)
    }

    pub fn uses_lfu(self) -> bool {
        matches!(self, MaxmemoryPolicy::AllKeysLfu)
    }

    pub fn name(self) -> &'static str {
        match self {
            MaxmemoryPolicy::NoEviction => "noeviction",
            MaxmemoryPolicy::AllKeysLru => "allkeys-lru",
            MaxmemoryPolicy::AllKeysLfu => "allkeys-lfu",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "noeviction" => Some(MaxmemoryPolicy::NoEviction),
            "allkeys-lru" => Some(MaxmemoryPolicy::AllKeysLru),
            "allkeys-lfu" => Some(MaxmemoryPolicy::AllKeysLfu),
            _ => None,
        }
    }
}

/// Engine configuration. Field names track the server option names with
/// dashes mapped to underscores.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Number of databases.
    pub databases: usize,

    /// Maximum memory before the limit policy refuses allocations.
    /// Zero means unlimited.
    pub maxmemory: usize,

    /// Eviction policy.
    pub maxmemory_policy: MaxmemoryPolicy,

    /// Largest single bulk value accepted or produced.
    pub proto_max_bulk_len: usize,

    /// Keyspace-notification class mask.
    pub notify_keyspace_events: NotifyClass,

    /// Sets stay intset-encoded up to this many elements.
    pub set_max_intset_entries: usize,

    /// Hashes stay listpack-encoded up to this many fields.
    pub hash_max_listpack_entries: usize,

    /// Hashes stay listpack-encoded while every field and value is at
    /// most this many bytes.
    pub hash_max_listpack_value: usize,

    /// Sorted sets stay listpack-encoded up to this many members.
    pub zset_max_listpack_entries: usize,

    /// Sorted sets stay listpack-encoded while every member is at most
    /// this many bytes.
    pub zset_max_listpack_value: usize,

    /// Elements per quicklist node.
    pub list_max_listpack_size: usize,

    /// Entries per stream listpack node.
    pub stream_node_max_entries: usize,

    /// Expired keys are reclaimed off-thread when set.
    pub lazyfree_lazy_expire: bool,

    /// DEL-on-overwrite and FLUSH-style deletions go off-thread when set.
    pub lazyfree_lazy_server_del: bool,

    /// Values whose estimated effort exceeds this go to the reclaimer
    /// thread; smaller ones are freed inline.
    pub lazyfree_threshold: usize,

    /// Keys sampled from `expires` per active-expire quantum.
    pub active_expire_samples: usize,

    /// LFU counter growth divisor.
    pub lfu_log_factor: u32,

    /// Minutes per LFU counter decay step.
    pub lfu_decay_time: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            databases: 16,
            maxmemory: 0,
            maxmemory_policy: MaxmemoryPolicy::NoEviction,
            proto_max_bulk_len: 512 * 1024 * 1024,
            notify_keyspace_events: NotifyClass::empty(),
            set_max_intset_entries: 512,
            hash_max_listpack_entries: 128,
            hash_max_listpack_value: 64,
            zset_max_listpack_entries: 128,
            zset_max_listpack_value: 64,
            list_max_listpack_size: 128,
            stream_node_max_entries: 100,
            lazyfree_lazy_expire: false,
            lazyfree_lazy_server_del: false,
            lazyfree_threshold: 64,
            active_expire_samples: 20,
            lfu_log_factor: 10,
            lfu_decay_time: 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_shipped_configuration() {
        let config = Config::default();
        assert_eq!(config.set_max_intset_entries, 512);
        assert_eq!(config.hash_max_listpack_entries, 128);
        assert_eq!(config.zset_max_listpack_value, 64);
        assert_eq!(config.stream_node_max_entries, 100);
        assert_eq!(config.maxmemory_policy, MaxmemoryPolicy::NoEviction);
    }

    #[test]
    fn test_policy_gates_shared_integers() {
        assert!(!MaxmemoryPolicy::NoEviction.forbids_shared_integers());
        assert!(MaxmemoryPolicy::AllKeysLru.forbids_shared_integers());
        assert!(MaxmemoryPolicy::AllKeysLfu.forbids_shared_integers());
    }

    #[test]
    fn test_policy_names_round_trip() {
        for policy in [
            MaxmemoryPolicy::NoEviction,
            MaxmemoryPolicy::AllKeysLru,
            MaxmemoryPolicy::AllKeysLfu,
        ] {
            assert_eq!(MaxmemoryPolicy::from_name(policy.name()), Some(policy));
        }
        assert_eq!(MaxmemoryPolicy::from_name("volatile-ttl"), None);
    }
}
