//! The MEMORY STATS report.
//!
//! Aggregates allocator figures, per-database dictionary overhead,
//! client buffers by class, and the replication-buffer split into one
//! snapshot the doctor and the STATS reply both read from.

use serde::Serialize;

use super::alloc;
use crate::client::ClientClass;
use crate::engine::Engine;

#[derive(Debug, Clone, Serialize)]
pub struct DbOverhead {
    pub db_index: usize,
    pub overhead_ht_main: usize,
    pub overhead_ht_expires: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct MemoryOverhead {
    pub total_allocated: usize,
    pub startup_allocated: usize,
    pub peak_allocated: usize,
    pub resident_set: usize,

    /// RSS over allocated: process-level fragmentation.
    pub total_frag: f64,
    pub total_frag_bytes: i64,
    /// Allocator active over allocated: allocator-internal
    /// fragmentation.
    pub allocator_frag: f64,
    pub allocator_frag_bytes: i64,
    /// Allocator resident over active.
    pub allocator_rss: f64,
    pub allocator_rss_bytes: i64,
    /// Process RSS over allocator resident: everything else (stacks,
    /// code, lazy-unmapped pages).
    pub rss_extra: f64,
    pub rss_extra_bytes: i64,

    pub clients_normal: usize,
    pub clients_replicas: usize,
    pub repl_backlog: usize,
    pub aof_buffer: usize,
    pub lua_caches: usize,
    pub functions_caches: usize,

    pub dbs: Vec<DbOverhead>,
    pub overhead_total: usize,
    pub dataset: usize,
    pub total_keys: usize,
    pub peak_perc: f64,
    pub dataset_perc: f64,
    pub bytes_per_key: usize,
}

/// Pointer-sized words a dictionary entry and its bucket slot cost.
const DICT_ENTRY_OVERHEAD: usize = 3 * std::mem::size_of::<usize>();
const DICT_SLOT_OVERHEAD: usize = std::mem::size_of::<usize>();

impl Engine {
    /// Assemble the full overhead report.
    pub fn memory_overhead(&self) -> MemoryOverhead {
        let total_allocated = alloc::used_memory();
        let resident_set = alloc::resident_set_size();
        // The system allocator exposes no active/resident split; the
        // allocator level is folded into the process level.
        let allocator_allocated = total_allocated;
        let allocator_active = total_allocated;
        let allocator_resident = total_allocated;

        let ratio = |num: usize, den: usize| {
            if den == 0 {
                1.0
            } else {
                num as f64 / den as f64
            }
        };

        let mut overhead_total = self.startup_memory;

        // Replication buffer: the shared backlog first, anything beyond
        // it is attributed to replica output.
        let (clients_replicas, repl_backlog) = if self.replica_count > 0
            && self.repl_buffer_mem > self.repl_backlog_size
        {
            (
                self.repl_buffer_mem - self.repl_backlog_size,
                self.repl_backlog_size,
            )
        } else {
            (0, self.repl_buffer_mem)
        };
        overhead_total += clients_replicas + repl_backlog;

        let clients_normal: usize = self
            .clients
            .values()
            .filter(|c| c.class != ClientClass::Replica)
            .map(|c| c.buffered_bytes())
            .sum();
        overhead_total += clients_normal;

        overhead_total += self.aof_buffer_bytes;
        overhead_total += self.script_cache_bytes;
        overhead_total += self.functions_cache_bytes;

        let mut dbs = Vec::new();
        let mut total_keys = 0usize;
        for db in &self.dbs {
            let keys = db.key_count();
            if keys == 0 {
                continue;
            }
            total_keys += keys;
            let overhead_ht_main = keys * (DICT_ENTRY_OVERHEAD + DICT_SLOT_OVERHEAD)
                + keys * std::mem::size_of::<crate::value::Object>();
            let overhead_ht_expires =
                db.expires_count() * (DICT_ENTRY_OVERHEAD + DICT_SLOT_OVERHEAD);
            overhead_total += overhead_ht_main + overhead_ht_expires;
            dbs.push(DbOverhead {
                db_index: db.id,
                overhead_ht_main,
                overhead_ht_expires,
            });
        }

        let dataset = total_allocated.saturating_sub(overhead_total);
        let peak_allocated = alloc::peak_memory();
        let net_usage = total_allocated.saturating_sub(self.startup_memory).max(1);

        MemoryOverhead {
            total_allocated,
            startup_allocated: self.startup_memory,
            peak_allocated,
            resident_set,
            total_frag: ratio(resident_set, total_allocated),
            total_frag_bytes: resident_set as i64 - total_allocated as i64,
            allocator_frag: ratio(allocator_active, allocator_allocated),
            allocator_frag_bytes: allocator_active as i64 - allocator_allocated as i64,
            allocator_rss: ratio(allocator_resident, allocator_active),
            allocator_rss_bytes: allocator_resident as i64 - allocator_active as i64,
            rss_extra: ratio(resident_set, allocator_resident),
            rss_extra_bytes: resident_set as i64 - allocator_resident as i64,
            clients_normal,
            clients_replicas,
            repl_backlog,
            aof_buffer: self.aof_buffer_bytes,
            lua_caches: self.script_cache_bytes,
            functions_caches: self.functions_cache_bytes,
            dbs,
            overhead_total,
            dataset,
            total_keys,
            peak_perc: ratio(total_allocated, peak_allocated) * 100.0,
            dataset_perc: ratio(dataset, net_usage) * 100.0,
            bytes_per_key: if total_keys == 0 {
                0
            } else {
                net_usage / total_keys
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::core::config::Config;
    use crate::engine::Engine;

    #[test]
    fn test_overhead_report_accounts_keys() {
        let mut engine = Engine::new(Config::default());
        let client = engine.create_client(0);
        for i in 0..100 {
            engine.execute(
                client,
                &[
                    b"set".to_vec(),
                    format!("key-{i}").into_bytes(),
                    b"value".to_vec(),
                ],
            );
        }
        let report = engine.memory_overhead();
        assert_eq!(report.total_keys, 100);
        assert_eq!(report.dbs.len(), 1);
        assert!(report.dbs[0].overhead_ht_main > 0);
        assert!(report.total_allocated > 0);
        assert!(report.peak_allocated >= report.total_allocated);
        assert!(report.total_frag >= 0.0);
    }

    #[test]
    fn test_report_serializes_for_exporters() {
        let mut engine = Engine::new(Config::default());
        let client = engine.create_client(0);
        engine.execute(client, &[b"set".to_vec(), b"k".to_vec(), b"v".to_vec()]);
        let report = engine.memory_overhead();
        let json = serde_json::to_string(&report).unwrap();
        assert!(json.contains("\"total_allocated\""));
        assert!(json.contains("\"overhead_ht_main\""));
    }

    #[test]
    fn test_replication_buffer_split() {
        let mut engine = Engine::new(Config::default());
        engine.replica_count = 2;
        engine.repl_backlog_size = 1000;
        engine.repl_buffer_mem = 1500;
        let report = engine.memory_overhead();
        assert_eq!(report.repl_backlog, 1000);
        assert_eq!(report.clients_replicas, 500);

        engine.repl_buffer_mem = 800;
        let report = engine.memory_overhead();
        assert_eq!(report.repl_backlog, 800);
        assert_eq!(report.clients_replicas, 0);
    }
}
