//! OBJECT and MEMORY introspection commands.

use super::reply::Reply;
use super::{arg_eq_ignore_case, arg_i64, CommandError, CommandResult};
use crate::client::ClientId;
use crate::db::LookupFlags;
use crate::engine::Engine;
use crate::memory::{self, alloc, doctor};
use crate::value::{self, Obj};

/// OBJECT inspects without touching: no LRU update, no miss effects.
fn object_lookup(engine: &mut Engine, client_id: ClientId, key: &[u8]) -> CommandResult<Obj> {
    let db = engine.clients[&client_id].db;
    engine
        .lookup_with_flags(
            db,
            key,
            LookupFlags {
                notouch: true,
                nonotify: true,
                nostats: true,
                ..LookupFlags::default()
            },
        )
        .ok_or_else(|| CommandError::Other("no such key".into()))
}

pub fn object_command(
    engine: &mut Engine,
    client_id: ClientId,
    argv: &[Vec<u8>],
) -> CommandResult<()> {
    let sub = String::from_utf8_lossy(&argv[1]).to_ascii_lowercase();
    match (sub.as_str(), argv.len()) {
        ("help", 2) => {
            let lines = [
                "OBJECT <subcommand> [<arg> [value] [opt] ...]. Subcommands are:",
                "ENCODING <key>",
                "    Return the kind of internal representation used in order to store the",
                "    value associated with <key>.",
                "FREQ <key>",
                "    Return the access frequency index of the <key>. The returned integer is",
                "    proportional to the logarithm of the real access frequency.",
                "IDLETIME <key>",
                "    Return the idle time of the <key>, that is the approximated number of",
                "    seconds elapsed since the last access to the key.",
                "REFCOUNT <key>",
                "    Return the number of references of the value associated with <key>.",
                "HELP",
                "    Print this help.",
            ];
            engine.push_reply(
                client_id,
                Reply::Array(lines.iter().map(|l| Reply::Simple((*l).into())).collect()),
            );
            Ok(())
        }
        ("refcount", 3) => {
            let value = object_lookup(engine, client_id, &argv[2])?;
            engine.push_reply(client_id, Reply::Int(value::refcount(&value)));
            Ok(())
        }
        ("encoding", 3) => {
            let value = object_lookup(engine, client_id, &argv[2])?;
            engine.push_reply(client_id, Reply::bulk(value.encoding().name()));
            Ok(())
        }
        ("idletime", 3) => {
            if engine.config.maxmemory_policy.uses_lfu() {
                return Err(CommandError::Other(
                    "An LFU maxmemory policy is selected, idle time not tracked. Please note \
                     that when switching between maxmemory policies at runtime LFU and LRU \
                     data will take some time to adjust."
                        .into(),
                ));
            }
            let value = object_lookup(engine, client_id, &argv[2])?;
            let idle = value.idle_time_seconds(engine.clock.now_ms());
            engine.push_reply(client_id, Reply::Int(idle as i64));
            Ok(())
        }
        ("freq", 3) => {
            if !engine.config.maxmemory_policy.uses_lfu() {
                return Err(CommandError::Other(
                    "An LFU maxmemory policy is not selected, access frequency not tracked. \
                     Please note that when switching between maxmemory policies at runtime LFU \
                     and LRU data will take some time to adjust."
                        .into(),
                ));
            }
            let value = object_lookup(engine, client_id, &argv[2])?;
            let freq = value.freq(engine.clock.now_ms(), engine.config.lfu_decay_time);
            engine.push_reply(client_id, Reply::Int(freq as i64));
            Ok(())
        }
        _ => Err(CommandError::Other(format!(
            "Unknown subcommand or wrong number of arguments for '{sub}'. Try OBJECT HELP."
        ))),
    }
}

fn stats_reply(engine: &Engine) -> Reply {
    let overhead = engine.memory_overhead();
    let mut items = vec![
        Reply::bulk("peak.allocated"),
        Reply::Int(overhead.peak_allocated as i64),
        Reply::bulk("total.allocated"),
        Reply::Int(overhead.total_allocated as i64),
        Reply::bulk("startup.allocated"),
        Reply::Int(overhead.startup_allocated as i64),
        Reply::bulk("replication.backlog"),
        Reply::Int(overhead.repl_backlog as i64),
        Reply::bulk("clients.slaves"),
        Reply::Int(overhead.clients_replicas as i64),
        Reply::bulk("clients.normal"),
        Reply::Int(overhead.clients_normal as i64),
        Reply::bulk("aof.buffer"),
        Reply::Int(overhead.aof_buffer as i64),
        Reply::bulk("lua.caches"),
        Reply::Int(overhead.lua_caches as i64),
        Reply::bulk("functions.caches"),
        Reply::Int(overhead.functions_caches as i64),
    ];
    for db in &overhead.dbs {
        items.push(Reply::bulk(format!("db.{}", db.db_index)));
        items.push(Reply::Array(vec![
            Reply::bulk("overhead.hashtable.main"),
            Reply::Int(db.overhead_ht_main as i64),
            Reply::bulk("overhead.hashtable.expires"),
            Reply::Int(db.overhead_ht_expires as i64),
        ]));
    }
    items.extend([
        Reply::bulk("overhead.total"),
        Reply::Int(overhead.overhead_total as i64),
        Reply::bulk("keys.count"),
        Reply::Int(overhead.total_keys as i64),
        Reply::bulk("keys.bytes-per-key"),
        Reply::Int(overhead.bytes_per_key as i64),
        Reply::bulk("dataset.bytes"),
        Reply::Int(overhead.dataset as i64),
        Reply::bulk("dataset.percentage"),
        Reply::bulk(format!("{:.2}", overhead.dataset_perc)),
        Reply::bulk("peak.percentage"),
        Reply::bulk(format!("{:.2}", overhead.peak_perc)),
        Reply::bulk("allocator.resident"),
        Reply::Int(overhead.resident_set as i64),
        Reply::bulk("total-fragmentation.ratio"),
        Reply::bulk(format!("{:.2}", overhead.total_frag)),
    ]);
    Reply::Array(items)
}

pub fn memory_command(
    engine: &mut Engine,
    client_id: ClientId,
    argv: &[Vec<u8>],
) -> CommandResult<()> {
    let sub = String::from_utf8_lossy(&argv[1]).to_ascii_lowercase();
    match (sub.as_str(), argv.len()) {
        ("usage", 3) | ("usage", 5) => {
            let mut samples = memory::DEFAULT_SAMPLES;
            if argv.len() == 5 {
                if !arg_eq_ignore_case(&argv[3], "samples") {
                    return Err(CommandError::Syntax);
                }
                let parsed = arg_i64(&argv[4])?;
                if parsed < 0 {
                    return Err(CommandError::Other(
                        "Number of samples must be non-negative".into(),
                    ));
                }
                samples = if parsed == 0 { usize::MAX } else { parsed as usize };
            }
            let db = engine.clients[&client_id].db;
            let reply = match engine.lookup_with_flags(
                db,
                &argv[2],
                LookupFlags {
                    notouch: true,
                    nonotify: true,
                    nostats: true,
                    ..LookupFlags::default()
                },
            ) {
                None => Reply::Nil,
                Some(value) => {
                    // Key bytes and dictionary bookkeeping count too.
                    let key_overhead = argv[2].len() + 3 * std::mem::size_of::<usize>();
                    Reply::Int((memory::compute_size(&value, samples) + key_overhead) as i64)
                }
            };
            engine.push_reply(client_id, reply);
            Ok(())
        }
        ("stats", 2) => {
            let reply = stats_reply(engine);
            engine.push_reply(client_id, reply);
            Ok(())
        }
        ("doctor", 2) => {
            let overhead = engine.memory_overhead();
            let context = doctor::DoctorContext {
                client_count: engine.client_count(),
                replica_count: engine.replica_count,
                cached_scripts: engine.script_cache_count,
            };
            let report = doctor::report(&overhead, &context);
            engine.push_reply(client_id, Reply::Bulk(report.into_bytes()));
            Ok(())
        }
        ("purge", 2) => {
            alloc::purge();
            engine.push_reply(client_id, Reply::Ok);
            Ok(())
        }
        ("malloc-stats", 2) => {
            engine.push_reply(
                client_id,
                Reply::Bulk(alloc::allocator_stats_report().into_bytes()),
            );
            Ok(())
        }
        _ => Err(CommandError::Other(format!(
            "Unknown subcommand or wrong number of arguments for '{sub}'. Try MEMORY HELP."
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::{Config, MaxmemoryPolicy};

    fn run(engine: &mut Engine, client: u64, parts: &[&str]) -> Vec<Reply> {
        let argv: Vec<Vec<u8>> = parts.iter().map(|p| p.as_bytes().to_vec()).collect();
        engine.execute(client, &argv)
    }

    #[test]
    fn test_object_encoding_and_refcount() {
        let mut engine = Engine::new(Config::default());
        let client = engine.create_client(0);
        run(&mut engine, client, &["set", "n", "42"]);
        assert_eq!(
            run(&mut engine, client, &["object", "encoding", "n"]),
            vec![Reply::bulk("int")]
        );
        // 42 lives in the shared pool: refcount reports the immortal
        // sentinel.
        assert_eq!(
            run(&mut engine, client, &["object", "refcount", "n"]),
            vec![Reply::Int(i32::MAX as i64)]
        );
        run(&mut engine, client, &["set", "s", "plainstring"]);
        let replies = run(&mut engine, client, &["object", "refcount", "s"]);
        assert!(matches!(replies[0], Reply::Int(n) if n >= 1 && n < 100));
    }

    #[test]
    fn test_object_missing_key_errors() {
        let mut engine = Engine::new(Config::default());
        let client = engine.create_client(0);
        let replies = run(&mut engine, client, &["object", "encoding", "missing"]);
        assert!(matches!(&replies[0], Reply::Error(m) if m.contains("no such key")));
    }

    #[test]
    fn test_freq_requires_lfu_and_idletime_requires_lru() {
        let mut engine = Engine::new(Config::default());
        let client = engine.create_client(0);
        run(&mut engine, client, &["set", "k", "v"]);
        let replies = run(&mut engine, client, &["object", "freq", "k"]);
        assert!(matches!(&replies[0], Reply::Error(m) if m.contains("LFU maxmemory policy is not")));
        assert!(matches!(
            run(&mut engine, client, &["object", "idletime", "k"])[0],
            Reply::Int(_)
        ));

        engine.config.maxmemory_policy = MaxmemoryPolicy::AllKeysLfu;
        run(&mut engine, client, &["set", "j", "v"]);
        assert!(matches!(
            run(&mut engine, client, &["object", "freq", "j"])[0],
            Reply::Int(_)
        ));
        let replies = run(&mut engine, client, &["object", "idletime", "j"]);
        assert!(matches!(&replies[0], Reply::Error(m) if m.contains("idle time not tracked")));
    }

    #[test]
    fn test_memory_usage() {
        let mut engine = Engine::new(Config::default());
        let client = engine.create_client(0);
        run(&mut engine, client, &["set", "k", "hello world"]);
        let replies = run(&mut engine, client, &["memory", "usage", "k"]);
        assert!(matches!(replies[0], Reply::Int(n) if n > 0));
        assert_eq!(
            run(&mut engine, client, &["memory", "usage", "missing"]),
            vec![Reply::Nil]
        );
        let replies = run(&mut engine, client, &["memory", "usage", "k", "samples", "10"]);
        assert!(matches!(replies[0], Reply::Int(_)));
    }

    #[test]
    fn test_memory_stats_and_doctor() {
        let mut engine = Engine::new(Config::default());
        let client = engine.create_client(0);
        run(&mut engine, client, &["set", "k", "v"]);
        let replies = run(&mut engine, client, &["memory", "stats"]);
        let Reply::Array(items) = &replies[0] else {
            panic!("expected array");
        };
        assert!(items.contains(&Reply::bulk("total.allocated")));
        let replies = run(&mut engine, client, &["memory", "doctor"]);
        assert!(matches!(&replies[0], Reply::Bulk(text) if !text.is_empty()));
        assert_eq!(run(&mut engine, client, &["memory", "purge"]), vec![Reply::Ok]);
    }
}
