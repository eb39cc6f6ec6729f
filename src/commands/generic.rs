//! Generic keyspace commands.

use super::reply::Reply;
use super::{arg_i64, CommandError, CommandResult};
use crate::blocking::WaitRequest;
use crate::client::ClientId;
use crate::core::config::MaxmemoryPolicy;
use crate::engine::Engine;
use crate::notify::{self, NotifyClass};

fn del_generic(
    engine: &mut Engine,
    client_id: ClientId,
    argv: &[Vec<u8>],
    lazy: bool,
) -> CommandResult<()> {
    let db = engine.clients[&client_id].db;
    let mut deleted = 0;
    for key in &argv[1..] {
        // Lazy expiry first so an already-dead key counts as absent.
        let present = engine.lookup_write(db, key).is_some();
        if !present {
            continue;
        }
        let removed = if lazy {
            engine.delete_async(db, key)
        } else {
            engine.delete_sync(db, key)
        };
        if removed {
            engine.notify_keyspace_event(notify::GENERIC, "del", key, db);
            engine.dirty += 1;
            deleted += 1;
        }
    }
    engine.push_reply(client_id, Reply::Int(deleted));
    Ok(())
}

pub fn del_command(engine: &mut Engine, client_id: ClientId, argv: &[Vec<u8>]) -> CommandResult<()> {
    del_generic(engine, client_id, argv, false)
}

pub fn unlink_command(
    engine: &mut Engine,
    client_id: ClientId,
    argv: &[Vec<u8>],
) -> CommandResult<()> {
    del_generic(engine, client_id, argv, true)
}

pub fn exists_command(
    engine: &mut Engine,
    client_id: ClientId,
    argv: &[Vec<u8>],
) -> CommandResult<()> {
    let db = engine.clients[&client_id].db;
    let mut count = 0;
    for key in &argv[1..] {
        if engine.lookup_read(db, key).is_some() {
            count += 1;
        }
    }
    engine.push_reply(client_id, Reply::Int(count));
    Ok(())
}

pub fn type_command(
    engine: &mut Engine,
    client_id: ClientId,
    argv: &[Vec<u8>],
) -> CommandResult<()> {
    let db = engine.clients[&client_id].db;
    let reply = match engine.lookup_read(db, &argv[1]) {
        None => Reply::Simple("none".into()),
        Some(value) => Reply::Simple(value.object_type().name().into()),
    };
    engine.push_reply(client_id, reply);
    Ok(())
}

fn ttl_generic(
    engine: &mut Engine,
    client_id: ClientId,
    key: &[u8],
    output_ms: bool,
) -> CommandResult<()> {
    let db = engine.clients[&client_id].db;
    if engine.lookup_read(db, key).is_none() {
        engine.push_reply(client_id, Reply::Int(-2));
        return Ok(());
    }
    let reply = match engine.db(db).expire_deadline(key) {
        None => Reply::Int(-1),
        Some(deadline) => {
            let remaining = (deadline - engine.clock.now_ms()).max(0);
            Reply::Int(if output_ms {
                remaining
            } else {
                (remaining + 500) / 1000
            })
        }
    };
    engine.push_reply(client_id, reply);
    Ok(())
}

pub fn ttl_command(engine: &mut Engine, client_id: ClientId, argv: &[Vec<u8>]) -> CommandResult<()> {
    ttl_generic(engine, client_id, &argv[1], false)
}

pub fn pttl_command(
    engine: &mut Engine,
    client_id: ClientId,
    argv: &[Vec<u8>],
) -> CommandResult<()> {
    ttl_generic(engine, client_id, &argv[1], true)
}

/// EXPIRE/PEXPIRE/EXPIREAT/PEXPIREAT. A deadline already in the past
/// deletes the key immediately instead of storing a dead record.
fn expire_generic(
    engine: &mut Engine,
    client_id: ClientId,
    argv: &[Vec<u8>],
    seconds_unit: bool,
    absolute: bool,
) -> CommandResult<()> {
    let command = String::from_utf8_lossy(&argv[0]).to_ascii_lowercase();
    let db = engine.clients[&client_id].db;
    let key = &argv[1];
    let raw = arg_i64(&argv[2])?;
    if argv.len() > 3 {
        // NX/XX/GT/LT options are an outer-surface concern left to the
        // command layer that owns them.
        return Err(CommandError::Syntax);
    }
    let basetime = if absolute { 0 } else { engine.clock.now_ms() };
    let deadline = if seconds_unit {
        raw.checked_mul(1000).and_then(|ms| ms.checked_add(basetime))
    } else {
        raw.checked_add(basetime)
    }
    .ok_or(CommandError::ExpireTime(command))?;

    if engine.lookup_write(db, key).is_none() {
        engine.push_reply(client_id, Reply::Int(0));
        return Ok(());
    }

    if deadline <= engine.clock.now_ms() {
        let lazy = engine.config.lazyfree_lazy_expire;
        if lazy {
            engine.delete_async(db, key);
        } else {
            engine.delete_sync(db, key);
        }
        engine.notify_keyspace_event(notify::GENERIC, "del", key, db);
        engine.dirty += 1;
    } else {
        engine.db_mut(db).set_expire(key, deadline);
        engine.db_mut(db).signal_modified(key);
        engine.notify_keyspace_event(notify::GENERIC, "expire", key, db);
        engine.dirty += 1;
    }
    engine.push_reply(client_id, Reply::Int(1));
    Ok(())
}

pub fn expire_command(
    engine: &mut Engine,
    client_id: ClientId,
    argv: &[Vec<u8>],
) -> CommandResult<()> {
    expire_generic(engine, client_id, argv, true, false)
}

pub fn pexpire_command(
    engine: &mut Engine,
    client_id: ClientId,
    argv: &[Vec<u8>],
) -> CommandResult<()> {
    expire_generic(engine, client_id, argv, false, false)
}

pub fn expireat_command(
    engine: &mut Engine,
    client_id: ClientId,
    argv: &[Vec<u8>],
) -> CommandResult<()> {
    expire_generic(engine, client_id, argv, true, true)
}

pub fn pexpireat_command(
    engine: &mut Engine,
    client_id: ClientId,
    argv: &[Vec<u8>],
) -> CommandResult<()> {
    expire_generic(engine, client_id, argv, false, true)
}

pub fn persist_command(
    engine: &mut Engine,
    client_id: ClientId,
    argv: &[Vec<u8>],
) -> CommandResult<()> {
    let db = engine.clients[&client_id].db;
    let key = &argv[1];
    if engine.lookup_write(db, key).is_none() {
        engine.push_reply(client_id, Reply::Int(0));
        return Ok(());
    }
    if engine.db_mut(db).remove_expire(key) {
        engine.db_mut(db).signal_modified(key);
        engine.notify_keyspace_event(notify::GENERIC, "persist", key, db);
        engine.dirty += 1;
        engine.push_reply(client_id, Reply::Int(1));
    } else {
        engine.push_reply(client_id, Reply::Int(0));
    }
    Ok(())
}

/// CONFIG GET/SET for the knobs the engine owns.
pub fn config_command(
    engine: &mut Engine,
    client_id: ClientId,
    argv: &[Vec<u8>],
) -> CommandResult<()> {
    let sub = String::from_utf8_lossy(&argv[1]).to_ascii_lowercase();
    match sub.as_str() {
        "set" if argv.len() == 4 => {
            let name = String::from_utf8_lossy(&argv[2]).to_ascii_lowercase();
            let value = String::from_utf8_lossy(&argv[3]).into_owned();
            config_set(engine, &name, &value)?;
            engine.push_reply(client_id, Reply::Ok);
            Ok(())
        }
        "get" if argv.len() == 3 => {
            let name = String::from_utf8_lossy(&argv[2]).to_ascii_lowercase();
            let value = config_get(engine, &name)
                .ok_or_else(|| CommandError::Other(format!("Unknown config parameter '{name}'")))?;
            engine.push_reply(
                client_id,
                Reply::Array(vec![Reply::bulk(name), Reply::bulk(value)]),
            );
            Ok(())
        }
        _ => Err(CommandError::Syntax),
    }
}

fn config_set(engine: &mut Engine, name: &str, value: &str) -> CommandResult<()> {
    let bad_value =
        || CommandError::Other(format!("Invalid argument '{value}' for CONFIG SET '{name}'"));
    let parse_usize = |value: &str| value.parse::<usize>().map_err(|_| bad_value());
    match name {
        "notify-keyspace-events" => {
            engine.config.notify_keyspace_events =
                NotifyClass::parse(value).map_err(|_| bad_value())?;
        }
        "maxmemory-policy" => {
            engine.config.maxmemory_policy =
                MaxmemoryPolicy::from_name(value).ok_or_else(bad_value)?;
        }
        "set-max-intset-entries" => engine.config.set_max_intset_entries = parse_usize(value)?,
        "hash-max-listpack-entries" => {
            engine.config.hash_max_listpack_entries = parse_usize(value)?
        }
        "hash-max-listpack-value" => engine.config.hash_max_listpack_value = parse_usize(value)?,
        "zset-max-listpack-entries" => {
            engine.config.zset_max_listpack_entries = parse_usize(value)?
        }
        "zset-max-listpack-value" => engine.config.zset_max_listpack_value = parse_usize(value)?,
        "list-max-listpack-size" => engine.config.list_max_listpack_size = parse_usize(value)?,
        "stream-node-max-entries" => engine.config.stream_node_max_entries = parse_usize(value)?,
        "lazyfree-lazy-expire" => {
            engine.config.lazyfree_lazy_expire = match value {
                "yes" => true,
                "no" => false,
                _ => return Err(bad_value()),
            }
        }
        _ => {
            return Err(CommandError::Other(format!(
                "Unknown config parameter '{name}'"
            )))
        }
    }
    Ok(())
}

fn config_get(engine: &Engine, name: &str) -> Option<String> {
    let value = match name {
        "notify-keyspace-events" => engine.config.notify_keyspace_events.to_string(),
        "maxmemory-policy" => engine.config.maxmemory_policy.name().to_string(),
        "set-max-intset-entries" => engine.config.set_max_intset_entries.to_string(),
        "hash-max-listpack-entries" => engine.config.hash_max_listpack_entries.to_string(),
        "hash-max-listpack-value" => engine.config.hash_max_listpack_value.to_string(),
        "zset-max-listpack-entries" => engine.config.zset_max_listpack_entries.to_string(),
        "zset-max-listpack-value" => engine.config.zset_max_listpack_value.to_string(),
        "list-max-listpack-size" => engine.config.list_max_listpack_size.to_string(),
        "stream-node-max-entries" => engine.config.stream_node_max_entries.to_string(),
        "lazyfree-lazy-expire" => if engine.config.lazyfree_lazy_expire { "yes" } else { "no" }.to_string(),
        _ => return None,
    };
    Some(value)
}

/// WAIT numreplicas timeout.
pub fn wait_command(
    engine: &mut Engine,
    client_id: ClientId,
    argv: &[Vec<u8>],
) -> CommandResult<()> {
    let numreplicas = arg_i64(&argv[1])?;
    if numreplicas < 0 {
        return Err(CommandError::NotAnInteger);
    }
    let timeout_at = super::parse_timeout_ms(engine, &argv[2])?;
    let acked = engine.acked_replicas();
    if acked >= numreplicas as usize {
        engine.push_reply(client_id, Reply::Int(acked as i64));
        return Ok(());
    }
    engine.block_for_wait(
        client_id,
        WaitRequest {
            numreplicas: numreplicas as usize,
            offset: engine.dirty,
        },
        timeout_at,
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::Config;

    fn run(engine: &mut Engine, client: u64, parts: &[&str]) -> Vec<Reply> {
        let argv: Vec<Vec<u8>> = parts.iter().map(|p| p.as_bytes().to_vec()).collect();
        engine.execute(client, &argv)
    }

    #[test]
    fn test_del_exists_type() {
        let mut engine = Engine::new(Config::default());
        let client = engine.create_client(0);
        run(&mut engine, client, &["set", "k", "v"]);
        assert_eq!(run(&mut engine, client, &["exists", "k", "k", "nope"]), vec![Reply::Int(2)]);
        assert_eq!(
            run(&mut engine, client, &["type", "k"]),
            vec![Reply::Simple("string".into())]
        );
        assert_eq!(run(&mut engine, client, &["del", "k", "nope"]), vec![Reply::Int(1)]);
        assert_eq!(run(&mut engine, client, &["exists", "k"]), vec![Reply::Int(0)]);
    }

    #[test]
    fn test_ttl_and_persist() {
        let mut engine = Engine::new(Config::default());
        let client = engine.create_client(0);
        run(&mut engine, client, &["set", "k", "v"]);
        assert_eq!(run(&mut engine, client, &["ttl", "k"]), vec![Reply::Int(-1)]);
        assert_eq!(run(&mut engine, client, &["ttl", "missing"]), vec![Reply::Int(-2)]);
        run(&mut engine, client, &["expire", "k", "100"]);
        let replies = run(&mut engine, client, &["ttl", "k"]);
        assert!(matches!(replies[0], Reply::Int(secs) if (99..=100).contains(&secs)));
        assert_eq!(run(&mut engine, client, &["persist", "k"]), vec![Reply::Int(1)]);
        assert_eq!(run(&mut engine, client, &["persist", "k"]), vec![Reply::Int(0)]);
        assert_eq!(run(&mut engine, client, &["ttl", "k"]), vec![Reply::Int(-1)]);
    }

    #[test]
    fn test_past_deadline_deletes_now() {
        let mut engine = Engine::new(Config::default());
        let client = engine.create_client(0);
        run(&mut engine, client, &["set", "k", "v"]);
        assert_eq!(
            run(&mut engine, client, &["pexpireat", "k", "1"]),
            vec![Reply::Int(1)]
        );
        assert_eq!(run(&mut engine, client, &["exists", "k"]), vec![Reply::Int(0)]);
        assert!(engine.db(0).check_expires_subset_of_dict());
    }

    #[test]
    fn test_config_round_trip() {
        let mut engine = Engine::new(Config::default());
        let client = engine.create_client(0);
        run(
            &mut engine,
            client,
            &["config", "set", "notify-keyspace-events", "KEA"],
        );
        assert_eq!(
            run(&mut engine, client, &["config", "get", "notify-keyspace-events"]),
            vec![Reply::Array(vec![
                Reply::bulk("notify-keyspace-events"),
                Reply::bulk("AKE")
            ])]
        );
        let replies = run(&mut engine, client, &["config", "set", "maxmemory-policy", "bogus"]);
        assert!(matches!(&replies[0], Reply::Error(_)));
    }

    #[test]
    fn test_wait_returns_immediately_when_satisfied() {
        let mut engine = Engine::new(Config::default());
        let client = engine.create_client(0);
        assert_eq!(run(&mut engine, client, &["wait", "0", "0"]), vec![Reply::Int(0)]);
    }

    #[test]
    fn test_wait_blocks_until_ack() {
        let mut engine = Engine::new(Config::default());
        let client = engine.create_client(0);
        assert!(run(&mut engine, client, &["wait", "2", "0"]).is_empty());
        assert_eq!(engine.blocked_clients(), 1);
        engine.replica_ack(2);
        let replies = engine.take_replies(client);
        assert_eq!(replies, vec![Reply::Int(2)]);
        assert_eq!(engine.blocked_clients(), 0);
    }
}
