//! Hash commands.
//!
//! Small hashes are listpack-encoded (field, value interleaved); the
//! bound on field count or single-element size migrates them to the
//! hash-table encoding, one-way.

use std::collections::HashMap;
use std::sync::Arc;

use super::reply::Reply;
use super::CommandResult;
use crate::client::ClientId;
use crate::encodings::{ListPack, LpEntry};
use crate::engine::Engine;
use crate::notify;
use crate::value::{make_owned, Object, ObjectBody, ValueType};

impl Engine {
    /// Set one field. Returns true when the field is new.
    pub(crate) fn generic_hash_set(
        &mut self,
        db: usize,
        key: &[u8],
        field: &[u8],
        value: &[u8],
    ) -> bool {
        if self.dbs[db].get_raw(key).is_none() {
            self.set_key(
                db,
                key,
                Arc::new(Object::new(ObjectBody::HashPack(ListPack::new()))),
                false,
            );
        }
        let max_entries = self.config.hash_max_listpack_entries;
        let max_value = self.config.hash_max_listpack_value;
        let slot = self.dbs[db].get_raw_mut(key).expect("created above");
        let owned = make_owned(slot);

        let needs_convert = match owned.body() {
            ObjectBody::HashPack(lp) => {
                let is_new = lp.find(field, 0, 2).is_none();
                (is_new && lp.len() / 2 >= max_entries)
                    || field.len() > max_value
                    || value.len() > max_value
            }
            _ => false,
        };
        if needs_convert {
            if let ObjectBody::HashPack(lp) = owned.body() {
                let mut map = HashMap::with_capacity(lp.len() / 2);
                let mut iter = lp.iter();
                while let (Some(f), Some(v)) = (iter.next(), iter.next()) {
                    map.insert(f.to_vec(), v.to_vec());
                }
                *owned.body_mut() = ObjectBody::HashHt(map);
            }
        }
        match owned.body_mut() {
            ObjectBody::HashPack(lp) => match lp.find(field, 0, 2) {
                Some(idx) => {
                    lp.remove(idx + 1, 1);
                    lp.insert(idx + 1, LpEntry::from_bytes(value));
                    false
                }
                None => {
                    lp.push(LpEntry::from_bytes(field));
                    lp.push(LpEntry::from_bytes(value));
                    true
                }
            },
            ObjectBody::HashHt(map) => map.insert(field.to_vec(), value.to_vec()).is_none(),
            _ => unreachable!("caller type-checked the key"),
        }
    }
}

pub fn hset_command(engine: &mut Engine, client_id: ClientId, argv: &[Vec<u8>]) -> CommandResult<()> {
    let db = engine.clients[&client_id].db;
    let key = &argv[1];
    if (argv.len() - 2) % 2 != 0 {
        return Err(super::CommandError::WrongArity("hset".into()));
    }
    super::expect_type(engine.lookup_write(db, key), ValueType::Hash)?;
    let mut created = 0;
    for chunk in argv[2..].chunks(2) {
        if engine.generic_hash_set(db, key, &chunk[0], &chunk[1]) {
            created += 1;
        }
    }
    engine.db_mut(db).signal_modified(key);
    engine.notify_keyspace_event(notify::HASH, "hset", key, db);
    engine.dirty += 1;
    engine.push_reply(client_id, Reply::Int(created));
    Ok(())
}

pub fn hget_command(engine: &mut Engine, client_id: ClientId, argv: &[Vec<u8>]) -> CommandResult<()> {
    let db = engine.clients[&client_id].db;
    let reply = match super::expect_type(engine.lookup_read(db, &argv[1]), ValueType::Hash)? {
        None => Reply::Nil,
        Some(value) => match value.body() {
            ObjectBody::HashPack(lp) => lp
                .find(&argv[2], 0, 2)
                .and_then(|idx| lp.get(idx + 1))
                .map(|e| Reply::Bulk(e.to_vec()))
                .unwrap_or(Reply::Nil),
            ObjectBody::HashHt(map) => map
                .get(argv[2].as_slice())
                .map(|v| Reply::Bulk(v.clone()))
                .unwrap_or(Reply::Nil),
            _ => Reply::Nil,
        },
    };
    engine.push_reply(client_id, reply);
    Ok(())
}

pub fn hdel_command(engine: &mut Engine, client_id: ClientId, argv: &[Vec<u8>]) -> CommandResult<()> {
    let db = engine.clients[&client_id].db;
    let key = &argv[1];
    if super::expect_type(engine.lookup_write(db, key), ValueType::Hash)?.is_none() {
        engine.push_reply(client_id, Reply::Int(0));
        return Ok(());
    }
    let (removed, emptied) = {
        let slot = engine.db_mut(db).get_raw_mut(key).expect("checked above");
        let owned = make_owned(slot);
        let mut removed = 0;
        for field in &argv[2..] {
            let hit = match owned.body_mut() {
                ObjectBody::HashPack(lp) => match lp.find(field, 0, 2) {
                    Some(idx) => {
                        lp.remove(idx, 2);
                        true
                    }
                    None => false,
                },
                ObjectBody::HashHt(map) => map.remove(field.as_slice()).is_some(),
                _ => false,
            };
            if hit {
                removed += 1;
            }
        }
        let emptied = match owned.body() {
            ObjectBody::HashPack(lp) => lp.is_empty(),
            ObjectBody::HashHt(map) => map.is_empty(),
            _ => false,
        };
        (removed, emptied)
    };
    if removed > 0 {
        engine.db_mut(db).signal_modified(key);
        engine.notify_keyspace_event(notify::HASH, "hdel", key, db);
        engine.dirty += 1;
        if emptied {
            engine.delete_sync(db, key);
            engine.notify_keyspace_event(notify::GENERIC, "del", key, db);
        }
    }
    engine.push_reply(client_id, Reply::Int(removed));
    Ok(())
}

pub fn hlen_command(engine: &mut Engine, client_id: ClientId, argv: &[Vec<u8>]) -> CommandResult<()> {
    let db = engine.clients[&client_id].db;
    let len = match super::expect_type(engine.lookup_read(db, &argv[1]), ValueType::Hash)? {
        None => 0,
        Some(value) => match value.body() {
            ObjectBody::HashPack(lp) => lp.len() / 2,
            ObjectBody::HashHt(map) => map.len(),
            _ => 0,
        },
    };
    engine.push_reply(client_id, Reply::Int(len as i64));
    Ok(())
}

pub fn hgetall_command(
    engine: &mut Engine,
    client_id: ClientId,
    argv: &[Vec<u8>],
) -> CommandResult<()> {
    let db = engine.clients[&client_id].db;
    let pairs = match super::expect_type(engine.lookup_read(db, &argv[1]), ValueType::Hash)? {
        None => Vec::new(),
        Some(value) => match value.body() {
            ObjectBody::HashPack(lp) => lp.iter().map(|e| Reply::Bulk(e.to_vec())).collect(),
            ObjectBody::HashHt(map) => {
                let mut fields: Vec<&Vec<u8>> = map.keys().collect();
                fields.sort();
                fields
                    .into_iter()
                    .flat_map(|f| {
                        [
                            Reply::Bulk(f.clone()),
                            Reply::Bulk(map[f.as_slice()].clone()),
                        ]
                    })
                    .collect()
            }
            _ => Vec::new(),
        },
    };
    engine.push_reply(client_id, Reply::Array(pairs));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::Config;
    use crate::value::Encoding;

    fn run(engine: &mut Engine, client: u64, parts: &[&str]) -> Vec<Reply> {
        let argv: Vec<Vec<u8>> = parts.iter().map(|p| p.as_bytes().to_vec()).collect();
        engine.execute(client, &argv)
    }

    #[test]
    fn test_hset_hget_update() {
        let mut engine = Engine::new(Config::default());
        let client = engine.create_client(0);
        assert_eq!(
            run(&mut engine, client, &["hset", "h", "f1", "v1", "f2", "v2"]),
            vec![Reply::Int(2)]
        );
        assert_eq!(run(&mut engine, client, &["hget", "h", "f1"]), vec![Reply::bulk("v1")]);
        assert_eq!(
            run(&mut engine, client, &["hset", "h", "f1", "v9"]),
            vec![Reply::Int(0)]
        );
        assert_eq!(run(&mut engine, client, &["hget", "h", "f1"]), vec![Reply::bulk("v9")]);
        assert_eq!(run(&mut engine, client, &["hlen", "h"]), vec![Reply::Int(2)]);
        assert_eq!(
            engine.db(0).get_raw(b"h").unwrap().encoding(),
            Encoding::ListPack
        );
    }

    #[test]
    fn test_value_size_threshold_converts() {
        let mut engine = Engine::new(Config::default());
        let client = engine.create_client(0);
        run(&mut engine, client, &["hset", "h", "f", "small"]);
        let big = "v".repeat(100);
        run(&mut engine, client, &["hset", "h", "g", &big]);
        assert_eq!(
            engine.db(0).get_raw(b"h").unwrap().encoding(),
            Encoding::HashTable
        );
        assert_eq!(run(&mut engine, client, &["hget", "h", "f"]), vec![Reply::bulk("small")]);
    }

    #[test]
    fn test_entry_count_threshold_converts() {
        let mut engine = Engine::new(Config::default());
        engine.config.hash_max_listpack_entries = 2;
        let client = engine.create_client(0);
        run(&mut engine, client, &["hset", "h", "a", "1", "b", "2"]);
        assert_eq!(
            engine.db(0).get_raw(b"h").unwrap().encoding(),
            Encoding::ListPack
        );
        run(&mut engine, client, &["hset", "h", "c", "3"]);
        assert_eq!(
            engine.db(0).get_raw(b"h").unwrap().encoding(),
            Encoding::HashTable
        );
    }

    #[test]
    fn test_hdel_deletes_empty_hash() {
        let mut engine = Engine::new(Config::default());
        let client = engine.create_client(0);
        run(&mut engine, client, &["hset", "h", "f", "v"]);
        assert_eq!(run(&mut engine, client, &["hdel", "h", "f"]), vec![Reply::Int(1)]);
        assert_eq!(run(&mut engine, client, &["exists", "h"]), vec![Reply::Int(0)]);
    }
}
