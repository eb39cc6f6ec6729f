//! Set commands.
//!
//! Sets of all-integer members stay intset-encoded until the element
//! bound is crossed or a non-integer member arrives; the migration to
//! the hash-table encoding is one-way.

use std::collections::HashSet;
use std::sync::Arc;

use super::reply::Reply;
use super::CommandResult;
use crate::client::ClientId;
use crate::encodings::IntSet;
use crate::engine::Engine;
use crate::notify;
use crate::value::{make_owned, strconv, Object, ObjectBody, ValueType};

impl Engine {
    /// Add one member, handling encoding selection and migration.
    /// Returns true when the member is new.
    pub(crate) fn generic_set_add(&mut self, db: usize, key: &[u8], member: &[u8]) -> bool {
        let as_int = strconv::parse_i64(member);
        if self.dbs[db].get_raw(key).is_none() {
            let body = if as_int.is_some() {
                ObjectBody::IntSet(IntSet::new())
            } else {
                ObjectBody::SetHt(HashSet::new())
            };
            self.set_key(db, key, Arc::new(Object::new(body)), false);
        }

        let max_intset = self.config.set_max_intset_entries;
        let slot = self.dbs[db].get_raw_mut(key).expect("created above");
        let owned = make_owned(slot);

        let needs_convert = match owned.body() {
            ObjectBody::IntSet(set) => as_int.is_none() || set.len() >= max_intset,
            _ => false,
        };
        if needs_convert {
            if let ObjectBody::IntSet(set) = owned.body() {
                let members: HashSet<Vec<u8>> =
                    set.iter().map(|v| strconv::format_i64(v)).collect();
                *owned.body_mut() = ObjectBody::SetHt(members);
            }
        }
        match owned.body_mut() {
            ObjectBody::IntSet(set) => {
                set.insert(as_int.expect("conversion handled non-integers"))
            }
            ObjectBody::SetHt(set) => set.insert(member.to_vec()),
            _ => unreachable!("caller type-checked the key"),
        }
    }
}

pub fn sadd_command(engine: &mut Engine, client_id: ClientId, argv: &[Vec<u8>]) -> CommandResult<()> {
    let db = engine.clients[&client_id].db;
    let key = &argv[1];
    super::expect_type(engine.lookup_write(db, key), ValueType::Set)?;
    let mut added = 0;
    for member in &argv[2..] {
        if engine.generic_set_add(db, key, member) {
            added += 1;
        }
    }
    if added > 0 {
        engine.db_mut(db).signal_modified(key);
        engine.notify_keyspace_event(notify::SET, "sadd", key, db);
        engine.dirty += 1;
    }
    engine.push_reply(client_id, Reply::Int(added));
    Ok(())
}

pub fn srem_command(engine: &mut Engine, client_id: ClientId, argv: &[Vec<u8>]) -> CommandResult<()> {
    let db = engine.clients[&client_id].db;
    let key = &argv[1];
    if super::expect_type(engine.lookup_write(db, key), ValueType::Set)?.is_none() {
        engine.push_reply(client_id, Reply::Int(0));
        return Ok(());
    }
    let (removed, emptied) = {
        let slot = engine.db_mut(db).get_raw_mut(key).expect("checked above");
        let owned = make_owned(slot);
        let mut removed = 0;
        for member in &argv[2..] {
            let hit = match owned.body_mut() {
                ObjectBody::IntSet(set) => strconv::parse_i64(member)
                    .map(|v| set.remove(v))
                    .unwrap_or(false),
                ObjectBody::SetHt(set) => set.remove(member.as_slice()),
                _ => false,
            };
            if hit {
                removed += 1;
            }
        }
        let emptied = match owned.body() {
            ObjectBody::IntSet(set) => set.is_empty(),
            ObjectBody::SetHt(set) => set.is_empty(),
            _ => false,
        };
        (removed, emptied)
    };
    if removed > 0 {
        engine.db_mut(db).signal_modified(key);
        engine.notify_keyspace_event(notify::SET, "srem", key, db);
        engine.dirty += 1;
        if emptied {
            engine.delete_sync(db, key);
            engine.notify_keyspace_event(notify::GENERIC, "del", key, db);
        }
    }
    engine.push_reply(client_id, Reply::Int(removed));
    Ok(())
}

pub fn scard_command(
    engine: &mut Engine,
    client_id: ClientId,
    argv: &[Vec<u8>],
) -> CommandResult<()> {
    let db = engine.clients[&client_id].db;
    let len = match super::expect_type(engine.lookup_read(db, &argv[1]), ValueType::Set)? {
        None => 0,
        Some(value) => match value.body() {
            ObjectBody::IntSet(set) => set.len(),
            ObjectBody::SetHt(set) => set.len(),
            _ => 0,
        },
    };
    engine.push_reply(client_id, Reply::Int(len as i64));
    Ok(())
}

pub fn sismember_command(
    engine: &mut Engine,
    client_id: ClientId,
    argv: &[Vec<u8>],
) -> CommandResult<()> {
    let db = engine.clients[&client_id].db;
    let member = &argv[2];
    let found = match super::expect_type(engine.lookup_read(db, &argv[1]), ValueType::Set)? {
        None => false,
        Some(value) => match value.body() {
            ObjectBody::IntSet(set) => strconv::parse_i64(member)
                .map(|v| set.contains(v))
                .unwrap_or(false),
            ObjectBody::SetHt(set) => set.contains(member.as_slice()),
            _ => false,
        },
    };
    engine.push_reply(client_id, Reply::Int(found as i64));
    Ok(())
}

pub fn smembers_command(
    engine: &mut Engine,
    client_id: ClientId,
    argv: &[Vec<u8>],
) -> CommandResult<()> {
    let db = engine.clients[&client_id].db;
    let members = match super::expect_type(engine.lookup_read(db, &argv[1]), ValueType::Set)? {
        None => Vec::new(),
        Some(value) => match value.body() {
            ObjectBody::IntSet(set) => set
                .iter()
                .map(|v| Reply::Bulk(strconv::format_i64(v)))
                .collect(),
            ObjectBody::SetHt(set) => {
                let mut members: Vec<&Vec<u8>> = set.iter().collect();
                members.sort();
                members
                    .into_iter()
                    .map(|m| Reply::Bulk(m.clone()))
                    .collect()
            }
            _ => Vec::new(),
        },
    };
    engine.push_reply(client_id, Reply::Array(members));
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
    fn test_integer_members_use_intset() {
        let mut engine = Engine::new(Config::default());
        let client = engine.create_client(0);
        run(&mut engine, client, &["sadd", "s", "3", "1", "2"]);
        assert_eq!(
            engine.db(0).get_raw(b"s").unwrap().encoding(),
            Encoding::IntSet
        );
        assert_eq!(run(&mut engine, client, &["scard", "s"]), vec![Reply::Int(3)]);
        assert_eq!(
            run(&mut engine, client, &["sismember", "s", "2"]),
            vec![Reply::Int(1)]
        );
    }

    #[test]
    fn test_non_integer_member_converts() {
        let mut engine = Engine::new(Config::default());
        let client = engine.create_client(0);
        run(&mut engine, client, &["sadd", "s", "1", "2"]);
        run(&mut engine, client, &["sadd", "s", "word"]);
        assert_eq!(
            engine.db(0).get_raw(b"s").unwrap().encoding(),
            Encoding::HashTable
        );
        // Old integer members survive the migration.
        assert_eq!(
            run(&mut engine, client, &["sismember", "s", "1"]),
            vec![Reply::Int(1)]
        );
        assert_eq!(run(&mut engine, client, &["scard", "s"]), vec![Reply::Int(3)]);
    }

    #[test]
    fn test_count_threshold_converts() {
        let mut engine = Engine::new(Config::default());
        engine.config.set_max_intset_entries = 3;
        let client = engine.create_client(0);
        run(&mut engine, client, &["sadd", "s", "1", "2", "3"]);
        assert_eq!(
            engine.db(0).get_raw(b"s").unwrap().encoding(),
            Encoding::IntSet
        );
        run(&mut engine, client, &["sadd", "s", "4"]);
        assert_eq!(
            engine.db(0).get_raw(b"s").unwrap().encoding(),
            Encoding::HashTable
        );
    }

    #[test]
    fn test_srem_deletes_empty_set() {
        let mut engine = Engine::new(Config::default());
        let client = engine.create_client(0);
        run(&mut engine, client, &["sadd", "s", "1"]);
        assert_eq!(run(&mut engine, client, &["srem", "s", "1", "9"]), vec![Reply::Int(1)]);
        assert_eq!(run(&mut engine, client, &["exists", "s"]), vec![Reply::Int(0)]);
    }
}
