//! Sorted-set commands, including the blocking family.

use std::sync::Arc;

use super::reply::Reply;
use super::{arg_eq_ignore_case, arg_f64, arg_i64, parse_timeout_ms, CommandError, CommandResult};
use crate::blocking::{BlockPos, BlockRequest, BlockType, ReplyShape};
use crate::client::ClientId;
use crate::encodings::{ListEnd, ListPack, LpEntry, ZSet};
use crate::engine::Engine;
use crate::notify;
use crate::value::{make_owned, strconv, Object, ObjectBody, ValueType};

/// Pair-at-a-time view of a (member, score) listpack.
fn zpack_pairs(lp: &ListPack) -> Vec<(Vec<u8>, f64)> {
    let mut out = Vec::with_capacity(lp.len() / 2);
    let mut iter = lp.iter();
    while let (Some(member), Some(score)) = (iter.next(), iter.next()) {
        let score = score
            .as_i64()
            .map(|v| v as f64)
            .or_else(|| strconv::parse_f64(&score.to_vec()))
            .expect("scores are validated before storage");
        out.push((member.to_vec(), score));
    }
    out
}

fn zpack_score(lp: &ListPack, member: &[u8]) -> Option<(usize, f64)> {
    zpack_pairs(lp)
        .into_iter()
        .enumerate()
        .find(|(_, (m, _))| m == member)
        .map(|(pair_idx, (_, score))| (pair_idx, score))
}

fn score_entry(score: f64) -> LpEntry {
    LpEntry::from_bytes(&strconv::format_f64(score))
}

/// Insert keeping (score, member) order; the caller removed any
/// previous occurrence of the member.
fn zpack_insert_sorted(lp: &mut ListPack, member: &[u8], score: f64) {
    let pairs = zpack_pairs(lp);
    let pos = pairs
        .iter()
        .position(|(m, s)| match score.partial_cmp(s) {
            Some(std::cmp::Ordering::Less) => true,
            Some(std::cmp::Ordering::Greater) => false,
            _ => member < m.as_slice(),
        })
        .unwrap_or(pairs.len());
    lp.insert(pos * 2, LpEntry::Str(member.to_vec()));
    lp.insert(pos * 2 + 1, score_entry(score));
}

impl Engine {
    /// Add or update one member, migrating listpack -> skiplist when the
    /// configured bounds are crossed. Returns true when the member is
    /// new.
    pub(crate) fn generic_zset_add(
        &mut self,
        db: usize,
        key: &[u8],
        member: &[u8],
        score: f64,
    ) -> bool {
        if self.dbs[db].get_raw(key).is_none() {
            let body = if member.len() > self.config.zset_max_listpack_value {
                ObjectBody::ZSetSkip(ZSet::new())
            } else {
                ObjectBody::ZSetPack(ListPack::new())
            };
            self.set_key(db, key, Arc::new(Object::new(body)), false);
        }

        // Promote the encoding first when this insert would break the
        // listpack bounds.
        let needs_convert = {
            let value = self.dbs[db].get_raw(key).expect("created above");
            match value.body() {
                ObjectBody::ZSetPack(lp) => {
                    let adding_new = zpack_score(lp, member).is_none();
                    (adding_new && lp.len() / 2 >= self.config.zset_max_listpack_entries)
                        || member.len() > self.config.zset_max_listpack_value
                }
                _ => false,
            }
        };
        let slot = self.dbs[db].get_raw_mut(key).expect("created above");
        let owned = make_owned(slot);
        if needs_convert {
            if let ObjectBody::ZSetPack(lp) = owned.body() {
                let mut zset = ZSet::new();
                for (m, s) in zpack_pairs(lp) {
                    zset.set(&m, s);
                }
                *owned.body_mut() = ObjectBody::ZSetSkip(zset);
            }
        }
        match owned.body_mut() {
            ObjectBody::ZSetPack(lp) => {
                let existing = zpack_score(lp, member);
                if let Some((pair_idx, old)) = existing {
                    if old == score {
                        return false;
                    }
                    lp.remove(pair_idx * 2, 2);
                    zpack_insert_sorted(lp, member, score);
                    false
                } else {
                    zpack_insert_sorted(lp, member, score);
                    true
                }
            }
            ObjectBody::ZSetSkip(zset) => zset.set(member, score),
            _ => unreachable!("caller type-checked the key"),
        }
    }

    /// Pop the min (Head) or max (Tail) pair; deletes the key when it
    /// empties.
    pub(crate) fn generic_zset_pop(
        &mut self,
        db: usize,
        key: &[u8],
        end: ListEnd,
    ) -> Option<(Vec<u8>, f64, bool)> {
        let (member, score, emptied) = {
            let slot = self.dbs[db].get_raw_mut(key)?;
            let owned = make_owned(slot);
            match owned.body_mut() {
                ObjectBody::ZSetPack(lp) => {
                    if lp.is_empty() {
                        return None;
                    }
                    let pair_idx = match end {
                        ListEnd::Head => 0,
                        ListEnd::Tail => lp.len() / 2 - 1,
                    };
                    let member = lp.get(pair_idx * 2)?.to_vec();
                    let score = lp
                        .get(pair_idx * 2 + 1)
                        .and_then(|e| strconv::parse_f64(&e.to_vec()).or(e.as_i64().map(|v| v as f64)))?;
                    lp.remove(pair_idx * 2, 2);
                    (member, score, lp.is_empty())
                }
                ObjectBody::ZSetSkip(zset) => {
                    let (member, score) = match end {
                        ListEnd::Head => zset.pop_min()?,
                        ListEnd::Tail => zset.pop_max()?,
                    };
                    (member, score, zset.is_empty())
                }
                _ => return None,
            }
        };
        if emptied {
            self.dbs[db].remove(key);
        }
        Some((member, score, emptied))
    }
}

pub fn zadd_command(engine: &mut Engine, client_id: ClientId, argv: &[Vec<u8>]) -> CommandResult<()> {
    let db = engine.clients[&client_id].db;
    let key = &argv[1];
    if (argv.len() - 2) % 2 != 0 {
        return Err(CommandError::Syntax);
    }
    super::expect_type(engine.lookup_write(db, key), ValueType::SortedSet)?;
    // Validate every score before the first mutation.
    let mut pairs = Vec::new();
    for chunk in argv[2..].chunks(2) {
        pairs.push((arg_f64(&chunk[0])?, chunk[1].clone()));
    }
    let mut added = 0;
    for (score, member) in pairs {
        if engine.generic_zset_add(db, key, &member, score) {
            added += 1;
        }
    }
    engine.signal_key_ready(db, key, ValueType::SortedSet);
    engine.db_mut(db).signal_modified(key);
    engine.notify_keyspace_event(notify::ZSET, "zadd", key, db);
    engine.dirty += 1;
    engine.push_reply(client_id, Reply::Int(added));
    Ok(())
}

pub fn zscore_command(
    engine: &mut Engine,
    client_id: ClientId,
    argv: &[Vec<u8>],
) -> CommandResult<()> {
    let db = engine.clients[&client_id].db;
    let value = super::expect_type(engine.lookup_read(db, &argv[1]), ValueType::SortedSet)?;
    let score = value.and_then(|v| match v.body() {
        ObjectBody::ZSetPack(lp) => zpack_score(lp, &argv[2]).map(|(_, s)| s),
        ObjectBody::ZSetSkip(zset) => zset.score(&argv[2]),
        _ => None,
    });
    let reply = match score {
        Some(score) => Reply::Bulk(strconv::format_f64(score)),
        None => Reply::Nil,
    };
    engine.push_reply(client_id, reply);
    Ok(())
}

pub fn zcard_command(
    engine: &mut Engine,
    client_id: ClientId,
    argv: &[Vec<u8>],
) -> CommandResult<()> {
    let db = engine.clients[&client_id].db;
    let len = match super::expect_type(engine.lookup_read(db, &argv[1]), ValueType::SortedSet)? {
        None => 0,
        Some(value) => match value.body() {
            ObjectBody::ZSetPack(lp) => lp.len() / 2,
            ObjectBody::ZSetSkip(zset) => zset.len(),
            _ => 0,
        },
    };
    engine.push_reply(client_id, Reply::Int(len as i64));
    Ok(())
}

fn zpop_generic(
    engine: &mut Engine,
    client_id: ClientId,
    argv: &[Vec<u8>],
    end: ListEnd,
) -> CommandResult<()> {
    let db = engine.clients[&client_id].db;
    let key = &argv[1];
    let count = match argv.get(2) {
        None => 1,
        Some(raw) => {
            let parsed = arg_i64(raw)?;
            if parsed < 0 {
                return Err(CommandError::Other("value is out of range, must be positive".into()));
            }
            parsed as usize
        }
    };
    if super::expect_type(engine.lookup_write(db, key), ValueType::SortedSet)?.is_none() {
        engine.push_reply(client_id, Reply::Array(Vec::new()));
        return Ok(());
    }
    let mut out = Vec::new();
    let mut deleted = false;
    for _ in 0..count {
        match engine.generic_zset_pop(db, key, end) {
            Some((member, score, emptied)) => {
                out.push(Reply::bulk(member));
                out.push(Reply::Bulk(strconv::format_f64(score)));
                if emptied {
                    deleted = true;
                    break;
                }
            }
            None => break,
        }
    }
    if !out.is_empty() {
        let event = match end {
            ListEnd::Head => "zpopmin",
            ListEnd::Tail => "zpopmax",
        };
        engine.notify_keyspace_event(notify::ZSET, event, key, db);
        if deleted {
            engine.notify_keyspace_event(notify::GENERIC, "del", key, db);
        }
        engine.db_mut(db).signal_modified(key);
        engine.dirty += 1;
    }
    engine.push_reply(client_id, Reply::Array(out));
    Ok(())
}

pub fn zpopmin_command(
    engine: &mut Engine,
    client_id: ClientId,
    argv: &[Vec<u8>],
) -> CommandResult<()> {
    zpop_generic(engine, client_id, argv, ListEnd::Head)
}

pub fn zpopmax_command(
    engine: &mut Engine,
    client_id: ClientId,
    argv: &[Vec<u8>],
) -> CommandResult<()> {
    zpop_generic(engine, client_id, argv, ListEnd::Tail)
}

// ---- blocking forms ----

fn blocking_zpop(
    engine: &mut Engine,
    client_id: ClientId,
    argv: &[Vec<u8>],
    end: ListEnd,
) -> CommandResult<()> {
    let db = engine.clients[&client_id].db;
    let timeout_at = parse_timeout_ms(engine, &argv[argv.len() - 1])?;
    let keys = &argv[1..argv.len() - 1];

    for key in keys {
        if super::expect_type(engine.lookup_write(db, key), ValueType::SortedSet)?.is_none() {
            continue;
        }
        let (member, score, deleted) = engine
            .generic_zset_pop(db, key, end)
            .expect("non-empty zset checked above");
        let event = match end {
            ListEnd::Head => "zpopmin",
            ListEnd::Tail => "zpopmax",
        };
        engine.notify_keyspace_event(notify::ZSET, event, key, db);
        if deleted {
            engine.notify_keyspace_event(notify::GENERIC, "del", key, db);
        }
        engine.db_mut(db).signal_modified(key);
        engine.dirty += 1;
        engine.push_reply(
            client_id,
            Reply::Array(vec![
                Reply::bulk(key.clone()),
                Reply::bulk(member),
                Reply::Bulk(strconv::format_f64(score)),
            ]),
        );
        return Ok(());
    }

    let mut request = BlockRequest::new(BlockType::SortedSet, keys.to_vec(), timeout_at);
    request.pos = Some(BlockPos { from: end, to: None });
    request.shape = ReplyShape::Flat;
    engine.block_for_keys(client_id, request);
    Ok(())
}

pub fn bzpopmin_command(
    engine: &mut Engine,
    client_id: ClientId,
    argv: &[Vec<u8>],
) -> CommandResult<()> {
    blocking_zpop(engine, client_id, argv, ListEnd::Head)
}

pub fn bzpopmax_command(
    engine: &mut Engine,
    client_id: ClientId,
    argv: &[Vec<u8>],
) -> CommandResult<()> {
    blocking_zpop(engine, client_id, argv, ListEnd::Tail)
}

/// BZMPOP timeout numkeys key [key ...] MIN|MAX [COUNT count].
pub fn bzmpop_command(
    engine: &mut Engine,
    client_id: ClientId,
    argv: &[Vec<u8>],
) -> CommandResult<()> {
    let db = engine.clients[&client_id].db;
    let timeout_at = parse_timeout_ms(engine, &argv[1])?;
    let numkeys = arg_i64(&argv[2])?;
    if numkeys <= 0 || argv.len() < 3 + numkeys as usize + 1 {
        return Err(CommandError::Syntax);
    }
    let keys: Vec<Vec<u8>> = argv[3..3 + numkeys as usize].to_vec();
    let mut rest = 3 + numkeys as usize;
    let end = if arg_eq_ignore_case(&argv[rest], "min") {
        ListEnd::Head
    } else if arg_eq_ignore_case(&argv[rest], "max") {
        ListEnd::Tail
    } else {
        return Err(CommandError::Syntax);
    };
    rest += 1;
    let mut count = 1usize;
    if rest < argv.len() {
        if !arg_eq_ignore_case(&argv[rest], "count") || rest + 1 >= argv.len() {
            return Err(CommandError::Syntax);
        }
        let parsed = arg_i64(&argv[rest + 1])?;
        if parsed <= 0 {
            return Err(CommandError::Syntax);
        }
        count = parsed as usize;
        rest += 2;
    }
    if rest != argv.len() {
        return Err(CommandError::Syntax);
    }

    for key in &keys {
        if super::expect_type(engine.lookup_write(db, key), ValueType::SortedSet)?.is_none() {
            continue;
        }
        let mut popped = Vec::new();
        let mut deleted = false;
        while popped.len() < count {
            match engine.generic_zset_pop(db, key, end) {
                Some((member, score, emptied)) => {
                    popped.push(Reply::Array(vec![
                        Reply::bulk(member),
                        Reply::Bulk(strconv::format_f64(score)),
                    ]));
                    if emptied {
                        deleted = true;
                        break;
                    }
                }
                None => break,
            }
        }
        let event = match end {
            ListEnd::Head => "zpopmin",
            ListEnd::Tail => "zpopmax",
        };
        engine.notify_keyspace_event(notify::ZSET, event, key, db);
        if deleted {
            engine.notify_keyspace_event(notify::GENERIC, "del", key, db);
        }
        engine.db_mut(db).signal_modified(key);
        engine.dirty += 1;
        engine.push_reply(
            client_id,
            Reply::Array(vec![Reply::bulk(key.clone()), Reply::Array(popped)]),
        );
        return Ok(());
    }

    let mut request = BlockRequest::new(BlockType::SortedSet, keys, timeout_at);
    request.pos = Some(BlockPos { from: end, to: None });
    request.count = Some(count);
    request.shape = ReplyShape::NestedArray;
    engine.block_for_keys(client_id, request);
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
    fn test_zadd_zscore_zcard() {
        let mut engine = Engine::new(Config::default());
        let client = engine.create_client(0);
        assert_eq!(
            run(&mut engine, client, &["zadd", "z", "1", "a", "2", "b"]),
            vec![Reply::Int(2)]
        );
        assert_eq!(
            run(&mut engine, client, &["zadd", "z", "5", "a"]),
            vec![Reply::Int(0)]
        );
        assert_eq!(run(&mut engine, client, &["zscore", "z", "a"]), vec![Reply::bulk("5")]);
        assert_eq!(run(&mut engine, client, &["zscore", "z", "x"]), vec![Reply::Nil]);
        assert_eq!(run(&mut engine, client, &["zcard", "z"]), vec![Reply::Int(2)]);
    }

    #[test]
    fn test_listpack_keeps_score_order() {
        let mut engine = Engine::new(Config::default());
        let client = engine.create_client(0);
        run(&mut engine, client, &["zadd", "z", "3", "c", "1", "a", "2", "b"]);
        let popped = run(&mut engine, client, &["zpopmin", "z"]);
        assert_eq!(
            popped,
            vec![Reply::Array(vec![Reply::bulk("a"), Reply::bulk("1")])]
        );
        let popped = run(&mut engine, client, &["zpopmax", "z"]);
        assert_eq!(
            popped,
            vec![Reply::Array(vec![Reply::bulk("c"), Reply::bulk("3")])]
        );
    }

    #[test]
    fn test_encoding_promotion_on_entry_count() {
        let mut engine = Engine::new(Config::default());
        engine.config.zset_max_listpack_entries = 4;
        let client = engine.create_client(0);
        for i in 0..4 {
            run(&mut engine, client, &["zadd", "z", &i.to_string(), &format!("m{i}")]);
        }
        assert_eq!(
            engine.db(0).get_raw(b"z").unwrap().encoding(),
            Encoding::ListPack
        );
        run(&mut engine, client, &["zadd", "z", "9", "overflow"]);
        assert_eq!(
            engine.db(0).get_raw(b"z").unwrap().encoding(),
            Encoding::SkipList
        );
        assert_eq!(run(&mut engine, client, &["zcard", "z"]), vec![Reply::Int(5)]);
    }

    #[test]
    fn test_encoding_promotion_on_member_size() {
        let mut engine = Engine::new(Config::default());
        let client = engine.create_client(0);
        let long_member = "m".repeat(80);
        run(&mut engine, client, &["zadd", "z", "1", &long_member]);
        assert_eq!(
            engine.db(0).get_raw(b"z").unwrap().encoding(),
            Encoding::SkipList
        );
    }

    #[test]
    fn test_bzpopmin_wakes_on_zadd() {
        let mut engine = Engine::new(Config::default());
        let blocked = engine.create_client(0);
        let writer = engine.create_client(0);
        assert!(run(&mut engine, blocked, &["bzpopmin", "z", "0"]).is_empty());
        run(&mut engine, writer, &["zadd", "z", "1.5", "m"]);
        assert_eq!(
            engine.take_replies(blocked),
            vec![Reply::Array(vec![
                Reply::bulk("z"),
                Reply::bulk("m"),
                Reply::bulk("1.5")
            ])]
        );
        assert_eq!(run(&mut engine, writer, &["exists", "z"]), vec![Reply::Int(0)]);
    }

    #[test]
    fn test_bzmpop_nested_shape() {
        let mut engine = Engine::new(Config::default());
        let blocked = engine.create_client(0);
        let writer = engine.create_client(0);
        run(&mut engine, blocked, &["bzmpop", "0", "1", "z", "min", "count", "2"]);
        run(&mut engine, writer, &["zadd", "z", "1", "a", "2", "b", "3", "c"]);
        assert_eq!(
            engine.take_replies(blocked),
            vec![Reply::Array(vec![
                Reply::bulk("z"),
                Reply::Array(vec![
                    Reply::Array(vec![Reply::bulk("a"), Reply::bulk("1")]),
                    Reply::Array(vec![Reply::bulk("b"), Reply::bulk("2")]),
                ])
            ])]
        );
    }

    #[test]
    fn test_mixed_type_waiters_on_one_key() {
        // A list-blocker and a zset-blocker on the same key: the zset
        // write wakes only the zset waiter, the list waiter keeps its
        // position.
        let mut engine = Engine::new(Config::default());
        let list_waiter = engine.create_client(0);
        let zset_waiter = engine.create_client(0);
        let writer = engine.create_client(0);
        run(&mut engine, list_waiter, &["blpop", "k", "0"]);
        run(&mut engine, zset_waiter, &["bzpopmin", "k", "0"]);
        assert_eq!(engine.blocked_clients(), 2);

        run(&mut engine, writer, &["zadd", "k", "1", "m"]);
        assert!(engine.take_replies(list_waiter).is_empty());
        assert_eq!(engine.take_replies(zset_waiter).len(), 1);
        assert_eq!(engine.blocked_clients(), 1);
    }
}
