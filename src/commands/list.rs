//! List commands, including the blocking family.

use std::sync::Arc;

use super::reply::Reply;
use super::{arg_eq_ignore_case, arg_i64, parse_timeout_ms, CommandError, CommandResult};
use crate::blocking::{BlockPos, BlockRequest, BlockType, ReplyShape};
use crate::client::ClientId;
use crate::encodings::{ListEnd, QuickList};
use crate::engine::Engine;
use crate::notify;
use crate::value::{make_owned, Object, ObjectBody, ValueType};

fn end_from_arg(bytes: &[u8]) -> CommandResult<ListEnd> {
    if arg_eq_ignore_case(bytes, "left") {
        Ok(ListEnd::Head)
    } else if arg_eq_ignore_case(bytes, "right") {
        Ok(ListEnd::Tail)
    } else {
        Err(CommandError::Syntax)
    }
}

fn end_event(end: ListEnd, push: bool) -> &'static str {
    match (end, push) {
        (ListEnd::Head, true) => "lpush",
        (ListEnd::Tail, true) => "rpush",
        (ListEnd::Head, false) => "lpop",
        (ListEnd::Tail, false) => "rpop",
    }
}

impl Engine {
    /// Pop one element; deletes the key when it empties. Keyspace-only:
    /// events, dirty accounting, and readiness stay with the caller.
    pub(crate) fn generic_list_pop(
        &mut self,
        db: usize,
        key: &[u8],
        end: ListEnd,
    ) -> Option<(Vec<u8>, bool)> {
        let (element, emptied) = {
            let slot = self.dbs[db].get_raw_mut(key)?;
            let owned = make_owned(slot);
            let ObjectBody::List(list) = owned.body_mut() else {
                return None;
            };
            let element = list.pop(end)?;
            (element, list.is_empty())
        };
        if emptied {
            self.dbs[db].remove(key);
        }
        Some((element, emptied))
    }

    /// Push one element, creating the quicklist value if needed (which
    /// emits `new` and signals readiness via `set_key`).
    pub(crate) fn generic_list_push(&mut self, db: usize, key: &[u8], end: ListEnd, element: &[u8]) {
        if self.dbs[db].get_raw(key).is_none() {
            let list = QuickList::new(self.config.list_max_listpack_size);
            self.set_key(db, key, Arc::new(Object::new(ObjectBody::List(list))), false);
        }
        let slot = self.dbs[db]
            .get_raw_mut(key)
            .expect("created just above when missing");
        let owned = make_owned(slot);
        let ObjectBody::List(list) = owned.body_mut() else {
            unreachable!("caller type-checked the destination");
        };
        list.push(end, element);
    }
}

fn push_generic(
    engine: &mut Engine,
    client_id: ClientId,
    argv: &[Vec<u8>],
    end: ListEnd,
) -> CommandResult<()> {
    let db = engine.clients[&client_id].db;
    let key = &argv[1];
    super::expect_type(engine.lookup_write(db, key), ValueType::List)?;
    for element in &argv[2..] {
        engine.generic_list_push(db, key, end, element);
    }
    let len = match engine.db(db).get_raw(key) {
        Some(value) => match value.body() {
            ObjectBody::List(list) => list.len(),
            _ => 0,
        },
        None => 0,
    };
    engine.signal_key_ready(db, key, ValueType::List);
    engine.db_mut(db).signal_modified(key);
    engine.notify_keyspace_event(notify::LIST, end_event(end, true), key, db);
    engine.dirty += (argv.len() - 2) as u64;
    engine.push_reply(client_id, Reply::Int(len as i64));
    Ok(())
}

pub fn lpush_command(engine: &mut Engine, client_id: ClientId, argv: &[Vec<u8>]) -> CommandResult<()> {
    push_generic(engine, client_id, argv, ListEnd::Head)
}

pub fn rpush_command(engine: &mut Engine, client_id: ClientId, argv: &[Vec<u8>]) -> CommandResult<()> {
    push_generic(engine, client_id, argv, ListEnd::Tail)
}

fn pop_generic(
    engine: &mut Engine,
    client_id: ClientId,
    argv: &[Vec<u8>],
    end: ListEnd,
) -> CommandResult<()> {
    let db = engine.clients[&client_id].db;
    let key = &argv[1];
    let count = match argv.get(2) {
        None => None,
        Some(raw) => {
            let count = arg_i64(raw)?;
            if count < 0 {
                return Err(CommandError::Other("value is out of range, must be positive".into()));
            }
            Some(count as usize)
        }
    };
    if super::expect_type(engine.lookup_write(db, key), ValueType::List)?.is_none() {
        engine.push_reply(client_id, if count.is_some() { Reply::NilArray } else { Reply::Nil });
        return Ok(());
    }
    let wanted = count.unwrap_or(1);
    let mut popped = Vec::new();
    let mut deleted = false;
    while popped.len() < wanted {
        match engine.generic_list_pop(db, key, end) {
            Some((element, emptied)) => {
                popped.push(element);
                if emptied {
                    deleted = true;
                    break;
                }
            }
            None => break,
        }
    }
    if !popped.is_empty() {
        engine.notify_keyspace_event(notify::LIST, end_event(end, false), key, db);
        if deleted {
            engine.notify_keyspace_event(notify::GENERIC, "del", key, db);
        }
        engine.db_mut(db).signal_modified(key);
        engine.dirty += popped.len() as u64;
    }
    let reply = match count {
        None => popped
            .pop()
            .map(Reply::Bulk)
            .unwrap_or(Reply::Nil),
        Some(_) => Reply::Array(popped.into_iter().map(Reply::bulk).collect()),
    };
    engine.push_reply(client_id, reply);
    Ok(())
}

pub fn lpop_command(engine: &mut Engine, client_id: ClientId, argv: &[Vec<u8>]) -> CommandResult<()> {
    pop_generic(engine, client_id, argv, ListEnd::Head)
}

pub fn rpop_command(engine: &mut Engine, client_id: ClientId, argv: &[Vec<u8>]) -> CommandResult<()> {
    pop_generic(engine, client_id, argv, ListEnd::Tail)
}

pub fn llen_command(engine: &mut Engine, client_id: ClientId, argv: &[Vec<u8>]) -> CommandResult<()> {
    let db = engine.clients[&client_id].db;
    let len = match super::expect_type(engine.lookup_read(db, &argv[1]), ValueType::List)? {
        None => 0,
        Some(value) => match value.body() {
            ObjectBody::List(list) => list.len(),
            _ => 0,
        },
    };
    engine.push_reply(client_id, Reply::Int(len as i64));
    Ok(())
}

pub fn lrange_command(
    engine: &mut Engine,
    client_id: ClientId,
    argv: &[Vec<u8>],
) -> CommandResult<()> {
    let db = engine.clients[&client_id].db;
    let start = arg_i64(&argv[2])?;
    let stop = arg_i64(&argv[3])?;
    let value = match super::expect_type(engine.lookup_read(db, &argv[1]), ValueType::List)? {
        None => {
            engine.push_reply(client_id, Reply::Array(Vec::new()));
            return Ok(());
        }
        Some(value) => value,
    };
    let ObjectBody::List(list) = value.body() else {
        unreachable!("type checked above");
    };
    let len = list.len() as i64;
    let start = if start < 0 { (len + start).max(0) } else { start };
    let stop = if stop < 0 { len + stop } else { stop };
    if start > stop || start >= len {
        engine.push_reply(client_id, Reply::Array(Vec::new()));
        return Ok(());
    }
    let elements = list.range(start as usize, stop.min(len - 1) as usize);
    engine.push_reply(
        client_id,
        Reply::Array(elements.into_iter().map(Reply::bulk).collect()),
    );
    Ok(())
}

fn lmove_generic(
    engine: &mut Engine,
    client_id: ClientId,
    src: &[u8],
    dst: &[u8],
    from: ListEnd,
    to: ListEnd,
) -> CommandResult<Option<Vec<u8>>> {
    let db = engine.clients[&client_id].db;
    if super::expect_type(engine.lookup_write(db, src), ValueType::List)?.is_none() {
        return Ok(None);
    }
    super::expect_type(engine.lookup_write(db, dst), ValueType::List)?;

    let (element, src_deleted) = engine
        .generic_list_pop(db, src, from)
        .expect("non-empty list checked above");
    engine.generic_list_push(db, dst, to, &element);

    engine.notify_keyspace_event(notify::LIST, end_event(from, false), src, db);
    if src_deleted {
        engine.notify_keyspace_event(notify::GENERIC, "del", src, db);
    }
    engine.notify_keyspace_event(notify::LIST, end_event(to, true), dst, db);
    engine.db_mut(db).signal_modified(src);
    engine.db_mut(db).signal_modified(dst);
    engine.signal_key_ready(db, dst, ValueType::List);
    engine.dirty += 2;
    Ok(Some(element))
}

pub fn lmove_command(
    engine: &mut Engine,
    client_id: ClientId,
    argv: &[Vec<u8>],
) -> CommandResult<()> {
    let from = end_from_arg(&argv[3])?;
    let to = end_from_arg(&argv[4])?;
    let src = argv[1].clone();
    let dst = argv[2].clone();
    match lmove_generic(engine, client_id, &src, &dst, from, to)? {
        Some(element) => engine.push_reply(client_id, Reply::Bulk(element)),
        None => engine.push_reply(client_id, Reply::Nil),
    }
    Ok(())
}

// ---- blocking forms ----

/// BLPOP/BRPOP: try each key in order; block when all are empty.
fn blocking_pop(
    engine: &mut Engine,
    client_id: ClientId,
    argv: &[Vec<u8>],
    from: ListEnd,
) -> CommandResult<()> {
    let db = engine.clients[&client_id].db;
    let timeout_at = parse_timeout_ms(engine, &argv[argv.len() - 1])?;
    let keys = &argv[1..argv.len() - 1];

    for key in keys {
        if super::expect_type(engine.lookup_write(db, key), ValueType::List)?.is_none() {
            continue;
        }
        let (element, deleted) = engine
            .generic_list_pop(db, key, from)
            .expect("non-empty list checked above");
        engine.notify_keyspace_event(notify::LIST, end_event(from, false), key, db);
        if deleted {
            engine.notify_keyspace_event(notify::GENERIC, "del", key, db);
        }
        engine.db_mut(db).signal_modified(key);
        engine.dirty += 1;
        engine.push_reply(
            client_id,
            Reply::Array(vec![Reply::bulk(key.clone()), Reply::Bulk(element)]),
        );
        return Ok(());
    }

    let mut request = BlockRequest::new(BlockType::List, keys.to_vec(), timeout_at);
    request.pos = Some(BlockPos { from, to: None });
    request.shape = ReplyShape::Flat;
    engine.block_for_keys(client_id, request);
    Ok(())
}

pub fn blpop_command(engine: &mut Engine, client_id: ClientId, argv: &[Vec<u8>]) -> CommandResult<()> {
    blocking_pop(engine, client_id, argv, ListEnd::Head)
}

pub fn brpop_command(engine: &mut Engine, client_id: ClientId, argv: &[Vec<u8>]) -> CommandResult<()> {
    blocking_pop(engine, client_id, argv, ListEnd::Tail)
}

/// BLMOVE src dst LEFT|RIGHT LEFT|RIGHT timeout.
pub fn blmove_command(
    engine: &mut Engine,
    client_id: ClientId,
    argv: &[Vec<u8>],
) -> CommandResult<()> {
    let from = end_from_arg(&argv[3])?;
    let to = end_from_arg(&argv[4])?;
    let timeout_at = parse_timeout_ms(engine, &argv[5])?;
    let src = argv[1].clone();
    let dst = argv[2].clone();
    match lmove_generic(engine, client_id, &src, &dst, from, to)? {
        Some(element) => {
            engine.push_reply(client_id, Reply::Bulk(element));
            Ok(())
        }
        None => {
            let mut request = BlockRequest::new(BlockType::List, vec![src], timeout_at);
            request.pos = Some(BlockPos {
                from,
                to: Some(to),
            });
            request.target = Some(dst);
            engine.block_for_keys(client_id, request);
            Ok(())
        }
    }
}

/// BLMPOP timeout numkeys key [key ...] LEFT|RIGHT [COUNT count].
pub fn blmpop_command(
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
    let from = end_from_arg(&argv[rest])?;
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
        if super::expect_type(engine.lookup_write(db, key), ValueType::List)?.is_none() {
            continue;
        }
        let mut popped = Vec::new();
        let mut deleted = false;
        while popped.len() < count {
            match engine.generic_list_pop(db, key, from) {
                Some((element, emptied)) => {
                    popped.push(element);
                    if emptied {
                        deleted = true;
                        break;
                    }
                }
                None => break,
            }
        }
        engine.notify_keyspace_event(notify::LIST, end_event(from, false), key, db);
        if deleted {
            engine.notify_keyspace_event(notify::GENERIC, "del", key, db);
        }
        engine.db_mut(db).signal_modified(key);
        engine.dirty += popped.len() as u64;
        engine.push_reply(
            client_id,
            Reply::Array(vec![
                Reply::bulk(key.clone()),
                Reply::Array(popped.into_iter().map(Reply::bulk).collect()),
            ]),
        );
        return Ok(());
    }

    let mut request = BlockRequest::new(BlockType::List, keys, timeout_at);
    request.pos = Some(BlockPos { from, to: None });
    request.count = Some(count);
    request.shape = ReplyShape::NestedArray;
    engine.block_for_keys(client_id, request);
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
    fn test_push_pop_and_emptied_key_is_deleted() {
        let mut engine = Engine::new(Config::default());
        let client = engine.create_client(0);
        assert_eq!(run(&mut engine, client, &["rpush", "l", "a", "b"]), vec![Reply::Int(2)]);
        assert_eq!(run(&mut engine, client, &["llen", "l"]), vec![Reply::Int(2)]);
        assert_eq!(run(&mut engine, client, &["lpop", "l"]), vec![Reply::bulk("a")]);
        assert_eq!(run(&mut engine, client, &["rpop", "l"]), vec![Reply::bulk("b")]);
        assert_eq!(run(&mut engine, client, &["exists", "l"]), vec![Reply::Int(0)]);
    }

    #[test]
    fn test_lrange() {
        let mut engine = Engine::new(Config::default());
        let client = engine.create_client(0);
        run(&mut engine, client, &["rpush", "l", "a", "b", "c", "d"]);
        assert_eq!(
            run(&mut engine, client, &["lrange", "l", "1", "2"]),
            vec![Reply::Array(vec![Reply::bulk("b"), Reply::bulk("c")])]
        );
        assert_eq!(
            run(&mut engine, client, &["lrange", "l", "-2", "-1"]),
            vec![Reply::Array(vec![Reply::bulk("c"), Reply::bulk("d")])]
        );
    }

    #[test]
    fn test_lmove() {
        let mut engine = Engine::new(Config::default());
        let client = engine.create_client(0);
        run(&mut engine, client, &["rpush", "src", "a", "b"]);
        assert_eq!(
            run(&mut engine, client, &["lmove", "src", "dst", "left", "right"]),
            vec![Reply::bulk("a")]
        );
        assert_eq!(
            run(&mut engine, client, &["lrange", "dst", "0", "-1"]),
            vec![Reply::Array(vec![Reply::bulk("a")])]
        );
    }

    #[test]
    fn test_wrong_type_guard() {
        let mut engine = Engine::new(Config::default());
        let client = engine.create_client(0);
        run(&mut engine, client, &["set", "s", "v"]);
        let replies = run(&mut engine, client, &["rpush", "s", "x"]);
        assert!(matches!(&replies[0], Reply::Error(m) if m.starts_with("WRONGTYPE")));
    }

    #[test]
    fn test_blpop_immediate_when_nonempty() {
        let mut engine = Engine::new(Config::default());
        let client = engine.create_client(0);
        run(&mut engine, client, &["rpush", "l", "v"]);
        assert_eq!(
            run(&mut engine, client, &["blpop", "l", "0"]),
            vec![Reply::Array(vec![Reply::bulk("l"), Reply::bulk("v")])]
        );
    }

    #[test]
    fn test_blpop_blocks_then_wakes_on_push() {
        let mut engine = Engine::new(Config::default());
        let blocked = engine.create_client(0);
        let writer = engine.create_client(0);

        assert!(run(&mut engine, blocked, &["blpop", "k", "0"]).is_empty());
        assert_eq!(engine.blocked_clients(), 1);

        run(&mut engine, writer, &["rpush", "k", "v1"]);
        // The waiter was served during the post-command drain.
        assert_eq!(
            engine.take_replies(blocked),
            vec![Reply::Array(vec![Reply::bulk("k"), Reply::bulk("v1")])]
        );
        assert_eq!(engine.blocked_clients(), 0);
        // The list was emptied by the serve and deleted.
        assert_eq!(run(&mut engine, writer, &["exists", "k"]), vec![Reply::Int(0)]);
    }

    #[test]
    fn test_blocked_waiters_fifo() {
        let mut engine = Engine::new(Config::default());
        let first = engine.create_client(0);
        let second = engine.create_client(0);
        let writer = engine.create_client(0);

        run(&mut engine, first, &["blpop", "k", "0"]);
        run(&mut engine, second, &["blpop", "k", "0"]);
        run(&mut engine, writer, &["rpush", "k", "a", "b"]);

        assert_eq!(
            engine.take_replies(first),
            vec![Reply::Array(vec![Reply::bulk("k"), Reply::bulk("a")])]
        );
        assert_eq!(
            engine.take_replies(second),
            vec![Reply::Array(vec![Reply::bulk("k"), Reply::bulk("b")])]
        );
    }

    #[test]
    fn test_blmove_chains_to_destination_waiter() {
        let mut engine = Engine::new(Config::default());
        let mover = engine.create_client(0);
        let waiter = engine.create_client(0);
        let writer = engine.create_client(0);

        run(&mut engine, mover, &["blmove", "src", "mid", "left", "right", "0"]);
        run(&mut engine, waiter, &["blpop", "mid", "0"]);
        assert_eq!(engine.blocked_clients(), 2);

        // One push satisfies the mover, whose push satisfies the waiter
        // in the same drain.
        run(&mut engine, writer, &["rpush", "src", "x"]);
        assert_eq!(engine.take_replies(mover), vec![Reply::bulk("x")]);
        assert_eq!(
            engine.take_replies(waiter),
            vec![Reply::Array(vec![Reply::bulk("mid"), Reply::bulk("x")])]
        );
        assert_eq!(engine.blocked_clients(), 0);
    }

    #[test]
    fn test_blmpop_nested_reply_shape() {
        let mut engine = Engine::new(Config::default());
        let blocked = engine.create_client(0);
        let writer = engine.create_client(0);

        run(
            &mut engine,
            blocked,
            &["blmpop", "0", "2", "a", "b", "left", "count", "2"],
        );
        run(&mut engine, writer, &["rpush", "b", "1", "2", "3"]);
        assert_eq!(
            engine.take_replies(blocked),
            vec![Reply::Array(vec![
                Reply::bulk("b"),
                Reply::Array(vec![Reply::bulk("1"), Reply::bulk("2")])
            ])]
        );
        assert_eq!(run(&mut engine, writer, &["llen", "b"]), vec![Reply::Int(1)]);
    }

    #[test]
    fn test_blpop_timeout_replies_null_array() {
        let mut engine = Engine::new(Config::default());
        let client = engine.create_client(0);
        run(&mut engine, client, &["blpop", "k", "0.05"]);
        assert_eq!(engine.blocked_clients(), 1);
        let deadline = engine.clock.now_ms() + 100;
        engine.tick(deadline);
        assert_eq!(engine.take_replies(client), vec![Reply::NilArray]);
        assert_eq!(engine.blocked_clients(), 0);
        assert!(engine.db(0).blocking_keys.is_empty());
    }
}
