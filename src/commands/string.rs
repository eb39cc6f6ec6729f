//! String commands.

use std::sync::Arc;

use super::reply::Reply;
use super::{arg_eq_ignore_case, arg_f64, arg_i64, CommandError, CommandResult};
use crate::client::ClientId;
use crate::engine::Engine;
use crate::notify;
use crate::value::{make_owned, strconv, try_encode, Obj, Object, ObjectBody};

// SET/GETEX option bits.
#[derive(Debug, Default, Clone, Copy)]
struct ExtendedArgs {
    nx: bool,
    xx: bool,
    get: bool,
    keepttl: bool,
    persist: bool,
    /// (absolute deadline in ms) once parsed.
    expire_at_ms: Option<i64>,
}

#[derive(PartialEq)]
enum ExtendedMode {
    Set,
    Get,
}

/// Normalize an expire argument to an absolute millisecond deadline.
fn expire_deadline_ms(
    engine: &Engine,
    bytes: &[u8],
    seconds_unit: bool,
    absolute: bool,
    command: &str,
) -> CommandResult<i64> {
    let raw = arg_i64(bytes)?;
    if raw <= 0 && !absolute {
        return Err(CommandError::ExpireTime(command.into()));
    }
    let ms = if seconds_unit {
        raw.checked_mul(1000)
            .ok_or_else(|| CommandError::ExpireTime(command.into()))?
    } else {
        raw
    };
    let deadline = if absolute {
        ms
    } else {
        ms.checked_add(engine.clock.now_ms())
            .ok_or_else(|| CommandError::ExpireTime(command.into()))?
    };
    if deadline <= 0 {
        return Err(CommandError::ExpireTime(command.into()));
    }
    Ok(deadline)
}

/// Shared option parser for SET and GETEX. `first` is the index of the
/// first option argument.
fn parse_extended_args(
    engine: &Engine,
    argv: &[Vec<u8>],
    first: usize,
    mode: ExtendedMode,
    command: &str,
) -> CommandResult<ExtendedArgs> {
    let mut args = ExtendedArgs::default();
    let mut j = first;
    while j < argv.len() {
        let opt = &argv[j];
        let next = argv.get(j + 1);
        let has_expire = args.expire_at_ms.is_some();
        if arg_eq_ignore_case(opt, "nx") && mode == ExtendedMode::Set && !args.xx {
            args.nx = true;
        } else if arg_eq_ignore_case(opt, "xx") && mode == ExtendedMode::Set && !args.nx {
            args.xx = true;
        } else if arg_eq_ignore_case(opt, "get") && mode == ExtendedMode::Set {
            args.get = true;
        } else if arg_eq_ignore_case(opt, "keepttl")
            && mode == ExtendedMode::Set
            && !args.persist
            && !has_expire
        {
            args.keepttl = true;
        } else if arg_eq_ignore_case(opt, "persist")
            && mode == ExtendedMode::Get
            && !args.keepttl
            && !has_expire
        {
            args.persist = true;
        } else if !args.keepttl && !args.persist && !has_expire && next.is_some() {
            let next = next.unwrap();
            let deadline = if arg_eq_ignore_case(opt, "ex") {
                expire_deadline_ms(engine, next, true, false, command)?
            } else if arg_eq_ignore_case(opt, "px") {
                expire_deadline_ms(engine, next, false, false, command)?
            } else if arg_eq_ignore_case(opt, "exat") {
                expire_deadline_ms(engine, next, true, true, command)?
            } else if arg_eq_ignore_case(opt, "pxat") {
                expire_deadline_ms(engine, next, false, true, command)?
            } else {
                return Err(CommandError::Syntax);
            };
            args.expire_at_ms = Some(deadline);
            j += 1;
        } else {
            return Err(CommandError::Syntax);
        }
        j += 1;
    }
    Ok(args)
}

fn string_value(engine: &Engine, bytes: &[u8]) -> Obj {
    let shared_allowed = !engine.config.maxmemory_policy.forbids_shared_integers();
    try_encode(Arc::new(Object::create_string(bytes)), shared_allowed)
}

/// Reply with the current string value of a key (nil when absent);
/// error when it holds another type.
fn reply_get(engine: &mut Engine, client_id: ClientId, key: &[u8]) -> CommandResult<()> {
    let db = engine.clients[&client_id].db;
    match engine.lookup_read(db, key) {
        None => engine.push_reply(client_id, Reply::Nil),
        Some(value) => {
            if !value.is_string() {
                return Err(CommandError::WrongType);
            }
            engine.push_reply(client_id, Reply::Bulk(value.string_bytes().into_owned()));
        }
    }
    Ok(())
}

fn set_generic(
    engine: &mut Engine,
    client_id: ClientId,
    key: &[u8],
    value: Obj,
    args: ExtendedArgs,
    ok_reply: Option<Reply>,
    abort_reply: Option<Reply>,
) -> CommandResult<()> {
    let db = engine.clients[&client_id].db;
    if args.get {
        reply_get(engine, client_id, key)?;
    }
    let found = engine.lookup_write(db, key).is_some();
    if (args.nx && found) || (args.xx && !found) {
        if !args.get {
            engine.push_reply(client_id, abort_reply.unwrap_or(Reply::Nil));
        }
        return Ok(());
    }

    engine.set_key(db, key, value, args.keepttl);
    engine.dirty += 1;
    engine.notify_keyspace_event(notify::STRING, "set", key, db);

    if let Some(deadline) = args.expire_at_ms {
        engine.db_mut(db).set_expire(key, deadline);
        engine.notify_keyspace_event(notify::GENERIC, "expire", key, db);
    }
    if !args.get {
        engine.push_reply(client_id, ok_reply.unwrap_or(Reply::Ok));
    }
    Ok(())
}

pub fn get_command(engine: &mut Engine, client_id: ClientId, argv: &[Vec<u8>]) -> CommandResult<()> {
    reply_get(engine, client_id, &argv[1])
}

pub fn set_command(engine: &mut Engine, client_id: ClientId, argv: &[Vec<u8>]) -> CommandResult<()> {
    let args = parse_extended_args(engine, argv, 3, ExtendedMode::Set, "set")?;
    let value = string_value(engine, &argv[2]);
    set_generic(engine, client_id, &argv[1], value, args, None, None)
}

pub fn setnx_command(
    engine: &mut Engine,
    client_id: ClientId,
    argv: &[Vec<u8>],
) -> CommandResult<()> {
    let args = ExtendedArgs {
        nx: true,
        ..ExtendedArgs::default()
    };
    let value = string_value(engine, &argv[2]);
    set_generic(
        engine,
        client_id,
        &argv[1],
        value,
        args,
        Some(Reply::Int(1)),
        Some(Reply::Int(0)),
    )
}

pub fn setex_command(
    engine: &mut Engine,
    client_id: ClientId,
    argv: &[Vec<u8>],
) -> CommandResult<()> {
    let deadline = expire_deadline_ms(engine, &argv[2], true, false, "setex")?;
    let args = ExtendedArgs {
        expire_at_ms: Some(deadline),
        ..ExtendedArgs::default()
    };
    let value = string_value(engine, &argv[3]);
    set_generic(engine, client_id, &argv[1], value, args, None, None)
}

pub fn psetex_command(
    engine: &mut Engine,
    client_id: ClientId,
    argv: &[Vec<u8>],
) -> CommandResult<()> {
    let deadline = expire_deadline_ms(engine, &argv[2], false, false, "psetex")?;
    let args = ExtendedArgs {
        expire_at_ms: Some(deadline),
        ..ExtendedArgs::default()
    };
    let value = string_value(engine, &argv[3]);
    set_generic(engine, client_id, &argv[1], value, args, None, None)
}

pub fn getex_command(
    engine: &mut Engine,
    client_id: ClientId,
    argv: &[Vec<u8>],
) -> CommandResult<()> {
    let args = parse_extended_args(engine, argv, 2, ExtendedMode::Get, "getex")?;
    let db = engine.clients[&client_id].db;
    let key = &argv[1];
    let value = match engine.lookup_read(db, key) {
        None => {
            engine.push_reply(client_id, Reply::Nil);
            return Ok(());
        }
        Some(value) => value,
    };
    if !value.is_string() {
        return Err(CommandError::WrongType);
    }
    engine.push_reply(client_id, Reply::Bulk(value.string_bytes().into_owned()));

    if args.persist {
        if engine.db_mut(db).remove_expire(key) {
            engine.db_mut(db).signal_modified(key);
            engine.notify_keyspace_event(notify::GENERIC, "persist", key, db);
            engine.dirty += 1;
        }
    } else if let Some(deadline) = args.expire_at_ms {
        engine.db_mut(db).set_expire(key, deadline);
        engine.db_mut(db).signal_modified(key);
        engine.notify_keyspace_event(notify::GENERIC, "expire", key, db);
        engine.dirty += 1;
    }
    Ok(())
}

pub fn getdel_command(
    engine: &mut Engine,
    client_id: ClientId,
    argv: &[Vec<u8>],
) -> CommandResult<()> {
    let db = engine.clients[&client_id].db;
    let key = &argv[1];
    match engine.lookup_write(db, key) {
        None => {
            engine.push_reply(client_id, Reply::Nil);
            Ok(())
        }
        Some(value) => {
            if !value.is_string() {
                return Err(CommandError::WrongType);
            }
            engine.push_reply(client_id, Reply::Bulk(value.string_bytes().into_owned()));
            engine.delete_async(db, key);
            engine.notify_keyspace_event(notify::GENERIC, "del", key, db);
            engine.dirty += 1;
            Ok(())
        }
    }
}

pub fn getset_command(
    engine: &mut Engine,
    client_id: ClientId,
    argv: &[Vec<u8>],
) -> CommandResult<()> {
    let args = ExtendedArgs {
        get: true,
        ..ExtendedArgs::default()
    };
    let value = string_value(engine, &argv[2]);
    set_generic(engine, client_id, &argv[1], value, args, None, None)
}

pub fn setrange_command(
    engine: &mut Engine,
    client_id: ClientId,
    argv: &[Vec<u8>],
) -> CommandResult<()> {
    let db = engine.clients[&client_id].db;
    let key = &argv[1];
    let offset = arg_i64(&argv[2])?;
    if offset < 0 {
        return Err(CommandError::Other("offset is out of range".into()));
    }
    let offset = offset as usize;
    let patch = &argv[3];

    let existing = engine.lookup_write(db, key);
    if let Some(value) = &existing {
        if !value.is_string() {
            return Err(CommandError::WrongType);
        }
    }
    if patch.is_empty() {
        let len = existing.map_or(0, |v| v.string_len());
        engine.push_reply(client_id, Reply::Int(len as i64));
        return Ok(());
    }
    let end = offset + patch.len();
    if end > engine.config.proto_max_bulk_len {
        return Err(CommandError::StringTooLong);
    }

    if existing.is_none() {
        engine.set_key(
            db,
            key,
            Arc::new(Object::new(ObjectBody::Raw(Vec::new()))),
            false,
        );
    }
    let new_len = {
        let buf = raw_string_mut(engine, db, key);
        if buf.len() < end {
            buf.resize(end, 0);
        }
        buf[offset..end].copy_from_slice(patch);
        buf.len()
    };
    engine.db_mut(db).signal_modified(key);
    engine.notify_keyspace_event(notify::STRING, "setrange", key, db);
    engine.dirty += 1;
    engine.push_reply(client_id, Reply::Int(new_len as i64));
    Ok(())
}

/// Unique, RAW-encoded view of a string value for in-place edits;
/// shared or compact encodings are promoted first.
fn raw_string_mut<'a>(engine: &'a mut Engine, db: usize, key: &[u8]) -> &'a mut Vec<u8> {
    let slot = engine
        .db_mut(db)
        .get_raw_mut(key)
        .expect("caller ensured the key exists");
    let owned = make_owned(slot);
    if !matches!(owned.body(), ObjectBody::Raw(_)) {
        let bytes = owned.string_bytes().into_owned();
        *owned.body_mut() = ObjectBody::Raw(bytes);
    }
    match owned.body_mut() {
        ObjectBody::Raw(buf) => buf,
        _ => unreachable!("promoted to raw above"),
    }
}

pub fn getrange_command(
    engine: &mut Engine,
    client_id: ClientId,
    argv: &[Vec<u8>],
) -> CommandResult<()> {
    let db = engine.clients[&client_id].db;
    let start = arg_i64(&argv[2])?;
    let end = arg_i64(&argv[3])?;
    let value = match engine.lookup_read(db, &argv[1]) {
        None => {
            engine.push_reply(client_id, Reply::bulk(""));
            return Ok(());
        }
        Some(value) => value,
    };
    if !value.is_string() {
        return Err(CommandError::WrongType);
    }
    let bytes = value.string_bytes();
    let len = bytes.len() as i64;
    let start = if start < 0 { (len + start).max(0) } else { start };
    let mut end = if end < 0 { len + end } else { end };
    if end >= len {
        end = len - 1;
    }
    if start > end || len == 0 {
        engine.push_reply(client_id, Reply::bulk(""));
        return Ok(());
    }
    engine.push_reply(
        client_id,
        Reply::Bulk(bytes[start as usize..=end as usize].to_vec()),
    );
    Ok(())
}

pub fn mget_command(engine: &mut Engine, client_id: ClientId, argv: &[Vec<u8>]) -> CommandResult<()> {
    let db = engine.clients[&client_id].db;
    let mut out = Vec::with_capacity(argv.len() - 1);
    for key in &argv[1..] {
        out.push(match engine.lookup_read(db, key) {
            Some(value) if value.is_string() => Reply::Bulk(value.string_bytes().into_owned()),
            _ => Reply::Nil,
        });
    }
    engine.push_reply(client_id, Reply::Array(out));
    Ok(())
}

fn mset_generic(
    engine: &mut Engine,
    client_id: ClientId,
    argv: &[Vec<u8>],
    nx: bool,
) -> CommandResult<()> {
    if argv.len() % 2 == 0 {
        return Err(CommandError::WrongArity(
            String::from_utf8_lossy(&argv[0]).to_ascii_lowercase(),
        ));
    }
    let db = engine.clients[&client_id].db;
    if nx {
        let any_present = argv[1..]
            .chunks(2)
            .any(|pair| engine.lookup_write(db, &pair[0]).is_some());
        if any_present {
            engine.push_reply(client_id, Reply::Int(0));
            return Ok(());
        }
    }
    for pair in argv[1..].chunks(2) {
        let value = string_value(engine, &pair[1]);
        engine.set_key(db, &pair[0], value, false);
        engine.notify_keyspace_event(notify::STRING, "set", &pair[0], db);
        engine.dirty += 1;
    }
    engine.push_reply(client_id, if nx { Reply::Int(1) } else { Reply::Ok });
    Ok(())
}

pub fn mset_command(engine: &mut Engine, client_id: ClientId, argv: &[Vec<u8>]) -> CommandResult<()> {
    mset_generic(engine, client_id, argv, false)
}

pub fn msetnx_command(
    engine: &mut Engine,
    client_id: ClientId,
    argv: &[Vec<u8>],
) -> CommandResult<()> {
    mset_generic(engine, client_id, argv, true)
}

fn incr_decr(
    engine: &mut Engine,
    client_id: ClientId,
    key: &[u8],
    increment: i64,
) -> CommandResult<()> {
    let db = engine.clients[&client_id].db;
    let existing = engine.lookup_write(db, key);
    let current = match &existing {
        None => 0,
        Some(value) => {
            if !value.is_string() {
                return Err(CommandError::WrongType);
            }
            value.as_i64().ok_or(CommandError::NotAnInteger)?
        }
    };
    let new_value = current
        .checked_add(increment)
        .ok_or(CommandError::Overflow)?;

    // Arithmetic results are always private objects, never pool handles.
    let value: Obj = Arc::new(Object::create_string_from_i64(new_value));
    engine.set_key(db, key, value, true);
    engine.notify_keyspace_event(notify::STRING, "incrby", key, db);
    engine.dirty += 1;
    engine.push_reply(client_id, Reply::Int(new_value));
    Ok(())
}

pub fn incr_command(engine: &mut Engine, client_id: ClientId, argv: &[Vec<u8>]) -> CommandResult<()> {
    incr_decr(engine, client_id, &argv[1], 1)
}

pub fn decr_command(engine: &mut Engine, client_id: ClientId, argv: &[Vec<u8>]) -> CommandResult<()> {
    incr_decr(engine, client_id, &argv[1], -1)
}

pub fn incrby_command(
    engine: &mut Engine,
    client_id: ClientId,
    argv: &[Vec<u8>],
) -> CommandResult<()> {
    let increment = arg_i64(&argv[2])?;
    incr_decr(engine, client_id, &argv[1], increment)
}

pub fn decrby_command(
    engine: &mut Engine,
    client_id: ClientId,
    argv: &[Vec<u8>],
) -> CommandResult<()> {
    let increment = arg_i64(&argv[2])?;
    if increment == i64::MIN {
        return Err(CommandError::Overflow);
    }
    incr_decr(engine, client_id, &argv[1], -increment)
}

pub fn incrbyfloat_command(
    engine: &mut Engine,
    client_id: ClientId,
    argv: &[Vec<u8>],
) -> CommandResult<()> {
    let db = engine.clients[&client_id].db;
    let key = &argv[1];
    let increment = arg_f64(&argv[2])?;
    let existing = engine.lookup_write(db, key);
    let current = match &existing {
        None => 0.0,
        Some(value) => {
            if !value.is_string() {
                return Err(CommandError::WrongType);
            }
            value.as_f64().ok_or(CommandError::NotAFloat)?
        }
    };
    let new_value = current + increment;
    if new_value.is_nan() || new_value.is_infinite() {
        return Err(CommandError::Other(
            "increment would produce NaN or Infinity".into(),
        ));
    }
    let rendered = strconv::format_f64(new_value);
    engine.set_key(db, key, Arc::new(Object::create_string(&rendered)), true);
    engine.notify_keyspace_event(notify::STRING, "incrbyfloat", key, db);
    engine.dirty += 1;
    engine.push_reply(client_id, Reply::Bulk(rendered));
    Ok(())
}

pub fn append_command(
    engine: &mut Engine,
    client_id: ClientId,
    argv: &[Vec<u8>],
) -> CommandResult<()> {
    let db = engine.clients[&client_id].db;
    let key = &argv[1];
    let suffix = &argv[2];
    let total_len = match engine.lookup_write(db, key) {
        None => {
            let value = string_value(engine, suffix);
            let len = value.string_len();
            engine.set_key(db, key, value, false);
            len
        }
        Some(value) => {
            if !value.is_string() {
                return Err(CommandError::WrongType);
            }
            if value.string_len() + suffix.len() > engine.config.proto_max_bulk_len {
                return Err(CommandError::StringTooLong);
            }
            let buf = raw_string_mut(engine, db, key);
            buf.extend_from_slice(suffix);
            buf.len()
        }
    };
    engine.db_mut(db).signal_modified(key);
    engine.notify_keyspace_event(notify::STRING, "append", key, db);
    engine.dirty += 1;
    engine.push_reply(client_id, Reply::Int(total_len as i64));
    Ok(())
}

pub fn strlen_command(
    engine: &mut Engine,
    client_id: ClientId,
    argv: &[Vec<u8>],
) -> CommandResult<()> {
    let db = engine.clients[&client_id].db;
    match engine.lookup_read(db, &argv[1]) {
        None => engine.push_reply(client_id, Reply::Int(0)),
        Some(value) => {
            if !value.is_string() {
                return Err(CommandError::WrongType);
            }
            engine.push_reply(client_id, Reply::Int(value.string_len() as i64));
        }
    }
    Ok(())
}

/// LCS key1 key2 [LEN] [IDX] [MINMATCHLEN n] [WITHMATCHLEN]
pub fn lcs_command(engine: &mut Engine, client_id: ClientId, argv: &[Vec<u8>]) -> CommandResult<()> {
    let db = engine.clients[&client_id].db;
    let mut get_len = false;
    let mut get_idx = false;
    let mut with_match_len = false;
    let mut min_match_len: i64 = 0;
    let mut j = 3;
    while j < argv.len() {
        if arg_eq_ignore_case(&argv[j], "idx") {
            get_idx = true;
        } else if arg_eq_ignore_case(&argv[j], "len") {
            get_len = true;
        } else if arg_eq_ignore_case(&argv[j], "withmatchlen") {
            with_match_len = true;
        } else if arg_eq_ignore_case(&argv[j], "minmatchlen") && j + 1 < argv.len() {
            min_match_len = arg_i64(&argv[j + 1])?.max(0);
            j += 1;
        } else {
            return Err(CommandError::Syntax);
        }
        j += 1;
    }
    if get_len && get_idx {
        return Err(CommandError::Other(
            "If you want both the length and indexes, please just use IDX.".into(),
        ));
    }

    let fetch = |engine: &mut Engine, key: &[u8]| -> CommandResult<Vec<u8>> {
        match engine.lookup_read(db, key) {
            None => Ok(Vec::new()),
            Some(value) if value.is_string() => Ok(value.string_bytes().into_owned()),
            Some(_) => Err(CommandError::Other(
                "The specified keys must contain string values".into(),
            )),
        }
    };
    let a = fetch(engine, &argv[1])?;
    let b = fetch(engine, &argv[2])?;

    if a.len() >= u32::MAX as usize - 1 || b.len() >= u32::MAX as usize - 1 {
        return Err(CommandError::Other("String too long for LCS".into()));
    }
    let alen = a.len();
    let blen = b.len();
    let table_cells = (alen as u64 + 1) * (blen as u64 + 1);
    let table_bytes = table_cells.checked_mul(4).ok_or(CommandError::MemoryPressure(
        "transient memory for LCS exceeds proto-max-bulk-len",
    ))?;
    if table_bytes > engine.config.proto_max_bulk_len as u64 {
        return Err(CommandError::MemoryPressure(
            "transient memory for LCS exceeds proto-max-bulk-len",
        ));
    }

    // Classic DP table, linear layout: lcs[j + (blen + 1) * i].
    let stride = blen + 1;
    let mut lcs = vec![0u32; table_cells as usize];
    for i in 1..=alen {
        for jj in 1..=blen {
            lcs[jj + stride * i] = if a[i - 1] == b[jj - 1] {
                lcs[(jj - 1) + stride * (i - 1)] + 1
            } else {
                lcs[jj + stride * (i - 1)].max(lcs[(jj - 1) + stride * i])
            };
        }
    }
    let lcs_len = lcs[blen + stride * alen];

    if get_len {
        engine.push_reply(client_id, Reply::Int(lcs_len as i64));
        return Ok(());
    }

    // Backtrack, building the string (always) and the ranges (for IDX).
    let mut result = vec![0u8; lcs_len as usize];
    let mut idx = lcs_len as usize;
    let mut matches: Vec<Reply> = Vec::new();
    let (mut i, mut jj) = (alen, blen);
    // Current contiguous range; arange_start == alen means "unset".
    let (mut arange_start, mut arange_end) = (alen, 0usize);
    let (mut brange_start, mut brange_end) = (0usize, 0usize);
    while i > 0 && jj > 0 {
        let mut emit_range = false;
        if a[i - 1] == b[jj - 1] {
            result[idx - 1] = a[i - 1];
            if arange_start == alen {
                arange_start = i - 1;
                arange_end = i - 1;
                brange_start = jj - 1;
                brange_end = jj - 1;
            } else if arange_start == i && brange_start == jj {
                arange_start -= 1;
                brange_start -= 1;
            } else {
                emit_range = true;
            }
            if arange_start == 0 || brange_start == 0 {
                emit_range = true;
            }
            idx -= 1;
            i -= 1;
            jj -= 1;
        } else {
            let up = lcs[jj + stride * (i - 1)];
            let left = lcs[(jj - 1) + stride * i];
            if up > left {
                i -= 1;
            } else {
                jj -= 1;
            }
            if arange_start != alen {
                emit_range = true;
            }
        }
        if emit_range && arange_start != alen {
            let match_len = arange_end - arange_start + 1;
            if min_match_len == 0 || match_len as i64 >= min_match_len {
                let mut entry = vec![
                    Reply::Array(vec![
                        Reply::Int(arange_start as i64),
                        Reply::Int(arange_end as i64),
                    ]),
                    Reply::Array(vec![
                        Reply::Int(brange_start as i64),
                        Reply::Int(brange_end as i64),
                    ]),
                ];
                if with_match_len {
                    entry.push(Reply::Int(match_len as i64));
                }
                matches.push(Reply::Array(entry));
            }
            arange_start = alen;
        }
    }

    if get_idx {
        engine.push_reply(
            client_id,
            Reply::Array(vec![
                Reply::bulk("matches"),
                Reply::Array(matches),
                Reply::bulk("len"),
                Reply::Int(lcs_len as i64),
            ]),
        );
    } else {
        engine.push_reply(client_id, Reply::Bulk(result));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::core::config::Config;
    use crate::engine::Engine;
    use crate::commands::reply::Reply;

    fn engine_and_client() -> (Engine, u64) {
        let mut engine = Engine::new(Config::default());
        let client = engine.create_client(0);
        (engine, client)
    }

    fn run(engine: &mut Engine, client: u64, parts: &[&str]) -> Vec<Reply> {
        let argv: Vec<Vec<u8>> = parts.iter().map(|p| p.as_bytes().to_vec()).collect();
        engine.execute(client, &argv)
    }

    #[test]
    fn test_set_get_round_trip() {
        let (mut engine, client) = engine_and_client();
        assert_eq!(run(&mut engine, client, &["set", "k", "v"]), vec![Reply::Ok]);
        assert_eq!(run(&mut engine, client, &["get", "k"]), vec![Reply::bulk("v")]);
        assert_eq!(run(&mut engine, client, &["get", "missing"]), vec![Reply::Nil]);
    }

    #[test]
    fn test_set_nx_xx() {
        let (mut engine, client) = engine_and_client();
        assert_eq!(
            run(&mut engine, client, &["set", "k", "v", "xx"]),
            vec![Reply::Nil]
        );
        assert_eq!(
            run(&mut engine, client, &["set", "k", "v", "nx"]),
            vec![Reply::Ok]
        );
        assert_eq!(
            run(&mut engine, client, &["set", "k", "v2", "nx"]),
            vec![Reply::Nil]
        );
        assert_eq!(
            run(&mut engine, client, &["set", "k", "v2", "xx"]),
            vec![Reply::Ok]
        );
    }

    #[test]
    fn test_set_get_option_returns_old_value() {
        let (mut engine, client) = engine_and_client();
        run(&mut engine, client, &["set", "k", "old"]);
        assert_eq!(
            run(&mut engine, client, &["set", "k", "new", "get"]),
            vec![Reply::bulk("old")]
        );
        assert_eq!(run(&mut engine, client, &["get", "k"]), vec![Reply::bulk("new")]);
    }

    #[test]
    fn test_set_keepttl_and_overwrite_clears_ttl() {
        let (mut engine, client) = engine_and_client();
        run(&mut engine, client, &["set", "k", "v", "ex", "100"]);
        assert!(engine.db(0).expire_deadline(b"k").is_some());
        run(&mut engine, client, &["set", "k", "v2", "keepttl"]);
        assert!(engine.db(0).expire_deadline(b"k").is_some());
        run(&mut engine, client, &["set", "k", "v3"]);
        assert!(engine.db(0).expire_deadline(b"k").is_none());
    }

    #[test]
    fn test_expire_time_validation() {
        let (mut engine, client) = engine_and_client();
        let replies = run(&mut engine, client, &["set", "k", "v", "ex", "0"]);
        assert!(matches!(&replies[0], Reply::Error(m) if m.contains("invalid expire time")));
        let replies = run(&mut engine, client, &["set", "k", "v", "ex", "-5"]);
        assert!(matches!(&replies[0], Reply::Error(_)));
        let replies = run(&mut engine, client, &["setex", "k", "0", "v"]);
        assert!(matches!(&replies[0], Reply::Error(_)));
    }

    #[test]
    fn test_incr_scenario() {
        let (mut engine, client) = engine_and_client();
        run(&mut engine, client, &["set", "foo", "10"]);
        assert_eq!(run(&mut engine, client, &["incr", "foo"]), vec![Reply::Int(11)]);
        assert_eq!(run(&mut engine, client, &["incr", "foo"]), vec![Reply::Int(12)]);
        assert_eq!(run(&mut engine, client, &["get", "foo"]), vec![Reply::bulk("12")]);
        assert_eq!(
            run(&mut engine, client, &["object", "encoding", "foo"]),
            vec![Reply::bulk("int")]
        );
    }

    #[test]
    fn test_incr_overflow_refused() {
        let (mut engine, client) = engine_and_client();
        run(&mut engine, client, &["set", "k", &i64::MAX.to_string()]);
        let replies = run(&mut engine, client, &["incr", "k"]);
        assert!(matches!(&replies[0], Reply::Error(m) if m.contains("overflow")));
        // Value unchanged after the refused increment.
        assert_eq!(
            run(&mut engine, client, &["get", "k"]),
            vec![Reply::bulk(i64::MAX.to_string())]
        );

        run(&mut engine, client, &["set", "n", &i64::MIN.to_string()]);
        let replies = run(&mut engine, client, &["decr", "n"]);
        assert!(matches!(&replies[0], Reply::Error(_)));
    }

    #[test]
    fn test_incrby_decrby_restore() {
        let (mut engine, client) = engine_and_client();
        run(&mut engine, client, &["set", "k", "100"]);
        run(&mut engine, client, &["incrby", "k", "23"]);
        run(&mut engine, client, &["decrby", "k", "23"]);
        assert_eq!(run(&mut engine, client, &["get", "k"]), vec![Reply::bulk("100")]);
    }

    #[test]
    fn test_incr_non_integer_errors() {
        let (mut engine, client) = engine_and_client();
        run(&mut engine, client, &["set", "k", "abc"]);
        let replies = run(&mut engine, client, &["incr", "k"]);
        assert!(matches!(&replies[0], Reply::Error(m) if m.contains("not an integer")));
    }

    #[test]
    fn test_incrbyfloat() {
        let (mut engine, client) = engine_and_client();
        run(&mut engine, client, &["set", "k", "10.5"]);
        assert_eq!(
            run(&mut engine, client, &["incrbyfloat", "k", "0.1"]),
            vec![Reply::bulk("10.6")]
        );
    }

    #[test]
    fn test_append_scenario() {
        let (mut engine, client) = engine_and_client();
        run(&mut engine, client, &["set", "x", "hello"]);
        assert_eq!(
            run(&mut engine, client, &["object", "encoding", "x"]),
            vec![Reply::bulk("embstr")]
        );
        assert_eq!(
            run(&mut engine, client, &["append", "x", " world"]),
            vec![Reply::Int(11)]
        );
        assert_eq!(run(&mut engine, client, &["strlen", "x"]), vec![Reply::Int(11)]);
        assert_eq!(
            run(&mut engine, client, &["get", "x"]),
            vec![Reply::bulk("hello world")]
        );
        assert_eq!(
            run(&mut engine, client, &["object", "encoding", "x"]),
            vec![Reply::bulk("raw")]
        );
    }

    #[test]
    fn test_embstr_raw_selection_boundary() {
        let (mut engine, client) = engine_and_client();
        let at_limit = "x".repeat(44);
        let over_limit = "x".repeat(45);
        run(&mut engine, client, &["set", "a", &at_limit]);
        run(&mut engine, client, &["set", "b", &over_limit]);
        assert_eq!(
            run(&mut engine, client, &["object", "encoding", "a"]),
            vec![Reply::bulk("embstr")]
        );
        assert_eq!(
            run(&mut engine, client, &["object", "encoding", "b"]),
            vec![Reply::bulk("raw")]
        );
    }

    #[test]
    fn test_setrange_getrange() {
        let (mut engine, client) = engine_and_client();
        run(&mut engine, client, &["set", "k", "Hello World"]);
        assert_eq!(
            run(&mut engine, client, &["setrange", "k", "6", "Redis"]),
            vec![Reply::Int(11)]
        );
        assert_eq!(
            run(&mut engine, client, &["get", "k"]),
            vec![Reply::bulk("Hello Redis")]
        );
        assert_eq!(
            run(&mut engine, client, &["getrange", "k", "0", "4"]),
            vec![Reply::bulk("Hello")]
        );
        assert_eq!(
            run(&mut engine, client, &["getrange", "k", "-5", "-1"]),
            vec![Reply::bulk("Redis")]
        );
        // Zero-padding when writing past the end.
        run(&mut engine, client, &["del", "p"]);
        run(&mut engine, client, &["setrange", "p", "3", "x"]);
        assert_eq!(
            run(&mut engine, client, &["strlen", "p"]),
            vec![Reply::Int(4)]
        );
    }

    #[test]
    fn test_mset_mget_msetnx() {
        let (mut engine, client) = engine_and_client();
        assert_eq!(
            run(&mut engine, client, &["mset", "a", "1", "b", "2"]),
            vec![Reply::Ok]
        );
        assert_eq!(
            run(&mut engine, client, &["mget", "a", "b", "missing"]),
            vec![Reply::Array(vec![
                Reply::bulk("1"),
                Reply::bulk("2"),
                Reply::Nil
            ])]
        );
        assert_eq!(
            run(&mut engine, client, &["msetnx", "b", "9", "c", "3"]),
            vec![Reply::Int(0)]
        );
        assert_eq!(run(&mut engine, client, &["get", "b"]), vec![Reply::bulk("2")]);
        assert_eq!(
            run(&mut engine, client, &["msetnx", "c", "3", "d", "4"]),
            vec![Reply::Int(1)]
        );
    }

    #[test]
    fn test_getdel_and_getex_persist() {
        let (mut engine, client) = engine_and_client();
        run(&mut engine, client, &["set", "k", "v", "ex", "100"]);
        assert_eq!(
            run(&mut engine, client, &["getex", "k", "persist"]),
            vec![Reply::bulk("v")]
        );
        assert!(engine.db(0).expire_deadline(b"k").is_none());
        assert_eq!(
            run(&mut engine, client, &["getdel", "k"]),
            vec![Reply::bulk("v")]
        );
        assert_eq!(run(&mut engine, client, &["exists", "k"]), vec![Reply::Int(0)]);
    }

    #[test]
    fn test_lcs_basic() {
        let (mut engine, client) = engine_and_client();
        run(&mut engine, client, &["mset", "key1", "ohmytext", "key2", "mynewtext"]);
        assert_eq!(
            run(&mut engine, client, &["lcs", "key1", "key2"]),
            vec![Reply::bulk("mytext")]
        );
        assert_eq!(
            run(&mut engine, client, &["lcs", "key1", "key2", "len"]),
            vec![Reply::Int(6)]
        );
    }

    #[test]
    fn test_lcs_idx_ranges() {
        let (mut engine, client) = engine_and_client();
        run(&mut engine, client, &["mset", "key1", "ohmytext", "key2", "mynewtext"]);
        let replies = run(&mut engine, client, &["lcs", "key1", "key2", "idx", "minmatchlen", "4"]);
        let Reply::Array(items) = &replies[0] else {
            panic!("expected array reply");
        };
        assert_eq!(items[0], Reply::bulk("matches"));
        let Reply::Array(matches) = &items[1] else {
            panic!("expected matches array");
        };
        // Only the "text" match (length 4) survives MINMATCHLEN 4.
        assert_eq!(
            matches[0],
            Reply::Array(vec![
                Reply::Array(vec![Reply::Int(4), Reply::Int(7)]),
                Reply::Array(vec![Reply::Int(5), Reply::Int(8)]),
            ])
        );
        assert_eq!(items[2], Reply::bulk("len"));
        assert_eq!(items[3], Reply::Int(6));
    }

    #[test]
    fn test_lcs_wrong_type_message() {
        let (mut engine, client) = engine_and_client();
        run(&mut engine, client, &["lpush", "alist", "x"]);
        let replies = run(&mut engine, client, &["lcs", "alist", "missing"]);
        assert!(
            matches!(&replies[0], Reply::Error(m) if m.contains("must contain string values"))
        );
    }
}
