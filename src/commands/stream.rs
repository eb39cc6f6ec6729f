//! Stream commands, including the blocking reads.

use std::sync::Arc;

use super::reply::Reply;
use super::{arg_eq_ignore_case, arg_i64, CommandError, CommandResult};
use crate::blocking::serve::stream_entries_reply;
use crate::blocking::{BlockRequest, BlockType, GroupRequest};
use crate::client::ClientId;
use crate::encodings::{Stream, StreamEntry, StreamError, StreamId};
use crate::engine::Engine;
use crate::notify;
use crate::value::{make_owned, Object, ObjectBody, ValueType};

fn nogroup_error(group: &[u8], key: &[u8]) -> CommandError {
    CommandError::Other(format!(
        "NOGROUP No such consumer group '{}' for key name '{}'",
        String::from_utf8_lossy(group),
        String::from_utf8_lossy(key)
    ))
}

fn stream_error(error: StreamError) -> CommandError {
    CommandError::Other(error.to_string())
}

/// Millisecond BLOCK argument; `None` when absent, `Some(None)` for
/// block-forever, `Some(Some(deadline))` otherwise.
type BlockArg = Option<Option<i64>>;

impl Engine {
    fn with_stream_mut<T>(
        &mut self,
        db: usize,
        key: &[u8],
        f: impl FnOnce(&mut Stream) -> T,
    ) -> Option<T> {
        let slot = self.dbs[db].get_raw_mut(key)?;
        let owned = make_owned(slot);
        match owned.body_mut() {
            ObjectBody::Stream(stream) => Some(f(stream)),
            _ => None,
        }
    }
}

/// XADD key [NOMKSTREAM] <*|id> field value [field value ...]
pub fn xadd_command(engine: &mut Engine, client_id: ClientId, argv: &[Vec<u8>]) -> CommandResult<()> {
    let db = engine.clients[&client_id].db;
    let key = &argv[1];
    let mut at = 2;
    let mut mkstream = true;
    if arg_eq_ignore_case(&argv[at], "nomkstream") {
        mkstream = false;
        at += 1;
    }
    if argv.len() < at + 3 || (argv.len() - at - 1) % 2 != 0 {
        return Err(CommandError::WrongArity("xadd".into()));
    }
    let id_arg = &argv[at];
    let fields: Vec<(Vec<u8>, Vec<u8>)> = argv[at + 1..]
        .chunks(2)
        .map(|c| (c[0].clone(), c[1].clone()))
        .collect();

    let existing = super::expect_type(engine.lookup_write(db, key), ValueType::Stream)?;
    if existing.is_none() {
        if !mkstream {
            engine.push_reply(client_id, Reply::Nil);
            return Ok(());
        }
        let stream = Stream::new(engine.config.stream_node_max_entries);
        engine.set_key(db, key, Arc::new(Object::new(ObjectBody::Stream(stream))), false);
    }

    let now_ms = engine.clock.now_ms();
    let result = engine
        .with_stream_mut(db, key, |stream| {
            let id = if id_arg == b"*" {
                stream.next_auto_id(now_ms)
            } else {
                match StreamId::parse(id_arg, 0) {
                    Some(id) => id,
                    None => return Err(CommandError::Other("Invalid stream ID specified as stream command argument".into())),
                }
            };
            stream.append(id, &fields).map_err(stream_error)?;
            Ok(id)
        })
        .expect("stream created above");
    let id = result?;

    engine.signal_key_ready(db, key, ValueType::Stream);
    engine.db_mut(db).signal_modified(key);
    engine.notify_keyspace_event(notify::STREAM, "xadd", key, db);
    engine.dirty += 1;
    engine.push_reply(client_id, Reply::bulk(id.to_string()));
    Ok(())
}

pub fn xlen_command(engine: &mut Engine, client_id: ClientId, argv: &[Vec<u8>]) -> CommandResult<()> {
    let db = engine.clients[&client_id].db;
    let len = match super::expect_type(engine.lookup_read(db, &argv[1]), ValueType::Stream)? {
        None => 0,
        Some(value) => match value.body() {
            ObjectBody::Stream(stream) => stream.len(),
            _ => 0,
        },
    };
    engine.push_reply(client_id, Reply::Int(len as i64));
    Ok(())
}

fn parse_range_id(bytes: &[u8], default: StreamId, default_seq: u64) -> CommandResult<StreamId> {
    if bytes == b"-" || bytes == b"+" {
        return Ok(default);
    }
    StreamId::parse(bytes, default_seq).ok_or_else(|| {
        CommandError::Other("Invalid stream ID specified as stream command argument".into())
    })
}

/// XRANGE key start end [COUNT n]
pub fn xrange_command(
    engine: &mut Engine,
    client_id: ClientId,
    argv: &[Vec<u8>],
) -> CommandResult<()> {
    let db = engine.clients[&client_id].db;
    let start = parse_range_id(&argv[2], StreamId::MIN, 0)?;
    let end = parse_range_id(&argv[3], StreamId::MAX, u64::MAX)?;
    let mut count = 0usize;
    if argv.len() > 4 {
        if argv.len() != 6 || !arg_eq_ignore_case(&argv[4], "count") {
            return Err(CommandError::Syntax);
        }
        count = arg_i64(&argv[5])?.max(0) as usize;
    }
    let entries = match super::expect_type(engine.lookup_read(db, &argv[1]), ValueType::Stream)? {
        None => Vec::new(),
        Some(value) => match value.body() {
            ObjectBody::Stream(stream) => stream.range(start, end, count),
            _ => Vec::new(),
        },
    };
    engine.push_reply(client_id, stream_entries_reply(&entries));
    Ok(())
}

struct ReadSpec {
    count: usize,
    block: BlockArg,
    noack: bool,
    group: Option<(Vec<u8>, Vec<u8>)>,
    keys: Vec<Vec<u8>>,
    ids: Vec<Vec<u8>>,
}

fn parse_read_args(
    engine: &Engine,
    argv: &[Vec<u8>],
    grouped: bool,
) -> CommandResult<ReadSpec> {
    let mut spec = ReadSpec {
        count: 0,
        block: None,
        noack: false,
        group: None,
        keys: Vec::new(),
        ids: Vec::new(),
    };
    let mut at = 1;
    if grouped {
        if !arg_eq_ignore_case(&argv[at], "group") || argv.len() < at + 3 {
            return Err(CommandError::Syntax);
        }
        spec.group = Some((argv[at + 1].clone(), argv[at + 2].clone()));
        at += 3;
    }
    while at < argv.len() {
        if arg_eq_ignore_case(&argv[at], "count") && at + 1 < argv.len() {
            spec.count = arg_i64(&argv[at + 1])?.max(0) as usize;
            at += 2;
        } else if arg_eq_ignore_case(&argv[at], "block") && at + 1 < argv.len() {
            spec.block = Some(super::parse_timeout_ms(engine, &argv[at + 1])?);
            at += 2;
        } else if grouped && arg_eq_ignore_case(&argv[at], "noack") {
            spec.noack = true;
            at += 1;
        } else if arg_eq_ignore_case(&argv[at], "streams") {
            at += 1;
            let rest = argv.len() - at;
            if rest == 0 || rest % 2 != 0 {
                return Err(CommandError::Other(
                    "Unbalanced XREAD list of streams: for each stream key an ID or '$' must be \
                     specified."
                        .into(),
                ));
            }
            let half = rest / 2;
            spec.keys = argv[at..at + half].to_vec();
            spec.ids = argv[at + half..].to_vec();
            return Ok(spec);
        } else {
            return Err(CommandError::Syntax);
        }
    }
    Err(CommandError::Syntax)
}

/// XREAD [COUNT n] [BLOCK ms] STREAMS key [key ...] id [id ...]
pub fn xread_command(engine: &mut Engine, client_id: ClientId, argv: &[Vec<u8>]) -> CommandResult<()> {
    let db = engine.clients[&client_id].db;
    let spec = parse_read_args(engine, argv, false)?;

    // Resolve thresholds: "$" is the stream's current tip (and only
    // makes sense together with BLOCK).
    let mut thresholds = Vec::with_capacity(spec.keys.len());
    for (key, id_arg) in spec.keys.iter().zip(&spec.ids) {
        let value = super::expect_type(engine.lookup_read(db, key), ValueType::Stream)?;
        let threshold = if id_arg.as_slice() == b"$" {
            match &value {
                Some(value) => match value.body() {
                    ObjectBody::Stream(stream) => stream.last_id,
                    _ => StreamId::MIN,
                },
                None => StreamId::MIN,
            }
        } else {
            StreamId::parse(id_arg, 0).ok_or_else(|| {
                CommandError::Other(
                    "Invalid stream ID specified as stream command argument".into(),
                )
            })?
        };
        thresholds.push(threshold);
    }

    let mut results: Vec<Reply> = Vec::new();
    for (key, threshold) in spec.keys.iter().zip(&thresholds) {
        let entries: Vec<StreamEntry> = match engine.db(db).get_raw(key) {
            Some(value) => match value.body() {
                ObjectBody::Stream(stream) => {
                    stream.range(threshold.next(), StreamId::MAX, spec.count)
                }
                _ => Vec::new(),
            },
            None => Vec::new(),
        };
        if !entries.is_empty() {
            results.push(Reply::Array(vec![
                Reply::bulk(key.clone()),
                stream_entries_reply(&entries),
            ]));
        }
    }
    if !results.is_empty() {
        engine.push_reply(client_id, Reply::Array(results));
        return Ok(());
    }
    match spec.block {
        None => {
            engine.push_reply(client_id, Reply::NilArray);
            Ok(())
        }
        Some(timeout_at) => {
            let mut request = BlockRequest::new(BlockType::Stream, spec.keys, timeout_at);
            request.count = Some(spec.count);
            request.ids = Some(thresholds);
            engine.block_for_keys(client_id, request);
            Ok(())
        }
    }
}

/// XGROUP CREATE key group <id|$> [MKSTREAM]
pub fn xgroup_command(
    engine: &mut Engine,
    client_id: ClientId,
    argv: &[Vec<u8>],
) -> CommandResult<()> {
    if argv.len() < 5 || !arg_eq_ignore_case(&argv[1], "create") {
        return Err(CommandError::Syntax);
    }
    let db = engine.clients[&client_id].db;
    let key = argv[2].clone();
    let group = argv[3].clone();
    let mkstream = argv.len() == 6 && arg_eq_ignore_case(&argv[5], "mkstream");
    if argv.len() > 5 && !mkstream {
        return Err(CommandError::Syntax);
    }

    let existing = super::expect_type(engine.lookup_write(db, &key), ValueType::Stream)?;
    if existing.is_none() {
        if !mkstream {
            return Err(CommandError::Other(
                "The XGROUP subcommand requires the key to exist. Note that for CREATE you may \
                 want to use the MKSTREAM option to create an empty stream automatically."
                    .into(),
            ));
        }
        let stream = Stream::new(engine.config.stream_node_max_entries);
        engine.set_key(db, &key, Arc::new(Object::new(ObjectBody::Stream(stream))), false);
    }

    let start_arg = argv[4].clone();
    let created = engine
        .with_stream_mut(db, &key, |stream| {
            let start = if start_arg == b"$" {
                Some(stream.last_id)
            } else {
                StreamId::parse(&start_arg, 0)
            };
            start.map(|start| stream.create_group(&group, start))
        })
        .expect("stream ensured above");
    match created {
        None => Err(CommandError::Other(
            "Invalid stream ID specified as stream command argument".into(),
        )),
        Some(false) => Err(CommandError::Other(
            "BUSYGROUP Consumer Group name already exists".into(),
        )),
        Some(true) => {
            engine.dirty += 1;
            engine.push_reply(client_id, Reply::Ok);
            Ok(())
        }
    }
}

/// XREADGROUP GROUP g consumer [COUNT n] [BLOCK ms] [NOACK] STREAMS ...
pub fn xreadgroup_command(
    engine: &mut Engine,
    client_id: ClientId,
    argv: &[Vec<u8>],
) -> CommandResult<()> {
    let db = engine.clients[&client_id].db;
    let spec = parse_read_args(engine, argv, true)?;
    let (group_name, consumer_name) = spec.group.clone().expect("grouped parse");
    let now_ms = engine.clock.now_ms();

    let mut results: Vec<Reply> = Vec::new();
    let mut thresholds = Vec::with_capacity(spec.keys.len());
    for (key, id_arg) in spec.keys.iter().zip(&spec.ids) {
        // The key and the group must both exist up front.
        let value = super::expect_type(engine.lookup_read(db, key), ValueType::Stream)?;
        let group_exists = match &value {
            Some(value) => match value.body() {
                ObjectBody::Stream(stream) => stream.groups.contains_key(group_name.as_slice()),
                _ => false,
            },
            None => false,
        };
        if !group_exists {
            return Err(nogroup_error(&group_name, key));
        }

        if id_arg.as_slice() == b">" {
            let (threshold, entries) = engine
                .with_stream_mut(db, key, |stream| {
                    let threshold = stream
                        .groups
                        .get(group_name.as_slice())
                        .map(|g| g.last_delivered)
                        .unwrap_or(StreamId::MIN);
                    let entries = stream
                        .read_group(&group_name, &consumer_name, spec.count, spec.noack, now_ms)
                        .unwrap_or_default();
                    (threshold, entries)
                })
                .expect("stream checked above");
            thresholds.push(threshold);
            if !entries.is_empty() {
                results.push(Reply::Array(vec![
                    Reply::bulk(key.clone()),
                    stream_entries_reply(&entries),
                ]));
            }
        } else {
            // History replay: entries from this consumer's pending
            // list, above the given id. No cursor or PEL updates.
            let start = StreamId::parse(id_arg, 0).ok_or_else(|| {
                CommandError::Other(
                    "Invalid stream ID specified as stream command argument".into(),
                )
            })?;
            thresholds.push(start);
            let entries = engine
                .with_stream_mut(db, key, |stream| {
                    let ids: Vec<StreamId> = match stream.groups.get(group_name.as_slice()) {
                        Some(group) => match group.consumers.get(consumer_name.as_slice()) {
                            Some(consumer) => consumer
                                .pel
                                .iter()
                                .filter_map(|(id, _)| StreamId::from_bytes(&id))
                                .filter(|id| *id >= start)
                                .collect(),
                            None => Vec::new(),
                        },
                        None => Vec::new(),
                    };
                    ids.into_iter()
                        .flat_map(|id| stream.range(id, id, 1))
                        .collect::<Vec<_>>()
                })
                .unwrap_or_default();
            // History reads always produce a (possibly empty) entry
            // list for the key.
            results.push(Reply::Array(vec![
                Reply::bulk(key.clone()),
                stream_entries_reply(&entries),
            ]));
        }
    }

    if !results.is_empty() {
        engine.push_reply(client_id, Reply::Array(results));
        return Ok(());
    }
    match spec.block {
        None => {
            engine.push_reply(client_id, Reply::NilArray);
            Ok(())
        }
        Some(timeout_at) => {
            let mut request = BlockRequest::new(BlockType::Stream, spec.keys, timeout_at);
            request.count = Some(spec.count);
            request.ids = Some(thresholds);
            request.group = Some(GroupRequest {
                group: group_name,
                consumer: consumer_name,
                noack: spec.noack,
            });
            engine.block_for_keys(client_id, request);
            Ok(())
        }
    }
}
