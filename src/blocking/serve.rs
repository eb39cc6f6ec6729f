//! Per-type servers for ready keys.
//!
//! Each server walks the key's blocked list in FIFO arrival order,
//! skips clients of other blocker types without disturbing their
//! position, performs the element extraction through the same keyspace
//! primitives the non-blocking commands use, writes the reply, and
//! unblocks the receiver.

use log::debug;

use super::{BlockPos, BlockType, ReadyKey, ReplyShape};
use crate::commands::reply::Reply;
use crate::encodings::{ListEnd, StreamEntry, StreamId};
use crate::engine::Engine;
use crate::notify;
use crate::value::{make_owned, ObjectBody, ValueType};

/// Reply fragment for a batch of stream entries.
pub(crate) fn stream_entries_reply(entries: &[StreamEntry]) -> Reply {
    Reply::Array(
        entries
            .iter()
            .map(|entry| {
                let mut fields = Vec::with_capacity(entry.fields.len() * 2);
                for (f, v) in &entry.fields {
                    fields.push(Reply::bulk(f.clone()));
                    fields.push(Reply::bulk(v.clone()));
                }
                Reply::Array(vec![
                    Reply::bulk(entry.id.to_string()),
                    Reply::Array(fields),
                ])
            })
            .collect(),
    )
}

impl Engine {
    /// Serve clients blocked on a list key that received a push.
    pub(crate) fn serve_list(&mut self, ready: &ReadyKey) {
        if self.blocked_count[BlockType::List.index()] == 0 {
            return;
        }
        let snapshot = match self.dbs[ready.db].blocking_keys.get(&ready.key) {
            Some(blocked) => blocked.snapshot(),
            None => return,
        };
        for client_id in snapshot {
            let alive = match self.dbs[ready.db].get_raw(&ready.key) {
                Some(value) => value.object_type() == ValueType::List,
                None => false,
            };
            if !alive {
                break;
            }
            let (pos, count, target, shape) =
                match self.clients.get(&client_id).and_then(|c| c.block.as_ref()) {
                    Some(state) if state.btype == BlockType::List => (
                        state.pos.unwrap_or(BlockPos {
                            from: ListEnd::Head,
                            to: None,
                        }),
                        state.count,
                        state.target.clone(),
                        state.shape,
                    ),
                    _ => continue,
                };

            if let Some(dst) = target {
                self.serve_list_move(ready, client_id, pos, &dst);
            } else {
                self.serve_list_pop(ready, client_id, pos.from, count, shape);
            }
        }
    }

    fn serve_list_pop(
        &mut self,
        ready: &ReadyKey,
        client_id: u64,
        from: ListEnd,
        count: Option<usize>,
        shape: ReplyShape,
    ) {
        let wanted = count.unwrap_or(1).max(1);
        let mut elements = Vec::with_capacity(wanted);
        let mut deleted = false;
        while elements.len() < wanted {
            match self.generic_list_pop(ready.db, &ready.key, from) {
                Some((element, emptied)) => {
                    elements.push(element);
                    if emptied {
                        deleted = true;
                        break;
                    }
                }
                None => break,
            }
        }
        if elements.is_empty() {
            return;
        }
        let event = match from {
            ListEnd::Head => "lpop",
            ListEnd::Tail => "rpop",
        };
        self.notify_keyspace_event(notify::LIST, event, &ready.key, ready.db);
        if deleted {
            self.notify_keyspace_event(notify::GENERIC, "del", &ready.key, ready.db);
        }
        self.dbs[ready.db].signal_modified(&ready.key);
        self.dirty += elements.len() as u64;

        let reply = match shape {
            ReplyShape::Flat => Reply::Array(vec![
                Reply::bulk(ready.key.clone()),
                Reply::bulk(elements.remove(0)),
            ]),
            ReplyShape::NestedArray => Reply::Array(vec![
                Reply::bulk(ready.key.clone()),
                Reply::Array(elements.into_iter().map(Reply::bulk).collect()),
            ]),
        };
        self.push_reply(client_id, reply);
        self.unblock_client(client_id);
    }

    fn serve_list_move(&mut self, ready: &ReadyKey, client_id: u64, pos: BlockPos, dst: &[u8]) {
        // The destination must be absent or a list before anything pops.
        let dst_ok = match self.dbs[ready.db].get_raw(dst) {
            None => true,
            Some(value) => value.object_type() == ValueType::List,
        };
        if !dst_ok {
            self.push_reply(
                client_id,
                Reply::error("WRONGTYPE Operation against a key holding the wrong kind of value"),
            );
            self.unblock_client(client_id);
            return;
        }
        let (element, source_deleted) = match self.generic_list_pop(ready.db, &ready.key, pos.from)
        {
            Some(popped) => popped,
            None => return,
        };
        let to = pos.to.unwrap_or(ListEnd::Tail);
        self.generic_list_push(ready.db, dst, to, &element);

        let from_event = match pos.from {
            ListEnd::Head => "lpop",
            ListEnd::Tail => "rpop",
        };
        let to_event = match to {
            ListEnd::Head => "lpush",
            ListEnd::Tail => "rpush",
        };
        self.notify_keyspace_event(notify::LIST, from_event, &ready.key, ready.db);
        if source_deleted {
            self.notify_keyspace_event(notify::GENERIC, "del", &ready.key, ready.db);
        }
        self.notify_keyspace_event(notify::LIST, to_event, dst, ready.db);
        self.dbs[ready.db].signal_modified(&ready.key);
        self.dbs[ready.db].signal_modified(dst);
        self.dirty += 2;
        // The push side may satisfy waiters on the destination; that
        // signal joins the same drain.
        self.signal_key_ready(ready.db, dst, ValueType::List);

        self.push_reply(client_id, Reply::bulk(element));
        self.unblock_client(client_id);
    }

    /// Serve clients blocked on a sorted-set key.
    pub(crate) fn serve_zset(&mut self, ready: &ReadyKey) {
        if self.blocked_count[BlockType::SortedSet.index()] == 0 {
            return;
        }
        let snapshot = match self.dbs[ready.db].blocking_keys.get(&ready.key) {
            Some(blocked) => blocked.snapshot(),
            None => return,
        };
        for client_id in snapshot {
            let alive = match self.dbs[ready.db].get_raw(&ready.key) {
                Some(value) => value.object_type() == ValueType::SortedSet,
                None => false,
            };
            if !alive {
                break;
            }
            let (from, count, shape) =
                match self.clients.get(&client_id).and_then(|c| c.block.as_ref()) {
                    Some(state) if state.btype == BlockType::SortedSet => (
                        state.pos.map(|p| p.from).unwrap_or(ListEnd::Head),
                        state.count,
                        state.shape,
                    ),
                    _ => continue,
                };

            let wanted = count.unwrap_or(1).max(1);
            let mut popped = Vec::with_capacity(wanted);
            let mut deleted = false;
            while popped.len() < wanted {
                match self.generic_zset_pop(ready.db, &ready.key, from) {
                    Some((member, score, emptied)) => {
                        popped.push((member, score));
                        if emptied {
                            deleted = true;
                            break;
                        }
                    }
                    None => break,
                }
            }
            if popped.is_empty() {
                continue;
            }
            let event = match from {
                ListEnd::Head => "zpopmin",
                ListEnd::Tail => "zpopmax",
            };
            self.notify_keyspace_event(notify::ZSET, event, &ready.key, ready.db);
            if deleted {
                self.notify_keyspace_event(notify::GENERIC, "del", &ready.key, ready.db);
            }
            self.dbs[ready.db].signal_modified(&ready.key);
            self.dirty += popped.len() as u64;

            let reply = match shape {
                ReplyShape::Flat => {
                    let (member, score) = popped.remove(0);
                    Reply::Array(vec![
                        Reply::bulk(ready.key.clone()),
                        Reply::bulk(member),
                        Reply::bulk(crate::value::strconv::format_f64(score)),
                    ])
                }
                ReplyShape::NestedArray => Reply::Array(vec![
                    Reply::bulk(ready.key.clone()),
                    Reply::Array(
                        popped
                            .into_iter()
                            .map(|(member, score)| {
                                Reply::Array(vec![
                                    Reply::bulk(member),
                                    Reply::bulk(crate::value::strconv::format_f64(score)),
                                ])
                            })
                            .collect(),
                    ),
                ]),
            };
            self.push_reply(client_id, reply);
            self.unblock_client(client_id);
        }
    }

    /// Serve clients blocked on a stream key that received entries.
    pub(crate) fn serve_stream(&mut self, ready: &ReadyKey) {
        if self.blocked_count[BlockType::Stream.index()] == 0 {
            return;
        }
        let snapshot = match self.dbs[ready.db].blocking_keys.get(&ready.key) {
            Some(blocked) => blocked.snapshot(),
            None => return,
        };
        let now_ms = self.clock.now_ms();
        for client_id in snapshot {
            let (threshold, count, group) =
                match self.clients.get(&client_id).and_then(|c| c.block.as_ref()) {
                    Some(state) if state.btype == BlockType::Stream => (
                        state
                            .keys
                            .get(&ready.key)
                            .and_then(|info| info.stream_id)
                            .unwrap_or(StreamId::MIN),
                        state.count.unwrap_or(0),
                        state.group.clone(),
                    ),
                    _ => continue,
                };

            let stream_alive = matches!(
                self.dbs[ready.db].get_raw(&ready.key).map(|v| v.object_type()),
                Some(ValueType::Stream)
            );
            if !stream_alive {
                break;
            }

            let served: Result<Vec<StreamEntry>, Reply> = {
                let value = self.dbs[ready.db].get_raw_mut(&ready.key).unwrap();
                let owned = make_owned(value);
                let ObjectBody::Stream(stream) = owned.body_mut() else {
                    unreachable!("stream type checked above");
                };
                match &group {
                    Some(request) => match stream.group_mut(&request.group) {
                        None => Err(Reply::error(format!(
                            "NOGROUP No such consumer group '{}' for key name '{}'",
                            String::from_utf8_lossy(&request.group),
                            String::from_utf8_lossy(&ready.key)
                        ))),
                        Some(cg) => {
                            // Deliver from just past the newer of the
                            // client's threshold and the group cursor.
                            if threshold > cg.last_delivered {
                                cg.last_delivered = threshold;
                            }
                            Ok(stream
                                .read_group(
                                    &request.group,
                                    &request.consumer,
                                    count,
                                    request.noack,
                                    now_ms,
                                )
                                .unwrap_or_default())
                        }
                    },
                    None => Ok(stream.range(threshold.next(), StreamId::MAX, count)),
                }
            };

            match served {
                Err(error) => {
                    self.push_reply(client_id, error);
                    self.unblock_client(client_id);
                }
                Ok(entries) if entries.is_empty() => continue,
                Ok(entries) => {
                    debug!(
                        "serving {} stream entries to client {client_id}",
                        entries.len()
                    );
                    let reply = Reply::Array(vec![Reply::Array(vec![
                        Reply::bulk(ready.key.clone()),
                        stream_entries_reply(&entries),
                    ])]);
                    self.push_reply(client_id, reply);
                    self.unblock_client(client_id);
                }
            }
        }
    }

    /// Module blockers subscribe to every value type; the module
    /// runtime owns the real reply, the engine's contract is to wake
    /// them with the ready key once it changes.
    pub(crate) fn serve_module(&mut self, ready: &ReadyKey) {
        if self.blocked_count[BlockType::Module.index()] == 0 {
            return;
        }
        let snapshot = match self.dbs[ready.db].blocking_keys.get(&ready.key) {
            Some(blocked) => blocked.snapshot(),
            None => return,
        };
        for client_id in snapshot {
            let is_module = self
                .clients
                .get(&client_id)
                .and_then(|c| c.block_type())
                == Some(BlockType::Module);
            if !is_module {
                continue;
            }
            self.push_reply(
                client_id,
                Reply::Array(vec![Reply::bulk(ready.key.clone())]),
            );
            self.unblock_client(client_id);
        }
    }

    /// XREADGROUP waiters depend on both the key and the group. Once
    /// the key is gone (or reborn as another type) the group can never
    /// come back for them, so they are woken with an error now rather
    /// than left to rot until the next XADD.
    pub(crate) fn unblock_deleted_stream_group_clients(&mut self, ready: &ReadyKey) {
        if self.blocked_count[BlockType::Stream.index()] == 0 {
            return;
        }
        let snapshot = match self.dbs[ready.db].blocking_keys.get(&ready.key) {
            Some(blocked) => blocked.snapshot(),
            None => return,
        };
        for client_id in snapshot {
            let is_group_reader = matches!(
                self.clients.get(&client_id).and_then(|c| c.block.as_ref()),
                Some(state) if state.btype == BlockType::Stream && state.group.is_some()
            );
            if !is_group_reader {
                continue;
            }
            self.push_reply(
                client_id,
                Reply::error("UNBLOCKED the stream key no longer exists"),
            );
            self.unblock_client(client_id);
        }
    }
}
