//! Client blocking and key readiness.
//!
//! A blocking read that finds nothing registers its client under every
//! polled key and returns to the event loop. Writers signal readiness;
//! after the writing command (or transaction) fully completes, the
//! ready queue drains and per-type servers hand elements to waiters in
//! FIFO arrival order, each woken at most once per satisfying event.

pub mod list;
pub mod serve;

use std::collections::HashMap;

use log::debug;

use crate::client::ClientId;
use crate::commands::reply::Reply;
use crate::encodings::{ListEnd, StreamId};
use crate::engine::Engine;
use crate::value::ValueType;
use list::BlockHandle;

/// Why a client is blocked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockType {
    List,
    SortedSet,
    Stream,
    Wait,
    Module,
    Postpone,
    Shutdown,
}

impl BlockType {
    pub const COUNT: usize = 7;

    pub fn index(self) -> usize {
        match self {
            BlockType::List => 0,
            BlockType::SortedSet => 1,
            BlockType::Stream => 2,
            BlockType::Wait => 3,
            BlockType::Module => 4,
            BlockType::Postpone => 5,
            BlockType::Shutdown => 6,
        }
    }

    /// Blocker category a write to a value of this type can satisfy.
    pub fn for_value(vtype: ValueType) -> Option<BlockType> {
        match vtype {
            ValueType::List => Some(BlockType::List),
            ValueType::SortedSet => Some(BlockType::SortedSet),
            ValueType::Stream => Some(BlockType::Stream),
            _ => None,
        }
    }
}

/// How a per-type server frames the wakeup reply: BLPOP-style flat
/// `[key, element, ...]` or BLMPOP-style `[key, [elements...]]`.
///
/// The shape travels on the blocking record so the server never has to
/// re-identify the originating command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyShape {
    Flat,
    NestedArray,
}

/// Which ends a list/zset blocker pops from (and pushes to, for
/// move-style commands).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockPos {
    pub from: ListEnd,
    pub to: Option<ListEnd>,
}

/// Consumer-group context of a blocked XREADGROUP.
#[derive(Debug, Clone)]
pub struct GroupRequest {
    pub group: Vec<u8>,
    pub consumer: Vec<u8>,
    pub noack: bool,
}

/// Replica-acknowledgement context of a blocked WAIT.
#[derive(Debug, Clone, Copy)]
pub struct WaitRequest {
    pub numreplicas: usize,
    pub offset: u64,
}

/// Per-key registration: the removal handle into that key's blocked
/// list and, for streams, the minimum-id threshold.
#[derive(Debug, Clone, Copy)]
pub struct BlockInfo {
    pub handle: BlockHandle,
    pub stream_id: Option<StreamId>,
}

/// The blocking record attached to a blocked client.
#[derive(Debug)]
pub struct BlockState {
    pub btype: BlockType,
    pub keys: HashMap<Vec<u8>, BlockInfo>,
    /// Absolute deadline; None blocks forever.
    pub timeout_at: Option<i64>,
    pub count: Option<usize>,
    /// Destination key of a move-style command.
    pub target: Option<Vec<u8>>,
    pub pos: Option<BlockPos>,
    pub shape: ReplyShape,
    pub group: Option<GroupRequest>,
    pub wait: Option<WaitRequest>,
}

/// Everything a blocking command passes when it parks its client.
#[derive(Debug)]
pub struct BlockRequest {
    pub btype: BlockType,
    pub keys: Vec<Vec<u8>>,
    pub timeout_at: Option<i64>,
    pub count: Option<usize>,
    pub target: Option<Vec<u8>>,
    pub pos: Option<BlockPos>,
    pub shape: ReplyShape,
    /// Per-key stream thresholds, parallel to `keys`.
    pub ids: Option<Vec<StreamId>>,
    pub group: Option<GroupRequest>,
}

impl BlockRequest {
    pub fn new(btype: BlockType, keys: Vec<Vec<u8>>, timeout_at: Option<i64>) -> Self {
        Self {
            btype,
            keys,
            timeout_at,
            count: None,
            target: None,
            pos: None,
            shape: ReplyShape::Flat,
            ids: None,
            group: None,
        }
    }
}

/// One pending entry of the global readiness queue. The key bytes held
/// here keep the reference alive while queued.
#[derive(Debug, Clone)]
pub struct ReadyKey {
    pub db: usize,
    pub key: Vec<u8>,
}

impl Engine {
    /// Park a client on a set of keys. The client is appended to each
    /// key's blocked list (FIFO tail) and remembers its removal handle
    /// per key.
    pub fn block_for_keys(&mut self, client_id: ClientId, request: BlockRequest) {
        let db_index = match self.clients.get(&client_id) {
            Some(c) => c.db,
            None => return,
        };
        let mut keys = HashMap::new();
        for (j, key) in request.keys.iter().enumerate() {
            if keys.contains_key(key) {
                continue;
            }
            let blocked = self.dbs[db_index]
                .blocking_keys
                .entry(key.clone())
                .or_default();
            let handle = blocked.push_back(client_id);
            keys.insert(
                key.clone(),
                BlockInfo {
                    handle,
                    stream_id: request.ids.as_ref().and_then(|ids| ids.get(j).copied()),
                },
            );
        }
        let state = BlockState {
            btype: request.btype,
            keys,
            timeout_at: request.timeout_at,
            count: request.count,
            target: request.target,
            pos: request.pos,
            shape: request.shape,
            group: request.group,
            wait: None,
        };
        self.install_block(client_id, state);
    }

    /// Park a WAIT client until enough replicas acknowledge.
    pub fn block_for_wait(
        &mut self,
        client_id: ClientId,
        wait: WaitRequest,
        timeout_at: Option<i64>,
    ) {
        let state = BlockState {
            btype: BlockType::Wait,
            keys: HashMap::new(),
            timeout_at,
            count: None,
            target: None,
            pos: None,
            shape: ReplyShape::Flat,
            group: None,
            wait: Some(wait),
        };
        self.install_block(client_id, state);
    }

    /// Park a client until shutdown either happens or is aborted.
    pub fn block_for_shutdown(&mut self, client_id: ClientId) {
        let state = BlockState {
            btype: BlockType::Shutdown,
            keys: HashMap::new(),
            timeout_at: None,
            count: None,
            target: None,
            pos: None,
            shape: ReplyShape::Flat,
            group: None,
            wait: None,
        };
        self.install_block(client_id, state);
    }

    /// Park a client whose command must be retried later; the command
    /// replays verbatim on resume.
    pub fn postpone_client(&mut self, client_id: ClientId, command: Vec<Vec<u8>>) {
        if let Some(client) = self.clients.get_mut(&client_id) {
            client.pending_command = Some(command);
        }
        let state = BlockState {
            btype: BlockType::Postpone,
            keys: HashMap::new(),
            timeout_at: None,
            count: None,
            target: None,
            pos: None,
            shape: ReplyShape::Flat,
            group: None,
            wait: None,
        };
        self.install_block(client_id, state);
        self.postponed.push_back(client_id);
    }

    fn install_block(&mut self, client_id: ClientId, state: BlockState) {
        let btype = state.btype;
        if let Some(deadline) = state.timeout_at {
            self.timeout_table.insert((deadline, client_id));
        }
        if let Some(client) = self.clients.get_mut(&client_id) {
            debug_assert!(client.block.is_none(), "client blocked twice");
            client.block = Some(state);
        }
        self.blocked_count[btype.index()] += 1;
        debug!("client {client_id} blocked ({btype:?})");
    }

    /// Fully release a blocked client: both sides of the registry, the
    /// timeout table, the counters, and the reprocessing queue.
    pub fn unblock_client(&mut self, client_id: ClientId) {
        let state = match self
            .clients
            .get_mut(&client_id)
            .and_then(|c| c.block.take())
        {
            Some(state) => state,
            None => return,
        };
        let db_index = self.clients[&client_id].db;

        for (key, info) in &state.keys {
            if let Some(blocked) = self.dbs[db_index].blocking_keys.get_mut(key) {
                blocked.remove(info.handle);
                if blocked.is_empty() {
                    self.dbs[db_index].blocking_keys.remove(key);
                }
            }
        }
        if state.btype == BlockType::Postpone {
            self.postponed.retain(|&id| id != client_id);
        }
        if let Some(deadline) = state.timeout_at {
            self.timeout_table.remove(&(deadline, client_id));
        }
        self.blocked_count[state.btype.index()] -= 1;
        self.queue_for_reprocessing(client_id);
        debug!("client {client_id} unblocked ({:?})", state.btype);
    }

    /// Schedule a client for post-unblock reprocessing, at most once.
    fn queue_for_reprocessing(&mut self, client_id: ClientId) {
        if let Some(client) = self.clients.get_mut(&client_id) {
            if !client.unblocked_latch {
                client.unblocked_latch = true;
                self.unblocked_queue.push_back(client_id);
            }
        }
    }

    /// Drain the reprocessing queue: clear latches and replay parked
    /// commands of clients that did not re-block.
    pub fn process_unblocked_clients(&mut self) {
        while let Some(client_id) = self.unblocked_queue.pop_front() {
            let pending = match self.clients.get_mut(&client_id) {
                Some(client) => {
                    client.unblocked_latch = false;
                    if client.is_blocked() {
                        None
                    } else {
                        client.pending_command.take()
                    }
                }
                None => continue,
            };
            if let Some(argv) = pending {
                self.call(client_id, &argv);
            }
        }
    }

    /// A write that may satisfy waiters happened on `key`. Queues the
    /// key once per command; later signals are absorbed by the
    /// `ready_keys` latch.
    pub fn signal_key_ready(&mut self, db_index: usize, key: &[u8], vtype: ValueType) {
        let btype = match BlockType::for_value(vtype) {
            Some(btype) => btype,
            None => return,
        };
        // Module blockers subscribe to every category, so their count
        // keeps the signal alive even with no typed blocker present.
        if self.blocked_count[btype.index()] == 0
            && self.blocked_count[BlockType::Module.index()] == 0
        {
            return;
        }
        let db = &mut self.dbs[db_index];
        if !db.blocking_keys.contains_key(key) {
            return;
        }
        if !db.ready_keys.insert(key.to_vec()) {
            return;
        }
        self.ready_list.push_back(ReadyKey {
            db: db_index,
            key: key.to_vec(),
        });
    }

    /// Drain the readiness queue, serving waiters per value type. Runs
    /// only at top level, after the triggering command completed.
    /// Signals enqueued while serving (a BLMOVE pushing to its
    /// destination) are picked up by the outer loop of the same drain.
    pub fn handle_ready_keys(&mut self) {
        debug_assert_eq!(self.call_depth, 0, "ready keys drained mid-command");
        while !self.ready_list.is_empty() {
            let batch = std::mem::take(&mut self.ready_list);
            for ready in batch {
                self.dbs[ready.db].ready_keys.remove(&ready.key);
                // Fixed time: the key must not expire between the
                // repeated lookups a move-style serve performs.
                self.clock.push_fixed();
                match self.lookup_serving(ready.db, &ready.key) {
                    Some(value) => {
                        match value.object_type() {
                            ValueType::List => self.serve_list(&ready),
                            ValueType::SortedSet => self.serve_zset(&ready),
                            ValueType::Stream => self.serve_stream(&ready),
                            _ => {}
                        }
                        self.serve_module(&ready);
                        if value.object_type() != ValueType::Stream {
                            self.unblock_deleted_stream_group_clients(&ready);
                        }
                    }
                    None => self.unblock_deleted_stream_group_clients(&ready),
                }
                self.clock.pop_fixed();
            }
        }
    }

    /// Wake every waiter whose deadline passed, with the
    /// type-appropriate empty reply.
    pub fn process_timeouts(&mut self, now_ms: i64) {
        loop {
            let due = match self.timeout_table.iter().next() {
                Some(&(deadline, client_id)) if deadline <= now_ms => (deadline, client_id),
                _ => break,
            };
            self.timeout_table.remove(&due);
            self.reply_timeout(due.1);
        }
    }

    fn reply_timeout(&mut self, client_id: ClientId) {
        let reply = match self.clients.get(&client_id).and_then(|c| c.block_type()) {
            Some(BlockType::List) | Some(BlockType::SortedSet) | Some(BlockType::Stream) => {
                Reply::NilArray
            }
            Some(BlockType::Wait) => Reply::Int(self.repl_acked_replicas as i64),
            _ => return,
        };
        self.push_reply(client_id, reply);
        self.unblock_client(client_id);
    }

    /// Replication progress callback: wake WAIT clients whose quorum is
    /// now met.
    pub fn replica_ack(&mut self, acked_replicas: usize) {
        self.repl_acked_replicas = acked_replicas;
        if self.blocked_count[BlockType::Wait.index()] == 0 {
            return;
        }
        let satisfied: Vec<ClientId> = self
            .clients
            .values()
            .filter_map(|c| {
                let state = c.block.as_ref()?;
                let wait = state.wait?;
                (state.btype == BlockType::Wait && wait.numreplicas <= acked_replicas)
                    .then_some(c.id)
            })
            .collect();
        for client_id in satisfied {
            self.push_reply(client_id, Reply::Int(acked_replicas as i64));
            self.unblock_client(client_id);
        }
    }

    /// Shutdown was aborted: release SHUTDOWN waiters with an error.
    pub fn abort_shutdown(&mut self) {
        self.shutdown_pending = false;
        let waiters: Vec<ClientId> = self
            .clients
            .values()
            .filter(|c| c.block_type() == Some(BlockType::Shutdown))
            .map(|c| c.id)
            .collect();
        for client_id in waiters {
            self.push_reply(
                client_id,
                Reply::error("ERR Errors trying to SHUT DOWN. Check logs."),
            );
            self.unblock_client(client_id);
        }
    }

    /// Release postponed clients; their parked commands replay on the
    /// next reprocessing drain.
    pub fn resume_postponed_clients(&mut self) {
        let parked: Vec<ClientId> = self.postponed.iter().copied().collect();
        for client_id in parked {
            self.unblock_client(client_id);
        }
    }

    /// Topology changed under every blocked client: wake them with an
    /// UNBLOCKED error and mark their connections for closing.
    /// Postponed clients are exempt; their commands re-run from scratch.
    pub fn disconnect_all_blocked_clients(&mut self) {
        let blocked: Vec<ClientId> = self
            .clients
            .values()
            .filter(|c| c.is_blocked() && c.block_type() != Some(BlockType::Postpone))
            .map(|c| c.id)
            .collect();
        for client_id in blocked {
            self.push_reply(
                client_id,
                Reply::error(
                    "UNBLOCKED force unblock from blocking operation, \
                     instance state changed (master -> replica?)",
                ),
            );
            self.unblock_client(client_id);
            if let Some(client) = self.clients.get_mut(&client_id) {
                client.close_after_reply = true;
            }
        }
    }
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
    fn test_ready_queue_holds_each_key_once() {
        let mut engine = Engine::new(Config::default());
        let waiter = engine.create_client(0);
        run(&mut engine, waiter, &["blpop", "q", "0"]);

        engine.signal_key_ready(0, b"q", ValueType::List);
        engine.signal_key_ready(0, b"q", ValueType::List);
        engine.signal_key_ready(0, b"q", ValueType::List);
        assert_eq!(engine.ready_list.len(), 1);
        assert!(engine.dbs[0].ready_keys.contains(b"q".as_slice()));
    }

    #[test]
    fn test_signal_without_waiters_is_a_noop() {
        let mut engine = Engine::new(Config::default());
        engine.signal_key_ready(0, b"q", ValueType::List);
        assert!(engine.ready_list.is_empty());
        assert!(engine.dbs[0].ready_keys.is_empty());
    }

    #[test]
    fn test_module_blocker_woken_by_any_type() {
        let mut engine = Engine::new(Config::default());
        let module = engine.create_client(0);
        let writer = engine.create_client(0);

        let request = BlockRequest::new(BlockType::Module, vec![b"k".to_vec()], None);
        engine.block_for_keys(module, request);
        assert_eq!(engine.blocked_clients(), 1);

        run(&mut engine, writer, &["rpush", "k", "v"]);
        let replies = engine.take_replies(module);
        assert_eq!(replies, vec![Reply::Array(vec![Reply::bulk("k")])]);
        assert_eq!(engine.blocked_clients(), 0);
    }

    #[test]
    fn test_postpone_replays_parked_command() {
        let mut engine = Engine::new(Config::default());
        let writer = engine.create_client(0);
        let parked = engine.create_client(0);
        run(&mut engine, writer, &["set", "k", "v"]);

        let command: Vec<Vec<u8>> = vec![b"get".to_vec(), b"k".to_vec()];
        engine.postpone_client(parked, command);
        assert_eq!(engine.blocked_clients(), 1);
        assert!(engine.take_replies(parked).is_empty());

        engine.resume_postponed_clients();
        engine.process_unblocked_clients();
        assert_eq!(engine.take_replies(parked), vec![Reply::bulk("v")]);
        assert_eq!(engine.blocked_clients(), 0);
    }

    #[test]
    fn test_abort_shutdown_errors_waiters() {
        let mut engine = Engine::new(Config::default());
        let waiter = engine.create_client(0);
        engine.begin_shutdown();
        engine.block_for_shutdown(waiter);
        assert_eq!(engine.blocked_clients(), 1);

        engine.abort_shutdown();
        assert!(!engine.is_shutting_down());
        let replies = engine.take_replies(waiter);
        assert!(matches!(&replies[0], Reply::Error(m) if m.contains("SHUT DOWN")));
        assert_eq!(engine.blocked_clients(), 0);
    }

    #[test]
    fn test_forced_unblock_marks_connections() {
        let mut engine = Engine::new(Config::default());
        let a = engine.create_client(0);
        let b = engine.create_client(0);
        run(&mut engine, a, &["blpop", "x", "0"]);
        run(&mut engine, b, &["blpop", "y", "0"]);

        engine.disconnect_all_blocked_clients();
        assert_eq!(engine.blocked_clients(), 0);
        for id in [a, b] {
            let replies = engine.take_replies(id);
            assert!(matches!(&replies[0], Reply::Error(m) if m.starts_with("UNBLOCKED")));
            assert!(engine.client(id).unwrap().close_after_reply);
        }
        assert!(engine.dbs[0].blocking_keys.is_empty());
    }

    #[test]
    fn test_reprocessing_latch_is_at_most_once() {
        let mut engine = Engine::new(Config::default());
        let waiter = engine.create_client(0);
        run(&mut engine, waiter, &["blpop", "q", "0"]);

        engine.unblock_client(waiter);
        assert_eq!(engine.unblocked_queue.len(), 1);
        // A second queueing attempt while latched is absorbed.
        engine.queue_for_reprocessing(waiter);
        assert_eq!(engine.unblocked_queue.len(), 1);
    }
}
