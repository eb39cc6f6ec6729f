//! The executor context.
//!
//! Exactly one thread owns an [`Engine`] and with it every database,
//! client record, and value. Commands run to completion; the only
//! "suspension" is a blocking command registering its client and
//! returning. After each top-level command the readiness queue drains
//! and unblocked clients are reprocessed. Auxiliary threads (the
//! reclaimer) only ever receive ownership of detached values.

use std::collections::{BTreeSet, HashMap, VecDeque};

use log::{debug, info};

use crate::blocking::{BlockType, ReadyKey};
use crate::client::{Client, ClientId};
use crate::commands;
use crate::commands::reply::Reply;
use crate::core::clock::CommandClock;
use crate::core::config::Config;
use crate::db::{reclaim_effort, ActiveExpireCursor, Db, LazyFree, LookupFlags};
use crate::memory::alloc;
use crate::notify::{self, ModuleEventBus};
use crate::pubsub::PubSubHub;
use crate::value::Obj;

pub struct Engine {
    pub config: Config,
    pub clock: CommandClock,
    pub(crate) dbs: Vec<Db>,
    pub(crate) clients: HashMap<ClientId, Client>,
    next_client_id: ClientId,

    /// Writes since the last snapshot; the persistence collaborator
    /// polls this.
    pub dirty: u64,

    // Blocking machinery.
    pub(crate) ready_list: VecDeque<ReadyKey>,
    pub(crate) blocked_count: [usize; BlockType::COUNT],
    pub(crate) unblocked_queue: VecDeque<ClientId>,
    pub(crate) postponed: VecDeque<ClientId>,
    pub(crate) timeout_table: BTreeSet<(i64, ClientId)>,
    pub(crate) call_depth: u32,
    pub(crate) shutdown_pending: bool,

    // Collaborators.
    pub(crate) pubsub: PubSubHub,
    pub module_bus: ModuleEventBus,
    lazyfree: LazyFree,
    expire_cursors: Vec<ActiveExpireCursor>,

    // Replication figures (owned by the replication collaborator, read
    // by WAIT and the memory report).
    pub(crate) repl_acked_replicas: usize,
    pub replica_count: usize,
    pub repl_backlog_size: usize,
    pub repl_buffer_mem: usize,

    // Script/AOF cache figures for the memory report.
    pub aof_buffer_bytes: usize,
    pub script_cache_bytes: usize,
    pub script_cache_count: usize,
    pub functions_cache_bytes: usize,

    pub(crate) startup_memory: usize,
}

impl Engine {
    pub fn new(config: Config) -> Self {
        let dbs = (0..config.databases.max(1)).map(Db::new).collect::<Vec<_>>();
        let expire_cursors = dbs.iter().map(|_| ActiveExpireCursor::new()).collect();
        info!("engine starting with {} databases", dbs.len());
        Self {
            config,
            clock: CommandClock::new(),
            dbs,
            clients: HashMap::new(),
            next_client_id: 1,
            dirty: 0,
            ready_list: VecDeque::new(),
            blocked_count: [0; BlockType::COUNT],
            unblocked_queue: VecDeque::new(),
            postponed: VecDeque::new(),
            timeout_table: BTreeSet::new(),
            call_depth: 0,
            shutdown_pending: false,
            pubsub: PubSubHub::new(),
            module_bus: ModuleEventBus::default(),
            lazyfree: LazyFree::spawn(),
            expire_cursors,
            repl_acked_replicas: 0,
            replica_count: 0,
            repl_backlog_size: 0,
            repl_buffer_mem: 0,
            aof_buffer_bytes: 0,
            script_cache_bytes: 0,
            script_cache_count: 0,
            functions_cache_bytes: 0,
            startup_memory: alloc::used_memory(),
        }
    }

    // ---- clients ----

    pub fn create_client(&mut self, db: usize) -> ClientId {
        let id = self.next_client_id;
        self.next_client_id += 1;
        self.clients.insert(id, Client::new(id, db));
        id
    }

    /// Disconnect: a blocked client is released synchronously first.
    pub fn remove_client(&mut self, client_id: ClientId) {
        if self
            .clients
            .get(&client_id)
            .map_or(false, Client::is_blocked)
        {
            self.unblock_client(client_id);
        }
        self.unblocked_queue.retain(|&id| id != client_id);
        self.pubsub.drop_client(client_id);
        self.clients.remove(&client_id);
    }

    pub fn client(&self, client_id: ClientId) -> Option<&Client> {
        self.clients.get(&client_id)
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    pub(crate) fn push_reply(&mut self, client_id: ClientId, reply: Reply) {
        if let Some(client) = self.clients.get_mut(&client_id) {
            client.push_reply(reply);
        }
    }

    /// Drain a client's buffered replies.
    pub fn take_replies(&mut self, client_id: ClientId) -> Vec<Reply> {
        self.clients
            .get_mut(&client_id)
            .map(Client::take_replies)
            .unwrap_or_default()
    }

    // ---- command execution ----

    /// Run one top-level command, then the post-command machinery:
    /// drain ready keys, reprocess unblocked clients. Returns the
    /// issuing client's replies (empty if it blocked).
    pub fn execute(&mut self, client_id: ClientId, argv: &[Vec<u8>]) -> Vec<Reply> {
        self.clock.refresh();
        self.call(client_id, argv);
        if self.call_depth == 0 {
            self.after_command();
        }
        self.take_replies(client_id)
    }

    /// Post-command machinery. A replayed command may signal fresh
    /// readiness, so the two queues drain to quiescence together.
    fn after_command(&mut self) {
        loop {
            self.handle_ready_keys();
            self.process_unblocked_clients();
            if self.ready_list.is_empty() && self.unblocked_queue.is_empty() {
                break;
            }
        }
    }

    /// Command dispatch at any call depth (replays of parked commands
    /// come through here without re-entering the drain).
    pub(crate) fn call(&mut self, client_id: ClientId, argv: &[Vec<u8>]) {
        self.call_depth += 1;
        commands::dispatch(self, client_id, argv);
        self.call_depth -= 1;
    }

    /// Periodic duties: waiter timeouts and the active expire cycle.
    /// `now_ms` is injected so tests can step virtual time.
    pub fn tick(&mut self, now_ms: i64) {
        self.clock.set_now_ms(now_ms);
        self.process_timeouts(now_ms);
        for db_index in 0..self.dbs.len() {
            let report = self.expire_cursors[db_index].run(
                &mut self.dbs[db_index],
                now_ms,
                self.config.active_expire_samples,
            );
            for (key, value) in report.expired {
                self.propagate_expired(db_index, &key, value);
            }
        }
        self.after_command();
    }

    // ---- keyspace wrappers ----

    /// Read lookup with full effects: lazy expiry propagation, hit/miss
    /// stats, and the key-miss notification.
    pub fn lookup_read(&mut self, db_index: usize, key: &[u8]) -> Option<Obj> {
        self.lookup_with_flags(db_index, key, LookupFlags::read())
    }

    /// Write-intent lookup: expires lazily, touches LRU, but stays out
    /// of the hit/miss counters and never notifies a miss.
    pub fn lookup_write(&mut self, db_index: usize, key: &[u8]) -> Option<Obj> {
        self.lookup_with_flags(
            db_index,
            key,
            LookupFlags {
                nonotify: true,
                nostats: true,
                ..LookupFlags::default()
            },
        )
    }

    /// Lookup used by the ready-key servers.
    pub(crate) fn lookup_serving(&mut self, db_index: usize, key: &[u8]) -> Option<Obj> {
        self.lookup_with_flags(db_index, key, LookupFlags::serving())
    }

    pub fn lookup_with_flags(
        &mut self,
        db_index: usize,
        key: &[u8],
        flags: LookupFlags,
    ) -> Option<Obj> {
        let now_ms = self.clock.now_ms();
        let outcome = self.dbs[db_index].lookup(key, now_ms, flags, &self.config);
        if let Some(expired) = outcome.expired_value {
            self.propagate_expired(db_index, key, expired);
        }
        if outcome.value.is_none() && outcome.missed {
            self.notify_keyspace_event(notify::KEY_MISS, "keymiss", key, db_index);
        }
        outcome.value
    }

    fn propagate_expired(&mut self, db_index: usize, key: &[u8], value: Obj) {
        debug!("key expired: {:?}", String::from_utf8_lossy(key));
        self.dbs[db_index].signal_modified(key);
        self.signal_key_ready(db_index, key, value.object_type());
        self.notify_keyspace_event(notify::EXPIRED, "expired", key, db_index);
        self.dirty += 1;
        if self.config.lazyfree_lazy_expire {
            self.reclaim(value);
        }
    }

    /// Tear a detached value down: inline when cheap or still aliased,
    /// off-thread when the element count crosses the lazy-free bar.
    pub(crate) fn reclaim(&mut self, value: Obj) {
        if std::sync::Arc::strong_count(&value) > 1 {
            return;
        }
        if reclaim_effort(&value) > self.config.lazyfree_threshold {
            self.lazyfree.free(value);
        }
    }

    /// Insert-or-replace with the standard write effects. New keys emit
    /// the `new` event and may satisfy waiters of the value's type.
    pub fn set_key(&mut self, db_index: usize, key: &[u8], value: Obj, keepttl: bool) {
        let vtype = value.object_type();
        // Pool members keep their pooled LRU field untouched.
        if !crate::value::is_shared(&value) {
            value.reset_lru(self.config.maxmemory_policy, self.clock.now_ms());
        }
        if self.dbs[db_index].contains(key) {
            if let Some(old) = self.dbs[db_index].overwrite(key, value, keepttl) {
                self.reclaim(old);
            }
        } else {
            self.dbs[db_index].add(key, value);
            self.notify_keyspace_event(notify::NEW, "new", key, db_index);
            self.signal_key_ready(db_index, key, vtype);
        }
        self.dbs[db_index].signal_modified(key);
    }

    /// Synchronous delete: teardown happens on this thread.
    pub fn delete_sync(&mut self, db_index: usize, key: &[u8]) -> bool {
        match self.dbs[db_index].remove(key) {
            Some(old) => {
                self.dbs[db_index].signal_modified(key);
                // Deletion is itself a readiness event: group readers
                // blocked on a deleted stream must learn it is gone.
                self.signal_key_ready(db_index, key, old.object_type());
                drop(old);
                true
            }
            None => false,
        }
    }

    /// Asynchronous delete: the mapping is gone immediately, large
    /// values are torn down by the reclaimer.
    pub fn delete_async(&mut self, db_index: usize, key: &[u8]) -> bool {
        match self.dbs[db_index].remove(key) {
            Some(old) => {
                self.dbs[db_index].signal_modified(key);
                self.signal_key_ready(db_index, key, old.object_type());
                self.reclaim(old);
                true
            }
            None => false,
        }
    }

    pub fn db(&self, db_index: usize) -> &Db {
        &self.dbs[db_index]
    }

    pub fn db_mut(&mut self, db_index: usize) -> &mut Db {
        &mut self.dbs[db_index]
    }

    pub fn db_count(&self) -> usize {
        self.dbs.len()
    }

    pub fn blocked_clients(&self) -> usize {
        self.blocked_count.iter().sum()
    }

    /// Replicas known to have acknowledged the current offset.
    pub fn acked_replicas(&self) -> usize {
        self.repl_acked_replicas
    }

    /// Refuse new blocking once shutdown is pending.
    pub fn begin_shutdown(&mut self) {
        self.shutdown_pending = true;
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown_pending
    }
}
