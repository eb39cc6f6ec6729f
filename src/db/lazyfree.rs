//! Background reclamation of large values.
//!
//! Deleting a million-element container under the executor thread stalls
//! every client; instead, ownership of the evicted value moves over a
//! channel to a reclaimer thread that drops it there. Small values are
//! cheaper to drop inline than to enqueue, so the engine consults
//! [`reclaim_effort`] first. The keyspace mapping is always detached
//! before the value is enqueued, so no other thread can observe it.

use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam::channel::{unbounded, Sender};
use log::{debug, warn};
use parking_lot::Mutex;

use crate::value::{Obj, ObjectBody};

/// Rough teardown cost of a value, in elements.
pub fn reclaim_effort(obj: &Obj) -> usize {
    match obj.body() {
        ObjectBody::Int(_) | ObjectBody::Embstr(_) | ObjectBody::Raw(_) => 1,
        ObjectBody::List(list) => list.len(),
        ObjectBody::IntSet(set) => set.len(),
        ObjectBody::SetHt(set) => set.len(),
        ObjectBody::HashPack(lp) => lp.len() / 2,
        ObjectBody::HashHt(map) => map.len(),
        ObjectBody::ZSetPack(lp) => lp.len() / 2,
        ObjectBody::ZSetSkip(zs) => zs.len(),
        ObjectBody::Stream(s) => s.len() as usize,
    }
}

#[derive(Debug, Default)]
struct ReclaimStats {
    freed_objects: u64,
}

/// Handle to the reclaimer thread.
pub struct LazyFree {
    tx: Option<Sender<Obj>>,
    worker: Option<JoinHandle<()>>,
    stats: Arc<Mutex<ReclaimStats>>,
}

impl LazyFree {
    pub fn spawn() -> Self {
        let (tx, rx) = unbounded::<Obj>();
        let stats = Arc::new(Mutex::new(ReclaimStats::default()));
        let worker_stats = Arc::clone(&stats);
        let worker = std::thread::Builder::new()
            .name("coral-lazyfree".into())
            .spawn(move || {
                debug!("lazyfree worker started");
                for obj in rx {
                    drop(obj);
                    worker_stats.lock().freed_objects += 1;
                }
                debug!("lazyfree worker exiting");
            })
            .expect("failed to spawn lazyfree worker");
        Self {
            tx: Some(tx),
            worker: Some(worker),
            stats,
        }
    }

    /// Transfer ownership of a detached value to the worker. Falls back
    /// to an inline drop if the worker is gone.
    pub fn free(&self, obj: Obj) {
        if let Some(tx) = &self.tx {
            if let Err(err) = tx.send(obj) {
                warn!("lazyfree worker unavailable, dropping inline");
                drop(err.into_inner());
            }
        } else {
            drop(obj);
        }
    }

    /// Objects the worker has finished dropping.
    pub fn freed_objects(&self) -> u64 {
        self.stats.lock().freed_objects
    }

    /// Block until everything queued so far is freed. Test helper.
    pub fn drain(&self) {
        if let Some(tx) = &self.tx {
            while !tx.is_empty() {
                std::thread::yield_now();
            }
        }
    }
}

impl Drop for LazyFree {
    fn drop(&mut self) {
        // Closing the channel lets the worker drain and exit.
        self.tx.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}
