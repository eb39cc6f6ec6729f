//! Active expiration.
//!
//! Lazy expiry only reclaims keys somebody touches; the active cycle
//! walks a sample of the expire table each tick and deletes what is
//! already dead. The cycle repeats while the observed expired fraction
//! stays high, so effort adapts to how stale the table actually is.

use log::debug;

use super::keyspace::Db;
use crate::value::Obj;

/// Keep sampling while more than a quarter of each batch was dead.
const REPEAT_FRACTION: f64 = 0.25;

/// Safety bound on repeats within one quantum.
const MAX_ROUNDS: usize = 16;

/// Outcome of one quantum against one database.
#[derive(Debug, Default)]
pub struct ExpireCycleReport {
    /// Evicted keys with their values; the engine notifies and reclaims.
    pub expired: Vec<(Vec<u8>, Obj)>,
    pub sampled: usize,
}

/// Rotating sampling state, one per database.
#[derive(Debug, Default)]
pub struct ActiveExpireCursor {
    offset: usize,
}

impl ActiveExpireCursor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run one quantum: sample, delete the dead, repeat while the dead
    /// fraction stays above [`REPEAT_FRACTION`].
    pub fn run(&mut self, db: &mut Db, now_ms: i64, samples_per_round: usize) -> ExpireCycleReport {
        let mut report = ExpireCycleReport::default();
        for _ in 0..MAX_ROUNDS {
            let batch = db.sample_expires(self.offset, samples_per_round);
            if batch.is_empty() {
                break;
            }
            self.offset = self.offset.wrapping_add(batch.len());
            report.sampled += batch.len();

            let mut dead_in_round = 0usize;
            let batch_len = batch.len();
            for (key, deadline) in batch {
                if now_ms >= deadline {
                    if let Some(value) = db.remove(&key) {
                        report.expired.push((key, value));
                        dead_in_round += 1;
                    }
                }
            }
            if (dead_in_round as f64) <= batch_len as f64 * REPEAT_FRACTION {
                break;
            }
        }
        if !report.expired.is_empty() {
            debug!(
                "active expire: db {} reclaimed {} of {} sampled",
                db.id,
                report.expired.len(),
                report.sampled
            );
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Object;
    use std::sync::Arc;

    fn seed(db: &mut Db, n: usize, deadline: i64) {
        for i in 0..n {
            let key = format!("k{i}").into_bytes();
            db.add(&key, Arc::new(Object::create_string(b"v")));
            db.set_expire(&key, deadline);
        }
    }

    #[test]
    fn test_cycle_reclaims_dead_keys() {
        let mut db = Db::new(0);
        seed(&mut db, 50, 100);
        let mut cursor = ActiveExpireCursor::new();
        let report = cursor.run(&mut db, 200, 20);
        assert_eq!(report.expired.len(), 50);
        assert_eq!(db.key_count(), 0);
        assert!(db.check_expires_subset_of_dict());
    }

    #[test]
    fn test_cycle_leaves_live_keys() {
        let mut db = Db::new(0);
        seed(&mut db, 10, 1000);
        let mut cursor = ActiveExpireCursor::new();
        let report = cursor.run(&mut db, 500, 20);
        assert!(report.expired.is_empty());
        assert_eq!(db.key_count(), 10);
    }

    #[test]
    fn test_cycle_stops_when_mostly_alive() {
        let mut db = Db::new(0);
        seed(&mut db, 100, 1000);
        // One dead key among many live ones: a single round must do.
        db.add(b"dead", Arc::new(Object::create_string(b"v")));
        db.set_expire(b"dead", 1);
        let mut cursor = ActiveExpireCursor::new();
        let report = cursor.run(&mut db, 500, 20);
        assert_eq!(report.sampled, 20);
    }
}
