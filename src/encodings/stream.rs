//! Stream encoding: a radix tree of listpack nodes keyed by 128-bit ids,
//! plus consumer-group bookkeeping.
//!
//! Each tree node is keyed by the big-endian bytes of its first entry id
//! and packs up to `stream-node-max-entries` entries. An entry occupies
//! `3 + 2 * numfields` listpack slots: id milliseconds, id sequence,
//! field count, then the field/value pairs.

use std::collections::HashMap;
use std::fmt;

use thiserror::Error;

use super::listpack::{ListPack, LpEntry};
use super::rax::Rax;

/// 128-bit stream entry id: milliseconds plus a sequence tiebreaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct StreamId {
    pub ms: u64,
    pub seq: u64,
}

impl StreamId {
    pub const MIN: StreamId = StreamId { ms: 0, seq: 0 };
    pub const MAX: StreamId = StreamId {
        ms: u64::MAX,
        seq: u64::MAX,
    };

    pub fn new(ms: u64, seq: u64) -> Self {
        Self { ms, seq }
    }

    /// Big-endian bytes; byte order equals id order, which is what lets
    /// the radix tree double as the id index.
    pub fn to_bytes(self) -> [u8; 16] {
        let mut out = [0u8; 16];
        out[..8].copy_from_slice(&self.ms.to_be_bytes());
        out[8..].copy_from_slice(&self.seq.to_be_bytes());
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != 16 {
            return None;
        }
        Some(Self {
            ms: u64::from_be_bytes(bytes[..8].try_into().unwrap()),
            seq: u64::from_be_bytes(bytes[8..].try_into().unwrap()),
        })
    }

    /// The smallest id strictly greater than this one.
    pub fn next(self) -> StreamId {
        if self.seq == u64::MAX {
            StreamId::new(self.ms + 1, 0)
        } else {
            StreamId::new(self.ms, self.seq + 1)
        }
    }

    /// Parse "ms-seq" or bare "ms" (sequence defaulting as given).
    pub fn parse(text: &[u8], default_seq: u64) -> Option<Self> {
        let s = std::str::from_utf8(text).ok()?;
        match s.split_once('-') {
            Some((ms, seq)) => Some(Self {
                ms: ms.parse().ok()?,
                seq: seq.parse().ok()?,
            }),
            None => Some(Self {
                ms: s.parse().ok()?,
                seq: default_seq,
            }),
        }
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.ms, self.seq)
    }
}

/// One materialized stream entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEntry {
    pub id: StreamId,
    pub fields: Vec<(Vec<u8>, Vec<u8>)>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StreamError {
    #[error("The ID specified in XADD is equal or smaller than the target stream top item")]
    IdTooSmall,
    #[error("The ID specified in XADD must be greater than 0-0")]
    IdZero,
}

/// A pending (delivered, not yet acknowledged) entry.
#[derive(Debug, Clone)]
pub struct Nack {
    pub delivery_time_ms: i64,
    pub delivery_count: u64,
    pub consumer: Vec<u8>,
}

#[derive(Debug, Clone, Default)]
pub struct Consumer {
    pub name: Vec<u8>,
    /// Ids pending for this consumer; the NACK body lives in the group
    /// table so it is never duplicated.
    pub pel: Rax<()>,
    pub seen_time_ms: i64,
}

#[derive(Debug, Clone)]
pub struct ConsumerGroup {
    pub last_delivered: StreamId,
    pub pel: Rax<Nack>,
    pub consumers: HashMap<Vec<u8>, Consumer>,
}

impl ConsumerGroup {
    pub fn new(last_delivered: StreamId) -> Self {
        Self {
            last_delivered,
            pel: Rax::new(),
            consumers: HashMap::new(),
        }
    }

    pub fn consumer_mut(&mut self, name: &[u8], now_ms: i64) -> &mut Consumer {
        let consumer = self
            .consumers
            .entry(name.to_vec())
            .or_insert_with(|| Consumer {
                name: name.to_vec(),
                ..Consumer::default()
            });
        consumer.seen_time_ms = now_ms;
        consumer
    }
}

#[derive(Debug, Clone)]
pub struct Stream {
    nodes: Rax<ListPack>,
    length: u64,
    pub last_id: StreamId,
    pub max_deleted_id: StreamId,
    pub entries_added: u64,
    pub groups: HashMap<Vec<u8>, ConsumerGroup>,
    node_max_entries: usize,
}

impl Stream {
    pub fn new(node_max_entries: usize) -> Self {
        Self {
            nodes: Rax::new(),
            length: 0,
            last_id: StreamId::MIN,
            max_deleted_id: StreamId::MIN,
            entries_added: 0,
            groups: HashMap::new(),
            node_max_entries: node_max_entries.max(1),
        }
    }

    pub fn len(&self) -> u64 {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    fn node_entry_count(node: &ListPack) -> usize {
        let mut count = 0;
        let mut iter = node.iter();
        // Entry header: ms, seq, field count.
        while iter.next().is_some() {
            iter.next();
            let nfields = iter.next().and_then(|e| e.as_i64()).unwrap_or(0);
            for _ in 0..2 * nfields {
                iter.next();
            }
            count += 1;
        }
        count
    }

    fn decode_node(node: &ListPack) -> Vec<StreamEntry> {
        let mut out = Vec::new();
        let mut iter = node.iter();
        while let Some(ms) = iter.next() {
            let ms = ms.as_i64().unwrap() as u64;
            let seq = iter.next().unwrap().as_i64().unwrap() as u64;
            let nfields = iter.next().unwrap().as_i64().unwrap() as usize;
            let mut fields = Vec::with_capacity(nfields);
            for _ in 0..nfields {
                let f = iter.next().unwrap().to_vec();
                let v = iter.next().unwrap().to_vec();
                fields.push((f, v));
            }
            out.push(StreamEntry {
                id: StreamId::new(ms, seq),
                fields,
            });
        }
        out
    }

    /// Append an entry with an explicit id. Fails unless the id is
    /// strictly greater than every id ever used.
    pub fn append(
        &mut self,
        id: StreamId,
        fields: &[(Vec<u8>, Vec<u8>)],
    ) -> Result<(), StreamError> {
        if id == StreamId::MIN {
            return Err(StreamError::IdZero);
        }
        if id <= self.last_id {
            return Err(StreamError::IdTooSmall);
        }
        let start_new_node = match self.nodes.last() {
            None => true,
            Some((_, node)) => Self::node_entry_count(node) >= self.node_max_entries,
        };
        if start_new_node {
            self.nodes.insert(&id.to_bytes(), ListPack::new());
        }
        let (key, _) = self.nodes.last().unwrap();
        let node = self.nodes.get_mut(&key).unwrap();
        node.push(LpEntry::Int(id.ms as i64));
        node.push(LpEntry::Int(id.seq as i64));
        node.push(LpEntry::Int(fields.len() as i64));
        for (f, v) in fields {
            node.push(LpEntry::Str(f.clone()));
            node.push(LpEntry::Str(v.clone()));
        }
        self.last_id = id;
        self.length += 1;
        self.entries_added += 1;
        Ok(())
    }

    /// The id an auto-generated ("*") entry would get at `now_ms`.
    pub fn next_auto_id(&self, now_ms: i64) -> StreamId {
        let ms = now_ms.max(0) as u64;
        if ms > self.last_id.ms {
            StreamId::new(ms, 0)
        } else {
            self.last_id.next()
        }
    }

    /// Entries with `start <= id <= end`, oldest first, at most `count`
    /// (0 means unlimited).
    pub fn range(&self, start: StreamId, end: StreamId, count: usize) -> Vec<StreamEntry> {
        let mut out = Vec::new();
        for (_, node) in self.nodes.iter() {
            // Node keys are first-entry ids, so a node whose key is past
            // `end` cannot contribute; earlier nodes may still hold ids
            // >= start and are filtered entry-by-entry.
            for entry in Self::decode_node(node) {
                if entry.id > end {
                    return out;
                }
                if entry.id >= start {
                    out.push(entry);
                    if count != 0 && out.len() == count {
                        return out;
                    }
                }
            }
        }
        out
    }

    /// Overhead view for the memory estimator.
    pub fn rax(&self) -> &Rax<ListPack> {
        &self.nodes
    }

    /// Reassemble a stream from dumped parts. The typed-dump loader is
    /// the only caller; counts are trusted as written.
    #[allow(clippy::too_many_arguments)]
    pub fn from_parts(
        nodes: Rax<ListPack>,
        length: u64,
        last_id: StreamId,
        max_deleted_id: StreamId,
        entries_added: u64,
        groups: HashMap<Vec<u8>, ConsumerGroup>,
        node_max_entries: usize,
    ) -> Self {
        Self {
            nodes,
            length,
            last_id,
            max_deleted_id,
            entries_added,
            groups,
            node_max_entries: node_max_entries.max(1),
        }
    }

    pub fn create_group(&mut self, name: &[u8], start: StreamId) -> bool {
        if self.groups.contains_key(name) {
            return false;
        }
        self.groups
            .insert(name.to_vec(), ConsumerGroup::new(start));
        true
    }

    pub fn group_mut(&mut self, name: &[u8]) -> Option<&mut ConsumerGroup> {
        self.groups.get_mut(name)
    }

    /// Deliver new entries (> the group's `last_delivered`) to a
    /// consumer, advancing the group cursor and recording pending
    /// entries unless `noack`.
    pub fn read_group(
        &mut self,
        group_name: &[u8],
        consumer_name: &[u8],
        count: usize,
        noack: bool,
        now_ms: i64,
    ) -> Option<Vec<StreamEntry>> {
        let last_delivered = self.groups.get(group_name)?.last_delivered;
        let entries = self.range(last_delivered.next(), StreamId::MAX, count);
        let group = self.groups.get_mut(group_name)?;
        if let Some(last) = entries.last() {
            group.last_delivered = last.id;
        }
        if !noack {
            for entry in &entries {
                let key = entry.id.to_bytes();
                group.pel.insert(
                    &key,
                    Nack {
                        delivery_time_ms: now_ms,
                        delivery_count: 1,
                        consumer: consumer_name.to_vec(),
                    },
                );
                group
                    .consumer_mut(consumer_name, now_ms)
                    .pel
                    .insert(&key, ());
            }
        } else {
            group.consumer_mut(consumer_name, now_ms);
        }
        Some(entries)
    }
}
