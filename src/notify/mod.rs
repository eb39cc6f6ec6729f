//! Keyspace notifications.
//!
//! Events carry a class, a name, the key, and the database index. The
//! configured class mask filters what gets published; the module event
//! bus is served first and ignores that filter entirely. Channel names
//! are synthesized as `__keyspace@<db>__:<key>` (payload: event name)
//! and `__keyevent@<db>__:<event>` (payload: key).

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::engine::Engine;

/// Bit set of notification classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NotifyClass(u16);

pub const GENERIC: NotifyClass = NotifyClass(1 << 0); // g
pub const STRING: NotifyClass = NotifyClass(1 << 1); // $
pub const LIST: NotifyClass = NotifyClass(1 << 2); // l
pub const SET: NotifyClass = NotifyClass(1 << 3); // s
pub const HASH: NotifyClass = NotifyClass(1 << 4); // h
pub const ZSET: NotifyClass = NotifyClass(1 << 5); // z
pub const EXPIRED: NotifyClass = NotifyClass(1 << 6); // x
pub const EVICTED: NotifyClass = NotifyClass(1 << 7); // e
pub const STREAM: NotifyClass = NotifyClass(1 << 8); // t
pub const KEY_MISS: NotifyClass = NotifyClass(1 << 9); // m
pub const MODULE: NotifyClass = NotifyClass(1 << 10); // d
pub const NEW: NotifyClass = NotifyClass(1 << 11); // n
pub const KEYSPACE: NotifyClass = NotifyClass(1 << 12); // K
pub const KEYEVENT: NotifyClass = NotifyClass(1 << 13); // E

/// What `A` expands to: every data-type class. The channel-form bits
/// (K/E) and the key-miss class are deliberately outside it.
pub const ALL: NotifyClass = NotifyClass(
    GENERIC.0
        | STRING.0
        | LIST.0
        | SET.0
        | HASH.0
        | ZSET.0
        | EXPIRED.0
        | EVICTED.0
        | STREAM.0
        | MODULE.0
        | NEW.0,
);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MaskParseError {
    #[error("unknown notification class character '{0}'")]
    UnknownClass(char),
}

impl NotifyClass {
    pub fn empty() -> Self {
        NotifyClass(0)
    }

    pub fn contains(self, other: NotifyClass) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn intersects(self, other: NotifyClass) -> bool {
        self.0 & other.0 != 0
    }

    pub fn union(self, other: NotifyClass) -> NotifyClass {
        NotifyClass(self.0 | other.0)
    }

    /// Parse a class-mask string. Characters may repeat and appear in
    /// any order; any byte outside the alphabet is an error.
    pub fn parse(text: &str) -> Result<NotifyClass, MaskParseError> {
        let mut mask = NotifyClass::empty();
        for c in text.chars() {
            let class = match c {
                'A' => ALL,
                'g' => GENERIC,
                '$' => STRING,
                'l' => LIST,
                's' => SET,
                'h' => HASH,
                'z' => ZSET,
                'x' => EXPIRED,
                'e' => EVICTED,
                't' => STREAM,
                'm' => KEY_MISS,
                'd' => MODULE,
                'n' => NEW,
                'K' => KEYSPACE,
                'E' => KEYEVENT,
                other => return Err(MaskParseError::UnknownClass(other)),
            };
            mask = mask.union(class);
        }
        Ok(mask)
    }
}

impl fmt::Display for NotifyClass {
    /// Inverse of [`NotifyClass::parse`]: collapses the full data-class
    /// union back to `A`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.contains(ALL) {
            write!(f, "A")?;
        } else {
            let classes: [(NotifyClass, char); 11] = [
                (GENERIC, 'g'),
                (STRING, '$'),
                (LIST, 'l'),
                (SET, 's'),
                (HASH, 'h'),
                (ZSET, 'z'),
                (EXPIRED, 'x'),
                (EVICTED, 'e'),
                (STREAM, 't'),
                (MODULE, 'd'),
                (NEW, 'n'),
            ];
            for (class, ch) in classes {
                if self.contains(class) {
                    write!(f, "{ch}")?;
                }
            }
        }
        if self.contains(KEYSPACE) {
            write!(f, "K")?;
        }
        if self.contains(KEYEVENT) {
            write!(f, "E")?;
        }
        if self.contains(KEY_MISS) {
            write!(f, "m")?;
        }
        Ok(())
    }
}

/// An event as the module bus records it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleEvent {
    pub class: NotifyClass,
    pub event: String,
    pub key: Vec<u8>,
    pub db_index: usize,
}

/// Minimal stand-in for the module notification engine: subscriptions
/// by class mask (optionally narrowed to one event name) and a log of
/// deliveries. Delivery ignores the published-channel mask entirely.
#[derive(Debug, Default)]
pub struct ModuleEventBus {
    subscriptions: Vec<(NotifyClass, Option<String>)>,
    delivered: Vec<ModuleEvent>,
}

impl ModuleEventBus {
    pub fn subscribe(&mut self, mask: NotifyClass, event: Option<String>) {
        self.subscriptions.push((mask, event));
    }

    pub fn deliver(&mut self, class: NotifyClass, event: &str, key: &[u8], db_index: usize) {
        let interested = self.subscriptions.iter().any(|(mask, name)| {
            mask.intersects(class) && name.as_deref().map_or(true, |n| n == event)
        });
        if interested {
            self.delivered.push(ModuleEvent {
                class,
                event: event.to_string(),
                key: key.to_vec(),
                db_index,
            });
        }
    }

    pub fn take_delivered(&mut self) -> Vec<ModuleEvent> {
        std::mem::take(&mut self.delivered)
    }
}

/// `__keyspace@<db>__:<key>` channel bytes.
pub fn keyspace_channel(db_index: usize, key: &[u8]) -> Vec<u8> {
    let mut channel = format!("__keyspace@{db_index}__:").into_bytes();
    channel.extend_from_slice(key);
    channel
}

/// `__keyevent@<db>__:<event>` channel bytes.
pub fn keyevent_channel(db_index: usize, event: &str) -> Vec<u8> {
    format!("__keyevent@{db_index}__:{event}").into_bytes()
}

impl Engine {
    /// Emit one keyspace event. Modules first (unconditionally), then
    /// the mask filter, then the two channel forms. Publishing is
    /// best-effort fan-out; it never fails the calling command.
    pub fn notify_keyspace_event(
        &mut self,
        class: NotifyClass,
        event: &str,
        key: &[u8],
        db_index: usize,
    ) {
        self.module_bus.deliver(class, event, key, db_index);

        let mask = self.config.notify_keyspace_events;
        if !mask.intersects(class) {
            return;
        }
        if mask.contains(KEYSPACE) {
            let channel = keyspace_channel(db_index, key);
            self.publish(&channel, event.as_bytes());
        }
        if mask.contains(KEYEVENT) {
            let channel = keyevent_channel(db_index, event);
            self.publish(&channel, key);
        }
    }
}
