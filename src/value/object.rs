//! The polymorphic value object.
//!
//! An [`Object`] is a closed sum over every legal (type, encoding)
//! pair; pairs outside the table are unrepresentable. Aliasing is
//! `Arc<Object>`: cloning the handle retains, dropping releases, and
//! the strong count is the refcount `OBJECT REFCOUNT` reports. Mutation
//! goes through [`make_owned`], which duplicates a shared body before
//! any in-place edit.
//!
//! The 24-bit `lru` field holds either the coarse LRU clock or, in LFU
//! mode, a 16-bit minute timestamp over an 8-bit logarithmic counter.

use std::borrow::Cow;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering as AtomicOrdering};
use std::sync::Arc;

use rand::Rng;

use crate::core::clock::{lru_clock, LRU_CLOCK_MAX, LRU_CLOCK_RESOLUTION_MS};
use crate::core::config::MaxmemoryPolicy;
use crate::encodings::{IntSet, ListPack, QuickList, Stream, ZSet};
use crate::value::strconv;

/// Strings up to this length use the embedded encoding.
pub const EMBSTR_SIZE_LIMIT: usize = 44;

/// Fresh LFU counters start here so new keys survive the first decay.
pub const LFU_INIT_VAL: u8 = 5;

/// A retained handle to a value.
pub type Obj = Arc<Object>;

/// Logical value types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    String,
    List,
    Set,
    Hash,
    SortedSet,
    Stream,
}

impl ValueType {
    /// The name TYPE replies with.
    pub fn name(self) -> &'static str {
        match self {
            ValueType::String => "string",
            ValueType::List => "list",
            ValueType::Set => "set",
            ValueType::Hash => "hash",
            ValueType::SortedSet => "zset",
            ValueType::Stream => "stream",
        }
    }
}

/// Physical encodings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Encoding {
    Int,
    Embstr,
    Raw,
    ListPack,
    QuickList,
    IntSet,
    HashTable,
    SkipList,
    Stream,
}

impl Encoding {
    /// The name OBJECT ENCODING replies with.
    pub fn name(self) -> &'static str {
        match self {
            Encoding::Int => "int",
            Encoding::Embstr => "embstr",
            Encoding::Raw => "raw",
            Encoding::ListPack => "listpack",
            Encoding::QuickList => "quicklist",
            Encoding::IntSet => "intset",
            Encoding::HashTable => "hashtable",
            Encoding::SkipList => "skiplist",
            Encoding::Stream => "stream",
        }
    }
}

/// Payload storage; the variant *is* the (type, encoding) pair.
#[derive(Debug, Clone)]
pub enum ObjectBody {
    /// String, INT encoding: the integer is the payload.
    Int(i64),
    /// String, EMBSTR encoding: short immutable bytes in one allocation.
    Embstr(Box<[u8]>),
    /// String, RAW encoding: resizable buffer with spare capacity.
    Raw(Vec<u8>),
    /// List, quicklist encoding (the only list encoding).
    List(QuickList),
    /// Set, intset encoding.
    IntSet(IntSet),
    /// Set, hashtable encoding.
    SetHt(HashSet<Vec<u8>>),
    /// Hash, listpack encoding: interleaved field/value pairs.
    HashPack(ListPack),
    /// Hash, hashtable encoding.
    HashHt(HashMap<Vec<u8>, Vec<u8>>),
    /// Sorted set, listpack encoding: interleaved member/score pairs.
    ZSetPack(ListPack),
    /// Sorted set, skiplist + dict hybrid.
    ZSetSkip(ZSet),
    /// Stream, rax-of-listpacks encoding.
    Stream(Stream),
}

#[derive(Debug)]
pub struct Object {
    lru: AtomicU32,
    body: ObjectBody,
}

impl Clone for Object {
    fn clone(&self) -> Self {
        Self {
            lru: AtomicU32::new(self.lru.load(AtomicOrdering::Relaxed)),
            body: self.body.clone(),
        }
    }
}

impl Object {
    pub fn new(body: ObjectBody) -> Self {
        Self {
            lru: AtomicU32::new(0),
            body,
        }
    }

    /// Constructor used at key-write time: stamps the LRU/LFU field the
    /// way the configured policy expects.
    pub fn with_policy(body: ObjectBody, policy: MaxmemoryPolicy, now_ms: i64) -> Self {
        let object = Self::new(body);
        object.reset_lru(policy, now_ms);
        object
    }

    pub fn body(&self) -> &ObjectBody {
        &self.body
    }

    pub fn body_mut(&mut self) -> &mut ObjectBody {
        &mut self.body
    }

    pub fn object_type(&self) -> ValueType {
        match &self.body {
            ObjectBody::Int(_) | ObjectBody::Embstr(_) | ObjectBody::Raw(_) => ValueType::String,
            ObjectBody::List(_) => ValueType::List,
            ObjectBody::IntSet(_) | ObjectBody::SetHt(_) => ValueType::Set,
            ObjectBody::HashPack(_) | ObjectBody::HashHt(_) => ValueType::Hash,
            ObjectBody::ZSetPack(_) | ObjectBody::ZSetSkip(_) => ValueType::SortedSet,
            ObjectBody::Stream(_) => ValueType::Stream,
        }
    }

    pub fn encoding(&self) -> Encoding {
        match &self.body {
            ObjectBody::Int(_) => Encoding::Int,
            ObjectBody::Embstr(_) => Encoding::Embstr,
            ObjectBody::Raw(_) => Encoding::Raw,
            ObjectBody::List(_) => Encoding::QuickList,
            ObjectBody::IntSet(_) => Encoding::IntSet,
            ObjectBody::SetHt(_) | ObjectBody::HashHt(_) => Encoding::HashTable,
            ObjectBody::HashPack(_) | ObjectBody::ZSetPack(_) => Encoding::ListPack,
            ObjectBody::ZSetSkip(_) => Encoding::SkipList,
            ObjectBody::Stream(_) => Encoding::Stream,
        }
    }

    // ---- string constructors ----

    /// String object at the natural encoding for its length: embstr up
    /// to [`EMBSTR_SIZE_LIMIT`], raw beyond.
    pub fn create_string(bytes: &[u8]) -> Self {
        if bytes.len() <= EMBSTR_SIZE_LIMIT {
            Self::new(ObjectBody::Embstr(bytes.to_vec().into_boxed_slice()))
        } else {
            Self::new(ObjectBody::Raw(bytes.to_vec()))
        }
    }

    pub fn create_string_from_i64(value: i64) -> Self {
        Self::new(ObjectBody::Int(value))
    }

    /// String object that takes the INT encoding when the bytes are a
    /// canonical integer; what the dump loader and argument interning
    /// use.
    pub fn create_string_try_int(bytes: &[u8]) -> Self {
        if bytes.len() <= 20 {
            if let Some(value) = strconv::parse_i64(bytes) {
                return Self::create_string_from_i64(value);
            }
        }
        Self::create_string(bytes)
    }

    pub fn create_string_from_f64(value: f64) -> Self {
        Self::create_string(&strconv::format_f64(value))
    }

    // ---- string views ----

    pub fn is_string(&self) -> bool {
        self.object_type() == ValueType::String
    }

    /// Byte-string view of a string object; INT renders as decimal.
    pub fn string_bytes(&self) -> Cow<'_, [u8]> {
        match &self.body {
            ObjectBody::Int(v) => Cow::Owned(strconv::format_i64(*v)),
            ObjectBody::Embstr(s) => Cow::Borrowed(s),
            ObjectBody::Raw(s) => Cow::Borrowed(s),
            _ => panic!("string_bytes on a non-string object"),
        }
    }

    /// String length, uniform across encodings.
    pub fn string_len(&self) -> usize {
        match &self.body {
            ObjectBody::Int(v) => strconv::format_i64(*v).len(),
            ObjectBody::Embstr(s) => s.len(),
            ObjectBody::Raw(s) => s.len(),
            _ => panic!("string_len on a non-string object"),
        }
    }

    /// Integer view, uniform across encodings.
    pub fn as_i64(&self) -> Option<i64> {
        match &self.body {
            ObjectBody::Int(v) => Some(*v),
            ObjectBody::Embstr(s) => strconv::parse_i64(s),
            ObjectBody::Raw(s) => strconv::parse_i64(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match &self.body {
            ObjectBody::Int(v) => Some(*v as f64),
            ObjectBody::Embstr(s) => strconv::parse_f64(s),
            ObjectBody::Raw(s) => strconv::parse_f64(s),
            _ => None,
        }
    }

    // ---- lru/lfu field ----

    pub fn lru_raw(&self) -> u32 {
        self.lru.load(AtomicOrdering::Relaxed)
    }

    pub fn set_lru_raw(&self, value: u32) {
        self.lru.store(value & LRU_CLOCK_MAX, AtomicOrdering::Relaxed);
    }

    fn lfu_minutes(now_ms: i64) -> u32 {
        ((now_ms / 60_000) & 0xFFFF) as u32
    }

    pub fn reset_lru(&self, policy: MaxmemoryPolicy, now_ms: i64) {
        if policy.uses_lfu() {
            self.set_lru_raw((Self::lfu_minutes(now_ms) << 8) | LFU_INIT_VAL as u32);
        } else {
            self.set_lru_raw(lru_clock(now_ms));
        }
    }

    /// Access-time update performed by keyspace lookups (unless the
    /// lookup carries NOTOUCH).
    pub fn touch(&self, policy: MaxmemoryPolicy, now_ms: i64, lfu_log_factor: u32, lfu_decay_time: u32) {
        if policy.uses_lfu() {
            let counter = self.lfu_decr(now_ms, lfu_decay_time);
            let counter = Self::lfu_log_incr(counter, lfu_log_factor);
            self.set_lru_raw((Self::lfu_minutes(now_ms) << 8) | counter as u32);
        } else {
            self.set_lru_raw(lru_clock(now_ms));
        }
    }

    /// Counter after time decay, without writing it back.
    fn lfu_decr(&self, now_ms: i64, lfu_decay_time: u32) -> u8 {
        let raw = self.lru_raw();
        let last_minutes = raw >> 8;
        let counter = (raw & 0xFF) as u8;
        let now_minutes = Self::lfu_minutes(now_ms);
        // 16-bit wrapping minutes clock.
        let elapsed = now_minutes.wrapping_sub(last_minutes) & 0xFFFF;
        let periods = if lfu_decay_time == 0 {
            0
        } else {
            (elapsed / lfu_decay_time) as u8
        };
        counter.saturating_sub(periods)
    }

    fn lfu_log_incr(counter: u8, lfu_log_factor: u32) -> u8 {
        if counter == 255 {
            return 255;
        }
        let r: f64 = rand::thread_rng().gen();
        let baseval = counter.saturating_sub(LFU_INIT_VAL) as f64;
        let p = 1.0 / (baseval * lfu_log_factor as f64 + 1.0);
        if r < p {
            counter + 1
        } else {
            counter
        }
    }

    /// Seconds since last access, LRU interpretation. The 24-bit clock
    /// wraps; an apparently-future timestamp unwraps once.
    pub fn idle_time_seconds(&self, now_ms: i64) -> u64 {
        let clock = lru_clock(now_ms);
        let lru = self.lru_raw();
        let ticks = if clock >= lru {
            clock - lru
        } else {
            clock + (LRU_CLOCK_MAX - lru)
        };
        ticks as u64 * LRU_CLOCK_RESOLUTION_MS / 1000
    }

    /// LFU access-frequency counter, decayed to now.
    pub fn freq(&self, now_ms: i64, lfu_decay_time: u32) -> u8 {
        self.lfu_decr(now_ms, lfu_decay_time)
    }

    /// Deep copy with a fresh handle; the LRU field carries over.
    pub fn dup(&self) -> Obj {
        Arc::new(self.clone())
    }
}

/// Binary-safe comparison of two string objects, integer encodings
/// rendered on the stack.
pub fn compare_strings(a: &Object, b: &Object) -> Ordering {
    a.string_bytes().cmp(&b.string_bytes())
}

/// Equality with a fast path when both sides are INT-encoded.
pub fn equal_strings(a: &Object, b: &Object) -> bool {
    if let (ObjectBody::Int(x), ObjectBody::Int(y)) = (a.body(), b.body()) {
        return x == y;
    }
    compare_strings(a, b) == Ordering::Equal
}

/// Unique-ownership promotion: clones the body if the handle is shared
/// (interned or aliased), then hands out the mutable reference.
pub fn make_owned(obj: &mut Obj) -> &mut Object {
    Arc::make_mut(obj)
}

/// Best-effort compaction of a string value. Only RAW/EMBSTR inputs
/// with a unique handle are candidates; anything else passes through.
///
/// A canonical integer becomes a shared pool handle when
/// `shared_allowed` (eviction policy permits interning) or a private
/// INT object otherwise. Short RAW strings migrate to EMBSTR. Long RAW
/// strings with >= 10% spare capacity are trimmed in place.
pub fn try_encode(mut obj: Obj, shared_allowed: bool) -> Obj {
    if !obj.is_string() || obj.encoding() == Encoding::Int {
        return obj;
    }
    // Shared handles may be aliased anywhere; leave them untouched.
    if Arc::strong_count(&obj) != 1 {
        return obj;
    }

    let len = obj.string_len();
    if len <= 20 {
        if let Some(value) = obj.as_i64() {
            if shared_allowed {
                if let Some(shared) = super::shared::shared_integer(value) {
                    return shared;
                }
            }
            let lru = obj.lru_raw();
            let replacement = Object::create_string_from_i64(value);
            replacement.set_lru_raw(lru);
            return Arc::new(replacement);
        }
    }

    if len <= EMBSTR_SIZE_LIMIT {
        if obj.encoding() == Encoding::Embstr {
            return obj;
        }
        let lru = obj.lru_raw();
        let replacement = Object::create_string(&obj.string_bytes());
        replacement.set_lru_raw(lru);
        return Arc::new(replacement);
    }

    // RAW with substantial spare capacity: give the allocator the tail
    // back.
    let object = Arc::get_mut(&mut obj).expect("unique handle checked above");
    if let ObjectBody::Raw(buf) = object.body_mut() {
        if buf.capacity() - buf.len() > buf.len() / 10 {
            buf.shrink_to_fit();
        }
    }
    obj
}

/// Materialize the byte-string view as an object (INT decodes to its
/// decimal ASCII form; RAW/EMBSTR hand back the same object).
pub fn decode(obj: &Obj) -> Obj {
    match obj.body() {
        ObjectBody::Int(v) => Arc::new(Object::create_string(&strconv::format_i64(*v))),
        ObjectBody::Embstr(_) | ObjectBody::Raw(_) => Arc::clone(obj),
        _ => panic!("decode on a non-string object"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embstr_raw_boundary() {
        let short = Object::create_string(&[b'x'; 44]);
        assert_eq!(short.encoding(), Encoding::Embstr);
        let long = Object::create_string(&[b'x'; 45]);
        assert_eq!(long.encoding(), Encoding::Raw);
    }

    #[test]
    fn test_string_views_uniform_across_encodings() {
        let int = Object::create_string_from_i64(-123);
        assert_eq!(int.string_bytes().as_ref(), b"-123");
        assert_eq!(int.string_len(), 4);
        assert_eq!(int.as_i64(), Some(-123));

        let emb = Object::create_string(b"-123");
        assert_eq!(emb.as_i64(), Some(-123));
        assert!(equal_strings(&int, &emb));
        assert_eq!(compare_strings(&int, &emb), Ordering::Equal);
    }

    #[test]
    fn test_try_encode_int_path() {
        let obj = Arc::new(Object::create_string(b"123456"));
        let encoded = try_encode(obj, false);
        assert_eq!(encoded.encoding(), Encoding::Int);
        assert_eq!(encoded.as_i64(), Some(123456));
    }

    #[test]
    fn test_try_encode_uses_shared_pool_when_allowed() {
        let obj = Arc::new(Object::create_string(b"77"));
        let encoded = try_encode(obj, true);
        assert!(super::super::shared::is_shared(&encoded));

        let private = try_encode(Arc::new(Object::create_string(b"77")), false);
        assert!(!super::super::shared::is_shared(&private));
        assert_eq!(private.encoding(), Encoding::Int);
    }

    #[test]
    fn test_try_encode_skips_aliased_objects() {
        let obj = Arc::new(Object::create_string(b"99"));
        let alias = Arc::clone(&obj);
        let encoded = try_encode(obj, true);
        assert_eq!(encoded.encoding(), Encoding::Embstr);
        drop(alias);
    }

    #[test]
    fn test_try_encode_non_canonical_integer_stays_string() {
        let encoded = try_encode(Arc::new(Object::create_string(b"007")), true);
        assert_eq!(encoded.encoding(), Encoding::Embstr);
    }

    #[test]
    fn test_decode_round_trip() {
        let int = Arc::new(Object::create_string_from_i64(42));
        let decoded = decode(&int);
        assert_eq!(decoded.encoding(), Encoding::Embstr);
        assert_eq!(decoded.string_bytes().as_ref(), b"42");

        let raw = Arc::new(Object::create_string(&[b'y'; 50]));
        let same = decode(&raw);
        assert!(Arc::ptr_eq(&raw, &same));
    }

    #[test]
    fn test_make_owned_duplicates_shared_body() {
        let mut obj = Arc::new(Object::create_string(b"abc"));
        let alias = Arc::clone(&obj);
        {
            let owned = make_owned(&mut obj);
            *owned.body_mut() = ObjectBody::Raw(b"abcdef".to_vec());
        }
        assert_eq!(obj.string_bytes().as_ref(), b"abcdef");
        assert_eq!(alias.string_bytes().as_ref(), b"abc");
    }

    #[test]
    fn test_release_to_net_zero_deallocates() {
        let obj = Arc::new(Object::create_string(b"observed"));
        let probe = Arc::downgrade(&obj);
        let retained = Arc::clone(&obj);
        let retained_again = Arc::clone(&retained);
        drop(obj);
        drop(retained);
        assert!(probe.upgrade().is_some());
        drop(retained_again);
        assert!(probe.upgrade().is_none());
    }

    #[test]
    fn test_lfu_field_layout() {
        let obj = Object::create_string(b"k");
        obj.reset_lru(MaxmemoryPolicy::AllKeysLfu, 10 * 60_000);
        assert_eq!(obj.lru_raw() & 0xFF, LFU_INIT_VAL as u32);
        assert_eq!(obj.lru_raw() >> 8, 10);
        assert_eq!(obj.freq(10 * 60_000, 1), LFU_INIT_VAL);
        // One minute of decay per lfu_decay_time minute.
        assert_eq!(obj.freq(13 * 60_000, 1), LFU_INIT_VAL - 3);
    }

    #[test]
    fn test_idle_time_tracks_lru_clock() {
        let obj = Object::create_string(b"k");
        obj.reset_lru(MaxmemoryPolicy::AllKeysLru, 1_000_000);
        assert_eq!(obj.idle_time_seconds(1_000_000), 0);
        assert_eq!(obj.idle_time_seconds(1_005_000), 5);
    }
}
