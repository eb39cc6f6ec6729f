//! The typed-dump contract.
//!
//! Every value exposes `(type code, serialize, deserialize)` against a
//! byte-oriented I/O abstraction with a running checksum. Type codes
//! are reserved integers shared with the on-disk format registry;
//! encoding-specific codes let a load reproduce the saved encoding
//! whenever the configured thresholds still allow it.

pub mod crc;

use std::collections::{HashMap, HashSet};
use std::io::{Read, Write};

use log::trace;
use thiserror::Error;

use crate::core::config::Config;
use crate::encodings::{
    ConsumerGroup, IntSet, ListPack, Nack, QuickList, Rax, Stream, StreamId, ZSet,
};
use crate::value::{strconv, Obj, Object, ObjectBody};

// Value type codes from the shared registry.
pub const TYPE_STRING: u8 = 0;
pub const TYPE_SET: u8 = 2;
pub const TYPE_HASH: u8 = 4;
pub const TYPE_ZSET_2: u8 = 5;
pub const TYPE_SET_INTSET: u8 = 11;
pub const TYPE_HASH_LISTPACK: u8 = 16;
pub const TYPE_ZSET_LISTPACK: u8 = 17;
pub const TYPE_LIST_QUICKLIST_2: u8 = 18;
pub const TYPE_STREAM_LISTPACKS_2: u8 = 19;

// Length-encoding forms.
const LEN_6BIT: u8 = 0;
const LEN_14BIT: u8 = 1;
const LEN_32BIT: u8 = 0x80;
const LEN_64BIT: u8 = 0x81;
const LEN_ENCVAL: u8 = 3;

// Integer-packed string encodings.
const ENC_INT8: u8 = 0;
const ENC_INT16: u8 = 1;
const ENC_INT32: u8 = 2;

#[derive(Debug, Error)]
pub enum RdbError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("unknown value type code {0}")]
    UnknownType(u8),
    #[error("corrupt payload: {0}")]
    Corrupt(&'static str),
}

pub type RdbResult<T> = Result<T, RdbError>;

/// Byte sink with a running CRC and a write counter.
pub struct RioWriter<W: Write> {
    inner: W,
    crc: u64,
    written: u64,
}

impl<W: Write> RioWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            crc: 0,
            written: 0,
        }
    }

    pub fn checksum(&self) -> u64 {
        self.crc
    }

    pub fn bytes_written(&self) -> u64 {
        self.written
    }

    pub fn into_inner(self) -> W {
        self.inner
    }

    fn write_all(&mut self, bytes: &[u8]) -> RdbResult<()> {
        self.inner.write_all(bytes)?;
        self.crc = crc::crc64(self.crc, bytes);
        self.written += bytes.len() as u64;
        Ok(())
    }

    fn write_u8(&mut self, value: u8) -> RdbResult<()> {
        self.write_all(&[value])
    }

    /// Variable-width length: 6-bit, 14-bit, 32-bit, or 64-bit form.
    pub fn write_len(&mut self, len: u64) -> RdbResult<()> {
        if len < 1 << 6 {
            self.write_u8((LEN_6BIT << 6) | len as u8)
        } else if len < 1 << 14 {
            self.write_u8((LEN_14BIT << 6) | (len >> 8) as u8)?;
            self.write_u8(len as u8)
        } else if len <= u32::MAX as u64 {
            self.write_u8(LEN_32BIT)?;
            self.write_all(&(len as u32).to_be_bytes())
        } else {
            self.write_u8(LEN_64BIT)?;
            self.write_all(&len.to_be_bytes())
        }
    }

    /// String payload, packing canonical integers into the int forms.
    pub fn write_string(&mut self, bytes: &[u8]) -> RdbResult<()> {
        if bytes.len() <= 11 {
            if let Some(value) = strconv::parse_i64(bytes) {
                if (i8::MIN as i64..=i8::MAX as i64).contains(&value) {
                    self.write_u8((LEN_ENCVAL << 6) | ENC_INT8)?;
                    return self.write_all(&(value as i8).to_le_bytes());
                }
                if (i16::MIN as i64..=i16::MAX as i64).contains(&value) {
                    self.write_u8((LEN_ENCVAL << 6) | ENC_INT16)?;
                    return self.write_all(&(value as i16).to_le_bytes());
                }
                if (i32::MIN as i64..=i32::MAX as i64).contains(&value) {
                    self.write_u8((LEN_ENCVAL << 6) | ENC_INT32)?;
                    return self.write_all(&(value as i32).to_le_bytes());
                }
            }
        }
        self.write_len(bytes.len() as u64)?;
        self.write_all(bytes)
    }

    fn write_f64(&mut self, value: f64) -> RdbResult<()> {
        self.write_all(&value.to_le_bytes())
    }
}

/// Byte source mirroring [`RioWriter`].
pub struct RioReader<R: Read> {
    inner: R,
    crc: u64,
    read: u64,
}

impl<R: Read> RioReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            crc: 0,
            read: 0,
        }
    }

    pub fn checksum(&self) -> u64 {
        self.crc
    }

    pub fn bytes_read(&self) -> u64 {
        self.read
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> RdbResult<()> {
        self.inner.read_exact(buf)?;
        self.crc = crc::crc64(self.crc, buf);
        self.read += buf.len() as u64;
        Ok(())
    }

    fn read_u8(&mut self) -> RdbResult<u8> {
        let mut buf = [0u8; 1];
        self.read_exact(&mut buf)?;
        Ok(buf[0])
    }

    pub fn read_len(&mut self) -> RdbResult<u64> {
        let first = self.read_u8()?;
        match first >> 6 {
            x if x == LEN_6BIT => Ok((first & 0x3F) as u64),
            x if x == LEN_14BIT => {
                let second = self.read_u8()?;
                Ok((((first & 0x3F) as u64) << 8) | second as u64)
            }
            _ if first == LEN_32BIT => {
                let mut buf = [0u8; 4];
                self.read_exact(&mut buf)?;
                Ok(u32::from_be_bytes(buf) as u64)
            }
            _ if first == LEN_64BIT => {
                let mut buf = [0u8; 8];
                self.read_exact(&mut buf)?;
                Ok(u64::from_be_bytes(buf))
            }
            _ => Err(RdbError::Corrupt("bad length byte")),
        }
    }

    pub fn read_string(&mut self) -> RdbResult<Vec<u8>> {
        let first = self.read_u8()?;
        if first >> 6 == LEN_ENCVAL {
            let value = match first & 0x3F {
                ENC_INT8 => {
                    let mut buf = [0u8; 1];
                    self.read_exact(&mut buf)?;
                    i8::from_le_bytes(buf) as i64
                }
                ENC_INT16 => {
                    let mut buf = [0u8; 2];
                    self.read_exact(&mut buf)?;
                    i16::from_le_bytes(buf) as i64
                }
                ENC_INT32 => {
                    let mut buf = [0u8; 4];
                    self.read_exact(&mut buf)?;
                    i32::from_le_bytes(buf) as i64
                }
                _ => return Err(RdbError::Corrupt("bad string encoding")),
            };
            return Ok(strconv::format_i64(value));
        }
        let len = match first >> 6 {
            x if x == LEN_6BIT => (first & 0x3F) as u64,
            x if x == LEN_14BIT => {
                let second = self.read_u8()?;
                (((first & 0x3F) as u64) << 8) | second as u64
            }
            _ if first == LEN_32BIT => {
                let mut buf = [0u8; 4];
                self.read_exact(&mut buf)?;
                u32::from_be_bytes(buf) as u64
            }
            _ if first == LEN_64BIT => {
                let mut buf = [0u8; 8];
                self.read_exact(&mut buf)?;
                u64::from_be_bytes(buf)
            }
            _ => return Err(RdbError::Corrupt("bad length byte")),
        };
        let mut buf = vec![0u8; len as usize];
        self.read_exact(&mut buf)?;
        Ok(buf)
    }

    fn read_f64(&mut self) -> RdbResult<f64> {
        let mut buf = [0u8; 8];
        self.read_exact(&mut buf)?;
        Ok(f64::from_le_bytes(buf))
    }
}

/// The type code `save_object` will emit for a value.
pub fn type_code(obj: &Obj) -> u8 {
    match obj.body() {
        ObjectBody::Int(_) | ObjectBody::Embstr(_) | ObjectBody::Raw(_) => TYPE_STRING,
        ObjectBody::List(_) => TYPE_LIST_QUICKLIST_2,
        ObjectBody::IntSet(_) => TYPE_SET_INTSET,
        ObjectBody::SetHt(_) => TYPE_SET,
        ObjectBody::HashPack(_) => TYPE_HASH_LISTPACK,
        ObjectBody::HashHt(_) => TYPE_HASH,
        ObjectBody::ZSetPack(_) => TYPE_ZSET_LISTPACK,
        ObjectBody::ZSetSkip(_) => TYPE_ZSET_2,
        ObjectBody::Stream(_) => TYPE_STREAM_LISTPACKS_2,
    }
}

fn save_stream<W: Write>(rio: &mut RioWriter<W>, stream: &Stream) -> RdbResult<()> {
    rio.write_len(stream.rax().len() as u64)?;
    for (key, node) in stream.rax().iter() {
        rio.write_string(&key)?;
        rio.write_string(node.as_bytes())?;
    }
    rio.write_len(stream.len())?;
    rio.write_len(stream.last_id.ms)?;
    rio.write_len(stream.last_id.seq)?;
    rio.write_len(stream.max_deleted_id.ms)?;
    rio.write_len(stream.max_deleted_id.seq)?;
    rio.write_len(stream.entries_added)?;

    rio.write_len(stream.groups.len() as u64)?;
    for (name, group) in &stream.groups {
        rio.write_string(name)?;
        rio.write_len(group.last_delivered.ms)?;
        rio.write_len(group.last_delivered.seq)?;
        rio.write_len(group.pel.len() as u64)?;
        for (id, nack) in group.pel.iter() {
            rio.write_string(&id)?;
            rio.write_len(nack.delivery_time_ms.max(0) as u64)?;
            rio.write_len(nack.delivery_count)?;
            rio.write_string(&nack.consumer)?;
        }
        rio.write_len(group.consumers.len() as u64)?;
        for (consumer_name, consumer) in &group.consumers {
            rio.write_string(consumer_name)?;
            rio.write_len(consumer.seen_time_ms.max(0) as u64)?;
            rio.write_len(consumer.pel.len() as u64)?;
            for (id, _) in consumer.pel.iter() {
                rio.write_string(&id)?;
            }
        }
    }
    Ok(())
}

fn load_stream<R: Read>(rio: &mut RioReader<R>, config: &Config) -> RdbResult<Stream> {
    let node_count = rio.read_len()?;
    let mut nodes = Rax::new();
    let mut length = 0u64;
    for _ in 0..node_count {
        let key = rio.read_string()?;
        let blob = rio.read_string()?;
        let node = ListPack::from_bytes(blob).ok_or(RdbError::Corrupt("bad stream node"))?;
        nodes.insert(&key, node);
    }
    let stored_length = rio.read_len()?;
    let last_id = StreamId::new(rio.read_len()?, rio.read_len()?);
    let max_deleted_id = StreamId::new(rio.read_len()?, rio.read_len()?);
    let entries_added = rio.read_len()?;
    length += stored_length;

    let group_count = rio.read_len()?;
    let mut groups = HashMap::new();
    for _ in 0..group_count {
        let name = rio.read_string()?;
        let last_delivered = StreamId::new(rio.read_len()?, rio.read_len()?);
        let mut group = ConsumerGroup::new(last_delivered);
        let pel_count = rio.read_len()?;
        for _ in 0..pel_count {
            let id = rio.read_string()?;
            let delivery_time_ms = rio.read_len()? as i64;
            let delivery_count = rio.read_len()?;
            let consumer = rio.read_string()?;
            group.pel.insert(
                &id,
                Nack {
                    delivery_time_ms,
                    delivery_count,
                    consumer,
                },
            );
        }
        let consumer_count = rio.read_len()?;
        for _ in 0..consumer_count {
            let consumer_name = rio.read_string()?;
            let seen_time_ms = rio.read_len()? as i64;
            let consumer = group.consumer_mut(&consumer_name, seen_time_ms);
            let pel_count = rio.read_len()?;
            for _ in 0..pel_count {
                let id = rio.read_string()?;
                consumer.pel.insert(&id, ());
            }
        }
        groups.insert(name, group);
    }
    Ok(Stream::from_parts(
        nodes,
        length,
        last_id,
        max_deleted_id,
        entries_added,
        groups,
        config.stream_node_max_entries,
    ))
}

/// Serialize one value: type code, then the encoding-specific payload.
pub fn save_object<W: Write>(rio: &mut RioWriter<W>, obj: &Obj) -> RdbResult<()> {
    rio.write_u8(type_code(obj))?;
    match obj.body() {
        ObjectBody::Int(_) | ObjectBody::Embstr(_) | ObjectBody::Raw(_) => {
            rio.write_string(&obj.string_bytes())
        }
        ObjectBody::List(list) => {
            rio.write_len(list.node_count() as u64)?;
            for node in list.nodes() {
                // Container marker 2 = packed node.
                rio.write_len(2)?;
                rio.write_string(node.as_bytes())?;
            }
            Ok(())
        }
        ObjectBody::IntSet(set) => rio.write_string(&set.to_bytes()),
        ObjectBody::SetHt(set) => {
            rio.write_len(set.len() as u64)?;
            for member in set {
                rio.write_string(member)?;
            }
            Ok(())
        }
        ObjectBody::HashPack(lp) | ObjectBody::ZSetPack(lp) => rio.write_string(lp.as_bytes()),
        ObjectBody::HashHt(map) => {
            rio.write_len(map.len() as u64)?;
            for (field, value) in map {
                rio.write_string(field)?;
                rio.write_string(value)?;
            }
            Ok(())
        }
        ObjectBody::ZSetSkip(zset) => {
            rio.write_len(zset.len() as u64)?;
            for (member, score) in zset.iter() {
                rio.write_string(member)?;
                rio.write_f64(score)?;
            }
            Ok(())
        }
        ObjectBody::Stream(stream) => save_stream(rio, stream),
    }
}

/// Deserialize one value. The saved encoding is reproduced when the
/// current thresholds still permit it; a compact payload that outgrew
/// its bounds loads into the general encoding instead.
pub fn load_object<R: Read>(rio: &mut RioReader<R>, config: &Config) -> RdbResult<Obj> {
    let code = rio.read_u8()?;
    let body = match code {
        TYPE_STRING => {
            let bytes = rio.read_string()?;
            return Ok(std::sync::Arc::new(Object::create_string_try_int(&bytes)));
        }
        TYPE_LIST_QUICKLIST_2 => {
            let node_count = rio.read_len()?;
            let mut nodes = Vec::with_capacity(node_count as usize);
            for _ in 0..node_count {
                let container = rio.read_len()?;
                if container != 2 {
                    return Err(RdbError::Corrupt("unsupported quicklist container"));
                }
                let blob = rio.read_string()?;
                nodes.push(
                    ListPack::from_bytes(blob).ok_or(RdbError::Corrupt("bad quicklist node"))?,
                );
            }
            let list = QuickList::from_nodes(nodes, config.list_max_listpack_size)
                .ok_or(RdbError::Corrupt("empty quicklist node"))?;
            ObjectBody::List(list)
        }
        TYPE_SET_INTSET => {
            let blob = rio.read_string()?;
            let set = IntSet::from_bytes(&blob).ok_or(RdbError::Corrupt("bad intset"))?;
            if set.len() <= config.set_max_intset_entries {
                ObjectBody::IntSet(set)
            } else {
                ObjectBody::SetHt(set.iter().map(|v| strconv::format_i64(v)).collect())
            }
        }
        TYPE_SET => {
            let count = rio.read_len()?;
            let mut set = HashSet::with_capacity(count as usize);
            for _ in 0..count {
                set.insert(rio.read_string()?);
            }
            ObjectBody::SetHt(set)
        }
        TYPE_HASH_LISTPACK => {
            let blob = rio.read_string()?;
            let lp = ListPack::from_bytes(blob).ok_or(RdbError::Corrupt("bad hash listpack"))?;
            if lp.len() % 2 != 0 {
                return Err(RdbError::Corrupt("odd hash listpack"));
            }
            let fits = lp.len() / 2 <= config.hash_max_listpack_entries
                && lp
                    .iter()
                    .all(|e| e.to_vec().len() <= config.hash_max_listpack_value);
            if fits {
                ObjectBody::HashPack(lp)
            } else {
                let mut map = HashMap::new();
                let mut iter = lp.iter();
                while let (Some(f), Some(v)) = (iter.next(), iter.next()) {
                    map.insert(f.to_vec(), v.to_vec());
                }
                ObjectBody::HashHt(map)
            }
        }
        TYPE_HASH => {
            let count = rio.read_len()?;
            let mut map = HashMap::with_capacity(count as usize);
            for _ in 0..count {
                let field = rio.read_string()?;
                let value = rio.read_string()?;
                map.insert(field, value);
            }
            ObjectBody::HashHt(map)
        }
        TYPE_ZSET_LISTPACK => {
            let blob = rio.read_string()?;
            let lp = ListPack::from_bytes(blob).ok_or(RdbError::Corrupt("bad zset listpack"))?;
            if lp.len() % 2 != 0 {
                return Err(RdbError::Corrupt("odd zset listpack"));
            }
            let fits = lp.len() / 2 <= config.zset_max_listpack_entries;
            if fits {
                ObjectBody::ZSetPack(lp)
            } else {
                let mut zset = ZSet::new();
                let mut iter = lp.iter();
                while let (Some(m), Some(s)) = (iter.next(), iter.next()) {
                    let score = strconv::parse_f64(&s.to_vec())
                        .ok_or(RdbError::Corrupt("bad zset score"))?;
                    zset.set(&m.to_vec(), score);
                }
                ObjectBody::ZSetSkip(zset)
            }
        }
        TYPE_ZSET_2 => {
            let count = rio.read_len()?;
            let mut zset = ZSet::new();
            for _ in 0..count {
                let member = rio.read_string()?;
                let score = rio.read_f64()?;
                zset.set(&member, score);
            }
            ObjectBody::ZSetSkip(zset)
        }
        TYPE_STREAM_LISTPACKS_2 => ObjectBody::Stream(load_stream(rio, config)?),
        other => return Err(RdbError::UnknownType(other)),
    };
    Ok(std::sync::Arc::new(Object::new(body)))
}

/// Advise that a value just serialized by a snapshot child will not be
/// touched again there. On a copy-on-write fork this is where the pages
/// would be released back; the parent side is a no-op either way.
pub fn dismiss_after_serialize(obj: &Obj, estimated_size: usize) {
    trace!(
        "dismiss {} bytes of {:?} after serialize",
        estimated_size,
        obj.encoding()
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encodings::ListEnd;
    use crate::value::Encoding;
    use std::io::Cursor;
    use std::sync::Arc;

    fn round_trip(obj: &Obj, config: &Config) -> Obj {
        let mut writer = RioWriter::new(Vec::new());
        save_object(&mut writer, obj).unwrap();
        let bytes = writer.into_inner();
        let mut reader = RioReader::new(Cursor::new(bytes));
        load_object(&mut reader, config).unwrap()
    }

    #[test]
    fn test_len_encoding_forms() {
        let mut writer = RioWriter::new(Vec::new());
        for len in [0u64, 63, 64, 16383, 16384, u32::MAX as u64 + 1] {
            writer.write_len(len).unwrap();
        }
        let bytes = writer.into_inner();
        let mut reader = RioReader::new(Cursor::new(bytes));
        for len in [0u64, 63, 64, 16383, 16384, u32::MAX as u64 + 1] {
            assert_eq!(reader.read_len().unwrap(), len);
        }
    }

    #[test]
    fn test_string_round_trip_preserves_encoding() {
        let config = Config::default();
        let int = round_trip(&Arc::new(Object::create_string(b"12345")), &config);
        assert_eq!(int.encoding(), Encoding::Int);
        assert_eq!(int.string_bytes().as_ref(), b"12345");

        let embstr = round_trip(&Arc::new(Object::create_string(b"hello")), &config);
        assert_eq!(embstr.encoding(), Encoding::Embstr);

        let raw = round_trip(&Arc::new(Object::create_string(&[b'x'; 60])), &config);
        assert_eq!(raw.encoding(), Encoding::Raw);
        assert_eq!(raw.string_len(), 60);
    }

    #[test]
    fn test_quicklist_round_trip() {
        let config = Config::default();
        let mut list = QuickList::new(4);
        for i in 0..10 {
            list.push(ListEnd::Tail, format!("e{i}").as_bytes());
        }
        let obj = Arc::new(Object::new(ObjectBody::List(list)));
        let loaded = round_trip(&obj, &config);
        assert_eq!(loaded.encoding(), Encoding::QuickList);
        let ObjectBody::List(loaded_list) = loaded.body() else {
            panic!("not a list");
        };
        assert_eq!(loaded_list.len(), 10);
        assert_eq!(
            loaded_list.iter().collect::<Vec<_>>()[0],
            b"e0".to_vec()
        );
    }

    #[test]
    fn test_intset_round_trip_respects_threshold() {
        let mut config = Config::default();
        let mut set = IntSet::new();
        for v in 0..10 {
            set.insert(v);
        }
        let obj = Arc::new(Object::new(ObjectBody::IntSet(set)));
        let same = round_trip(&obj, &config);
        assert_eq!(same.encoding(), Encoding::IntSet);

        // Tightening the threshold converts at load time.
        config.set_max_intset_entries = 4;
        let converted = round_trip(&obj, &config);
        assert_eq!(converted.encoding(), Encoding::HashTable);
    }

    #[test]
    fn test_zset_round_trips_both_encodings() {
        let config = Config::default();
        let mut lp = ListPack::new();
        lp.push(crate::encodings::LpEntry::Str(b"m1".to_vec()));
        lp.push(crate::encodings::LpEntry::Str(b"1.5".to_vec()));
        let packed = Arc::new(Object::new(ObjectBody::ZSetPack(lp)));
        assert_eq!(round_trip(&packed, &config).encoding(), Encoding::ListPack);

        let mut zset = ZSet::new();
        zset.set(b"a", 1.0);
        zset.set(b"b", -2.5);
        let skip = Arc::new(Object::new(ObjectBody::ZSetSkip(zset)));
        let loaded = round_trip(&skip, &config);
        assert_eq!(loaded.encoding(), Encoding::SkipList);
        let ObjectBody::ZSetSkip(loaded_zset) = loaded.body() else {
            panic!("not a zset");
        };
        assert_eq!(loaded_zset.score(b"b"), Some(-2.5));
    }

    #[test]
    fn test_stream_round_trip_with_groups() {
        let config = Config::default();
        let mut stream = Stream::new(3);
        for i in 1..=8u64 {
            stream
                .append(StreamId::new(i, 0), &[(b"f".to_vec(), b"v".to_vec())])
                .unwrap();
        }
        stream.create_group(b"g", StreamId::MIN);
        stream.read_group(b"g", b"c1", 3, false, 42);
        let obj = Arc::new(Object::new(ObjectBody::Stream(stream)));
        let loaded = round_trip(&obj, &config);
        let ObjectBody::Stream(loaded_stream) = loaded.body() else {
            panic!("not a stream");
        };
        assert_eq!(loaded_stream.len(), 8);
        assert_eq!(loaded_stream.last_id, StreamId::new(8, 0));
        let group = loaded_stream.groups.get(b"g".as_slice()).unwrap();
        assert_eq!(group.last_delivered, StreamId::new(3, 0));
        assert_eq!(group.pel.len(), 3);
        assert_eq!(
            group.consumers.get(b"c1".as_slice()).unwrap().pel.len(),
            3
        );
    }

    #[test]
    fn test_checksum_detects_corruption() {
        let mut writer = RioWriter::new(Vec::new());
        save_object(&mut writer, &Arc::new(Object::create_string(b"payload"))).unwrap();
        let crc = writer.checksum();
        let mut bytes = writer.into_inner();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        let mut reader = RioReader::new(Cursor::new(bytes));
        let _ = load_object(&mut reader, &Config::default()).unwrap();
        assert_ne!(reader.checksum(), crc);
    }
}
