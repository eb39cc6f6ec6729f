//! Per-value size estimation (MEMORY USAGE).
//!
//! Simple encodings are exact: their stored byte-length headers already
//! say what they cost. Aggregated encodings are sampled: a handful of
//! elements are measured, the average is scaled by the element count.
//! Everything here walks owned structure only.

use std::mem;

use crate::encodings::rax::Rax;
use crate::encodings::{ListPack, Stream};
use crate::value::{Obj, ObjectBody};

/// Default element sample when the caller gives none.
pub const DEFAULT_SAMPLES: usize = 5;

/// Container bookkeeping guess per hash-table entry, matching the
/// dictEntry + bucket-slot overhead of an open-chaining table.
const HT_ENTRY_OVERHEAD: usize = 3 * mem::size_of::<usize>();

fn sds_size(bytes: &[u8]) -> usize {
    mem::size_of::<Vec<u8>>() + bytes.len()
}

/// Estimated footprint of a stream's radix tree. Keys cost their id
/// bytes, nodes cost their header plus child bookkeeping; the constant
/// mirrors what real trees average out to.
fn rax_memory_usage<V>(rax: &Rax<V>) -> usize {
    let nodes = rax.node_count();
    rax.len() * 16 + nodes * mem::size_of::<usize>() * 8
}

fn stream_usage(stream: &Stream, sample_size: usize) -> usize {
    let mut size = mem::size_of::<Stream>();
    size += rax_memory_usage(stream.rax());

    // Average the first N node listpacks and scale by node count.
    let node_total = stream.rax().len();
    let mut sampled = 0usize;
    let mut sampled_bytes = 0usize;
    for (_, node) in stream.rax().iter() {
        if sampled >= sample_size.max(1) {
            break;
        }
        sampled_bytes += node.num_bytes();
        sampled += 1;
    }
    if sampled > 0 {
        size += sampled_bytes / sampled * node_total;
    }

    // Consumer groups: group header, the shared NACK pool, and each
    // consumer's name and pending-id tree.
    for group in stream.groups.values() {
        size += mem::size_of_val(group);
        size += rax_memory_usage(&group.pel);
        size += group.pel.len() * mem::size_of::<crate::encodings::Nack>();
        for consumer in group.consumers.values() {
            size += mem::size_of_val(consumer);
            size += consumer.name.len();
            size += rax_memory_usage(&consumer.pel);
        }
    }
    size
}

/// Estimated bytes a value occupies, sampling `sample_size` elements of
/// aggregated encodings.
pub fn compute_size(obj: &Obj, sample_size: usize) -> usize {
    let header = mem::size_of::<crate::value::Object>() + 2 * mem::size_of::<usize>();
    let body = match obj.body() {
        ObjectBody::Int(_) => 0,
        ObjectBody::Embstr(s) => s.len(),
        ObjectBody::Raw(s) => mem::size_of::<Vec<u8>>() + s.capacity(),
        ObjectBody::List(list) => {
            let mut sampled_bytes = 0usize;
            let mut samples = 0usize;
            for node in list.nodes().take(sample_size.max(1)) {
                sampled_bytes += node.num_bytes() + mem::size_of::<ListPack>();
                samples += 1;
            }
            if samples == 0 {
                0
            } else {
                sampled_bytes / samples * list.node_count()
            }
        }
        ObjectBody::IntSet(set) => set.byte_size(),
        ObjectBody::SetHt(set) => {
            let mut elem_bytes = 0usize;
            let mut samples = 0usize;
            for member in set.iter().take(sample_size.max(1)) {
                elem_bytes += sds_size(member) + HT_ENTRY_OVERHEAD;
                samples += 1;
            }
            let per_elem = if samples == 0 { 0 } else { elem_bytes / samples };
            mem::size_of_val(set) + set.capacity() * mem::size_of::<usize>() + per_elem * set.len()
        }
        ObjectBody::HashPack(lp) | ObjectBody::ZSetPack(lp) => lp.num_bytes(),
        ObjectBody::HashHt(map) => {
            let mut elem_bytes = 0usize;
            let mut samples = 0usize;
            for (field, value) in map.iter().take(sample_size.max(1)) {
                elem_bytes += sds_size(field) + sds_size(value) + HT_ENTRY_OVERHEAD;
                samples += 1;
            }
            let per_elem = if samples == 0 { 0 } else { elem_bytes / samples };
            mem::size_of_val(map) + map.capacity() * mem::size_of::<usize>() + per_elem * map.len()
        }
        ObjectBody::ZSetSkip(zset) => {
            let mut elem_bytes = 0usize;
            let mut samples = 0usize;
            for (member, _) in zset.iter().take(sample_size.max(1)) {
                // Member bytes appear in the dict and the skiplist node;
                // the node adds level pointers and the score.
                elem_bytes += 2 * sds_size(member) + HT_ENTRY_OVERHEAD + 6 * mem::size_of::<usize>();
                samples += 1;
            }
            let per_elem = if samples == 0 { 0 } else { elem_bytes / samples };
            mem::size_of_val(zset) + per_elem * zset.len()
        }
        ObjectBody::Stream(stream) => stream_usage(stream, sample_size),
    };
    header + body
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encodings::{IntSet, LpEntry, QuickList, ZSet};
    use crate::encodings::{ListEnd, StreamId};
    use crate::value::Object;
    use std::sync::Arc;

    #[test]
    fn test_simple_encodings_are_exact() {
        let embstr = Arc::new(Object::create_string(b"hello"));
        let base = mem::size_of::<crate::value::Object>() + 2 * mem::size_of::<usize>();
        assert_eq!(compute_size(&embstr, DEFAULT_SAMPLES), base + 5);

        let int = Arc::new(Object::create_string_from_i64(7));
        assert_eq!(compute_size(&int, DEFAULT_SAMPLES), base);

        let mut intset = IntSet::new();
        intset.insert(1);
        intset.insert(2);
        let expected = base + intset.byte_size();
        let obj = Arc::new(Object::new(ObjectBody::IntSet(intset)));
        assert_eq!(compute_size(&obj, DEFAULT_SAMPLES), expected);
    }

    #[test]
    fn test_listpack_uses_stored_byte_header() {
        let mut lp = crate::encodings::ListPack::new();
        lp.push(LpEntry::Str(b"field".to_vec()));
        lp.push(LpEntry::Str(b"value".to_vec()));
        let expected_body = lp.num_bytes();
        let obj = Arc::new(Object::new(ObjectBody::HashPack(lp)));
        let base = mem::size_of::<crate::value::Object>() + 2 * mem::size_of::<usize>();
        assert_eq!(compute_size(&obj, DEFAULT_SAMPLES), base + expected_body);
    }

    #[test]
    fn test_sampling_scales_with_length() {
        let mut small = QuickList::new(4);
        let mut large = QuickList::new(4);
        for i in 0..8 {
            small.push(ListEnd::Tail, format!("elem-{i}").as_bytes());
        }
        for i in 0..80 {
            large.push(ListEnd::Tail, format!("elem-{i}").as_bytes());
        }
        let small_obj = Arc::new(Object::new(ObjectBody::List(small)));
        let large_obj = Arc::new(Object::new(ObjectBody::List(large)));
        assert!(
            compute_size(&large_obj, DEFAULT_SAMPLES)
                > 4 * compute_size(&small_obj, DEFAULT_SAMPLES)
        );
    }

    #[test]
    fn test_zset_and_stream_report_nonzero() {
        let mut zset = ZSet::new();
        for i in 0..10 {
            zset.set(format!("m{i}").as_bytes(), i as f64);
        }
        let zobj = Arc::new(Object::new(ObjectBody::ZSetSkip(zset)));
        assert!(compute_size(&zobj, DEFAULT_SAMPLES) > 100);

        let mut stream = crate::encodings::Stream::new(3);
        for i in 1..=10u64 {
            stream
                .append(
                    StreamId::new(i, 0),
                    &[(b"f".to_vec(), b"v".to_vec())],
                )
                .unwrap();
        }
        stream.create_group(b"g", StreamId::MIN);
        stream.read_group(b"g", b"c", 0, false, 0);
        let sobj = Arc::new(Object::new(ObjectBody::Stream(stream)));
        assert!(compute_size(&sobj, DEFAULT_SAMPLES) > 200);
    }
}
