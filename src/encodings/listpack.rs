//! Listpack: a packed sequence of entries in one contiguous allocation.
//!
//! Layout: an 8-byte header (`u32` total bytes, `u32` element count, both
//! little-endian) followed by the entries. An entry is either an integer
//! (tag byte + 8-byte two's-complement payload) or a byte string (tag
//! byte + `u32` length + bytes). The byte-length header makes the memory
//! footprint of a listpack-encoded value an O(1) exact read.

const HEADER_SIZE: usize = 8;
const TAG_INT: u8 = 0xF1;
const TAG_STR: u8 = 0xF2;

/// A borrowed view of one listpack entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LpRef<'a> {
    Int(i64),
    Str(&'a [u8]),
}

impl<'a> LpRef<'a> {
    /// Byte-string view; integers render as decimal ASCII.
    pub fn to_vec(self) -> Vec<u8> {
        match self {
            LpRef::Int(v) => crate::value::strconv::format_i64(v),
            LpRef::Str(s) => s.to_vec(),
        }
    }

    /// Integer view, parsing string entries strictly.
    pub fn as_i64(self) -> Option<i64> {
        match self {
            LpRef::Int(v) => Some(v),
            LpRef::Str(s) => crate::value::strconv::parse_i64(s),
        }
    }

    /// Binary comparison against a raw byte string.
    pub fn eq_bytes(self, other: &[u8]) -> bool {
        match self {
            LpRef::Int(v) => crate::value::strconv::format_i64(v) == other,
            LpRef::Str(s) => s == other,
        }
    }
}

/// An owned listpack entry, used when inserting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LpEntry {
    Int(i64),
    Str(Vec<u8>),
}

impl LpEntry {
    /// Build the entry from a raw byte string, packing canonical
    /// integers in their numeric form.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        match crate::value::strconv::parse_i64(bytes) {
            Some(v) => LpEntry::Int(v),
            None => LpEntry::Str(bytes.to_vec()),
        }
    }

    fn encoded_len(&self) -> usize {
        match self {
            LpEntry::Int(_) => 1 + 8,
            LpEntry::Str(s) => 1 + 4 + s.len(),
        }
    }
}

/// The packed entry buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListPack {
    buf: Vec<u8>,
}

impl ListPack {
    pub fn new() -> Self {
        let mut buf = vec![0u8; HEADER_SIZE];
        buf[0..4].copy_from_slice(&(HEADER_SIZE as u32).to_le_bytes());
        Self { buf }
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        u32::from_le_bytes(self.buf[4..8].try_into().unwrap()) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total bytes of the backing buffer, per the stored header.
    pub fn num_bytes(&self) -> usize {
        u32::from_le_bytes(self.buf[0..4].try_into().unwrap()) as usize
    }

    fn set_header(&mut self, bytes: usize, count: usize) {
        self.buf[0..4].copy_from_slice(&(bytes as u32).to_le_bytes());
        self.buf[4..8].copy_from_slice(&(count as u32).to_le_bytes());
    }

    fn write_entry(dst: &mut Vec<u8>, entry: &LpEntry) {
        match entry {
            LpEntry::Int(v) => {
                dst.push(TAG_INT);
                dst.extend_from_slice(&v.to_le_bytes());
            }
            LpEntry::Str(s) => {
                dst.push(TAG_STR);
                dst.extend_from_slice(&(s.len() as u32).to_le_bytes());
                dst.extend_from_slice(s);
            }
        }
    }

    /// Byte offset just past entry `idx - 1`; `idx == len()` yields the
    /// end of the buffer.
    fn offset_of(&self, idx: usize) -> usize {
        let mut off = HEADER_SIZE;
        for _ in 0..idx {
            off = self.skip_entry(off);
        }
        off
    }

    fn skip_entry(&self, off: usize) -> usize {
        match self.buf[off] {
            TAG_INT => off + 1 + 8,
            TAG_STR => {
                let len =
                    u32::from_le_bytes(self.buf[off + 1..off + 5].try_into().unwrap()) as usize;
                off + 1 + 4 + len
            }
            tag => panic!("corrupt listpack entry tag {tag:#x}"),
        }
    }

    fn read_entry(&self, off: usize) -> (LpRef<'_>, usize) {
        match self.buf[off] {
            TAG_INT => {
                let v = i64::from_le_bytes(self.buf[off + 1..off + 9].try_into().unwrap());
                (LpRef::Int(v), off + 9)
            }
            TAG_STR => {
                let len =
                    u32::from_le_bytes(self.buf[off + 1..off + 5].try_into().unwrap()) as usize;
                let start = off + 5;
                (LpRef::Str(&self.buf[start..start + len]), start + len)
            }
            tag => panic!("corrupt listpack entry tag {tag:#x}"),
        }
    }

    /// Append an entry.
    pub fn push(&mut self, entry: LpEntry) {
        let count = self.len();
        Self::write_entry(&mut self.buf, &entry);
        let bytes = self.buf.len();
        self.set_header(bytes, count + 1);
    }

    /// Insert before entry `idx` (`idx == len()` appends).
    pub fn insert(&mut self, idx: usize, entry: LpEntry) {
        assert!(idx <= self.len());
        let off = self.offset_of(idx);
        let mut encoded = Vec::with_capacity(entry.encoded_len());
        Self::write_entry(&mut encoded, &entry);
        let count = self.len();
        self.buf.splice(off..off, encoded);
        let bytes = self.buf.len();
        self.set_header(bytes, count + 1);
    }

    /// Remove `n` entries starting at `idx`.
    pub fn remove(&mut self, idx: usize, n: usize) {
        assert!(idx + n <= self.len());
        let start = self.offset_of(idx);
        let mut end = start;
        for _ in 0..n {
            end = self.skip_entry(end);
        }
        let count = self.len();
        self.buf.drain(start..end);
        let bytes = self.buf.len();
        self.set_header(bytes, count - n);
    }

    /// Entry at `idx`, if any.
    pub fn get(&self, idx: usize) -> Option<LpRef<'_>> {
        if idx >= self.len() {
            return None;
        }
        let off = self.offset_of(idx);
        Some(self.read_entry(off).0)
    }

    /// Index of the first entry binary-equal to `needle`, scanning every
    /// `step`-th entry from `start` (step 2 walks field or member
    /// positions of a pair-encoded listpack).
    pub fn find(&self, needle: &[u8], start: usize, step: usize) -> Option<usize> {
        debug_assert!(step >= 1);
        let mut idx = start;
        let mut off = self.offset_of(start);
        while idx < self.len() {
            let (entry, next) = self.read_entry(off);
            if entry.eq_bytes(needle) {
                return Some(idx);
            }
            off = next;
            for _ in 1..step {
                if idx + 1 >= self.len() {
                    return None;
                }
                off = self.skip_entry(off);
                idx += 1;
            }
            idx += 1;
        }
        None
    }

    pub fn iter(&self) -> LpIter<'_> {
        LpIter {
            lp: self,
            off: HEADER_SIZE,
            remaining: self.len(),
        }
    }

    /// Raw buffer, header included, for the typed-dump contract.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Rebuild from a dumped buffer, validating the header.
    pub fn from_bytes(buf: Vec<u8>) -> Option<Self> {
        if buf.len() < HEADER_SIZE {
            return None;
        }
        let lp = Self { buf };
        if lp.num_bytes() != lp.buf.len() {
            return None;
        }
        // Walk the claimed entries to reject truncated payloads.
        let mut off = HEADER_SIZE;
        for _ in 0..lp.len() {
            if off >= lp.buf.len() || (lp.buf[off] != TAG_INT && lp.buf[off] != TAG_STR) {
                return None;
            }
            off = lp.skip_entry(off);
            if off > lp.buf.len() {
                return None;
            }
        }
        (off == lp.buf.len()).then_some(lp)
    }
}

impl Default for ListPack {
    fn default() -> Self {
        Self::new()
    }
}

pub struct LpIter<'a> {
    lp: &'a ListPack,
    off: usize,
    remaining: usize,
}

impl<'a> Iterator for LpIter<'a> {
    type Item = LpRef<'a>;

    fn next(&mut self) -> Option<LpRef<'a>> {
        if self.remaining == 0 {
            return None;
        }
        let (entry, next) = self.lp.read_entry(self.off);
        self.off = next;
        self.remaining -= 1;
        Some(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_and_get() {
        let mut lp = ListPack::new();
        lp.push(LpEntry::Str(b"hello".to_vec()));
        lp.push(LpEntry::Int(42));
        assert_eq!(lp.len(), 2);
        assert_eq!(lp.get(0), Some(LpRef::Str(b"hello")));
        assert_eq!(lp.get(1), Some(LpRef::Int(42)));
        assert_eq!(lp.get(2), None);
    }

    #[test]
    fn test_header_tracks_bytes() {
        let mut lp = ListPack::new();
        assert_eq!(lp.num_bytes(), 8);
        lp.push(LpEntry::Int(7));
        assert_eq!(lp.num_bytes(), 8 + 9);
        lp.push(LpEntry::Str(b"ab".to_vec()));
        assert_eq!(lp.num_bytes(), 8 + 9 + 7);
    }

    #[test]
    fn test_insert_and_remove() {
        let mut lp = ListPack::new();
        lp.push(LpEntry::Int(1));
        lp.push(LpEntry::Int(3));
        lp.insert(1, LpEntry::Int(2));
        let values: Vec<_> = lp.iter().map(|e| e.as_i64().unwrap()).collect();
        assert_eq!(values, vec![1, 2, 3]);

        lp.remove(0, 2);
        let values: Vec<_> = lp.iter().map(|e| e.as_i64().unwrap()).collect();
        assert_eq!(values, vec![3]);
    }

    #[test]
    fn test_integer_packing_is_transparent() {
        let mut lp = ListPack::new();
        lp.push(LpEntry::from_bytes(b"123"));
        lp.push(LpEntry::from_bytes(b"012"));
        assert_eq!(lp.get(0), Some(LpRef::Int(123)));
        assert_eq!(lp.get(1), Some(LpRef::Str(b"012")));
        assert_eq!(lp.get(0).unwrap().to_vec(), b"123".to_vec());
    }

    #[test]
    fn test_find_with_step() {
        let mut lp = ListPack::new();
        for pair in [("f1", "v1"), ("f2", "v2"), ("f3", "v3")] {
            lp.push(LpEntry::from_bytes(pair.0.as_bytes()));
            lp.push(LpEntry::from_bytes(pair.1.as_bytes()));
        }
        assert_eq!(lp.find(b"f2", 0, 2), Some(2));
        assert_eq!(lp.find(b"v2", 0, 2), None);
        assert_eq!(lp.find(b"v2", 1, 2), Some(3));
        assert_eq!(lp.find(b"missing", 0, 2), None);
    }

    #[test]
    fn test_dump_round_trip() {
        let mut lp = ListPack::new();
        lp.push(LpEntry::Str(b"alpha".to_vec()));
        lp.push(LpEntry::Int(-9));
        let bytes = lp.as_bytes().to_vec();
        let restored = ListPack::from_bytes(bytes).unwrap();
        assert_eq!(restored, lp);
        assert!(ListPack::from_bytes(vec![0, 0, 0]).is_none());
    }
}
