//! Skip list keyed by (score, member), plus the `ZSet` hybrid that
//! pairs it with a member -> score table.
//!
//! Nodes live in an index arena; level-0 links thread every node in
//! (score, member) order and higher levels carry spans so rank queries
//! stay logarithmic. Level generation uses P = 0.25 with a 32-level cap.

use std::collections::HashMap;

use rand::Rng;

const MAX_LEVEL: usize = 32;
const LEVEL_P: f64 = 0.25;

#[derive(Debug, Clone)]
struct SkipLevel {
    forward: Option<usize>,
    span: usize,
}

#[derive(Debug, Clone)]
struct SkipNode {
    member: Vec<u8>,
    score: f64,
    backward: Option<usize>,
    levels: Vec<SkipLevel>,
}

/// Ordering used everywhere: score first, member bytes break ties.
fn precedes(a_score: f64, a_member: &[u8], b_score: f64, b_member: &[u8]) -> bool {
    match a_score.partial_cmp(&b_score) {
        Some(std::cmp::Ordering::Less) => true,
        Some(std::cmp::Ordering::Greater) => false,
        _ => a_member < b_member,
    }
}

#[derive(Debug, Clone)]
pub struct SkipList {
    nodes: Vec<SkipNode>,
    free: Vec<usize>,
    tail: Option<usize>,
    level: usize,
    len: usize,
}

impl SkipList {
    const HEAD: usize = 0;

    pub fn new() -> Self {
        let head = SkipNode {
            member: Vec::new(),
            score: 0.0,
            backward: None,
            levels: vec![
                SkipLevel {
                    forward: None,
                    span: 0
                };
                MAX_LEVEL
            ],
        };
        Self {
            nodes: vec![head],
            free: Vec::new(),
            tail: None,
            level: 1,
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn random_level(&self) -> usize {
        let mut rng = rand::thread_rng();
        let mut level = 1;
        while level < MAX_LEVEL && rng.gen::<f64>() < LEVEL_P {
            level += 1;
        }
        level
    }

    fn alloc(&mut self, node: SkipNode) -> usize {
        if let Some(idx) = self.free.pop() {
            self.nodes[idx] = node;
            idx
        } else {
            self.nodes.push(node);
            self.nodes.len() - 1
        }
    }

    /// Insert a (score, member) pair. The caller guarantees the member
    /// is not already present (the `ZSet` dict enforces that).
    pub fn insert(&mut self, score: f64, member: Vec<u8>) {
        let mut update = [Self::HEAD; MAX_LEVEL];
        let mut rank = [0usize; MAX_LEVEL];

        let mut x = Self::HEAD;
        for i in (0..self.level).rev() {
            rank[i] = if i == self.level - 1 { 0 } else { rank[i + 1] };
            while let Some(next) = self.nodes[x].levels[i].forward {
                let n = &self.nodes[next];
                if precedes(n.score, &n.member, score, &member) {
                    rank[i] += self.nodes[x].levels[i].span;
                    x = next;
                } else {
                    break;
                }
            }
            update[i] = x;
        }

        let level = self.random_level();
        if level > self.level {
            for i in self.level..level {
                rank[i] = 0;
                update[i] = Self::HEAD;
                self.nodes[Self::HEAD].levels[i].span = self.len;
            }
            self.level = level;
        }

        let idx = self.alloc(SkipNode {
            member,
            score,
            backward: None,
            levels: vec![SkipLevel { forward: None, span: 0 }; level],
        });

        for i in 0..level {
            let prev = update[i];
            let prev_forward = self.nodes[prev].levels[i].forward;
            let prev_span = self.nodes[prev].levels[i].span;
            self.nodes[idx].levels[i].forward = prev_forward;
            self.nodes[idx].levels[i].span = prev_span - (rank[0] - rank[i]);
            self.nodes[prev].levels[i].forward = Some(idx);
            self.nodes[prev].levels[i].span = (rank[0] - rank[i]) + 1;
        }
        for i in level..self.level {
            self.nodes[update[i]].levels[i].span += 1;
        }

        self.nodes[idx].backward = if update[0] == Self::HEAD {
            None
        } else {
            Some(update[0])
        };
        if let Some(next) = self.nodes[idx].levels[0].forward {
            self.nodes[next].backward = Some(idx);
        } else {
            self.tail = Some(idx);
        }
        self.len += 1;
    }

    /// Remove a (score, member) pair; returns false when absent.
    pub fn delete(&mut self, score: f64, member: &[u8]) -> bool {
        let mut update = [Self::HEAD; MAX_LEVEL];
        let mut x = Self::HEAD;
        for i in (0..self.level).rev() {
            while let Some(next) = self.nodes[x].levels[i].forward {
                let n = &self.nodes[next];
                if precedes(n.score, &n.member, score, member) {
                    x = next;
                } else {
                    break;
                }
            }
            update[i] = x;
        }

        let target = match self.nodes[x].levels[0].forward {
            Some(t) if self.nodes[t].score == score && self.nodes[t].member == member => t,
            _ => return false,
        };

        for i in 0..self.level {
            let prev = update[i];
            if self.nodes[prev].levels[i].forward == Some(target) {
                let target_span = self.nodes[target].levels[i].span;
                let target_forward = self.nodes[target].levels[i].forward;
                self.nodes[prev].levels[i].span += target_span - 1;
                self.nodes[prev].levels[i].forward = target_forward;
            } else {
                self.nodes[prev].levels[i].span -= 1;
            }
        }

        let backward = self.nodes[target].backward;
        if let Some(next) = self.nodes[target].levels[0].forward {
            self.nodes[next].backward = backward;
        } else {
            self.tail = backward;
        }
        while self.level > 1
            && self.nodes[Self::HEAD].levels[self.level - 1].forward.is_none()
        {
            self.level -= 1;
        }
        self.free.push(target);
        self.len -= 1;
        true
    }

    /// Lowest (score, member), if any.
    pub fn first(&self) -> Option<(&[u8], f64)> {
        let idx = self.nodes[Self::HEAD].levels[0].forward?;
        let n = &self.nodes[idx];
        Some((&n.member, n.score))
    }

    /// Highest (score, member), if any.
    pub fn last(&self) -> Option<(&[u8], f64)> {
        let idx = self.tail?;
        let n = &self.nodes[idx];
        Some((&n.member, n.score))
    }

    /// 0-based rank of a pair, derived from the spans.
    pub fn rank(&self, score: f64, member: &[u8]) -> Option<usize> {
        let mut traversed = 0usize;
        let mut x = Self::HEAD;
        for i in (0..self.level).rev() {
            while let Some(next) = self.nodes[x].levels[i].forward {
                let n = &self.nodes[next];
                if precedes(n.score, &n.member, score, member)
                    || (n.score == score && n.member == member)
                {
                    traversed += self.nodes[x].levels[i].span;
                    x = next;
                } else {
                    break;
                }
            }
            if x != Self::HEAD && self.nodes[x].score == score && self.nodes[x].member == member {
                return Some(traversed - 1);
            }
        }
        None
    }

    /// In-order traversal over (member, score).
    pub fn iter(&self) -> SkipIter<'_> {
        SkipIter {
            list: self,
            cursor: self.nodes[Self::HEAD].levels[0].forward,
        }
    }
}

impl Default for SkipList {
    fn default() -> Self {
        Self::new()
    }
}

pub struct SkipIter<'a> {
    list: &'a SkipList,
    cursor: Option<usize>,
}

impl<'a> Iterator for SkipIter<'a> {
    type Item = (&'a [u8], f64);

    fn next(&mut self) -> Option<Self::Item> {
        let idx = self.cursor?;
        let node = &self.list.nodes[idx];
        self.cursor = node.levels[0].forward;
        Some((&node.member, node.score))
    }
}

/// Sorted-set hybrid: the skip list orders by (score, member), the dict
/// answers member -> score in O(1).
#[derive(Debug, Clone, Default)]
pub struct ZSet {
    dict: HashMap<Vec<u8>, f64>,
    list: SkipList,
}

impl ZSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        debug_assert_eq!(self.dict.len(), self.list.len());
        self.dict.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dict.is_empty()
    }

    /// Insert or update a member. Returns true when the member is new.
    pub fn set(&mut self, member: &[u8], score: f64) -> bool {
        match self.dict.get(member).copied() {
            Some(old) => {
                if old != score {
                    self.list.delete(old, member);
                    self.list.insert(score, member.to_vec());
                    self.dict.insert(member.to_vec(), score);
                }
                false
            }
            None => {
                self.list.insert(score, member.to_vec());
                self.dict.insert(member.to_vec(), score);
                true
            }
        }
    }

    pub fn remove(&mut self, member: &[u8]) -> Option<f64> {
        let score = self.dict.remove(member)?;
        let deleted = self.list.delete(score, member);
        debug_assert!(deleted);
        Some(score)
    }

    pub fn score(&self, member: &[u8]) -> Option<f64> {
        self.dict.get(member).copied()
    }

    pub fn pop_min(&mut self) -> Option<(Vec<u8>, f64)> {
        let (member, score) = self.list.first().map(|(m, s)| (m.to_vec(), s))?;
        self.remove(&member);
        Some((member, score))
    }

    pub fn pop_max(&mut self) -> Option<(Vec<u8>, f64)> {
        let (member, score) = self.list.last().map(|(m, s)| (m.to_vec(), s))?;
        self.remove(&member);
        Some((member, score))
    }

    pub fn iter(&self) -> SkipIter<'_> {
        self.list.iter()
    }

    pub fn skiplist(&self) -> &SkipList {
        &self.list
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_orders_by_score_then_member() {
        let mut zs = ZSet::new();
        zs.set(b"b", 2.0);
        zs.set(b"a", 1.0);
        zs.set(b"c", 1.0);
        let order: Vec<_> = zs.iter().map(|(m, _)| m.to_vec()).collect();
        assert_eq!(order, vec![b"a".to_vec(), b"c".to_vec(), b"b".to_vec()]);
    }

    #[test]
    fn test_update_moves_member() {
        let mut zs = ZSet::new();
        assert!(zs.set(b"m", 1.0));
        assert!(!zs.set(b"m", 9.0));
        assert_eq!(zs.score(b"m"), Some(9.0));
        assert_eq!(zs.len(), 1);
        assert_eq!(zs.skiplist().first().unwrap().1, 9.0);
    }

    #[test]
    fn test_pop_min_max() {
        let mut zs = ZSet::new();
        for (m, s) in [(b"a", 3.0), (b"b", 1.0), (b"c", 2.0)] {
            zs.set(m, s);
        }
        assert_eq!(zs.pop_min().unwrap(), (b"b".to_vec(), 1.0));
        assert_eq!(zs.pop_max().unwrap(), (b"a".to_vec(), 3.0));
        assert_eq!(zs.len(), 1);
    }

    #[test]
    fn test_ranks_follow_spans() {
        let mut zs = ZSet::new();
        for i in 0..100 {
            zs.set(format!("m{i:03}").as_bytes(), i as f64);
        }
        for probe in [0usize, 1, 42, 99] {
            let member = format!("m{probe:03}");
            assert_eq!(
                zs.skiplist().rank(probe as f64, member.as_bytes()),
                Some(probe)
            );
        }
        assert_eq!(zs.skiplist().rank(5.0, b"missing"), None);
    }

    #[test]
    fn test_delete_rebuilds_links() {
        let mut zs = ZSet::new();
        for i in 0..50 {
            zs.set(format!("m{i}").as_bytes(), i as f64);
        }
        for i in (0..50).step_by(2) {
            assert!(zs.remove(format!("m{i}").as_bytes()).is_some());
        }
        assert_eq!(zs.len(), 25);
        let scores: Vec<_> = zs.iter().map(|(_, s)| s).collect();
        let mut sorted = scores.clone();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
        assert_eq!(scores, sorted);
        assert_eq!(zs.skiplist().rank(1.0, b"m1"), Some(0));
    }
}
