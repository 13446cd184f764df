//! Arena-backed skip list used as the MemTable's ordered index.
//!
//! Nodes live in a `Vec` and link to each other by index, one forward pointer per
//! level they were promoted to. Nothing is ever unlinked individually: the list only
//! grows until [`SkipList::clear`] drops the whole arena.
//!
//! ```text
//! Level 2:  HEAD ──────────► 20 ─────────────────────► NIL
//! Level 1:  HEAD ──► 10 ──► 20 ────────► 50 ─────────► NIL
//! Level 0:  HEAD ──► 10 ──► 20 ──► 35 ──► 50 ──► 60 ──► NIL
//! ```

use crate::types::{Key, Value};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Hard cap on the number of levels.
pub const MAX_HEIGHT: usize = 32;

/// Default promotion probability.
pub const DEFAULT_PROBABILITY: f64 = 0.5;

struct Node {
    key: Key,
    value: Value,
    /// `forward[i]` is the next node on level `i`.
    forward: Vec<Option<usize>>,
}

/// An ordered map from [`Key`] to [`Value`] with expected O(log n) insert and lookup.
pub struct SkipList {
    nodes: Vec<Node>,
    /// Forward pointers of the head sentinel. Its length is the number of levels in use.
    head: Vec<Option<usize>>,
    probability: f64,
    rng: StdRng,
}

impl SkipList {
    /// Creates an empty list promoting nodes with probability `probability`.
    pub fn new(probability: f64) -> Self {
        Self::with_seed(probability, rand::random())
    }

    /// Creates an empty list whose level choices are reproducible.
    pub fn with_seed(probability: f64, seed: u64) -> Self {
        assert!(
            probability > 0.0 && probability < 1.0,
            "skip list probability must be in (0, 1), got {}",
            probability
        );
        Self {
            nodes: Vec::new(),
            head: vec![None],
            probability,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Inserts `key` or overwrites its value in place.
    ///
    /// Returns `true` if the key was not present before.
    pub fn put(&mut self, key: Key, value: Value) -> bool {
        let mut update = vec![None; self.head.len()];
        let mut cur = None;
        for level in (0..self.head.len()).rev() {
            while let Some(next) = self.next_of(cur, level) {
                if self.nodes[next].key < key {
                    cur = Some(next);
                } else {
                    break;
                }
            }
            update[level] = cur;
        }

        if let Some(next) = self.next_of(cur, 0) {
            if self.nodes[next].key == key {
                self.nodes[next].value = value;
                return false;
            }
        }

        let height = self.random_height();
        if height > self.head.len() {
            // Only ever one new level; the new key is its first member.
            self.head.push(None);
            update.push(None);
        }

        let idx = self.nodes.len();
        let forward = (0..height).map(|level| self.next_of(update[level], level)).collect();
        self.nodes.push(Node { key, value, forward });
        for (level, pred) in update.iter().enumerate().take(height) {
            self.set_next(*pred, level, Some(idx));
        }

        true
    }

    /// Looks up `key`.
    ///
    /// Descends from the top level, advancing while the next key is `<= key`, so the
    /// walk is fully determined by the structure.
    pub fn get(&self, key: Key) -> Option<&Value> {
        let mut cur = None;
        for level in (0..self.head.len()).rev() {
            while let Some(next) = self.next_of(cur, level) {
                if self.nodes[next].key <= key {
                    cur = Some(next);
                } else {
                    break;
                }
            }
        }

        cur.filter(|&idx| self.nodes[idx].key == key).map(|idx| &self.nodes[idx].value)
    }

    /// Removes every entry and shrinks back to a single level.
    pub fn clear(&mut self) {
        self.nodes.clear();
        self.head.clear();
        self.head.push(None);
    }

    /// Number of distinct keys.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the list holds no keys.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Number of levels currently in use.
    pub fn height(&self) -> usize {
        self.head.len()
    }

    /// Ascending iterator over all entries.
    pub fn iter(&self) -> Iter<'_> {
        Iter { list: self, next: self.head[0] }
    }

    /// Ascending iterator starting at the first key `>= key`.
    pub fn iter_from(&self, key: Key) -> Iter<'_> {
        Iter { list: self, next: self.lower_bound(key) }
    }

    /// A cursor positioned before the first entry.
    pub fn cursor(&self) -> Cursor<'_> {
        Cursor { list: self, position: Position::BeforeFirst }
    }

    /// Index of the first node whose key is `>= key`.
    fn lower_bound(&self, key: Key) -> Option<usize> {
        let mut cur = None;
        for level in (0..self.head.len()).rev() {
            while let Some(next) = self.next_of(cur, level) {
                if self.nodes[next].key < key {
                    cur = Some(next);
                } else {
                    break;
                }
            }
        }
        self.next_of(cur, 0)
    }

    /// `None` stands for the head sentinel.
    fn next_of(&self, node: Option<usize>, level: usize) -> Option<usize> {
        match node {
            None => self.head[level],
            Some(idx) => self.nodes[idx].forward[level],
        }
    }

    fn set_next(&mut self, node: Option<usize>, level: usize, next: Option<usize>) {
        match node {
            None => self.head[level] = next,
            Some(idx) => self.nodes[idx].forward[level] = next,
        }
    }

    /// Flips coins until one fails; may exceed the current height by one.
    fn random_height(&mut self) -> usize {
        let mut height = 1;
        while height <= self.head.len()
            && height < MAX_HEIGHT
            && self.rng.random_bool(self.probability)
        {
            height += 1;
        }
        height
    }
}

impl Default for SkipList {
    fn default() -> Self {
        Self::new(DEFAULT_PROBABILITY)
    }
}

/// Iterator over skip list entries in ascending key order.
pub struct Iter<'a> {
    list: &'a SkipList,
    next: Option<usize>,
}

impl<'a> Iterator for Iter<'a> {
    type Item = (Key, &'a Value);

    fn next(&mut self) -> Option<Self::Item> {
        let idx = self.next?;
        let node = &self.list.nodes[idx];
        self.next = node.forward[0];
        Some((node.key, &node.value))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Position {
    BeforeFirst,
    At(usize),
    AfterLast,
}

/// Forward-only, restartable cursor over a [`SkipList`].
///
/// Reading the key or value while the cursor is not on an entry is a programming
/// error and panics.
pub struct Cursor<'a> {
    list: &'a SkipList,
    position: Position,
}

impl<'a> Cursor<'a> {
    /// Moves to the first entry.
    pub fn seek_to_first(&mut self) {
        self.position = Self::position_of(self.list.head[0]);
    }

    /// Moves to the first entry whose key is `>= key`.
    pub fn seek(&mut self, key: Key) {
        self.position = Self::position_of(self.list.lower_bound(key));
    }

    /// Advances by one entry. From before-the-first this lands on the first entry.
    pub fn advance(&mut self) {
        self.position = match self.position {
            Position::BeforeFirst => Self::position_of(self.list.head[0]),
            Position::At(idx) => Self::position_of(self.list.nodes[idx].forward[0]),
            Position::AfterLast => Position::AfterLast,
        };
    }

    /// Whether the cursor is on an entry.
    pub fn valid(&self) -> bool {
        matches!(self.position, Position::At(_))
    }

    /// Key of the current entry.
    pub fn key(&self) -> Key {
        self.list.nodes[self.current()].key
    }

    /// Value of the current entry.
    pub fn value(&self) -> &'a Value {
        &self.list.nodes[self.current()].value
    }

    fn current(&self) -> usize {
        match self.position {
            Position::At(idx) => idx,
            other => panic!("skip list cursor dereferenced while {:?}", other),
        }
    }

    fn position_of(node: Option<usize>) -> Position {
        node.map_or(Position::AfterLast, Position::At)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_put_and_get() {
        let mut list = SkipList::with_seed(0.5, 7);
        assert!(list.put(10, b"ten".to_vec()));
        assert!(list.put(5, b"five".to_vec()));
        assert!(list.put(20, b"twenty".to_vec()));

        assert_eq!(list.get(5), Some(&b"five".to_vec()));
        assert_eq!(list.get(10), Some(&b"ten".to_vec()));
        assert_eq!(list.get(20), Some(&b"twenty".to_vec()));
        assert_eq!(list.get(15), None);
        assert_eq!(list.get(0), None);
        assert_eq!(list.get(u64::MAX), None);
        assert_eq!(list.len(), 3);
    }

    #[test]
    fn test_overwrite_in_place() {
        let mut list = SkipList::with_seed(0.5, 1);
        assert!(list.put(1, b"a".to_vec()));
        assert!(!list.put(1, b"b".to_vec()));

        assert_eq!(list.len(), 1);
        assert_eq!(list.get(1), Some(&b"b".to_vec()));
    }

    #[test]
    fn test_matches_btreemap() {
        let mut list = SkipList::with_seed(0.5, 42);
        let mut model = BTreeMap::new();

        let mut state = 12345u64;
        for i in 0..2000u64 {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            let key = state % 500;
            let value = i.to_string().into_bytes();
            list.put(key, value.clone());
            model.insert(key, value);
        }

        assert_eq!(list.len(), model.len());
        let collected: Vec<_> = list.iter().map(|(k, v)| (k, v.clone())).collect();
        let expected: Vec<_> = model.into_iter().collect();
        assert_eq!(collected, expected);
    }

    #[test]
    fn test_height_grows_one_level_at_a_time() {
        let mut list = SkipList::with_seed(0.9, 3);
        let mut previous = list.height();
        for key in 0..200u64 {
            list.put(key, Vec::new());
            assert!(list.height() <= previous + 1);
            previous = list.height();
        }
        assert!(list.height() > 1);
        assert!(list.height() <= MAX_HEIGHT);
    }

    #[test]
    fn test_lookups_are_deterministic() {
        let mut list = SkipList::with_seed(0.5, 9);
        for key in (0..1000u64).step_by(3) {
            list.put(key, key.to_le_bytes().to_vec());
        }
        for key in 0..1000u64 {
            assert_eq!(list.get(key), list.get(key));
            assert_eq!(list.get(key).is_some(), key % 3 == 0);
        }
    }

    #[test]
    fn test_clear() {
        let mut list = SkipList::with_seed(0.5, 5);
        for key in 0..100u64 {
            list.put(key, vec![1]);
        }
        list.clear();

        assert!(list.is_empty());
        assert_eq!(list.height(), 1);
        assert_eq!(list.get(3), None);
        assert_eq!(list.iter().count(), 0);

        list.put(3, vec![2]);
        assert_eq!(list.get(3), Some(&vec![2]));
    }

    #[test]
    fn test_iter_from() {
        let mut list = SkipList::with_seed(0.5, 11);
        for key in [10u64, 20, 30, 40] {
            list.put(key, Vec::new());
        }

        let keys: Vec<_> = list.iter_from(15).map(|(k, _)| k).collect();
        assert_eq!(keys, vec![20, 30, 40]);

        let keys: Vec<_> = list.iter_from(30).map(|(k, _)| k).collect();
        assert_eq!(keys, vec![30, 40]);

        assert_eq!(list.iter_from(41).count(), 0);
    }

    #[test]
    fn test_cursor_walk_and_restart() {
        let mut list = SkipList::with_seed(0.5, 13);
        for key in [3u64, 1, 2] {
            list.put(key, vec![key as u8]);
        }

        let mut cursor = list.cursor();
        assert!(!cursor.valid());

        let mut seen = Vec::new();
        cursor.advance();
        while cursor.valid() {
            seen.push((cursor.key(), cursor.value()[0]));
            cursor.advance();
        }
        assert_eq!(seen, vec![(1, 1), (2, 2), (3, 3)]);

        cursor.seek_to_first();
        assert_eq!(cursor.key(), 1);

        cursor.seek(2);
        assert_eq!(cursor.key(), 2);
    }

    #[test]
    #[should_panic]
    fn test_cursor_deref_before_first_panics() {
        let mut list = SkipList::with_seed(0.5, 17);
        list.put(1, Vec::new());
        let cursor = list.cursor();
        let _ = cursor.key();
    }

    #[test]
    #[should_panic]
    fn test_cursor_deref_after_last_panics() {
        let mut list = SkipList::with_seed(0.5, 19);
        list.put(1, Vec::new());
        let mut cursor = list.cursor();
        cursor.seek(2);
        let _ = cursor.value();
    }
}
