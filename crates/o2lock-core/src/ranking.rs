//! Bounded Top-N ranking of clusters by key index.
//!
//! Below capacity entries are kept in arrival order. The first time the
//! ranking fills up it is sorted descending once; from then on every insert
//! lands at its binary-searched position and the smallest entry is dropped.
//! The ranking is rebuilt every cycle, so the order only has to hold for the
//! lifetime of one ranking.

use crate::cluster::LockCluster;

/// Default number of clusters kept per cycle.
pub const DEFAULT_CAPACITY: usize = 600;

/// Something that can be ranked.
pub trait Ranked {
    fn key_index(&self) -> f64;
    fn inode(&self) -> u64;
}

impl Ranked for LockCluster<'_> {
    fn key_index(&self) -> f64 {
        LockCluster::key_index(self)
    }

    fn inode(&self) -> u64 {
        LockCluster::inode(self)
    }
}

#[derive(Debug)]
struct Entry<T> {
    key: f64,
    item: T,
}

/// Capacity-limited collection ordered by descending key index.
#[derive(Debug)]
pub struct TopNRanking<T> {
    entries: Vec<Entry<T>>,
    capacity: usize,
    sorted: bool,
}

impl<T: Ranked> TopNRanking<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            capacity,
            sorted: false,
        }
    }

    pub fn insert(&mut self, item: T) {
        let key = item.key_index();

        if self.entries.len() < self.capacity {
            self.entries.push(Entry { key, item });
            if self.entries.len() == self.capacity {
                self.sort();
            }
            return;
        }

        if key == 0.0 {
            return;
        }

        let idx = self.entries.partition_point(|e| e.key > key);
        if idx == self.entries.len() {
            return;
        }
        self.entries.insert(idx, Entry { key, item });
        self.entries.pop();
    }

    fn sort(&mut self) {
        self.entries.sort_by(|a, b| b.key.total_cmp(&a.key));
        self.sorted = true;
    }

    /// Best `n` entries with a non-zero key.
    ///
    /// Unless `debug` is set, entries whose inode is at or below
    /// `inode_floor` (filesystem metadata) are skipped.
    pub fn top(&mut self, n: usize, inode_floor: u64, debug: bool) -> Vec<&T> {
        if !self.sorted {
            self.sort();
        }
        self.entries
            .iter()
            .filter(|e| debug || e.item.inode() > inode_floor)
            .take(n)
            .filter(|e| e.key != 0.0)
            .map(|e| &e.item)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_sorted(&self) -> bool {
        self.sorted
    }

    /// Keys in storage order.
    pub fn keys(&self) -> impl Iterator<Item = f64> + '_ {
        self.entries.iter().map(|e| e.key)
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.entries.iter().map(|e| &e.item)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq)]
    struct Item {
        key: f64,
        inode: u64,
    }

    impl Ranked for Item {
        fn key_index(&self) -> f64 {
            self.key
        }

        fn inode(&self) -> u64 {
            self.inode
        }
    }

    fn item(key: f64, inode: u64) -> Item {
        Item { key, inode }
    }

    fn ranking_of(capacity: usize, keys: &[f64]) -> TopNRanking<Item> {
        let mut ranking = TopNRanking::new(capacity);
        for (i, &key) in keys.iter().enumerate() {
            ranking.insert(item(key, 100 + i as u64));
        }
        ranking
    }

    #[test]
    fn test_unsorted_below_capacity() {
        let ranking = ranking_of(4, &[1.0, 3.0, 2.0]);
        assert!(!ranking.is_sorted());
        assert_eq!(ranking.keys().collect::<Vec<_>>(), [1.0, 3.0, 2.0]);
    }

    #[test]
    fn test_sorted_when_capacity_reached() {
        let ranking = ranking_of(3, &[1.0, 3.0, 2.0]);
        assert!(ranking.is_sorted());
        assert_eq!(ranking.keys().collect::<Vec<_>>(), [3.0, 2.0, 1.0]);
    }

    #[test]
    fn test_insert_at_capacity_evicts_smallest() {
        let mut ranking = ranking_of(3, &[1.0, 3.0, 2.0]);
        ranking.insert(item(2.5, 1));
        assert_eq!(ranking.keys().collect::<Vec<_>>(), [3.0, 2.5, 2.0]);

        ranking.insert(item(f64::INFINITY, 2));
        assert_eq!(ranking.keys().collect::<Vec<_>>(), [f64::INFINITY, 3.0, 2.5]);
    }

    #[test]
    fn test_insert_smaller_than_all_is_dropped() {
        let mut ranking = ranking_of(2, &[5.0, 4.0]);
        ranking.insert(item(1.0, 1));
        assert_eq!(ranking.keys().collect::<Vec<_>>(), [5.0, 4.0]);
    }

    #[test]
    fn test_tie_goes_before_existing() {
        let mut ranking = ranking_of(3, &[3.0, 2.0, 1.0]);
        ranking.insert(item(2.0, 7));
        let inodes: Vec<u64> = ranking.iter().map(|i| i.inode).collect();
        assert_eq!(inodes, [100, 7, 101]);
    }

    #[test]
    fn test_zero_key_at_capacity_is_discarded() {
        let mut ranking = ranking_of(2, &[0.0, 0.0]);
        ranking.insert(item(0.0, 1));
        assert!(ranking.iter().all(|i| i.inode != 1));
    }

    #[test]
    fn test_top_applies_inode_floor() {
        let mut ranking = TopNRanking::new(10);
        ranking.insert(item(9.0, 5));
        ranking.insert(item(8.0, 20));
        ranking.insert(item(7.0, 30));
        ranking.insert(item(6.0, 40));

        let top: Vec<u64> = ranking.top(2, 10, false).iter().map(|i| i.inode).collect();
        assert_eq!(top, [20, 30]);

        let top: Vec<u64> = ranking.top(2, 10, true).iter().map(|i| i.inode).collect();
        assert_eq!(top, [5, 20]);
    }

    #[test]
    fn test_top_drops_zero_keys() {
        let mut ranking = ranking_of(10, &[0.0, 4.0, 0.0]);
        let top = ranking.top(3, 0, false);
        assert_eq!(top.len(), 1);
        assert!((top[0].key - 4.0).abs() < f64::EPSILON);

        assert!(ranking_of(5, &[0.0, 0.0]).top(5, 0, true).is_empty());
    }

    #[test]
    fn test_zero_capacity_keeps_nothing() {
        let mut ranking = ranking_of(0, &[1.0, 2.0]);
        assert!(ranking.is_empty());
        assert!(ranking.top(5, 0, true).is_empty());
    }
}

#[cfg(test)]
mod proptest_tests {
    use super::*;
    use proptest::prelude::*;

    #[derive(Debug, Clone, Copy)]
    struct Item(f64, u64);

    impl Ranked for Item {
        fn key_index(&self) -> f64 {
            self.0
        }

        fn inode(&self) -> u64 {
            self.1
        }
    }

    fn key_strategy() -> impl Strategy<Value = f64> {
        prop_oneof![
            3 => (1u32..10_000).prop_map(f64::from),
            1 => Just(0.0),
            1 => Just(f64::INFINITY),
        ]
    }

    fn is_descending(keys: &[f64]) -> bool {
        keys.windows(2).all(|w| w[0] >= w[1])
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(500))]

        #[test]
        fn test_size_never_exceeds_capacity(
            capacity in 0usize..40,
            keys in prop::collection::vec(key_strategy(), 0..200),
        ) {
            let mut ranking = TopNRanking::new(capacity);
            for (i, key) in keys.into_iter().enumerate() {
                ranking.insert(Item(key, i as u64));
                prop_assert!(ranking.len() <= capacity);
            }
        }

        #[test]
        fn test_sorted_from_capacity_onwards(
            capacity in 1usize..40,
            keys in prop::collection::vec(key_strategy(), 0..200),
        ) {
            let mut ranking = TopNRanking::new(capacity);
            for (i, key) in keys.into_iter().enumerate() {
                ranking.insert(Item(key, i as u64));
                if i + 1 >= capacity {
                    let stored: Vec<f64> = ranking.keys().collect();
                    prop_assert!(ranking.is_sorted());
                    prop_assert!(is_descending(&stored), "not descending: {:?}", stored);
                }
            }
        }

        #[test]
        fn test_zero_key_never_changes_full_ranking(
            capacity in 1usize..40,
            keys in prop::collection::vec(key_strategy(), 40..120),
        ) {
            let mut ranking = TopNRanking::new(capacity);
            for (i, key) in keys.into_iter().enumerate() {
                ranking.insert(Item(key, i as u64));
            }
            let before: Vec<u64> = ranking.iter().map(|i| i.1).collect();
            ranking.insert(Item(0.0, u64::MAX));
            let after: Vec<u64> = ranking.iter().map(|i| i.1).collect();
            prop_assert_eq!(before, after);
        }

        #[test]
        fn test_top_respects_floor(
            keys in prop::collection::vec((key_strategy(), 0u64..64), 0..100),
            floor in 0u64..64,
            n in 0usize..30,
        ) {
            let mut ranking = TopNRanking::new(50);
            for (key, inode) in keys {
                ranking.insert(Item(key, inode));
            }
            let top = ranking.top(n, floor, false);
            prop_assert!(top.len() <= n);
            prop_assert!(top.iter().all(|i| i.1 > floor && i.0 != 0.0));
        }
    }
}
