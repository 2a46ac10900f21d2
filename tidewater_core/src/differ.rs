// Copyright 2025 the Tidewater Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Keyed reconciliation of old and new item sequences.
//!
//! [`DataDiffer`] groups old and new indices by key and reports an edit script. In
//! [`DiffMode::OneToOne`] duplicate keys are paired in encounter order; in
//! [`DiffMode::Multiple`] duplicates form groups that are reported as many-to-one,
//! one-to-many or many-to-many updates. Every old index ends up in exactly one update or
//! remove, every new index in exactly one update or add.
//!
//! The edit script is delivered to a [`DiffVisitor`]; `Vec<DiffOp>` implements the visitor so
//! callers that need to mutate their own state while walking the script can collect it first.

use alloc::vec::Vec;
use core::hash::Hash;

use hashbrown::HashMap;
use smallvec::SmallVec;

type Indices = SmallVec<[usize; 2]>;

/// How duplicate keys are reported.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DiffMode {
    /// Old and new items are paired one to one; duplicates are consumed in order.
    #[default]
    OneToOne,
    /// Items sharing a key are grouped.
    Multiple,
}

/// One edit of a diff.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DiffOp {
    /// A new item with no old counterpart.
    Add(usize),
    /// A one-to-one pairing.
    Update {
        /// New index.
        new: usize,
        /// Old index.
        old: usize,
    },
    /// Several old items merge into one new item.
    ManyToOne {
        /// New index.
        new: usize,
        /// Old indices, ascending.
        old: Vec<usize>,
    },
    /// One old item splits into several new items.
    OneToMany {
        /// New indices, ascending.
        new: Vec<usize>,
        /// Old index.
        old: usize,
    },
    /// Two groups sharing a key.
    ManyToMany {
        /// New indices, ascending.
        new: Vec<usize>,
        /// Old indices, ascending.
        old: Vec<usize>,
    },
    /// An old item with no new counterpart.
    Remove(usize),
}

/// Receives the edit script of a [`DataDiffer`].
///
/// The grouped callbacks are only produced in [`DiffMode::Multiple`] and do nothing by
/// default.
pub trait DiffVisitor {
    /// A new item was added.
    fn add(&mut self, new: usize);
    /// An item was kept.
    fn update(&mut self, new: usize, old: usize);
    /// An old item was removed.
    fn remove(&mut self, old: usize);
    /// Several old items merge into one new item.
    fn update_many_to_one(&mut self, new: usize, old: &[usize]) {
        let _ = (new, old);
    }
    /// One old item splits into several new items.
    fn update_one_to_many(&mut self, new: &[usize], old: usize) {
        let _ = (new, old);
    }
    /// Groups on both sides share a key.
    fn update_many_to_many(&mut self, new: &[usize], old: &[usize]) {
        let _ = (new, old);
    }
}

impl DiffVisitor for Vec<DiffOp> {
    fn add(&mut self, new: usize) {
        self.push(DiffOp::Add(new));
    }

    fn update(&mut self, new: usize, old: usize) {
        self.push(DiffOp::Update { new, old });
    }

    fn remove(&mut self, old: usize) {
        self.push(DiffOp::Remove(old));
    }

    fn update_many_to_one(&mut self, new: usize, old: &[usize]) {
        self.push(DiffOp::ManyToOne {
            new,
            old: old.to_vec(),
        });
    }

    fn update_one_to_many(&mut self, new: &[usize], old: usize) {
        self.push(DiffOp::OneToMany {
            new: new.to_vec(),
            old,
        });
    }

    fn update_many_to_many(&mut self, new: &[usize], old: &[usize]) {
        self.push(DiffOp::ManyToMany {
            new: new.to_vec(),
            old: old.to_vec(),
        });
    }
}

/// Diff of two keyed sequences.
///
/// Keys are computed once at construction from `(item, position)`; the differ itself holds
/// only the keys.
#[derive(Clone, Debug)]
pub struct DataDiffer<K> {
    old_keys: Vec<K>,
    new_keys: Vec<K>,
    mode: DiffMode,
}

impl<K: Hash + Eq + Clone> DataDiffer<K> {
    /// Creates a differ over `old` and `new` with a key function per side.
    pub fn new<T, U>(
        old: &[T],
        new: &[U],
        mut old_key: impl FnMut(&T, usize) -> K,
        mut new_key: impl FnMut(&U, usize) -> K,
    ) -> Self {
        Self {
            old_keys: old.iter().enumerate().map(|(i, t)| old_key(t, i)).collect(),
            new_keys: new.iter().enumerate().map(|(i, u)| new_key(u, i)).collect(),
            mode: DiffMode::OneToOne,
        }
    }

    /// Creates a differ from precomputed keys.
    pub fn from_keys(old_keys: Vec<K>, new_keys: Vec<K>) -> Self {
        Self {
            old_keys,
            new_keys,
            mode: DiffMode::OneToOne,
        }
    }

    /// Sets the diff mode.
    pub fn with_mode(mut self, mode: DiffMode) -> Self {
        self.mode = mode;
        self
    }

    /// Runs the diff, reporting to `visitor`.
    pub fn execute(&self, visitor: &mut impl DiffVisitor) {
        match self.mode {
            DiffMode::OneToOne => self.execute_one_to_one(visitor),
            DiffMode::Multiple => self.execute_multiple(visitor),
        }
    }

    /// Runs the diff and returns the edit script.
    pub fn ops(&self) -> Vec<DiffOp> {
        let mut ops = Vec::new();
        self.execute(&mut ops);
        ops
    }

    fn execute_one_to_one(&self, visitor: &mut impl DiffVisitor) {
        // Stored reversed so that `pop` yields the earliest remaining index.
        let mut new_map = index_map(&self.new_keys);
        for indices in new_map.values_mut() {
            indices.reverse();
        }
        for (old, key) in self.old_keys.iter().enumerate() {
            match new_map.get_mut(key).and_then(|indices| indices.pop()) {
                Some(new) => visitor.update(new, old),
                None => visitor.remove(old),
            }
        }
        for key in &self.new_keys {
            if let Some(indices) = new_map.remove(key) {
                for new in indices.into_iter().rev() {
                    visitor.add(new);
                }
            }
        }
    }

    fn execute_multiple(&self, visitor: &mut impl DiffVisitor) {
        let old_map = index_map(&self.old_keys);
        let mut new_map = index_map(&self.new_keys);

        let mut seen = hashbrown::HashSet::with_capacity(old_map.len());
        for key in &self.old_keys {
            if !seen.insert(key) {
                continue;
            }
            let Some(old) = old_map.get(key) else {
                continue;
            };
            match new_map.remove(key) {
                Some(new) => match (old.len(), new.len()) {
                    (1, 1) => visitor.update(new[0], old[0]),
                    (_, 1) => visitor.update_many_to_one(new[0], old),
                    (1, _) => visitor.update_one_to_many(&new, old[0]),
                    _ => visitor.update_many_to_many(&new, old),
                },
                None => {
                    for &i in old {
                        visitor.remove(i);
                    }
                }
            }
        }
        for key in &self.new_keys {
            if let Some(indices) = new_map.remove(key) {
                for new in indices {
                    visitor.add(new);
                }
            }
        }
    }
}

fn index_map<K: Hash + Eq + Clone>(keys: &[K]) -> HashMap<K, Indices> {
    let mut map: HashMap<K, Indices> = HashMap::with_capacity(keys.len());
    for (i, key) in keys.iter().enumerate() {
        map.entry(key.clone()).or_default().push(i);
    }
    map
}

/// Resolves a many-to-many group into one-to-one pairs by a finer key.
///
/// `new` and `old` are the grouped indices reported by
/// [`DiffVisitor::update_many_to_many`]; `new_key` and `old_key` map an index of the
/// respective side to a key that is unique within the group (usually the item id). The
/// returned script refers to the original indices.
pub fn resolve_many_to_many<K: Hash + Eq + Clone>(
    new: &[usize],
    old: &[usize],
    mut new_key: impl FnMut(usize) -> K,
    mut old_key: impl FnMut(usize) -> K,
) -> Vec<DiffOp> {
    let differ = DataDiffer::new(old, new, |&i, _| old_key(i), |&i, _| new_key(i));
    differ
        .ops()
        .into_iter()
        .map(|op| match op {
            DiffOp::Add(n) => DiffOp::Add(new[n]),
            DiffOp::Update { new: n, old: o } => DiffOp::Update {
                new: new[n],
                old: old[o],
            },
            DiffOp::Remove(o) => DiffOp::Remove(old[o]),
            grouped => grouped,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    extern crate std;

    use alloc::vec;

    use super::*;

    fn keyed(old: &[&'static str], new: &[&'static str], mode: DiffMode) -> Vec<DiffOp> {
        DataDiffer::new(old, new, |k, _| *k, |k, _| *k)
            .with_mode(mode)
            .ops()
    }

    /// Checks every old and new index is covered exactly once.
    fn assert_complete(ops: &[DiffOp], old_len: usize, new_len: usize) {
        let mut old_seen = vec![0_u32; old_len];
        let mut new_seen = vec![0_u32; new_len];
        for op in ops {
            match op {
                DiffOp::Add(n) => new_seen[*n] += 1,
                DiffOp::Remove(o) => old_seen[*o] += 1,
                DiffOp::Update { new, old } => {
                    new_seen[*new] += 1;
                    old_seen[*old] += 1;
                }
                DiffOp::ManyToOne { new, old } => {
                    new_seen[*new] += 1;
                    old.iter().for_each(|o| old_seen[*o] += 1);
                }
                DiffOp::OneToMany { new, old } => {
                    new.iter().for_each(|n| new_seen[*n] += 1);
                    old_seen[*old] += 1;
                }
                DiffOp::ManyToMany { new, old } => {
                    new.iter().for_each(|n| new_seen[*n] += 1);
                    old.iter().for_each(|o| old_seen[*o] += 1);
                }
            }
        }
        assert!(old_seen.iter().all(|c| *c == 1), "old coverage {old_seen:?}");
        assert!(new_seen.iter().all(|c| *c == 1), "new coverage {new_seen:?}");
    }

    #[test]
    fn one_to_one_updates_removes_and_adds() {
        let ops = keyed(&["a", "b", "c"], &["b", "c", "d"], DiffMode::OneToOne);
        assert_eq!(
            ops,
            vec![
                DiffOp::Remove(0),
                DiffOp::Update { new: 0, old: 1 },
                DiffOp::Update { new: 1, old: 2 },
                DiffOp::Add(2),
            ]
        );
    }

    #[test]
    fn one_to_one_consumes_duplicates_in_order() {
        let ops = keyed(&["x", "x"], &["x", "y", "x", "x"], DiffMode::OneToOne);
        assert_eq!(
            ops,
            vec![
                DiffOp::Update { new: 0, old: 0 },
                DiffOp::Update { new: 2, old: 1 },
                DiffOp::Add(3),
                DiffOp::Add(1),
            ]
        );
        assert_complete(&ops, 2, 4);
    }

    #[test]
    fn many_old_items_merge_into_one() {
        let ops = keyed(&["g", "g"], &["g"], DiffMode::Multiple);
        assert_eq!(
            ops,
            vec![DiffOp::ManyToOne {
                new: 0,
                old: vec![0, 1]
            }]
        );
    }

    #[test]
    fn grouped_categories() {
        let old = ["a", "b", "b", "c", "d", "d"];
        let new = ["a", "a", "b", "d", "d", "e"];
        let ops = keyed(&old, &new, DiffMode::Multiple);
        assert_eq!(
            ops,
            vec![
                DiffOp::OneToMany {
                    new: vec![0, 1],
                    old: 0
                },
                DiffOp::ManyToOne {
                    new: 2,
                    old: vec![1, 2]
                },
                DiffOp::Remove(3),
                DiffOp::ManyToMany {
                    new: vec![3, 4],
                    old: vec![4, 5]
                },
                DiffOp::Add(5),
            ]
        );
        assert_complete(&ops, old.len(), new.len());
    }

    #[test]
    fn many_to_many_resolves_by_id() {
        // (id, group)
        let old = [(1, "x"), (2, "x")];
        let new = [(2, "x"), (1, "x")];
        let ops = DataDiffer::new(&old, &new, |it, _| it.1, |it, _| it.1)
            .with_mode(DiffMode::Multiple)
            .ops();
        let [DiffOp::ManyToMany { new: n, old: o }] = ops.as_slice() else {
            panic!("expected one many-to-many group, got {ops:?}");
        };
        let pairs = resolve_many_to_many(n, o, |i| new[i].0, |i| old[i].0);
        assert_eq!(
            pairs,
            vec![
                DiffOp::Update { new: 1, old: 0 },
                DiffOp::Update { new: 0, old: 1 },
            ]
        );
    }

    #[test]
    fn disjoint_and_empty_sides() {
        assert_eq!(
            keyed(&[], &["a"], DiffMode::OneToOne),
            vec![DiffOp::Add(0)]
        );
        assert_eq!(
            keyed(&["a", "a"], &[], DiffMode::Multiple),
            vec![DiffOp::Remove(0), DiffOp::Remove(1)]
        );
        assert!(keyed(&[], &[], DiffMode::Multiple).is_empty());
    }

    #[test]
    fn coverage_holds_for_mixed_sequences() {
        let seqs: [&[&str]; 5] = [
            &["a", "b", "a", "c"],
            &["c", "c", "c"],
            &["b", "d", "a", "d", "e"],
            &[],
            &["a"],
        ];
        for old in seqs {
            for new in seqs {
                for mode in [DiffMode::OneToOne, DiffMode::Multiple] {
                    let ops = keyed(old, new, mode);
                    assert_complete(&ops, old.len(), new.len());
                }
            }
        }
    }
}
