//! Transaction state and the mutation log.
//!
//! A transaction buffers its writes in a [`MutationLog`] that overlays the
//! parent bucket: reads consult the log first and fall back to the parent
//! only for keys the transaction has not touched.

use crate::bucket::KeyIter;
use crate::error::{KvError, KvResult};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::ops::Bound;

/// Lifecycle state of a transaction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TxnState {
    /// The transaction accepts reads and writes.
    #[default]
    Active,
    /// The transaction was committed.
    Committed,
    /// The transaction was rolled back, or its commit failed.
    RolledBack,
}

impl TxnState {
    /// Returns true while the transaction accepts writes.
    #[must_use]
    pub fn is_active(self) -> bool {
        self == Self::Active
    }

    /// Fails with [`KvError::TxnClosed`] unless the state is active.
    ///
    /// # Errors
    ///
    /// Returns [`KvError::TxnClosed`] for a terminal state.
    pub fn ensure_active(self) -> KvResult<()> {
        match self {
            Self::Active => Ok(()),
            state => Err(KvError::TxnClosed { state }),
        }
    }
}

impl fmt::Display for TxnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Active => "active",
            Self::Committed => "committed",
            Self::RolledBack => "rolled back",
        })
    }
}

/// A buffered mutation of a single key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    /// Create or overwrite the key.
    Set(Vec<u8>),
    /// Remove the key.
    Delete,
}

/// The uncommitted writes of a transaction.
///
/// Only the last mutation per key is kept: a later set or delete of the
/// same key replaces the earlier one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MutationLog {
    ops: BTreeMap<String, Mutation>,
}

impl MutationLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a set of `key` to `value`.
    pub fn set(&mut self, key: &str, value: &[u8]) {
        self.ops.insert(key.to_owned(), Mutation::Set(value.to_vec()));
    }

    /// Records a delete of `key`.
    pub fn delete(&mut self, key: &str) {
        self.ops.insert(key.to_owned(), Mutation::Delete);
    }

    /// Returns the pending mutation for `key`, if any.
    #[must_use]
    pub fn lookup(&self, key: &str) -> Option<&Mutation> {
        self.ops.get(key)
    }

    /// Resolves a read of `key` against the log, calling `parent` only if
    /// the key is untouched.
    ///
    /// # Errors
    ///
    /// Returns [`KvError::KeyNotFound`] for a key deleted in the log, or
    /// whatever `parent` returns.
    pub fn read_through<F>(&self, key: &str, parent: F) -> KvResult<Vec<u8>>
    where
        F: FnOnce() -> KvResult<Vec<u8>>,
    {
        match self.ops.get(key) {
            Some(Mutation::Set(value)) => Ok(value.clone()),
            Some(Mutation::Delete) => Err(KvError::key_not_found(key)),
            None => parent(),
        }
    }

    /// Overlays the log onto `parent`, a scan of parent keys starting with
    /// `prefix`.
    ///
    /// Parent keys touched by the log are dropped, then keys set in the log
    /// under `prefix` are appended, so each visible key appears once.
    pub fn merge_keys<'a>(&self, parent: KeyIter<'a>, prefix: &str) -> KeyIter<'a> {
        let touched: HashSet<String> = self.ops.keys().cloned().collect();
        let added: Vec<String> = self
            .ops
            .range::<str, _>((Bound::Included(prefix), Bound::Unbounded))
            .take_while(|(key, _)| key.starts_with(prefix))
            .filter(|(_, mutation)| matches!(mutation, Mutation::Set(_)))
            .map(|(key, _)| key.clone())
            .collect();

        Box::new(
            parent
                .filter(move |key| match key {
                    Ok(key) => !touched.contains(key),
                    Err(_) => true,
                })
                .chain(added.into_iter().map(Ok)),
        )
    }

    /// Iterates the pending mutations in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Mutation)> {
        self.ops.iter().map(|(key, mutation)| (key.as_str(), mutation))
    }

    /// Returns the number of touched keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Returns true if nothing has been written.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Discards every pending mutation.
    pub fn clear(&mut self) {
        self.ops.clear();
    }

    /// Applies the log to an in-memory map.
    pub fn apply_to(&self, map: &mut BTreeMap<String, Vec<u8>>) {
        for (key, mutation) in &self.ops {
            match mutation {
                Mutation::Set(value) => {
                    map.insert(key.clone(), value.clone());
                }
                Mutation::Delete => {
                    map.remove(key);
                }
            }
        }
    }
}

/// Mutable core shared by the transaction handles in this crate.
#[derive(Debug, Default)]
pub(crate) struct TxnCore {
    pub(crate) state: TxnState,
    pub(crate) log: MutationLog,
}

impl TxnCore {
    /// Returns the log for writing, if the transaction is still active.
    pub(crate) fn writable(&mut self) -> KvResult<&mut MutationLog> {
        self.state.ensure_active()?;
        Ok(&mut self.log)
    }

    /// Moves to a terminal state and hands back the log.
    pub(crate) fn finish(&mut self, state: TxnState) -> KvResult<MutationLog> {
        self.state.ensure_active()?;
        self.state = state;
        Ok(std::mem::take(&mut self.log))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys_of(iter: KeyIter<'_>) -> Vec<String> {
        let mut keys: Vec<String> = iter.map(Result::unwrap).collect();
        keys.sort();
        keys
    }

    fn parent(keys: &[&str]) -> KeyIter<'static> {
        let keys: Vec<String> = keys.iter().map(|k| (*k).to_owned()).collect();
        Box::new(keys.into_iter().map(Ok))
    }

    #[test]
    fn later_mutation_replaces_earlier() {
        let mut log = MutationLog::new();
        log.set("a", b"1");
        log.delete("a");
        assert_eq!(log.len(), 1);
        assert_eq!(log.lookup("a"), Some(&Mutation::Delete));

        log.set("a", b"2");
        assert_eq!(log.lookup("a"), Some(&Mutation::Set(b"2".to_vec())));
    }

    #[test]
    fn read_through_prefers_log() {
        let mut log = MutationLog::new();
        log.set("a", b"mine");
        log.delete("b");

        let a = log.read_through("a", || Ok(b"parent".to_vec())).unwrap();
        assert_eq!(a, b"mine");

        let b = log.read_through("b", || Ok(b"parent".to_vec()));
        assert!(b.unwrap_err().is_not_found());

        let c = log.read_through("c", || Ok(b"parent".to_vec())).unwrap();
        assert_eq!(c, b"parent");
    }

    #[test]
    fn merge_keys_hides_deletes_and_dedups_sets() {
        let mut log = MutationLog::new();
        log.set("hello", b"world");
        log.set("help", b"me");
        log.delete("helium");
        log.set("foo", b"bar");

        let merged = log.merge_keys(parent(&["hello", "helium", "helmet"]), "hel");
        assert_eq!(keys_of(merged), vec!["hello", "helmet", "help"]);

        let all = log.merge_keys(parent(&["hello", "helium", "zed"]), "");
        assert_eq!(keys_of(all), vec!["foo", "hello", "help", "zed"]);
    }

    #[test]
    fn apply_to_map() {
        let mut map = BTreeMap::new();
        map.insert("gone".to_owned(), b"x".to_vec());
        map.insert("kept".to_owned(), b"y".to_vec());

        let mut log = MutationLog::new();
        log.delete("gone");
        log.set("new", b"z");
        log.apply_to(&mut map);

        assert_eq!(map.len(), 2);
        assert!(!map.contains_key("gone"));
        assert_eq!(map["new"], b"z");
    }

    #[test]
    fn core_rejects_writes_after_finish() {
        let mut core = TxnCore::default();
        core.writable().unwrap().set("a", b"1");

        let log = core.finish(TxnState::Committed).unwrap();
        assert_eq!(log.len(), 1);
        assert!(core.log.is_empty());

        let err = core.writable().unwrap_err();
        assert!(matches!(
            err,
            KvError::TxnClosed {
                state: TxnState::Committed
            }
        ));
        assert!(core.finish(TxnState::RolledBack).is_err());
    }

    mod props {
        use super::*;
        use proptest::prelude::*;
        use std::collections::BTreeSet;

        fn key() -> impl Strategy<Value = String> {
            "[ab]{0,3}"
        }

        proptest! {
            #[test]
            fn merge_keys_matches_applied_map(
                parent_keys in prop::collection::btree_set(key(), 0..8),
                writes in prop::collection::vec((key(), any::<bool>()), 0..12),
                prefix in "[ab]{0,2}",
            ) {
                let mut log = MutationLog::new();
                for (key, is_set) in &writes {
                    if *is_set {
                        log.set(key, b"v");
                    } else {
                        log.delete(key);
                    }
                }

                let mut map: BTreeMap<String, Vec<u8>> =
                    parent_keys.iter().map(|k| (k.clone(), Vec::new())).collect();
                log.apply_to(&mut map);
                let want: Vec<String> = map
                    .into_keys()
                    .filter(|k| k.starts_with(&prefix))
                    .collect();

                let visible: Vec<String> = parent_keys
                    .iter()
                    .filter(|k| k.starts_with(&prefix))
                    .cloned()
                    .collect();
                let have = keys_of(log.merge_keys(Box::new(visible.into_iter().map(Ok)), &prefix));
                let unique: BTreeSet<&String> = have.iter().collect();
                prop_assert_eq!(unique.len(), have.len());
                prop_assert_eq!(have, want);
            }
        }
    }
}
