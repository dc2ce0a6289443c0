//! Property-based test generators using proptest.
//!
//! Keys are drawn from a small alphabet so that generated operations
//! collide often and prefixes actually match something.

use nanokv_storage::{Context, CrudBucket, KvResult};
use proptest::prelude::*;
use std::collections::BTreeMap;

/// Strategy for generating keys, including the empty key.
pub fn key_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[abc/]{0,6}").expect("Invalid regex")
}

/// Strategy for generating key prefixes, shorter than keys.
pub fn prefix_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[abc/]{0,3}").expect("Invalid regex")
}

/// Strategy for generating values (arbitrary bytes, possibly empty).
pub fn value_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..32)
}

/// Strategy for generating the initial contents of a bucket.
pub fn contents_strategy() -> impl Strategy<Value = BTreeMap<String, Vec<u8>>> {
    prop::collection::btree_map(key_strategy(), value_strategy(), 0..16)
}

/// A single write against a bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    /// Set a key to a value.
    Set(String, Vec<u8>),
    /// Delete a key.
    Delete(String),
}

impl Op {
    /// Applies the write to a bucket.
    pub fn apply<B: CrudBucket + ?Sized>(&self, ctx: &Context, bucket: &B) -> KvResult<()> {
        match self {
            Self::Set(key, value) => bucket.set(ctx, key, value),
            Self::Delete(key) => bucket.delete(ctx, key),
        }
    }

    /// Applies the write to a reference model.
    pub fn apply_to_model(&self, model: &mut BTreeMap<String, Vec<u8>>) {
        match self {
            Self::Set(key, value) => {
                model.insert(key.clone(), value.clone());
            }
            Self::Delete(key) => {
                model.remove(key);
            }
        }
    }
}

/// Strategy for generating a single write.
pub fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (key_strategy(), value_strategy()).prop_map(|(k, v)| Op::Set(k, v)),
        1 => key_strategy().prop_map(Op::Delete),
    ]
}

/// Strategy for generating a sequence of writes.
pub fn ops_strategy(max_len: usize) -> impl Strategy<Value = Vec<Op>> {
    prop::collection::vec(op_strategy(), 0..max_len)
}
