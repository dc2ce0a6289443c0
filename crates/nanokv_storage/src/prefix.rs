//! Prefix-scoped view of a bucket.

use crate::bucket::{Committer, CrudBucket, KeyIter, KeysPrefixTraversingBucket, TxnCrudBucket};
use crate::context::Context;
use crate::error::{KvError, KvResult};

/// A view of a bucket restricted to keys under a fixed prefix.
///
/// Every key is stored in the wrapped bucket as `prefix + key`, and
/// enumeration yields keys with the prefix stripped. Several views with
/// distinct prefixes can share one backend without seeing each other's keys.
///
/// If the wrapped bucket supports transactions, so does the view; its
/// transactions are views over the wrapped bucket's transactions.
///
/// ```rust
/// use nanokv_storage::{helpers, Context, CrudBucket, MemoryBucket, PrefixBucket};
///
/// let ctx = Context::background();
/// let backend = MemoryBucket::new();
/// let users = PrefixBucket::new(backend.clone(), "users/");
/// users.set(&ctx, "alice", b"admin").unwrap();
///
/// assert_eq!(backend.get(&ctx, "users/alice").unwrap(), b"admin");
/// assert_eq!(helpers::all_keys(&ctx, &users).unwrap(), vec!["alice"]);
/// ```
#[derive(Debug, Clone)]
pub struct PrefixBucket<B> {
    bucket: B,
    prefix: String,
}

impl<B> PrefixBucket<B> {
    /// Creates a view of `bucket` under `prefix`.
    pub fn new(bucket: B, prefix: impl Into<String>) -> Self {
        Self {
            bucket,
            prefix: prefix.into(),
        }
    }

    /// Returns the prefix.
    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Returns the wrapped bucket.
    #[must_use]
    pub fn inner(&self) -> &B {
        &self.bucket
    }

    /// Unwraps the view.
    pub fn into_inner(self) -> B {
        self.bucket
    }

    fn full_key(&self, key: &str) -> String {
        let mut full = String::with_capacity(self.prefix.len() + key.len());
        full.push_str(&self.prefix);
        full.push_str(key);
        full
    }
}

impl<B: CrudBucket> CrudBucket for PrefixBucket<B> {
    fn get(&self, ctx: &Context, key: &str) -> KvResult<Vec<u8>> {
        // Report the key the caller asked for, not the stored one.
        self.bucket
            .get(ctx, &self.full_key(key))
            .map_err(|err| match err {
                KvError::KeyNotFound { .. } => KvError::key_not_found(key),
                other => other,
            })
    }

    fn set(&self, ctx: &Context, key: &str, value: &[u8]) -> KvResult<()> {
        self.bucket.set(ctx, &self.full_key(key), value)
    }

    fn delete(&self, ctx: &Context, key: &str) -> KvResult<()> {
        self.bucket.delete(ctx, &self.full_key(key))
    }
}

impl<B: KeysPrefixTraversingBucket> KeysPrefixTraversingBucket for PrefixBucket<B> {
    fn keys(&self, ctx: &Context) -> KvResult<KeyIter<'_>> {
        self.keys_prefix(ctx, "")
    }

    fn keys_prefix(&self, ctx: &Context, prefix: &str) -> KvResult<KeyIter<'_>> {
        let strip = self.prefix.len();
        let keys = self.bucket.keys_prefix(ctx, &self.full_key(prefix))?;
        Ok(Box::new(keys.map(move |key| key.map(|mut key| key.split_off(strip)))))
    }
}

impl<B: Committer> Committer for PrefixBucket<B> {
    fn commit(&self, ctx: &Context) -> KvResult<()> {
        self.bucket.commit(ctx)
    }

    fn rollback(&self, ctx: &Context) -> KvResult<()> {
        self.bucket.rollback(ctx)
    }
}

impl<B: TxnCrudBucket> TxnCrudBucket for PrefixBucket<B> {
    type Txn = PrefixBucket<B::Txn>;

    fn begin_crud_txn(&self, ctx: &Context) -> KvResult<Self::Txn> {
        let txn = self.bucket.begin_crud_txn(ctx)?;
        Ok(PrefixBucket::new(txn, self.prefix.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::helpers::{all_keys, all_keys_prefix};
    use crate::memory::MemoryBucket;

    #[test]
    fn views_are_isolated() {
        let ctx = Context::background();
        let backend = MemoryBucket::new();
        let a = PrefixBucket::new(backend.clone(), "a:");
        let b = PrefixBucket::new(backend.clone(), "b:");

        a.set(&ctx, "k", b"from a").unwrap();
        b.set(&ctx, "k", b"from b").unwrap();

        assert_eq!(a.get(&ctx, "k").unwrap(), b"from a");
        assert_eq!(b.get(&ctx, "k").unwrap(), b"from b");
        assert_eq!(all_keys(&ctx, &a).unwrap(), vec!["k"]);
        assert_eq!(backend.len(), 2);
    }

    #[test]
    fn not_found_names_unprefixed_key() {
        let ctx = Context::background();
        let view = PrefixBucket::new(MemoryBucket::new(), "ns/");
        match view.get(&ctx, "missing") {
            Err(KvError::KeyNotFound { key }) => assert_eq!(key, "missing"),
            other => panic!("expected KeyNotFound, got {other:?}"),
        }
    }

    #[test]
    fn nested_prefix_scan() {
        let ctx = Context::background();
        let backend = MemoryBucket::with_data([
            ("ns/hello", ""),
            ("ns/help", ""),
            ("ns/foo", ""),
            ("hello", ""),
        ]);
        let view = PrefixBucket::new(backend, "ns/");
        let mut keys = all_keys_prefix(&ctx, &view, "hel").unwrap();
        keys.sort();
        assert_eq!(keys, vec!["hello", "help"]);
    }

    #[test]
    fn transactions_stay_scoped() {
        let ctx = Context::background();
        let backend = MemoryBucket::new();
        let view = PrefixBucket::new(backend.clone(), "ns/");

        let txn = view.begin_crud_txn(&ctx).unwrap();
        txn.set(&ctx, "k", b"v").unwrap();
        assert_eq!(all_keys(&ctx, &txn).unwrap(), vec!["k"]);
        txn.commit(&ctx).unwrap();

        assert_eq!(backend.get(&ctx, "ns/k").unwrap(), b"v");
    }
}
