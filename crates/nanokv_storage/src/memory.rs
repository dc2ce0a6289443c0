//! In-memory bucket with snapshot transactions.

use crate::bucket::{Committer, CrudBucket, KeyIter, KeysPrefixTraversingBucket, TxnCrudBucket};
use crate::context::Context;
use crate::error::{KvError, KvResult};
use crate::txn::{TxnCore, TxnState};
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;
use tracing::debug;

type Map = BTreeMap<String, Vec<u8>>;

fn prefix_scan(map: &Map, prefix: &str) -> Vec<String> {
    map.range::<str, _>((Bound::Included(prefix), Bound::Unbounded))
        .take_while(|(key, _)| key.starts_with(prefix))
        .map(|(key, _)| key.clone())
        .collect()
}

/// An in-memory bucket.
///
/// Suitable for:
/// - Unit and conformance tests
/// - Ephemeral state that doesn't need persistence
///
/// Cloning yields another handle to the same bucket.
///
/// # Transactions
///
/// [`begin_crud_txn`](TxnCrudBucket::begin_crud_txn) captures the current
/// contents as an immutable snapshot. Reads through the transaction see
/// that snapshot plus the transaction's own writes, regardless of later
/// writes to the bucket. Commit applies the whole mutation log under the
/// write lock, so no reader observes it half applied. Concurrent
/// transactions are allowed and the last one to commit wins per key.
///
/// # Example
///
/// ```rust
/// use nanokv_storage::{Committer, Context, CrudBucket, MemoryBucket, TxnCrudBucket};
///
/// let ctx = Context::background();
/// let bucket = MemoryBucket::new();
/// bucket.set(&ctx, "greeting", b"hello").unwrap();
///
/// let txn = bucket.begin_crud_txn(&ctx).unwrap();
/// txn.set(&ctx, "greeting", b"goodbye").unwrap();
/// assert_eq!(bucket.get(&ctx, "greeting").unwrap(), b"hello");
///
/// txn.commit(&ctx).unwrap();
/// assert_eq!(bucket.get(&ctx, "greeting").unwrap(), b"goodbye");
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryBucket {
    state: Arc<RwLock<Arc<Map>>>,
}

impl MemoryBucket {
    /// Creates a new empty bucket.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a bucket pre-populated with `pairs`.
    #[must_use]
    pub fn with_data<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Vec<u8>>,
    {
        let map: Map = pairs
            .into_iter()
            .map(|(key, value)| (key.into(), value.into()))
            .collect();
        Self {
            state: Arc::new(RwLock::new(Arc::new(map))),
        }
    }

    /// Returns a copy of the current contents.
    ///
    /// Useful for testing and debugging.
    #[must_use]
    pub fn data(&self) -> BTreeMap<String, Vec<u8>> {
        (**self.state.read()).clone()
    }

    /// Returns the number of keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.read().len()
    }

    /// Returns true if the bucket holds no keys.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.read().is_empty()
    }

    fn snapshot(&self) -> Arc<Map> {
        Arc::clone(&self.state.read())
    }
}

impl CrudBucket for MemoryBucket {
    fn get(&self, ctx: &Context, key: &str) -> KvResult<Vec<u8>> {
        ctx.check()?;
        self.state
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| KvError::key_not_found(key))
    }

    fn set(&self, ctx: &Context, key: &str, value: &[u8]) -> KvResult<()> {
        ctx.check()?;
        let mut state = self.state.write();
        Arc::make_mut(&mut state).insert(key.to_owned(), value.to_vec());
        Ok(())
    }

    fn delete(&self, ctx: &Context, key: &str) -> KvResult<()> {
        ctx.check()?;
        let mut state = self.state.write();
        // Avoid copying a snapshotted map for a no-op.
        if state.contains_key(key) {
            Arc::make_mut(&mut state).remove(key);
        }
        Ok(())
    }
}

impl KeysPrefixTraversingBucket for MemoryBucket {
    fn keys(&self, ctx: &Context) -> KvResult<KeyIter<'_>> {
        ctx.check()?;
        let keys: Vec<String> = self.state.read().keys().cloned().collect();
        Ok(Box::new(keys.into_iter().map(Ok)))
    }

    fn keys_prefix(&self, ctx: &Context, prefix: &str) -> KvResult<KeyIter<'_>> {
        ctx.check()?;
        let keys = prefix_scan(&self.state.read(), prefix);
        Ok(Box::new(keys.into_iter().map(Ok)))
    }
}

impl TxnCrudBucket for MemoryBucket {
    type Txn = MemoryTxn;

    fn begin_crud_txn(&self, ctx: &Context) -> KvResult<MemoryTxn> {
        ctx.check()?;
        let snapshot = self.snapshot();
        debug!(keys = snapshot.len(), "began memory transaction");
        Ok(MemoryTxn {
            bucket: self.clone(),
            snapshot,
            core: Mutex::new(TxnCore::default()),
        })
    }
}

/// A transaction on a [`MemoryBucket`].
///
/// Reads stay available after commit or rollback and are served from the
/// snapshot taken at begin.
#[derive(Debug)]
pub struct MemoryTxn {
    bucket: MemoryBucket,
    snapshot: Arc<Map>,
    core: Mutex<TxnCore>,
}

impl MemoryTxn {
    /// Returns the transaction's state.
    #[must_use]
    pub fn state(&self) -> TxnState {
        self.core.lock().state
    }

    /// Returns the number of keys touched so far.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.core.lock().log.len()
    }
}

impl CrudBucket for MemoryTxn {
    fn get(&self, ctx: &Context, key: &str) -> KvResult<Vec<u8>> {
        ctx.check()?;
        self.core.lock().log.read_through(key, || {
            self.snapshot
                .get(key)
                .cloned()
                .ok_or_else(|| KvError::key_not_found(key))
        })
    }

    fn set(&self, ctx: &Context, key: &str, value: &[u8]) -> KvResult<()> {
        ctx.check()?;
        self.core.lock().writable()?.set(key, value);
        Ok(())
    }

    fn delete(&self, ctx: &Context, key: &str) -> KvResult<()> {
        ctx.check()?;
        self.core.lock().writable()?.delete(key);
        Ok(())
    }
}

impl KeysPrefixTraversingBucket for MemoryTxn {
    fn keys(&self, ctx: &Context) -> KvResult<KeyIter<'_>> {
        self.keys_prefix(ctx, "")
    }

    fn keys_prefix(&self, ctx: &Context, prefix: &str) -> KvResult<KeyIter<'_>> {
        ctx.check()?;
        let parent = prefix_scan(&self.snapshot, prefix);
        Ok(self
            .core
            .lock()
            .log
            .merge_keys(Box::new(parent.into_iter().map(Ok)), prefix))
    }
}

impl Committer for MemoryTxn {
    fn commit(&self, ctx: &Context) -> KvResult<()> {
        ctx.check()?;
        let log = self.core.lock().finish(TxnState::Committed)?;
        let mut state = self.bucket.state.write();
        log.apply_to(Arc::make_mut(&mut state));
        debug!(mutations = log.len(), "committed memory transaction");
        Ok(())
    }

    fn rollback(&self, _ctx: &Context) -> KvResult<()> {
        // Discarding the log cannot block, so the context is not consulted.
        let log = self.core.lock().finish(TxnState::RolledBack)?;
        debug!(mutations = log.len(), "rolled back memory transaction");
        Ok(())
    }
}
