//! Transactions for any [`CrudBucket`].
//!
//! [`TxnOverlay`] wraps a bucket that has no native transactions and buffers
//! writes in a [`MutationLog`](crate::MutationLog) until commit.
//!
//! ## Isolation
//!
//! A transaction reads the wrapped bucket as it stood at begin. Every write
//! made through the overlay, by a plain `set`/`delete` or by another
//! transaction's commit, first hands the key's previous value to each open
//! transaction that has not seen that key change yet. Reads consult those
//! begin images before the live bucket, so later writes stay invisible.
//! Writes that bypass the overlay are not tracked.
//!
//! ## Atomicity
//!
//! Writes and commits hold the overlay's gate exclusively, so no read
//! through the overlay observes a half-applied log. Before writing a key the
//! commit records its previous value; if any write fails, the keys already
//! written are restored and the commit reports the original error.

use crate::bucket::{Committer, CrudBucket, KeyIter, KeysPrefixTraversingBucket, TxnCrudBucket};
use crate::context::Context;
use crate::error::{KvError, KvResult};
use crate::helpers::all_keys_prefix;
use crate::txn::{Mutation, MutationLog, TxnCore, TxnState};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;
use std::sync::{Arc, Weak};
use tracing::{debug, trace, warn};

/// Values keys held at a transaction's begin, for keys written since.
/// `None` marks a key that was absent.
type BeginImage = Mutex<BTreeMap<String, Option<Vec<u8>>>>;

#[derive(Debug)]
struct Shared<B> {
    bucket: B,
    gate: RwLock<()>,
    open: Mutex<Vec<Weak<BeginImage>>>,
}

impl<B: CrudBucket> Shared<B> {
    fn current(&self, ctx: &Context, key: &str) -> KvResult<Option<Vec<u8>>> {
        match self.bucket.get(ctx, key) {
            Ok(value) => Ok(Some(value)),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Returns true if any transaction handle is still alive.
    fn has_open(&self) -> bool {
        let mut open = self.open.lock();
        open.retain(|image| image.strong_count() > 0);
        !open.is_empty()
    }

    /// Hands `prior` to every open transaction that has not seen `key`
    /// change yet.
    ///
    /// Must be called with the gate held exclusively, before `key` is written.
    fn preserve(&self, key: &str, prior: &Option<Vec<u8>>) {
        for image in self.open.lock().iter().filter_map(Weak::upgrade) {
            image
                .lock()
                .entry(key.to_owned())
                .or_insert_with(|| prior.clone());
        }
    }

    /// Writes `key` outside any transaction. `None` deletes it.
    fn write(&self, ctx: &Context, key: &str, value: Option<&[u8]>) -> KvResult<()> {
        let _gate = self.gate.write();
        if self.has_open() {
            let prior = self.current(ctx, key)?;
            self.preserve(key, &prior);
        }
        match value {
            Some(value) => self.bucket.set(ctx, key, value),
            None => self.bucket.delete(ctx, key),
        }
    }
}

/// Adds transactions to a bucket that lacks them.
///
/// Cloning yields another handle sharing the same gate and the same set of
/// open transactions.
///
/// # Example
///
/// ```rust
/// use nanokv_storage::{Committer, Context, CrudBucket, MemoryBucket, TxnCrudBucket, TxnOverlay};
///
/// let ctx = Context::background();
/// let bucket = TxnOverlay::new(MemoryBucket::with_data([("k", "before")]));
///
/// let txn = bucket.begin_crud_txn(&ctx).unwrap();
/// bucket.set(&ctx, "k", b"after").unwrap();
/// assert_eq!(txn.get(&ctx, "k").unwrap(), b"before");
/// txn.rollback(&ctx).unwrap();
/// ```
#[derive(Debug)]
pub struct TxnOverlay<B> {
    shared: Arc<Shared<B>>,
}

impl<B> Clone for TxnOverlay<B> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<B: CrudBucket> TxnOverlay<B> {
    /// Wraps `bucket`.
    pub fn new(bucket: B) -> Self {
        Self {
            shared: Arc::new(Shared {
                bucket,
                gate: RwLock::new(()),
                open: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Returns the wrapped bucket.
    ///
    /// Writes made directly on it bypass the overlay's commit gate and are
    /// visible to open transactions.
    #[must_use]
    pub fn inner(&self) -> &B {
        &self.shared.bucket
    }
}

impl<B: CrudBucket> CrudBucket for TxnOverlay<B> {
    fn get(&self, ctx: &Context, key: &str) -> KvResult<Vec<u8>> {
        let _gate = self.shared.gate.read();
        self.shared.bucket.get(ctx, key)
    }

    fn set(&self, ctx: &Context, key: &str, value: &[u8]) -> KvResult<()> {
        ctx.check()?;
        self.shared.write(ctx, key, Some(value))
    }

    fn delete(&self, ctx: &Context, key: &str) -> KvResult<()> {
        ctx.check()?;
        self.shared.write(ctx, key, None)
    }
}

impl<B: CrudBucket + KeysPrefixTraversingBucket> KeysPrefixTraversingBucket for TxnOverlay<B> {
    fn keys(&self, ctx: &Context) -> KvResult<KeyIter<'_>> {
        self.keys_prefix(ctx, "")
    }

    fn keys_prefix(&self, ctx: &Context, prefix: &str) -> KvResult<KeyIter<'_>> {
        // Materialized under the gate so a scan never straddles a commit.
        let keys = {
            let _gate = self.shared.gate.read();
            all_keys_prefix(ctx, &self.shared.bucket, prefix)?
        };
        Ok(Box::new(keys.into_iter().map(Ok)))
    }
}

impl<B: CrudBucket> TxnCrudBucket for TxnOverlay<B> {
    type Txn = OverlayTxn<B>;

    fn begin_crud_txn(&self, ctx: &Context) -> KvResult<OverlayTxn<B>> {
        ctx.check()?;
        let image = Arc::new(Mutex::new(BTreeMap::new()));
        {
            // Writers hold the gate exclusively, so none runs mid-registration.
            let _gate = self.shared.gate.read();
            self.shared.open.lock().push(Arc::downgrade(&image));
        }
        debug!("began overlay transaction");
        Ok(OverlayTxn {
            shared: Arc::clone(&self.shared),
            core: Mutex::new(TxnCore::default()),
            image,
        })
    }
}

/// A transaction begun from a [`TxnOverlay`].
///
/// Reads see the wrapped bucket as of begin plus the transaction's own
/// writes. They stay available after commit or rollback and then show the
/// state as of begin alone.
#[derive(Debug)]
pub struct OverlayTxn<B> {
    shared: Arc<Shared<B>>,
    core: Mutex<TxnCore>,
    image: Arc<BeginImage>,
}

impl<B: CrudBucket> OverlayTxn<B> {
    /// Returns the transaction's state.
    #[must_use]
    pub fn state(&self) -> TxnState {
        self.core.lock().state
    }

    /// Applies `log` to the wrapped bucket, restoring touched keys on failure.
    ///
    /// Must be called with the gate held exclusively.
    fn apply(&self, ctx: &Context, log: &MutationLog) -> KvResult<()> {
        let shared = &self.shared;
        let mut undo: Vec<(&str, Option<Vec<u8>>)> = Vec::with_capacity(log.len());

        for (key, mutation) in log.iter() {
            let step = ctx.check().and_then(|()| {
                let prior = shared.current(ctx, key)?;
                shared.preserve(key, &prior);
                let existed = prior.is_some();
                undo.push((key, prior));
                match mutation {
                    Mutation::Set(value) => shared.bucket.set(ctx, key, value),
                    Mutation::Delete if existed => shared.bucket.delete(ctx, key),
                    Mutation::Delete => Ok(()),
                }
            });
            if let Err(err) = step {
                self.restore(&undo);
                return Err(err);
            }
        }
        Ok(())
    }

    fn restore(&self, undo: &[(&str, Option<Vec<u8>>)]) {
        // The caller's context may be the reason the commit failed.
        let ctx = Context::background();
        let bucket = &self.shared.bucket;
        for (key, prior) in undo.iter().rev() {
            let result = match prior {
                Some(value) => bucket.set(&ctx, key, value),
                None => bucket.delete(&ctx, key),
            };
            if let Err(err) = result {
                warn!(key = %key, error = %err, "failed to restore key after aborted commit");
            }
        }
    }
}

impl<B: CrudBucket> CrudBucket for OverlayTxn<B> {
    fn get(&self, ctx: &Context, key: &str) -> KvResult<Vec<u8>> {
        ctx.check()?;
        // The log lock is never held while waiting on the gate.
        let pending = self.core.lock().log.lookup(key).cloned();
        match pending {
            Some(Mutation::Set(value)) => Ok(value),
            Some(Mutation::Delete) => Err(KvError::key_not_found(key)),
            None => {
                let _gate = self.shared.gate.read();
                if let Some(prior) = self.image.lock().get(key) {
                    trace!(key, "read from begin image");
                    return prior.clone().ok_or_else(|| KvError::key_not_found(key));
                }
                self.shared.bucket.get(ctx, key)
            }
        }
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

impl<B: CrudBucket + KeysPrefixTraversingBucket> KeysPrefixTraversingBucket for OverlayTxn<B> {
    fn keys(&self, ctx: &Context) -> KvResult<KeyIter<'_>> {
        self.keys_prefix(ctx, "")
    }

    fn keys_prefix(&self, ctx: &Context, prefix: &str) -> KvResult<KeyIter<'_>> {
        ctx.check()?;
        let at_begin = {
            let _gate = self.shared.gate.read();
            let mut keys: BTreeSet<String> = all_keys_prefix(ctx, &self.shared.bucket, prefix)?
                .into_iter()
                .collect();
            let image = self.image.lock();
            let changed = image
                .range::<str, _>((Bound::Included(prefix), Bound::Unbounded))
                .take_while(|(key, _)| key.starts_with(prefix));
            for (key, prior) in changed {
                if prior.is_some() {
                    keys.insert(key.clone());
                } else {
                    keys.remove(key);
                }
            }
            keys
        };
        Ok(self
            .core
            .lock()
            .log
            .merge_keys(Box::new(at_begin.into_iter().map(Ok)), prefix))
    }
}

impl<B: CrudBucket> Committer for OverlayTxn<B> {
    fn commit(&self, ctx: &Context) -> KvResult<()> {
        ctx.check()?;
        let log = self.core.lock().finish(TxnState::Committed)?;
        let applied = {
            let _gate = self.shared.gate.write();
            self.apply(ctx, &log)
        };
        if let Err(err) = applied {
            self.core.lock().state = TxnState::RolledBack;
            debug!(error = %err, "overlay commit failed, changes restored");
            return Err(err);
        }
        debug!(mutations = log.len(), "committed overlay transaction");
        Ok(())
    }

    fn rollback(&self, _ctx: &Context) -> KvResult<()> {
        let log = self.core.lock().finish(TxnState::RolledBack)?;
        debug!(mutations = log.len(), "rolled back overlay transaction");
        Ok(())
    }
}
