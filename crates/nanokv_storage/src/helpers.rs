//! Generic algorithms over the capability traits.
//!
//! These work identically on a plain bucket and on a transaction handle.
//! They hold no locks of their own and inherit whatever atomicity the
//! target provides. The first error aborts the operation and is returned
//! unchanged.

use crate::bucket::{Committer, CrudBucket, KeyIter, KeysPrefixTraversingBucket, TxnCrudBucket};
use crate::context::Context;
use crate::error::KvResult;
use tracing::warn;

fn drain(ctx: &Context, keys: KeyIter<'_>) -> KvResult<Vec<String>> {
    let mut out = Vec::new();
    for key in keys {
        ctx.check()?;
        out.push(key?);
    }
    Ok(out)
}

/// Collects every visible key of `bucket`.
///
/// # Errors
///
/// Returns the first scan error, or a cancellation error if `ctx` is done
/// before the scan finishes.
pub fn all_keys<B>(ctx: &Context, bucket: &B) -> KvResult<Vec<String>>
where
    B: KeysPrefixTraversingBucket + ?Sized,
{
    drain(ctx, bucket.keys(ctx)?)
}

/// Collects every visible key of `bucket` that starts with `prefix`.
///
/// # Errors
///
/// Same as [`all_keys`].
pub fn all_keys_prefix<B>(ctx: &Context, bucket: &B, prefix: &str) -> KvResult<Vec<String>>
where
    B: KeysPrefixTraversingBucket + ?Sized,
{
    drain(ctx, bucket.keys_prefix(ctx, prefix)?)
}

/// Sets every `(key, value)` pair on `bucket`, in iteration order.
///
/// On a plain bucket a failure leaves the pairs before it applied. Inside
/// a transaction the pairs become visible together at commit.
///
/// # Errors
///
/// Returns the first error; no further pairs are processed.
pub fn set_map<B, I, K, V>(ctx: &Context, bucket: &B, pairs: I) -> KvResult<()>
where
    B: CrudBucket + ?Sized,
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: AsRef<[u8]>,
{
    for (key, value) in pairs {
        bucket.set(ctx, key.as_ref(), value.as_ref())?;
    }
    Ok(())
}

/// Deletes every key in `keys` from `bucket`.
///
/// # Errors
///
/// Returns the first error; no further keys are processed.
pub fn delete_keys<B, I, K>(ctx: &Context, bucket: &B, keys: I) -> KvResult<()>
where
    B: CrudBucket + ?Sized,
    I: IntoIterator<Item = K>,
    K: AsRef<str>,
{
    for key in keys {
        bucket.delete(ctx, key.as_ref())?;
    }
    Ok(())
}

/// Runs `f` inside a transaction on `bucket`.
///
/// Commits if `f` succeeds and rolls back if it fails.
///
/// # Errors
///
/// Returns the error from begin, from `f`, or from commit. When `f` fails
/// its error is returned even if the rollback also fails.
///
/// # Example
///
/// ```rust
/// use nanokv_storage::{helpers, Context, CrudBucket, MemoryBucket};
///
/// let ctx = Context::background();
/// let bucket = MemoryBucket::new();
/// helpers::perform_crud_txn(&ctx, &bucket, |txn| {
///     txn.set(&ctx, "a", b"1")?;
///     txn.set(&ctx, "b", b"2")
/// })
/// .unwrap();
/// assert_eq!(bucket.get(&ctx, "b").unwrap(), b"2");
/// ```
pub fn perform_crud_txn<B, F, T>(ctx: &Context, bucket: &B, f: F) -> KvResult<T>
where
    B: TxnCrudBucket + ?Sized,
    F: FnOnce(&B::Txn) -> KvResult<T>,
{
    let txn = bucket.begin_crud_txn(ctx)?;
    match f(&txn) {
        Ok(value) => {
            txn.commit(ctx)?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = txn.rollback(ctx) {
                warn!(error = %rollback_err, "rollback after failed transaction body failed");
            }
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::KvError;
    use crate::memory::MemoryBucket;
    use std::collections::BTreeMap;

    /// Bucket that rejects one key and records what it accepted.
    struct Picky {
        inner: MemoryBucket,
        reject: &'static str,
    }

    impl CrudBucket for Picky {
        fn get(&self, ctx: &Context, key: &str) -> KvResult<Vec<u8>> {
            self.inner.get(ctx, key)
        }

        fn set(&self, ctx: &Context, key: &str, value: &[u8]) -> KvResult<()> {
            if key == self.reject {
                return Err(KvError::backend(format!("rejected {key}")));
            }
            self.inner.set(ctx, key, value)
        }

        fn delete(&self, ctx: &Context, key: &str) -> KvResult<()> {
            self.inner.delete(ctx, key)
        }
    }

    #[test]
    fn set_map_stops_at_first_error() {
        let ctx = Context::background();
        let bucket = Picky {
            inner: MemoryBucket::new(),
            reject: "b",
        };
        let pairs = BTreeMap::from([("a", "1"), ("b", "2"), ("c", "3")]);

        let err = set_map(&ctx, &bucket, &pairs).unwrap_err();
        assert!(matches!(err, KvError::Backend(_)));
        assert!(bucket.has(&ctx, "a").unwrap());
        assert!(!bucket.has(&ctx, "c").unwrap());
    }

    #[test]
    fn delete_keys_removes_all() {
        let ctx = Context::background();
        let bucket = MemoryBucket::new();
        set_map(&ctx, &bucket, [("a", "1"), ("b", "2"), ("c", "3")]).unwrap();

        delete_keys(&ctx, &bucket, ["a", "c", "missing"]).unwrap();
        assert_eq!(all_keys(&ctx, &bucket).unwrap(), vec!["b"]);
    }

    #[test]
    fn scans_stop_when_cancelled() {
        let ctx = Context::background();
        let bucket = MemoryBucket::new();
        set_map(&ctx, &bucket, [("a", "1"), ("b", "2")]).unwrap();

        let cancelled = ctx.with_cancel();
        cancelled.cancel();
        let err = all_keys(&cancelled, &bucket).unwrap_err();
        assert!(err.is_cancellation());
    }

    #[test]
    fn perform_crud_txn_commits_on_success() {
        let ctx = Context::background();
        let bucket = MemoryBucket::new();

        let n = perform_crud_txn(&ctx, &bucket, |txn| {
            set_map(&ctx, txn, [("x", "1"), ("y", "2")])?;
            Ok(2)
        })
        .unwrap();

        assert_eq!(n, 2);
        assert_eq!(bucket.get(&ctx, "y").unwrap(), b"2");
    }

    #[test]
    fn perform_crud_txn_rolls_back_on_error() {
        let ctx = Context::background();
        let bucket = MemoryBucket::new();

        let result: KvResult<()> = perform_crud_txn(&ctx, &bucket, |txn| {
            txn.set(&ctx, "x", b"1")?;
            Err(KvError::backend("abort"))
        });

        assert!(matches!(result, Err(KvError::Backend(_))));
        assert!(bucket.get(&ctx, "x").unwrap_err().is_not_found());
    }
}
