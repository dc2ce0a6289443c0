//! Capability traits.
//!
//! A backend implements only the capabilities it can support:
//!
//! - [`CrudBucket`] - get, set and delete on a bucket of key/value pairs
//! - [`KeysPrefixTraversingBucket`] - key enumeration, optionally by prefix
//! - [`TxnCrudBucket`] - begins transactions whose handles are themselves
//!   [`CrudBucket`]s and [`Committer`]s
//!
//! Client code and the generic helpers in [`crate::helpers`] are written
//! against the narrowest trait they need, so a transaction handle can be
//! passed anywhere a bucket is expected.

use crate::context::Context;
use crate::error::KvResult;
use std::sync::Arc;

/// A finite, single-pass sequence of keys.
///
/// Items are results so that a backend can surface a failure part way
/// through a scan. Order is unspecified.
pub type KeyIter<'a> = Box<dyn Iterator<Item = KvResult<String>> + Send + 'a>;

/// Read, write and delete access to a bucket.
///
/// # Invariants
///
/// - After `set(k, v)` succeeds, `get(k)` returns `v` until `k` is
///   overwritten or deleted
/// - `get` of an absent key fails with [`KvError::KeyNotFound`](crate::KvError::KeyNotFound)
/// - `delete` of an absent key succeeds and changes nothing
/// - Every method fails with a cancellation error if `ctx` is done on entry
pub trait CrudBucket: Send + Sync {
    /// Returns the value stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`KvError::KeyNotFound`](crate::KvError::KeyNotFound) if the
    /// key is absent, or any backend error.
    fn get(&self, ctx: &Context, key: &str) -> KvResult<Vec<u8>>;

    /// Stores `value` under `key`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails or `ctx` is done.
    fn set(&self, ctx: &Context, key: &str, value: &[u8]) -> KvResult<()>;

    /// Removes `key`. Removing an absent key is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails or `ctx` is done.
    fn delete(&self, ctx: &Context, key: &str) -> KvResult<()>;

    /// Returns true if `key` is present.
    ///
    /// # Errors
    ///
    /// Passes through every error from [`get`](Self::get) other than
    /// key not found.
    fn has(&self, ctx: &Context, key: &str) -> KvResult<bool> {
        match self.get(ctx, key) {
            Ok(_) => Ok(true),
            Err(err) if err.is_not_found() => Ok(false),
            Err(err) => Err(err),
        }
    }
}

/// Key enumeration over a bucket.
pub trait KeysPrefixTraversingBucket: Send + Sync {
    /// Returns every visible key.
    ///
    /// # Errors
    ///
    /// Returns an error if the scan cannot start. Failures during the scan
    /// are yielded as `Err` items.
    fn keys(&self, ctx: &Context) -> KvResult<KeyIter<'_>>;

    /// Returns every visible key that starts with `prefix` (byte-wise).
    ///
    /// The provided implementation filters [`keys`](Self::keys); ordered
    /// backends should override it with a range scan.
    ///
    /// # Errors
    ///
    /// Same as [`keys`](Self::keys).
    fn keys_prefix(&self, ctx: &Context, prefix: &str) -> KvResult<KeyIter<'_>> {
        let prefix = prefix.to_owned();
        let keys = self.keys(ctx)?;
        Ok(Box::new(keys.filter(move |key| match key {
            Ok(key) => key.starts_with(&prefix),
            Err(_) => true,
        })))
    }
}

/// The terminal operations of a transaction handle.
///
/// Exactly one of `commit` or `rollback` ends a transaction. Calling either
/// again fails with [`KvError::TxnClosed`](crate::KvError::TxnClosed).
pub trait Committer: Send + Sync {
    /// Applies every buffered mutation to the parent bucket atomically.
    ///
    /// # Errors
    ///
    /// On error nothing was applied. A commit refused because `ctx` was
    /// already done leaves the transaction active; any other failure
    /// finishes it.
    fn commit(&self, ctx: &Context) -> KvResult<()>;

    /// Discards every buffered mutation.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction is already finished.
    fn rollback(&self, ctx: &Context) -> KvResult<()>;
}

/// A bucket that can begin single-level transactions.
pub trait TxnCrudBucket: CrudBucket {
    /// The transaction handle type.
    type Txn: CrudBucket + Committer;

    /// Begins a transaction bound to this bucket.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot start a transaction or `ctx`
    /// is done.
    fn begin_crud_txn(&self, ctx: &Context) -> KvResult<Self::Txn>;
}

macro_rules! forward_pointer {
    ($($ptr:ty),*) => {$(
        impl<T: CrudBucket + ?Sized> CrudBucket for $ptr {
            fn get(&self, ctx: &Context, key: &str) -> KvResult<Vec<u8>> {
                (**self).get(ctx, key)
            }

            fn set(&self, ctx: &Context, key: &str, value: &[u8]) -> KvResult<()> {
                (**self).set(ctx, key, value)
            }

            fn delete(&self, ctx: &Context, key: &str) -> KvResult<()> {
                (**self).delete(ctx, key)
            }

            fn has(&self, ctx: &Context, key: &str) -> KvResult<bool> {
                (**self).has(ctx, key)
            }
        }

        impl<T: KeysPrefixTraversingBucket + ?Sized> KeysPrefixTraversingBucket for $ptr {
            fn keys(&self, ctx: &Context) -> KvResult<KeyIter<'_>> {
                (**self).keys(ctx)
            }

            fn keys_prefix(&self, ctx: &Context, prefix: &str) -> KvResult<KeyIter<'_>> {
                (**self).keys_prefix(ctx, prefix)
            }
        }

        impl<T: Committer + ?Sized> Committer for $ptr {
            fn commit(&self, ctx: &Context) -> KvResult<()> {
                (**self).commit(ctx)
            }

            fn rollback(&self, ctx: &Context) -> KvResult<()> {
                (**self).rollback(ctx)
            }
        }

        impl<T: TxnCrudBucket + ?Sized> TxnCrudBucket for $ptr {
            type Txn = T::Txn;

            fn begin_crud_txn(&self, ctx: &Context) -> KvResult<Self::Txn> {
                (**self).begin_crud_txn(ctx)
            }
        }
    )*};
}

forward_pointer!(&T, Box<T>, Arc<T>);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::KvError;
    use crate::helpers::all_keys_prefix;

    /// Enumeration-only bucket relying on the provided `keys_prefix`.
    struct FixedKeys(Vec<&'static str>);

    impl KeysPrefixTraversingBucket for FixedKeys {
        fn keys(&self, ctx: &Context) -> KvResult<KeyIter<'_>> {
            ctx.check()?;
            Ok(Box::new(self.0.iter().map(|k| Ok((*k).to_owned()))))
        }
    }

    /// Bucket whose reads always fail with an opaque error.
    struct Broken;

    impl CrudBucket for Broken {
        fn get(&self, _ctx: &Context, _key: &str) -> KvResult<Vec<u8>> {
            Err(KvError::backend("broken"))
        }

        fn set(&self, _ctx: &Context, _key: &str, _value: &[u8]) -> KvResult<()> {
            Ok(())
        }

        fn delete(&self, _ctx: &Context, _key: &str) -> KvResult<()> {
            Ok(())
        }
    }

    #[test]
    fn default_keys_prefix_filters() {
        let ctx = Context::background();
        let bucket = FixedKeys(vec!["hello", "help", "foo", "he"]);
        let mut keys = all_keys_prefix(&ctx, &bucket, "hel").unwrap();
        keys.sort();
        assert_eq!(keys, vec!["hello", "help"]);
    }

    #[test]
    fn has_passes_through_backend_errors() {
        let ctx = Context::background();
        let result = Broken.has(&ctx, "any");
        assert!(matches!(result, Err(KvError::Backend(_))));
    }

    #[test]
    fn forwarding_through_pointers() {
        let ctx = Context::background();
        let bucket: Arc<dyn KeysPrefixTraversingBucket> = Arc::new(FixedKeys(vec!["a", "b"]));
        let keys = all_keys_prefix(&ctx, &bucket, "").unwrap();
        assert_eq!(keys.len(), 2);
    }
}
