//! Backend conformance harness.
//!
//! Each `test_*` function drives a bucket only through the capability
//! traits and panics on the first mismatch or unexpected error, naming the
//! step that failed. A backend is conformant when every script passes.
//!
//! Scripts assume they start from an **empty** bucket; give each one a
//! fresh instance. [`run_crud_suite`] and [`run_txn_suite`] do that with a
//! factory closure.
//!
//! ```rust
//! use nanokv_storage::{Context, MemoryBucket};
//! use nanokv_testkit::conformance::{run_txn_suite, TxnConfig};
//!
//! let ctx = Context::background();
//! run_txn_suite(&ctx, || Box::new(MemoryBucket::new()), &TxnConfig::default());
//! ```

use nanokv_storage::helpers::{all_keys, all_keys_prefix, set_map};
use nanokv_storage::{
    Committer, Context, CrudBucket, KeysPrefixTraversingBucket, KvError, KvResult, TxnCrudBucket,
};
use std::collections::BTreeSet;
use std::fmt::Debug;
use std::ops::Deref;
use std::time::Instant;
use tracing::debug;

/// Options for the transaction scripts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TxnConfig {
    /// Skip reads through a transaction handle after it was rolled back.
    ///
    /// Set this for backends that invalidate the handle entirely on
    /// rollback. Defaults to `false`.
    pub no_read_after_rollback: bool,
}

impl TxnConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether reads after rollback are skipped.
    #[must_use]
    pub const fn no_read_after_rollback(mut self, value: bool) -> Self {
        self.no_read_after_rollback = value;
        self
    }
}

// ---------------------------------------------------------------------------
// Assertions
// ---------------------------------------------------------------------------

#[track_caller]
fn ok<T>(step: &str, result: KvResult<T>) -> T {
    match result {
        Ok(value) => value,
        Err(err) => panic!("{step}: unexpected error: {err}"),
    }
}

#[track_caller]
fn assert_value(step: &str, result: KvResult<Vec<u8>>, want: &[u8]) {
    let have = ok(step, result);
    assert!(
        have == want,
        "{step}: have {:?}, want {:?}",
        String::from_utf8_lossy(&have),
        String::from_utf8_lossy(want)
    );
}

#[track_caller]
fn assert_not_found<T: Debug>(step: &str, result: KvResult<T>) {
    match result {
        Err(err) if err.is_not_found() => {}
        other => panic!("{step}: expected key not found, got {other:?}"),
    }
}

#[track_caller]
fn assert_cancelled<T: Debug>(step: &str, result: KvResult<T>) {
    match result {
        Err(err) if err.is_cancellation() => {}
        other => panic!("{step}: expected a cancellation error, got {other:?}"),
    }
}

#[track_caller]
fn assert_keys(step: &str, have: Vec<String>, want: &[&str]) {
    let count = have.len();
    let have: BTreeSet<String> = have.into_iter().collect();
    assert_eq!(count, have.len(), "{step}: enumeration yielded duplicate keys");
    let want: BTreeSet<String> = want.iter().map(|k| (*k).to_owned()).collect();
    assert_eq!(have, want, "{step}: key sets differ");
}

fn cancelled(ctx: &Context) -> Context {
    let ctx = ctx.with_cancel();
    ctx.cancel();
    ctx
}

// ---------------------------------------------------------------------------
// CRUD scripts
// ---------------------------------------------------------------------------

/// Basic set, get, overwrite and delete on an empty bucket.
pub fn test_crud<B>(ctx: &Context, bucket: &B)
where
    B: CrudBucket + ?Sized,
{
    assert_not_found("get before set", bucket.get(ctx, "crud-key"));
    assert!(!ok("has before set", bucket.has(ctx, "crud-key")));

    ok("set", bucket.set(ctx, "crud-key", b"crud-val-1"));
    assert_value("get after set", bucket.get(ctx, "crud-key"), b"crud-val-1");
    assert!(ok("has after set", bucket.has(ctx, "crud-key")));

    ok("overwrite", bucket.set(ctx, "crud-key", b"crud-val-2"));
    assert_value(
        "get after overwrite",
        bucket.get(ctx, "crud-key"),
        b"crud-val-2",
    );

    ok("set empty value", bucket.set(ctx, "crud-empty", b""));
    assert_value("get empty value", bucket.get(ctx, "crud-empty"), b"");

    let binary = [0u8, 255, 1, 0, 128];
    ok("set binary value", bucket.set(ctx, "crud-binary", &binary));
    assert_value("get binary value", bucket.get(ctx, "crud-binary"), &binary);

    ok("delete", bucket.delete(ctx, "crud-key"));
    assert_not_found("get after delete", bucket.get(ctx, "crud-key"));
    assert!(!ok("has after delete", bucket.has(ctx, "crud-key")));
    assert_value(
        "sibling survives delete",
        bucket.get(ctx, "crud-empty"),
        b"",
    );
}

/// Deleting an absent key succeeds and changes nothing.
pub fn test_delete_absent<B>(ctx: &Context, bucket: &B)
where
    B: CrudBucket + ?Sized,
{
    ok("delete never-set key", bucket.delete(ctx, "absent-key"));
    assert_not_found("get never-set key", bucket.get(ctx, "absent-key"));

    ok("set", bucket.set(ctx, "absent-key", b"v"));
    ok("first delete", bucket.delete(ctx, "absent-key"));
    ok("second delete", bucket.delete(ctx, "absent-key"));
    assert_not_found("get after double delete", bucket.get(ctx, "absent-key"));
}

/// Operations under a cancelled or expired context fail and change nothing.
pub fn test_cancellation<B>(ctx: &Context, bucket: &B)
where
    B: CrudBucket + ?Sized,
{
    ok("seed", bucket.set(ctx, "cancel-key", b"before"));

    let done = cancelled(ctx);
    assert_cancelled(
        "get with cancelled context",
        bucket.get(&done, "cancel-key"),
    );
    assert_cancelled(
        "set with cancelled context",
        bucket.set(&done, "cancel-key", b"after"),
    );
    assert_cancelled(
        "delete with cancelled context",
        bucket.delete(&done, "cancel-key"),
    );
    assert_cancelled(
        "set new key with cancelled context",
        bucket.set(&done, "cancel-new", b"x"),
    );

    let expired = ctx.with_deadline(Instant::now());
    match bucket.get(&expired, "cancel-key") {
        Err(KvError::DeadlineExceeded) => {}
        other => panic!("get with expired deadline: expected DeadlineExceeded, got {other:?}"),
    }

    assert_value("value untouched", bucket.get(ctx, "cancel-key"), b"before");
    assert_not_found("new key never written", bucket.get(ctx, "cancel-new"));
}

/// Key enumeration and prefix filtering on an empty bucket.
pub fn test_keys<B>(ctx: &Context, bucket: &B)
where
    B: CrudBucket + KeysPrefixTraversingBucket + ?Sized,
{
    assert_keys("empty bucket", ok("all keys", all_keys(ctx, bucket)), &[]);

    ok(
        "seed",
        set_map(
            ctx,
            bucket,
            [("al", "1"), ("alpha", "2"), ("alpine", "3"), ("beta", "4")],
        ),
    );
    ok("overwrite", bucket.set(ctx, "alpha", b"5"));

    let all = ok("all keys", all_keys(ctx, bucket));
    assert_keys(
        "each key once",
        all.clone(),
        &["al", "alpha", "alpine", "beta"],
    );

    assert_keys(
        "prefix al",
        ok("prefix", all_keys_prefix(ctx, bucket, "al")),
        &["al", "alpha", "alpine"],
    );
    assert_keys(
        "prefix alp",
        ok("prefix", all_keys_prefix(ctx, bucket, "alp")),
        &["alpha", "alpine"],
    );
    assert_keys(
        "prefix alpha",
        ok("prefix", all_keys_prefix(ctx, bucket, "alpha")),
        &["alpha"],
    );
    assert_keys(
        "prefix zzz",
        ok("prefix", all_keys_prefix(ctx, bucket, "zzz")),
        &[],
    );
    assert_keys(
        "empty prefix",
        ok("prefix", all_keys_prefix(ctx, bucket, "")),
        &["al", "alpha", "alpine", "beta"],
    );

    for prefix in ["", "a", "al", "alp", "b", "be", "c"] {
        let want: Vec<&str> = all
            .iter()
            .filter(|k| k.starts_with(prefix))
            .map(String::as_str)
            .collect();
        let have = ok("prefix", all_keys_prefix(ctx, bucket, prefix));
        assert_keys(
            &format!("prefix {prefix:?} matches filtered all keys"),
            have,
            &want,
        );
    }

    ok("delete", bucket.delete(ctx, "alpine"));
    assert_keys(
        "after delete",
        ok("prefix", all_keys_prefix(ctx, bucket, "alp")),
        &["alpha"],
    );

    assert_cancelled(
        "all keys with cancelled context",
        all_keys(&cancelled(ctx), bucket),
    );
}

// ---------------------------------------------------------------------------
// Transaction scripts
// ---------------------------------------------------------------------------

/// Isolation, rollback and commit of a single key.
///
/// 1. Set a key on the bucket and read it back.
/// 2. Begin a transaction and read the key through it.
/// 3. Overwrite the key in the transaction, then roll back.
/// 4. The bucket still holds the original value.
/// 5. Unless `no_read_after_rollback`, so does the rolled back handle.
/// 6. Overwrite the key in a new transaction and commit.
/// 7. The bucket holds the new value.
/// 8. Insert a new key in a third transaction, read it back, roll back.
/// 9. Unless `no_read_after_rollback`, the handle no longer sees it.
/// 10. The bucket never saw it.
pub fn test_txn_simple<B>(ctx: &Context, bucket: &B, config: &TxnConfig)
where
    B: TxnCrudBucket + ?Sized,
{
    ok(
        "set on bucket",
        bucket.set(ctx, "test-txn-key-1", b"test-txn-val-1"),
    );
    assert_value(
        "read back from bucket",
        bucket.get(ctx, "test-txn-key-1"),
        b"test-txn-val-1",
    );

    let txn = ok("begin", bucket.begin_crud_txn(ctx));
    assert_value(
        "read inherited value in txn",
        txn.get(ctx, "test-txn-key-1"),
        b"test-txn-val-1",
    );

    ok(
        "overwrite in txn",
        txn.set(ctx, "test-txn-key-1", b"test-txn-val-2"),
    );
    ok("rollback", txn.rollback(ctx));

    assert_value(
        "bucket untouched by rollback",
        bucket.get(ctx, "test-txn-key-1"),
        b"test-txn-val-1",
    );

    if !config.no_read_after_rollback {
        assert_value(
            "rolled back txn reads original value",
            txn.get(ctx, "test-txn-key-1"),
            b"test-txn-val-1",
        );
    }

    let txn = ok("begin second txn", bucket.begin_crud_txn(ctx));
    ok(
        "overwrite in second txn",
        txn.set(ctx, "test-txn-key-1", b"test-txn-val-2"),
    );
    ok("commit", txn.commit(ctx));

    assert_value(
        "bucket sees committed value",
        bucket.get(ctx, "test-txn-key-1"),
        b"test-txn-val-2",
    );

    let txn = ok("begin third txn", bucket.begin_crud_txn(ctx));
    ok(
        "insert in third txn",
        txn.set(ctx, "test-txn-key-2", b"test-txn-val-3"),
    );
    assert_value(
        "read own insert",
        txn.get(ctx, "test-txn-key-2"),
        b"test-txn-val-3",
    );
    ok("rollback third txn", txn.rollback(ctx));

    if !config.no_read_after_rollback {
        assert_not_found(
            "rolled back insert gone from txn",
            txn.get(ctx, "test-txn-key-2"),
        );
    }

    assert_not_found(
        "rolled back insert never reached bucket",
        bucket.get(ctx, "test-txn-key-2"),
    );
}

/// Key enumeration through a transaction.
///
/// 1. Set `hello` on the bucket, begin a transaction and overwrite it.
/// 2. The transaction enumerates exactly `hello`.
/// 3. Delete `hello` in the transaction; it enumerates nothing.
/// 4. Roll back; the bucket enumerates `hello` with its original value.
/// 5. In a new transaction bulk-set three keys; prefix `hel` yields
///    `hello` and `help`. Roll back.
pub fn test_txn_keys<B>(ctx: &Context, bucket: &B)
where
    B: TxnCrudBucket + KeysPrefixTraversingBucket + ?Sized,
    B::Txn: KeysPrefixTraversingBucket,
{
    ok("set on bucket", bucket.set(ctx, "hello", b"dlrow"));
    let txn = ok("begin", bucket.begin_crud_txn(ctx));
    ok("overwrite in txn", txn.set(ctx, "hello", b"world"));

    assert_keys(
        "txn keys after overwrite",
        ok("all keys", all_keys(ctx, &txn)),
        &["hello"],
    );

    ok("delete in txn", txn.delete(ctx, "hello"));
    assert_keys(
        "txn keys after delete",
        ok("all keys", all_keys(ctx, &txn)),
        &[],
    );

    ok("rollback", txn.rollback(ctx));
    assert_keys(
        "bucket keys after rollback",
        ok("all keys", all_keys(ctx, bucket)),
        &["hello"],
    );
    assert_value(
        "bucket value after rollback",
        bucket.get(ctx, "hello"),
        b"dlrow",
    );

    let txn = ok("begin second txn", bucket.begin_crud_txn(ctx));
    ok(
        "bulk set in txn",
        set_map(
            ctx,
            &txn,
            [
                ("hello", "world"),
                ("foo", "bar"),
                ("help", "i need somebody"),
            ],
        ),
    );
    assert_keys(
        "txn prefix hel",
        ok("prefix", all_keys_prefix(ctx, &txn, "hel")),
        &["hello", "help"],
    );
    ok("rollback second txn", txn.rollback(ctx));

    assert_keys(
        "bucket keys after second rollback",
        ok("all keys", all_keys(ctx, bucket)),
        &["hello"],
    );
    assert_value(
        "bucket value after second rollback",
        bucket.get(ctx, "hello"),
        b"dlrow",
    );
}

/// Deletes, inserts and bulk sets stay private until commit, then all land.
pub fn test_txn_isolation<B>(ctx: &Context, bucket: &B)
where
    B: TxnCrudBucket + ?Sized,
{
    ok(
        "seed",
        set_map(ctx, bucket, [("iso-a", "1"), ("iso-b", "2")]),
    );

    let txn = ok("begin", bucket.begin_crud_txn(ctx));
    ok("delete in txn", txn.delete(ctx, "iso-a"));
    assert_not_found("txn hides its delete", txn.get(ctx, "iso-a"));
    assert_value(
        "bucket still has deleted key",
        bucket.get(ctx, "iso-a"),
        b"1",
    );

    ok("insert in txn", txn.set(ctx, "iso-c", b"3"));
    assert_not_found("bucket cannot see insert", bucket.get(ctx, "iso-c"));

    ok("delete absent key in txn", txn.delete(ctx, "iso-ghost"));
    ok(
        "bulk set in txn",
        set_map(ctx, &txn, [("iso-m1", "x"), ("iso-m2", "y")]),
    );
    assert_not_found("bucket cannot see bulk set", bucket.get(ctx, "iso-m1"));

    ok("delete then re-set in txn", txn.delete(ctx, "iso-b"));
    ok("re-set in txn", txn.set(ctx, "iso-b", b"22"));
    assert_value("txn sees re-set", txn.get(ctx, "iso-b"), b"22");

    ok("commit", txn.commit(ctx));

    assert_not_found("delete committed", bucket.get(ctx, "iso-a"));
    assert_value("re-set committed", bucket.get(ctx, "iso-b"), b"22");
    assert_value("insert committed", bucket.get(ctx, "iso-c"), b"3");
    assert_value("bulk set committed", bucket.get(ctx, "iso-m1"), b"x");
    assert_value("bulk set committed", bucket.get(ctx, "iso-m2"), b"y");
    assert_not_found("absent delete left nothing", bucket.get(ctx, "iso-ghost"));
}

/// A transaction reads the bucket as it stood at begin.
///
/// Writes made to the bucket after begin, including another transaction's
/// commit, stay invisible to `get` and to enumeration. The transaction's own
/// writes still win, and at commit the last committer wins per key.
pub fn test_txn_snapshot<B>(ctx: &Context, bucket: &B)
where
    B: TxnCrudBucket + KeysPrefixTraversingBucket + ?Sized,
    B::Txn: KeysPrefixTraversingBucket,
{
    ok(
        "seed",
        set_map(ctx, bucket, [("snap-a", "1"), ("snap-b", "2"), ("snap-c", "3")]),
    );

    let txn = ok("begin", bucket.begin_crud_txn(ctx));
    assert_value("txn reads seeded value", txn.get(ctx, "snap-a"), b"1");

    ok(
        "overwrite on bucket after begin",
        bucket.set(ctx, "snap-a", b"changed"),
    );
    ok("delete on bucket after begin", bucket.delete(ctx, "snap-b"));
    ok(
        "insert on bucket after begin",
        bucket.set(ctx, "snap-late", b"late"),
    );

    let other = ok("begin concurrent txn", bucket.begin_crud_txn(ctx));
    ok(
        "overwrite in concurrent txn",
        other.set(ctx, "snap-c", b"other"),
    );
    ok(
        "insert in concurrent txn",
        other.set(ctx, "snap-other", b"other"),
    );
    ok("commit concurrent txn", other.commit(ctx));

    assert_value("txn ignores later overwrite", txn.get(ctx, "snap-a"), b"1");
    assert_value("txn ignores later delete", txn.get(ctx, "snap-b"), b"2");
    assert_value(
        "txn ignores concurrent commit",
        txn.get(ctx, "snap-c"),
        b"3",
    );
    assert_not_found("txn ignores later insert", txn.get(ctx, "snap-late"));
    assert_not_found("txn ignores committed insert", txn.get(ctx, "snap-other"));
    assert_keys(
        "txn enumerates keys as of begin",
        ok("all keys", all_keys(ctx, &txn)),
        &["snap-a", "snap-b", "snap-c"],
    );
    assert_keys(
        "txn prefix scan as of begin",
        ok("prefix", all_keys_prefix(ctx, &txn, "snap-")),
        &["snap-a", "snap-b", "snap-c"],
    );

    ok("overwrite in txn", txn.set(ctx, "snap-a", b"mine"));
    assert_value(
        "own write wins over begin state",
        txn.get(ctx, "snap-a"),
        b"mine",
    );
    ok("commit", txn.commit(ctx));

    assert_value("last committer wins", bucket.get(ctx, "snap-a"), b"mine");
    assert_not_found("untouched delete survives", bucket.get(ctx, "snap-b"));
    assert_value(
        "untouched commit survives",
        bucket.get(ctx, "snap-c"),
        b"other",
    );
    assert_value(
        "untouched insert survives",
        bucket.get(ctx, "snap-late"),
        b"late",
    );
}

/// Begin and commit respect the context; a commit that fails on a
/// cancelled context applies nothing.
pub fn test_txn_cancellation<B>(ctx: &Context, bucket: &B)
where
    B: TxnCrudBucket + ?Sized,
{
    let done = cancelled(ctx);
    // Handles need not implement Debug, so only the outcome is reported.
    assert_cancelled(
        "begin with cancelled context",
        bucket.begin_crud_txn(&done).map(|_| ()),
    );

    let txn = ok("begin", bucket.begin_crud_txn(ctx));
    ok("set in txn", txn.set(ctx, "txn-cancel-key", b"v"));
    assert_cancelled(
        "set in txn with cancelled context",
        txn.set(&done, "txn-cancel-other", b"v"),
    );
    assert_cancelled("commit with cancelled context", txn.commit(&done));
    assert_not_found(
        "cancelled commit applied nothing",
        bucket.get(ctx, "txn-cancel-key"),
    );
    assert_not_found(
        "cancelled commit applied nothing",
        bucket.get(ctx, "txn-cancel-other"),
    );
}

/// Handles reject writes and a second terminal operation once finished.
///
/// This is stricter than the capability contract, which leaves use of a
/// finished handle undefined. It checks the behavior of the bundled
/// backends, which fail with [`KvError::TxnClosed`].
pub fn test_txn_terminal<B>(ctx: &Context, bucket: &B)
where
    B: TxnCrudBucket + ?Sized,
{
    let committed = ok("begin", bucket.begin_crud_txn(ctx));
    ok("set", committed.set(ctx, "terminal-key", b"1"));
    ok("commit", committed.commit(ctx));

    let rolled_back = ok("begin", bucket.begin_crud_txn(ctx));
    ok("rollback", rolled_back.rollback(ctx));

    for (name, txn) in [("committed", &committed), ("rolled back", &rolled_back)] {
        for (op, result) in [
            ("set", txn.set(ctx, "terminal-key", b"2")),
            ("delete", txn.delete(ctx, "terminal-key")),
            ("commit", txn.commit(ctx)),
            ("rollback", txn.rollback(ctx)),
        ] {
            assert!(
                matches!(result, Err(KvError::TxnClosed { .. })),
                "{op} on {name} txn: expected TxnClosed, got {result:?}"
            );
        }
    }

    assert_value(
        "late writes never landed",
        bucket.get(ctx, "terminal-key"),
        b"1",
    );
}

// ---------------------------------------------------------------------------
// Suites
// ---------------------------------------------------------------------------

/// Runs every CRUD and enumeration script, each on a fresh bucket from `make`.
pub fn run_crud_suite<F, T, B>(ctx: &Context, mut make: F)
where
    F: FnMut() -> T,
    T: Deref<Target = B>,
    B: CrudBucket + KeysPrefixTraversingBucket + ?Sized,
{
    debug!("running crud conformance suite");
    test_crud(ctx, &*make());
    test_delete_absent(ctx, &*make());
    test_cancellation(ctx, &*make());
    test_keys(ctx, &*make());
}

/// Runs every transaction script defined by the capability contract, each
/// on a fresh bucket from `make`.
///
/// [`test_txn_terminal`] is not included; run it separately for backends
/// that promise [`KvError::TxnClosed`].
pub fn run_txn_suite<F, T, B>(ctx: &Context, mut make: F, config: &TxnConfig)
where
    F: FnMut() -> T,
    T: Deref<Target = B>,
    B: TxnCrudBucket + KeysPrefixTraversingBucket + ?Sized,
    B::Txn: KeysPrefixTraversingBucket,
{
    debug!(?config, "running transaction conformance suite");
    test_txn_simple(ctx, &*make(), config);
    test_txn_keys(ctx, &*make());
    test_txn_isolation(ctx, &*make());
    test_txn_snapshot(ctx, &*make());
    test_txn_cancellation(ctx, &*make());
}
