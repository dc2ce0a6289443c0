//! Property tests checking buckets against a `BTreeMap` model.

use nanokv_storage::helpers::{all_keys, all_keys_prefix, set_map};
use nanokv_storage::{
    Committer, Context, CrudBucket, KeysPrefixTraversingBucket, MemoryBucket, PrefixBucket,
    TxnCrudBucket, TxnOverlay,
};
use nanokv_testkit::generators::*;
use proptest::prelude::*;
use std::collections::{BTreeMap, BTreeSet};

type Model = BTreeMap<String, Vec<u8>>;

fn snapshot<B>(ctx: &Context, bucket: &B) -> Model
where
    B: CrudBucket + KeysPrefixTraversingBucket + ?Sized,
{
    all_keys(ctx, bucket)
        .unwrap()
        .into_iter()
        .map(|key| {
            let value = bucket.get(ctx, &key).unwrap();
            (key, value)
        })
        .collect()
}

fn seeded(contents: &Model) -> MemoryBucket {
    MemoryBucket::with_data(contents.clone())
}

/// Applies `ops` in a transaction, checks reads against the model as it
/// goes, then commits or rolls back and checks the bucket.
fn check_txn<B>(bucket: &B, initial: &Model, ops: &[Op], commit: bool) -> Result<(), TestCaseError>
where
    B: TxnCrudBucket + KeysPrefixTraversingBucket,
    B::Txn: KeysPrefixTraversingBucket,
{
    let ctx = Context::background();
    let txn = bucket.begin_crud_txn(&ctx).unwrap();
    let mut model = initial.clone();

    for op in ops {
        op.apply(&ctx, &txn).unwrap();
        op.apply_to_model(&mut model);

        let key = match op {
            Op::Set(key, _) | Op::Delete(key) => key,
        };
        match model.get(key) {
            Some(want) => {
                prop_assert_eq!(&txn.get(&ctx, key).unwrap(), want);
            }
            None => {
                prop_assert!(txn.get(&ctx, key).unwrap_err().is_not_found());
            }
        }
    }

    prop_assert_eq!(&snapshot(&ctx, &txn), &model);
    prop_assert_eq!(&snapshot(&ctx, bucket), initial);

    if commit {
        txn.commit(&ctx).unwrap();
        prop_assert_eq!(&snapshot(&ctx, bucket), &model);
    } else {
        txn.rollback(&ctx).unwrap();
        prop_assert_eq!(&snapshot(&ctx, bucket), initial);
    }
    Ok(())
}

/// Writes to the bucket after begin must not change what the transaction
/// reads; the bucket itself ends up matching the writes.
fn check_begin_state<B>(
    bucket: &B,
    initial: &Model,
    later: &[Op],
) -> Result<(), TestCaseError>
where
    B: TxnCrudBucket + KeysPrefixTraversingBucket,
    B::Txn: KeysPrefixTraversingBucket,
{
    let ctx = Context::background();
    let txn = bucket.begin_crud_txn(&ctx).unwrap();
    let mut model = initial.clone();
    for op in later {
        op.apply(&ctx, bucket).unwrap();
        op.apply_to_model(&mut model);
    }

    prop_assert_eq!(&snapshot(&ctx, &txn), initial);
    prop_assert_eq!(&snapshot(&ctx, bucket), &model);
    txn.rollback(&ctx).unwrap();
    Ok(())
}

fn check_prefix_scan<B>(ctx: &Context, bucket: &B, prefix: &str) -> Result<(), TestCaseError>
where
    B: KeysPrefixTraversingBucket + ?Sized,
{
    let want: BTreeSet<String> = all_keys(ctx, bucket)
        .unwrap()
        .into_iter()
        .filter(|key| key.starts_with(prefix))
        .collect();
    let have = all_keys_prefix(ctx, bucket, prefix).unwrap();
    prop_assert_eq!(have.len(), want.len());
    prop_assert_eq!(have.into_iter().collect::<BTreeSet<_>>(), want);
    Ok(())
}

proptest! {
    #[test]
    fn prop_keys_are_unique(contents in contents_strategy(), ops in ops_strategy(24)) {
        let ctx = Context::background();
        let bucket = seeded(&contents);
        for op in &ops {
            op.apply(&ctx, &bucket).unwrap();
        }
        let keys = all_keys(&ctx, &bucket).unwrap();
        let unique: BTreeSet<&String> = keys.iter().collect();
        prop_assert_eq!(keys.len(), unique.len());
    }

    #[test]
    fn prop_memory_matches_model(contents in contents_strategy(), ops in ops_strategy(24)) {
        let ctx = Context::background();
        let bucket = seeded(&contents);
        let mut model = contents;
        for op in &ops {
            op.apply(&ctx, &bucket).unwrap();
            op.apply_to_model(&mut model);
        }
        prop_assert_eq!(snapshot(&ctx, &bucket), model);
    }

    #[test]
    fn prop_memory_txn_commit(contents in contents_strategy(), ops in ops_strategy(24)) {
        check_txn(&seeded(&contents), &contents, &ops, true)?;
    }

    #[test]
    fn prop_memory_txn_rollback(contents in contents_strategy(), ops in ops_strategy(24)) {
        check_txn(&seeded(&contents), &contents, &ops, false)?;
    }

    #[test]
    fn prop_overlay_txn_commit(contents in contents_strategy(), ops in ops_strategy(24)) {
        check_txn(&TxnOverlay::new(seeded(&contents)), &contents, &ops, true)?;
    }

    #[test]
    fn prop_overlay_txn_rollback(contents in contents_strategy(), ops in ops_strategy(24)) {
        check_txn(&TxnOverlay::new(seeded(&contents)), &contents, &ops, false)?;
    }

    #[test]
    fn prop_memory_txn_keeps_begin_state(
        contents in contents_strategy(),
        later in ops_strategy(24),
    ) {
        check_begin_state(&seeded(&contents), &contents, &later)?;
    }

    #[test]
    fn prop_overlay_txn_keeps_begin_state(
        contents in contents_strategy(),
        later in ops_strategy(24),
    ) {
        check_begin_state(&TxnOverlay::new(seeded(&contents)), &contents, &later)?;
    }

    #[test]
    fn prop_prefix_txn_commit(contents in contents_strategy(), ops in ops_strategy(24)) {
        let view = PrefixBucket::new(seeded(&BTreeMap::new()), "ns/");
        let ctx = Context::background();
        set_map(&ctx, &view, &contents).unwrap();
        check_txn(&view, &contents, &ops, true)?;
    }

    #[test]
    fn prop_prefix_filter_matches_full_scan(
        contents in contents_strategy(),
        ops in ops_strategy(16),
        prefix in prefix_strategy(),
    ) {
        let ctx = Context::background();
        let bucket = seeded(&contents);
        let txn = bucket.begin_crud_txn(&ctx).unwrap();
        for op in &ops {
            op.apply(&ctx, &txn).unwrap();
        }

        check_prefix_scan(&ctx, &bucket, &prefix)?;
        check_prefix_scan(&ctx, &txn, &prefix)?;
    }

    #[test]
    fn prop_bulk_set_in_txn(contents in contents_strategy(), pairs in contents_strategy()) {
        let ctx = Context::background();
        let bucket = seeded(&contents);
        let txn = bucket.begin_crud_txn(&ctx).unwrap();
        set_map(&ctx, &txn, &pairs).unwrap();

        for (key, value) in &pairs {
            prop_assert_eq!(&txn.get(&ctx, key).unwrap(), value);
        }
        prop_assert_eq!(snapshot(&ctx, &bucket), contents.clone());

        txn.commit(&ctx).unwrap();
        let mut model = contents;
        model.extend(pairs);
        prop_assert_eq!(snapshot(&ctx, &bucket), model);
    }
}
