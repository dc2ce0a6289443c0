//! # nanokv Storage
//!
//! Capability-based key-value buckets with single-level transactions.
//!
//! Storage is split into small capabilities so that client code can depend
//! on exactly what it uses and any backend that implements a capability can
//! be swapped in:
//!
//! - [`CrudBucket`] - get, set, delete
//! - [`KeysPrefixTraversingBucket`] - key enumeration and prefix scans
//! - [`TxnCrudBucket`] + [`Committer`] - transactions with commit/rollback
//!
//! The [`helpers`] module holds algorithms written once against these
//! traits (`all_keys`, `all_keys_prefix`, `set_map`, ...). They work on a
//! bucket and on a transaction handle alike.
//!
//! ## Design Principles
//!
//! - Values are opaque bytes, replaced wholesale on every write
//! - Every operation takes a [`Context`] and stops when it is cancelled
//! - Absent keys surface as [`KvError::KeyNotFound`]; every other failure
//!   passes through unchanged
//! - No nested transactions
//!
//! ## Available Backends
//!
//! - [`MemoryBucket`] - In-memory, snapshot transactions
//! - [`FileBucket`] - One file per key in a locked directory
//! - [`TxnOverlay`] - Adds transactions to any [`CrudBucket`]
//! - [`PrefixBucket`] - Namespaced view over another bucket
//!
//! ## Example
//!
//! ```rust
//! use nanokv_storage::{helpers, Committer, Context, CrudBucket, MemoryBucket, TxnCrudBucket};
//!
//! let ctx = Context::background();
//! let bucket = MemoryBucket::new();
//! bucket.set(&ctx, "hello", b"dlrow").unwrap();
//!
//! let txn = bucket.begin_crud_txn(&ctx).unwrap();
//! txn.delete(&ctx, "hello").unwrap();
//! assert!(helpers::all_keys(&ctx, &txn).unwrap().is_empty());
//! txn.rollback(&ctx).unwrap();
//!
//! assert_eq!(bucket.get(&ctx, "hello").unwrap(), b"dlrow");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod bucket;
mod config;
mod context;
mod error;
mod file;
pub mod helpers;
mod memory;
mod overlay;
mod prefix;
mod txn;

pub use bucket::{Committer, CrudBucket, KeyIter, KeysPrefixTraversingBucket, TxnCrudBucket};
pub use config::FileConfig;
pub use context::Context;
pub use error::{KvError, KvResult};
pub use file::{FileBucket, MAX_KEY_LEN};
pub use memory::{MemoryBucket, MemoryTxn};
pub use overlay::{OverlayTxn, TxnOverlay};
pub use prefix::PrefixBucket;
pub use txn::{Mutation, MutationLog, TxnState};
