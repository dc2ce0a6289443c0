//! # nanokv Testkit
//!
//! Test utilities for nanokv backends.
//!
//! This crate provides:
//! - A conformance harness that any bucket implementation can run
//! - Test fixtures for the bundled backends
//! - Property-based test generators using proptest
//! - A `tracing` subscriber for test output
//!
//! ## Usage
//!
//! ```rust
//! use nanokv_storage::Context;
//! use nanokv_testkit::prelude::*;
//!
//! let ctx = Context::background();
//! run_crud_suite(&ctx, TestBucket::memory);
//! run_txn_suite(&ctx, TestBucket::overlay, &TxnConfig::default());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod conformance;
pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::conformance::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use conformance::{run_crud_suite, run_txn_suite, TxnConfig};
pub use fixtures::*;
pub use generators::*;
