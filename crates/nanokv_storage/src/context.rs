//! Cancellation and deadline propagation.
//!
//! Every bucket operation takes a [`Context`]. Operations check it on entry
//! and key scans check it between keys, so a cancelled or expired context
//! stops work promptly with [`KvError::Cancelled`] or
//! [`KvError::DeadlineExceeded`].
//!
//! Contexts form a tree. A derived context is cancelled when it or any of
//! its ancestors is cancelled, and its deadline is never later than its
//! parent's. Cancelling a derived context does not affect the parent.
//!
//! ```rust
//! use nanokv_storage::Context;
//! use std::time::Duration;
//!
//! let root = Context::background();
//! let ctx = root.with_timeout(Duration::from_secs(5));
//! assert!(ctx.check().is_ok());
//!
//! root.cancel();
//! assert!(ctx.check().unwrap_err().is_cancellation());
//! ```

use crate::error::{KvError, KvResult};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug)]
struct Node {
    cancelled: AtomicBool,
    deadline: Option<Instant>,
    parent: Option<Arc<Node>>,
}

/// A cancellable, deadline-bearing execution context.
///
/// Cloning is cheap and clones share cancellation state.
#[derive(Debug, Clone)]
pub struct Context {
    node: Arc<Node>,
}

impl Context {
    /// Returns a root context that is never cancelled and has no deadline
    /// until [`cancel`](Self::cancel) is called on it.
    #[must_use]
    pub fn background() -> Self {
        Self {
            node: Arc::new(Node {
                cancelled: AtomicBool::new(false),
                deadline: None,
                parent: None,
            }),
        }
    }

    fn derive(&self, deadline: Option<Instant>) -> Self {
        let deadline = match (self.node.deadline, deadline) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        Self {
            node: Arc::new(Node {
                cancelled: AtomicBool::new(false),
                deadline,
                parent: Some(Arc::clone(&self.node)),
            }),
        }
    }

    /// Derives a context that can be cancelled independently of this one.
    #[must_use]
    pub fn with_cancel(&self) -> Self {
        self.derive(None)
    }

    /// Derives a context that expires at `deadline`, or earlier if this
    /// context expires first.
    #[must_use]
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        self.derive(Some(deadline))
    }

    /// Derives a context that expires after `timeout`.
    #[must_use]
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        // An unrepresentable instant is as good as no deadline at all.
        match Instant::now().checked_add(timeout) {
            Some(deadline) => self.with_deadline(deadline),
            None => self.with_cancel(),
        }
    }

    /// Cancels this context and every context derived from it.
    #[inline]
    pub fn cancel(&self) {
        self.node.cancelled.store(true, Ordering::SeqCst);
    }

    /// Returns true if this context or an ancestor was cancelled.
    #[inline]
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        let mut node = Some(&self.node);
        while let Some(n) = node {
            if n.cancelled.load(Ordering::SeqCst) {
                return true;
            }
            node = n.parent.as_ref();
        }
        false
    }

    /// Returns the effective deadline, if any.
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.node.deadline
    }

    /// Returns the time left before the deadline, if there is one.
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        self.node
            .deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Returns why the context is done, or `None` while it is still live.
    ///
    /// Cancellation takes precedence over an elapsed deadline.
    #[must_use]
    pub fn err(&self) -> Option<KvError> {
        if self.is_cancelled() {
            return Some(KvError::Cancelled);
        }
        match self.node.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(KvError::DeadlineExceeded),
            _ => None,
        }
    }

    /// Returns an error if the context is cancelled or expired.
    ///
    /// # Errors
    ///
    /// Returns [`KvError::Cancelled`] or [`KvError::DeadlineExceeded`].
    pub fn check(&self) -> KvResult<()> {
        match self.err() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::background()
    }
}
