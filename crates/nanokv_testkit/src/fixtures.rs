//! Test fixtures and bucket helpers.
//!
//! Provides ready-made buckets for every bundled backend, with temporary
//! directories cleaned up on drop.

use nanokv_storage::{FileBucket, FileConfig, MemoryBucket, PrefixBucket, TxnOverlay};
use std::path::Path;
use std::sync::Once;
use tempfile::TempDir;
use tracing_subscriber::EnvFilter;

/// A test bucket with automatic cleanup.
pub struct TestBucket<B> {
    /// The bucket instance.
    pub bucket: B,
    /// The temporary directory (kept alive to prevent cleanup).
    _temp_dir: Option<TempDir>,
}

impl TestBucket<MemoryBucket> {
    /// Creates an empty in-memory bucket.
    pub fn memory() -> Self {
        Self {
            bucket: MemoryBucket::new(),
            _temp_dir: None,
        }
    }
}

impl TestBucket<TxnOverlay<MemoryBucket>> {
    /// Creates an in-memory bucket with overlay transactions.
    pub fn overlay() -> Self {
        Self {
            bucket: TxnOverlay::new(MemoryBucket::new()),
            _temp_dir: None,
        }
    }
}

impl TestBucket<TxnOverlay<FileBucket>> {
    /// Creates a file bucket in a fresh temporary directory, with overlay
    /// transactions.
    pub fn file() -> Self {
        Self::file_with_config(FileConfig::default())
    }

    /// Creates a file bucket with a custom configuration.
    pub fn file_with_config(config: FileConfig) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let bucket = FileBucket::open_with_config(&temp_dir.path().join("bucket"), config)
            .expect("Failed to open file bucket");

        Self {
            bucket: TxnOverlay::new(bucket),
            _temp_dir: Some(temp_dir),
        }
    }
}

impl TestBucket<PrefixBucket<MemoryBucket>> {
    /// Creates a view under `prefix` over an in-memory bucket.
    ///
    /// The backing bucket is seeded with a few keys outside the prefix so
    /// leaks across the namespace boundary show up in enumeration.
    pub fn prefixed(prefix: &str) -> Self {
        let backend = MemoryBucket::with_data([
            ("outside/hello", "x"),
            ("outside/help", "x"),
            ("hel", "x"),
        ]);
        Self {
            bucket: PrefixBucket::new(backend, prefix),
            _temp_dir: None,
        }
    }
}

impl<B> TestBucket<B> {
    /// Returns the temporary directory if file-based, None if in-memory.
    ///
    /// A file bucket lives in the `bucket` subdirectory of this path.
    pub fn path(&self) -> Option<&Path> {
        self._temp_dir.as_ref().map(TempDir::path)
    }
}

impl<B> std::ops::Deref for TestBucket<B> {
    type Target = B;

    fn deref(&self) -> &Self::Target {
        &self.bucket
    }
}

impl<B> std::ops::DerefMut for TestBucket<B> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.bucket
    }
}

/// Runs a test with an empty in-memory bucket.
///
/// # Example
///
/// ```rust
/// use nanokv_storage::{Context, CrudBucket};
/// use nanokv_testkit::with_memory_bucket;
///
/// with_memory_bucket(|bucket| {
///     let ctx = Context::background();
///     bucket.set(&ctx, "k", b"v").unwrap();
/// });
/// ```
pub fn with_memory_bucket<F, R>(f: F) -> R
where
    F: FnOnce(&MemoryBucket) -> R,
{
    let test_bucket = TestBucket::memory();
    f(&test_bucket.bucket)
}

/// Runs a test with an empty file bucket in a temporary directory.
pub fn with_file_bucket<F, R>(f: F) -> R
where
    F: FnOnce(&TxnOverlay<FileBucket>, &Path) -> R,
{
    let test_bucket = TestBucket::file();
    let path = test_bucket.bucket.inner().path().to_path_buf();
    f(&test_bucket.bucket, &path)
}

static TRACING: Once = Once::new();

/// Installs a `tracing` subscriber that writes through the test harness.
///
/// The filter comes from `RUST_LOG` and defaults to `warn`. Safe to call
/// from every test; only the first call installs anything.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
        // Another subscriber may already be set by the embedding test binary.
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}
