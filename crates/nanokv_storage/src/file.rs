//! Directory-backed bucket for persistent storage.
//!
//! Layout:
//!
//! ```text
//! <bucket_dir>/
//! ├─ LOCK              # Advisory lock, one process at a time
//! ├─ k<hex(key)>.val   # One file per key holding the raw value
//! └─ k<hex(key)>.tmp   # In-flight write, renamed over the .val file
//! ```
//!
//! File names are `k` followed by the lowercase hex encoding of the key
//! bytes, so any key string (including the empty one) maps to a portable
//! file name.

use crate::bucket::{CrudBucket, KeyIter, KeysPrefixTraversingBucket};
use crate::config::FileConfig;
use crate::context::Context;
use crate::error::{KvError, KvResult};
use fs2::FileExt;
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

const LOCK_FILE: &str = "LOCK";
const VALUE_EXT: &str = "val";
const TEMP_EXT: &str = "tmp";

/// Longest key accepted, in bytes. Hex doubles it and most file systems
/// cap names at 255 bytes.
pub const MAX_KEY_LEN: usize = 120;

fn encode_key(key: &str) -> String {
    use std::fmt::Write as _;
    let mut out = String::with_capacity(1 + key.len() * 2);
    out.push('k');
    for byte in key.bytes() {
        let _ = write!(out, "{byte:02x}");
    }
    out
}

fn decode_key(stem: &str) -> Option<String> {
    let stem = stem.strip_prefix('k')?;
    if stem.len() % 2 != 0 {
        return None;
    }
    let bytes = (0..stem.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(stem.get(i..i + 2)?, 16).ok())
        .collect::<Option<Vec<u8>>>()?;
    String::from_utf8(bytes).ok()
}

/// A bucket stored as one file per key in a directory.
///
/// Data survives process restarts. Each write lands in a temporary file
/// that is renamed over the old value, so a reader never sees a torn value.
///
/// The bucket holds an exclusive lock on its directory for as long as it is
/// open. It has no native transactions; wrap it in a
/// [`TxnOverlay`](crate::TxnOverlay) to get them.
///
/// # Example
///
/// ```no_run
/// use nanokv_storage::{Context, CrudBucket, FileBucket};
/// use std::path::Path;
///
/// let ctx = Context::background();
/// let bucket = FileBucket::open(Path::new("data/settings")).unwrap();
/// bucket.set(&ctx, "theme", b"dark").unwrap();
/// ```
#[derive(Debug)]
pub struct FileBucket {
    dir: PathBuf,
    config: FileConfig,
    /// Serializes writers within this process.
    write_lock: Mutex<()>,
    /// Held for exclusive access to the directory.
    _lock_file: File,
}

impl FileBucket {
    /// Opens or creates a bucket in `dir` with the default configuration.
    ///
    /// # Errors
    ///
    /// See [`open_with_config`](Self::open_with_config).
    pub fn open(dir: &Path) -> KvResult<Self> {
        Self::open_with_config(dir, FileConfig::default())
    }

    /// Opens a bucket in `dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The directory doesn't exist and `create_if_missing` is false
    /// - The path is not a directory
    /// - Another process holds the lock ([`KvError::Locked`])
    /// - I/O errors occur
    pub fn open_with_config(dir: &Path, config: FileConfig) -> KvResult<Self> {
        if !dir.exists() {
            if config.create_if_missing {
                fs::create_dir_all(dir)?;
            } else {
                return Err(KvError::Io(io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("bucket directory does not exist: {}", dir.display()),
                )));
            }
        }

        if !dir.is_dir() {
            return Err(KvError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("path is not a directory: {}", dir.display()),
            )));
        }

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(dir.join(LOCK_FILE))?;

        if lock_file.try_lock_exclusive().is_err() {
            return Err(KvError::Locked);
        }

        debug!(dir = %dir.display(), "opened file bucket");
        Ok(Self {
            dir: dir.to_path_buf(),
            config,
            write_lock: Mutex::new(()),
            _lock_file: lock_file,
        })
    }

    /// Returns the bucket directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// Returns the configuration the bucket was opened with.
    #[must_use]
    pub fn config(&self) -> &FileConfig {
        &self.config
    }

    fn value_path(&self, key: &str) -> KvResult<PathBuf> {
        if key.len() > MAX_KEY_LEN {
            return Err(KvError::invalid_key(format!(
                "key is {} bytes, limit is {MAX_KEY_LEN}",
                key.len()
            )));
        }
        Ok(self.dir.join(format!("{}.{VALUE_EXT}", encode_key(key))))
    }
}

impl CrudBucket for FileBucket {
    fn get(&self, ctx: &Context, key: &str) -> KvResult<Vec<u8>> {
        ctx.check()?;
        match fs::read(self.value_path(key)?) {
            Ok(value) => Ok(value),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Err(KvError::key_not_found(key)),
            Err(err) => Err(err.into()),
        }
    }

    fn set(&self, ctx: &Context, key: &str, value: &[u8]) -> KvResult<()> {
        ctx.check()?;
        let path = self.value_path(key)?;
        let temp = path.with_extension(TEMP_EXT);

        let _guard = self.write_lock.lock();
        let mut file = File::create(&temp)?;
        file.write_all(value)?;
        if self.config.sync_on_write {
            file.sync_all()?;
        }
        drop(file);
        fs::rename(&temp, &path)?;

        trace!(key, bytes = value.len(), "wrote value file");
        Ok(())
    }

    fn delete(&self, ctx: &Context, key: &str) -> KvResult<()> {
        ctx.check()?;
        let path = self.value_path(key)?;
        let _guard = self.write_lock.lock();
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

impl KeysPrefixTraversingBucket for FileBucket {
    fn keys(&self, ctx: &Context) -> KvResult<KeyIter<'_>> {
        ctx.check()?;
        let entries = fs::read_dir(&self.dir)?;
        Ok(Box::new(entries.filter_map(|entry| {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => return Some(Err(err.into())),
            };
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(VALUE_EXT) {
                return None;
            }
            let key = path.file_stem().and_then(|s| s.to_str()).and_then(decode_key);
            if key.is_none() {
                trace!(path = %path.display(), "skipping foreign file in bucket directory");
            }
            key.map(Ok)
        })))
    }
}
