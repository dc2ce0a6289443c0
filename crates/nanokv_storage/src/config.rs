//! Backend configuration.

/// Configuration for opening a [`FileBucket`](crate::FileBucket).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileConfig {
    /// Whether to create the bucket directory if it doesn't exist.
    pub create_if_missing: bool,

    /// Whether to fsync every value file before it replaces the old one
    /// (safer but slower).
    pub sync_on_write: bool,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            sync_on_write: false,
        }
    }
}

impl FileConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether to create the bucket directory if missing.
    #[must_use]
    pub const fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Sets whether to fsync on every write.
    #[must_use]
    pub const fn sync_on_write(mut self, value: bool) -> Self {
        self.sync_on_write = value;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = FileConfig::default();
        assert!(config.create_if_missing);
        assert!(!config.sync_on_write);
    }

    #[test]
    fn builder_pattern() {
        let config = FileConfig::new()
            .create_if_missing(false)
            .sync_on_write(true);

        assert!(!config.create_if_missing);
        assert!(config.sync_on_write);
    }
}
