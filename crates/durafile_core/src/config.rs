//! Stream configuration.

/// Configuration for opening a durable stream.
///
/// The defaults match the production constants; tests lower the
/// thresholds to exercise checkpoint renewal and log rotation without
/// writing tens of megabytes.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Block cache size in bytes. Rounded up to whole blocks, minimum
    /// one block.
    pub cache_size: usize,

    /// Write a new checkpoint once the log has grown this many bytes
    /// past the current checkpoint address.
    pub renew_checkpoint_after: u64,

    /// Recreate (truncate) the log file once it reaches this size.
    /// Rotation only happens right after a full commit cycle, with no
    /// pending writes in flight.
    pub recreate_log_at: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            cache_size: crate::stream::DEFAULT_CACHE_SIZE,
            renew_checkpoint_after: 10 * 1024,       // 10 KB
            recreate_log_at: 50 * 1024 * 1024,       // 50 MB
        }
    }
}

impl StreamConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the block cache size in bytes.
    #[must_use]
    pub const fn cache_size(mut self, bytes: usize) -> Self {
        self.cache_size = bytes;
        self
    }

    /// Sets the checkpoint renewal threshold in bytes of log growth.
    #[must_use]
    pub const fn renew_checkpoint_after(mut self, bytes: u64) -> Self {
        self.renew_checkpoint_after = bytes;
        self
    }

    /// Sets the log recreation threshold in bytes.
    #[must_use]
    pub const fn recreate_log_at(mut self, bytes: u64) -> Self {
        self.recreate_log_at = bytes;
        self
    }
}
