//! Engine configuration.

use crate::error::{CoreError, CoreResult};
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for an audit log engine.
///
/// Owned by the engine for its lifetime. All fields have working defaults;
/// nothing is read from the environment.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Directory segment files are written under.
    pub base_path: PathBuf,
    /// Segment family used when a record carries no destination.
    pub base_filename: String,
    /// Maximum segment size before rotation.
    pub max_segment_size: u64,
    /// Write buffer capacity per open segment.
    pub buffer_size: usize,
    /// Capacity of the record queue (rounded up to a power of two).
    pub queue_capacity: usize,
    /// Maximum records a writer drains and encodes per batch.
    pub batch_size: usize,
    /// Number of writer threads started by the engine.
    ///
    /// Zero is legal: the engine accepts and queues records but nothing
    /// drains them. Useful for exercising backpressure and for setups where
    /// something else owns the queue's consumer side.
    pub num_writer_threads: usize,
    /// How long `append` may block on a full queue.
    pub append_timeout: Duration,
    /// Maximum attempts for retried I/O and enqueue backoff.
    pub max_attempts: u32,
    /// Base delay for exponential backoff.
    pub base_retry_delay: Duration,
    /// Maximum number of concurrently open segment files.
    pub max_open_files: usize,
    /// Maximum number of registered producer tokens.
    pub max_explicit_producers: usize,
    /// Whether batches are encrypted before hitting disk.
    pub use_encryption: bool,
    /// Whether batches are compressed before encryption.
    pub use_compression: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            base_path: PathBuf::from("./logs"),
            base_filename: "default".to_string(),
            max_segment_size: 100 * 1024 * 1024,
            buffer_size: 64 * 1024,
            queue_capacity: 8192,
            batch_size: 100,
            num_writer_threads: 2,
            append_timeout: Duration::from_secs(60),
            max_attempts: 5,
            base_retry_delay: Duration::from_millis(1),
            max_open_files: 128,
            max_explicit_producers: 64,
            use_encryption: false,
            use_compression: false,
        }
    }
}

impl EngineConfig {
    /// Creates a configuration with defaults rooted at `base_path`.
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
            ..Self::default()
        }
    }

    /// Sets the default segment family name.
    #[must_use]
    pub fn with_base_filename(mut self, base_filename: impl Into<String>) -> Self {
        self.base_filename = base_filename.into();
        self
    }

    /// Sets the maximum segment size.
    #[must_use]
    pub fn with_max_segment_size(mut self, max_segment_size: u64) -> Self {
        self.max_segment_size = max_segment_size;
        self
    }

    /// Sets the write buffer capacity.
    #[must_use]
    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    /// Sets the queue capacity.
    #[must_use]
    pub fn with_queue_capacity(mut self, queue_capacity: usize) -> Self {
        self.queue_capacity = queue_capacity;
        self
    }

    /// Sets the writer batch size.
    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Sets the number of writer threads.
    #[must_use]
    pub fn with_writer_threads(mut self, num_writer_threads: usize) -> Self {
        self.num_writer_threads = num_writer_threads;
        self
    }

    /// Sets the append timeout.
    #[must_use]
    pub fn with_append_timeout(mut self, append_timeout: Duration) -> Self {
        self.append_timeout = append_timeout;
        self
    }

    /// Sets the retry attempt limit.
    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Sets the base retry delay.
    #[must_use]
    pub fn with_base_retry_delay(mut self, base_retry_delay: Duration) -> Self {
        self.base_retry_delay = base_retry_delay;
        self
    }

    /// Sets the open-file cap.
    #[must_use]
    pub fn with_max_open_files(mut self, max_open_files: usize) -> Self {
        self.max_open_files = max_open_files;
        self
    }

    /// Sets the registered-producer cap.
    #[must_use]
    pub fn with_max_explicit_producers(mut self, max_explicit_producers: usize) -> Self {
        self.max_explicit_producers = max_explicit_producers;
        self
    }

    /// Enables or disables encryption.
    #[must_use]
    pub fn with_encryption(mut self, use_encryption: bool) -> Self {
        self.use_encryption = use_encryption;
        self
    }

    /// Enables or disables compression.
    #[must_use]
    pub fn with_compression(mut self, use_compression: bool) -> Self {
        self.use_compression = use_compression;
        self
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first unusable field.
    pub fn validate(&self) -> CoreResult<()> {
        if self.base_filename.is_empty() {
            return Err(CoreError::invalid_config("base_filename must not be empty"));
        }
        if self.queue_capacity < 2 {
            return Err(CoreError::invalid_config("queue_capacity must be >= 2"));
        }
        if self.batch_size == 0 {
            return Err(CoreError::invalid_config("batch_size must be > 0"));
        }
        if self.max_attempts == 0 {
            return Err(CoreError::invalid_config("max_attempts must be > 0"));
        }
        if self.max_open_files == 0 {
            return Err(CoreError::invalid_config("max_open_files must be > 0"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        EngineConfig::default().validate().unwrap();
    }

    #[test]
    fn builder_chain() {
        let config = EngineConfig::new("/tmp/audit")
            .with_base_filename("audit")
            .with_queue_capacity(1024)
            .with_batch_size(50)
            .with_writer_threads(4)
            .with_encryption(true)
            .with_compression(true);

        assert_eq!(config.base_path, PathBuf::from("/tmp/audit"));
        assert_eq!(config.base_filename, "audit");
        assert_eq!(config.queue_capacity, 1024);
        assert_eq!(config.batch_size, 50);
        assert_eq!(config.num_writer_threads, 4);
        assert!(config.use_encryption);
        assert!(config.use_compression);
    }

    #[test]
    fn zero_writers_is_legal() {
        EngineConfig::default()
            .with_writer_threads(0)
            .validate()
            .unwrap();
    }

    #[test]
    fn tiny_queue_rejected() {
        let config = EngineConfig::default().with_queue_capacity(1);
        assert!(matches!(
            config.validate(),
            Err(CoreError::InvalidConfig { .. })
        ));
    }
}
