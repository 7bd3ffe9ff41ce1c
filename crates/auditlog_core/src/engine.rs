//! Engine lifecycle and the producer-facing API.

use crate::config::EngineConfig;
use crate::error::{AppendError, BatchAppendError, CoreError, CoreResult};
use crate::queue::{
    BackoffPolicy, BatchEnqueueError, BoundedQueue, EnqueueError, ProducerToken,
};
use crate::record::Record;
use crate::writer::{WriterPool, WriterShared};
use auditlog_codec::{BatchCodec, EncryptionKey};
use auditlog_storage::{SegmentStore, StoreOptions};
use parking_lot::Mutex;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

/// The audit log engine.
///
/// Producers hold a shared reference (or clone an `Arc`) and call
/// [`append`](Self::append) from any number of threads. The engine owns the
/// queue, the segment store, and the writer pool; [`stop`](Self::stop) tears
/// them down in order.
///
/// An engine is an explicitly owned handle. Multiple engines over disjoint
/// `base_path`s are legal.
pub struct Engine {
    config: EngineConfig,
    queue: Arc<BoundedQueue>,
    store: Arc<SegmentStore>,
    workers: Mutex<Option<WriterPool>>,
    accepting: AtomicBool,
    running: AtomicBool,
}

impl Engine {
    /// Creates an engine from a validated configuration.
    ///
    /// The queue and segment store are constructed here; worker threads are
    /// not spawned until [`start`](Self::start).
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the base directory
    /// cannot be created.
    pub fn new(config: EngineConfig) -> CoreResult<Self> {
        config.validate()?;

        let queue = Arc::new(BoundedQueue::with_options(
            config.queue_capacity,
            BackoffPolicy {
                max_attempts: config.max_attempts,
                base_delay: config.base_retry_delay,
            },
            config.max_explicit_producers,
        ));

        let store = Arc::new(SegmentStore::new(
            &config.base_path,
            config.base_filename.clone(),
            StoreOptions {
                max_segment_size: config.max_segment_size,
                buffer_size: config.buffer_size,
                max_open_files: config.max_open_files,
                max_attempts: config.max_attempts,
                base_retry_delay: config.base_retry_delay,
            },
        )?);

        Ok(Self {
            config,
            queue,
            store,
            workers: Mutex::new(None),
            accepting: AtomicBool::new(false),
            running: AtomicBool::new(false),
        })
    }

    /// Starts the engine without encryption.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::MissingKey`] if the configuration enables
    /// encryption, [`CoreError::AlreadyStarted`] on a double start, and
    /// [`CoreError::Stopped`] after a stop.
    pub fn start(&self) -> CoreResult<()> {
        self.start_inner(None)
    }

    /// Starts the engine with the given encryption key.
    ///
    /// The key bytes are zeroized as soon as the cipher is constructed.
    ///
    /// # Errors
    ///
    /// Same contract as [`start`](Self::start); the key is accepted even when
    /// encryption is disabled (it is dropped unused).
    pub fn start_with_key(&self, key: EncryptionKey) -> CoreResult<()> {
        self.start_inner(Some(key))
    }

    fn start_inner(&self, key: Option<EncryptionKey>) -> CoreResult<()> {
        let mut workers = self.workers.lock();
        if self.running.load(Ordering::Acquire) {
            return Err(CoreError::AlreadyStarted);
        }
        if self.queue.is_closed() {
            return Err(CoreError::Stopped);
        }
        if self.config.use_encryption && key.is_none() {
            return Err(CoreError::MissingKey);
        }

        let codec = BatchCodec::new(
            self.config.use_compression,
            self.config.use_encryption,
            key.as_ref(),
        )?;

        let shared = Arc::new(WriterShared::new(
            Arc::clone(&self.queue),
            Arc::clone(&self.store),
            codec,
            self.config.batch_size,
        ));
        *workers = Some(WriterPool::spawn(self.config.num_writer_threads, shared)?);

        self.accepting.store(true, Ordering::Release);
        self.running.store(true, Ordering::Release);

        tracing::info!(
            writer_threads = self.config.num_writer_threads,
            encryption = self.config.use_encryption,
            compression = self.config.use_compression,
            base_path = %self.config.base_path.display(),
            "audit log engine started"
        );
        Ok(())
    }

    /// Appends one record, routed by its own destination field.
    ///
    /// Blocks for at most `append_timeout` when the queue is full.
    ///
    /// # Errors
    ///
    /// Returns the record back inside the error: [`AppendError::Rejected`]
    /// when the engine is not accepting, [`AppendError::TimedOut`] on
    /// backpressure timeout, [`AppendError::Closed`] once the queue is
    /// closed.
    pub fn append(&self, record: Record) -> Result<(), AppendError> {
        if !self.accepting.load(Ordering::Acquire) {
            return Err(AppendError::Rejected(record));
        }
        self.queue
            .enqueue_blocking(record, self.config.append_timeout)
            .map_err(map_enqueue_error)
    }

    /// Appends one record to an explicit destination, overriding the record's
    /// own.
    ///
    /// # Errors
    ///
    /// Same contract as [`append`](Self::append).
    pub fn append_to(
        &self,
        mut record: Record,
        destination: impl Into<String>,
    ) -> Result<(), AppendError> {
        record.destination = Some(destination.into());
        self.append(record)
    }

    /// Appends a batch of records atomically: either every record is
    /// enqueued, in order, or none is.
    ///
    /// # Errors
    ///
    /// Returns the whole batch back inside the error.
    pub fn append_batch(&self, records: Vec<Record>) -> Result<(), BatchAppendError> {
        if !self.accepting.load(Ordering::Acquire) {
            return Err(BatchAppendError::Rejected(records));
        }
        self.queue
            .enqueue_batch_blocking(records, self.config.append_timeout)
            .map_err(map_batch_enqueue_error)
    }

    /// Appends a batch to an explicit destination, overriding each record's
    /// own.
    ///
    /// # Errors
    ///
    /// Same contract as [`append_batch`](Self::append_batch).
    pub fn append_batch_to(
        &self,
        mut records: Vec<Record>,
        destination: impl Into<String>,
    ) -> Result<(), BatchAppendError> {
        let destination = destination.into();
        for record in &mut records {
            record.destination = Some(destination.clone());
        }
        self.append_batch(records)
    }

    /// Registers an explicit producer token, up to
    /// `max_explicit_producers`.
    ///
    /// Returns `None` once the cap is reached.
    #[must_use]
    pub fn register_producer(&self) -> Option<ProducerToken> {
        BoundedQueue::register(&self.queue)
    }

    /// Token-hinted variant of [`append`](Self::append).
    ///
    /// # Errors
    ///
    /// Same contract as [`append`](Self::append).
    pub fn append_with_token(
        &self,
        token: &mut ProducerToken,
        record: Record,
    ) -> Result<(), AppendError> {
        if !self.accepting.load(Ordering::Acquire) {
            return Err(AppendError::Rejected(record));
        }
        token
            .enqueue_blocking(record, self.config.append_timeout)
            .map_err(map_enqueue_error)
    }

    /// Token-hinted variant of [`append_batch`](Self::append_batch).
    ///
    /// # Errors
    ///
    /// Same contract as [`append_batch`](Self::append_batch).
    pub fn append_batch_with_token(
        &self,
        token: &mut ProducerToken,
        records: Vec<Record>,
    ) -> Result<(), BatchAppendError> {
        if !self.accepting.load(Ordering::Acquire) {
            return Err(BatchAppendError::Rejected(records));
        }
        token
            .enqueue_batch_blocking(records, self.config.append_timeout)
            .map_err(map_batch_enqueue_error)
    }

    /// Stops the engine. Idempotent; safe to call from any thread.
    ///
    /// New appends are rejected immediately. With `wait_for_drain`, every
    /// record already accepted is flushed to disk before this returns; this
    /// is the durable shutdown path. Without it, records still queued may be
    /// dropped. An engine running zero writer threads skips the drain wait:
    /// with no consumers, queued records can never reach disk.
    ///
    /// # Errors
    ///
    /// Returns the first storage error encountered while closing segments;
    /// the engine is fully stopped regardless.
    pub fn stop(&self, wait_for_drain: bool) -> CoreResult<()> {
        let mut workers = self.workers.lock();
        if !self.running.load(Ordering::Acquire) {
            return Ok(());
        }
        self.accepting.store(false, Ordering::Release);

        // nothing drains the queue without workers; waiting would never end
        let has_workers = workers
            .as_ref()
            .map_or(false, |pool| pool.worker_count() > 0);
        if wait_for_drain && has_workers {
            self.queue.wait_until_empty();
        }

        if let Some(pool) = workers.take() {
            pool.stop(wait_for_drain);
            self.queue.close();
            pool.join();
        } else {
            self.queue.close();
        }

        let close_result = self.store.close_all();
        self.running.store(false, Ordering::Release);
        tracing::info!("audit log engine stopped");
        close_result?;
        Ok(())
    }

    /// Exports records in a time range to `path`.
    ///
    /// # Errors
    ///
    /// Always returns [`CoreError::NotImplemented`]; the read path is outside
    /// the engine's scope.
    pub fn export(
        &self,
        _path: &Path,
        _from: SystemTime,
        _to: SystemTime,
    ) -> CoreResult<()> {
        Err(CoreError::NotImplemented)
    }

    /// Returns whether the engine is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Returns the approximate number of records waiting in the queue.
    #[must_use]
    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Returns the engine configuration.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Returns the underlying segment store.
    #[must_use]
    pub fn store(&self) -> &SegmentStore {
        &self.store
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if let Err(e) = self.stop(true) {
            tracing::warn!(error = %e, "engine stop during drop failed");
        }
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("running", &self.is_running())
            .field("queue_len", &self.queue_len())
            .field("base_path", &self.config.base_path)
            .finish_non_exhaustive()
    }
}

fn map_enqueue_error(error: EnqueueError) -> AppendError {
    match error {
        EnqueueError::TimedOut(record) | EnqueueError::Full(record) => {
            AppendError::TimedOut(record)
        }
        EnqueueError::Closed(record) => AppendError::Closed(record),
    }
}

fn map_batch_enqueue_error(error: BatchEnqueueError) -> BatchAppendError {
    match error {
        BatchEnqueueError::TimedOut(records) | BatchEnqueueError::Full(records) => {
            BatchAppendError::TimedOut(records)
        }
        BatchEnqueueError::Closed(records) => BatchAppendError::Closed(records),
        BatchEnqueueError::Oversized(records) => BatchAppendError::Oversized(records),
    }
}
