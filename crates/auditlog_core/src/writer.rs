//! Writer worker pool.
//!
//! Workers drain the record queue in batches, group records by destination,
//! run each group through the batch codec, and hand the encoded blob to the
//! segment store. Encoding and I/O failures are contained here: producers
//! were already acknowledged at enqueue time, so a failed batch is logged and
//! dropped after the store exhausts its retries.

use crate::queue::BoundedQueue;
use crate::record::Record;
use auditlog_codec::{BatchCodec, IV_SIZE};
use auditlog_storage::SegmentStore;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Longest idle sleep between empty polls.
const MAX_IDLE_SLEEP: Duration = Duration::from_millis(100);

/// State shared between the engine and its workers.
pub(crate) struct WriterShared {
    pub(crate) queue: Arc<BoundedQueue>,
    pub(crate) store: Arc<SegmentStore>,
    pub(crate) codec: BatchCodec,
    pub(crate) batch_size: usize,
    stopping: AtomicBool,
    drain: AtomicBool,
}

impl WriterShared {
    pub(crate) fn new(
        queue: Arc<BoundedQueue>,
        store: Arc<SegmentStore>,
        codec: BatchCodec,
        batch_size: usize,
    ) -> Self {
        Self {
            queue,
            store,
            codec,
            batch_size,
            stopping: AtomicBool::new(false),
            drain: AtomicBool::new(true),
        }
    }
}

/// Owns the writer threads for one engine.
pub(crate) struct WriterPool {
    shared: Arc<WriterShared>,
    handles: Vec<JoinHandle<()>>,
}

impl WriterPool {
    /// Spawns `num_threads` workers over the shared queue and store.
    pub(crate) fn spawn(num_threads: usize, shared: Arc<WriterShared>) -> std::io::Result<Self> {
        let mut handles = Vec::with_capacity(num_threads);
        for worker_id in 0..num_threads {
            let shared = Arc::clone(&shared);
            let handle = thread::Builder::new()
                .name(format!("auditlog-writer-{worker_id}"))
                .spawn(move || worker_loop(worker_id as u32, &shared))?;
            handles.push(handle);
        }
        Ok(Self { shared, handles })
    }

    /// Returns the number of worker threads in the pool.
    pub(crate) fn worker_count(&self) -> usize {
        self.handles.len()
    }

    /// Signals workers to stop. With `drain`, workers exit only once the
    /// queue is empty; without, at their next poll.
    pub(crate) fn stop(&self, drain: bool) {
        self.shared.drain.store(drain, Ordering::Release);
        self.shared.stopping.store(true, Ordering::Release);
    }

    /// Joins every worker thread.
    pub(crate) fn join(mut self) {
        for handle in self.handles.drain(..) {
            if handle.join().is_err() {
                tracing::error!("writer thread panicked");
            }
        }
    }
}

fn worker_loop(worker_id: u32, shared: &WriterShared) {
    let mut batch: Vec<Record> = Vec::with_capacity(shared.batch_size);
    let mut groups: Vec<(Option<String>, Vec<Record>)> = Vec::new();
    let mut iv_counter: u64 = 0;
    let mut idle_sleep = Duration::from_millis(1);

    loop {
        let drained = shared.queue.dequeue_batch(&mut batch, shared.batch_size);

        if drained == 0 {
            if shared.stopping.load(Ordering::Acquire)
                && (!shared.drain.load(Ordering::Acquire) || shared.queue.is_empty())
            {
                break;
            }
            thread::sleep(idle_sleep);
            idle_sleep = (idle_sleep * 2).min(MAX_IDLE_SLEEP);
            continue;
        }
        idle_sleep = Duration::from_millis(1);

        group_by_destination(&mut batch, &mut groups);
        for (destination, records) in groups.drain(..) {
            write_group(worker_id, shared, &mut iv_counter, destination, &records);
        }
    }

    if let Err(e) = shared.store.flush_all() {
        tracing::error!(worker_id, error = %e, "final flush failed");
    }
}

/// Groups records by destination in a single pass, preserving arrival order
/// within each group. A flat vector beats a hash map here: batches touch few
/// distinct destinations.
fn group_by_destination(
    batch: &mut Vec<Record>,
    groups: &mut Vec<(Option<String>, Vec<Record>)>,
) {
    for record in batch.drain(..) {
        match groups
            .iter_mut()
            .find(|(destination, _)| *destination == record.destination)
        {
            Some((_, records)) => records.push(record),
            None => {
                let destination = record.destination.clone();
                groups.push((destination, vec![record]));
            }
        }
    }
}

fn write_group(
    worker_id: u32,
    shared: &WriterShared,
    iv_counter: &mut u64,
    destination: Option<String>,
    records: &[Record],
) {
    let mut plaintext = Vec::with_capacity(
        records
            .iter()
            .map(|r| 4 + r.encoded_size())
            .sum::<usize>(),
    );
    for record in records {
        let bytes = record.serialize();
        plaintext.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
        plaintext.extend_from_slice(&bytes);
    }

    let iv = next_iv(worker_id, iv_counter);
    let blob = match shared.codec.encode(&plaintext, &iv) {
        Ok(blob) => blob,
        Err(e) => {
            tracing::error!(
                worker_id,
                destination = destination.as_deref().unwrap_or("<default>"),
                records = records.len(),
                error = %e,
                "batch encode failed; dropping batch"
            );
            return;
        }
    };

    if let Err(e) = shared.store.write(destination.as_deref(), &blob) {
        tracing::error!(
            worker_id,
            destination = destination.as_deref().unwrap_or("<default>"),
            records = records.len(),
            error = %e,
            "batch write failed after retries; dropping batch"
        );
    }
}

/// Derives a per-blob IV: worker id in the first 4 bytes, a worker-local
/// counter in the remaining 8. Unique per key as long as no worker encodes
/// more than 2^64 blobs, which makes IV reuse under one engine impossible.
fn next_iv(worker_id: u32, counter: &mut u64) -> [u8; IV_SIZE] {
    let mut iv = [0u8; IV_SIZE];
    iv[..4].copy_from_slice(&worker_id.to_le_bytes());
    iv[4..].copy_from_slice(&counter.to_le_bytes());
    *counter = counter.wrapping_add(1);
    iv
}
