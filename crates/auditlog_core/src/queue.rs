//! Bounded lock-free MPMC queue of audit records.
//!
//! A classical bounded multi-producer/multi-consumer ring: one cursor each
//! for enqueue and dequeue, and a sequence counter per slot. Producers CAS
//! the enqueue cursor to claim a slot, write the record, then publish by
//! bumping the slot sequence; consumers mirror the protocol. The fast path
//! never takes a lock; a mutex/condvar pair exists only to park producers
//! that have exhausted their backoff budget on a full queue.
//!
//! Bounded capacity is a correctness property here, not a tuning knob: a full
//! queue is how backpressure reaches producers.
//!
//! Ordering guarantees: records enqueued by one producer are dequeued in that
//! order by the consumers collectively; no global order across producers is
//! promised.

use crate::record::Record;
use crossbeam_utils::CachePadded;
use parking_lot::{Condvar, Mutex};
use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Why a record could not be enqueued. The record is handed back.
#[derive(Debug, Error)]
pub enum EnqueueError {
    /// The queue is full.
    #[error("queue is full")]
    Full(Record),

    /// The queue stayed full past the deadline.
    #[error("enqueue timed out")]
    TimedOut(Record),

    /// The queue has been closed. Terminal.
    #[error("queue is closed")]
    Closed(Record),
}

/// Why a batch could not be enqueued. Batches are all-or-none; the whole
/// batch is handed back untouched.
#[derive(Debug, Error)]
pub enum BatchEnqueueError {
    /// Not enough contiguous space for the whole batch.
    #[error("queue is full")]
    Full(Vec<Record>),

    /// The queue stayed too full past the deadline.
    #[error("batch enqueue timed out")]
    TimedOut(Vec<Record>),

    /// The queue has been closed. Terminal.
    #[error("queue is closed")]
    Closed(Vec<Record>),

    /// The batch exceeds the queue capacity and can never fit.
    #[error("batch exceeds queue capacity")]
    Oversized(Vec<Record>),
}

/// Spin/backoff policy applied before a producer parks.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    /// Number of backoff sleeps before parking on the condvar.
    pub max_attempts: u32,
    /// Base delay; attempt `n` sleeps `base_delay * 2^n`.
    pub base_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(1),
        }
    }
}

struct Slot {
    seq: AtomicUsize,
    value: UnsafeCell<MaybeUninit<Record>>,
}

/// Bounded MPMC queue of [`Record`]s with blocking enqueue.
pub struct BoundedQueue {
    buffer: Box<[Slot]>,
    mask: usize,
    enqueue_pos: CachePadded<AtomicUsize>,
    dequeue_pos: CachePadded<AtomicUsize>,
    closed: AtomicBool,
    backoff: BackoffPolicy,
    parked: AtomicUsize,
    park_lock: Mutex<()>,
    space_available: Condvar,
    registered: AtomicUsize,
    max_registered: usize,
}

// SAFETY: slots are plain storage for Send records. The per-slot sequence
// protocol guarantees a slot's value is accessed by exactly one thread at a
// time: a producer writes only after claiming the position via CAS on the
// enqueue cursor (and observing the slot free), and a consumer reads only
// after claiming it via CAS on the dequeue cursor (and observing it
// published). No thread ever observes a partially written slot.
#[allow(unsafe_code)]
unsafe impl Send for BoundedQueue {}
#[allow(unsafe_code)]
unsafe impl Sync for BoundedQueue {}

impl BoundedQueue {
    /// Creates a queue with the given capacity, rounded up to a power of two
    /// (minimum 2).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self::with_options(capacity, BackoffPolicy::default(), usize::MAX)
    }

    /// Creates a queue with an explicit backoff policy and registered-producer
    /// cap.
    #[must_use]
    pub fn with_options(
        capacity: usize,
        backoff: BackoffPolicy,
        max_explicit_producers: usize,
    ) -> Self {
        let capacity = capacity.max(2).next_power_of_two();
        let buffer: Box<[Slot]> = (0..capacity)
            .map(|i| Slot {
                seq: AtomicUsize::new(i),
                value: UnsafeCell::new(MaybeUninit::uninit()),
            })
            .collect();

        Self {
            buffer,
            mask: capacity - 1,
            enqueue_pos: CachePadded::new(AtomicUsize::new(0)),
            dequeue_pos: CachePadded::new(AtomicUsize::new(0)),
            closed: AtomicBool::new(false),
            backoff,
            parked: AtomicUsize::new(0),
            park_lock: Mutex::new(()),
            space_available: Condvar::new(),
            registered: AtomicUsize::new(0),
            max_registered: max_explicit_producers,
        }
    }

    /// Returns the queue capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    /// Returns the approximate number of queued records. Advisory only.
    #[must_use]
    pub fn len(&self) -> usize {
        let enqueue = self.enqueue_pos.load(Ordering::Relaxed);
        let dequeue = self.dequeue_pos.load(Ordering::Relaxed);
        let diff = enqueue.wrapping_sub(dequeue) as isize;
        diff.clamp(0, self.capacity() as isize) as usize
    }

    /// Returns whether the queue is (approximately) empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns whether the queue is (approximately) full.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.len() == self.capacity()
    }

    /// Returns whether the queue has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Closes the queue. Terminal: blocked and future producers get
    /// [`EnqueueError::Closed`]; consumers keep draining what remains.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        let _guard = self.park_lock.lock();
        self.space_available.notify_all();
    }

    /// Registers an explicit producer, up to the configured cap.
    ///
    /// The token caches an enqueue-cursor hint so a busy producer usually
    /// starts its CAS at the right position instead of contending from a
    /// stale one. Returns `None` once the cap is reached; unregistered
    /// producers use the shared entry points.
    pub fn register(queue: &Arc<Self>) -> Option<ProducerToken> {
        let mut current = queue.registered.load(Ordering::Relaxed);
        loop {
            if current >= queue.max_registered {
                return None;
            }
            match queue.registered.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => {
                    return Some(ProducerToken {
                        queue: Arc::clone(queue),
                        hint: 0,
                    })
                }
                Err(observed) => current = observed,
            }
        }
    }

    /// Attempts a non-blocking enqueue.
    ///
    /// # Errors
    ///
    /// Returns the record back inside [`EnqueueError::Full`] or
    /// [`EnqueueError::Closed`].
    pub fn try_enqueue(&self, record: Record) -> Result<(), EnqueueError> {
        let start = self.enqueue_pos.load(Ordering::Relaxed);
        self.try_enqueue_from(record, start).map(|_| ())
    }

    /// Enqueues, blocking while the queue is full.
    ///
    /// Spins with exponential backoff first, then parks on a condvar until
    /// space frees, the deadline passes, or the queue closes. On timeout the
    /// record is handed back; it never reaches the queue.
    ///
    /// # Errors
    ///
    /// Returns [`EnqueueError::TimedOut`] or [`EnqueueError::Closed`], both
    /// carrying the record.
    pub fn enqueue_blocking(&self, record: Record, timeout: Duration) -> Result<(), EnqueueError> {
        let mut hint = self.enqueue_pos.load(Ordering::Relaxed);
        self.enqueue_blocking_hinted(record, timeout, &mut hint)
    }

    fn enqueue_blocking_hinted(
        &self,
        record: Record,
        timeout: Duration,
        hint: &mut usize,
    ) -> Result<(), EnqueueError> {
        let deadline = Instant::now().checked_add(timeout);
        let mut record = record;
        let mut attempt = 0u32;

        loop {
            match self.try_enqueue_from(record, *hint) {
                Ok(next) => {
                    *hint = next;
                    return Ok(());
                }
                Err(EnqueueError::Full(r)) => record = r,
                Err(e) => return Err(e),
            }

            if deadline_passed(deadline) {
                return self.final_attempt(record, hint);
            }

            if attempt < self.backoff.max_attempts {
                std::thread::sleep(self.backoff_delay(attempt, deadline));
                attempt += 1;
                continue;
            }

            // backoff budget spent: park until a consumer frees a slot
            let mut guard = self.park_lock.lock();
            if self.is_closed() {
                return Err(EnqueueError::Closed(record));
            }
            if !self.is_full() {
                continue;
            }
            self.parked.fetch_add(1, Ordering::SeqCst);
            let timed_out = match deadline {
                Some(deadline) => self
                    .space_available
                    .wait_until(&mut guard, deadline)
                    .timed_out(),
                None => {
                    self.space_available.wait(&mut guard);
                    false
                }
            };
            self.parked.fetch_sub(1, Ordering::SeqCst);
            drop(guard);

            if timed_out {
                return self.final_attempt(record, hint);
            }
        }
    }

    fn final_attempt(&self, record: Record, hint: &mut usize) -> Result<(), EnqueueError> {
        match self.try_enqueue_from(record, *hint) {
            Ok(next) => {
                *hint = next;
                Ok(())
            }
            Err(EnqueueError::Full(r)) => Err(EnqueueError::TimedOut(r)),
            Err(e) => Err(e),
        }
    }

    /// Attempts a non-blocking all-or-none batch enqueue.
    ///
    /// Either every record in the batch is enqueued (preserving batch order)
    /// or none is; a partially full queue never observes a partial batch.
    ///
    /// # Errors
    ///
    /// Returns the whole batch back inside the error.
    pub fn try_enqueue_batch(&self, records: Vec<Record>) -> Result<(), BatchEnqueueError> {
        let start = self.enqueue_pos.load(Ordering::Relaxed);
        self.try_enqueue_batch_from(records, start).map(|_| ())
    }

    /// Batch variant of [`enqueue_blocking`](Self::enqueue_blocking).
    ///
    /// # Errors
    ///
    /// Returns the whole batch back inside the error.
    pub fn enqueue_batch_blocking(
        &self,
        records: Vec<Record>,
        timeout: Duration,
    ) -> Result<(), BatchEnqueueError> {
        let mut hint = self.enqueue_pos.load(Ordering::Relaxed);
        self.enqueue_batch_blocking_hinted(records, timeout, &mut hint)
    }

    fn enqueue_batch_blocking_hinted(
        &self,
        records: Vec<Record>,
        timeout: Duration,
        hint: &mut usize,
    ) -> Result<(), BatchEnqueueError> {
        if records.is_empty() {
            return Ok(());
        }
        if records.len() > self.capacity() {
            return Err(BatchEnqueueError::Oversized(records));
        }

        let deadline = Instant::now().checked_add(timeout);
        let mut records = records;
        let mut attempt = 0u32;

        loop {
            match self.try_enqueue_batch_from(records, *hint) {
                Ok(next) => {
                    *hint = next;
                    return Ok(());
                }
                Err(BatchEnqueueError::Full(batch)) => records = batch,
                Err(e) => return Err(e),
            }

            if deadline_passed(deadline) {
                return Err(BatchEnqueueError::TimedOut(records));
            }

            if attempt < self.backoff.max_attempts {
                std::thread::sleep(self.backoff_delay(attempt, deadline));
                attempt += 1;
                continue;
            }

            let mut guard = self.park_lock.lock();
            if self.is_closed() {
                return Err(BatchEnqueueError::Closed(records));
            }
            if self.capacity() - self.len() >= records.len() {
                continue;
            }
            self.parked.fetch_add(1, Ordering::SeqCst);
            let timed_out = match deadline {
                Some(deadline) => self
                    .space_available
                    .wait_until(&mut guard, deadline)
                    .timed_out(),
                None => {
                    self.space_available.wait(&mut guard);
                    false
                }
            };
            self.parked.fetch_sub(1, Ordering::SeqCst);
            drop(guard);

            if timed_out {
                return Err(BatchEnqueueError::TimedOut(records));
            }
        }
    }

    /// Dequeues up to `max` records into `out` (cleared first). Non-blocking;
    /// returns the number of records pulled, 0 when the queue is empty.
    pub fn dequeue_batch(&self, out: &mut Vec<Record>, max: usize) -> usize {
        out.clear();
        while out.len() < max {
            match self.try_dequeue() {
                Some(record) => out.push(record),
                None => break,
            }
        }
        out.len()
    }

    /// Dequeues a single record, non-blocking.
    pub fn try_dequeue(&self) -> Option<Record> {
        let mut pos = self.dequeue_pos.load(Ordering::Relaxed);
        loop {
            let slot = &self.buffer[pos & self.mask];
            let seq = slot.seq.load(Ordering::Acquire);
            let diff = seq.wrapping_sub(pos.wrapping_add(1)) as isize;

            if diff == 0 {
                match self.dequeue_pos.compare_exchange_weak(
                    pos,
                    pos.wrapping_add(1),
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        // SAFETY: the CAS above gives this thread exclusive
                        // ownership of the published value at `pos`.
                        #[allow(unsafe_code)]
                        let record = unsafe { (*slot.value.get()).assume_init_read() };
                        slot.seq
                            .store(pos.wrapping_add(self.capacity()), Ordering::Release);
                        self.wake_parked_producers();
                        return Some(record);
                    }
                    Err(observed) => pos = observed,
                }
            } else if diff < 0 {
                return None;
            } else {
                pos = self.dequeue_pos.load(Ordering::Relaxed);
            }
        }
    }

    /// Blocks until the queue drains. Used by engine shutdown; consumers must
    /// be running for this to return.
    pub fn wait_until_empty(&self) {
        while !self.is_empty() {
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    fn try_enqueue_from(&self, record: Record, start: usize) -> Result<usize, EnqueueError> {
        if self.is_closed() {
            return Err(EnqueueError::Closed(record));
        }
        let mut pos = start;
        loop {
            let slot = &self.buffer[pos & self.mask];
            let seq = slot.seq.load(Ordering::Acquire);
            let diff = seq.wrapping_sub(pos) as isize;

            if diff == 0 {
                match self.enqueue_pos.compare_exchange_weak(
                    pos,
                    pos.wrapping_add(1),
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        // SAFETY: the CAS above reserved this slot for this
                        // thread; no reader touches it until the sequence
                        // store below publishes it.
                        #[allow(unsafe_code)]
                        unsafe {
                            (*slot.value.get()).write(record);
                        }
                        slot.seq.store(pos.wrapping_add(1), Ordering::Release);
                        return Ok(pos.wrapping_add(1));
                    }
                    Err(observed) => pos = observed,
                }
            } else if diff < 0 {
                return Err(EnqueueError::Full(record));
            } else {
                pos = self.enqueue_pos.load(Ordering::Relaxed);
            }
        }
    }

    fn try_enqueue_batch_from(
        &self,
        records: Vec<Record>,
        start: usize,
    ) -> Result<usize, BatchEnqueueError> {
        if self.is_closed() {
            return Err(BatchEnqueueError::Closed(records));
        }
        let n = records.len();
        if n == 0 {
            return Ok(start);
        }
        if n > self.capacity() {
            return Err(BatchEnqueueError::Oversized(records));
        }

        let mut pos = start;
        'claim: loop {
            // every slot in [pos, pos + n) must be free before we reserve;
            // checked-free slots stay free because only a producer that wins
            // the cursor CAS below may claim them
            for i in 0..n {
                let slot = &self.buffer[pos.wrapping_add(i) & self.mask];
                let seq = slot.seq.load(Ordering::Acquire);
                let diff = seq.wrapping_sub(pos.wrapping_add(i)) as isize;
                if diff < 0 {
                    return Err(BatchEnqueueError::Full(records));
                }
                if diff > 0 {
                    pos = self.enqueue_pos.load(Ordering::Relaxed);
                    continue 'claim;
                }
            }

            match self.enqueue_pos.compare_exchange_weak(
                pos,
                pos.wrapping_add(n),
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => {
                    for (i, record) in records.into_iter().enumerate() {
                        let slot = &self.buffer[pos.wrapping_add(i) & self.mask];
                        // SAFETY: all n slots were observed free above and the
                        // winning CAS reserved them for this thread.
                        #[allow(unsafe_code)]
                        unsafe {
                            (*slot.value.get()).write(record);
                        }
                        slot.seq
                            .store(pos.wrapping_add(i).wrapping_add(1), Ordering::Release);
                    }
                    return Ok(pos.wrapping_add(n));
                }
                Err(observed) => pos = observed,
            }
        }
    }

    fn backoff_delay(&self, attempt: u32, deadline: Option<Instant>) -> Duration {
        let delay = self.backoff.base_delay.saturating_mul(1u32 << attempt.min(16));
        match deadline {
            Some(deadline) => delay.min(deadline.saturating_duration_since(Instant::now())),
            None => delay,
        }
    }

    fn wake_parked_producers(&self) {
        if self.parked.load(Ordering::SeqCst) > 0 {
            let _guard = self.park_lock.lock();
            self.space_available.notify_all();
        }
    }
}

impl Drop for BoundedQueue {
    fn drop(&mut self) {
        while self.try_dequeue().is_some() {}
    }
}

impl std::fmt::Debug for BoundedQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundedQueue")
            .field("capacity", &self.capacity())
            .field("len", &self.len())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

/// Registration token for an explicit producer.
///
/// Carries a cached enqueue-cursor hint that amortizes CAS contention for
/// producers issuing many appends. Dropping the token releases its
/// registration slot.
#[derive(Debug)]
pub struct ProducerToken {
    queue: Arc<BoundedQueue>,
    hint: usize,
}

impl ProducerToken {
    /// Token-hinted variant of [`BoundedQueue::enqueue_blocking`].
    ///
    /// # Errors
    ///
    /// Same contract as the shared entry point.
    pub fn enqueue_blocking(
        &mut self,
        record: Record,
        timeout: Duration,
    ) -> Result<(), EnqueueError> {
        let queue = Arc::clone(&self.queue);
        queue.enqueue_blocking_hinted(record, timeout, &mut self.hint)
    }

    /// Token-hinted variant of [`BoundedQueue::enqueue_batch_blocking`].
    ///
    /// # Errors
    ///
    /// Same contract as the shared entry point.
    pub fn enqueue_batch_blocking(
        &mut self,
        records: Vec<Record>,
        timeout: Duration,
    ) -> Result<(), BatchEnqueueError> {
        let queue = Arc::clone(&self.queue);
        queue.enqueue_batch_blocking_hinted(records, timeout, &mut self.hint)
    }
}

impl Drop for ProducerToken {
    fn drop(&mut self) {
        self.queue.registered.fetch_sub(1, Ordering::AcqRel);
    }
}

fn deadline_passed(deadline: Option<Instant>) -> bool {
    deadline.is_some_and(|deadline| Instant::now() >= deadline)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Action;
    use std::thread;

    fn record(subject: impl Into<String>) -> Record {
        Record::new(Action::Create, "/data", "actor", subject)
    }

    #[test]
    fn capacity_rounds_up_to_power_of_two() {
        assert_eq!(BoundedQueue::new(0).capacity(), 2);
        assert_eq!(BoundedQueue::new(2).capacity(), 2);
        assert_eq!(BoundedQueue::new(100).capacity(), 128);
    }

    #[test]
    fn fifo_single_producer() {
        let queue = BoundedQueue::new(16);
        for i in 0..10 {
            queue.try_enqueue(record(format!("s{i}"))).unwrap();
        }
        assert_eq!(queue.len(), 10);

        let mut out = Vec::new();
        assert_eq!(queue.dequeue_batch(&mut out, 100), 10);
        for (i, r) in out.iter().enumerate() {
            assert_eq!(r.subject_id, format!("s{i}"));
        }
        assert!(queue.is_empty());
    }

    #[test]
    fn full_queue_rejects() {
        let queue = BoundedQueue::new(2);
        queue.try_enqueue(record("a")).unwrap();
        queue.try_enqueue(record("b")).unwrap();
        assert!(matches!(
            queue.try_enqueue(record("c")),
            Err(EnqueueError::Full(_))
        ));
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn blocking_enqueue_times_out_within_bounds() {
        let queue = BoundedQueue::new(2);
        queue.try_enqueue(record("a")).unwrap();
        queue.try_enqueue(record("b")).unwrap();

        let start = Instant::now();
        let result = queue.enqueue_blocking(record("c"), Duration::from_millis(100));
        let elapsed = start.elapsed();

        let Err(EnqueueError::TimedOut(returned)) = result else {
            panic!("expected timeout");
        };
        assert_eq!(returned.subject_id, "c");
        assert!(elapsed >= Duration::from_millis(100), "returned early: {elapsed:?}");
        assert!(elapsed <= Duration::from_millis(400), "returned late: {elapsed:?}");
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn blocking_enqueue_succeeds_when_space_frees() {
        let queue = Arc::new(BoundedQueue::new(2));
        queue.try_enqueue(record("a")).unwrap();
        queue.try_enqueue(record("b")).unwrap();

        let producer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.enqueue_blocking(record("c"), Duration::from_secs(10)))
        };

        thread::sleep(Duration::from_millis(50));
        assert!(queue.try_dequeue().is_some());

        producer.join().unwrap().unwrap();
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn close_wakes_blocked_producer() {
        let queue = Arc::new(BoundedQueue::new(2));
        queue.try_enqueue(record("a")).unwrap();
        queue.try_enqueue(record("b")).unwrap();

        let producer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.enqueue_blocking(record("c"), Duration::from_secs(60)))
        };

        thread::sleep(Duration::from_millis(50));
        queue.close();

        assert!(matches!(
            producer.join().unwrap(),
            Err(EnqueueError::Closed(_))
        ));
    }

    #[test]
    fn consumers_drain_after_close() {
        let queue = BoundedQueue::new(8);
        queue.try_enqueue(record("a")).unwrap();
        queue.try_enqueue(record("b")).unwrap();
        queue.close();

        assert!(matches!(
            queue.try_enqueue(record("c")),
            Err(EnqueueError::Closed(_))
        ));
        let mut out = Vec::new();
        assert_eq!(queue.dequeue_batch(&mut out, 10), 2);
    }

    #[test]
    fn batch_enqueue_is_all_or_none() {
        let queue = BoundedQueue::new(4);
        queue.try_enqueue(record("a")).unwrap();
        queue.try_enqueue(record("b")).unwrap();

        // three more cannot fit into the remaining two slots
        let batch = vec![record("c"), record("d"), record("e")];
        let Err(BatchEnqueueError::Full(returned)) = queue.try_enqueue_batch(batch) else {
            panic!("expected full");
        };
        assert_eq!(returned.len(), 3);
        assert_eq!(queue.len(), 2);

        // two fit exactly
        queue
            .try_enqueue_batch(vec![record("c"), record("d")])
            .unwrap();
        assert_eq!(queue.len(), 4);

        let mut out = Vec::new();
        queue.dequeue_batch(&mut out, 10);
        let subjects: Vec<_> = out.iter().map(|r| r.subject_id.as_str()).collect();
        assert_eq!(subjects, ["a", "b", "c", "d"]);
    }

    #[test]
    fn oversized_batch_rejected() {
        let queue = BoundedQueue::new(2);
        let batch = vec![record("a"), record("b"), record("c")];
        assert!(matches!(
            queue.try_enqueue_batch(batch),
            Err(BatchEnqueueError::Oversized(_))
        ));
    }

    #[test]
    fn producer_registration_cap() {
        let queue = Arc::new(BoundedQueue::with_options(
            16,
            BackoffPolicy::default(),
            2,
        ));
        let token1 = BoundedQueue::register(&queue).unwrap();
        let _token2 = BoundedQueue::register(&queue).unwrap();
        assert!(BoundedQueue::register(&queue).is_none());

        drop(token1);
        assert!(BoundedQueue::register(&queue).is_some());
    }

    #[test]
    fn token_enqueue_preserves_order() {
        let queue = Arc::new(BoundedQueue::new(64));
        let mut token = BoundedQueue::register(&queue).unwrap();
        for i in 0..20 {
            token
                .enqueue_blocking(record(format!("s{i}")), Duration::from_secs(1))
                .unwrap();
        }

        let mut out = Vec::new();
        queue.dequeue_batch(&mut out, 64);
        for (i, r) in out.iter().enumerate() {
            assert_eq!(r.subject_id, format!("s{i}"));
        }
    }

    #[test]
    fn concurrent_producers_conserve_records() {
        const PRODUCERS: usize = 4;
        const PER_PRODUCER: usize = 2_000;

        let queue = Arc::new(BoundedQueue::new(256));
        let mut producers = Vec::new();
        for p in 0..PRODUCERS {
            let queue = Arc::clone(&queue);
            producers.push(thread::spawn(move || {
                for i in 0..PER_PRODUCER {
                    let r = Record::new(Action::Read, "/d", format!("p{p}"), format!("{i:06}"));
                    queue
                        .enqueue_blocking(r, Duration::from_secs(30))
                        .unwrap();
                }
            }));
        }

        let consumer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                let mut collected = Vec::new();
                let mut buf = Vec::new();
                while collected.len() < PRODUCERS * PER_PRODUCER {
                    if queue.dequeue_batch(&mut buf, 64) == 0 {
                        thread::yield_now();
                        continue;
                    }
                    collected.append(&mut buf);
                }
                collected
            })
        };

        for producer in producers {
            producer.join().unwrap();
        }
        let collected = consumer.join().unwrap();
        assert_eq!(collected.len(), PRODUCERS * PER_PRODUCER);

        // per-producer order is preserved through the queue
        for p in 0..PRODUCERS {
            let actor = format!("p{p}");
            let subjects: Vec<_> = collected
                .iter()
                .filter(|r| r.actor_id == actor)
                .map(|r| r.subject_id.clone())
                .collect();
            assert_eq!(subjects.len(), PER_PRODUCER);
            let mut sorted = subjects.clone();
            sorted.sort();
            assert_eq!(subjects, sorted, "producer {p} order violated");
        }
    }
}
