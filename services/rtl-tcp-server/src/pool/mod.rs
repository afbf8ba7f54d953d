//! Fixed-capacity buffer pool with relay stages
//!
//! Buffers travel through a ring of stages:
//! 1. Stage 0 holds empty buffers ready to be filled (new ones are allocated
//!    here while under the cap)
//! 2. Releasing from stage N hands the buffer to stage N+1
//! 3. Releasing from the last stage recycles it back to stage 0
//!
//! Every stage has its own mutex/condvar so unrelated stages never contend.
//! The total number of buffers is capped; once at the cap, acquirers wait
//! (bounded) for a recycled buffer instead of allocating.

mod buffer;
mod queue;

pub use buffer::{ElasticBuffer, ElementKind};
pub use queue::WorkQueue;

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{trace, warn};

/// Upper bound on a blocking `acquire`
pub const POOL_WAIT_TIMEOUT: Duration = Duration::from_millis(1000);

struct Stage {
    queue: Mutex<WorkQueue<ElasticBuffer>>,
    ready: Condvar,
}

impl Stage {
    fn new() -> Self {
        Self {
            queue: Mutex::new(WorkQueue::new()),
            ready: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, WorkQueue<ElasticBuffer>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Relay-stage buffer pool
pub struct BufferPool {
    kind: ElementKind,
    max_elements: usize,
    elements: AtomicUsize,
    stages: Vec<Stage>,
    valid: AtomicBool,
}

impl BufferPool {
    /// Create a pool with no stages yet
    pub fn new(max_elements: usize, kind: ElementKind) -> Self {
        Self {
            kind,
            max_elements,
            elements: AtomicUsize::new(0),
            stages: Vec::new(),
            valid: AtomicBool::new(false),
        }
    }

    /// (Re)build `stage_count` stages, freeing anything previously queued.
    ///
    /// Destructive; only call before the pool is shared with workers.
    pub fn configure_stages(&mut self, stage_count: usize) {
        if stage_count == 0 {
            return;
        }
        self.teardown();
        self.stages = (0..stage_count).map(|_| Stage::new()).collect();
        self.valid.store(true, Ordering::SeqCst);
    }

    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    pub fn max_elements(&self) -> usize {
        self.max_elements
    }

    /// Buffers currently alive (queued or held by a caller)
    pub fn elements(&self) -> usize {
        self.elements.load(Ordering::SeqCst)
    }

    pub fn is_valid(&self) -> bool {
        self.valid.load(Ordering::SeqCst)
    }

    /// Number of buffers waiting in a stage
    pub fn queued(&self, stage_id: usize) -> usize {
        self.stages.get(stage_id).map(|s| s.lock().len()).unwrap_or(0)
    }

    /// Take a buffer out of `stage_id`.
    ///
    /// Stage 0 allocates a fresh buffer while under the cap. Otherwise, with
    /// `may_block`, waits up to [`POOL_WAIT_TIMEOUT`] for one to arrive.
    pub fn acquire(&self, stage_id: usize, may_block: bool) -> Option<ElasticBuffer> {
        if !self.is_valid() {
            return None;
        }
        let Some(stage) = self.stages.get(stage_id) else {
            warn!("Buffer pool: acquire from unknown stage {} of {}", stage_id, self.stages.len());
            return None;
        };

        if let Some(buffer) = stage.lock().pop() {
            return Some(buffer);
        }

        if stage_id == 0 && self.try_reserve() {
            trace!("Buffer pool: allocated buffer {} of {}", self.elements(), self.max_elements);
            return Some(ElasticBuffer::new(self.kind));
        }

        if !may_block {
            return None;
        }

        let guard = stage.lock();
        let (mut guard, _timeout) = stage
            .ready
            .wait_timeout_while(guard, POOL_WAIT_TIMEOUT, |q| {
                q.is_empty() && self.valid.load(Ordering::SeqCst)
            })
            .unwrap_or_else(PoisonError::into_inner);
        guard.pop()
    }

    /// Hand a buffer on to the next stage (the last stage recycles to 0)
    pub fn release(&self, stage_id: usize, mut buffer: ElasticBuffer) {
        if !self.is_valid() || stage_id >= self.stages.len() {
            // Pool is gone; the buffer dies here
            self.forget_one();
            return;
        }

        let target = if stage_id == self.stages.len() - 1 {
            buffer.prepare(0);
            0
        } else {
            stage_id + 1
        };

        let stage = &self.stages[target];
        stage.lock().push(buffer);
        stage.ready.notify_all();
    }

    /// Drain and free every queued buffer and invalidate the pool.
    ///
    /// Returns how many buffers were still outstanding (held by callers).
    pub fn teardown(&self) -> usize {
        self.valid.store(false, Ordering::SeqCst);

        let mut freed = 0usize;
        for stage in &self.stages {
            let mut queue = stage.lock();
            for mut buffer in queue.drain() {
                buffer.release();
                freed += 1;
            }
            drop(queue);
            stage.ready.notify_all();
        }

        let outstanding = self.elements.swap(0, Ordering::SeqCst).saturating_sub(freed);
        if outstanding != 0 {
            warn!(
                "Buffer pool teardown leaked {} buffer(s) ({} freed)",
                outstanding, freed
            );
        }
        outstanding
    }

    fn try_reserve(&self) -> bool {
        let max = self.max_elements;
        self.elements
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| (n < max).then_some(n + 1))
            .is_ok()
    }

    fn forget_one(&self) {
        let _ = self
            .elements
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
    }
}

impl Drop for BufferPool {
    fn drop(&mut self) {
        if self.is_valid() {
            self.teardown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;

    fn pool(max: usize, stages: usize) -> BufferPool {
        let mut pool = BufferPool::new(max, ElementKind::UShort);
        pool.configure_stages(stages);
        pool
    }

    #[test]
    fn test_unconfigured_pool_gives_nothing() {
        let pool = BufferPool::new(5, ElementKind::UShort);
        assert!(pool.acquire(0, false).is_none());
        assert_eq!(pool.elements(), 0);
    }

    #[test]
    fn test_cap_reached_without_blocking() {
        let pool = pool(5, 2);
        let start = Instant::now();
        let held: Vec<_> = (0..5).map(|_| pool.acquire(0, true).unwrap()).collect();
        assert!(start.elapsed() < Duration::from_millis(100));
        assert_eq!(pool.elements(), 5);
        assert!(pool.acquire(0, false).is_none());
        assert_eq!(held.len(), 5);
    }

    #[test]
    fn test_sixth_acquire_waits_for_recycle() {
        let pool = Arc::new(pool(5, 2));
        let mut held: Vec<_> = (0..5).map(|_| pool.acquire(0, false).unwrap()).collect();

        let waiter = {
            let pool = pool.clone();
            thread::spawn(move || {
                let start = Instant::now();
                let got = pool.acquire(0, true);
                (got.is_some(), start.elapsed())
            })
        };

        thread::sleep(Duration::from_millis(200));
        // Stage 0 -> stage 1 -> recycled to stage 0
        pool.release(0, held.pop().unwrap());
        let relayed = pool.acquire(1, false).unwrap();
        pool.release(1, relayed);

        let (got, waited) = waiter.join().unwrap();
        assert!(got);
        assert!(waited >= Duration::from_millis(150));
        assert!(waited < POOL_WAIT_TIMEOUT);
        assert_eq!(pool.elements(), 5);
    }

    #[test]
    fn test_blocking_acquire_times_out() {
        let pool = pool(1, 2);
        let _only = pool.acquire(0, false).unwrap();
        let start = Instant::now();
        assert!(pool.acquire(0, true).is_none());
        let waited = start.elapsed();
        assert!(waited >= Duration::from_millis(900));
        assert!(waited < Duration::from_millis(2000));
    }

    #[test]
    fn test_ring_order_and_recycle() {
        let pool = pool(3, 3);
        let mut buf = pool.acquire(0, false).unwrap();
        buf.fill_from_bytes(&[1, 0, 2, 0]);
        pool.release(0, buf);
        assert_eq!(pool.queued(1), 1);

        let buf = pool.acquire(1, false).unwrap();
        assert_eq!(buf.as_ushort().unwrap(), &[1, 2]);
        pool.release(1, buf);
        assert_eq!(pool.queued(2), 1);

        let buf = pool.acquire(2, false).unwrap();
        pool.release(2, buf);
        assert_eq!(pool.queued(0), 1);

        // Recycled buffers come back with no valid data
        let buf = pool.acquire(0, false).unwrap();
        assert_eq!(buf.valid_length(), 0);
        assert_eq!(pool.elements(), 1);
    }

    #[test]
    fn test_recycled_buffer_clears_when_marked() {
        let pool = pool(1, 2);
        let mut buf = pool.acquire(0, false).unwrap();
        buf.prepare(6);
        buf.as_ushort_mut().unwrap().fill(0xABCD);
        pool.release(0, buf);
        let buf = pool.acquire(1, false).unwrap();
        pool.release(1, buf);

        let mut buf = pool.acquire(0, false).unwrap();
        buf.mark_clear_on_next_use();
        buf.prepare(6);
        assert!(buf.as_ushort().unwrap().iter().all(|&v| v == 0));
    }

    #[test]
    fn test_teardown_drains_everything() {
        let pool = pool(5, 2);
        for _ in 0..3 {
            let b = pool.acquire(0, false).unwrap();
            pool.release(0, b);
        }
        let b = pool.acquire(1, false).unwrap();
        pool.release(1, b);
        assert_eq!(pool.elements(), 3);

        assert_eq!(pool.teardown(), 0);
        assert_eq!(pool.elements(), 0);
        assert!(!pool.is_valid());
        assert!(pool.acquire(0, false).is_none());
    }

    #[test]
    fn test_teardown_reports_outstanding() {
        let pool = pool(5, 2);
        let held = pool.acquire(0, false).unwrap();
        let queued = pool.acquire(0, false).unwrap();
        pool.release(0, queued);
        assert_eq!(pool.teardown(), 1);

        // Late release after teardown must not underflow
        pool.release(0, held);
        assert_eq!(pool.elements(), 0);
    }

    #[test]
    fn test_reconfigure_discards_queued() {
        let mut pool = pool(5, 2);
        let b = pool.acquire(0, false).unwrap();
        pool.release(0, b);
        pool.configure_stages(3);
        assert_eq!(pool.stage_count(), 3);
        assert_eq!(pool.elements(), 0);
        assert_eq!(pool.queued(1), 0);

        // Zero stages is ignored
        pool.configure_stages(0);
        assert_eq!(pool.stage_count(), 3);
    }

    #[test]
    fn test_concurrent_producer_consumer_keeps_cap() {
        let pool = Arc::new(pool(5, 2));
        let producers: Vec<_> = (0..4)
            .map(|p| {
                let pool = pool.clone();
                thread::spawn(move || {
                    for i in 0..500u16 {
                        if let Some(mut b) = pool.acquire(0, true) {
                            b.fill_from_bytes(&[p as u8, i as u8]);
                            assert!(pool.elements() <= pool.max_elements());
                            pool.release(0, b);
                        }
                    }
                })
            })
            .collect();

        let consumers: Vec<_> = (0..2)
            .map(|_| {
                let pool = pool.clone();
                thread::spawn(move || {
                    let deadline = Instant::now() + Duration::from_secs(10);
                    while Instant::now() < deadline {
                        match pool.acquire(1, true) {
                            Some(b) => {
                                assert!(pool.elements() <= pool.max_elements());
                                pool.release(1, b);
                            }
                            None => break,
                        }
                    }
                })
            })
            .collect();

        for p in producers {
            p.join().unwrap();
        }
        for c in consumers {
            c.join().unwrap();
        }

        assert!(pool.elements() <= 5);
        let queued = pool.queued(0) + pool.queued(1);
        assert_eq!(queued, pool.elements());
        assert_eq!(pool.teardown(), 0);
    }
}
