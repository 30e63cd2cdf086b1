//! `ClosableQueue` — a bounded MPMC FIFO with a terminal `closed` state.
//!
//! Backs the coordinator's `result_q` and `fail_q`. Built directly on
//! `Mutex`/`Condvar` rather than a channel crate because the exact
//! "drain, then fail with `Closed`" semantics on close need custom
//! signaling a generic MPMC channel doesn't expose.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::error::{CorralError, Result};

struct Inner<T> {
    items: VecDeque<T>,
    closed: bool,
}

/// A bounded, closable, FIFO multi-producer multi-consumer queue.
pub struct ClosableQueue<T> {
    inner: Mutex<Inner<T>>,
    not_empty: Condvar,
    not_full: Condvar,
    capacity: usize,
}

impl<T> ClosableQueue<T> {
    /// Create a queue that holds at most `capacity` items before `put`
    /// blocks.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                items: VecDeque::new(),
                closed: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity,
        }
    }

    /// Push `value`, blocking up to `timeout` if the queue is full.
    ///
    /// Fails with `Closed` if the queue has been closed, or `Empty` if
    /// `timeout` elapses while the queue stays full.
    pub fn put(&self, value: T, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        loop {
            if inner.closed {
                return Err(CorralError::Closed);
            }
            if inner.items.len() < self.capacity {
                inner.items.push_back(value);
                drop(inner);
                self.not_empty.notify_one();
                return Ok(());
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(CorralError::Empty);
            }
            let (guard, result) = self
                .not_full
                .wait_timeout(inner, deadline - now)
                .unwrap_or_else(|e| e.into_inner());
            inner = guard;
            if result.timed_out() && inner.items.len() >= self.capacity && !inner.closed {
                return Err(CorralError::Empty);
            }
        }
    }

    /// Pop the oldest value, blocking up to `timeout` if empty.
    ///
    /// A closed-and-drained queue fails with `Closed`; a still-open but
    /// empty queue fails with `Empty` once `timeout` elapses.
    pub fn get(&self, timeout: Duration) -> Result<T> {
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        loop {
            if let Some(value) = inner.items.pop_front() {
                drop(inner);
                self.not_full.notify_one();
                return Ok(value);
            }
            if inner.closed {
                return Err(CorralError::Closed);
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(CorralError::Empty);
            }
            let (guard, result) = self
                .not_empty
                .wait_timeout(inner, deadline - now)
                .unwrap_or_else(|e| e.into_inner());
            inner = guard;
            if result.timed_out() && inner.items.is_empty() && !inner.closed {
                return Err(CorralError::Empty);
            }
        }
    }

    /// Number of items currently queued.
    #[must_use]
    pub fn qsize(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).items.len()
    }

    /// Idempotently close the queue. Blocked producers and consumers wake
    /// immediately; `put` fails with `Closed`, `get` still drains any
    /// remaining items before it too fails with `Closed`.
    pub fn close(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.closed = true;
        drop(inner);
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn fifo_order_is_preserved() {
        let q: ClosableQueue<u32> = ClosableQueue::new(8);
        for i in 0..5 {
            q.put(i, Duration::from_millis(10)).unwrap();
        }
        for i in 0..5 {
            assert_eq!(q.get(Duration::from_millis(10)).unwrap(), i);
        }
    }

    #[test]
    fn get_on_empty_times_out_with_empty() {
        let q: ClosableQueue<u32> = ClosableQueue::new(8);
        assert!(matches!(
            q.get(Duration::from_millis(20)).unwrap_err(),
            CorralError::Empty
        ));
    }

    #[test]
    fn put_after_close_fails() {
        let q: ClosableQueue<u32> = ClosableQueue::new(8);
        q.close();
        assert!(matches!(
            q.put(1, Duration::from_millis(10)).unwrap_err(),
            CorralError::Closed
        ));
    }

    #[test]
    fn get_drains_then_fails_closed() {
        let q: ClosableQueue<u32> = ClosableQueue::new(8);
        q.put(1, Duration::from_millis(10)).unwrap();
        q.close();
        assert_eq!(q.get(Duration::from_millis(10)).unwrap(), 1);
        assert!(matches!(
            q.get(Duration::from_millis(10)).unwrap_err(),
            CorralError::Closed
        ));
    }

    #[test]
    fn concurrent_producers_preserve_each_producers_order() {
        let q: Arc<ClosableQueue<(u32, u32)>> = Arc::new(ClosableQueue::new(64));
        let mut handles = Vec::new();
        for p in 0..4u32 {
            let q = Arc::clone(&q);
            handles.push(thread::spawn(move || {
                for i in 0..20u32 {
                    q.put((p, i), Duration::from_secs(1)).unwrap();
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        let mut last_seen = [None; 4];
        let mut total = 0;
        while let Ok((p, i)) = q.get(Duration::from_millis(50)) {
            if let Some(prev) = last_seen[p as usize] {
                assert!(i > prev, "producer {p} saw out-of-order items");
            }
            last_seen[p as usize] = Some(i);
            total += 1;
        }
        assert_eq!(total, 80);
    }
}
