//! Bounded hand-off queue between producers and the drain loop.
//!
//! Producers run on arbitrary threads (a UI callback, a stdin loop) and must
//! not need a tokio runtime, so they wait on a `Condvar` with a deadline.
//! The single consumer is the active session's drain loop, which awaits a
//! `Notify`. Closing the queue wakes everyone: producers get
//! [`RelayError::Shutdown`], the consumer gets `None`.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::sync::Notify;

use crate::error::RelayError;

/// One opaque binary message queued for delivery.
#[derive(Clone, PartialEq, Eq)]
pub struct Payload(Bytes);

impl Payload {
    /// Number of bytes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Borrow the bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Take the bytes as a `Vec`, copying only if the buffer is shared.
    pub fn into_vec(self) -> Vec<u8> {
        Vec::from(self.0)
    }
}

impl std::fmt::Debug for Payload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Payload({} bytes)", self.0.len())
    }
}

impl From<Vec<u8>> for Payload {
    fn from(data: Vec<u8>) -> Self {
        Self(Bytes::from(data))
    }
}

impl From<Bytes> for Payload {
    fn from(data: Bytes) -> Self {
        Self(data)
    }
}

impl From<&'static [u8]> for Payload {
    fn from(data: &'static [u8]) -> Self {
        Self(Bytes::from_static(data))
    }
}

#[derive(Debug)]
struct QueueInner {
    items: VecDeque<Payload>,
    closed: bool,
}

/// Bounded FIFO of [`Payload`]s.
#[derive(Debug)]
pub struct SendQueue {
    inner: Mutex<QueueInner>,
    /// Producers wait here for room.
    not_full: Condvar,
    /// The consumer waits here for items.
    available: Notify,
    capacity: usize,
}

impl SendQueue {
    /// Create an open queue holding at most `capacity` payloads (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(QueueInner {
                items: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            not_full: Condvar::new(),
            available: Notify::new(),
            capacity,
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append `payload`, waiting up to `timeout` for room.
    ///
    /// Blocks the calling thread; never call it from async code.
    ///
    /// # Errors
    ///
    /// [`RelayError::EnqueueTimeout`] if the queue stayed full,
    /// [`RelayError::Shutdown`] if the queue is or becomes closed.
    pub fn enqueue(&self, payload: Payload, timeout: Duration) -> Result<(), RelayError> {
        // `None` when the timeout is too large to represent: wait without one.
        let deadline = Instant::now().checked_add(timeout);
        let mut inner = self.lock();
        loop {
            if inner.closed {
                return Err(RelayError::Shutdown);
            }
            if inner.items.len() < self.capacity {
                let size = payload.len();
                inner.items.push_back(payload);
                let depth = inner.items.len();
                drop(inner);
                self.available.notify_one();
                log::debug!("[Queue] Queued {size} bytes (depth {depth})");
                return Ok(());
            }
            inner = match deadline {
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        log::warn!("[Queue] Full for {timeout:?}, giving up on payload");
                        return Err(RelayError::EnqueueTimeout);
                    }
                    self.not_full
                        .wait_timeout(inner, remaining)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
                None => self.not_full.wait(inner).unwrap_or_else(PoisonError::into_inner),
            };
        }
    }

    /// Take the oldest payload, waiting until one is available.
    ///
    /// Returns `None` once the queue is closed. Cancel-safe: a payload is
    /// only removed in the same poll that returns it.
    pub async fn dequeue(&self) -> Option<Payload> {
        loop {
            let notified = self.available.notified();
            {
                let mut inner = self.lock();
                if let Some(payload) = inner.items.pop_front() {
                    drop(inner);
                    self.not_full.notify_one();
                    return Some(payload);
                }
                if inner.closed {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Put a payload taken by [`dequeue`](Self::dequeue) back at the head.
    ///
    /// Used when the consumer is cancelled before it started writing, so
    /// the payload goes to the next peer instead of being lost. May exceed
    /// the capacity by one. Returns `false` (and drops the payload) if the
    /// queue is closed.
    pub(crate) fn requeue(&self, payload: Payload) -> bool {
        let mut inner = self.lock();
        if inner.closed {
            return false;
        }
        inner.items.push_front(payload);
        drop(inner);
        self.available.notify_one();
        true
    }

    /// Non-blocking variant of [`dequeue`](Self::dequeue).
    pub fn try_dequeue(&self) -> Option<Payload> {
        let payload = self.lock().items.pop_front();
        if payload.is_some() {
            self.not_full.notify_one();
        }
        payload
    }

    /// Close the queue, discarding anything still queued.
    ///
    /// Wakes blocked producers (they return `Shutdown`) and the consumer
    /// (it returns `None`). Returns the number of payloads discarded.
    pub fn close(&self) -> usize {
        let discarded = {
            let mut inner = self.lock();
            inner.closed = true;
            let count = inner.items.len();
            inner.items.clear();
            count
        };
        self.not_full.notify_all();
        self.available.notify_waiters();
        // Leaves a permit for a consumer that checked before `closed` was set.
        self.available.notify_one();
        if discarded > 0 {
            log::warn!("[Queue] Closed with {discarded} undelivered payload(s), discarding");
        }
        discarded
    }

    /// Re-open a closed queue so a restarted server can use it.
    pub fn reopen(&self) {
        let mut inner = self.lock();
        inner.closed = false;
    }

    /// Whether the queue is closed.
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Number of queued payloads.
    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    /// Whether nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of queued payloads.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    const SHORT: Duration = Duration::from_millis(50);

    #[tokio::test]
    async fn test_fifo_order() {
        let queue = SendQueue::new(8);
        for i in 0u8..5 {
            queue.enqueue(Payload::from(vec![i]), SHORT).unwrap();
        }
        for i in 0u8..5 {
            assert_eq!(queue.dequeue().await.unwrap().as_bytes(), &[i]);
        }
        assert!(queue.is_empty());
    }

    #[test]
    fn test_enqueue_times_out_when_full() {
        let queue = SendQueue::new(1);
        queue.enqueue(Payload::from(vec![1]), SHORT).unwrap();

        let started = Instant::now();
        let result = queue.enqueue(Payload::from(vec![2]), SHORT);
        assert_eq!(result, Err(RelayError::EnqueueTimeout));
        assert!(started.elapsed() >= SHORT);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_blocked_producer_resumes_when_consumer_takes() {
        let queue = Arc::new(SendQueue::new(1));
        queue.enqueue(Payload::from(vec![1]), SHORT).unwrap();

        let producer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.enqueue(Payload::from(vec![2]), Duration::from_secs(5)))
        };

        thread::sleep(SHORT);
        assert_eq!(queue.try_dequeue().unwrap().as_bytes(), &[1]);
        producer.join().unwrap().unwrap();
        assert_eq!(queue.try_dequeue().unwrap().as_bytes(), &[2]);
    }

    #[test]
    fn test_close_unblocks_waiting_producer_with_shutdown() {
        let queue = Arc::new(SendQueue::new(1));
        queue.enqueue(Payload::from(vec![1]), SHORT).unwrap();

        let producer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                let started = Instant::now();
                let result = queue.enqueue(Payload::from(vec![2]), Duration::from_secs(30));
                (result, started.elapsed())
            })
        };

        thread::sleep(SHORT);
        assert_eq!(queue.close(), 1);

        let (result, waited) = producer.join().unwrap();
        assert_eq!(result, Err(RelayError::Shutdown));
        assert!(waited < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_close_wakes_waiting_consumer() {
        let queue = Arc::new(SendQueue::new(4));
        let consumer = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.dequeue().await })
        };

        tokio::time::sleep(SHORT).await;
        queue.close();

        let result = tokio::time::timeout(Duration::from_secs(2), consumer)
            .await
            .expect("consumer should wake on close")
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_consumer_wakes_on_enqueue_from_thread() {
        let queue = Arc::new(SendQueue::new(4));
        let producer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                thread::sleep(SHORT);
                queue.enqueue(Payload::from(&b"late"[..]), SHORT)
            })
        };

        let payload = tokio::time::timeout(Duration::from_secs(2), queue.dequeue())
            .await
            .expect("consumer should wake on enqueue")
            .unwrap();
        assert_eq!(payload.as_bytes(), b"late");
        producer.join().unwrap().unwrap();
    }

    #[test]
    fn test_enqueue_after_close_fails_until_reopened() {
        let queue = SendQueue::new(2);
        queue.close();
        assert!(queue.is_closed());
        assert_eq!(
            queue.enqueue(Payload::from(vec![1]), SHORT),
            Err(RelayError::Shutdown)
        );

        queue.reopen();
        queue.enqueue(Payload::from(vec![1]), SHORT).unwrap();
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_empty_payload_is_allowed() {
        let queue = SendQueue::new(1);
        queue.enqueue(Payload::from(Vec::new()), SHORT).unwrap();
        assert!(queue.try_dequeue().unwrap().is_empty());
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        assert_eq!(SendQueue::new(0).capacity(), 1);
    }

    #[test]
    fn test_unrepresentable_timeout_waits_until_closed() {
        let queue = Arc::new(SendQueue::new(1));
        queue.enqueue(Payload::from(vec![1]), SHORT).unwrap();

        let producer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.enqueue(Payload::from(vec![2]), Duration::MAX))
        };

        thread::sleep(SHORT);
        assert!(!producer.is_finished());
        queue.close();
        assert_eq!(producer.join().unwrap(), Err(RelayError::Shutdown));
    }

    #[test]
    fn test_unrepresentable_timeout_resumes_when_room_frees() {
        let queue = Arc::new(SendQueue::new(1));
        queue.enqueue(Payload::from(vec![1]), SHORT).unwrap();

        let producer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.enqueue(Payload::from(vec![2]), Duration::MAX))
        };

        thread::sleep(SHORT);
        queue.try_dequeue().unwrap();
        producer.join().unwrap().unwrap();
        assert_eq!(queue.try_dequeue().unwrap().as_bytes(), &[2]);
    }

    #[tokio::test]
    async fn test_requeue_puts_payload_back_at_head() {
        let queue = SendQueue::new(2);
        queue.enqueue(Payload::from(vec![1]), SHORT).unwrap();
        queue.enqueue(Payload::from(vec![2]), SHORT).unwrap();

        let first = queue.dequeue().await.unwrap();
        assert!(queue.requeue(first));
        assert_eq!(queue.dequeue().await.unwrap().as_bytes(), &[1]);
        assert_eq!(queue.dequeue().await.unwrap().as_bytes(), &[2]);
    }

    #[test]
    fn test_requeue_after_close_drops_payload() {
        let queue = SendQueue::new(2);
        queue.close();
        assert!(!queue.requeue(Payload::from(vec![1])));
        assert!(queue.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_producers_deliver_each_payload_once_in_order() {
        const PRODUCERS: u8 = 4;
        const PER_PRODUCER: u8 = 50;

        let queue = Arc::new(SendQueue::new(4));
        let producers: Vec<_> = (0..PRODUCERS)
            .map(|producer| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || {
                    for seq in 0..PER_PRODUCER {
                        queue
                            .enqueue(Payload::from(vec![producer, seq]), Duration::from_secs(5))
                            .unwrap();
                    }
                })
            })
            .collect();

        let mut next_seq = [0u8; PRODUCERS as usize];
        let total = usize::from(PRODUCERS) * usize::from(PER_PRODUCER);
        for _ in 0..total {
            let payload = tokio::time::timeout(Duration::from_secs(5), queue.dequeue())
                .await
                .unwrap()
                .unwrap();
            let [producer, seq] = payload.as_bytes() else {
                panic!("unexpected payload {payload:?}");
            };
            assert_eq!(*seq, next_seq[usize::from(*producer)]);
            next_seq[usize::from(*producer)] += 1;
        }

        for producer in producers {
            producer.join().unwrap();
        }
        assert!(next_seq.iter().all(|&n| n == PER_PRODUCER));
        assert!(queue.try_dequeue().is_none());
    }
}
