use stepcore::{EngineError, RunId};
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use tokio::sync::Notify;

/// Queue of run ids that are ready to take their next step.
///
/// Entries carry no state; a run id here only says "load me and advance".
/// Tracks unfinished work like a join-able task queue: every `enqueue`
/// must eventually be matched by a `task_done` once the dequeued id has
/// been fully processed.
pub struct RunQueue {
    inner: Mutex<QueueInner>,
    available: Notify,
    drained: Notify,
}

struct QueueInner {
    items: VecDeque<RunId>,
    unfinished: usize,
    closed: bool,
}

impl RunQueue {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                items: VecDeque::new(),
                unfinished: 0,
                closed: false,
            }),
            available: Notify::new(),
            drained: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Push a run id; never blocks
    pub fn enqueue(&self, run_id: impl Into<RunId>) -> Result<(), EngineError> {
        {
            let mut inner = self.lock();
            if inner.closed {
                return Err(EngineError::QueueClosed);
            }
            inner.items.push_back(run_id.into());
            inner.unfinished += 1;
        }
        self.available.notify_one();
        Ok(())
    }

    /// Wait for the next run id. Returns `None` once the queue is closed
    /// and empty.
    pub async fn dequeue(&self) -> Option<RunId> {
        loop {
            let notified = self.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut inner = self.lock();
                if let Some(run_id) = inner.items.pop_front() {
                    if !inner.items.is_empty() {
                        // pass the wakeup on to another idle worker
                        self.available.notify_one();
                    }
                    return Some(run_id);
                }
                if inner.closed {
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Mark one dequeued id as fully processed
    pub fn task_done(&self) {
        let drained = {
            let mut inner = self.lock();
            if inner.unfinished == 0 {
                tracing::warn!("task_done called more times than items were enqueued");
                return;
            }
            inner.unfinished -= 1;
            inner.unfinished == 0
        };
        if drained {
            self.drained.notify_waiters();
        }
    }

    /// Wait until every enqueued id has been dequeued and processed
    pub async fn join(&self) {
        loop {
            let notified = self.drained.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.lock().unfinished == 0 {
                return;
            }

            notified.await;
        }
    }

    /// Stop accepting entries and wake every idle worker.
    ///
    /// Items already queued are still handed out.
    pub fn close(&self) {
        self.lock().closed = true;
        self.available.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Number of ids waiting to be dequeued
    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Enqueued ids not yet marked done
    pub fn unfinished(&self) -> usize {
        self.lock().unfinished
    }
}

impl Default for RunQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn dequeues_in_fifo_order() {
        let queue = RunQueue::new();
        queue.enqueue("a").unwrap();
        queue.enqueue("b").unwrap();

        assert_eq!(queue.len(), 2);
        assert_eq!(queue.dequeue().await.as_deref(), Some("a"));
        assert_eq!(queue.dequeue().await.as_deref(), Some("b"));
        assert!(queue.is_empty());
        assert_eq!(queue.unfinished(), 2);
    }

    #[tokio::test]
    async fn dequeue_blocks_until_enqueue() {
        let queue = Arc::new(RunQueue::new());
        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.dequeue().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!consumer.is_finished());

        queue.enqueue("late").unwrap();
        let got = tokio::time::timeout(Duration::from_secs(1), consumer)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got.as_deref(), Some("late"));
    }

    #[tokio::test]
    async fn join_waits_for_task_done_not_just_dequeue() {
        let queue = Arc::new(RunQueue::new());
        queue.enqueue("run").unwrap();

        let _ = queue.dequeue().await;
        assert!(
            tokio::time::timeout(Duration::from_millis(30), queue.join())
                .await
                .is_err(),
            "join must not return while the item is still being processed"
        );

        queue.task_done();
        tokio::time::timeout(Duration::from_secs(1), queue.join())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn join_on_empty_queue_returns_immediately() {
        let queue = RunQueue::new();
        tokio::time::timeout(Duration::from_millis(100), queue.join())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn close_wakes_idle_consumers() {
        let queue = Arc::new(RunQueue::new());
        let consumers: Vec<_> = (0..3)
            .map(|_| {
                let queue = queue.clone();
                tokio::spawn(async move { queue.dequeue().await })
            })
            .collect();

        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.close();

        for consumer in consumers {
            let got = tokio::time::timeout(Duration::from_secs(1), consumer)
                .await
                .unwrap()
                .unwrap();
            assert!(got.is_none());
        }
        assert!(matches!(queue.enqueue("x"), Err(EngineError::QueueClosed)));
    }

    #[tokio::test]
    async fn many_consumers_drain_every_item() {
        let queue = Arc::new(RunQueue::new());
        let consumers: Vec<_> = (0..4)
            .map(|_| {
                let queue = queue.clone();
                tokio::spawn(async move {
                    let mut seen = Vec::new();
                    while let Some(id) = queue.dequeue().await {
                        seen.push(id);
                        queue.task_done();
                    }
                    seen
                })
            })
            .collect();

        for i in 0..50 {
            queue.enqueue(format!("run-{}", i)).unwrap();
        }
        tokio::time::timeout(Duration::from_secs(2), queue.join())
            .await
            .unwrap();
        queue.close();

        let mut total = 0;
        for consumer in consumers {
            total += consumer.await.unwrap().len();
        }
        assert_eq!(total, 50);
    }
}
