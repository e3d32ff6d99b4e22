//! Task queue abstraction for share processes.
//!
//! Only process ids cross the queue; the record itself lives in the store.
//! Delivery is at-least-once: claiming in the store is what makes a run
//! exclusive, so a duplicate id is harmless.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};

use keywarden_core::ShareProcessId;

use crate::error::{Result, ShareError};

/// A queue of share process ids.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Enqueue a process for execution.
    async fn enqueue(&self, id: ShareProcessId) -> Result<()>;

    /// Take the next process id.
    ///
    /// Returns None if nothing arrives before the timeout.
    async fn dequeue(&self, timeout: Duration) -> Result<Option<ShareProcessId>>;
}

/// In-process queue over an unbounded tokio channel.
pub struct MemoryQueue {
    sender: mpsc::UnboundedSender<ShareProcessId>,
    receiver: Mutex<mpsc::UnboundedReceiver<ShareProcessId>>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            sender,
            receiver: Mutex::new(receiver),
        }
    }
}

impl Default for MemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskQueue for MemoryQueue {
    async fn enqueue(&self, id: ShareProcessId) -> Result<()> {
        self.sender.send(id).map_err(|_| ShareError::QueueClosed)?;
        tracing::debug!(process_id = %id, "share process enqueued");
        Ok(())
    }

    async fn dequeue(&self, timeout: Duration) -> Result<Option<ShareProcessId>> {
        let mut rx = self.receiver.lock().await;
        match tokio::time::timeout(timeout, rx.recv()).await {
            Ok(Some(id)) => Ok(Some(id)),
            Ok(None) => Err(ShareError::QueueClosed),
            Err(_) => Ok(None), // Timeout
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fifo_order() {
        let queue = MemoryQueue::new();
        let a = ShareProcessId::new();
        let b = ShareProcessId::new();

        queue.enqueue(a).await.unwrap();
        queue.enqueue(b).await.unwrap();

        let wait = Duration::from_millis(50);
        assert_eq!(queue.dequeue(wait).await.unwrap(), Some(a));
        assert_eq!(queue.dequeue(wait).await.unwrap(), Some(b));
    }

    #[tokio::test]
    async fn test_dequeue_times_out_when_empty() {
        let queue = MemoryQueue::new();
        assert_eq!(
            queue.dequeue(Duration::from_millis(10)).await.unwrap(),
            None
        );
    }
}
