use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use tokio::sync::Notify;

use crate::models::job::WorkItem;

/// A popped work item plus the raw payload needed to acknowledge it.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub item: WorkItem,
    payload: String,
}

/// At-least-once queue of pending work items.
#[async_trait]
pub trait WorkQueue: Send + Sync {
    async fn push(&self, item: &WorkItem) -> Result<(), QueueError>;

    /// Wait up to `wait` for the next item. The item stays in flight until acked.
    async fn pop(&self, wait: Duration) -> Result<Option<Delivery>, QueueError>;

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError>;

    /// Return this consumer's in-flight items to the pending queue.
    async fn recover_in_flight(&self) -> Result<u64, QueueError>;

    async fn depth(&self) -> Result<u64, QueueError>;

    async fn health_check(&self) -> Result<(), QueueError>;
}

/// Redis-list queue. Pops move the payload into a per-consumer processing list
/// so a restarted consumer can put its unfinished work back.
pub struct RedisWorkQueue {
    client: redis::Client,
    queue_key: String,
    processing_key: String,
}

impl RedisWorkQueue {
    pub fn new(redis_url: &str, prefix: &str, consumer_id: &str) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url).map_err(QueueError::Redis)?;
        Ok(Self {
            client,
            queue_key: format!("{prefix}:queue"),
            processing_key: format!("{prefix}:processing:{consumer_id}"),
        })
    }

    async fn conn(&self) -> Result<redis::aio::MultiplexedConnection, QueueError> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(QueueError::Redis)
    }
}

#[async_trait]
impl WorkQueue for RedisWorkQueue {
    async fn push(&self, item: &WorkItem) -> Result<(), QueueError> {
        let mut conn = self.conn().await?;
        let payload = serde_json::to_string(item).map_err(QueueError::Serialize)?;
        conn.lpush::<_, _, ()>(&self.queue_key, &payload)
            .await
            .map_err(QueueError::Redis)?;
        Ok(())
    }

    async fn pop(&self, wait: Duration) -> Result<Option<Delivery>, QueueError> {
        let mut conn = self.conn().await?;
        let payload: Option<String> = redis::cmd("BRPOPLPUSH")
            .arg(&self.queue_key)
            .arg(&self.processing_key)
            .arg(wait.as_secs_f64())
            .query_async(&mut conn)
            .await
            .map_err(QueueError::Redis)?;

        let Some(payload) = payload else {
            return Ok(None);
        };
        match serde_json::from_str::<WorkItem>(&payload) {
            Ok(item) => Ok(Some(Delivery { item, payload })),
            Err(e) => {
                tracing::warn!(error = %e, "Dropping malformed work item");
                conn.lrem::<_, _, ()>(&self.processing_key, 1, &payload)
                    .await
                    .map_err(QueueError::Redis)?;
                Ok(None)
            }
        }
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        let mut conn = self.conn().await?;
        conn.lrem::<_, _, ()>(&self.processing_key, 1, &delivery.payload)
            .await
            .map_err(QueueError::Redis)?;
        Ok(())
    }

    async fn recover_in_flight(&self) -> Result<u64, QueueError> {
        let mut conn = self.conn().await?;
        let mut recovered = 0;
        loop {
            let moved: Option<String> = conn
                .rpoplpush(&self.processing_key, &self.queue_key)
                .await
                .map_err(QueueError::Redis)?;
            if moved.is_none() {
                return Ok(recovered);
            }
            recovered += 1;
        }
    }

    async fn depth(&self) -> Result<u64, QueueError> {
        let mut conn = self.conn().await?;
        let depth: u64 = conn.llen(&self.queue_key).await.map_err(QueueError::Redis)?;
        Ok(depth)
    }

    async fn health_check(&self) -> Result<(), QueueError> {
        let mut conn = self.conn().await?;
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map_err(QueueError::Redis)?;
        Ok(())
    }
}

/// In-process FIFO queue for tests and single-process development.
///
/// State sits behind synchronous mutexes so a cancelled `pop` can never lose
/// an item between the pending and in-flight lists.
#[derive(Default)]
pub struct MemoryWorkQueue {
    state: std::sync::Mutex<MemoryQueueState>,
    notify: Notify,
}

#[derive(Default)]
struct MemoryQueueState {
    pending: VecDeque<String>,
    in_flight: Vec<String>,
}

impl MemoryWorkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MemoryQueueState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn in_flight(&self) -> usize {
        self.state().in_flight.len()
    }

    fn take_next(&self) -> Option<String> {
        let mut state = self.state();
        let payload = state.pending.pop_front()?;
        state.in_flight.push(payload.clone());
        Some(payload)
    }
}

#[async_trait]
impl WorkQueue for MemoryWorkQueue {
    async fn push(&self, item: &WorkItem) -> Result<(), QueueError> {
        let payload = serde_json::to_string(item).map_err(QueueError::Serialize)?;
        self.state().pending.push_back(payload);
        self.notify.notify_one();
        Ok(())
    }

    async fn pop(&self, wait: Duration) -> Result<Option<Delivery>, QueueError> {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            let notified = self.notify.notified();
            if let Some(payload) = self.take_next() {
                let item = serde_json::from_str(&payload).map_err(QueueError::Serialize)?;
                return Ok(Some(Delivery { item, payload }));
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        let mut state = self.state();
        if let Some(pos) = state.in_flight.iter().position(|p| *p == delivery.payload) {
            state.in_flight.remove(pos);
        }
        Ok(())
    }

    async fn recover_in_flight(&self) -> Result<u64, QueueError> {
        let count = {
            let mut state = self.state();
            let recovered: Vec<String> = state.in_flight.drain(..).collect();
            let count = recovered.len() as u64;
            for payload in recovered.into_iter().rev() {
                state.pending.push_front(payload);
            }
            count
        };
        self.notify.notify_one();
        Ok(count)
    }

    async fn depth(&self) -> Result<u64, QueueError> {
        Ok(self.state().pending.len() as u64)
    }

    async fn health_check(&self) -> Result<(), QueueError> {
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::job::{Contract, JobInput, NormalizedInput};

    fn item(id: &str) -> WorkItem {
        WorkItem {
            job_id: id.to_string(),
            input: JobInput {
                source: NormalizedInput::ResourceUrl(format!("https://a/{id}.pdf")),
                contract: Contract::Legacy,
            },
            callback: None,
        }
    }

    #[tokio::test]
    async fn test_memory_queue_is_fifo() {
        let queue = MemoryWorkQueue::new();
        queue.push(&item("a")).await.unwrap();
        queue.push(&item("b")).await.unwrap();

        let first = queue.pop(Duration::from_millis(10)).await.unwrap().unwrap();
        let second = queue.pop(Duration::from_millis(10)).await.unwrap().unwrap();
        assert_eq!(first.item.job_id, "a");
        assert_eq!(second.item.job_id, "b");
    }

    #[tokio::test]
    async fn test_pop_times_out_on_empty_queue() {
        let queue = MemoryWorkQueue::new();
        let popped = queue.pop(Duration::from_millis(20)).await.unwrap();
        assert!(popped.is_none());
    }

    #[tokio::test]
    async fn test_pop_wakes_on_push() {
        let queue = std::sync::Arc::new(MemoryWorkQueue::new());
        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.pop(Duration::from_secs(5)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.push(&item("late")).await.unwrap();

        let delivery = consumer.await.unwrap().unwrap().unwrap();
        assert_eq!(delivery.item.job_id, "late");
    }

    #[tokio::test]
    async fn test_unacked_items_are_recovered() {
        let queue = MemoryWorkQueue::new();
        queue.push(&item("a")).await.unwrap();
        queue.push(&item("b")).await.unwrap();
        let a = queue.pop(Duration::from_millis(10)).await.unwrap().unwrap();
        let _b = queue.pop(Duration::from_millis(10)).await.unwrap().unwrap();
        queue.ack(&a).await.unwrap();

        assert_eq!(queue.recover_in_flight().await.unwrap(), 1);
        assert_eq!(queue.in_flight(), 0);
        let again = queue.pop(Duration::from_millis(10)).await.unwrap().unwrap();
        assert_eq!(again.item.job_id, "b");
    }
}
