use crate::{Error, Result};
use async_channel::{Receiver, Sender};
use async_trait::async_trait;
use sqlx::postgres::PgPool;
use sqlx::Row;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// A result payload handed out by the broker, pending settlement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub id: i64,
    pub payload: Vec<u8>,
    /// Number of times this payload has been delivered, this delivery included.
    pub attempts: i32,
}

/// At-least-once broker: work goes out on the jobs topic, worker results
/// come back on the results topic.
#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn publish(&self, payload: Vec<u8>) -> Result<()>;

    /// Claims the next result, or `None` if nothing is waiting.
    async fn fetch(&self) -> Result<Option<Delivery>>;

    async fn ack(&self, delivery: &Delivery) -> Result<()>;

    /// Gives the delivery back. Without `requeue` it is dead-lettered.
    async fn nack(&self, delivery: &Delivery, requeue: bool) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "queue_status_enum", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueueStatus {
    Queued,
    Processing,
    Dead,
}

/// Broker backed by the `conversion_queue` table.
#[derive(Clone)]
pub struct PgQueue {
    pool: Arc<PgPool>,
    jobs_topic: String,
    results_topic: String,
}

impl PgQueue {
    pub fn new(pool: Arc<PgPool>, jobs_topic: impl Into<String>, results_topic: impl Into<String>) -> Self {
        PgQueue {
            pool,
            jobs_topic: jobs_topic.into(),
            results_topic: results_topic.into(),
        }
    }

    /// Returns deliveries claimed by a consumer that went away to the queue.
    pub async fn reset_processing(&self) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE conversion_queue \
                SET status = $1, locked_at = NULL \
            WHERE status = $2 AND topic = $3",
        )
        .bind(QueueStatus::Queued)
        .bind(QueueStatus::Processing)
        .bind(&self.results_topic)
        .execute(&*self.pool)
        .await
        .map_err(Error::queue)?;

        debug!("Reset {} processing deliveries", result.rows_affected());
        Ok(result.rows_affected())
    }

    /// Publishes a worker result. Used by workers and by tooling that replays results.
    pub async fn push_result(&self, payload: Vec<u8>) -> Result<()> {
        self.insert(&self.results_topic, payload)
            .await
            .map_err(Error::queue)
    }

    async fn insert(&self, topic: &str, payload: Vec<u8>) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO conversion_queue (topic, payload, status, attempts) \
            VALUES ($1, $2, $3, 0)",
        )
        .bind(topic)
        .bind(payload)
        .bind(QueueStatus::Queued)
        .execute(&*self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl JobQueue for PgQueue {
    async fn publish(&self, payload: Vec<u8>) -> Result<()> {
        debug!("Publishing {} bytes to {}", payload.len(), self.jobs_topic);
        self.insert(&self.jobs_topic, payload)
            .await
            .map_err(Error::publish)
    }

    async fn fetch(&self) -> Result<Option<Delivery>> {
        let row = sqlx::query(
            "UPDATE conversion_queue \
                SET status = $1, attempts = attempts + 1, locked_at = now() \
            WHERE id = ( \
                SELECT id FROM conversion_queue \
                WHERE topic = $2 AND status = $3 \
                ORDER BY id \
                FOR UPDATE SKIP LOCKED \
                LIMIT 1 \
            ) \
            RETURNING id, payload, attempts",
        )
        .bind(QueueStatus::Processing)
        .bind(&self.results_topic)
        .bind(QueueStatus::Queued)
        .fetch_optional(&*self.pool)
        .await
        .map_err(Error::queue)?;

        let Some(row) = row else {
            return Ok(None);
        };
        Ok(Some(Delivery {
            id: row.try_get("id").map_err(Error::queue)?,
            payload: row.try_get("payload").map_err(Error::queue)?,
            attempts: row.try_get("attempts").map_err(Error::queue)?,
        }))
    }

    async fn ack(&self, delivery: &Delivery) -> Result<()> {
        sqlx::query("DELETE FROM conversion_queue WHERE id = $1")
            .bind(delivery.id)
            .execute(&*self.pool)
            .await
            .map_err(Error::queue)?;
        Ok(())
    }

    async fn nack(&self, delivery: &Delivery, requeue: bool) -> Result<()> {
        let status = if requeue {
            QueueStatus::Queued
        } else {
            warn!(delivery_id = delivery.id, "Dead-lettering delivery");
            QueueStatus::Dead
        };
        sqlx::query(
            "UPDATE conversion_queue \
                SET status = $1, locked_at = NULL \
            WHERE id = $2",
        )
        .bind(status)
        .bind(delivery.id)
        .execute(&*self.pool)
        .await
        .map_err(Error::queue)?;
        Ok(())
    }
}

/// In-process broker. Published jobs are bounded by `capacity`; results are
/// not, so requeueing from inside a consumer never blocks on that consumer.
#[derive(Clone)]
pub struct ChannelQueue {
    jobs: (Sender<Vec<u8>>, Receiver<Vec<u8>>),
    results: (Sender<Delivery>, Receiver<Delivery>),
    next_id: Arc<AtomicI64>,
    dead: Arc<Mutex<Vec<Delivery>>>,
}

impl ChannelQueue {
    pub fn new(capacity: usize) -> Self {
        ChannelQueue {
            jobs: async_channel::bounded(capacity),
            results: async_channel::unbounded(),
            next_id: Arc::new(AtomicI64::new(1)),
            dead: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Worker side: waits for the next published job. `None` once closed.
    pub async fn next_job(&self) -> Option<Vec<u8>> {
        self.jobs.1.recv().await.ok()
    }

    pub fn try_next_job(&self) -> Option<Vec<u8>> {
        self.jobs.1.try_recv().ok()
    }

    /// Worker side: reports a result.
    pub async fn push_result(&self, payload: Vec<u8>) -> Result<()> {
        let delivery = Delivery {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            payload,
            attempts: 0,
        };
        self.results
            .0
            .send(delivery)
            .await
            .map_err(|_| Error::queue("results channel closed"))
    }

    /// Stops accepting published jobs, as a broker outage would.
    pub fn close_jobs(&self) {
        self.jobs.0.close();
    }

    pub fn pending_results(&self) -> usize {
        self.results.1.len()
    }

    pub fn dead_letters(&self) -> Vec<Delivery> {
        self.dead
            .lock()
            .map(|dead| dead.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl JobQueue for ChannelQueue {
    async fn publish(&self, payload: Vec<u8>) -> Result<()> {
        self.jobs
            .0
            .send(payload)
            .await
            .map_err(|_| Error::publish("jobs channel closed"))
    }

    async fn fetch(&self) -> Result<Option<Delivery>> {
        match self.results.1.recv().await {
            Ok(mut delivery) => {
                delivery.attempts += 1;
                Ok(Some(delivery))
            }
            Err(_) => Ok(None),
        }
    }

    async fn ack(&self, _delivery: &Delivery) -> Result<()> {
        Ok(())
    }

    async fn nack(&self, delivery: &Delivery, requeue: bool) -> Result<()> {
        if requeue {
            return self
                .results
                .0
                .send(delivery.clone())
                .await
                .map_err(|_| Error::queue("results channel closed"));
        }
        warn!(delivery_id = delivery.id, "Dead-lettering delivery");
        if let Ok(mut dead) = self.dead.lock() {
            dead.push(delivery.clone());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn publish_reaches_worker_side() {
        let queue = ChannelQueue::new(4);
        queue.publish(b"job".to_vec()).await.unwrap();
        assert_eq!(queue.next_job().await.unwrap(), b"job");
    }

    #[tokio::test]
    async fn publish_after_close_is_publish_error() {
        let queue = ChannelQueue::new(4);
        queue.close_jobs();
        let err = queue.publish(b"job".to_vec()).await.unwrap_err();
        assert!(matches!(err, Error::Publish(_)));
    }

    #[tokio::test]
    async fn requeued_delivery_counts_attempts() {
        let queue = ChannelQueue::new(4);
        queue.push_result(b"r".to_vec()).await.unwrap();

        let first = queue.fetch().await.unwrap().unwrap();
        assert_eq!(first.attempts, 1);
        queue.nack(&first, true).await.unwrap();

        let second = queue.fetch().await.unwrap().unwrap();
        assert_eq!(second.id, first.id);
        assert_eq!(second.attempts, 2);

        queue.nack(&second, false).await.unwrap();
        assert_eq!(queue.dead_letters(), vec![second]);
        assert_eq!(queue.pending_results(), 0);
    }

    #[tokio::test]
    async fn requeue_does_not_wait_for_backlog() {
        let queue = ChannelQueue::new(1);
        queue.push_result(b"r1".to_vec()).await.unwrap();
        let first = queue.fetch().await.unwrap().unwrap();
        queue.push_result(b"r2".to_vec()).await.unwrap();

        tokio::time::timeout(Duration::from_secs(2), queue.nack(&first, true))
            .await
            .expect("requeue blocked behind the pending result")
            .unwrap();
        assert_eq!(queue.pending_results(), 2);
    }
}
