use async_trait::async_trait;
use redis::AsyncCommands;
use std::time::Duration;

use crate::models::task::TaskEnvelope;

/// A consumed envelope plus the raw payload needed to acknowledge it.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub envelope: TaskEnvelope,
    /// Serialized form exactly as held by the broker.
    pub receipt: String,
}

/// Durable work queue with at-least-once delivery.
///
/// A delivery stays in flight until it is acked (done) or nacked (returned
/// to the queue). Deliveries abandoned by a crashed consumer are handed out
/// again.
#[async_trait]
pub trait QueueChannel: Send + Sync {
    async fn publish(&self, envelope: &TaskEnvelope) -> Result<(), QueueError>;

    /// Wait up to `wait` for the next envelope.
    async fn consume(&self, wait: Duration) -> Result<Option<Delivery>, QueueError>;

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError>;

    async fn nack(&self, delivery: &Delivery) -> Result<(), QueueError>;

    /// Number of envelopes waiting to be consumed.
    async fn depth(&self) -> Result<u64, QueueError>;

    async fn ping(&self) -> Result<(), QueueError>;
}

/// Redis-backed reliable queue.
///
/// Envelopes are `LPUSH`ed onto `<queue>` and consumed with `BRPOPLPUSH`
/// into `<queue>:processing:<consumer>`, a list owned by one consumer.
pub struct RedisQueue {
    client: redis::Client,
    queue_key: String,
    processing_key: String,
}

impl RedisQueue {
    pub fn new(redis_url: &str, queue_name: &str, consumer: &str) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url).map_err(QueueError::Redis)?;
        Ok(Self {
            client,
            queue_key: queue_name.to_string(),
            processing_key: format!("{queue_name}:processing:{consumer}"),
        })
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection, QueueError> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(QueueError::Redis)
    }

    /// Return envelopes left in this consumer's in-flight list by a previous
    /// run to the queue. Call once before consuming.
    pub async fn recover(&self) -> Result<u64, QueueError> {
        let mut conn = self.connection().await?;
        let mut moved = 0;
        loop {
            let payload: Option<String> = conn
                .rpoplpush(&self.processing_key, &self.queue_key)
                .await
                .map_err(QueueError::Redis)?;
            if payload.is_none() {
                break;
            }
            moved += 1;
        }
        Ok(moved)
    }
}

#[async_trait]
impl QueueChannel for RedisQueue {
    async fn publish(&self, envelope: &TaskEnvelope) -> Result<(), QueueError> {
        let mut conn = self.connection().await?;
        let payload = serde_json::to_string(envelope).map_err(QueueError::Serialize)?;
        conn.lpush::<_, _, ()>(&self.queue_key, &payload)
            .await
            .map_err(QueueError::Redis)?;
        Ok(())
    }

    async fn consume(&self, wait: Duration) -> Result<Option<Delivery>, QueueError> {
        let mut conn = self.connection().await?;
        // BRPOPLPUSH blocks server-side; a zero timeout would block forever.
        let timeout = wait.as_secs().max(1);
        let payload: Option<String> = redis::cmd("BRPOPLPUSH")
            .arg(&self.queue_key)
            .arg(&self.processing_key)
            .arg(timeout)
            .query_async(&mut conn)
            .await
            .map_err(QueueError::Redis)?;

        let Some(receipt) = payload else {
            return Ok(None);
        };
        match serde_json::from_str::<TaskEnvelope>(&receipt) {
            Ok(envelope) => Ok(Some(Delivery { envelope, receipt })),
            Err(e) => {
                tracing::error!(error = %e, payload = %receipt, "Dropping malformed envelope");
                conn.lrem::<_, _, ()>(&self.processing_key, 1, &receipt)
                    .await
                    .map_err(QueueError::Redis)?;
                Err(QueueError::Serialize(e))
            }
        }
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        let mut conn = self.connection().await?;
        conn.lrem::<_, _, ()>(&self.processing_key, 1, &delivery.receipt)
            .await
            .map_err(QueueError::Redis)?;
        Ok(())
    }

    async fn nack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        let mut conn = self.connection().await?;
        redis::pipe()
            .atomic()
            .lrem(&self.processing_key, 1, &delivery.receipt)
            .ignore()
            .lpush(&self.queue_key, &delivery.receipt)
            .ignore()
            .query_async::<()>(&mut conn)
            .await
            .map_err(QueueError::Redis)?;
        Ok(())
    }

    async fn depth(&self) -> Result<u64, QueueError> {
        let mut conn = self.connection().await?;
        let depth: u64 = conn.llen(&self.queue_key).await.map_err(QueueError::Redis)?;
        Ok(depth)
    }

    async fn ping(&self) -> Result<(), QueueError> {
        let mut conn = self.connection().await?;
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map_err(QueueError::Redis)?;
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Queue unavailable: {0}")]
    Unavailable(String),

    #[error("Unknown delivery for task {0}")]
    UnknownDelivery(String),
}
