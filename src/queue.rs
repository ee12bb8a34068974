//! AMQP task queue: publishing ingestion tasks and consuming them with explicit settlement.
//!
//! The queue is declared durable and messages are published persistent with publisher confirms,
//! so an accepted `/ingest` request survives a broker restart. Consumers run with a prefetch of
//! one and settle every delivery explicitly; the disposition distinguishes transient failures
//! (requeue) from poison messages (drop) so one bad document cannot wedge the queue.

use futures_util::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions, BasicQosOptions,
    ConfirmSelectOptions, QueueDeclareOptions,
};
use lapin::publisher_confirm::Confirmation;
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

const CONNECT_ATTEMPTS: u32 = 5;
const CONNECT_BACKOFF_BASE_MS: u64 = 200;

/// Errors raised by queue operations.
#[derive(Debug, Error)]
pub enum QueueError {
    /// The broker could not be reached after bounded retries.
    #[error("Message broker unavailable: {0}")]
    BrokerUnavailable(String),
    /// A channel or queue operation failed.
    #[error("Broker operation failed: {0}")]
    Broker(#[from] lapin::Error),
    /// The broker did not confirm a publish.
    #[error("Publish was not confirmed by the broker")]
    Unconfirmed,
    /// A task message could not be serialized.
    #[error("Failed to serialize task message: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// How a consumed delivery is settled after processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Processing finished (stored or recognized duplicate); remove from the queue.
    Ack,
    /// A dependency was unavailable before any work happened; return for redelivery.
    NackRequeue,
    /// The message itself cannot be processed; drop it so it cannot poison the queue.
    NackDrop,
}

/// One queued ingestion task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskMessage {
    /// Correlation id assigned when the task was accepted.
    pub task_id: String,
    /// Path of the document on storage shared with the workers.
    pub file_path: String,
    /// Original filename, kept for logging and the processed-document record.
    pub filename: String,
}

async fn connect_with_retry(amqp_url: &str) -> Result<Connection, QueueError> {
    let mut last_error = String::new();
    for attempt in 0..CONNECT_ATTEMPTS {
        match Connection::connect(amqp_url, ConnectionProperties::default()).await {
            Ok(connection) => return Ok(connection),
            Err(error) => {
                last_error = error.to_string();
                let backoff = Duration::from_millis(CONNECT_BACKOFF_BASE_MS << attempt);
                tracing::warn!(
                    attempt = attempt + 1,
                    error = %error,
                    "Broker connection failed; retrying"
                );
                tokio::time::sleep(backoff).await;
            }
        }
    }
    Err(QueueError::BrokerUnavailable(last_error))
}

async fn declare_task_queue(channel: &Channel, queue: &str) -> Result<(), QueueError> {
    channel
        .queue_declare(
            queue,
            QueueDeclareOptions {
                durable: true,
                ..QueueDeclareOptions::default()
            },
            FieldTable::default(),
        )
        .await?;
    Ok(())
}

/// Publishes ingestion tasks with persistent delivery and publisher confirms.
pub struct TaskPublisher {
    // Held so the underlying connection outlives the channel.
    _connection: Connection,
    channel: Channel,
    queue: String,
}

impl TaskPublisher {
    /// Connect to the broker and declare the durable task queue.
    pub async fn connect(amqp_url: &str, queue: &str) -> Result<Self, QueueError> {
        let connection = connect_with_retry(amqp_url).await?;
        let channel = connection.create_channel().await?;
        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await?;
        declare_task_queue(&channel, queue).await?;

        Ok(Self {
            _connection: connection,
            channel,
            queue: queue.to_string(),
        })
    }

    /// Publish one task and wait for the broker's confirmation.
    pub async fn publish(&self, task: &TaskMessage) -> Result<(), QueueError> {
        let payload = serde_json::to_vec(task)?;
        let confirmation = self
            .channel
            .basic_publish(
                "",
                &self.queue,
                BasicPublishOptions::default(),
                &payload,
                BasicProperties::default().with_delivery_mode(2),
            )
            .await?
            .await?;

        if matches!(confirmation, Confirmation::Nack(_)) {
            return Err(QueueError::Unconfirmed);
        }

        tracing::info!(task_id = %task.task_id, filename = %task.filename, "Queued ingestion task");
        Ok(())
    }
}

/// Consumes ingestion tasks one at a time with explicit settlement.
pub struct IngestionConsumer {
    _connection: Connection,
    channel: Channel,
    consumer: lapin::Consumer,
}

impl IngestionConsumer {
    /// Connect to the broker, declare the queue, and start a manual-ack consumer with a
    /// prefetch of one.
    pub async fn connect(amqp_url: &str, queue: &str) -> Result<Self, QueueError> {
        let connection = connect_with_retry(amqp_url).await?;
        let channel = connection.create_channel().await?;
        channel
            .basic_qos(1, BasicQosOptions::default())
            .await?;
        declare_task_queue(&channel, queue).await?;

        let consumer = channel
            .basic_consume(
                queue,
                "ingestion-worker",
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;

        Ok(Self {
            _connection: connection,
            channel,
            consumer,
        })
    }

    /// Consume deliveries until the stream ends, settling each according to the handler's
    /// disposition. Deliveries whose payload is not a valid task are dropped immediately.
    pub async fn run<F, Fut>(&mut self, handle: F) -> Result<(), QueueError>
    where
        F: Fn(TaskMessage) -> Fut,
        Fut: Future<Output = Disposition>,
    {
        while let Some(delivery) = self.consumer.next().await {
            let delivery = delivery?;

            let disposition = match serde_json::from_slice::<TaskMessage>(&delivery.data) {
                Ok(task) => {
                    let task_id = task.task_id.clone();
                    let disposition = handle(task).await;
                    tracing::debug!(task_id = %task_id, ?disposition, "Settling delivery");
                    disposition
                }
                Err(error) => {
                    tracing::error!(error = %error, "Discarding malformed task message");
                    Disposition::NackDrop
                }
            };

            self.settle(delivery.delivery_tag, disposition).await?;
        }
        Ok(())
    }

    async fn settle(&self, delivery_tag: u64, disposition: Disposition) -> Result<(), QueueError> {
        match disposition {
            Disposition::Ack => {
                self.channel
                    .basic_ack(delivery_tag, BasicAckOptions::default())
                    .await?;
            }
            Disposition::NackRequeue => {
                self.channel
                    .basic_nack(
                        delivery_tag,
                        BasicNackOptions {
                            requeue: true,
                            ..BasicNackOptions::default()
                        },
                    )
                    .await?;
            }
            Disposition::NackDrop => {
                self.channel
                    .basic_nack(
                        delivery_tag,
                        BasicNackOptions {
                            requeue: false,
                            ..BasicNackOptions::default()
                        },
                    )
                    .await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_message_round_trips_as_json() {
        let task = TaskMessage {
            task_id: "a2f1".into(),
            file_path: "/data/uploads/policy.txt".into(),
            filename: "policy.txt".into(),
        };

        let payload = serde_json::to_vec(&task).expect("serialize");
        let parsed: TaskMessage = serde_json::from_slice(&payload).expect("deserialize");
        assert_eq!(parsed, task);
    }

    #[test]
    fn malformed_payload_fails_to_parse() {
        assert!(serde_json::from_slice::<TaskMessage>(b"not json").is_err());
        assert!(serde_json::from_slice::<TaskMessage>(br#"{"task_id": "x"}"#).is_err());
    }
}
