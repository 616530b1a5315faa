use async_trait::async_trait;
use lapin::types::{AMQPValue, FieldTable};
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::{
    clients::broker::{BrokerError, REDELIVERY_HEADER},
    models::{
        event::DeadLetter, retry::RetryConfig, settings::BrokerSettings, status::Outcome,
    },
    utils::backoff_delay,
};

/// What happens to a delivery once its handler has answered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Settlement {
    Ack,
    Republish { redelivery: u32 },
    DeadLetter { reason: String },
}

/// Maps a handler outcome to a settlement. A requeue that has already been
/// redelivered `max_redeliveries` times is dead-lettered instead.
pub fn settlement(outcome: Outcome, redeliveries: u32, max_redeliveries: u32) -> Settlement {
    match outcome {
        Outcome::Ack => Settlement::Ack,
        Outcome::Reject => Settlement::DeadLetter {
            reason: "rejected by consumer".to_string(),
        },
        Outcome::Requeue if redeliveries >= max_redeliveries => Settlement::DeadLetter {
            reason: format!("gave up after {} redeliveries", redeliveries),
        },
        Outcome::Requeue => Settlement::Republish {
            redelivery: redeliveries + 1,
        },
    }
}

/// Settles the original delivery with the broker.
#[async_trait]
pub trait Acknowledger: Send + Sync {
    async fn ack(&self) -> Result<(), BrokerError>;

    async fn reject(&self, requeue: bool) -> Result<(), BrokerError>;
}

/// Publishes copies and dead letters.
#[async_trait]
pub trait Republisher: Send + Sync {
    async fn republish(
        &self,
        queue: &str,
        payload: &[u8],
        headers: FieldTable,
    ) -> Result<(), BrokerError>;
}

/// A delivered message as seen by the settlement step.
pub struct Received<'a> {
    pub queue: &'a str,
    pub payload: &'a [u8],
    pub headers: Option<&'a FieldTable>,
    pub redeliveries: u32,
}

#[derive(Debug, Clone)]
pub struct SettlementPolicy {
    pub max_redeliveries: u32,
    pub dead_letter_queue: String,
    pub requeue_backoff: RetryConfig,
}

impl From<&BrokerSettings> for SettlementPolicy {
    fn from(settings: &BrokerSettings) -> Self {
        Self {
            max_redeliveries: settings.max_redeliveries,
            dead_letter_queue: settings.dead_letter_queue.clone(),
            requeue_backoff: settings.requeue_backoff.clone(),
        }
    }
}

impl SettlementPolicy {
    pub fn decide(&self, outcome: Outcome, redeliveries: u32) -> Settlement {
        settlement(outcome, redeliveries, self.max_redeliveries)
    }

    pub async fn apply(
        &self,
        settlement: Settlement,
        message: &Received<'_>,
        acker: &dyn Acknowledger,
        publisher: &dyn Republisher,
    ) -> Result<(), BrokerError> {
        match settlement {
            Settlement::Ack => acker.ack().await,
            Settlement::Republish { redelivery } => {
                self.republish(redelivery, message, acker, publisher).await
            }
            Settlement::DeadLetter { reason } => {
                self.dead_letter(reason, message, acker, publisher).await
            }
        }
    }

    /// Republishes a copy with the redelivery header bumped, then acks the
    /// original. A failed republish hands the original back to the broker.
    async fn republish(
        &self,
        redelivery: u32,
        message: &Received<'_>,
        acker: &dyn Acknowledger,
        publisher: &dyn Republisher,
    ) -> Result<(), BrokerError> {
        sleep(backoff_delay(&self.requeue_backoff, redelivery)).await;

        let mut headers = message.headers.cloned().unwrap_or_default();
        headers.insert(REDELIVERY_HEADER.into(), AMQPValue::LongUInt(redelivery));

        match publisher.republish(message.queue, message.payload, headers).await {
            Ok(()) => {
                info!(queue = message.queue, redelivery, "Message requeued");
                acker.ack().await
            }
            Err(e) => {
                warn!(queue = message.queue, error = %e, "Republish failed, returning message to broker");
                acker.reject(true).await
            }
        }
    }

    async fn dead_letter(
        &self,
        reason: String,
        message: &Received<'_>,
        acker: &dyn Acknowledger,
        publisher: &dyn Republisher,
    ) -> Result<(), BrokerError> {
        let letter = DeadLetter::new(message.payload, reason, message.redeliveries);
        let payload = serde_json::to_vec(&letter)?;

        match publisher
            .republish(&self.dead_letter_queue, &payload, FieldTable::default())
            .await
        {
            Ok(()) => {
                warn!(
                    dead_letter_queue = %self.dead_letter_queue,
                    reason = %letter.failure_reason,
                    "Message dead-lettered"
                );
                acker.ack().await
            }
            Err(e) => {
                error!(
                    error = %e,
                    reason = %letter.failure_reason,
                    "Dead-letter publish failed, dropping message"
                );
                acker.reject(false).await
            }
        }
    }
}
