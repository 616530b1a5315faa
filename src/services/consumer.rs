use std::{sync::Arc, time::Instant};

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use crate::{
    clients::{broker::MessageHandler, ledger::DeliveryLedger, mail::MailDispatcher},
    models::{
        event::NotificationEvent,
        status::{IdempotencyStatus, Outcome},
    },
};

/// Turns queue messages into welcome emails.
///
/// Malformed payloads and permanent delivery failures are rejected; only
/// transient transport failures are requeued. Attempt counting belongs to
/// the broker connection.
pub struct NotificationConsumer {
    dispatcher: Arc<dyn MailDispatcher>,
    ledger: Option<Arc<dyn DeliveryLedger>>,
}

impl NotificationConsumer {
    pub fn new(dispatcher: Arc<dyn MailDispatcher>) -> Self {
        Self {
            dispatcher,
            ledger: None,
        }
    }

    pub fn with_ledger(mut self, ledger: Arc<dyn DeliveryLedger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    pub async fn on_message(&self, raw: &[u8]) -> Outcome {
        let start = Instant::now();

        let value: serde_json::Value = match serde_json::from_slice(raw) {
            Ok(value) => value,
            Err(e) => {
                error!(error = %e, bytes = raw.len(), "Notification payload is not valid JSON");
                return Outcome::Reject;
            }
        };

        let event: NotificationEvent = match serde_json::from_value(value) {
            Ok(event) => event,
            Err(e) => {
                error!(error = %e, "Invalid email notification payload received");
                return Outcome::Reject;
            }
        };

        if let Err(e) = event.validate() {
            error!(user_id = %event.user_id, error = %e, "Notification payload failed validation");
            return Outcome::Reject;
        }

        let key = event.idempotency_key();

        debug!(user_id = %event.user_id, idempotency_key = %key, "Processing email notification");

        if let Some(ledger) = &self.ledger {
            match ledger.check(&key).await {
                Ok(IdempotencyStatus::Sent) => {
                    info!(idempotency_key = %key, "Notification already delivered, skipping");
                    return Outcome::Ack;
                }
                Ok(IdempotencyStatus::NotFound) => {}
                Err(e) => {
                    warn!(idempotency_key = %key, error = %e, "Delivery ledger unavailable, sending anyway");
                }
            }
        }

        match self.dispatcher.send(&event).await {
            Ok(()) => {
                if let Some(ledger) = &self.ledger {
                    if let Err(e) = ledger.mark_sent(&key).await {
                        warn!(idempotency_key = %key, error = %e, "Failed to record delivery");
                    }
                }

                info!(
                    user_id = %event.user_id,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Email notification processed"
                );
                Outcome::Ack
            }
            Err(e) if e.is_transient() => {
                warn!(user_id = %event.user_id, error = %e, "Email delivery failed, will retry");
                Outcome::Requeue
            }
            Err(e) => {
                error!(user_id = %event.user_id, error = %e, "Email delivery failed permanently");
                Outcome::Reject
            }
        }
    }
}

#[async_trait]
impl MessageHandler for NotificationConsumer {
    async fn handle(&self, payload: &[u8]) -> Outcome {
        self.on_message(payload).await
    }
}
