use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::models::status::IdempotencyStatus;

/// Remembers which events have already been emailed so that a broker
/// redelivery does not send a second copy.
#[async_trait]
pub trait DeliveryLedger: Send + Sync {
    async fn check(&self, key: &str) -> Result<IdempotencyStatus>;

    async fn mark_sent(&self, key: &str) -> Result<()>;
}

/// Ledger scoped to this process. Entries expire after `ttl`.
pub struct InMemoryLedger {
    entries: Mutex<HashMap<String, Instant>>,
    ttl: Duration,
}

impl InMemoryLedger {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
        }
    }
}

#[async_trait]
impl DeliveryLedger for InMemoryLedger {
    async fn check(&self, key: &str) -> Result<IdempotencyStatus> {
        let mut entries = self.entries.lock().await;
        let ttl = self.ttl;
        entries.retain(|_, sent_at| sent_at.elapsed() < ttl);

        if entries.contains_key(key) {
            Ok(IdempotencyStatus::Sent)
        } else {
            Ok(IdempotencyStatus::NotFound)
        }
    }

    async fn mark_sent(&self, key: &str) -> Result<()> {
        self.entries
            .lock()
            .await
            .insert(key.to_string(), Instant::now());
        Ok(())
    }
}
