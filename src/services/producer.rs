use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Instant,
};

use tracing::{info, warn};

use crate::{
    clients::broker::BrokerConnection,
    models::{
        event::NotificationEvent, health::PublishCounters, status::NotifyOutcome, user::User,
    },
};

#[derive(Debug, Default)]
pub struct PublishStats {
    published: AtomicU64,
    failed: AtomicU64,
}

impl PublishStats {
    pub fn snapshot(&self) -> PublishCounters {
        PublishCounters {
            published: self.published.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

/// Publishes a [`NotificationEvent`] for each persisted user.
///
/// `notify` never fails: the outcome is returned and counted, but the record
/// that triggered it stays created either way.
pub struct NotificationProducer {
    broker: Arc<BrokerConnection>,
    queue: String,
    stats: Arc<PublishStats>,
}

impl NotificationProducer {
    pub fn new(broker: Arc<BrokerConnection>, queue: impl Into<String>) -> Self {
        Self {
            broker,
            queue: queue.into(),
            stats: Arc::new(PublishStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<PublishStats> {
        Arc::clone(&self.stats)
    }

    pub async fn notify(&self, user: &User) -> NotifyOutcome {
        let event = NotificationEvent::from_user(user);
        let start = Instant::now();

        match self.broker.publish(&self.queue, &event).await {
            Ok(()) => {
                self.stats.published.fetch_add(1, Ordering::Relaxed);
                info!(
                    user_id = %event.user_id,
                    queue = %self.queue,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Email notification queued"
                );
                NotifyOutcome::Published
            }
            Err(e) => {
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                warn!(
                    user_id = %event.user_id,
                    queue = %self.queue,
                    broker_state = %self.broker.state(),
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    error = %e,
                    "Failed to publish email notification, continuing without it"
                );
                NotifyOutcome::Failed(e.to_string())
            }
        }
    }
}
