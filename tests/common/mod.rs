#![allow(dead_code)]

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use notification_service::{
    clients::{
        broker::BrokerConnection,
        mail::{DeliveryError, MailDispatcher},
        template::render_welcome_email,
    },
    models::{
        event::NotificationEvent, retry::RetryConfig, settings::BrokerSettings,
        template::RenderedEmail,
    },
};
use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Behaviour {
    Deliver,
    TimeOut,
    RejectRecipient,
}

/// Mail dispatcher that renders and records every send attempt instead of
/// talking SMTP.
pub struct RecordingDispatcher {
    behaviour: Behaviour,
    reachable: bool,
    attempts: Mutex<Vec<RenderedEmail>>,
}

impl RecordingDispatcher {
    pub fn new(behaviour: Behaviour) -> Arc<Self> {
        Arc::new(Self {
            behaviour,
            reachable: true,
            attempts: Mutex::new(Vec::new()),
        })
    }

    pub fn unreachable() -> Arc<Self> {
        Arc::new(Self {
            behaviour: Behaviour::TimeOut,
            reachable: false,
            attempts: Mutex::new(Vec::new()),
        })
    }

    pub async fn attempts(&self) -> Vec<RenderedEmail> {
        self.attempts.lock().await.clone()
    }

    pub async fn attempt_count(&self) -> usize {
        self.attempts.lock().await.len()
    }
}

#[async_trait]
impl MailDispatcher for RecordingDispatcher {
    async fn send(&self, event: &NotificationEvent) -> Result<(), DeliveryError> {
        self.attempts.lock().await.push(render_welcome_email(event));

        match self.behaviour {
            Behaviour::Deliver => Ok(()),
            Behaviour::TimeOut => Err(DeliveryError::Transient(
                "SMTP send timed out".to_string(),
            )),
            Behaviour::RejectRecipient => Err(DeliveryError::Permanent(
                "550 mailbox unavailable".to_string(),
            )),
        }
    }

    async fn verify(&self) -> bool {
        self.reachable
    }
}

pub fn broker_settings() -> BrokerSettings {
    BrokerSettings {
        url: "amqp://127.0.0.1:1".to_string(),
        dead_letter_queue: "email_notifications.failed".to_string(),
        prefetch_count: 10,
        worker_concurrency: 2,
        max_redeliveries: 3,
        heartbeat_seconds: 60,
        reconnect: RetryConfig {
            max_attempts: u32::MAX,
            initial_delay_ms: 50,
            max_delay_ms: 200,
            backoff_multiplier: 2,
        },
        requeue_backoff: RetryConfig {
            max_attempts: 3,
            initial_delay_ms: 10,
            max_delay_ms: 50,
            backoff_multiplier: 2,
        },
        publish_timeout: Duration::from_secs(2),
        shutdown_grace: Duration::from_secs(1),
    }
}

/// A broker that was never started, so it stays `disconnected`.
pub fn disconnected_broker() -> Arc<BrokerConnection> {
    Arc::new(BrokerConnection::new(broker_settings()))
}

pub fn welcome_payload() -> Vec<u8> {
    serde_json::to_vec(&serde_json::json!({
        "userId": "u1",
        "email": "a@b.com",
        "fullName": "A B",
        "message": "hi",
        "timestamp": "2024-01-01T00:00:00Z",
    }))
    .unwrap()
}
