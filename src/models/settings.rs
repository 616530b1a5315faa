use std::time::Duration;

use crate::models::retry::RetryConfig;

#[derive(Debug, Clone)]
pub struct BrokerSettings {
    pub url: String,
    pub dead_letter_queue: String,
    pub prefetch_count: u16,
    pub worker_concurrency: usize,
    pub max_redeliveries: u32,
    pub heartbeat_seconds: u16,
    pub reconnect: RetryConfig,
    pub requeue_backoff: RetryConfig,
    pub publish_timeout: Duration,
    pub shutdown_grace: Duration,
}

#[derive(Debug, Clone)]
pub struct SmtpSettings {
    pub host: String,
    pub port: u16,
    pub secure: bool,
    pub username: String,
    pub password: String,
    pub from_name: String,
    pub from_email: String,
    pub timeout: Duration,
}
