use std::time::Duration;

use anyhow::{Error, Result, anyhow};
use dotenvy::dotenv;
use serde::Deserialize;

use crate::models::{
    retry::RetryConfig,
    role::ServiceRole,
    settings::{BrokerSettings, SmtpSettings},
};

#[derive(Clone, Deserialize, Debug)]
pub struct Config {
    #[serde(default = "default_rabbitmq_url")]
    pub rabbitmq_url: String,
    #[serde(default = "default_notification_queue")]
    pub notification_queue: String,
    #[serde(default = "default_dead_letter_queue")]
    pub dead_letter_queue: String,
    #[serde(default = "default_prefetch_count")]
    pub prefetch_count: u16,
    #[serde(default = "default_worker_concurrency")]
    pub worker_concurrency: usize,
    #[serde(default = "default_max_redeliveries")]
    pub max_redeliveries: u32,
    #[serde(default = "default_heartbeat_seconds")]
    pub heartbeat_seconds: u16,

    #[serde(default = "default_reconnect_initial_delay_ms")]
    pub reconnect_initial_delay_ms: u64,
    #[serde(default = "default_reconnect_max_delay_ms")]
    pub reconnect_max_delay_ms: u64,
    #[serde(default = "default_reconnect_backoff_multiplier")]
    pub reconnect_backoff_multiplier: u64,

    #[serde(default = "default_publish_timeout_seconds")]
    pub publish_timeout_seconds: u64,
    #[serde(default = "default_shutdown_grace_seconds")]
    pub shutdown_grace_seconds: u64,

    pub database_url: Option<String>,

    pub redis_url: Option<String>,
    #[serde(default = "default_idempotency_ttl_seconds")]
    pub idempotency_ttl_seconds: u64,

    #[serde(default = "default_smtp_host")]
    pub smtp_host: String,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    #[serde(default)]
    pub smtp_secure: bool,
    pub smtp_user: Option<String>,
    pub smtp_pass: Option<String>,
    #[serde(default = "default_smtp_from_name")]
    pub smtp_from_name: String,
    #[serde(default = "default_smtp_from_email")]
    pub smtp_from_email: String,
    #[serde(default = "default_smtp_timeout_seconds")]
    pub smtp_timeout_seconds: u64,

    #[serde(default = "default_health_probe_timeout_seconds")]
    pub health_probe_timeout_seconds: u64,

    #[serde(default)]
    pub service_role: ServiceRole,
    #[serde(default = "default_app_env")]
    pub app_env: String,

    #[serde(default = "default_server_port")]
    pub server_port: u16,
}

impl Config {
    pub fn load() -> Result<Self, Error> {
        dotenv().ok();

        Self::from_vars(std::env::vars())
    }

    /// Builds the configuration from `NAME=value` pairs, as found in the
    /// process environment.
    pub fn from_vars<I>(vars: I) -> Result<Self, Error>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let config = envy::from_iter::<_, Self>(vars)
            .map_err(|e| anyhow!("Invalid or missing environmental variable: {}", e))?;

        config.validate()?;

        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.worker_concurrency == 0 {
            return Err(anyhow!("WORKER_CONCURRENCY must be at least 1"));
        }

        if self.reconnect_initial_delay_ms == 0 {
            return Err(anyhow!("RECONNECT_INITIAL_DELAY_MS must be at least 1"));
        }

        if self.reconnect_backoff_multiplier == 0 {
            return Err(anyhow!("RECONNECT_BACKOFF_MULTIPLIER must be at least 1"));
        }

        if self.reconnect_max_delay_ms < self.reconnect_initial_delay_ms {
            return Err(anyhow!(
                "RECONNECT_MAX_DELAY_MS must not be below RECONNECT_INITIAL_DELAY_MS"
            ));
        }

        Ok(())
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: 3,
            initial_delay_ms: 100,
            max_delay_ms: 1000,
            backoff_multiplier: 2,
        }
    }

    pub fn reconnect_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: u32::MAX,
            initial_delay_ms: self.reconnect_initial_delay_ms,
            max_delay_ms: self.reconnect_max_delay_ms,
            backoff_multiplier: self.reconnect_backoff_multiplier,
        }
    }

    pub fn broker_settings(&self) -> BrokerSettings {
        BrokerSettings {
            url: self.rabbitmq_url.clone(),
            dead_letter_queue: self.dead_letter_queue.clone(),
            prefetch_count: self.prefetch_count,
            worker_concurrency: self.worker_concurrency,
            max_redeliveries: self.max_redeliveries,
            heartbeat_seconds: self.heartbeat_seconds,
            reconnect: self.reconnect_config(),
            requeue_backoff: RetryConfig {
                max_attempts: self.max_redeliveries,
                initial_delay_ms: 1000,
                max_delay_ms: 30_000,
                backoff_multiplier: 2,
            },
            publish_timeout: Duration::from_secs(self.publish_timeout_seconds),
            shutdown_grace: Duration::from_secs(self.shutdown_grace_seconds),
        }
    }

    pub fn smtp_settings(&self) -> SmtpSettings {
        SmtpSettings {
            host: self.smtp_host.clone(),
            port: self.smtp_port,
            secure: self.smtp_secure,
            username: self.smtp_user.clone().unwrap_or_default(),
            password: self.smtp_pass.clone().unwrap_or_default(),
            from_name: self.smtp_from_name.clone(),
            from_email: self.smtp_from_email.clone(),
            timeout: Duration::from_secs(self.smtp_timeout_seconds),
        }
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.health_probe_timeout_seconds)
    }
}

fn default_rabbitmq_url() -> String {
    "amqp://localhost:5672".to_string()
}

fn default_notification_queue() -> String {
    "email_notifications".to_string()
}

fn default_dead_letter_queue() -> String {
    "email_notifications.failed".to_string()
}

fn default_prefetch_count() -> u16 {
    10
}

fn default_worker_concurrency() -> usize {
    5
}

fn default_max_redeliveries() -> u32 {
    5
}

fn default_heartbeat_seconds() -> u16 {
    60
}

fn default_reconnect_initial_delay_ms() -> u64 {
    5000
}

fn default_reconnect_max_delay_ms() -> u64 {
    60_000
}

fn default_reconnect_backoff_multiplier() -> u64 {
    2
}

fn default_publish_timeout_seconds() -> u64 {
    10
}

fn default_shutdown_grace_seconds() -> u64 {
    30
}

fn default_idempotency_ttl_seconds() -> u64 {
    86_400
}

fn default_smtp_host() -> String {
    "smtp.gmail.com".to_string()
}

fn default_smtp_port() -> u16 {
    587
}

fn default_smtp_from_name() -> String {
    "User Management System".to_string()
}

fn default_smtp_from_email() -> String {
    "noreply@yourcompany.com".to_string()
}

fn default_smtp_timeout_seconds() -> u64 {
    10
}

fn default_health_probe_timeout_seconds() -> u64 {
    5
}

fn default_app_env() -> String {
    "development".to_string()
}

fn default_server_port() -> u16 {
    3000
}
