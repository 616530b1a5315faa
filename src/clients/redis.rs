use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use redis::{AsyncCommands, Client, aio::MultiplexedConnection};
use tracing::{info, warn};

use crate::{
    clients::ledger::DeliveryLedger,
    models::{retry::RetryConfig, status::IdempotencyStatus},
    utils::retry_with_backoff,
};

pub struct RedisLedger {
    connection: MultiplexedConnection,
    idempotency_ttl_seconds: u64,
    retry_config: RetryConfig,
}

impl RedisLedger {
    pub async fn connect(
        redis_url: &str,
        idempotency_ttl_seconds: u64,
        retry_config: RetryConfig,
    ) -> Result<Self, Error> {
        info!("Connecting to Redis");

        let client =
            Client::open(redis_url).map_err(|e| anyhow!("Failed to create redis client: {}", e))?;

        let connection = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| anyhow!("Failed to connect to redis: {}", e))?;

        info!("Redis connection established");

        Ok(Self {
            connection,
            idempotency_ttl_seconds,
            retry_config,
        })
    }

    fn key(idempotency_key: &str) -> String {
        format!("notification:sent:{}", idempotency_key)
    }
}

#[async_trait]
impl DeliveryLedger for RedisLedger {
    async fn check(&self, idempotency_key: &str) -> Result<IdempotencyStatus> {
        let key = Self::key(idempotency_key);
        let mut conn = self.connection.clone();

        let value: Option<String> = conn
            .get(&key)
            .await
            .map_err(|e| anyhow!("Failed to read idempotency key: {}", e))?;

        match value.as_deref() {
            None => Ok(IdempotencyStatus::NotFound),
            Some("sent") => Ok(IdempotencyStatus::Sent),
            Some(other) => {
                warn!(key = %key, value = other, "Unknown idempotency value, treating as not sent");
                Ok(IdempotencyStatus::NotFound)
            }
        }
    }

    async fn mark_sent(&self, idempotency_key: &str) -> Result<()> {
        let key = Self::key(idempotency_key);

        retry_with_backoff(&self.retry_config, || {
            let key = key.clone();
            let mut conn = self.connection.clone();
            let ttl = self.idempotency_ttl_seconds;

            async move {
                conn.set_ex::<_, _, ()>(&key, "sent", ttl)
                    .await
                    .map_err(|e| e.to_string())
            }
        })
        .await
        .map_err(|e| anyhow!("mark_sent failed: {}", e))?;

        Ok(())
    }
}
