use tokio::time::{Duration, sleep};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use crate::models::retry::RetryConfig;

pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .json()
        .with_env_filter(filter)
        .with_current_span(false)
        .init();
}

/// Delay before retry number `attempt` (1-based), capped at `max_delay_ms`
/// and jittered by ±10%.
pub fn backoff_delay(config: &RetryConfig, attempt: u32) -> Duration {
    let mut delay_ms = config.initial_delay_ms;

    for _ in 1..attempt {
        delay_ms = delay_ms.saturating_mul(config.backoff_multiplier);
        if delay_ms >= config.max_delay_ms {
            delay_ms = config.max_delay_ms;
            break;
        }
    }

    let delay_ms = delay_ms.min(config.max_delay_ms);
    let jitter = rand::random_range(-0.1..=0.1);

    Duration::from_millis((delay_ms as f64 * (1.0 + jitter)) as u64)
}

pub async fn retry_with_backoff<F, Fut, T, E>(config: &RetryConfig, operation: F) -> Result<T, E>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 0;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    info!(
                        attempt,
                        max_attempts = config.max_attempts,
                        "Retry succeeded"
                    );
                }
                return Ok(result);
            }
            Err(e) => {
                if attempt >= config.max_attempts {
                    warn!(
                        max_attempts = config.max_attempts,
                        error = %e,
                        "Retry failed after exhausting all attempts"
                    );
                    return Err(e);
                }

                let delay = backoff_delay(config, attempt);

                debug!(
                    attempt,
                    max_attempts = config.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    "Retry attempt failed, backing off"
                );

                sleep(delay).await;
            }
        }
    }
}
