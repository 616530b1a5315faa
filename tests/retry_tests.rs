use anyhow::{Result, anyhow};
use notification_service::{
    config::Config,
    models::retry::RetryConfig,
    utils::{backoff_delay, retry_with_backoff},
};
use std::{
    collections::HashSet,
    sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    },
    time::Duration,
};
use tokio::time::Instant;

fn config(vars: &[(&str, &str)]) -> Result<Config> {
    Config::from_vars(
        vars.iter()
            .map(|(name, value)| (name.to_string(), value.to_string())),
    )
}

fn assert_within_jitter(delay: Duration, base_ms: u64) {
    let delay = delay.as_millis() as u64;
    assert!(
        delay + 1 >= base_ms * 9 / 10 && delay <= base_ms * 11 / 10,
        "delay {}ms outside jitter window around {}ms",
        delay,
        base_ms
    );
}

/// Test: The default reconnect timer backs off exponentially up to its cap
#[test]
fn test_default_reconnect_policy() -> Result<()> {
    let reconnect = config(&[])?.reconnect_config();

    assert_eq!(reconnect.max_attempts, u32::MAX);
    assert_within_jitter(backoff_delay(&reconnect, 1), 5_000);
    assert_within_jitter(backoff_delay(&reconnect, 2), 10_000);
    assert_within_jitter(backoff_delay(&reconnect, 4), 40_000);
    assert_within_jitter(backoff_delay(&reconnect, 5), 60_000);
    assert_within_jitter(backoff_delay(&reconnect, 1_000), 60_000);

    Ok(())
}

/// Test: A reconnect multiplier of 1 gives a fixed interval
#[test]
fn test_fixed_reconnect_interval() -> Result<()> {
    let reconnect = config(&[
        ("RECONNECT_INITIAL_DELAY_MS", "2000"),
        ("RECONNECT_BACKOFF_MULTIPLIER", "1"),
    ])?
    .reconnect_config();

    for attempt in 1..=20 {
        assert_within_jitter(backoff_delay(&reconnect, attempt), 2_000);
    }

    Ok(())
}

/// Test: Requeue delays start at one second and stop growing at thirty
#[test]
fn test_requeue_backoff_bounds() -> Result<()> {
    let requeue = config(&[])?.broker_settings().requeue_backoff;

    assert_within_jitter(backoff_delay(&requeue, 1), 1_000);
    assert_within_jitter(backoff_delay(&requeue, 3), 4_000);
    assert_within_jitter(backoff_delay(&requeue, 5), 16_000);
    assert_within_jitter(backoff_delay(&requeue, 6), 30_000);
    assert_within_jitter(backoff_delay(&requeue, u32::MAX), 30_000);

    Ok(())
}

/// Test: Jitter spreads requeue delays so redeliveries do not line up
#[test]
fn test_requeue_backoff_is_jittered() -> Result<()> {
    let requeue = config(&[])?.broker_settings().requeue_backoff;

    let distinct: HashSet<u128> = (0..50)
        .map(|_| backoff_delay(&requeue, 1).as_millis())
        .collect();

    assert!(distinct.len() > 1, "all 50 delays were identical");

    Ok(())
}

/// Test: Ledger writes retry transient failures under the configured policy
#[tokio::test]
async fn test_ledger_write_policy_recovers() -> Result<()> {
    let policy = config(&[])?.retry_config();
    let attempts = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&attempts);

    let started = Instant::now();
    retry_with_backoff(&policy, || {
        let counter = Arc::clone(&counter);
        async move {
            if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(anyhow!("redis connection reset"))
            } else {
                Ok(())
            }
        }
    })
    .await?;

    assert_eq!(attempts.load(Ordering::SeqCst), policy.max_attempts);
    assert!(started.elapsed() >= Duration::from_millis(270));

    Ok(())
}

/// Test: Ledger writes give up after the configured number of attempts
#[tokio::test]
async fn test_ledger_write_policy_gives_up() -> Result<()> {
    let policy = config(&[])?.retry_config();
    let attempts = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&attempts);

    let result = retry_with_backoff(&policy, || {
        let counter = Arc::clone(&counter);
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(anyhow!("redis unavailable"))
        }
    })
    .await;

    assert!(result.is_err());
    assert_eq!(attempts.load(Ordering::SeqCst), 3);

    Ok(())
}

/// Test: Computed delays grow, stay within jitter bounds, and respect the cap
#[test]
fn test_backoff_delay_bounds() {
    let config = RetryConfig {
        max_attempts: 10,
        initial_delay_ms: 1000,
        max_delay_ms: 30000,
        backoff_multiplier: 2,
    };

    for (attempt, base_ms) in [(1, 1000u64), (2, 2000), (3, 4000), (5, 16000), (6, 30000), (40, 30000)] {
        let delay = backoff_delay(&config, attempt).as_millis() as u64;
        assert!(
            delay + 1 >= base_ms * 9 / 10 && delay <= base_ms * 11 / 10,
            "attempt {} delay {}ms outside jitter window around {}ms",
            attempt,
            delay,
            base_ms
        );
    }
}

/// Test: The retry helper runs outside the tokio test macro
#[test]
fn test_retry_from_blocking_context() {
    let config = RetryConfig {
        max_attempts: 3,
        initial_delay_ms: 10,
        max_delay_ms: 50,
        backoff_multiplier: 2,
    };
    let attempt_count = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&attempt_count);

    let result = tokio_test::block_on(retry_with_backoff(&config, || {
        let counter = Arc::clone(&counter);
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(anyhow!("unreachable"))
        }
    }));

    assert!(result.is_err());
    assert_eq!(attempt_count.load(Ordering::SeqCst), 3);
}
