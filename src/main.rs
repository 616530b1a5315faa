use std::{sync::Arc, time::Duration};

use anyhow::{Error, Result};
use notification_service::{
    api::{AppState, run_api_server},
    clients::{
        broker::BrokerConnection,
        database::{InMemoryUserStore, PgUserStore, UserStore},
        health::HealthAggregator,
        ledger::{DeliveryLedger, InMemoryLedger},
        mail::{MailDispatcher, SmtpMailDispatcher},
        redis::RedisLedger,
    },
    config::Config,
    services::{consumer::NotificationConsumer, producer::NotificationProducer, users::UserService},
    utils::init_tracing,
};
use tokio::sync::watch;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), Error> {
    let config = Config::load()?;
    init_tracing();

    info!(role = %config.service_role, environment = %config.app_env, "Configuration loaded");

    let broker = Arc::new(BrokerConnection::new(config.broker_settings()));
    broker.start().await;

    let mut health = HealthAggregator::new(
        config.service_role,
        config.app_env.clone(),
        config.probe_timeout(),
    )
    .with_broker(Arc::clone(&broker));

    let mut users = None;

    if config.service_role.owns_records() {
        let store = build_store(&config).await?;
        let producer = Arc::new(NotificationProducer::new(
            Arc::clone(&broker),
            config.notification_queue.clone(),
        ));

        health = health
            .with_store(Arc::clone(&store))
            .with_publish_stats(producer.stats());
        users = Some(UserService::new(store, producer));
    }

    if config.service_role.sends_mail() {
        let dispatcher: Arc<dyn MailDispatcher> =
            Arc::new(SmtpMailDispatcher::new(config.smtp_settings())?);
        let ledger = build_ledger(&config).await;

        let consumer = NotificationConsumer::new(Arc::clone(&dispatcher)).with_ledger(ledger);
        broker
            .subscribe(&config.notification_queue, Arc::new(consumer))
            .await?;

        health = health.with_mail(dispatcher);
    }

    let state = Arc::new(AppState { health, users });

    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    run_api_server(state, config.server_port, async move {
        let _ = shutdown_rx.changed().await;
    })
    .await?;

    broker.stop().await;
    info!("Shutdown complete");

    Ok(())
}

async fn build_store(config: &Config) -> Result<Arc<dyn UserStore>> {
    match &config.database_url {
        Some(url) => Ok(Arc::new(PgUserStore::connect(url).await?)),
        None => {
            warn!("DATABASE_URL not set, keeping user records in memory");
            Ok(Arc::new(InMemoryUserStore::new()))
        }
    }
}

async fn build_ledger(config: &Config) -> Arc<dyn DeliveryLedger> {
    let ttl = Duration::from_secs(config.idempotency_ttl_seconds);

    if let Some(url) = &config.redis_url {
        match RedisLedger::connect(url, config.idempotency_ttl_seconds, config.retry_config()).await {
            Ok(ledger) => return Arc::new(ledger),
            Err(e) => warn!(error = %e, "Redis unavailable, using process-local delivery ledger"),
        }
    }

    Arc::new(InMemoryLedger::new(ttl))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
