use std::{
    collections::HashSet,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use futures_util::StreamExt;
use lapin::{
    BasicProperties, Channel, Connection, ConnectionProperties, Consumer,
    acker::Acker,
    message::Delivery,
    options::{
        BasicAckOptions, BasicConsumeOptions, BasicPublishOptions, BasicQosOptions,
        BasicRejectOptions, ConfirmSelectOptions, QueueDeclareOptions,
    },
    types::{AMQPValue, FieldTable},
};
use serde::Serialize;
use thiserror::Error;
use tokio::{
    sync::{Mutex, Notify, RwLock, watch},
    task::JoinHandle,
    time::{sleep, timeout},
};
use tracing::{debug, error, info, warn};

use crate::{
    clients::{
        settlement::{Acknowledger, Received, Republisher, SettlementPolicy},
        worker::WorkerPool,
    },
    models::{connection::ConnectionState, settings::BrokerSettings, status::Outcome},
    utils::backoff_delay,
};

pub const REDELIVERY_HEADER: &str = "x-redelivery-count";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);
const LINK_POLL_INTERVAL: Duration = Duration::from_secs(1);
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("broker is not connected")]
    NotConnected,

    #[error("broker connection is shut down")]
    Closed,

    #[error("broker operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("failed to serialize message: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("amqp error: {0}")]
    Amqp(#[from] lapin::Error),

    #[error("broker negatively acknowledged the message")]
    Nacked,
}

/// Invoked once per delivered message on the broker's dispatch loop.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, payload: &[u8]) -> Outcome;
}

struct Subscription {
    queue: String,
    handler: Arc<dyn MessageHandler>,
}

struct Link {
    connection: Connection,
    publisher: Channel,
    declared: Mutex<HashSet<String>>,
}

impl Link {
    async fn ensure_queue(&self, queue: &str) -> Result<(), BrokerError> {
        let mut declared = self.declared.lock().await;

        if !declared.contains(queue) {
            declare_durable(&self.publisher, queue).await?;
            declared.insert(queue.to_string());
        }

        Ok(())
    }
}

enum LinkEnd {
    Lost,
    Shutdown,
}

/// The process-wide AMQP connection shared by the producer and the consumer.
///
/// Nothing happens until [`BrokerConnection::start`]; before that, and
/// whenever the link is down, `publish` fails fast with
/// [`BrokerError::NotConnected`]. A supervisor task owns the reconnect loop
/// and re-attaches every registered subscription after each reconnect.
pub struct BrokerConnection {
    settings: BrokerSettings,
    state: watch::Sender<ConnectionState>,
    link: RwLock<Option<Link>>,
    subscriptions: Mutex<Vec<Arc<Subscription>>>,
    workers: WorkerPool,
    policy: SettlementPolicy,
    link_lost: Notify,
    needs_reconnect: AtomicBool,
    shutdown: watch::Sender<bool>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

impl BrokerConnection {
    pub fn new(settings: BrokerSettings) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (shutdown, _) = watch::channel(false);
        let workers = WorkerPool::new(settings.worker_concurrency);
        let policy = SettlementPolicy::from(&settings);

        Self {
            settings,
            state,
            link: RwLock::new(None),
            subscriptions: Mutex::new(Vec::new()),
            workers,
            policy,
            link_lost: Notify::new(),
            needs_reconnect: AtomicBool::new(false),
            shutdown,
            supervisor: Mutex::new(None),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Spawns the supervisor. Calling it twice is a no-op.
    pub async fn start(self: &Arc<Self>) {
        let mut supervisor = self.supervisor.lock().await;

        if supervisor.is_some() || *self.shutdown.borrow() {
            return;
        }

        info!(url = %redact_url(&self.settings.url), "Starting broker connection");

        let broker = Arc::clone(self);
        *supervisor = Some(tokio::spawn(async move { broker.supervise().await }));
    }

    /// Stops consuming, waits up to the grace period for in-flight handlers,
    /// then closes the connection. Unsettled deliveries go back to the broker.
    pub async fn stop(&self) {
        if self.shutdown.send_replace(true) {
            return;
        }

        info!("Stopping broker connection");

        if self.workers.drain(self.settings.shutdown_grace).await {
            debug!("No deliveries in flight");
        } else {
            warn!(
                grace_seconds = self.settings.shutdown_grace.as_secs(),
                "Shutdown grace period elapsed with deliveries still in flight"
            );
        }
        self.workers.close();

        if let Some(mut handle) = self.supervisor.lock().await.take() {
            if timeout(self.settings.shutdown_grace, &mut handle).await.is_err() {
                warn!("Broker supervisor did not exit in time, aborting it");
                handle.abort();
            }
        }

        let link = self.link.write().await.take();

        if let Some(link) = link {
            match timeout(CLOSE_TIMEOUT, link.connection.close(200, "shutdown".into())).await {
                Ok(Ok(_)) => info!("RabbitMQ connection closed"),
                Ok(Err(e)) => warn!(error = %e, "Error closing RabbitMQ connection"),
                Err(_) => warn!("Timed out closing RabbitMQ connection"),
            }
        }

        self.set_state(ConnectionState::Disconnected);
    }

    /// Registers `handler` for `queue`. The consumer is attached now if the
    /// link is up, and again after every reconnect.
    pub async fn subscribe(
        self: &Arc<Self>,
        queue: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<(), BrokerError> {
        if *self.shutdown.borrow() {
            return Err(BrokerError::Closed);
        }

        let subscription = Arc::new(Subscription {
            queue: queue.to_string(),
            handler,
        });

        self.subscriptions.lock().await.push(Arc::clone(&subscription));

        info!(queue, "Subscription registered");

        if self.state().is_up() {
            self.attach_consumer(subscription).await;
        }

        Ok(())
    }

    /// Publishes `message` as persistent JSON to a durable queue.
    ///
    /// Never retries: the caller sees the first failure, bounded by the
    /// publish timeout.
    pub async fn publish<T: Serialize>(&self, queue: &str, message: &T) -> Result<(), BrokerError> {
        let payload = serde_json::to_vec(message)?;
        self.publish_raw(queue, &payload, FieldTable::default()).await
    }

    async fn publish_raw(
        &self,
        queue: &str,
        payload: &[u8],
        headers: FieldTable,
    ) -> Result<(), BrokerError> {
        let result = {
            let guard = self.link.read().await;
            let link = guard.as_ref().ok_or(BrokerError::NotConnected)?;

            let properties = BasicProperties::default()
                .with_delivery_mode(2)
                .with_content_type("application/json".into())
                .with_headers(headers);

            let attempt = async {
                link.ensure_queue(queue).await?;

                let confirmation = link
                    .publisher
                    .basic_publish(
                        "",
                        queue,
                        BasicPublishOptions::default(),
                        payload,
                        properties,
                    )
                    .await?
                    .await?;

                if confirmation.is_nack() {
                    return Err(BrokerError::Nacked);
                }

                Ok(())
            };

            match timeout(self.settings.publish_timeout, attempt).await {
                Ok(result) => result,
                Err(_) => Err(BrokerError::Timeout(self.settings.publish_timeout)),
            }
        };

        match &result {
            Ok(()) => self.record_success(),
            Err(e) => self.record_failure(e).await,
        }

        result
    }

    async fn supervise(self: Arc<Self>) {
        let mut shutdown = self.shutdown.subscribe();
        let mut attempt: u32 = 0;

        loop {
            if *shutdown.borrow() {
                break;
            }

            self.set_state(ConnectionState::Connecting);

            match self.establish().await {
                Ok(link) => {
                    attempt = 0;
                    self.needs_reconnect.store(false, Ordering::SeqCst);
                    *self.link.write().await = Some(link);
                    self.set_state(ConnectionState::Connected);

                    info!("RabbitMQ connection established");

                    let subscriptions = self.subscriptions.lock().await.clone();
                    for subscription in subscriptions {
                        self.attach_consumer(subscription).await;
                    }

                    if let LinkEnd::Shutdown = self.watch_link(&mut shutdown).await {
                        break;
                    }

                    if let Some(link) = self.link.write().await.take() {
                        let _ = timeout(
                            LINK_POLL_INTERVAL,
                            link.connection.close(320, "reconnecting".into()),
                        )
                        .await;
                    }

                    self.set_state(ConnectionState::Disconnected);
                    warn!("RabbitMQ connection lost");
                }
                Err(e) => {
                    self.set_state(ConnectionState::Disconnected);
                    warn!(error = %e, attempt = attempt + 1, "Failed to connect to RabbitMQ");
                }
            }

            attempt = attempt.saturating_add(1);
            let delay = backoff_delay(&self.settings.reconnect, attempt);

            debug!(delay_ms = delay.as_millis() as u64, "Scheduling RabbitMQ reconnect");

            tokio::select! {
                _ = sleep(delay) => {}
                _ = shutdown.changed() => break,
            }
        }

        debug!("Broker supervisor exited");
    }

    async fn establish(&self) -> Result<Link, BrokerError> {
        let url = with_heartbeat(&self.settings.url, self.settings.heartbeat_seconds);

        let connection = timeout(
            CONNECT_TIMEOUT,
            Connection::connect(&url, ConnectionProperties::default()),
        )
        .await
        .map_err(|_| BrokerError::Timeout(CONNECT_TIMEOUT))??;

        let publisher = connection.create_channel().await?;

        publisher
            .confirm_select(ConfirmSelectOptions::default())
            .await?;

        declare_durable(&publisher, &self.settings.dead_letter_queue).await?;

        Ok(Link {
            connection,
            publisher,
            declared: Mutex::new(HashSet::from([self.settings.dead_letter_queue.clone()])),
        })
    }

    async fn watch_link(&self, shutdown: &mut watch::Receiver<bool>) -> LinkEnd {
        loop {
            tokio::select! {
                _ = self.link_lost.notified() => {}
                _ = sleep(LINK_POLL_INTERVAL) => {}
                _ = shutdown.changed() => return LinkEnd::Shutdown,
            }

            if *shutdown.borrow() {
                return LinkEnd::Shutdown;
            }

            let connected = self
                .link
                .read()
                .await
                .as_ref()
                .is_some_and(|link| link.connection.status().connected());

            if !connected || self.needs_reconnect.load(Ordering::SeqCst) {
                return LinkEnd::Lost;
            }
        }
    }

    async fn attach_consumer(self: &Arc<Self>, subscription: Arc<Subscription>) {
        let consumer = {
            let guard = self.link.read().await;
            let Some(link) = guard.as_ref() else {
                return;
            };

            self.open_consumer(link, &subscription.queue).await
        };

        match consumer {
            Ok(consumer) => {
                info!(queue = %subscription.queue, "Consumer created for queue");

                let broker = Arc::clone(self);
                tokio::spawn(async move { broker.consume(consumer, subscription).await });
            }
            Err(e) => {
                error!(queue = %subscription.queue, error = %e, "Failed to create consumer");
                self.request_reconnect();
            }
        }
    }

    async fn open_consumer(&self, link: &Link, queue: &str) -> Result<Consumer, BrokerError> {
        let channel = link.connection.create_channel().await?;

        channel
            .basic_qos(self.settings.prefetch_count, BasicQosOptions::default())
            .await?;

        declare_durable(&channel, queue).await?;

        let consumer = channel
            .basic_consume(
                queue,
                &format!("{}-worker", queue),
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;

        Ok(consumer)
    }

    async fn consume(self: Arc<Self>, mut consumer: Consumer, subscription: Arc<Subscription>) {
        let mut shutdown = self.shutdown.subscribe();

        loop {
            if *shutdown.borrow() {
                break;
            }

            let next = tokio::select! {
                next = consumer.next() => next,
                _ = shutdown.changed() => break,
            };

            match next {
                Some(Ok(delivery)) => {
                    let broker = Arc::clone(&self);
                    let subscription = Arc::clone(&subscription);

                    let spawned = self
                        .workers
                        .spawn(async move { broker.dispatch(delivery, &subscription).await })
                        .await;

                    if spawned.is_none() {
                        break;
                    }
                }
                Some(Err(e)) => {
                    warn!(queue = %subscription.queue, error = %e, "Consumer delivery error");
                    self.set_degraded();
                }
                None => {
                    if !*shutdown.borrow() {
                        warn!(queue = %subscription.queue, "Consumer stream ended");
                        self.request_reconnect();
                    }
                    break;
                }
            }
        }

        debug!(queue = %subscription.queue, "Consumer loop exited");
    }

    async fn dispatch(&self, delivery: Delivery, subscription: &Subscription) {
        let headers = delivery.properties.headers().as_ref();
        let redeliveries = redelivery_count(headers);
        let outcome = subscription.handler.handle(&delivery.data).await;
        let settlement = self.policy.decide(outcome, redeliveries);

        debug!(
            queue = %subscription.queue,
            delivery_tag = delivery.delivery_tag,
            redeliveries,
            outcome = %outcome,
            settlement = ?settlement,
            "Handler finished"
        );

        let message = Received {
            queue: &subscription.queue,
            payload: &delivery.data,
            headers,
            redeliveries,
        };

        match self
            .policy
            .apply(settlement, &message, &delivery.acker, self)
            .await
        {
            Ok(()) => self.record_success(),
            Err(e) => {
                error!(
                    queue = %subscription.queue,
                    delivery_tag = delivery.delivery_tag,
                    error = %e,
                    "Failed to settle delivery"
                );
                self.record_failure(&e).await;
            }
        }
    }

    fn set_state(&self, next: ConnectionState) {
        self.state.send_if_modified(|current| {
            if *current == next {
                return false;
            }

            debug!(from = %current, to = %next, "Broker state transition");
            *current = next;
            true
        });
    }

    fn set_degraded(&self) {
        self.state.send_if_modified(|current| {
            if *current != ConnectionState::Connected {
                return false;
            }

            warn!("Broker connection degraded");
            *current = ConnectionState::Degraded;
            true
        });
    }

    fn record_success(&self) {
        self.state.send_if_modified(|current| {
            if *current != ConnectionState::Degraded {
                return false;
            }

            info!("Broker connection recovered");
            *current = ConnectionState::Connected;
            true
        });
    }

    async fn record_failure(&self, error: &BrokerError) {
        if matches!(error, BrokerError::NotConnected | BrokerError::Closed) {
            return;
        }

        let socket_open = self
            .link
            .read()
            .await
            .as_ref()
            .is_some_and(|link| link.connection.status().connected());

        if socket_open {
            self.set_degraded();
        } else {
            self.request_reconnect();
        }
    }

    fn request_reconnect(&self) {
        self.needs_reconnect.store(true, Ordering::SeqCst);
        self.link_lost.notify_one();
    }
}

#[async_trait]
impl Republisher for BrokerConnection {
    async fn republish(
        &self,
        queue: &str,
        payload: &[u8],
        headers: FieldTable,
    ) -> Result<(), BrokerError> {
        self.publish_raw(queue, payload, headers).await
    }
}

#[async_trait]
impl Acknowledger for Acker {
    async fn ack(&self) -> Result<(), BrokerError> {
        Acker::ack(self, BasicAckOptions::default())
            .await
            .map(|_| ())
            .map_err(BrokerError::from)
    }

    async fn reject(&self, requeue: bool) -> Result<(), BrokerError> {
        Acker::reject(self, BasicRejectOptions { requeue })
            .await
            .map(|_| ())
            .map_err(BrokerError::from)
    }
}

async fn declare_durable(channel: &Channel, queue: &str) -> Result<(), lapin::Error> {
    channel
        .queue_declare(
            queue,
            QueueDeclareOptions {
                durable: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await?;

    Ok(())
}

/// Reads the republish counter written by [`BrokerConnection`]; absent or
/// unreadable headers count as zero.
pub fn redelivery_count(headers: Option<&FieldTable>) -> u32 {
    let Some(headers) = headers else {
        return 0;
    };

    headers
        .inner()
        .iter()
        .find(|(key, _)| key.as_str() == REDELIVERY_HEADER)
        .and_then(|(_, value)| match value {
            AMQPValue::LongUInt(n) => Some(*n),
            AMQPValue::ShortUInt(n) => Some(u32::from(*n)),
            AMQPValue::LongInt(n) => u32::try_from(*n).ok(),
            AMQPValue::LongLongInt(n) => u32::try_from(*n).ok(),
            _ => None,
        })
        .unwrap_or(0)
}

/// Appends `heartbeat=<seconds>` unless the URL already sets one.
pub fn with_heartbeat(url: &str, seconds: u16) -> String {
    if url.contains("heartbeat=") {
        return url.to_string();
    }

    let separator = if url.contains('?') { '&' } else { '?' };
    format!("{}{}heartbeat={}", url, separator, seconds)
}

fn redact_url(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end => {
            format!("{}://***{}", &url[..scheme_end], &url[at..])
        }
        _ => url.to_string(),
    }
}
