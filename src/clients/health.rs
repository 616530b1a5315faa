use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};

use chrono::Utc;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::{
    clients::{broker::BrokerConnection, database::UserStore, mail::MailDispatcher},
    models::{
        connection::ConnectionState,
        health::{
            DatabaseStatus, DependencyInfo, HealthCheckResponse, HealthSnapshot, HealthStatus, LivenessResponse,
            MailStatus, ReadinessResponse, ServiceHealth,
        },
        role::ServiceRole,
    },
    services::producer::PublishStats,
};

struct DatabaseProbe {
    status: DatabaseStatus,
    response_time_ms: u64,
    error: Option<String>,
}

/// Answers the health, readiness and liveness probes.
///
/// Every call probes its dependencies again; nothing is cached. The database
/// is critical (down means `unhealthy`); broker and mail outages only degrade
/// the composite status.
pub struct HealthAggregator {
    role: ServiceRole,
    broker: Option<Arc<BrokerConnection>>,
    store: Option<Arc<dyn UserStore>>,
    mail: Option<Arc<dyn MailDispatcher>>,
    publish_stats: Option<Arc<PublishStats>>,
    probe_timeout: Duration,
    environment: String,
    started_at: Instant,
}

impl HealthAggregator {
    pub fn new(role: ServiceRole, environment: impl Into<String>, probe_timeout: Duration) -> Self {
        Self {
            role,
            broker: None,
            store: None,
            mail: None,
            publish_stats: None,
            probe_timeout,
            environment: environment.into(),
            started_at: Instant::now(),
        }
    }

    pub fn with_broker(mut self, broker: Arc<BrokerConnection>) -> Self {
        self.broker = Some(broker);
        self
    }

    pub fn with_store(mut self, store: Arc<dyn UserStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_mail(mut self, mail: Arc<dyn MailDispatcher>) -> Self {
        self.mail = Some(mail);
        self
    }

    pub fn with_publish_stats(mut self, stats: Arc<PublishStats>) -> Self {
        self.publish_stats = Some(stats);
        self
    }

    pub async fn snapshot(&self) -> HealthSnapshot {
        let (database, mail) = tokio::join!(self.check_database(), self.check_mail());
        self.compose(database.map(|probe| probe.status), mail)
    }

    pub async fn check(&self) -> HealthCheckResponse {
        let (database, mail) = tokio::join!(self.check_database(), self.check_mail());

        let snapshot = self.compose(database.as_ref().map(|probe| probe.status), mail);
        let mut checks = HashMap::new();

        if let Some(probe) = database {
            let health = match probe.status {
                DatabaseStatus::Reachable => ServiceHealth::healthy(probe.response_time_ms),
                DatabaseStatus::Unreachable => {
                    ServiceHealth::unhealthy(probe.error.unwrap_or_default())
                }
            };
            checks.insert("database".to_string(), health.with_state(status_label(probe.status)));
        }

        if let Some(state) = snapshot.broker {
            let health = if state == ConnectionState::Connected {
                ServiceHealth::healthy(0)
            } else {
                ServiceHealth::degraded(format!("Broker connection is {}", state))
            };
            checks.insert("message_broker".to_string(), health.with_state(state.as_str()));
        }

        if let (Some(status), Some(mail)) = (snapshot.mail, &self.mail) {
            let health = match status {
                MailStatus::Verified => ServiceHealth::healthy(0).with_state("connected"),
                MailStatus::Unverified => ServiceHealth::degraded(
                    "SMTP connection verification failed".to_string(),
                )
                .with_state("disconnected"),
            };
            checks.insert("mail".to_string(), health.with_details(mail.describe()));
        }

        match snapshot.composite {
            HealthStatus::Healthy => debug!("Health check passed"),
            status => warn!(status = ?status, "Health check reports a problem"),
        }

        HealthCheckResponse {
            status: snapshot.composite,
            timestamp: Utc::now(),
            uptime: self.started_at.elapsed().as_secs_f64(),
            environment: self.environment.clone(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            checks,
            notifications: self.publish_stats.as_ref().map(|stats| stats.snapshot()),
        }
    }

    /// Ready when every dependency needed to accept new work is up: the
    /// database for record-owning roles, the broker and mail transport for
    /// mail-sending roles.
    pub async fn ready(&self) -> ReadinessResponse {
        let snapshot = self.snapshot().await;
        let mut unavailable = Vec::new();

        if self.role.owns_records() && snapshot.database == Some(DatabaseStatus::Unreachable) {
            unavailable.push("database".to_string());
        }

        if self.role.sends_mail() {
            if snapshot.broker.is_some_and(|state| !state.is_up()) {
                unavailable.push("message_broker".to_string());
            }

            if snapshot.mail == Some(MailStatus::Unverified) {
                unavailable.push("mail".to_string());
            }
        }

        let status = if unavailable.is_empty() {
            info!("Readiness check passed");
            "ready"
        } else {
            warn!(unavailable = ?unavailable, "Readiness check failed");
            "not ready"
        };

        ReadinessResponse {
            status: status.to_string(),
            timestamp: Utc::now(),
            unavailable,
        }
    }

    /// Database connection details, or `None` when this role has no store.
    pub async fn database_info(&self) -> Option<DependencyInfo> {
        let store = self.store.as_ref()?;
        let probe = self.check_database().await?;

        Some(DependencyInfo::new(
            probe.status == DatabaseStatus::Reachable,
            store.describe(),
            probe.error,
        ))
    }

    /// Mail transport details, or `None` when this role sends no mail.
    pub async fn email_service_info(&self) -> Option<DependencyInfo> {
        let mail = self.mail.as_ref()?;
        let verified = self.check_mail().await? == MailStatus::Verified;

        let error = (!verified).then(|| "SMTP connection verification failed".to_string());

        Some(DependencyInfo::new(verified, mail.describe(), error))
    }

    pub fn live(&self) -> LivenessResponse {
        LivenessResponse {
            status: "alive".to_string(),
            timestamp: Utc::now(),
        }
    }

    fn compose(
        &self,
        database: Option<DatabaseStatus>,
        mail: Option<MailStatus>,
    ) -> HealthSnapshot {
        let broker = self.broker.as_ref().map(|broker| broker.state());

        let critical_down = database == Some(DatabaseStatus::Unreachable);
        let degraded = broker.is_some_and(|state| state != ConnectionState::Connected)
            || mail == Some(MailStatus::Unverified);

        let composite = if critical_down {
            HealthStatus::Unhealthy
        } else if degraded {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };

        HealthSnapshot {
            broker,
            database,
            mail,
            composite,
        }
    }

    async fn check_database(&self) -> Option<DatabaseProbe> {
        let store = self.store.as_ref()?;
        let start = Instant::now();

        let (status, error) = match timeout(self.probe_timeout, store.ping()).await {
            Ok(Ok(())) => (DatabaseStatus::Reachable, None),
            Ok(Err(e)) => {
                warn!(error = %e, "Database health check failed");
                (DatabaseStatus::Unreachable, Some(e.to_string()))
            }
            Err(_) => {
                warn!("Database health check timed out");
                (
                    DatabaseStatus::Unreachable,
                    Some(format!("Timed out after {:?}", self.probe_timeout)),
                )
            }
        };

        Some(DatabaseProbe {
            status,
            response_time_ms: start.elapsed().as_millis() as u64,
            error,
        })
    }

    async fn check_mail(&self) -> Option<MailStatus> {
        let mail = self.mail.as_ref()?;

        let verified = timeout(self.probe_timeout, mail.verify())
            .await
            .unwrap_or(false);

        Some(if verified {
            MailStatus::Verified
        } else {
            MailStatus::Unverified
        })
    }
}

fn status_label(status: DatabaseStatus) -> &'static str {
    match status {
        DatabaseStatus::Reachable => "connected",
        DatabaseStatus::Unreachable => "disconnected",
    }
}
