use std::{collections::HashMap, sync::Arc};

use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Value, json};
use thiserror::Error;
use tokio::sync::RwLock;
use tokio_postgres::{Client, Config as PgConfig, NoTls, Row, config::Host, error::SqlState};
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::models::user::{CreateUser, User};

/// Returned by [`UserStore::create`] when the email is already taken.
#[derive(Debug, Error)]
#[error("duplicate email: {0}")]
pub struct DuplicateEmail(pub String);

/// Record store used by the producer side.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn exists_by_email(&self, email: &str) -> Result<bool>;

    async fn create(&self, input: CreateUser) -> Result<User>;

    /// Newest first.
    async fn find_all(&self) -> Result<Vec<User>>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>>;

    /// Round trip used by the health probes.
    async fn ping(&self) -> Result<()>;

    /// Connection details reported by `/health/database`.
    fn describe(&self) -> Value {
        json!({ "type": "memory" })
    }
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
    full_name VARCHAR(255) NOT NULL,
    email VARCHAR(255) NOT NULL UNIQUE,
    message TEXT NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
)
"#;

const USER_COLUMNS: &str = "id, full_name, email, message, created_at, updated_at";

pub struct PgUserStore {
    client: Client,
    details: Value,
}

impl PgUserStore {
    pub async fn connect(database_url: &str) -> Result<Self, Error> {
        info!("Connecting to PostgreSQL database");

        let (client, connection) = tokio_postgres::connect(database_url, NoTls)
            .await
            .map_err(|e| anyhow!("Failed to connect to database: {}", e))?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!(error = %e, "PostgreSQL connection closed with error");
            }
        });

        client
            .batch_execute(SCHEMA)
            .await
            .map_err(|e| anyhow!("Failed to prepare users table: {}", e))?;

        info!("PostgreSQL connection established");

        Ok(Self {
            client,
            details: connection_details(database_url),
        })
    }

    fn map_row(row: &Row) -> User {
        User {
            id: row.get("id"),
            full_name: row.get("full_name"),
            email: row.get("email"),
            message: row.get("message"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        }
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn exists_by_email(&self, email: &str) -> Result<bool> {
        let row = self
            .client
            .query_one("SELECT EXISTS(SELECT 1 FROM users WHERE email = $1)", &[&email])
            .await
            .map_err(|e| anyhow!("Email lookup failed: {}", e))?;

        Ok(row.get(0))
    }

    async fn create(&self, input: CreateUser) -> Result<User> {
        let query = format!(
            "INSERT INTO users (full_name, email, message) VALUES ($1, $2, $3) RETURNING {}",
            USER_COLUMNS
        );

        let row = self
            .client
            .query_one(&query, &[&input.full_name, &input.email, &input.message])
            .await
            .map_err(|e| {
                if e.code() == Some(&SqlState::UNIQUE_VIOLATION) {
                    debug!(email = %input.email, "Insert lost a race on the unique email");
                    return Error::new(DuplicateEmail(input.email.clone()));
                }

                error!(error = %e, email = %input.email, "Failed to insert user");
                anyhow!("Database write failed: {}", e)
            })?;

        let user = Self::map_row(&row);
        debug!(user_id = %user.id, "User row inserted");

        Ok(user)
    }

    async fn find_all(&self) -> Result<Vec<User>> {
        let query = format!("SELECT {} FROM users ORDER BY created_at DESC", USER_COLUMNS);

        let rows = self
            .client
            .query(&query, &[])
            .await
            .map_err(|e| anyhow!("Failed to fetch users: {}", e))?;

        Ok(rows.iter().map(Self::map_row).collect())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>> {
        let query = format!("SELECT {} FROM users WHERE id = $1", USER_COLUMNS);

        let row = self
            .client
            .query_opt(&query, &[&id])
            .await
            .map_err(|e| anyhow!("Failed to fetch user {}: {}", id, e))?;

        Ok(row.as_ref().map(Self::map_row))
    }

    async fn ping(&self) -> Result<()> {
        if self.client.is_closed() {
            return Err(anyhow!("Database connection is closed"));
        }

        self.client
            .simple_query("SELECT 1")
            .await
            .map_err(|e| anyhow!("Database health check failed: {}", e))?;

        Ok(())
    }

    fn describe(&self) -> Value {
        self.details.clone()
    }
}

/// Host, port, database and user from a connection URL. Credentials other
/// than the user name are never reported.
fn connection_details(database_url: &str) -> Value {
    let Ok(config) = database_url.parse::<PgConfig>() else {
        return json!({ "type": "postgres" });
    };

    let host = config.get_hosts().first().map(|host| match host {
        Host::Tcp(name) => name.clone(),
        #[cfg(unix)]
        Host::Unix(path) => path.display().to_string(),
    });

    json!({
        "type": "postgres",
        "host": host,
        "port": config.get_ports().first().copied().unwrap_or(5432),
        "database": config.get_dbname(),
        "username": config.get_user(),
    })
}

/// Process-local store, used when no `DATABASE_URL` is configured.
#[derive(Debug, Default, Clone)]
pub struct InMemoryUserStore {
    users: Arc<RwLock<HashMap<Uuid, User>>>,
}

impl InMemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserStore for InMemoryUserStore {
    async fn exists_by_email(&self, email: &str) -> Result<bool> {
        Ok(self.users.read().await.values().any(|u| u.email == email))
    }

    async fn create(&self, input: CreateUser) -> Result<User> {
        let mut users = self.users.write().await;

        if users.values().any(|u| u.email == input.email) {
            return Err(DuplicateEmail(input.email).into());
        }

        let now = Utc::now();
        let user = User {
            id: Uuid::new_v4(),
            full_name: input.full_name,
            email: input.email,
            message: input.message,
            created_at: now,
            updated_at: now,
        };

        users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn find_all(&self) -> Result<Vec<User>> {
        let mut users: Vec<User> = self.users.read().await.values().cloned().collect();
        users.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(users)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>> {
        Ok(self.users.read().await.get(&id).cloned())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}
