use anyhow::{Result, anyhow};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{user::User, validation::validate_email};

/// Body of a message on the notification queue.
///
/// Field names are camelCase on the wire. New fields may be added; unknown
/// fields are ignored when decoding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationEvent {
    pub user_id: String,
    pub email: String,
    pub full_name: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl NotificationEvent {
    pub fn from_user(user: &User) -> Self {
        Self {
            user_id: user.id.to_string(),
            email: user.email.clone(),
            full_name: user.full_name.clone(),
            message: user.message.clone(),
            timestamp: user.created_at,
        }
    }

    /// Checks that can't be expressed in the type: non-empty identity fields
    /// and a syntactically plausible address. `message` may be empty.
    pub fn validate(&self) -> Result<()> {
        if self.user_id.trim().is_empty() {
            return Err(anyhow!("userId cannot be empty"));
        }

        if self.full_name.trim().is_empty() {
            return Err(anyhow!("fullName cannot be empty"));
        }

        validate_email(&self.email)
    }

    /// Identity used to recognise a redelivered copy of the same event.
    pub fn idempotency_key(&self) -> String {
        format!(
            "{}:{}",
            self.user_id,
            self.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
        )
    }
}

/// Envelope written to the dead-letter queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetter {
    pub payload: serde_json::Value,
    pub failure_reason: String,
    pub redelivery_count: u32,
    pub failed_at: String,
}

impl DeadLetter {
    pub fn new(raw: &[u8], failure_reason: String, redelivery_count: u32) -> Self {
        let payload = serde_json::from_slice(raw).unwrap_or_else(|_| {
            serde_json::Value::String(String::from_utf8_lossy(raw).into_owned())
        });

        Self {
            payload,
            failure_reason,
            redelivery_count,
            failed_at: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }
}
