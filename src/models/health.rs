use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::models::connection::ConnectionState;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseStatus {
    Reachable,
    Unreachable,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MailStatus {
    Verified,
    Unverified,
}

/// Dependency states gathered by one probe call. `None` means the dependency
/// is not checked in this deployment role.
#[derive(Debug, Clone, PartialEq)]
pub struct HealthSnapshot {
    pub broker: Option<ConnectionState>,
    pub database: Option<DatabaseStatus>,
    pub mail: Option<MailStatus>,
    pub composite: HealthStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckResponse {
    pub status: HealthStatus,
    pub timestamp: DateTime<Utc>,
    pub uptime: f64,
    pub environment: String,
    pub version: String,
    pub checks: HashMap<String, ServiceHealth>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub notifications: Option<PublishCounters>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceHealth {
    pub status: HealthStatus,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_time_ms: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ServiceHealth {
    pub fn healthy(response_time_ms: u64) -> Self {
        Self {
            status: HealthStatus::Healthy,
            state: None,
            response_time_ms: Some(response_time_ms),
            error: None,
            details: None,
        }
    }

    pub fn degraded(error: String) -> Self {
        Self {
            status: HealthStatus::Degraded,
            state: None,
            response_time_ms: None,
            error: Some(error),
            details: None,
        }
    }

    pub fn unhealthy(error: String) -> Self {
        Self {
            status: HealthStatus::Unhealthy,
            state: None,
            response_time_ms: None,
            error: Some(error),
            details: None,
        }
    }

    pub fn with_state(mut self, state: impl Into<String>) -> Self {
        self.state = Some(state.into());
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishCounters {
    pub published: u64,
    pub failed: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub status: String,
    pub timestamp: DateTime<Utc>,

    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub unavailable: Vec<String>,
}

impl ReadinessResponse {
    pub fn is_ready(&self) -> bool {
        self.unavailable.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LivenessResponse {
    pub status: String,
    pub timestamp: DateTime<Utc>,
}

/// Connection details of one dependency, probed on request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DependencyInfo {
    pub status: String,
    pub is_connected: bool,
    pub timestamp: DateTime<Utc>,

    #[serde(flatten)]
    pub details: serde_json::Map<String, serde_json::Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DependencyInfo {
    pub fn new(connected: bool, details: serde_json::Value, error: Option<String>) -> Self {
        let details = match details {
            serde_json::Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };

        Self {
            status: if connected { "connected" } else { "disconnected" }.to_string(),
            is_connected: connected,
            timestamp: Utc::now(),
            details,
            error,
        }
    }
}
