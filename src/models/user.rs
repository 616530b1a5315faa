use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::validation::{validate_email, validate_length};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,
    pub full_name: String,
    pub email: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateUser {
    pub full_name: String,
    pub email: String,
    pub message: String,
}

impl CreateUser {
    pub fn validate(&self) -> anyhow::Result<()> {
        validate_length("Full name", &self.full_name, 2, 100)?;
        validate_email(&self.email)?;
        validate_length("Message", &self.message, 10, 1000)?;
        Ok(())
    }
}
