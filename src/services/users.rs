use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    clients::database::{DuplicateEmail, UserStore},
    models::user::{CreateUser, User},
    services::producer::NotificationProducer,
};

#[derive(Debug, Error)]
pub enum UserError {
    #[error("{0}")]
    Validation(String),

    #[error("User with this email already exists")]
    Conflict,

    #[error("User not found")]
    NotFound,

    #[error("store error: {0}")]
    Store(#[from] anyhow::Error),
}

/// Creates and reads user records. Creation publishes a welcome
/// notification only after the record is stored, and its outcome never
/// affects the result.
pub struct UserService {
    store: Arc<dyn UserStore>,
    producer: Arc<NotificationProducer>,
}

impl UserService {
    pub fn new(store: Arc<dyn UserStore>, producer: Arc<NotificationProducer>) -> Self {
        Self { store, producer }
    }

    pub async fn create(&self, input: CreateUser) -> Result<User, UserError> {
        input
            .validate()
            .map_err(|e| UserError::Validation(e.to_string()))?;

        if self.store.exists_by_email(&input.email).await? {
            warn!(email = %input.email, "User with email already exists");
            return Err(UserError::Conflict);
        }

        let user = match self.store.create(input).await {
            Ok(user) => user,
            Err(e) if e.is::<DuplicateEmail>() => {
                warn!(error = %e, "User with email was created concurrently");
                return Err(UserError::Conflict);
            }
            Err(e) => return Err(UserError::Store(e)),
        };

        info!(user_id = %user.id, "User created");

        let outcome = self.producer.notify(&user).await;
        debug!(user_id = %user.id, published = outcome.is_published(), "Notification attempted");

        Ok(user)
    }

    pub async fn find_all(&self) -> Result<Vec<User>, UserError> {
        Ok(self.store.find_all().await?)
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<User, UserError> {
        self.store.find_by_id(id).await?.ok_or(UserError::NotFound)
    }
}
