mod common;

use std::{sync::Arc, time::Duration};

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use common::disconnected_broker;
use notification_service::{
    clients::{
        broker::BrokerError,
        database::{DuplicateEmail, InMemoryUserStore, UserStore},
    },
    models::{
        connection::ConnectionState, event::NotificationEvent, status::NotifyOutcome,
        user::{CreateUser, User},
    },
    services::{
        producer::NotificationProducer,
        users::{UserError, UserService},
    },
};
use tokio::time::Instant;
use uuid::Uuid;

fn create_input(email: &str) -> CreateUser {
    CreateUser {
        full_name: "Ada Lovelace".to_string(),
        email: email.to_string(),
        message: "Looking forward to trying this out".to_string(),
    }
}

fn user_service() -> (UserService, Arc<NotificationProducer>) {
    let producer = Arc::new(NotificationProducer::new(
        disconnected_broker(),
        "email_notifications",
    ));
    let store: Arc<dyn UserStore> = Arc::new(InMemoryUserStore::new());

    (UserService::new(store, Arc::clone(&producer)), producer)
}

/// Test: Publishing while disconnected fails fast without blocking
#[tokio::test]
async fn test_publish_while_disconnected_fails_fast() -> Result<()> {
    let broker = disconnected_broker();
    assert_eq!(broker.state(), ConnectionState::Disconnected);

    let started = Instant::now();
    let result = broker.publish("email_notifications", &serde_json::json!({})).await;

    assert!(matches!(result, Err(BrokerError::NotConnected)));
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(broker.state(), ConnectionState::Disconnected);

    Ok(())
}

/// Test: notify reports the failure and counts it instead of erroring
#[tokio::test]
async fn test_notify_swallows_publish_failure() -> Result<()> {
    let producer = NotificationProducer::new(disconnected_broker(), "email_notifications");

    let now = Utc::now();
    let user = User {
        id: Uuid::new_v4(),
        full_name: "A B".to_string(),
        email: "a@b.com".to_string(),
        message: "hi".to_string(),
        created_at: now,
        updated_at: now,
    };

    let outcome = producer.notify(&user).await;

    assert!(matches!(outcome, NotifyOutcome::Failed(_)));
    let counters = producer.stats().snapshot();
    assert_eq!(counters.published, 0);
    assert_eq!(counters.failed, 1);

    Ok(())
}

/// Test: Record creation succeeds while the broker is disconnected
#[tokio::test]
async fn test_create_user_succeeds_without_broker() -> Result<()> {
    let (service, producer) = user_service();

    let user = service.create(create_input("ada@example.com")).await?;

    assert_eq!(user.email, "ada@example.com");
    assert_eq!(service.find_by_id(user.id).await?, user);
    assert_eq!(producer.stats().snapshot().failed, 1);

    Ok(())
}

/// Test: The event carries the record's fields and creation time
#[tokio::test]
async fn test_event_is_built_from_record() -> Result<()> {
    let store = InMemoryUserStore::new();
    let user = store.create(create_input("ada@example.com")).await?;

    let event = NotificationEvent::from_user(&user);

    assert_eq!(event.user_id, user.id.to_string());
    assert_eq!(event.email, user.email);
    assert_eq!(event.full_name, user.full_name);
    assert_eq!(event.message, user.message);
    assert_eq!(event.timestamp, user.created_at);

    let wire = serde_json::to_value(&event)?;
    for field in ["userId", "email", "fullName", "message", "timestamp"] {
        assert!(wire.get(field).is_some(), "missing wire field {}", field);
    }

    Ok(())
}

/// Test: A duplicate email is a conflict and triggers no notification
#[tokio::test]
async fn test_duplicate_email_is_conflict() -> Result<()> {
    let (service, producer) = user_service();

    service.create(create_input("ada@example.com")).await?;
    let second = service.create(create_input("ada@example.com")).await;

    assert!(matches!(second, Err(UserError::Conflict)));
    assert_eq!(producer.stats().snapshot().failed, 1, "only the first create notifies");

    Ok(())
}

/// Test: Invalid input is rejected before anything is stored or published
#[tokio::test]
async fn test_invalid_input_is_rejected() -> Result<()> {
    let (service, producer) = user_service();

    let mut input = create_input("not-an-email");
    assert!(matches!(service.create(input.clone()).await, Err(UserError::Validation(_))));

    input.email = "ada@example.com".to_string();
    input.message = "short".to_string();
    assert!(matches!(service.create(input).await, Err(UserError::Validation(_))));

    assert!(service.find_all().await?.is_empty());
    assert_eq!(producer.stats().snapshot(), Default::default());

    Ok(())
}

/// Test: Lookups return newest first and report missing ids
#[tokio::test]
async fn test_find_all_and_find_by_id() -> Result<()> {
    let (service, _) = user_service();

    let first = service.create(create_input("first@example.com")).await?;
    tokio::time::sleep(Duration::from_millis(5)).await;
    let second = service.create(create_input("second@example.com")).await?;

    let all = service.find_all().await?;
    assert_eq!(all.len(), 2);
    assert_eq!(all[0].id, second.id);
    assert_eq!(all[1].id, first.id);

    assert!(matches!(
        service.find_by_id(Uuid::new_v4()).await,
        Err(UserError::NotFound)
    ));

    Ok(())
}

/// Store whose email check always misses, so a second insert of the same
/// email reaches the unique constraint like a lost race would.
struct RacingStore {
    inner: InMemoryUserStore,
}

#[async_trait]
impl UserStore for RacingStore {
    async fn exists_by_email(&self, _email: &str) -> Result<bool> {
        Ok(false)
    }

    async fn create(&self, input: CreateUser) -> Result<User> {
        self.inner.create(input).await
    }

    async fn find_all(&self) -> Result<Vec<User>> {
        self.inner.find_all().await
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>> {
        self.inner.find_by_id(id).await
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

/// Test: The store reports a taken email as a typed duplicate error
#[tokio::test]
async fn test_store_reports_duplicate_email() -> Result<()> {
    let store = InMemoryUserStore::new();
    store.create(create_input("ada@example.com")).await?;

    let err = store
        .create(create_input("ada@example.com"))
        .await
        .expect_err("second insert must fail");

    assert!(err.is::<DuplicateEmail>());

    Ok(())
}

/// Test: A unique violation at insert time is a conflict, not a store error
#[tokio::test]
async fn test_insert_race_is_conflict() -> Result<()> {
    let producer = Arc::new(NotificationProducer::new(
        disconnected_broker(),
        "email_notifications",
    ));
    let store: Arc<dyn UserStore> = Arc::new(RacingStore {
        inner: InMemoryUserStore::new(),
    });
    let service = UserService::new(store, Arc::clone(&producer));

    service.create(create_input("ada@example.com")).await?;
    let second = service.create(create_input("ada@example.com")).await;

    assert!(matches!(second, Err(UserError::Conflict)), "got {:?}", second);
    assert_eq!(service.find_all().await?.len(), 1);
    assert_eq!(producer.stats().snapshot().failed, 1, "only the stored record notifies");

    Ok(())
}

/// Test: Concurrent creates with one email store one record and one conflict
#[tokio::test]
async fn test_concurrent_duplicate_creates() -> Result<()> {
    let (service, _) = user_service();

    let (first, second) = tokio::join!(
        service.create(create_input("ada@example.com")),
        service.create(create_input("ada@example.com")),
    );

    let results = [first, second];
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert_eq!(
        results
            .iter()
            .filter(|r| matches!(r, Err(UserError::Conflict)))
            .count(),
        1
    );
    assert_eq!(service.find_all().await?.len(), 1);

    Ok(())
}
