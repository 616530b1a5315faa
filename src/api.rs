use std::sync::Arc;

use axum::{
    Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::get,
};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use uuid::Uuid;

use crate::{
    clients::health::HealthAggregator,
    models::{
        health::HealthStatus,
        response::ApiResponse,
        user::{CreateUser, User},
    },
    services::users::{UserError, UserService},
};

pub struct AppState {
    pub health: HealthAggregator,
    pub users: Option<UserService>,
}

pub fn router(state: Arc<AppState>) -> Router {
    let mut app = Router::new()
        .route("/health", get(health_check))
        .route("/health/ready", get(readiness))
        .route("/health/live", get(liveness))
        .route("/health/database", get(database_info))
        .route("/health/email-service", get(email_service_info));

    if state.users.is_some() {
        app = app
            .route("/users", get(list_users).post(create_user))
            .route("/users/{id}", get(get_user));
    }

    app.layer(TraceLayer::new_for_http()).with_state(state)
}

pub async fn run_api_server(
    state: Arc<AppState>,
    port: u16,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let addr = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(&addr).await?;

    info!(address = %addr, "HTTP server started");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}

async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health.check().await;

    let status_code = match health.status {
        HealthStatus::Healthy => StatusCode::OK,
        HealthStatus::Degraded | HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

async fn readiness(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health.ready().await;

    let status_code = if readiness.is_ready() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

async fn liveness(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    (StatusCode::OK, Json(state.health.live()))
}

async fn database_info(State(state): State<Arc<AppState>>) -> Response {
    match state.health.database_info().await {
        Some(info) => (StatusCode::OK, Json(info)).into_response(),
        None => not_served("Database is not used by this role"),
    }
}

async fn email_service_info(State(state): State<Arc<AppState>>) -> Response {
    match state.health.email_service_info().await {
        Some(info) => (StatusCode::OK, Json(info)).into_response(),
        None => not_served("Email service is not used by this role"),
    }
}

fn not_served(message: &str) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(ApiResponse::<()>::error(
            message.to_string(),
            "Not found".to_string(),
        )),
    )
        .into_response()
}

async fn create_user(
    State(state): State<Arc<AppState>>,
    Json(input): Json<CreateUser>,
) -> Result<(StatusCode, Json<ApiResponse<User>>), UserError> {
    let users = user_service(&state)?;
    let user = users.create(input).await?;

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success(user, "User created successfully".to_string())),
    ))
}

async fn list_users(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ApiResponse<Vec<User>>>, UserError> {
    let users = user_service(&state)?.find_all().await?;
    let message = format!("Retrieved {} users", users.len());

    Ok(Json(ApiResponse::success(users, message)))
}

async fn get_user(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<User>>, UserError> {
    let user = user_service(&state)?.find_by_id(id).await?;

    Ok(Json(ApiResponse::success(user, "User retrieved successfully".to_string())))
}

fn user_service(state: &AppState) -> Result<&UserService, UserError> {
    state
        .users
        .as_ref()
        .ok_or_else(|| UserError::Store(anyhow::anyhow!("user records are not served by this role")))
}

impl IntoResponse for UserError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            UserError::Validation(_) => (StatusCode::BAD_REQUEST, "Validation failed"),
            UserError::Conflict => (StatusCode::CONFLICT, "Conflict"),
            UserError::NotFound => (StatusCode::NOT_FOUND, "Not found"),
            UserError::Store(e) => {
                error!(error = %e, "User store operation failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
            }
        };

        let error = match &self {
            UserError::Store(_) => "Failed to process user request".to_string(),
            other => other.to_string(),
        };

        (status, Json(ApiResponse::<()>::error(error, message.to_string()))).into_response()
    }
}
