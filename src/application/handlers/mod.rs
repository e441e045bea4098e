//! HTTP surface
//!
//! `/health` and the WebSocket endpoint are public (the socket checks its
//! own token). Everything under `/api` requires a bearer credential and is
//! rate limited.

pub mod account_handler;
pub mod trade_handler;
pub mod ws_handler;

use crate::application::services::connection_registry::ConnectionManager;
use crate::application::services::trade_processor::TradeProcessor;
use crate::auth::{require_auth, AuthState, JwtAuth};
use crate::domain::errors::{ConnectionError, ProcessingError};
use crate::rate_limit::{rate_limit_middleware, GlobalRateLimiter};
use axum::{
    extract::State,
    http::StatusCode,
    middleware,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

/// State shared by every handler
#[derive(Clone)]
pub struct AppState {
    pub processor: TradeProcessor,
    pub connections: Arc<ConnectionManager>,
    pub jwt: Arc<JwtAuth>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

pub type ApiError = (StatusCode, Json<ErrorResponse>);

pub fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

impl From<ProcessingError> for ApiError {
    fn from(e: ProcessingError) -> Self {
        let status = match &e {
            ProcessingError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            ProcessingError::TradeNotFound(_) => StatusCode::NOT_FOUND,
            ProcessingError::AlreadyClosed(_) => StatusCode::CONFLICT,
            ProcessingError::Persistence(inner) => {
                tracing::error!("Persistence failure while handling request: {}", inner);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        api_error(status, e.to_string())
    }
}

impl From<ConnectionError> for ApiError {
    fn from(e: ConnectionError) -> Self {
        let status = match &e {
            ConnectionError::NotLinked(_) => StatusCode::NOT_FOUND,
            ConnectionError::Broker(_) => StatusCode::BAD_GATEWAY,
            ConnectionError::Persistence(inner) => {
                tracing::error!("Persistence failure while handling request: {}", inner);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        api_error(status, e.to_string())
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub broker: String,
    pub active_connections: usize,
    pub scorer: String,
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        broker: state.connections.broker_name().to_string(),
        active_connections: state.connections.active_count().await,
        scorer: state.processor.scorer_name().to_string(),
    })
}

/// Assemble the application router
pub fn router(
    state: AppState,
    auth: AuthState,
    limiter: GlobalRateLimiter,
    max_body_bytes: usize,
) -> Router {
    let api = Router::new()
        .route("/accounts/connect", post(account_handler::connect))
        .route(
            "/accounts/:account_id/disconnect",
            post(account_handler::disconnect),
        )
        .route("/accounts/:account_id/status", get(account_handler::status))
        .route("/trades/open", get(trade_handler::open_trades))
        .route("/trades/simulate/open", post(trade_handler::simulate_open))
        .route(
            "/trades/:trade_id/simulate/close",
            post(trade_handler::simulate_close),
        )
        .route("/trades/:trade_id/history", get(trade_handler::history))
        .layer(middleware::from_fn_with_state(auth, require_auth))
        .layer(middleware::from_fn_with_state(
            limiter,
            rate_limit_middleware,
        ));

    Router::new()
        .route("/health", get(health))
        .route("/ws/trades", get(ws_handler::trades_ws))
        .nest("/api", api)
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
