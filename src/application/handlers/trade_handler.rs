use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use serde::{Deserialize, Serialize};

use super::{ApiError, AppState};
use crate::auth::AuthenticatedUser;
use crate::domain::entities::audit::AuditLogEntry;
use crate::domain::entities::trade::Trade;
use crate::domain::entities::trade_event::SimulatedOpen;

/// Request body of the simulated close. Without a price the entry price is
/// used.
#[derive(Debug, Default, Deserialize)]
pub struct SimulateCloseRequest {
    pub exit_price: Option<f64>,
}

#[derive(Debug, Serialize)]
pub struct TradeHistoryResponse {
    pub trade_id: String,
    pub entries: Vec<AuditLogEntry>,
}

pub async fn open_trades(
    State(state): State<AppState>,
    Extension(AuthenticatedUser(user_id)): Extension<AuthenticatedUser>,
) -> Result<Json<Vec<Trade>>, ApiError> {
    Ok(Json(state.processor.open_trades(&user_id).await?))
}

pub async fn simulate_open(
    State(state): State<AppState>,
    Extension(AuthenticatedUser(user_id)): Extension<AuthenticatedUser>,
    Json(request): Json<SimulatedOpen>,
) -> Result<(StatusCode, Json<Trade>), ApiError> {
    let trade = state.processor.simulate_open(&user_id, request).await?;
    Ok((StatusCode::CREATED, Json(trade)))
}

pub async fn simulate_close(
    State(state): State<AppState>,
    Extension(AuthenticatedUser(user_id)): Extension<AuthenticatedUser>,
    Path(trade_id): Path<String>,
    body: Option<Json<SimulateCloseRequest>>,
) -> Result<Json<Trade>, ApiError> {
    let exit_price = body.and_then(|Json(b)| b.exit_price);
    let trade = state
        .processor
        .simulate_close(&user_id, &trade_id, exit_price)
        .await?;
    Ok(Json(trade))
}

pub async fn history(
    State(state): State<AppState>,
    Extension(AuthenticatedUser(user_id)): Extension<AuthenticatedUser>,
    Path(trade_id): Path<String>,
) -> Result<Json<TradeHistoryResponse>, ApiError> {
    let entries = state.processor.trade_history(&user_id, &trade_id).await?;
    Ok(Json(TradeHistoryResponse { trade_id, entries }))
}
