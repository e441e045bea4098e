use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use super::{api_error, ApiError, AppState};
use crate::application::services::connection_registry::{
    AccountStatus, ConnectResponse, LinkDetails,
};
use crate::auth::AuthenticatedUser;
use crate::secrets::credentials_fingerprint;

/// Request body of `POST /api/accounts/connect`
#[derive(Debug, Deserialize)]
pub struct ConnectRequest {
    pub account_id: String,
    /// Broker login, only used for the credentials fingerprint
    pub login: Option<String>,
    pub password: Option<String>,
    /// e.g. "mt4" or "mt5"
    pub platform: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DisconnectResponse {
    pub account_id: String,
    pub unlinked: bool,
}

pub async fn connect(
    State(state): State<AppState>,
    Extension(AuthenticatedUser(user_id)): Extension<AuthenticatedUser>,
    Json(request): Json<ConnectRequest>,
) -> Result<Json<ConnectResponse>, ApiError> {
    let account_id = request.account_id.trim().to_string();
    if account_id.is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "account_id is required"));
    }

    let password = request.password.map(Zeroizing::new);
    let credentials_ref = match (&request.login, &password) {
        (Some(login), Some(password)) => Some(credentials_fingerprint(&account_id, login, password)),
        _ => None,
    };

    let response = state
        .connections
        .connect(
            &user_id,
            &account_id,
            LinkDetails {
                credentials_ref,
                platform: request.platform,
            },
        )
        .await?;
    Ok(Json(response))
}

pub async fn disconnect(
    State(state): State<AppState>,
    Extension(AuthenticatedUser(user_id)): Extension<AuthenticatedUser>,
    Path(account_id): Path<String>,
) -> Result<Json<DisconnectResponse>, ApiError> {
    let unlinked = state.connections.disconnect(&user_id, &account_id).await?;
    Ok(Json(DisconnectResponse {
        account_id,
        unlinked,
    }))
}

pub async fn status(
    State(state): State<AppState>,
    Extension(AuthenticatedUser(user_id)): Extension<AuthenticatedUser>,
    Path(account_id): Path<String>,
) -> Result<Json<AccountStatus>, ApiError> {
    Ok(Json(state.connections.status(&user_id, &account_id).await?))
}
