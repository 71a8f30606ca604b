use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::accounts::AccountStore;
use crate::api::error::ApiError;
use crate::api::AppState;
use crate::mail::provider::Provider;

#[derive(Debug, Deserialize)]
pub struct RegisterAccount {
    pub provider: String,
    pub address: String,
    pub password: String,
}

/// POST /accounts: register a mailbox and queue its first sync
pub async fn register(
    State(state): State<AppState>,
    Json(body): Json<RegisterAccount>,
) -> Result<impl IntoResponse, ApiError> {
    let provider: Provider = body.provider.parse()?;
    let account = state
        .accounts
        .register(provider, &body.address, &body.password)
        .await?;

    // Registration stands even when the queue is saturated
    if let Err(err) = state.scheduler.enqueue(account.id) {
        tracing::warn!("Initial sync of {} not queued: {}", account.address, err);
    }

    let body = json!({
        "account": account,
        "sync": state.scheduler.status(account.id),
    });
    Ok((StatusCode::CREATED, Json(body)))
}

/// POST /accounts/:id/sync
pub async fn trigger_sync(
    State(state): State<AppState>,
    Path(account_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    state.accounts.get(account_id).await?;
    state.scheduler.enqueue(account_id)?;

    let body = json!({
        "account_id": account_id,
        "sync": state.scheduler.status(account_id),
    });
    Ok((StatusCode::ACCEPTED, Json(body)))
}

/// GET /accounts/:id/sync
pub async fn sync_status(
    State(state): State<AppState>,
    Path(account_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let status = state
        .scheduler
        .status(account_id)
        .ok_or_else(|| ApiError::NotFound(format!("no sync recorded for account {}", account_id)))?;

    Ok(Json(json!({
        "account_id": account_id,
        "sync": status,
    })))
}
