//! Admin user management and the cached system metrics.

use axum::{
    Json,
    extract::{Extension, Path, State},
    http::StatusCode,
};
use chrono::{Duration, NaiveDateTime, Utc};
use kidbiz_shared::api;
use kidbiz_shared::auth::Role;
use kidbiz_shared::domain::SubscriptionStatus;
use tracing::{error, info};

use super::auth::AuthCtx;
use super::children::subscription_dto;
use super::{AppError, AppState, metrics};
use crate::storage::{NewParentAccount, UserRow};

fn user_dto(row: UserRow) -> Result<api::UserDto, AppError> {
    let role = Role::parse(&row.user.role)
        .ok_or_else(|| AppError::internal(format!("invalid stored role {}", row.user.role)))?;
    Ok(api::UserDto {
        subscription: row.parent.as_ref().map(subscription_dto),
        id: row.user.id,
        email: row.user.email,
        display_name: row.user.display_name,
        role,
        child_count: row.child_count,
        deactivated: row.user.deleted_at.is_some(),
    })
}

fn parse_trial_end(raw: &str) -> Result<NaiveDateTime, AppError> {
    chrono::DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.naive_utc())
        .map_err(|e| AppError::bad_request(format!("trial_ends_at: {e}")))
}

pub async fn api_list_users(
    State(state): State<AppState>,
) -> Result<Json<Vec<api::UserDto>>, AppError> {
    let rows = state.store.list_users().await?;
    let items = rows
        .into_iter()
        .map(user_dto)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Json(items))
}

pub async fn api_create_parent(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
    Json(body): Json<api::CreateParentReq>,
) -> Result<(StatusCode, Json<api::UserDto>), AppError> {
    if body.password.len() < 8 {
        return Err(AppError::bad_request(
            "password must be at least 8 characters",
        ));
    }
    let trial_ends_at = body
        .trial_ends_at
        .as_deref()
        .filter(|s| !s.is_empty())
        .map(parse_trial_end)
        .transpose()?;
    let password = body.password.clone();
    let password_hash = tokio::task::spawn_blocking(move || {
        bcrypt::hash(password, bcrypt::DEFAULT_COST)
    })
    .await
    .map_err(AppError::internal)?
    .map_err(|e| {
        error!(error=%e, "create parent: bcrypt hash failed");
        AppError::internal(e)
    })?;
    let status = body.status.unwrap_or(SubscriptionStatus::Trialing);
    let trial_ends_at = match (&status, trial_ends_at) {
        (SubscriptionStatus::Trialing, None) => {
            Some(Utc::now().naive_utc() + Duration::days(state.config.trial_days))
        }
        (_, given) => given,
    };
    let row = state
        .store
        .create_parent(NewParentAccount {
            email: &body.email,
            display_name: &body.display_name,
            password_hash: &password_hash,
            tier: body.tier.as_deref().unwrap_or("free"),
            status: &status,
            trial_ends_at,
        })
        .await?;
    info!(user_id = %row.user.id, admin = %auth.claims.sub, "parent created");
    Ok((StatusCode::CREATED, Json(user_dto(row)?)))
}

pub async fn api_update_subscription(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<api::SubscriptionReq>,
) -> Result<Json<api::SubscriptionDto>, AppError> {
    let trial = match body.trial_ends_at.as_deref() {
        None => None,
        Some("") => Some(None),
        Some(raw) => Some(Some(parse_trial_end(raw)?)),
    };
    let parent = state
        .store
        .update_subscription(&id, body.tier, body.status, trial)
        .await?;
    info!(user_id = %id, status = %parent.subscription_status, "subscription updated");
    Ok(Json(subscription_dto(&parent)))
}

/// Soft deactivation: the account keeps its data but every session ends.
pub async fn api_deactivate_user(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    if id == auth.claims.sub {
        return Err(AppError::bad_request("cannot deactivate your own account"));
    }
    state.store.deactivate_user(&id).await?;
    let dropped = state.store.delete_sessions_for(&id).await?;
    info!(user_id = %id, sessions = dropped, admin = %auth.claims.sub, "user deactivated");
    Ok(StatusCode::NO_CONTENT)
}

/// Served from the refresher's cache; computed on the spot only before the
/// first refresh has landed.
pub async fn api_metrics(
    State(state): State<AppState>,
) -> Result<Json<api::SystemMetricsDto>, AppError> {
    let snapshot = state.metrics_snapshot().await;
    if snapshot.refreshed_at.is_some() {
        return Ok(Json(snapshot));
    }
    metrics::refresh_once(&state).await?;
    Ok(Json(state.metrics_snapshot().await))
}
