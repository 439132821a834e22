//! Parent-facing child management and dashboard.

use axum::{
    Json,
    extract::{Extension, Path, State},
    http::StatusCode,
};
use kidbiz_shared::api;
use kidbiz_shared::domain::{
    SubscriptionStatus, days_until_permanent_deletion, level_progress_percent, now_utc,
};
use tracing::info;

use super::auth::AuthCtx;
use super::{AppError, AppState, activity_dto, rfc3339};
use crate::storage::models::{Child, Parent};
use crate::storage::{naive_to_offset, subscription_grants_access};

/// Recent activity entries shown per child on the dashboard.
const DASHBOARD_ACTIVITY_LIMIT: i64 = 5;

pub(super) fn child_dto(c: Child) -> api::ChildDto {
    api::ChildDto {
        id: c.id,
        name: c.name,
        access_code: c.access_code,
        total_xp: c.total_xp,
        level: c.level,
        streak_days: c.streak_days,
    }
}

pub(super) fn subscription_dto(p: &Parent) -> api::SubscriptionDto {
    api::SubscriptionDto {
        tier: p.subscription_tier.clone(),
        status: SubscriptionStatus::from(p.subscription_status.as_str()),
        trial_ends_at: p.trial_ends_at.map(rfc3339),
        grants_access: subscription_grants_access(p),
    }
}

/// Live child owned by the calling parent; anything else is a 404.
pub(super) async fn owned_child(
    state: &AppState,
    auth: &AuthCtx,
    child_id: &str,
) -> Result<Child, AppError> {
    state
        .store
        .get_child(child_id)
        .await?
        .filter(|c| c.parent_id == auth.claims.sub)
        .ok_or_else(|| AppError::not_found(format!("child not found: {child_id}")))
}

pub async fn api_list_children(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
) -> Result<Json<Vec<api::ChildDto>>, AppError> {
    let rows = state.store.list_children(&auth.claims.sub).await?;
    Ok(Json(rows.into_iter().map(child_dto).collect()))
}

pub async fn api_create_child(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
    Json(body): Json<api::CreateChildReq>,
) -> Result<(StatusCode, Json<api::ChildDto>), AppError> {
    let child = state
        .store
        .create_child(&auth.claims.sub, &body.name)
        .await?;
    Ok((StatusCode::CREATED, Json(child_dto(child))))
}

pub async fn api_rename_child(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
    Path(id): Path<String>,
    Json(body): Json<api::UpdateChildReq>,
) -> Result<Json<api::ChildDto>, AppError> {
    let child = state
        .store
        .rename_child(&auth.claims.sub, &id, &body.name)
        .await?;
    Ok(Json(child_dto(child)))
}

/// Soft delete. Open child sessions end immediately.
pub async fn api_delete_child(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    state.store.soft_delete_child(&auth.claims.sub, &id).await?;
    let dropped = state.store.delete_sessions_for(&id).await?;
    info!(child_id = %id, sessions = dropped, "child soft-deleted");
    Ok(StatusCode::NO_CONTENT)
}

pub async fn api_list_deleted_children(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
) -> Result<Json<Vec<api::DeletedChildDto>>, AppError> {
    let rows = state.store.list_deleted_children(&auth.claims.sub).await?;
    let now = now_utc();
    let retention = state.config.retention_days;
    let items = rows
        .into_iter()
        .map(|d| {
            let days = naive_to_offset(d.deleted_at)
                .map(|at| days_until_permanent_deletion(at, now, retention))
                .unwrap_or(0);
            api::DeletedChildDto {
                id: d.id,
                name: d.name,
                deleted_at: rfc3339(d.deleted_at),
                days_until_permanent_deletion: days,
            }
        })
        .collect();
    Ok(Json(items))
}

pub async fn api_restore_child(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
    Path(id): Path<String>,
) -> Result<Json<api::ChildDto>, AppError> {
    let child = state
        .store
        .restore_child(&auth.claims.sub, &id, state.config.retention_days)
        .await?;
    info!(child_id = %id, "child restored");
    Ok(Json(child_dto(child)))
}

pub(super) async fn child_overview(
    state: &AppState,
    child: Child,
) -> Result<api::ChildOverviewDto, AppError> {
    let stats = state.store.child_stats(&child.id).await?;
    let company = state.store.company_for_child(&child.id).await?;
    let achievements = state
        .store
        .child_achievements(&child.id)
        .await?
        .into_iter()
        .map(|(a, at)| super::learning::achievement_dto(a, Some(at)))
        .collect();
    let recent_activities = state
        .store
        .list_activities(&child.id, DASHBOARD_ACTIVITY_LIMIT)
        .await?
        .into_iter()
        .map(activity_dto)
        .collect();
    Ok(api::ChildOverviewDto {
        level_progress_percent: level_progress_percent(child.total_xp, state.config.xp_per_level),
        lessons_completed: stats.lessons_completed,
        modules_completed: stats.modules_completed,
        company_balance_cents: company.map(|c| c.balance_cents),
        achievements,
        recent_activities,
        child: child_dto(child),
    })
}

pub async fn api_parent_dashboard(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
) -> Result<Json<api::ParentDashboardDto>, AppError> {
    let parent = state
        .store
        .get_parent(&auth.claims.sub)
        .await?
        .ok_or_else(|| AppError::not_found("parent profile not found"))?;
    let mut children = Vec::new();
    for child in state.store.list_children(&auth.claims.sub).await? {
        children.push(child_overview(&state, child).await?);
    }
    Ok(Json(api::ParentDashboardDto {
        subscription: subscription_dto(&parent),
        children,
    }))
}
