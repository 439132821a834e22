use axum::{
    Json,
    extract::{Extension, Query, State},
    http::StatusCode,
};
use kidbiz_shared::api;
use kidbiz_shared::domain::TransactionKind;
use serde::Deserialize;
use tracing::{info, warn};

use super::auth::AuthCtx;
use super::{AppError, AppState, rfc3339};
use crate::storage::models::{Company, CompanyTransaction};

fn company_dto(c: Company) -> api::CompanyDto {
    api::CompanyDto {
        id: c.id,
        child_id: c.child_id,
        name: c.name,
        balance_cents: c.balance_cents,
        total_revenue_cents: c.total_revenue_cents,
        total_expenses_cents: c.total_expenses_cents,
    }
}

fn transaction_dto(t: CompanyTransaction) -> Result<api::TransactionDto, AppError> {
    let kind = TransactionKind::parse(&t.kind).ok_or_else(|| {
        warn!(transaction_id = t.id, kind = %t.kind, "unknown stored transaction kind");
        AppError::internal("invalid stored transaction kind")
    })?;
    Ok(api::TransactionDto {
        id: t.id,
        kind,
        amount_cents: t.amount_cents,
        description: t.description,
        time: rfc3339(t.created_at),
    })
}

pub async fn api_get_company(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
) -> Result<Json<api::CompanyDto>, AppError> {
    let child_id = auth.child_id()?;
    let company = state
        .store
        .company_for_child(child_id)
        .await?
        .ok_or_else(|| AppError::not_found("no company yet"))?;
    Ok(Json(company_dto(company)))
}

pub async fn api_create_company(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
    Json(body): Json<api::CreateCompanyReq>,
) -> Result<(StatusCode, Json<api::CompanyDto>), AppError> {
    let child_id = auth.child_id()?;
    let company = state.store.create_company(child_id, &body.name).await?;
    Ok((StatusCode::CREATED, Json(company_dto(company))))
}

/// Records a revenue or expense and returns the updated totals.
pub async fn api_add_transaction(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
    Json(body): Json<api::TransactionReq>,
) -> Result<(StatusCode, Json<api::CompanyDto>), AppError> {
    let child_id = auth.child_id()?;
    let entry = state
        .store
        .add_transaction(
            child_id,
            body.kind,
            body.amount_cents,
            body.description.as_deref().unwrap_or_default(),
            state.config.xp_per_level,
        )
        .await?;
    info!(
        child_id,
        transaction_id = entry.transaction.id,
        balance_cents = entry.company.balance_cents,
        new_achievements = entry.award.new_achievements.len(),
        "ledger updated"
    );
    Ok((StatusCode::CREATED, Json(company_dto(entry.company))))
}

#[derive(Deserialize)]
pub struct PageOpts {
    page: Option<i64>,
    per_page: Option<i64>,
}

pub async fn api_list_transactions(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
    Query(opts): Query<PageOpts>,
) -> Result<Json<Vec<api::TransactionDto>>, AppError> {
    let child_id = auth.child_id()?;
    let page = opts.page.unwrap_or(1).max(1);
    let per_page = opts.per_page.unwrap_or(20).clamp(1, 200);
    let rows = state
        .store
        .list_transactions(child_id, per_page, (page - 1) * per_page)
        .await?;
    let items = rows
        .into_iter()
        .map(transaction_dto)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Json(items))
}
