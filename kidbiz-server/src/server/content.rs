//! Admin content management: modules, lessons and quiz questions.

use axum::{
    Json,
    extract::{Extension, Path, Query, State},
    http::StatusCode,
};
use kidbiz_shared::api::{self, DeleteMode};
use serde::Deserialize;
use tracing::info;

use super::auth::AuthCtx;
use super::{AppError, AppState, lesson_dto, module_dto};
use crate::storage::models::QuizQuestion;

fn question_dto(q: QuizQuestion) -> api::QuizQuestionDto {
    let options = q.option_list();
    api::QuizQuestionDto {
        id: q.id,
        lesson_id: q.lesson_id,
        prompt: q.prompt,
        options,
        correct_index: q.correct_index,
        explanation: q.explanation,
        order_index: q.order_index,
    }
}

pub async fn api_list_modules(
    State(state): State<AppState>,
) -> Result<Json<Vec<api::ModuleSummaryDto>>, AppError> {
    let rows = state.store.list_modules(false).await?;
    Ok(Json(
        rows.into_iter()
            .map(|r| api::ModuleSummaryDto {
                module: module_dto(r.module),
                lesson_count: r.lesson_count,
            })
            .collect(),
    ))
}

pub async fn api_get_module(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> Result<Json<api::ModuleDto>, AppError> {
    let module = state
        .store
        .get_module(id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("module not found: {id}")))?;
    Ok(Json(module_dto(module)))
}

pub async fn api_create_module(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
    Json(body): Json<api::ModuleReq>,
) -> Result<(StatusCode, Json<api::ModuleDto>), AppError> {
    let module = state
        .store
        .create_module(
            &body.title,
            body.description.as_deref().unwrap_or_default(),
            body.order_index,
        )
        .await?;
    info!(module_id = module.id, admin = %auth.claims.sub, "module created");
    Ok((StatusCode::CREATED, Json(module_dto(module))))
}

pub async fn api_update_module(
    State(state): State<AppState>,
    Path(id): Path<i32>,
    Json(body): Json<api::ModuleReq>,
) -> Result<Json<api::ModuleDto>, AppError> {
    let current = state
        .store
        .get_module(id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("module not found: {id}")))?;
    let description = body.description.unwrap_or(current.description);
    let module = state
        .store
        .update_module(id, &body.title, &description, body.order_index)
        .await?;
    Ok(Json(module_dto(module)))
}

pub async fn api_publish_module(
    State(state): State<AppState>,
    Path(id): Path<i32>,
    Json(body): Json<api::PublishReq>,
) -> Result<Json<api::ModuleDto>, AppError> {
    let module = state.store.set_module_published(id, body.published).await?;
    info!(module_id = id, published = body.published, "module publish state changed");
    Ok(Json(module_dto(module)))
}

#[derive(Deserialize)]
pub struct DeleteOpts {
    mode: Option<DeleteMode>,
}

/// `mode=safe` (default) removes dependents first; `mode=simple` deletes the
/// module row alone and answers 409 with a hint while dependents exist.
pub async fn api_delete_module(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
    Path(id): Path<i32>,
    Query(opts): Query<DeleteOpts>,
) -> Result<Json<api::DeleteModuleResp>, AppError> {
    let mode = opts.mode.unwrap_or_default();
    let resp = match mode {
        DeleteMode::Safe => {
            let d = state.store.delete_module_cascade(id).await?;
            api::DeleteModuleResp {
                module_id: id,
                lessons_deleted: d.lessons,
                questions_deleted: d.questions,
                attempts_deleted: d.attempts,
            }
        }
        DeleteMode::Simple => {
            state.store.delete_module_simple(id).await?;
            api::DeleteModuleResp {
                module_id: id,
                lessons_deleted: 0,
                questions_deleted: 0,
                attempts_deleted: 0,
            }
        }
    };
    info!(module_id = id, ?mode, admin = %auth.claims.sub, "module deleted");
    Ok(Json(resp))
}

pub async fn api_list_lessons(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> Result<Json<Vec<api::LessonDto>>, AppError> {
    let rows = state.store.list_lessons(id).await?;
    Ok(Json(rows.into_iter().map(lesson_dto).collect()))
}

pub async fn api_create_lesson(
    State(state): State<AppState>,
    Path(id): Path<i32>,
    Json(body): Json<api::LessonReq>,
) -> Result<(StatusCode, Json<api::LessonDto>), AppError> {
    let lesson = state
        .store
        .create_lesson(
            id,
            &body.title,
            body.content.as_deref().unwrap_or_default(),
            body.xp_reward.unwrap_or(10),
        )
        .await?;
    Ok((StatusCode::CREATED, Json(lesson_dto(lesson))))
}

pub async fn api_reorder_lessons(
    State(state): State<AppState>,
    Path(id): Path<i32>,
    Json(body): Json<api::ReorderReq>,
) -> Result<Json<Vec<api::LessonDto>>, AppError> {
    let rows = state.store.reorder_lessons(id, &body.lesson_ids).await?;
    Ok(Json(rows.into_iter().map(lesson_dto).collect()))
}

pub async fn api_get_lesson(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> Result<Json<api::LessonDto>, AppError> {
    let lesson = state
        .store
        .get_lesson(id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("lesson not found: {id}")))?;
    Ok(Json(lesson_dto(lesson)))
}

pub async fn api_update_lesson(
    State(state): State<AppState>,
    Path(id): Path<i32>,
    Json(body): Json<api::LessonReq>,
) -> Result<Json<api::LessonDto>, AppError> {
    if body.xp_reward.is_some_and(|x| x < 0) {
        return Err(AppError::bad_request("xp_reward must not be negative"));
    }
    let lesson = state
        .store
        .update_lesson(id, &body.title, body.content.as_deref(), body.xp_reward)
        .await?;
    Ok(Json(lesson_dto(lesson)))
}

pub async fn api_delete_lesson(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> Result<StatusCode, AppError> {
    state.store.delete_lesson(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn api_list_questions(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> Result<Json<Vec<api::QuizQuestionDto>>, AppError> {
    let rows = state.store.list_questions(id).await?;
    Ok(Json(rows.into_iter().map(question_dto).collect()))
}

pub async fn api_create_question(
    State(state): State<AppState>,
    Path(id): Path<i32>,
    Json(body): Json<api::QuizQuestionReq>,
) -> Result<(StatusCode, Json<api::QuizQuestionDto>), AppError> {
    let q = state
        .store
        .create_question(
            id,
            &body.prompt,
            &body.options,
            body.correct_index,
            body.explanation.as_deref().unwrap_or_default(),
        )
        .await?;
    Ok((StatusCode::CREATED, Json(question_dto(q))))
}

pub async fn api_update_question(
    State(state): State<AppState>,
    Path(id): Path<i32>,
    Json(body): Json<api::QuizQuestionReq>,
) -> Result<Json<api::QuizQuestionDto>, AppError> {
    let q = state
        .store
        .update_question(
            id,
            &body.prompt,
            &body.options,
            body.correct_index,
            body.explanation.as_deref().unwrap_or_default(),
        )
        .await?;
    Ok(Json(question_dto(q)))
}

pub async fn api_delete_question(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> Result<StatusCode, AppError> {
    state.store.delete_question(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
