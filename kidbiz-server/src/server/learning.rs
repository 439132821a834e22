//! Child learning flow plus track-submission review.

use axum::{
    Json,
    extract::{Extension, Path, Query, State},
    http::StatusCode,
};
use chrono::NaiveDateTime;
use kidbiz_shared::api;
use kidbiz_shared::auth::Role;
use kidbiz_shared::domain::level_progress_percent;
use kidbiz_shared::quiz::{QuizFlow, QuizItem};
use serde::Deserialize;
use tracing::{info, warn};

use super::auth::AuthCtx;
use super::{AppError, AppState, activity_dto, lesson_dto, module_dto, rfc3339};
use crate::storage::SubmissionRow;
use crate::storage::models::{Achievement, Child, Lesson};

pub(super) fn achievement_dto(a: Achievement, awarded_at: Option<NaiveDateTime>) -> api::AchievementDto {
    api::AchievementDto {
        id: a.id,
        name: a.name,
        description: a.description,
        awarded_at: awarded_at.map(rfc3339),
    }
}

fn submission_dto(row: SubmissionRow) -> api::TrackSubmissionDto {
    let s = row.submission;
    api::TrackSubmissionDto {
        id: s.id,
        child_id: s.child_id,
        child_name: row.child_name,
        module_id: s.module_id,
        module_title: row.module_title,
        content: s.content,
        status: s.status,
        submitted_at: rfc3339(s.submitted_at),
        reviewed_by: s.reviewed_by,
    }
}

async fn current_child(state: &AppState, auth: &AuthCtx) -> Result<Child, AppError> {
    let id = auth.child_id()?;
    state
        .store
        .get_child(id)
        .await?
        .ok_or_else(AppError::unauthorized)
}

/// Lesson whose module is published; drafts stay invisible to children.
async fn published_lesson(state: &AppState, lesson_id: i32) -> Result<Lesson, AppError> {
    let not_found = || AppError::not_found(format!("lesson not found: {lesson_id}"));
    let lesson = state.store.get_lesson(lesson_id).await?.ok_or_else(not_found)?;
    let module = state.store.get_module(lesson.module_id).await?;
    if !module.is_some_and(|m| m.is_published) {
        return Err(not_found());
    }
    Ok(lesson)
}

pub async fn api_published_modules(
    State(state): State<AppState>,
) -> Result<Json<Vec<api::ModuleSummaryDto>>, AppError> {
    let rows = state.store.list_modules(true).await?;
    Ok(Json(
        rows.into_iter()
            .map(|r| api::ModuleSummaryDto {
                module: module_dto(r.module),
                lesson_count: r.lesson_count,
            })
            .collect(),
    ))
}

pub async fn api_child_profile(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
) -> Result<Json<api::ChildProfileDto>, AppError> {
    let child = current_child(&state, &auth).await?;
    let achievements = state
        .store
        .child_achievements(&child.id)
        .await?
        .into_iter()
        .map(|(a, at)| achievement_dto(a, Some(at)))
        .collect();
    Ok(Json(api::ChildProfileDto {
        level_progress_percent: level_progress_percent(child.total_xp, state.config.xp_per_level),
        id: child.id,
        name: child.name,
        total_xp: child.total_xp,
        level: child.level,
        streak_days: child.streak_days,
        achievements,
    }))
}

pub async fn api_child_modules(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
) -> Result<Json<Vec<api::ModuleProgressDto>>, AppError> {
    let child_id = auth.child_id()?;
    let modules = state.store.list_modules(true).await?;
    let done = state.store.completed_lessons_by_module(child_id).await?;
    let items = modules
        .into_iter()
        .map(|m| {
            let completed_lessons = done.get(&m.module.id).copied().unwrap_or(0);
            api::ModuleProgressDto {
                completion_percent: kidbiz_shared::domain::completion_percent(
                    completed_lessons,
                    m.lesson_count,
                ),
                completed_lessons,
                lesson_count: m.lesson_count,
                module: module_dto(m.module),
            }
        })
        .collect();
    Ok(Json(items))
}

pub async fn api_child_module_lessons(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
    Path(id): Path<i32>,
) -> Result<Json<Vec<api::LessonProgressDto>>, AppError> {
    let child_id = auth.child_id()?;
    let module = state.store.get_module(id).await?;
    if !module.is_some_and(|m| m.is_published) {
        return Err(AppError::not_found(format!("module not found: {id}")));
    }
    let mut progress = state.store.lesson_progress_for(child_id, id).await?;
    let items = state
        .store
        .list_lessons(id)
        .await?
        .into_iter()
        .map(|l| {
            let p = progress.remove(&l.id);
            api::LessonProgressDto {
                completed: p.is_some(),
                score_percent: p.map(|p| p.score_percent),
                lesson: lesson_dto(l),
            }
        })
        .collect();
    Ok(Json(items))
}

pub async fn api_child_lesson(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> Result<Json<api::LessonViewDto>, AppError> {
    let lesson = published_lesson(&state, id).await?;
    let questions = state
        .store
        .list_questions(id)
        .await?
        .into_iter()
        .map(|q| {
            let options = q.option_list();
            api::QuizQuestionViewDto {
                id: q.id,
                prompt: q.prompt,
                options,
            }
        })
        .collect();
    Ok(Json(api::LessonViewDto {
        lesson: lesson_dto(lesson),
        questions,
    }))
}

pub async fn api_answer_question(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
    Path(id): Path<i32>,
    Json(body): Json<api::AnswerReq>,
) -> Result<Json<api::AnswerResp>, AppError> {
    let child_id = auth.child_id()?;
    published_lesson(&state, id).await?;
    let question = state
        .store
        .get_question(body.question_id)
        .await?
        .filter(|q| q.lesson_id == id)
        .ok_or_else(|| AppError::not_found(format!("question not found: {}", body.question_id)))?;
    let option_count = question.option_list().len();
    if body.selected_index < 0 || body.selected_index as usize >= option_count {
        return Err(AppError::bad_request(format!(
            "selected_index {} out of range",
            body.selected_index
        )));
    }
    let correct = body.selected_index == question.correct_index;
    state
        .store
        .record_quiz_attempt(child_id, question.id, body.selected_index, correct)
        .await?;
    Ok(Json(api::AnswerResp {
        correct,
        correct_index: question.correct_index,
        explanation: question.explanation,
    }))
}

/// Grades the submitted answers and records the completion.
pub async fn api_complete_lesson(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
    Path(id): Path<i32>,
    Json(body): Json<api::CompleteLessonReq>,
) -> Result<Json<api::CompleteLessonResp>, AppError> {
    let child_id = auth.child_id()?.to_string();
    published_lesson(&state, id).await?;
    let items = state
        .store
        .list_questions(id)
        .await?
        .into_iter()
        .map(|q| QuizItem {
            question_id: q.id,
            option_count: q.option_list().len(),
            correct_index: q.correct_index.max(0) as usize,
        })
        .collect::<Vec<_>>();
    if body.answers.len() != items.len() {
        return Err(AppError::bad_request(format!(
            "expected {} answers, got {}",
            items.len(),
            body.answers.len()
        )));
    }
    let flow = QuizFlow::run(items, &body.answers).map_err(|e| {
        warn!(lesson_id = id, error = %e, "quiz grading rejected answers");
        AppError::bad_request(e.to_string())
    })?;
    let score = flow.score_percent();

    let outcome = state
        .store
        .complete_lesson(&child_id, id, score, state.config.xp_per_level)
        .await?;
    info!(
        child_id = %child_id,
        lesson_id = id,
        score,
        xp = outcome.xp_awarded,
        repeat = outcome.already_completed,
        "lesson completed"
    );
    Ok(Json(api::CompleteLessonResp {
        score_percent: outcome.score_percent,
        already_completed: outcome.already_completed,
        xp_awarded: outcome.xp_awarded,
        total_xp: outcome.award.total_xp,
        level: outcome.award.level,
        level_progress_percent: level_progress_percent(
            outcome.award.total_xp,
            state.config.xp_per_level,
        ),
        streak_days: outcome.award.streak_days,
        module_completion_percent: outcome.module_completion_percent,
        new_achievements: outcome
            .award
            .new_achievements
            .into_iter()
            .map(|(a, at)| achievement_dto(a, Some(at)))
            .collect(),
    }))
}

pub async fn api_child_achievements(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
) -> Result<Json<Vec<api::AchievementDto>>, AppError> {
    let child_id = auth.child_id()?;
    let rows = state.store.child_achievements(child_id).await?;
    Ok(Json(
        rows.into_iter()
            .map(|(a, at)| achievement_dto(a, Some(at)))
            .collect(),
    ))
}

#[derive(Deserialize)]
pub struct LimitOpts {
    limit: Option<i64>,
}

pub async fn api_child_activities(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
    Query(opts): Query<LimitOpts>,
) -> Result<Json<Vec<api::ActivityDto>>, AppError> {
    let child_id = auth.child_id()?;
    let rows = state
        .store
        .list_activities(child_id, opts.limit.unwrap_or(20))
        .await?;
    Ok(Json(rows.into_iter().map(activity_dto).collect()))
}

pub async fn api_submit_track(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
    Json(body): Json<api::SubmitTrackReq>,
) -> Result<(StatusCode, Json<api::TrackSubmissionDto>), AppError> {
    let child = current_child(&state, &auth).await?;
    let submission = state
        .store
        .submit_track(&child.id, body.module_id, &body.content)
        .await?;
    let module_title = state
        .store
        .get_module(body.module_id)
        .await?
        .map(|m| m.title)
        .unwrap_or_default();
    Ok((
        StatusCode::CREATED,
        Json(submission_dto(SubmissionRow {
            submission,
            child_name: child.name,
            module_title,
        })),
    ))
}

pub async fn api_child_submissions(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
) -> Result<Json<Vec<api::TrackSubmissionDto>>, AppError> {
    let child_id = auth.child_id()?;
    let rows = state
        .store
        .list_submissions(None, Some(child_id), false)
        .await?;
    Ok(Json(rows.into_iter().map(submission_dto).collect()))
}

#[derive(Deserialize)]
pub struct SubmissionOpts {
    #[serde(default)]
    pending: bool,
}

/// Admins see every submission, parents only their children's.
pub async fn api_list_submissions(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
    Query(opts): Query<SubmissionOpts>,
) -> Result<Json<Vec<api::TrackSubmissionDto>>, AppError> {
    let owner = reviewer_scope(&auth)?;
    let rows = state
        .store
        .list_submissions(owner, None, opts.pending)
        .await?;
    Ok(Json(rows.into_iter().map(submission_dto).collect()))
}

pub async fn api_review_submission(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
    Path(id): Path<i32>,
    Json(body): Json<api::ReviewReq>,
) -> Result<Json<api::TrackSubmissionDto>, AppError> {
    let owner = reviewer_scope(&auth)?;
    let row = state
        .store
        .review_submission(id, &auth.claims.sub, owner, body.approve)
        .await?;
    info!(submission_id = id, approve = body.approve, reviewer = %auth.claims.sub, "submission reviewed");
    Ok(Json(submission_dto(row)))
}

fn reviewer_scope(auth: &AuthCtx) -> Result<Option<&str>, AppError> {
    match auth.claims.role {
        Role::Admin => Ok(None),
        Role::Parent => Ok(Some(auth.claims.sub.as_str())),
        Role::Child => Err(AppError::forbidden()),
    }
}
