use serde::{Deserialize, Serialize};

use crate::auth::Role;
use crate::domain::{ChildSession, SubscriptionStatus, TransactionKind};

pub mod endpoints;
#[cfg(feature = "rest-client")]
pub mod rest;

pub const API_V1_PREFIX: &str = "/api/v1";

pub fn role_scope(role: Role) -> String {
    format!("{}/{}", API_V1_PREFIX, role.as_str())
}

// Auth
#[derive(Debug, Serialize, Deserialize)]
pub struct AuthReq {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AuthResp {
    pub token: String,
    pub role: Role,
    pub user_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChildAuthReq {
    pub access_code: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChildAuthResp {
    pub token: String,
    pub session: ChildSession,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChildSessionStatusDto {
    pub valid: bool,
    pub session: ChildSession,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct VersionInfoDto {
    pub version: String,
}

// Content
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleDto {
    pub id: i32,
    pub slug: String,
    pub title: String,
    pub description: String,
    pub order_index: i32,
    pub is_published: bool,
    pub published_at: Option<String>, // RFC3339 UTC
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleSummaryDto {
    #[serde(flatten)]
    pub module: ModuleDto,
    pub lesson_count: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ModuleReq {
    pub title: String,
    pub description: Option<String>,
    pub order_index: Option<i32>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PublishReq {
    pub published: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DeleteMode {
    /// Remove attempts, questions and lessons first, in one transaction.
    #[default]
    Safe,
    /// Delete the module row only; dependents make it fail.
    Simple,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeleteModuleResp {
    pub module_id: i32,
    pub lessons_deleted: usize,
    pub questions_deleted: usize,
    pub attempts_deleted: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LessonDto {
    pub id: i32,
    pub module_id: i32,
    pub title: String,
    pub content: String,
    pub xp_reward: i32,
    pub order_index: i32,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LessonReq {
    pub title: String,
    pub content: Option<String>,
    pub xp_reward: Option<i32>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReorderReq {
    pub lesson_ids: Vec<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuizQuestionDto {
    pub id: i32,
    pub lesson_id: i32,
    pub prompt: String,
    pub options: Vec<String>,
    pub correct_index: i32,
    pub explanation: String,
    pub order_index: i32,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct QuizQuestionReq {
    pub prompt: String,
    pub options: Vec<String>,
    pub correct_index: i32,
    pub explanation: Option<String>,
}

// Learning (child)
#[derive(Debug, Serialize, Deserialize)]
pub struct ModuleProgressDto {
    pub module: ModuleDto,
    pub lesson_count: i64,
    pub completed_lessons: i64,
    pub completion_percent: i32,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LessonProgressDto {
    pub lesson: LessonDto,
    pub completed: bool,
    pub score_percent: Option<i32>,
}

/// Quiz question as a child sees it: no answer, no explanation.
#[derive(Debug, Serialize, Deserialize)]
pub struct QuizQuestionViewDto {
    pub id: i32,
    pub prompt: String,
    pub options: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LessonViewDto {
    pub lesson: LessonDto,
    pub questions: Vec<QuizQuestionViewDto>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AnswerReq {
    pub question_id: i32,
    pub selected_index: i32,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AnswerResp {
    pub correct: bool,
    pub correct_index: i32,
    pub explanation: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CompleteLessonReq {
    /// Selected option per question, in question order.
    pub answers: Vec<usize>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CompleteLessonResp {
    pub score_percent: i32,
    pub already_completed: bool,
    pub xp_awarded: i64,
    pub total_xp: i64,
    pub level: i32,
    pub level_progress_percent: i32,
    pub streak_days: i32,
    pub module_completion_percent: i32,
    pub new_achievements: Vec<AchievementDto>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AchievementDto {
    pub id: String,
    pub name: String,
    pub description: String,
    pub awarded_at: Option<String>, // RFC3339 UTC
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChildProfileDto {
    pub id: String,
    pub name: String,
    pub total_xp: i64,
    pub level: i32,
    pub level_progress_percent: i32,
    pub streak_days: i32,
    pub achievements: Vec<AchievementDto>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ActivityDto {
    pub time: String, // RFC3339 UTC
    pub kind: String,
    pub description: String,
    pub xp_delta: i64,
}

// Track submissions
#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitTrackReq {
    pub module_id: i32,
    pub content: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TrackSubmissionDto {
    pub id: i32,
    pub child_id: String,
    pub child_name: String,
    pub module_id: i32,
    pub module_title: String,
    pub content: String,
    pub status: String,
    pub submitted_at: String, // RFC3339 UTC
    pub reviewed_by: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReviewReq {
    pub approve: bool,
}

// Company ledger
#[derive(Debug, Serialize, Deserialize)]
pub struct CreateCompanyReq {
    pub name: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CompanyDto {
    pub id: i32,
    pub child_id: String,
    pub name: String,
    pub balance_cents: i64,
    pub total_revenue_cents: i64,
    pub total_expenses_cents: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TransactionReq {
    pub kind: TransactionKind,
    pub amount_cents: i64,
    pub description: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TransactionDto {
    pub id: i32,
    pub kind: TransactionKind,
    pub amount_cents: i64,
    pub description: String,
    pub time: String, // RFC3339 UTC
}

// Children (parent)
#[derive(Debug, Serialize, Deserialize)]
pub struct CreateChildReq {
    pub name: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UpdateChildReq {
    pub name: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChildDto {
    pub id: String,
    pub name: String,
    pub access_code: String,
    pub total_xp: i64,
    pub level: i32,
    pub streak_days: i32,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeletedChildDto {
    pub id: String,
    pub name: String,
    pub deleted_at: String, // RFC3339 UTC
    pub days_until_permanent_deletion: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChildOverviewDto {
    pub child: ChildDto,
    pub level_progress_percent: i32,
    pub lessons_completed: i64,
    pub modules_completed: i64,
    pub company_balance_cents: Option<i64>,
    pub achievements: Vec<AchievementDto>,
    pub recent_activities: Vec<ActivityDto>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ParentDashboardDto {
    pub subscription: SubscriptionDto,
    pub children: Vec<ChildOverviewDto>,
}

// Users & subscriptions (admin)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionDto {
    pub tier: String,
    pub status: SubscriptionStatus,
    pub trial_ends_at: Option<String>, // RFC3339 UTC
    pub grants_access: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UserDto {
    pub id: String,
    pub email: String,
    pub display_name: String,
    pub role: Role,
    pub subscription: Option<SubscriptionDto>,
    pub child_count: i64,
    pub deactivated: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateParentReq {
    pub email: String,
    pub display_name: String,
    pub password: String,
    pub tier: Option<String>,
    pub status: Option<SubscriptionStatus>,
    pub trial_ends_at: Option<String>, // RFC3339
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SubscriptionReq {
    pub tier: Option<String>,
    pub status: Option<SubscriptionStatus>,
    /// RFC3339; an empty string clears the trial end.
    pub trial_ends_at: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SystemMetricsDto {
    pub total_users: i64,
    pub total_parents: i64,
    pub total_children: i64,
    pub active_subscriptions: i64,
    pub total_modules: i64,
    pub published_modules: i64,
    pub total_lessons: i64,
    pub lessons_completed: i64,
    pub modules_completed: i64,
    pub total_companies: i64,
    pub total_revenue_cents: i64,
    pub total_expenses_cents: i64,
    pub pending_submissions: i64,
    pub refreshed_at: Option<String>, // RFC3339 UTC
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CountDto {
    pub count: i64,
}
