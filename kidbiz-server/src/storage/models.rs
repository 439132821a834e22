use crate::storage::schema::{
    achievements, activities, child_achievements, child_lesson_progress, child_module_progress,
    children, companies, company_transactions, lessons, modules, parents, quiz_attempts,
    quiz_questions, sessions, track_submissions, users,
};
use chrono::{NaiveDate, NaiveDateTime};
use diesel::prelude::*;

#[derive(Debug, Clone, Queryable, Identifiable, Selectable)]
#[diesel(table_name = users)]
pub struct User {
    pub id: String,
    pub email: String,
    pub display_name: String,
    pub password_hash: String,
    pub role: String,
    pub created_at: NaiveDateTime,
    pub deleted_at: Option<NaiveDateTime>,
}

#[derive(Insertable)]
#[diesel(table_name = users)]
pub struct NewUser<'a> {
    pub id: &'a str,
    pub email: &'a str,
    pub display_name: &'a str,
    pub password_hash: &'a str,
    pub role: &'a str,
}

#[derive(Debug, Clone, Queryable, Identifiable, Selectable)]
#[diesel(table_name = parents)]
#[diesel(primary_key(user_id))]
pub struct Parent {
    pub user_id: String,
    pub subscription_tier: String,
    pub subscription_status: String,
    pub trial_ends_at: Option<NaiveDateTime>,
    pub updated_at: NaiveDateTime,
}

#[derive(Insertable)]
#[diesel(table_name = parents)]
pub struct NewParent<'a> {
    pub user_id: &'a str,
    pub subscription_tier: &'a str,
    pub subscription_status: &'a str,
    pub trial_ends_at: Option<NaiveDateTime>,
}

#[derive(Debug, Clone, Queryable, Identifiable, Selectable)]
#[diesel(table_name = children)]
pub struct Child {
    pub id: String,
    pub parent_id: String,
    pub name: String,
    pub access_code: String,
    pub total_xp: i64,
    pub level: i32,
    pub streak_days: i32,
    pub last_active_on: Option<NaiveDate>,
    pub created_at: NaiveDateTime,
    pub deleted_at: Option<NaiveDateTime>,
}

#[derive(Insertable)]
#[diesel(table_name = children)]
pub struct NewChild<'a> {
    pub id: &'a str,
    pub parent_id: &'a str,
    pub name: &'a str,
    pub access_code: &'a str,
}

#[derive(Debug, Clone, Queryable, Identifiable, Selectable)]
#[diesel(table_name = modules)]
pub struct Module {
    pub id: i32,
    pub slug: String,
    pub title: String,
    pub description: String,
    pub order_index: i32,
    pub is_published: bool,
    pub published_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
}

#[derive(Insertable)]
#[diesel(table_name = modules)]
pub struct NewModule<'a> {
    pub slug: &'a str,
    pub title: &'a str,
    pub description: &'a str,
    pub order_index: i32,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations, Selectable)]
#[diesel(table_name = lessons)]
#[diesel(belongs_to(Module, foreign_key = module_id))]
pub struct Lesson {
    pub id: i32,
    pub module_id: i32,
    pub title: String,
    pub content: String,
    pub xp_reward: i32,
    pub order_index: i32,
}

#[derive(Insertable)]
#[diesel(table_name = lessons)]
pub struct NewLesson<'a> {
    pub module_id: i32,
    pub title: &'a str,
    pub content: &'a str,
    pub xp_reward: i32,
    pub order_index: i32,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations, Selectable)]
#[diesel(table_name = quiz_questions)]
#[diesel(belongs_to(Lesson, foreign_key = lesson_id))]
pub struct QuizQuestion {
    pub id: i32,
    pub lesson_id: i32,
    pub prompt: String,
    /// JSON array of option labels.
    pub options: String,
    pub correct_index: i32,
    pub explanation: String,
    pub order_index: i32,
}

impl QuizQuestion {
    pub fn option_list(&self) -> Vec<String> {
        serde_json::from_str(&self.options).unwrap_or_default()
    }
}

#[derive(Insertable)]
#[diesel(table_name = quiz_questions)]
pub struct NewQuizQuestion<'a> {
    pub lesson_id: i32,
    pub prompt: &'a str,
    pub options: &'a str,
    pub correct_index: i32,
    pub explanation: &'a str,
    pub order_index: i32,
}

#[derive(Insertable)]
#[diesel(table_name = quiz_attempts)]
pub struct NewQuizAttempt<'a> {
    pub child_id: &'a str,
    pub question_id: i32,
    pub selected_index: i32,
    pub is_correct: bool,
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = child_lesson_progress)]
pub struct LessonProgress {
    pub child_id: String,
    pub lesson_id: i32,
    pub score_percent: i32,
    pub completed_at: NaiveDateTime,
}

#[derive(Insertable)]
#[diesel(table_name = child_lesson_progress)]
pub struct NewLessonProgress<'a> {
    pub child_id: &'a str,
    pub lesson_id: i32,
    pub score_percent: i32,
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = child_module_progress)]
pub struct ModuleProgress {
    pub child_id: String,
    pub module_id: i32,
    pub completed_lessons: i64,
    pub total_lessons: i64,
    pub completion_percent: i32,
    pub completed_at: Option<NaiveDateTime>,
    pub updated_at: NaiveDateTime,
}

#[derive(Insertable)]
#[diesel(table_name = child_module_progress)]
pub struct NewModuleProgress<'a> {
    pub child_id: &'a str,
    pub module_id: i32,
    pub completed_lessons: i64,
    pub total_lessons: i64,
    pub completion_percent: i32,
    pub completed_at: Option<NaiveDateTime>,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable, Identifiable, Selectable)]
#[diesel(table_name = companies)]
pub struct Company {
    pub id: i32,
    pub child_id: String,
    pub name: String,
    pub balance_cents: i64,
    pub total_revenue_cents: i64,
    pub total_expenses_cents: i64,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Insertable)]
#[diesel(table_name = companies)]
pub struct NewCompany<'a> {
    pub child_id: &'a str,
    pub name: &'a str,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations, Selectable)]
#[diesel(table_name = company_transactions)]
#[diesel(belongs_to(Company, foreign_key = company_id))]
pub struct CompanyTransaction {
    pub id: i32,
    pub company_id: i32,
    pub kind: String,
    pub amount_cents: i64,
    pub description: String,
    pub created_at: NaiveDateTime,
}

#[derive(Insertable)]
#[diesel(table_name = company_transactions)]
pub struct NewCompanyTransaction<'a> {
    pub company_id: i32,
    pub kind: &'a str,
    pub amount_cents: i64,
    pub description: &'a str,
}

#[derive(Debug, Clone, Queryable, Identifiable, Selectable)]
#[diesel(table_name = achievements)]
pub struct Achievement {
    pub id: String,
    pub name: String,
    pub description: String,
    pub rule_kind: String,
    pub threshold: i64,
}

#[derive(Insertable)]
#[diesel(table_name = achievements)]
pub struct NewAchievement<'a> {
    pub id: &'a str,
    pub name: &'a str,
    pub description: &'a str,
    pub rule_kind: &'a str,
    pub threshold: i64,
}

#[derive(Insertable)]
#[diesel(table_name = child_achievements)]
pub struct NewChildAchievement<'a> {
    pub child_id: &'a str,
    pub achievement_id: &'a str,
}

#[derive(Debug, Clone, Queryable, Identifiable, Selectable)]
#[diesel(table_name = activities)]
pub struct Activity {
    pub id: i32,
    pub child_id: String,
    pub kind: String,
    pub description: String,
    pub xp_delta: i64,
    pub created_at: NaiveDateTime,
}

#[derive(Insertable)]
#[diesel(table_name = activities)]
pub struct NewActivity<'a> {
    pub child_id: &'a str,
    pub kind: &'a str,
    pub description: &'a str,
    pub xp_delta: i64,
}

#[derive(Debug, Clone, Queryable, Identifiable, Selectable)]
#[diesel(table_name = track_submissions)]
pub struct TrackSubmission {
    pub id: i32,
    pub child_id: String,
    pub module_id: i32,
    pub content: String,
    pub status: String,
    pub submitted_at: NaiveDateTime,
    pub reviewed_by: Option<String>,
    pub reviewed_at: Option<NaiveDateTime>,
}

#[derive(Insertable)]
#[diesel(table_name = track_submissions)]
pub struct NewTrackSubmission<'a> {
    pub child_id: &'a str,
    pub module_id: i32,
    pub content: &'a str,
}

#[derive(Debug, Clone, Queryable, Identifiable, Selectable)]
#[diesel(table_name = sessions)]
#[diesel(primary_key(jti))]
pub struct Session {
    pub jti: String,
    pub subject: String,
    pub issued_at: NaiveDateTime,
    pub last_used_at: NaiveDateTime,
}

#[derive(Insertable)]
#[diesel(table_name = sessions)]
pub struct NewSession<'a> {
    pub jti: &'a str,
    pub subject: &'a str,
}
