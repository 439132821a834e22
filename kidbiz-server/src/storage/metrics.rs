use diesel::prelude::*;
use kidbiz_shared::api::SystemMetricsDto;

use super::models::Parent;
use super::users::subscription_grants_access;
use super::{Store, StorageError, schema};

impl Store {
    /// Aggregates the system-wide counters shown on the admin dashboard.
    /// `refreshed_at` is left for the caller to stamp.
    pub async fn system_metrics(&self) -> Result<SystemMetricsDto, StorageError> {
        self.with_conn(move |conn| {
            use schema::{
                child_lesson_progress, child_module_progress, children, companies, lessons,
                modules, parents, track_submissions, users,
            };
            let total_users: i64 = users::table
                .filter(users::deleted_at.is_null())
                .count()
                .get_result(conn)?;
            let live_parents = parents::table
                .inner_join(users::table)
                .filter(users::deleted_at.is_null())
                .select(Parent::as_select())
                .load::<Parent>(conn)?;
            let active_subscriptions = live_parents
                .iter()
                .filter(|p| subscription_grants_access(p))
                .count() as i64;
            let total_children: i64 = children::table
                .filter(children::deleted_at.is_null())
                .count()
                .get_result(conn)?;
            let total_modules: i64 = modules::table.count().get_result(conn)?;
            let published_modules: i64 = modules::table
                .filter(modules::is_published.eq(true))
                .count()
                .get_result(conn)?;
            let total_lessons: i64 = lessons::table.count().get_result(conn)?;
            let lessons_completed: i64 = child_lesson_progress::table.count().get_result(conn)?;
            let modules_completed: i64 = child_module_progress::table
                .filter(child_module_progress::completion_percent.ge(100))
                .count()
                .get_result(conn)?;
            let totals = companies::table
                .select((companies::total_revenue_cents, companies::total_expenses_cents))
                .load::<(i64, i64)>(conn)?;
            let total_companies = totals.len() as i64;
            let (revenue, expenses) = totals
                .iter()
                .fold((0i64, 0i64), |(r, e), (tr, te)| {
                    (r.saturating_add(*tr), e.saturating_add(*te))
                });
            let pending_submissions: i64 = track_submissions::table
                .filter(track_submissions::status.eq("pending"))
                .count()
                .get_result(conn)?;
            Ok(SystemMetricsDto {
                total_users,
                total_parents: live_parents.len() as i64,
                total_children,
                active_subscriptions,
                total_modules,
                published_modules,
                total_lessons,
                lessons_completed,
                modules_completed,
                total_companies,
                total_revenue_cents: revenue,
                total_expenses_cents: expenses,
                pending_submissions,
                refreshed_at: None,
            })
        })
        .await
    }
}
