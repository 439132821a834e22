//! Child progress: quiz attempts, lesson/module completion, XP, streaks,
//! achievements, activity log and track submissions.

use std::collections::{HashMap, HashSet};

use chrono::{Datelike, NaiveDate, NaiveDateTime, Utc};
use diesel::dsl::count_star;
use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;
use kidbiz_shared::domain::{
    AchievementKind, ChildStats, completion_percent, level_for_xp, next_streak,
};
use tracing::{debug, info, trace};

use super::models::{
    Achievement, Activity, Child, Lesson, LessonProgress, NewActivity, NewChildAchievement,
    NewLessonProgress, NewModuleProgress, NewQuizAttempt, NewTrackSubmission, TrackSubmission,
};
use super::{Store, StorageError, schema};

/// Result of one `award_achievements_and_xp` call.
#[derive(Debug, Clone)]
pub struct AwardOutcome {
    pub total_xp: i64,
    pub level: i32,
    pub streak_days: i32,
    pub new_achievements: Vec<(Achievement, NaiveDateTime)>,
}

#[derive(Debug, Clone)]
pub struct CompletionOutcome {
    pub score_percent: i32,
    pub already_completed: bool,
    pub xp_awarded: i64,
    pub module_completion_percent: i32,
    pub award: AwardOutcome,
}

#[derive(Debug, Clone)]
pub struct SubmissionRow {
    pub submission: TrackSubmission,
    pub child_name: String,
    pub module_title: String,
}

impl Store {
    pub async fn record_quiz_attempt(
        &self,
        child: &str,
        question: i32,
        selected: i32,
        correct: bool,
    ) -> Result<(), StorageError> {
        let child = child.to_string();
        self.with_conn(move |conn| {
            let row = NewQuizAttempt {
                child_id: &child,
                question_id: question,
                selected_index: selected,
                is_correct: correct,
            };
            diesel::insert_into(schema::quiz_attempts::table)
                .values(&row)
                .execute(conn)?;
            Ok(())
        })
        .await
    }

    /// Records a finished lesson and everything that follows from it in a
    /// single transaction: lesson progress, module progress, XP, level,
    /// streak, achievements and the activity entry.
    ///
    /// Completing the same lesson again keeps the best score and awards no XP.
    pub async fn complete_lesson(
        &self,
        child: &str,
        lesson: i32,
        score_percent: i32,
        xp_per_level: i64,
    ) -> Result<CompletionOutcome, StorageError> {
        let child = child.to_string();
        trace!(%child, lesson, score_percent, "complete_lesson");
        self.with_conn(move |conn| {
            use schema::{child_lesson_progress as clp, lessons};
            conn.immediate_transaction(|conn| -> Result<CompletionOutcome, StorageError> {
                let lesson_row = lessons::table
                    .filter(lessons::id.eq(lesson))
                    .select(Lesson::as_select())
                    .first::<Lesson>(conn)
                    .optional()?
                    .ok_or_else(|| StorageError::NotFound(format!("lesson {lesson}")))?;

                let existing = clp::table
                    .filter(clp::child_id.eq(&child))
                    .filter(clp::lesson_id.eq(lesson))
                    .select(LessonProgress::as_select())
                    .first::<LessonProgress>(conn)
                    .optional()?;

                let (already_completed, xp_awarded) = match existing {
                    Some(prev) => {
                        if score_percent > prev.score_percent {
                            diesel::update(
                                clp::table
                                    .filter(clp::child_id.eq(&child))
                                    .filter(clp::lesson_id.eq(lesson)),
                            )
                            .set(clp::score_percent.eq(score_percent))
                            .execute(conn)?;
                        }
                        (true, 0)
                    }
                    None => {
                        diesel::insert_into(clp::table)
                            .values(&NewLessonProgress {
                                child_id: &child,
                                lesson_id: lesson,
                                score_percent,
                            })
                            .execute(conn)?;
                        (false, i64::from(lesson_row.xp_reward))
                    }
                };

                // Module first so module-based achievements see this lesson
                let module_completion_percent =
                    recompute_module_progress(conn, &child, lesson_row.module_id)?;

                let award = award_in_tx(conn, &child, xp_awarded, xp_per_level)?;

                let (kind, description) = if already_completed {
                    (
                        "lesson_repeated",
                        format!("Repeated \"{}\" ({score_percent}%)", lesson_row.title),
                    )
                } else {
                    (
                        "lesson_completed",
                        format!("Completed \"{}\" ({score_percent}%)", lesson_row.title),
                    )
                };
                insert_activity(conn, &child, kind, &description, xp_awarded)?;
                for (a, _) in &award.new_achievements {
                    insert_activity(
                        conn,
                        &child,
                        "achievement",
                        &format!("Earned \"{}\"", a.name),
                        0,
                    )?;
                }

                Ok(CompletionOutcome {
                    score_percent,
                    already_completed,
                    xp_awarded,
                    module_completion_percent,
                    award,
                })
            })
        })
        .await
    }

    /// Adds `xp` to the child, recomputes level and streak and awards every
    /// achievement whose threshold is now met.
    pub async fn award_achievements_and_xp(
        &self,
        child: &str,
        xp: i64,
        xp_per_level: i64,
    ) -> Result<AwardOutcome, StorageError> {
        if xp < 0 {
            return Err(StorageError::InvalidInput("xp must not be negative".into()));
        }
        let child = child.to_string();
        self.with_conn(move |conn| {
            conn.immediate_transaction(|conn| award_in_tx(conn, &child, xp, xp_per_level))
        })
        .await
    }

    pub async fn child_stats(&self, child: &str) -> Result<ChildStats, StorageError> {
        let child = child.to_string();
        self.with_conn(move |conn| {
            use schema::children;
            let row = children::table
                .filter(children::id.eq(&child))
                .select(Child::as_select())
                .first::<Child>(conn)
                .optional()?
                .ok_or_else(|| StorageError::NotFound(format!("child {child}")))?;
            collect_stats(conn, &row)
        })
        .await
    }

    /// Completed lesson count per module for one child.
    pub async fn completed_lessons_by_module(
        &self,
        child: &str,
    ) -> Result<HashMap<i32, i64>, StorageError> {
        let child = child.to_string();
        self.with_conn(move |conn| {
            use schema::{child_lesson_progress as clp, lessons};
            Ok(clp::table
                .inner_join(lessons::table)
                .filter(clp::child_id.eq(&child))
                .group_by(lessons::module_id)
                .select((lessons::module_id, count_star()))
                .load::<(i32, i64)>(conn)?
                .into_iter()
                .collect())
        })
        .await
    }

    pub async fn lesson_progress_for(
        &self,
        child: &str,
        module: i32,
    ) -> Result<HashMap<i32, LessonProgress>, StorageError> {
        let child = child.to_string();
        self.with_conn(move |conn| {
            use schema::{child_lesson_progress as clp, lessons};
            Ok(clp::table
                .inner_join(lessons::table)
                .filter(clp::child_id.eq(&child))
                .filter(lessons::module_id.eq(module))
                .select(LessonProgress::as_select())
                .load::<LessonProgress>(conn)?
                .into_iter()
                .map(|p| (p.lesson_id, p))
                .collect())
        })
        .await
    }

    /// Achievements a child holds, oldest first.
    pub async fn child_achievements(
        &self,
        child: &str,
    ) -> Result<Vec<(Achievement, NaiveDateTime)>, StorageError> {
        let child = child.to_string();
        self.with_conn(move |conn| {
            use schema::{achievements, child_achievements as ca};
            Ok(ca::table
                .inner_join(achievements::table)
                .filter(ca::child_id.eq(&child))
                .order(ca::awarded_at.asc())
                .select((Achievement::as_select(), ca::awarded_at))
                .load::<(Achievement, NaiveDateTime)>(conn)?)
        })
        .await
    }

    /// Most recent activity entries, newest first.
    pub async fn list_activities(
        &self,
        child: &str,
        limit: i64,
    ) -> Result<Vec<Activity>, StorageError> {
        let child = child.to_string();
        self.with_conn(move |conn| {
            use schema::activities::dsl::*;
            Ok(activities
                .filter(child_id.eq(&child))
                .order((created_at.desc(), id.desc()))
                .limit(limit.clamp(1, 500))
                .select(Activity::as_select())
                .load::<Activity>(conn)?)
        })
        .await
    }

    pub async fn submit_track(
        &self,
        child: &str,
        module: i32,
        content_: &str,
    ) -> Result<TrackSubmission, StorageError> {
        let content_ = content_.trim().to_string();
        if content_.is_empty() {
            return Err(StorageError::InvalidInput("content is required".into()));
        }
        let child = child.to_string();
        self.with_conn(move |conn| {
            use schema::{modules, track_submissions};
            conn.immediate_transaction(|conn| -> Result<TrackSubmission, StorageError> {
                let published: Option<bool> = modules::table
                    .filter(modules::id.eq(module))
                    .select(modules::is_published)
                    .first(conn)
                    .optional()?;
                if published != Some(true) {
                    return Err(StorageError::NotFound(format!("module {module}")));
                }
                let row = diesel::insert_into(track_submissions::table)
                    .values(&NewTrackSubmission {
                        child_id: &child,
                        module_id: module,
                        content: &content_,
                    })
                    .returning(TrackSubmission::as_returning())
                    .get_result::<TrackSubmission>(conn)?;
                insert_activity(conn, &child, "track_submitted", "Submitted track work", 0)?;
                Ok(row)
            })
        })
        .await
    }

    /// Submissions visible to a reviewer. `parent` narrows the list to that
    /// parent's children; `child` to one child.
    pub async fn list_submissions(
        &self,
        parent: Option<&str>,
        child: Option<&str>,
        pending_only: bool,
    ) -> Result<Vec<SubmissionRow>, StorageError> {
        let parent = parent.map(str::to_string);
        let child = child.map(str::to_string);
        self.with_conn(move |conn| {
            use schema::{children, modules, track_submissions as ts};
            let mut q = ts::table
                .inner_join(children::table)
                .inner_join(modules::table)
                .into_boxed();
            if let Some(p) = parent {
                q = q.filter(children::parent_id.eq(p));
            }
            if let Some(c) = child {
                q = q.filter(ts::child_id.eq(c));
            }
            if pending_only {
                q = q.filter(ts::status.eq("pending"));
            }
            let rows = q
                .order(ts::submitted_at.desc())
                .select((TrackSubmission::as_select(), children::name, modules::title))
                .load::<(TrackSubmission, String, String)>(conn)?;
            Ok(rows
                .into_iter()
                .map(|(submission, child_name, module_title)| SubmissionRow {
                    submission,
                    child_name,
                    module_title,
                })
                .collect())
        })
        .await
    }

    /// Approves or rejects a pending submission. A parent reviewer may only
    /// touch submissions of their own children.
    pub async fn review_submission(
        &self,
        submission: i32,
        reviewer: &str,
        owner: Option<&str>,
        approve: bool,
    ) -> Result<SubmissionRow, StorageError> {
        let reviewer = reviewer.to_string();
        let owner = owner.map(str::to_string);
        self.with_conn(move |conn| {
            use schema::{children, modules, track_submissions as ts};
            conn.immediate_transaction(|conn| -> Result<SubmissionRow, StorageError> {
                let (current, child_name, parent_id, module_title) = ts::table
                    .inner_join(children::table)
                    .inner_join(modules::table)
                    .filter(ts::id.eq(submission))
                    .select((
                        TrackSubmission::as_select(),
                        children::name,
                        children::parent_id,
                        modules::title,
                    ))
                    .first::<(TrackSubmission, String, String, String)>(conn)
                    .optional()?
                    .ok_or_else(|| StorageError::NotFound(format!("submission {submission}")))?;
                if owner.as_deref().is_some_and(|o| o != parent_id) {
                    return Err(StorageError::NotFound(format!("submission {submission}")));
                }
                if current.status != "pending" {
                    return Err(StorageError::Conflict(format!(
                        "submission already {}",
                        current.status
                    )));
                }
                let status = if approve { "approved" } else { "rejected" };
                let updated = diesel::update(ts::table.filter(ts::id.eq(submission)))
                    .set((
                        ts::status.eq(status),
                        ts::reviewed_by.eq(Some(reviewer.as_str())),
                        ts::reviewed_at.eq(Some(Utc::now().naive_utc())),
                    ))
                    .returning(TrackSubmission::as_returning())
                    .get_result::<TrackSubmission>(conn)?;
                insert_activity(
                    conn,
                    &updated.child_id,
                    "track_reviewed",
                    &format!("Track work for \"{module_title}\" {status}"),
                    0,
                )?;
                Ok(SubmissionRow {
                    submission: updated,
                    child_name,
                    module_title,
                })
            })
        })
        .await
    }
}

/// Recounts completed lessons of a module for one child and upserts the
/// progress row. `completed_at` is stamped the first time it reaches 100%.
fn recompute_module_progress(
    conn: &mut SqliteConnection,
    child: &str,
    module: i32,
) -> Result<i32, StorageError> {
    use schema::{child_lesson_progress as clp, child_module_progress as cmp, lessons};

    let total: i64 = lessons::table
        .filter(lessons::module_id.eq(module))
        .count()
        .get_result(conn)?;
    let done: i64 = clp::table
        .inner_join(lessons::table)
        .filter(clp::child_id.eq(child))
        .filter(lessons::module_id.eq(module))
        .count()
        .get_result(conn)?;
    let pct = completion_percent(done, total);
    let now = Utc::now().naive_utc();
    let prev_completed: Option<Option<NaiveDateTime>> = cmp::table
        .filter(cmp::child_id.eq(child))
        .filter(cmp::module_id.eq(module))
        .select(cmp::completed_at)
        .first(conn)
        .optional()?;
    let completed_at = prev_completed
        .flatten()
        .or_else(|| (pct >= 100).then_some(now));

    let row = NewModuleProgress {
        child_id: child,
        module_id: module,
        completed_lessons: done,
        total_lessons: total,
        completion_percent: pct,
        completed_at,
        updated_at: now,
    };
    diesel::insert_into(cmp::table)
        .values(&row)
        .on_conflict((cmp::child_id, cmp::module_id))
        .do_update()
        .set((
            cmp::completed_lessons.eq(done),
            cmp::total_lessons.eq(total),
            cmp::completion_percent.eq(pct),
            cmp::completed_at.eq(completed_at),
            cmp::updated_at.eq(now),
        ))
        .execute(conn)?;
    debug!(%child, module, done, total, pct, "module progress");
    Ok(pct)
}

/// Recomputes the progress row of every child tracked in `module`. Run after
/// the module gains or loses a lesson.
pub(super) fn refresh_module_progress(
    conn: &mut SqliteConnection,
    module: i32,
) -> Result<usize, StorageError> {
    use schema::child_module_progress as cmp;

    let tracked: Vec<String> = cmp::table
        .filter(cmp::module_id.eq(module))
        .select(cmp::child_id)
        .load(conn)?;
    for child in &tracked {
        recompute_module_progress(conn, child, module)?;
    }
    Ok(tracked.len())
}

fn collect_stats(conn: &mut SqliteConnection, child: &Child) -> Result<ChildStats, StorageError> {
    use schema::{child_lesson_progress as clp, child_module_progress as cmp, companies};

    let lessons_completed: i64 = clp::table
        .filter(clp::child_id.eq(&child.id))
        .count()
        .get_result(conn)?;
    let modules_completed: i64 = cmp::table
        .filter(cmp::child_id.eq(&child.id))
        .filter(cmp::completion_percent.ge(100))
        .count()
        .get_result(conn)?;
    let company_revenue_cents: i64 = companies::table
        .filter(companies::child_id.eq(&child.id))
        .select(companies::total_revenue_cents)
        .first(conn)
        .optional()?
        .unwrap_or(0);
    Ok(ChildStats {
        lessons_completed,
        modules_completed,
        total_xp: child.total_xp,
        streak_days: i64::from(child.streak_days),
        company_revenue_cents,
    })
}

pub(super) fn award_in_tx(
    conn: &mut SqliteConnection,
    child: &str,
    xp: i64,
    xp_per_level: i64,
) -> Result<AwardOutcome, StorageError> {
    use schema::{achievements, child_achievements as ca, children};

    let current = children::table
        .filter(children::id.eq(child))
        .filter(children::deleted_at.is_null())
        .select(Child::as_select())
        .first::<Child>(conn)
        .optional()?
        .ok_or_else(|| StorageError::NotFound(format!("child {child}")))?;

    let today = Utc::now().date_naive();
    let streak = next_streak(
        current.last_active_on.map(day_number),
        day_number(today),
        current.streak_days,
    );
    let total_xp = current.total_xp + xp.max(0);
    let level = level_for_xp(total_xp, xp_per_level);

    let updated = diesel::update(children::table.filter(children::id.eq(child)))
        .set((
            children::total_xp.eq(total_xp),
            children::level.eq(level),
            children::streak_days.eq(streak),
            children::last_active_on.eq(Some(today)),
        ))
        .returning(Child::as_returning())
        .get_result::<Child>(conn)?;

    let stats = collect_stats(conn, &updated)?;
    let held: HashSet<String> = ca::table
        .filter(ca::child_id.eq(child))
        .select(ca::achievement_id)
        .load::<String>(conn)?
        .into_iter()
        .collect();
    let catalog = achievements::table
        .order(achievements::id.asc())
        .select(Achievement::as_select())
        .load::<Achievement>(conn)?;

    let now = Utc::now().naive_utc();
    let mut new_achievements = Vec::new();
    for rule in catalog {
        if held.contains(&rule.id) {
            continue;
        }
        let Some(kind) = AchievementKind::parse(&rule.rule_kind) else {
            debug!(id = %rule.id, kind = %rule.rule_kind, "unknown achievement rule kind");
            continue;
        };
        if !stats.satisfies(kind, rule.threshold) {
            continue;
        }
        diesel::insert_into(ca::table)
            .values(&NewChildAchievement {
                child_id: child,
                achievement_id: &rule.id,
            })
            .on_conflict_do_nothing()
            .execute(conn)?;
        info!(%child, achievement = %rule.id, "achievement awarded");
        new_achievements.push((rule, now));
    }

    Ok(AwardOutcome {
        total_xp,
        level,
        streak_days: streak,
        new_achievements,
    })
}

pub(super) fn insert_activity(
    conn: &mut SqliteConnection,
    child: &str,
    kind: &str,
    description: &str,
    xp_delta: i64,
) -> Result<(), StorageError> {
    diesel::insert_into(schema::activities::table)
        .values(&NewActivity {
            child_id: child,
            kind,
            description,
            xp_delta,
        })
        .execute(conn)?;
    Ok(())
}

fn day_number(d: NaiveDate) -> i64 {
    i64::from(d.num_days_from_ce())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn day_numbers_are_consecutive() {
        let a = NaiveDate::from_ymd_opt(2026, 2, 28).unwrap();
        let b = NaiveDate::from_ymd_opt(2026, 3, 1).unwrap();
        assert_eq!(day_number(b) - day_number(a), 1);
    }
}
