//! Authored content: modules, lessons and quiz questions.

use chrono::Utc;
use diesel::dsl::{count_star, max};
use diesel::prelude::*;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use tracing::{trace, warn};

use super::learning::refresh_module_progress;
use super::models::{Lesson, Module, NewLesson, NewModule, NewQuizQuestion, QuizQuestion};
use super::{Store, StorageError, conflict_on_unique, schema};

#[derive(Debug, Clone)]
pub struct ModuleWithCount {
    pub module: Module,
    pub lesson_count: i64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ModuleDeletion {
    pub lessons: usize,
    pub questions: usize,
    pub attempts: usize,
}

/// Hint returned when a plain module delete trips over dependent rows.
pub(crate) const MODULE_FK_HINT: &str = "lessons, quiz questions or progress rows still reference this module; \
     delete them first or retry with mode=safe, e.g. \
     DELETE FROM quiz_attempts WHERE question_id IN (SELECT id FROM quiz_questions WHERE lesson_id IN (SELECT id FROM lessons WHERE module_id = ?)); \
     DELETE FROM quiz_questions WHERE lesson_id IN (SELECT id FROM lessons WHERE module_id = ?); \
     DELETE FROM lessons WHERE module_id = ?;";

impl Store {
    /// All modules ordered for display, each with its lesson total.
    /// Published-only listing is what children see.
    pub async fn list_modules(
        &self,
        published_only: bool,
    ) -> Result<Vec<ModuleWithCount>, StorageError> {
        self.with_conn(move |conn| {
            use schema::{lessons, modules};
            let mut q = modules::table.into_boxed();
            if published_only {
                q = q.filter(modules::is_published.eq(true));
            }
            let rows = q
                .order((modules::order_index.asc(), modules::id.asc()))
                .select(Module::as_select())
                .load::<Module>(conn)?;
            // One grouped count instead of a query per module
            let counts: std::collections::HashMap<i32, i64> = lessons::table
                .group_by(lessons::module_id)
                .select((lessons::module_id, count_star()))
                .load::<(i32, i64)>(conn)?
                .into_iter()
                .collect();
            Ok(rows
                .into_iter()
                .map(|m| {
                    let lesson_count = counts.get(&m.id).copied().unwrap_or(0);
                    ModuleWithCount {
                        module: m,
                        lesson_count,
                    }
                })
                .collect())
        })
        .await
    }

    pub async fn get_module(&self, module_id: i32) -> Result<Option<Module>, StorageError> {
        self.with_conn(move |conn| {
            use schema::modules::dsl::*;
            Ok(modules
                .filter(id.eq(module_id))
                .select(Module::as_select())
                .first::<Module>(conn)
                .optional()?)
        })
        .await
    }

    pub async fn create_module(
        &self,
        title: &str,
        description: &str,
        order_index: Option<i32>,
    ) -> Result<Module, StorageError> {
        let title = title.trim().to_string();
        if title.is_empty() {
            return Err(StorageError::InvalidInput("title is required".into()));
        }
        let slug = slug::slugify(&title);
        let description = description.to_string();
        trace!(%slug, "create_module");
        self.with_conn(move |conn| {
            use schema::modules;
            let order_index = match order_index {
                Some(v) => v,
                None => next_index(
                    modules::table
                        .select(max(modules::order_index))
                        .first::<Option<i32>>(conn)?,
                ),
            };
            let row = NewModule {
                slug: &slug,
                title: &title,
                description: &description,
                order_index,
            };
            diesel::insert_into(modules::table)
                .values(&row)
                .returning(Module::as_returning())
                .get_result::<Module>(conn)
                .map_err(|e| conflict_on_unique(e, "module slug"))
        })
        .await
    }

    pub async fn update_module(
        &self,
        module_id: i32,
        title: &str,
        description: &str,
        order_index: Option<i32>,
    ) -> Result<Module, StorageError> {
        let title = title.trim().to_string();
        if title.is_empty() {
            return Err(StorageError::InvalidInput("title is required".into()));
        }
        let description = description.to_string();
        self.with_conn(move |conn| {
            use schema::modules::dsl as m;
            let current = m::modules
                .filter(m::id.eq(module_id))
                .select(Module::as_select())
                .first::<Module>(conn)
                .optional()?
                .ok_or_else(|| StorageError::NotFound(format!("module {module_id}")))?;
            diesel::update(m::modules.filter(m::id.eq(module_id)))
                .set((
                    m::title.eq(&title),
                    m::description.eq(&description),
                    m::order_index.eq(order_index.unwrap_or(current.order_index)),
                ))
                .returning(Module::as_returning())
                .get_result::<Module>(conn)
                .map_err(StorageError::from)
        })
        .await
    }

    /// Publishing stamps `published_at`; unpublishing clears it.
    pub async fn set_module_published(
        &self,
        module_id: i32,
        published: bool,
    ) -> Result<Module, StorageError> {
        self.with_conn(move |conn| {
            use schema::modules::dsl as m;
            let stamp = published.then(|| Utc::now().naive_utc());
            diesel::update(m::modules.filter(m::id.eq(module_id)))
                .set((m::is_published.eq(published), m::published_at.eq(stamp)))
                .returning(Module::as_returning())
                .get_result::<Module>(conn)
                .optional()?
                .ok_or_else(|| StorageError::NotFound(format!("module {module_id}")))
        })
        .await
    }

    /// Removes a module together with everything that hangs off it, in one
    /// transaction: attempts, questions, progress, submissions, lessons.
    pub async fn delete_module_cascade(
        &self,
        module_id: i32,
    ) -> Result<ModuleDeletion, StorageError> {
        self.with_conn(move |conn| {
            use schema::{
                child_lesson_progress as clp, child_module_progress as cmp, lessons, modules,
                quiz_attempts as qa, quiz_questions as qq, track_submissions as ts,
            };
            conn.immediate_transaction(|conn| -> Result<ModuleDeletion, StorageError> {
                let exists: i64 = modules::table
                    .filter(modules::id.eq(module_id))
                    .count()
                    .get_result(conn)?;
                if exists == 0 {
                    return Err(StorageError::NotFound(format!("module {module_id}")));
                }
                let lesson_ids = lessons::table
                    .filter(lessons::module_id.eq(module_id))
                    .select(lessons::id);
                let question_ids = qq::table
                    .filter(qq::lesson_id.eq_any(lesson_ids))
                    .select(qq::id);
                let attempts =
                    diesel::delete(qa::table.filter(qa::question_id.eq_any(question_ids)))
                        .execute(conn)?;
                let questions =
                    diesel::delete(qq::table.filter(qq::lesson_id.eq_any(lesson_ids)))
                        .execute(conn)?;
                diesel::delete(clp::table.filter(clp::lesson_id.eq_any(lesson_ids)))
                    .execute(conn)?;
                diesel::delete(cmp::table.filter(cmp::module_id.eq(module_id))).execute(conn)?;
                diesel::delete(ts::table.filter(ts::module_id.eq(module_id))).execute(conn)?;
                let lessons_deleted =
                    diesel::delete(lessons::table.filter(lessons::module_id.eq(module_id)))
                        .execute(conn)?;
                diesel::delete(modules::table.filter(modules::id.eq(module_id))).execute(conn)?;
                Ok(ModuleDeletion {
                    lessons: lessons_deleted,
                    questions,
                    attempts,
                })
            })
        })
        .await
    }

    /// Deletes the module row only. Fails with [`StorageError::ForeignKey`]
    /// while dependent rows exist.
    pub async fn delete_module_simple(&self, module_id: i32) -> Result<(), StorageError> {
        self.with_conn(move |conn| {
            use schema::modules::dsl as m;
            match diesel::delete(m::modules.filter(m::id.eq(module_id))).execute(conn) {
                Ok(0) => Err(StorageError::NotFound(format!("module {module_id}"))),
                Ok(_) => Ok(()),
                Err(DieselError::DatabaseError(kind, info))
                    if matches!(kind, DatabaseErrorKind::ForeignKeyViolation)
                        || info.message().contains("FOREIGN KEY") =>
                {
                    warn!(module_id, detail = %info.message(), "module delete blocked by dependents");
                    Err(StorageError::ForeignKey {
                        table: "modules".into(),
                        hint: MODULE_FK_HINT.replace('?', &module_id.to_string()),
                    })
                }
                Err(e) => Err(e.into()),
            }
        })
        .await
    }

    pub async fn list_lessons(&self, module: i32) -> Result<Vec<Lesson>, StorageError> {
        self.with_conn(move |conn| {
            use schema::lessons::dsl::*;
            Ok(lessons
                .filter(module_id.eq(module))
                .order((order_index.asc(), id.asc()))
                .select(Lesson::as_select())
                .load::<Lesson>(conn)?)
        })
        .await
    }

    pub async fn get_lesson(&self, lesson: i32) -> Result<Option<Lesson>, StorageError> {
        self.with_conn(move |conn| {
            use schema::lessons::dsl::*;
            Ok(lessons
                .filter(id.eq(lesson))
                .select(Lesson::as_select())
                .first::<Lesson>(conn)
                .optional()?)
        })
        .await
    }

    /// New lessons go to the end of the module.
    pub async fn create_lesson(
        &self,
        module: i32,
        title: &str,
        content: &str,
        xp_reward: i32,
    ) -> Result<Lesson, StorageError> {
        let title = title.trim().to_string();
        if title.is_empty() {
            return Err(StorageError::InvalidInput("title is required".into()));
        }
        if xp_reward < 0 {
            return Err(StorageError::InvalidInput("xp_reward must not be negative".into()));
        }
        let content = content.to_string();
        self.with_conn(move |conn| {
            use schema::{lessons, modules};
            conn.immediate_transaction(|conn| -> Result<Lesson, StorageError> {
                let exists: i64 = modules::table
                    .filter(modules::id.eq(module))
                    .count()
                    .get_result(conn)?;
                if exists == 0 {
                    return Err(StorageError::NotFound(format!("module {module}")));
                }
                let last = lessons::table
                    .filter(lessons::module_id.eq(module))
                    .select(max(lessons::order_index))
                    .first::<Option<i32>>(conn)?;
                let row = NewLesson {
                    module_id: module,
                    title: &title,
                    content: &content,
                    xp_reward,
                    order_index: next_index(last),
                };
                let lesson = diesel::insert_into(lessons::table)
                    .values(&row)
                    .returning(Lesson::as_returning())
                    .get_result::<Lesson>(conn)?;
                let refreshed = refresh_module_progress(conn, module)?;
                trace!(module, refreshed, "lesson added, module progress refreshed");
                Ok(lesson)
            })
        })
        .await
    }

    pub async fn update_lesson(
        &self,
        lesson: i32,
        title: &str,
        content: Option<&str>,
        xp_reward: Option<i32>,
    ) -> Result<Lesson, StorageError> {
        let title = title.trim().to_string();
        if title.is_empty() {
            return Err(StorageError::InvalidInput("title is required".into()));
        }
        let content = content.map(|s| s.to_string());
        self.with_conn(move |conn| {
            use schema::lessons::dsl as l;
            let current = l::lessons
                .filter(l::id.eq(lesson))
                .select(Lesson::as_select())
                .first::<Lesson>(conn)
                .optional()?
                .ok_or_else(|| StorageError::NotFound(format!("lesson {lesson}")))?;
            Ok(diesel::update(l::lessons.filter(l::id.eq(lesson)))
                .set((
                    l::title.eq(&title),
                    l::content.eq(content.as_deref().unwrap_or(&current.content)),
                    l::xp_reward.eq(xp_reward.unwrap_or(current.xp_reward).max(0)),
                ))
                .returning(Lesson::as_returning())
                .get_result::<Lesson>(conn)?)
        })
        .await
    }

    /// Deletes a lesson with its questions, attempts and progress rows, then
    /// recomputes module progress of every child tracked in its module.
    pub async fn delete_lesson(&self, lesson: i32) -> Result<(), StorageError> {
        self.with_conn(move |conn| {
            use schema::{child_lesson_progress as clp, lessons, quiz_attempts as qa, quiz_questions as qq};
            conn.immediate_transaction(|conn| -> Result<(), StorageError> {
                let module = lessons::table
                    .filter(lessons::id.eq(lesson))
                    .select(lessons::module_id)
                    .first::<i32>(conn)
                    .optional()?
                    .ok_or_else(|| StorageError::NotFound(format!("lesson {lesson}")))?;
                let question_ids = qq::table.filter(qq::lesson_id.eq(lesson)).select(qq::id);
                diesel::delete(qa::table.filter(qa::question_id.eq_any(question_ids)))
                    .execute(conn)?;
                diesel::delete(qq::table.filter(qq::lesson_id.eq(lesson))).execute(conn)?;
                diesel::delete(clp::table.filter(clp::lesson_id.eq(lesson))).execute(conn)?;
                diesel::delete(lessons::table.filter(lessons::id.eq(lesson))).execute(conn)?;
                refresh_module_progress(conn, module)?;
                Ok(())
            })
        })
        .await
    }

    /// Rewrites `order_index` of every lesson in the module to match
    /// `ordered_ids`. The list must name each lesson of the module exactly once.
    pub async fn reorder_lessons(
        &self,
        module: i32,
        ordered_ids: &[i32],
    ) -> Result<Vec<Lesson>, StorageError> {
        let ordered = ordered_ids.to_vec();
        self.with_conn(move |conn| {
            use schema::lessons::dsl as l;
            conn.immediate_transaction(|conn| -> Result<Vec<Lesson>, StorageError> {
                let mut current: Vec<i32> = l::lessons
                    .filter(l::module_id.eq(module))
                    .select(l::id)
                    .load::<i32>(conn)?;
                let mut requested = ordered.clone();
                current.sort_unstable();
                requested.sort_unstable();
                if current != requested {
                    return Err(StorageError::InvalidInput(
                        "lesson_ids must list every lesson of the module exactly once".into(),
                    ));
                }
                for (idx, lesson_id) in ordered.iter().enumerate() {
                    diesel::update(l::lessons.filter(l::id.eq(lesson_id)))
                        .set(l::order_index.eq(idx as i32))
                        .execute(conn)?;
                }
                Ok(l::lessons
                    .filter(l::module_id.eq(module))
                    .order(l::order_index.asc())
                    .select(Lesson::as_select())
                    .load::<Lesson>(conn)?)
            })
        })
        .await
    }

    pub async fn list_questions(&self, lesson: i32) -> Result<Vec<QuizQuestion>, StorageError> {
        self.with_conn(move |conn| {
            use schema::quiz_questions::dsl::*;
            Ok(quiz_questions
                .filter(lesson_id.eq(lesson))
                .order((order_index.asc(), id.asc()))
                .select(QuizQuestion::as_select())
                .load::<QuizQuestion>(conn)?)
        })
        .await
    }

    pub async fn get_question(&self, question: i32) -> Result<Option<QuizQuestion>, StorageError> {
        self.with_conn(move |conn| {
            use schema::quiz_questions::dsl::*;
            Ok(quiz_questions
                .filter(id.eq(question))
                .select(QuizQuestion::as_select())
                .first::<QuizQuestion>(conn)
                .optional()?)
        })
        .await
    }

    pub async fn create_question(
        &self,
        lesson: i32,
        prompt: &str,
        options: &[String],
        correct_index: i32,
        explanation: &str,
    ) -> Result<QuizQuestion, StorageError> {
        validate_question(prompt, options, correct_index)?;
        let prompt = prompt.trim().to_string();
        let options_json = serde_json::to_string(options)
            .map_err(|e| StorageError::InvalidInput(e.to_string()))?;
        let explanation = explanation.to_string();
        self.with_conn(move |conn| {
            use schema::{lessons, quiz_questions as qq};
            conn.immediate_transaction(|conn| -> Result<QuizQuestion, StorageError> {
                let exists: i64 = lessons::table
                    .filter(lessons::id.eq(lesson))
                    .count()
                    .get_result(conn)?;
                if exists == 0 {
                    return Err(StorageError::NotFound(format!("lesson {lesson}")));
                }
                let last = qq::table
                    .filter(qq::lesson_id.eq(lesson))
                    .select(max(qq::order_index))
                    .first::<Option<i32>>(conn)?;
                let row = NewQuizQuestion {
                    lesson_id: lesson,
                    prompt: &prompt,
                    options: &options_json,
                    correct_index,
                    explanation: &explanation,
                    order_index: next_index(last),
                };
                Ok(diesel::insert_into(qq::table)
                    .values(&row)
                    .returning(QuizQuestion::as_returning())
                    .get_result::<QuizQuestion>(conn)?)
            })
        })
        .await
    }

    pub async fn update_question(
        &self,
        question: i32,
        prompt: &str,
        options: &[String],
        correct_index: i32,
        explanation: &str,
    ) -> Result<QuizQuestion, StorageError> {
        validate_question(prompt, options, correct_index)?;
        let prompt = prompt.trim().to_string();
        let options_json = serde_json::to_string(options)
            .map_err(|e| StorageError::InvalidInput(e.to_string()))?;
        let explanation = explanation.to_string();
        self.with_conn(move |conn| {
            use schema::quiz_questions::dsl as qq;
            diesel::update(qq::quiz_questions.filter(qq::id.eq(question)))
                .set((
                    qq::prompt.eq(&prompt),
                    qq::options.eq(&options_json),
                    qq::correct_index.eq(correct_index),
                    qq::explanation.eq(&explanation),
                ))
                .returning(QuizQuestion::as_returning())
                .get_result::<QuizQuestion>(conn)
                .optional()?
                .ok_or_else(|| StorageError::NotFound(format!("question {question}")))
        })
        .await
    }

    pub async fn delete_question(&self, question: i32) -> Result<(), StorageError> {
        self.with_conn(move |conn| {
            use schema::{quiz_attempts as qa, quiz_questions as qq};
            conn.immediate_transaction(|conn| -> Result<(), StorageError> {
                diesel::delete(qa::table.filter(qa::question_id.eq(question))).execute(conn)?;
                let n = diesel::delete(qq::table.filter(qq::id.eq(question))).execute(conn)?;
                if n == 0 {
                    return Err(StorageError::NotFound(format!("question {question}")));
                }
                Ok(())
            })
        })
        .await
    }
}

fn next_index(last: Option<i32>) -> i32 {
    last.map(|v| v.saturating_add(1)).unwrap_or(0)
}

fn validate_question(prompt: &str, options: &[String], correct_index: i32) -> Result<(), StorageError> {
    if prompt.trim().is_empty() {
        return Err(StorageError::InvalidInput("prompt is required".into()));
    }
    if options.len() < 2 {
        return Err(StorageError::InvalidInput(
            "a question needs at least two options".into(),
        ));
    }
    if correct_index < 0 || correct_index as usize >= options.len() {
        return Err(StorageError::InvalidInput(format!(
            "correct_index {correct_index} out of range"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_index_appends_and_saturates() {
        assert_eq!(next_index(None), 0);
        assert_eq!(next_index(Some(4)), 5);
        assert_eq!(next_index(Some(i32::MAX)), i32::MAX);
    }
}
