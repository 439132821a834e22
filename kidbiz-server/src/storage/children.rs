use chrono::{Duration, NaiveDateTime, Utc};
use diesel::prelude::*;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use kidbiz_shared::domain::{format_access_code, generate_access_code};
use tracing::{debug, info};

use super::models::{Child, NewChild};
use super::{Store, StorageError, schema};

/// Attempts at drawing a free access code before giving up.
const ACCESS_CODE_ATTEMPTS: usize = 8;

/// A soft-deleted child still inside (or past) its retention window.
#[derive(Debug, Clone)]
pub struct DeletedChild {
    pub id: String,
    pub name: String,
    pub deleted_at: NaiveDateTime,
}

impl Store {
    pub async fn list_children(&self, parent: &str) -> Result<Vec<Child>, StorageError> {
        let parent = parent.to_string();
        self.with_conn(move |conn| {
            use schema::children::dsl::*;
            Ok(children
                .filter(parent_id.eq(&parent))
                .filter(deleted_at.is_null())
                .order((created_at.asc(), name.asc()))
                .select(Child::as_select())
                .load::<Child>(conn)?)
        })
        .await
    }

    /// Live child by id; soft-deleted children are treated as missing.
    pub async fn get_child(&self, child: &str) -> Result<Option<Child>, StorageError> {
        let child = child.to_string();
        self.with_conn(move |conn| {
            use schema::children::dsl::*;
            Ok(children
                .filter(id.eq(&child))
                .filter(deleted_at.is_null())
                .select(Child::as_select())
                .first::<Child>(conn)
                .optional()?)
        })
        .await
    }

    /// Live child matching the access code in any spelling the user typed.
    pub async fn find_child_by_access_code(
        &self,
        code: &str,
    ) -> Result<Option<Child>, StorageError> {
        let code = format_access_code(code);
        self.with_conn(move |conn| {
            use schema::children::dsl::*;
            Ok(children
                .filter(access_code.eq(&code))
                .filter(deleted_at.is_null())
                .select(Child::as_select())
                .first::<Child>(conn)
                .optional()?)
        })
        .await
    }

    pub async fn create_child(&self, parent: &str, name_: &str) -> Result<Child, StorageError> {
        let name_ = name_.trim().to_string();
        if name_.is_empty() {
            return Err(StorageError::InvalidInput("name is required".into()));
        }
        let parent = parent.to_string();
        self.with_conn(move |conn| {
            use schema::children;
            let child_id = uuid::Uuid::new_v4().to_string();
            for _ in 0..ACCESS_CODE_ATTEMPTS {
                let code = generate_access_code();
                let row = NewChild {
                    id: &child_id,
                    parent_id: &parent,
                    name: &name_,
                    access_code: &code,
                };
                match diesel::insert_into(children::table)
                    .values(&row)
                    .returning(Child::as_returning())
                    .get_result::<Child>(conn)
                {
                    Ok(child) => {
                        info!(child_id = %child.id, parent_id = %parent, "child created");
                        return Ok(child);
                    }
                    Err(DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _)) => {
                        debug!("access code collision, drawing another");
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            Err(StorageError::Conflict(
                "could not allocate a unique access code".into(),
            ))
        })
        .await
    }

    pub async fn rename_child(
        &self,
        parent: &str,
        child: &str,
        new_name: &str,
    ) -> Result<Child, StorageError> {
        let new_name = new_name.trim().to_string();
        if new_name.is_empty() {
            return Err(StorageError::InvalidInput("name is required".into()));
        }
        let parent = parent.to_string();
        let child = child.to_string();
        self.with_conn(move |conn| {
            use schema::children::dsl::*;
            diesel::update(
                children
                    .filter(id.eq(&child))
                    .filter(parent_id.eq(&parent))
                    .filter(deleted_at.is_null()),
            )
            .set(name.eq(&new_name))
            .returning(Child::as_returning())
            .get_result::<Child>(conn)
            .optional()?
            .ok_or_else(|| StorageError::NotFound(format!("child {child}")))
        })
        .await
    }

    /// Marks the child deleted. Its data stays until the retention window
    /// runs out and `purge_deleted_children` removes it.
    pub async fn soft_delete_child(&self, parent: &str, child: &str) -> Result<(), StorageError> {
        let parent = parent.to_string();
        let child = child.to_string();
        self.with_conn(move |conn| {
            use schema::children::dsl::*;
            let now = Utc::now().naive_utc();
            let n = diesel::update(
                children
                    .filter(id.eq(&child))
                    .filter(parent_id.eq(&parent))
                    .filter(deleted_at.is_null()),
            )
            .set(deleted_at.eq(Some(now)))
            .execute(conn)?;
            if n == 0 {
                return Err(StorageError::NotFound(format!("child {child}")));
            }
            Ok(())
        })
        .await
    }

    pub async fn list_deleted_children(
        &self,
        parent: &str,
    ) -> Result<Vec<DeletedChild>, StorageError> {
        let parent = parent.to_string();
        self.with_conn(move |conn| {
            use schema::children::dsl::*;
            let rows = children
                .filter(parent_id.eq(&parent))
                .filter(deleted_at.is_not_null())
                .order(deleted_at.desc())
                .select((id, name, deleted_at))
                .load::<(String, String, Option<NaiveDateTime>)>(conn)?;
            Ok(rows
                .into_iter()
                .filter_map(|(i, n, d)| {
                    d.map(|deleted_at_| DeletedChild {
                        id: i,
                        name: n,
                        deleted_at: deleted_at_,
                    })
                })
                .collect())
        })
        .await
    }

    /// Undoes a soft delete while the retention window is still open.
    pub async fn restore_child(
        &self,
        parent: &str,
        child: &str,
        retention_days: i64,
    ) -> Result<Child, StorageError> {
        let parent = parent.to_string();
        let child = child.to_string();
        self.with_conn(move |conn| {
            use schema::children::dsl::*;
            conn.immediate_transaction(|conn| -> Result<Child, StorageError> {
                let row = children
                    .filter(id.eq(&child))
                    .filter(parent_id.eq(&parent))
                    .select(Child::as_select())
                    .first::<Child>(conn)
                    .optional()?
                    .ok_or_else(|| StorageError::NotFound(format!("child {child}")))?;
                let Some(when) = row.deleted_at else {
                    return Err(StorageError::Conflict("child is not deleted".into()));
                };
                if Utc::now().naive_utc() - when >= Duration::days(retention_days) {
                    return Err(StorageError::Conflict(
                        "retention window has passed; the child can no longer be restored".into(),
                    ));
                }
                Ok(diesel::update(children.filter(id.eq(&child)))
                    .set(deleted_at.eq(None::<NaiveDateTime>))
                    .returning(Child::as_returning())
                    .get_result::<Child>(conn)?)
            })
        })
        .await
    }

    /// Hard-deletes children whose retention window has passed, together with
    /// every row that references them. Returns the number of children removed.
    pub async fn purge_deleted_children(&self, retention_days: i64) -> Result<usize, StorageError> {
        self.with_conn(move |conn| {
            use schema::{
                activities, child_achievements, child_lesson_progress, child_module_progress,
                children, companies, company_transactions, quiz_attempts, sessions,
                track_submissions,
            };
            let cutoff = Utc::now().naive_utc() - Duration::days(retention_days);
            conn.immediate_transaction(|conn| -> Result<usize, StorageError> {
                let expired: Vec<String> = children::table
                    .filter(children::deleted_at.le(cutoff))
                    .select(children::id)
                    .load(conn)?;
                if expired.is_empty() {
                    return Ok(0);
                }
                let company_ids = companies::table
                    .filter(companies::child_id.eq_any(&expired))
                    .select(companies::id);
                diesel::delete(
                    company_transactions::table
                        .filter(company_transactions::company_id.eq_any(company_ids)),
                )
                .execute(conn)?;
                diesel::delete(companies::table.filter(companies::child_id.eq_any(&expired)))
                    .execute(conn)?;
                diesel::delete(
                    quiz_attempts::table.filter(quiz_attempts::child_id.eq_any(&expired)),
                )
                .execute(conn)?;
                diesel::delete(
                    child_lesson_progress::table
                        .filter(child_lesson_progress::child_id.eq_any(&expired)),
                )
                .execute(conn)?;
                diesel::delete(
                    child_module_progress::table
                        .filter(child_module_progress::child_id.eq_any(&expired)),
                )
                .execute(conn)?;
                diesel::delete(
                    child_achievements::table
                        .filter(child_achievements::child_id.eq_any(&expired)),
                )
                .execute(conn)?;
                diesel::delete(activities::table.filter(activities::child_id.eq_any(&expired)))
                    .execute(conn)?;
                diesel::delete(
                    track_submissions::table.filter(track_submissions::child_id.eq_any(&expired)),
                )
                .execute(conn)?;
                diesel::delete(sessions::table.filter(sessions::subject.eq_any(&expired)))
                    .execute(conn)?;
                let n = diesel::delete(children::table.filter(children::id.eq_any(&expired)))
                    .execute(conn)?;
                info!(purged = n, "expired children removed");
                Ok(n)
            })
        })
        .await
    }
}
