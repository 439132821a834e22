pub mod models;
pub mod schema;

mod children;
mod company;
mod content;
mod learning;
mod metrics;
mod users;

pub use children::DeletedChild;
pub use company::LedgerEntry;
pub use content::{ModuleDeletion, ModuleWithCount};
pub use learning::{AwardOutcome, CompletionOutcome, SubmissionRow};
pub use users::{
    NewParentAccount, SubscriptionSeed, UserRow, UserSeed, naive_to_offset,
    subscription_grants_access,
};

use chrono::Utc;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool};
use diesel_migrations::{EmbeddedMigrations, MigrationHarness, embed_migrations};
use models::{NewAchievement, NewSession, Session};
use tracing::trace;

/// Structured error type for all storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// A Diesel ORM error (query failure, constraint violation, etc.)
    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),

    /// Failed to acquire or build a connection from the pool.
    #[error("pool error: {0}")]
    Pool(#[from] diesel::r2d2::PoolError),

    /// A `spawn_blocking` task panicked or was cancelled.
    #[error("task error: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// A database migration failed to apply.
    #[error("migration error: {0}")]
    Migration(String),

    /// The caller supplied invalid input.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The addressed row does not exist (or is soft-deleted).
    #[error("not found: {0}")]
    NotFound(String),

    /// The operation conflicts with the current row state.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Dependent rows still reference the row being deleted.
    #[error("foreign key violation on {table}")]
    ForeignKey { table: String, hint: String },
}

#[derive(Clone)]
pub struct Store {
    pool: Pool<ConnectionManager<SqliteConnection>>,
}

impl Store {
    pub async fn connect_sqlite(path: &str) -> Result<Self, StorageError> {
        let url = path.to_string();
        let manager = ConnectionManager::<SqliteConnection>::new(url);
        let pool = Pool::builder().max_size(8).build(manager)?;

        // Run pending Diesel migrations on startup (auto-init empty DBs)
        {
            let pool_clone = pool.clone();
            tokio::task::spawn_blocking(move || -> Result<(), StorageError> {
                const MIGRATIONS: EmbeddedMigrations = embed_migrations!();
                let mut conn = pool_clone.get()?;
                configure_sqlite_conn(&mut conn)?;
                conn.run_pending_migrations(MIGRATIONS)
                    .map_err(|e| StorageError::Migration(e.to_string()))?;
                Ok(())
            })
            .await??;
        }

        Ok(Store { pool })
    }

    /// Runs `f` on a pooled connection off the async runtime.
    async fn with_conn<T, F>(&self, f: F) -> Result<T, StorageError>
    where
        T: Send + 'static,
        F: FnOnce(&mut SqliteConnection) -> Result<T, StorageError> + Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || -> Result<T, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            f(&mut *conn)
        })
        .await?
    }

    /// Upserts the achievement catalog. Rules removed from config stay in the
    /// table so already-awarded badges keep resolving.
    pub async fn seed_achievements(
        &self,
        catalog: &[kidbiz_shared::domain::AchievementRule],
    ) -> Result<(), StorageError> {
        use schema::achievements;

        let rules = catalog.to_owned();
        self.with_conn(move |conn| {
            for rule in &rules {
                let row = NewAchievement {
                    id: &rule.id,
                    name: &rule.name,
                    description: &rule.description,
                    rule_kind: rule.kind.as_str(),
                    threshold: rule.threshold,
                };
                diesel::insert_into(achievements::table)
                    .values(&row)
                    .on_conflict(achievements::id)
                    .do_update()
                    .set((
                        achievements::name.eq(row.name),
                        achievements::description.eq(row.description),
                        achievements::rule_kind.eq(row.rule_kind),
                        achievements::threshold.eq(row.threshold),
                    ))
                    .execute(conn)?;
            }
            Ok(())
        })
        .await
    }

    // Session helpers for JWT inactivity windows
    pub async fn create_session(&self, jti_: &str, subject_: &str) -> Result<(), StorageError> {
        use schema::sessions;
        let j = jti_.to_string();
        let s = subject_.to_string();
        self.with_conn(move |conn| {
            let new = NewSession {
                jti: &j,
                subject: &s,
            };
            diesel::insert_into(sessions::table)
                .values(&new)
                .on_conflict_do_nothing()
                .execute(conn)?;
            Ok(())
        })
        .await
    }

    pub async fn get_session(&self, jti_: &str) -> Result<Option<Session>, StorageError> {
        use schema::sessions::dsl::*;
        let j = jti_.to_string();
        self.with_conn(move |conn| {
            Ok(sessions
                .filter(jti.eq(&j))
                .first::<Session>(conn)
                .optional()?)
        })
        .await
    }

    pub async fn delete_session(&self, jti_: &str) -> Result<bool, StorageError> {
        use schema::sessions::dsl::*;
        let j = jti_.to_string();
        self.with_conn(move |conn| {
            let deleted = diesel::delete(sessions.filter(jti.eq(&j))).execute(conn)?;
            Ok(deleted > 0)
        })
        .await
    }

    /// Drops every session of a subject, e.g. when a child is deleted.
    pub async fn delete_sessions_for(&self, subject_: &str) -> Result<usize, StorageError> {
        use schema::sessions::dsl::*;
        let s = subject_.to_string();
        trace!(subject = %s, "delete_sessions_for");
        self.with_conn(move |conn| {
            Ok(diesel::delete(sessions.filter(subject.eq(&s))).execute(conn)?)
        })
        .await
    }

    /// Touch session atomically, but only if it hasn't expired.
    /// Returns `true` if the session was found and updated, `false` otherwise.
    pub async fn touch_session_with_cutoff(
        &self,
        jti_: &str,
        cutoff: chrono::NaiveDateTime,
    ) -> Result<bool, StorageError> {
        use schema::sessions::dsl::*;
        let j = jti_.to_string();
        self.with_conn(move |conn| {
            let now = Utc::now().naive_utc();
            let updated =
                diesel::update(sessions.filter(jti.eq(&j)).filter(last_used_at.ge(cutoff)))
                    .set(last_used_at.eq(now))
                    .execute(conn)?;
            Ok(updated > 0)
        })
        .await
    }
}

fn configure_sqlite_conn(conn: &mut SqliteConnection) -> Result<(), diesel::result::Error> {
    // Enable WAL for better read/write concurrency and set a busy timeout
    diesel::sql_query("PRAGMA journal_mode=WAL;").execute(conn)?;
    diesel::sql_query("PRAGMA synchronous=NORMAL;").execute(conn)?;
    diesel::sql_query("PRAGMA busy_timeout=5000;").execute(conn)?;
    // Off by default in SQLite; content deletes rely on it.
    diesel::sql_query("PRAGMA foreign_keys=ON;").execute(conn)?;
    Ok(())
}

/// Maps a unique-constraint failure to [`StorageError::Conflict`].
fn conflict_on_unique(e: diesel::result::Error, what: &str) -> StorageError {
    use diesel::result::{DatabaseErrorKind, Error};
    match e {
        Error::DatabaseError(DatabaseErrorKind::UniqueViolation, _) => {
            StorageError::Conflict(format!("{what} already exists"))
        }
        other => StorageError::Database(other),
    }
}
