use chrono::{NaiveDateTime, Utc};
use diesel::dsl::count_star;
use diesel::prelude::*;
use kidbiz_shared::auth::Role;
use kidbiz_shared::domain::{SubscriptionStatus, format_access_code};
use serde::Deserialize;
use tracing::{info, warn};

use super::models::{Child, NewParent, NewUser, Parent, User};
use super::{Store, StorageError, conflict_on_unique, schema};

/// Account declared in the config file and upserted on start-up.
#[derive(Debug, Clone, Deserialize)]
pub struct UserSeed {
    pub email: String,
    pub display_name: String,
    pub password_hash: String, // bcrypt hash
    pub role: Role,
    pub subscription: Option<SubscriptionSeed>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionSeed {
    #[serde(default = "default_tier")]
    pub tier: String,
    pub status: SubscriptionStatus,
    pub trial_ends_at: Option<chrono::DateTime<Utc>>,
}

fn default_tier() -> String {
    "free".to_string()
}

#[derive(Debug, Clone)]
pub struct UserRow {
    pub user: User,
    pub parent: Option<Parent>,
    pub child_count: i64,
}

/// Fields of a parent account created through the admin API.
pub struct NewParentAccount<'a> {
    pub email: &'a str,
    pub display_name: &'a str,
    pub password_hash: &'a str,
    pub tier: &'a str,
    pub status: &'a SubscriptionStatus,
    pub trial_ends_at: Option<NaiveDateTime>,
}

impl Store {
    /// Upserts config-declared accounts by email. Existing ids are kept so
    /// children stay attached across restarts.
    pub async fn seed_users(&self, seeds: &[UserSeed]) -> Result<(), StorageError> {
        use schema::{parents, users};

        let seeds = seeds.to_owned();
        self.with_conn(move |conn| {
            conn.immediate_transaction(|conn| -> Result<(), StorageError> {
                for seed in &seeds {
                    if seed.role == Role::Child {
                        return Err(StorageError::InvalidInput(format!(
                            "{}: child accounts log in with access codes",
                            seed.email
                        )));
                    }
                    let email = seed.email.trim().to_lowercase();
                    let existing: Option<String> = users::table
                        .filter(users::email.eq(&email))
                        .select(users::id)
                        .first(conn)
                        .optional()?;
                    let user_id = match existing {
                        Some(id) => {
                            diesel::update(users::table.filter(users::id.eq(&id)))
                                .set((
                                    users::display_name.eq(&seed.display_name),
                                    users::password_hash.eq(&seed.password_hash),
                                    users::role.eq(seed.role.as_str()),
                                ))
                                .execute(conn)?;
                            id
                        }
                        None => {
                            let id = uuid::Uuid::new_v4().to_string();
                            diesel::insert_into(users::table)
                                .values(&NewUser {
                                    id: &id,
                                    email: &email,
                                    display_name: &seed.display_name,
                                    password_hash: &seed.password_hash,
                                    role: seed.role.as_str(),
                                })
                                .execute(conn)?;
                            id
                        }
                    };
                    if seed.role == Role::Parent {
                        // Operator-declared parents without a plan are active
                        let sub = seed.subscription.clone().unwrap_or(SubscriptionSeed {
                            tier: default_tier(),
                            status: SubscriptionStatus::Active,
                            trial_ends_at: None,
                        });
                        let trial = sub.trial_ends_at.map(|t| t.naive_utc());
                        let row = NewParent {
                            user_id: &user_id,
                            subscription_tier: &sub.tier,
                            subscription_status: sub.status.as_str(),
                            trial_ends_at: trial,
                        };
                        diesel::insert_into(parents::table)
                            .values(&row)
                            .on_conflict(parents::user_id)
                            .do_update()
                            .set((
                                parents::subscription_tier.eq(row.subscription_tier),
                                parents::subscription_status.eq(row.subscription_status),
                                parents::trial_ends_at.eq(row.trial_ends_at),
                                parents::updated_at.eq(Utc::now().naive_utc()),
                            ))
                            .execute(conn)?;
                    }
                }
                info!(count = seeds.len(), "seeded users");
                Ok(())
            })
        })
        .await
    }

    pub async fn find_user_by_email(&self, email_: &str) -> Result<Option<User>, StorageError> {
        let email_ = email_.trim().to_lowercase();
        self.with_conn(move |conn| {
            use schema::users::dsl::*;
            Ok(users
                .filter(email.eq(&email_))
                .select(User::as_select())
                .first::<User>(conn)
                .optional()?)
        })
        .await
    }

    pub async fn get_user(&self, user: &str) -> Result<Option<User>, StorageError> {
        let user = user.to_string();
        self.with_conn(move |conn| {
            use schema::users::dsl::*;
            Ok(users
                .filter(id.eq(&user))
                .select(User::as_select())
                .first::<User>(conn)
                .optional()?)
        })
        .await
    }

    pub async fn get_parent(&self, user: &str) -> Result<Option<Parent>, StorageError> {
        let user = user.to_string();
        self.with_conn(move |conn| {
            use schema::parents::dsl::*;
            Ok(parents
                .filter(user_id.eq(&user))
                .select(Parent::as_select())
                .first::<Parent>(conn)
                .optional()?)
        })
        .await
    }

    /// Every account with its subscription and live child count, by email.
    pub async fn list_users(&self) -> Result<Vec<UserRow>, StorageError> {
        self.with_conn(move |conn| {
            use schema::{children, parents, users};
            let rows = users::table
                .left_join(parents::table)
                .order(users::email.asc())
                .select((User::as_select(), Option::<Parent>::as_select()))
                .load::<(User, Option<Parent>)>(conn)?;
            let counts: std::collections::HashMap<String, i64> = children::table
                .filter(children::deleted_at.is_null())
                .group_by(children::parent_id)
                .select((children::parent_id, count_star()))
                .load::<(String, i64)>(conn)?
                .into_iter()
                .collect();
            Ok(rows
                .into_iter()
                .map(|(user, parent)| {
                    let child_count = counts.get(&user.id).copied().unwrap_or(0);
                    UserRow {
                        user,
                        parent,
                        child_count,
                    }
                })
                .collect())
        })
        .await
    }

    pub async fn create_parent(&self, account: NewParentAccount<'_>) -> Result<UserRow, StorageError> {
        let email = account.email.trim().to_lowercase();
        if email.is_empty() || !email.contains('@') {
            return Err(StorageError::InvalidInput("a valid email is required".into()));
        }
        let display_name = account.display_name.trim().to_string();
        let password_hash = account.password_hash.to_string();
        let tier = account.tier.to_string();
        let status = account.status.as_str().to_string();
        let trial = account.trial_ends_at;
        self.with_conn(move |conn| {
            use schema::{parents, users};
            conn.immediate_transaction(|conn| -> Result<UserRow, StorageError> {
                let id = uuid::Uuid::new_v4().to_string();
                let user = diesel::insert_into(users::table)
                    .values(&NewUser {
                        id: &id,
                        email: &email,
                        display_name: &display_name,
                        password_hash: &password_hash,
                        role: Role::Parent.as_str(),
                    })
                    .returning(User::as_returning())
                    .get_result::<User>(conn)
                    .map_err(|e| conflict_on_unique(e, "email"))?;
                let parent = diesel::insert_into(parents::table)
                    .values(&NewParent {
                        user_id: &id,
                        subscription_tier: &tier,
                        subscription_status: &status,
                        trial_ends_at: trial,
                    })
                    .returning(Parent::as_returning())
                    .get_result::<Parent>(conn)?;
                info!(user_id = %id, "parent account created");
                Ok(UserRow {
                    user,
                    parent: Some(parent),
                    child_count: 0,
                })
            })
        })
        .await
    }

    /// Changes only what is given. `trial_ends_at: Some(None)` clears it.
    pub async fn update_subscription(
        &self,
        user: &str,
        tier: Option<String>,
        status: Option<SubscriptionStatus>,
        trial_ends_at: Option<Option<NaiveDateTime>>,
    ) -> Result<Parent, StorageError> {
        let user = user.to_string();
        self.with_conn(move |conn| {
            use schema::parents::dsl as p;
            conn.immediate_transaction(|conn| -> Result<Parent, StorageError> {
                let current = p::parents
                    .filter(p::user_id.eq(&user))
                    .select(Parent::as_select())
                    .first::<Parent>(conn)
                    .optional()?
                    .ok_or_else(|| StorageError::NotFound(format!("parent {user}")))?;
                let tier = tier.unwrap_or(current.subscription_tier);
                let status = status
                    .map(|s| s.as_str().to_string())
                    .unwrap_or(current.subscription_status);
                let trial = trial_ends_at.unwrap_or(current.trial_ends_at);
                Ok(diesel::update(p::parents.filter(p::user_id.eq(&user)))
                    .set((
                        p::subscription_tier.eq(&tier),
                        p::subscription_status.eq(&status),
                        p::trial_ends_at.eq(trial),
                        p::updated_at.eq(Utc::now().naive_utc()),
                    ))
                    .returning(Parent::as_returning())
                    .get_result::<Parent>(conn)?)
            })
        })
        .await
    }

    /// Soft-deactivates an account; it can no longer log in and its
    /// children lose access.
    pub async fn deactivate_user(&self, user: &str) -> Result<User, StorageError> {
        let user = user.to_string();
        self.with_conn(move |conn| {
            use schema::users::dsl::*;
            diesel::update(users.filter(id.eq(&user)).filter(deleted_at.is_null()))
                .set(deleted_at.eq(Some(Utc::now().naive_utc())))
                .returning(User::as_returning())
                .get_result::<User>(conn)
                .optional()?
                .ok_or_else(|| StorageError::NotFound(format!("user {user}")))
        })
        .await
    }

    /// Looks a live child up by access code and tells whether the owning
    /// parent's subscription currently grants access. `None` when no live
    /// child carries the code.
    pub async fn check_parent_subscription_by_access_code(
        &self,
        code: &str,
    ) -> Result<Option<(Child, bool)>, StorageError> {
        let code = format_access_code(code);
        self.with_conn(move |conn| {
            use schema::{children, parents, users};
            let found = children::table
                .inner_join(users::table.left_join(parents::table))
                .filter(children::access_code.eq(&code))
                .filter(children::deleted_at.is_null())
                .select((
                    Child::as_select(),
                    users::deleted_at,
                    Option::<Parent>::as_select(),
                ))
                .first::<(Child, Option<NaiveDateTime>, Option<Parent>)>(conn)
                .optional()?;
            let Some((child, parent_deleted, parent)) = found else {
                return Ok(None);
            };
            let grants = match (parent_deleted, parent) {
                (None, Some(p)) => subscription_grants_access(&p),
                _ => false,
            };
            if !grants {
                warn!(child_id = %child.id, "access code used while subscription inactive");
            }
            Ok(Some((child, grants)))
        })
        .await
    }
}

pub fn subscription_grants_access(parent: &Parent) -> bool {
    let status = SubscriptionStatus::from(parent.subscription_status.as_str());
    let trial = parent.trial_ends_at.and_then(naive_to_offset);
    status.grants_access(trial, kidbiz_shared::domain::now_utc())
}

pub fn naive_to_offset(dt: NaiveDateTime) -> Option<time::OffsetDateTime> {
    time::OffsetDateTime::from_unix_timestamp(dt.and_utc().timestamp()).ok()
}
