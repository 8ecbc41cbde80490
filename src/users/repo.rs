use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use sqlx::{types::Json, PgPool};
use thiserror::Error;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::users::repo_types::{NewUser, StoredUser, UserFilter, UserRow, UserSort};

#[derive(Debug, Error)]
pub enum StoreError {
    /// The unique constraint on email rejected the write.
    #[error("email '{0}' is already in use")]
    Conflict(String),
    #[error(transparent)]
    Backend(#[from] sqlx::Error),
}

/// Persistence for user records. Email is unique (compared case-insensitively) and the
/// store itself enforces it: `insert` and `update_by_id` fail with
/// [`StoreError::Conflict`] instead of writing a duplicate.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_email(&self, email: &str) -> Result<Option<StoredUser>, StoreError>;
    async fn insert(&self, user: NewUser) -> Result<StoredUser, StoreError>;
    async fn find_by_id(&self, id: Uuid) -> Result<Option<StoredUser>, StoreError>;
    /// Overwrites every mutable column and refreshes `updated_at`.
    async fn update_by_id(&self, id: Uuid, user: &StoredUser) -> Result<Option<StoredUser>, StoreError>;
    async fn delete_by_id(&self, id: Uuid) -> Result<Option<StoredUser>, StoreError>;
    /// Ordered by `filter.sort`.
    async fn list(&self, filter: &UserFilter) -> Result<Vec<StoredUser>, StoreError>;
}

#[derive(Clone)]
pub struct PgUserStore {
    db: PgPool,
}

impl PgUserStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

const UNIQUE_VIOLATION: &str = "23505";

fn conflict_or_backend(err: sqlx::Error, email: &str) -> StoreError {
    match &err {
        sqlx::Error::Database(db) if db.code().as_deref() == Some(UNIQUE_VIOLATION) => {
            StoreError::Conflict(email.to_string())
        }
        _ => StoreError::Backend(err),
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<StoredUser>, StoreError> {
        let row = sqlx::query_as::<_, UserRow>(
            r#"
            SELECT id, first_name, last_name, age, email, password_hash, role, address,
                   created_at, updated_at
            FROM users
            WHERE lower(email) = lower($1)
            "#,
        )
        .bind(email)
        .fetch_optional(&self.db)
        .await?;
        Ok(row.map(StoredUser::try_from).transpose()?)
    }

    async fn insert(&self, user: NewUser) -> Result<StoredUser, StoreError> {
        let row = sqlx::query_as::<_, UserRow>(
            r#"
            INSERT INTO users (id, first_name, last_name, age, email, password_hash, role, address)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING id, first_name, last_name, age, email, password_hash, role, address,
                      created_at, updated_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(user.age)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(user.role.as_str())
        .bind(user.address.clone().map(Json))
        .fetch_one(&self.db)
        .await
        .map_err(|e| conflict_or_backend(e, &user.email))?;
        Ok(StoredUser::try_from(row)?)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<StoredUser>, StoreError> {
        let row = sqlx::query_as::<_, UserRow>(
            r#"
            SELECT id, first_name, last_name, age, email, password_hash, role, address,
                   created_at, updated_at
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        Ok(row.map(StoredUser::try_from).transpose()?)
    }

    async fn update_by_id(&self, id: Uuid, user: &StoredUser) -> Result<Option<StoredUser>, StoreError> {
        let row = sqlx::query_as::<_, UserRow>(
            r#"
            UPDATE users
               SET first_name = $2,
                   last_name = $3,
                   age = $4,
                   email = $5,
                   password_hash = $6,
                   role = $7,
                   address = $8,
                   updated_at = now()
             WHERE id = $1
            RETURNING id, first_name, last_name, age, email, password_hash, role, address,
                      created_at, updated_at
            "#,
        )
        .bind(id)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(user.age)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(user.role.as_str())
        .bind(user.address.clone().map(Json))
        .fetch_optional(&self.db)
        .await
        .map_err(|e| conflict_or_backend(e, &user.email))?;
        Ok(row.map(StoredUser::try_from).transpose()?)
    }

    async fn delete_by_id(&self, id: Uuid) -> Result<Option<StoredUser>, StoreError> {
        let row = sqlx::query_as::<_, UserRow>(
            r#"
            DELETE FROM users
             WHERE id = $1
            RETURNING id, first_name, last_name, age, email, password_hash, role, address,
                      created_at, updated_at
            "#,
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        Ok(row.map(StoredUser::try_from).transpose()?)
    }

    async fn list(&self, filter: &UserFilter) -> Result<Vec<StoredUser>, StoreError> {
        // `order_by` only yields fixed literals.
        let sql = format!(
            r#"
            SELECT id, first_name, last_name, age, email, password_hash, role, address,
                   created_at, updated_at
            FROM users
            WHERE ($1::text IS NULL OR lower(email) = lower($1))
            ORDER BY {}
            LIMIT $2 OFFSET $3
            "#,
            filter.sort.order_by()
        );
        let rows = sqlx::query_as::<_, UserRow>(&sql)
            .bind(filter.email.as_deref())
            .bind(filter.limit)
            .bind(filter.offset)
            .fetch_all(&self.db)
            .await?;
        let users = rows
            .into_iter()
            .map(StoredUser::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(users)
    }
}

/// Process-local store used when no database is configured, and in tests.
#[derive(Debug, Default, Clone)]
pub struct InMemoryUserStore {
    users: Arc<RwLock<HashMap<Uuid, StoredUser>>>,
}

impl InMemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn same_email(a: &str, b: &str) -> bool {
    a.to_lowercase() == b.to_lowercase()
}

#[async_trait]
impl UserStore for InMemoryUserStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<StoredUser>, StoreError> {
        let users = self.users.read().await;
        Ok(users.values().find(|u| same_email(&u.email, email)).cloned())
    }

    async fn insert(&self, user: NewUser) -> Result<StoredUser, StoreError> {
        // Check and insert under one write lock.
        let mut users = self.users.write().await;
        if users.values().any(|u| same_email(&u.email, &user.email)) {
            return Err(StoreError::Conflict(user.email));
        }
        let stored = StoredUser::from_new(Uuid::new_v4(), user, OffsetDateTime::now_utc());
        users.insert(stored.id, stored.clone());
        debug!(user_id = %stored.id, "user inserted");
        Ok(stored)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<StoredUser>, StoreError> {
        let users = self.users.read().await;
        Ok(users.get(&id).cloned())
    }

    async fn update_by_id(&self, id: Uuid, user: &StoredUser) -> Result<Option<StoredUser>, StoreError> {
        let mut users = self.users.write().await;
        let Some(created_at) = users.get(&id).map(|u| u.created_at) else {
            return Ok(None);
        };
        if users
            .values()
            .any(|u| u.id != id && same_email(&u.email, &user.email))
        {
            return Err(StoreError::Conflict(user.email.clone()));
        }
        let updated = StoredUser {
            id,
            created_at,
            updated_at: OffsetDateTime::now_utc(),
            ..user.clone()
        };
        users.insert(id, updated.clone());
        Ok(Some(updated))
    }

    async fn delete_by_id(&self, id: Uuid) -> Result<Option<StoredUser>, StoreError> {
        let mut users = self.users.write().await;
        Ok(users.remove(&id))
    }

    async fn list(&self, filter: &UserFilter) -> Result<Vec<StoredUser>, StoreError> {
        let users = self.users.read().await;
        let mut matching: Vec<StoredUser> = users
            .values()
            .filter(|u| {
                filter
                    .email
                    .as_deref()
                    .map_or(true, |email| same_email(&u.email, email))
            })
            .cloned()
            .collect();
        matching.sort_by(|a, b| {
            let by_email = || a.email.to_lowercase().cmp(&b.email.to_lowercase());
            match filter.sort {
                UserSort::NewestFirst => b.created_at.cmp(&a.created_at),
                UserSort::OldestFirst => a.created_at.cmp(&b.created_at),
                UserSort::EmailAsc => by_email(),
                UserSort::EmailDesc => by_email().reverse(),
            }
            .then_with(|| a.id.cmp(&b.id))
        });

        let offset = usize::try_from(filter.offset).unwrap_or(0);
        let limit = usize::try_from(filter.limit).unwrap_or(0);
        Ok(matching.into_iter().skip(offset).take(limit).collect())
    }
}
