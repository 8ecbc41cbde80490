use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use sqlx::{types::Json, FromRow};
use time::OffsetDateTime;
use uuid::Uuid;

/// Role assigned to a user. Serialized in uppercase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Role {
    #[default]
    User,
    Admin,
    SuperAdmin,
}

impl Role {
    pub const ALL: [Role; 3] = [Role::User, Role::Admin, Role::SuperAdmin];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "USER",
            Role::Admin => "ADMIN",
            Role::SuperAdmin => "SUPERADMIN",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Case-insensitive; `"admin"`, `"Admin"` and `"ADMIN"` all parse.
impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.to_uppercase();
        Role::ALL
            .into_iter()
            .find(|role| role.as_str() == upper)
            .ok_or_else(|| format!("unknown role: {s}"))
    }
}

/// Postal address embedded in a user record. Has no identity of its own.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub city: Option<String>,
    pub street: Option<String>,
    pub zip: Option<i64>,
}

/// A validated user whose password has already been replaced by its derived secret.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewUser {
    pub first_name: String,
    pub last_name: String,
    pub age: i32,
    pub email: String,
    pub password_hash: String,
    pub role: Role,
    pub address: Option<Address>,
}

/// User record as held by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredUser {
    pub id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub age: i32,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String, // Argon2 PHC string, never exposed in JSON
    pub role: Role,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<Address>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl StoredUser {
    pub fn from_new(id: Uuid, user: NewUser, now: OffsetDateTime) -> Self {
        Self {
            id,
            first_name: user.first_name,
            last_name: user.last_name,
            age: user.age,
            email: user.email,
            password_hash: user.password_hash,
            role: user.role,
            address: user.address,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Listing order. Parsed from `createdAt`/`email`, with a leading `-` for descending.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum UserSort {
    #[default]
    NewestFirst,
    OldestFirst,
    EmailAsc,
    EmailDesc,
}

impl UserSort {
    /// `ORDER BY` clause for the `users` table. Ties fall back to `id` so paging is stable.
    pub fn order_by(&self) -> &'static str {
        match self {
            UserSort::NewestFirst => "created_at DESC, id",
            UserSort::OldestFirst => "created_at ASC, id",
            UserSort::EmailAsc => "lower(email) ASC, id",
            UserSort::EmailDesc => "lower(email) DESC, id",
        }
    }
}

impl FromStr for UserSort {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "-createdAt" => Ok(UserSort::NewestFirst),
            "createdAt" => Ok(UserSort::OldestFirst),
            "email" => Ok(UserSort::EmailAsc),
            "-email" => Ok(UserSort::EmailDesc),
            other => Err(format!(
                "'{other}' is not a supported sort. Use createdAt, -createdAt, email or -email."
            )),
        }
    }
}

/// Filter, order and paging applied when listing users.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserFilter {
    pub email: Option<String>,
    pub sort: UserSort,
    pub limit: i64,
    pub offset: i64,
}

/// Row of the `users` table.
#[derive(Debug, FromRow)]
pub struct UserRow {
    pub id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub age: i32,
    pub email: String,
    pub password_hash: String,
    pub role: String,
    pub address: Option<Json<Address>>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl TryFrom<UserRow> for StoredUser {
    type Error = sqlx::Error;

    fn try_from(r: UserRow) -> Result<Self, Self::Error> {
        let role = r
            .role
            .parse::<Role>()
            .map_err(|e| sqlx::Error::Decode(e.into()))?;
        Ok(Self {
            id: r.id,
            first_name: r.first_name,
            last_name: r.last_name,
            age: r.age,
            email: r.email,
            password_hash: r.password_hash,
            role,
            address: r.address.map(|Json(a)| a),
            created_at: r.created_at,
            updated_at: r.updated_at,
        })
    }
}
