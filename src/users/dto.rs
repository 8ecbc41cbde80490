use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::users::repo_types::StoredUser;

/// Untrusted user input. Every field is kept as raw JSON so that a value of the wrong
/// type is reported against its field instead of rejecting the whole body.
#[derive(Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateUser {
    pub first_name: Option<Value>,
    pub last_name: Option<Value>,
    pub age: Option<Value>,
    pub email: Option<Value>,
    pub password: Option<Value>,
    pub role: Option<Value>,
    pub address: Option<Value>,
}

/// Field-level patch; absent fields are left unchanged.
pub type UserPatch = CandidateUser;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub email: Option<String>,
    /// `createdAt`, `email`, or either with a leading `-`. Defaults to `-createdAt`.
    pub sort: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

impl Default for ListQuery {
    fn default() -> Self {
        Self {
            email: None,
            sort: None,
            limit: default_limit(),
            offset: 0,
        }
    }
}

fn default_limit() -> i64 {
    20
}

#[derive(Debug, Serialize)]
pub struct UserEnvelope {
    pub success: bool,
    pub message: &'static str,
    pub user: StoredUser,
}

impl UserEnvelope {
    pub fn new(message: &'static str, user: StoredUser) -> Self {
        Self {
            success: true,
            message,
            user,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct UsersEnvelope {
    pub success: bool,
    pub message: &'static str,
    pub users: Vec<StoredUser>,
}
