use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::error;
use uuid::Uuid;

use crate::users::{password::SecretError, repo::StoreError, validation::ValidationErrors};

#[derive(Debug, Error)]
pub enum UserError {
    #[error(transparent)]
    Validation(#[from] ValidationErrors),

    /// Raised both by the uniqueness pre-check and by the store's own constraint.
    #[error("email '{0}' is already in use")]
    Conflict(String),

    #[error("user {0} not found")]
    NotFound(Uuid),

    #[error(transparent)]
    Secret(#[from] SecretError),

    #[error("store error: {0}")]
    Store(#[source] sqlx::Error),
}

pub type UserResult<T> = Result<T, UserError>;

impl From<StoreError> for UserError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(email) => UserError::Conflict(email),
            StoreError::Backend(e) => UserError::Store(e),
        }
    }
}

impl IntoResponse for UserError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            UserError::Validation(errors) => (
                StatusCode::BAD_REQUEST,
                json!({
                    "success": false,
                    "message": "Validation failed",
                    "errors": errors.violations,
                }),
            ),
            UserError::Conflict(_) => (
                StatusCode::CONFLICT,
                json!({
                    "success": false,
                    "message": "Email must be unique. Email is already in use.",
                    "errors": [{ "field": "email", "message": "Email is already in use." }],
                }),
            ),
            UserError::NotFound(id) => (
                StatusCode::NOT_FOUND,
                json!({ "success": false, "message": format!("User {id} not found") }),
            ),
            UserError::Secret(e) => {
                error!(error = %e, "secret derivation failed");
                internal()
            }
            UserError::Store(e) => {
                error!(error = %e, "user store failed");
                internal()
            }
        };
        (status, Json(body)).into_response()
    }
}

fn internal() -> (StatusCode, serde_json::Value) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        json!({ "success": false, "message": "An internal error occurred" }),
    )
}
