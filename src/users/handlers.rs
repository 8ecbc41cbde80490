use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use tracing::instrument;
use uuid::Uuid;

use crate::{
    state::AppState,
    users::{
        dto::{CandidateUser, ListQuery, UserEnvelope, UserPatch, UsersEnvelope},
        error::UserResult,
        services,
    },
};

pub fn user_routes() -> Router<AppState> {
    Router::new()
        .route("/users/create-user", post(create_user))
        .route("/users", get(list_users))
        .route(
            "/users/:user_id",
            get(get_user).patch(update_user).delete(delete_user),
        )
}

#[instrument(skip(state, payload))]
pub async fn create_user(
    State(state): State<AppState>,
    Json(payload): Json<CandidateUser>,
) -> UserResult<(StatusCode, Json<UserEnvelope>)> {
    let user = services::create_user(state.users.as_ref(), &payload).await?;
    Ok((
        StatusCode::CREATED,
        Json(UserEnvelope::new("User created successfully", user)),
    ))
}

#[instrument(skip(state))]
pub async fn list_users(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> UserResult<Json<UsersEnvelope>> {
    let users = services::list_users(state.users.as_ref(), query).await?;
    Ok(Json(UsersEnvelope {
        success: true,
        message: "Users retrieved successfully",
        users,
    }))
}

#[instrument(skip(state))]
pub async fn get_user(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> UserResult<Json<UserEnvelope>> {
    let user = services::get_user(state.users.as_ref(), user_id).await?;
    Ok(Json(UserEnvelope::new("User retrieved successfully", user)))
}

#[instrument(skip(state, patch))]
pub async fn update_user(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Json(patch): Json<UserPatch>,
) -> UserResult<Json<UserEnvelope>> {
    let user = services::update_user(state.users.as_ref(), user_id, &patch).await?;
    Ok(Json(UserEnvelope::new("User updated successfully", user)))
}

#[instrument(skip(state))]
pub async fn delete_user(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> UserResult<Json<UserEnvelope>> {
    let user = services::delete_user(state.users.as_ref(), user_id).await?;
    Ok(Json(UserEnvelope::new("User deleted successfully", user)))
}
