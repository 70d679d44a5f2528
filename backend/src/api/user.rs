use super::{success, ApiJson, CurrentUser, Success};
use crate::app::AppState;
use crate::database::{User, UserPatch};
use crate::error::Result;
use axum::extract::State;
use axum::routing::{get, put};
use axum::{Json, Router};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/user", get(profile).delete(delete_account))
        .route("/user/settings", put(update_settings))
}

async fn profile(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
) -> Result<Json<User>> {
    Ok(Json(state.users.get_profile(&user_id).await?))
}

async fn update_settings(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    ApiJson(patch): ApiJson<UserPatch>,
) -> Result<Json<Success>> {
    state.users.update_settings(&user_id, &patch).await?;
    Ok(success())
}

async fn delete_account(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
) -> Result<Json<Success>> {
    state.users.delete_account(&user_id).await?;
    Ok(success())
}
