use super::{success, ApiJson, CurrentUser, Success};
use crate::app::AppState;
use crate::database::{KeyResultPatch, NewObjective, ObjectiveUpdate, ObjectiveWithKeyResults};
use crate::error::Result;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, put};
use axum::{Json, Router};
use chrono::Local;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/objectives", get(list).post(create))
        .route("/objectives/current", get(list_current))
        .route("/objectives/past", get(list_past))
        .route("/objectives/{id}", put(update).delete(delete))
        .route("/key-results/{id}", put(update_key_result))
}

async fn list(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
) -> Result<Json<Vec<ObjectiveWithKeyResults>>> {
    Ok(Json(state.objectives.list(&user_id).await?))
}

async fn list_current(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
) -> Result<Json<Vec<ObjectiveWithKeyResults>>> {
    let today = Local::now().date_naive();
    Ok(Json(state.objectives.list_current(&user_id, today).await?))
}

async fn list_past(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
) -> Result<Json<Vec<ObjectiveWithKeyResults>>> {
    let today = Local::now().date_naive();
    Ok(Json(state.objectives.list_past(&user_id, today).await?))
}

async fn create(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    ApiJson(new): ApiJson<NewObjective>,
) -> Result<(StatusCode, Json<ObjectiveWithKeyResults>)> {
    let created = state.objectives.create(&user_id, &new).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn update(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Path(id): Path<String>,
    ApiJson(update): ApiJson<ObjectiveUpdate>,
) -> Result<Json<ObjectiveWithKeyResults>> {
    Ok(Json(state.objectives.update(&user_id, &id, &update).await?))
}

async fn delete(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<Success>> {
    state.objectives.delete(&user_id, &id).await?;
    Ok(success())
}

async fn update_key_result(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Path(id): Path<String>,
    ApiJson(patch): ApiJson<KeyResultPatch>,
) -> Result<Json<Success>> {
    state.objectives.update_key_result(&user_id, &id, &patch).await?;
    Ok(success())
}
