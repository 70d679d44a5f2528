use super::{success, ApiJson, CurrentUser, Success};
use crate::app::AppState;
use crate::database::{NewTask, TaskPatch, TaskView, TaskWithDetails};
use crate::error::{AppError, Result};
use axum::extract::rejection::QueryRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, put};
use axum::{Json, Router};
use chrono::Local;
use serde::Deserialize;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/tasks", get(list).post(create))
        .route("/tasks/{id}", put(update).delete(delete))
}

#[derive(Deserialize)]
struct ListQuery {
    #[serde(default)]
    view: TaskView,
}

async fn list(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    query: std::result::Result<Query<ListQuery>, QueryRejection>,
) -> Result<Json<Vec<TaskWithDetails>>> {
    let Query(query) = query.map_err(AppError::from)?;
    let today = Local::now().date_naive();
    Ok(Json(state.tasks.list(&user_id, query.view, today).await?))
}

async fn create(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    ApiJson(new): ApiJson<NewTask>,
) -> Result<(StatusCode, Json<TaskWithDetails>)> {
    let task = state.tasks.create(&user_id, &new).await?;
    Ok((StatusCode::CREATED, Json(task)))
}

async fn update(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Path(id): Path<String>,
    ApiJson(patch): ApiJson<TaskPatch>,
) -> Result<Json<TaskWithDetails>> {
    Ok(Json(state.tasks.update(&user_id, &id, &patch).await?))
}

async fn delete(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<Success>> {
    state.tasks.delete(&user_id, &id).await?;
    Ok(success())
}
