//! Health metrics and heartbeat work

use super::{success, ApiJson, CurrentUser, Success};
use crate::app::AppState;
use crate::database::{
    HealthMetric, HealthMetricPatch, HeartbeatWork, HeartbeatWorkPatch, NewHealthMetric,
    NewHeartbeatWork,
};
use crate::error::Result;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, put};
use axum::{Json, Router};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/health-metrics", get(list_health_metrics).post(create_health_metric))
        .route(
            "/health-metrics/{id}",
            put(update_health_metric).delete(delete_health_metric),
        )
        .route("/heartbeat-work", get(list_heartbeat_work).post(create_heartbeat_work))
        .route(
            "/heartbeat-work/{id}",
            put(update_heartbeat_work).delete(delete_heartbeat_work),
        )
}

async fn list_health_metrics(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
) -> Result<Json<Vec<HealthMetric>>> {
    Ok(Json(state.metrics.list_health_metrics(&user_id).await?))
}

async fn create_health_metric(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    ApiJson(new): ApiJson<NewHealthMetric>,
) -> Result<(StatusCode, Json<HealthMetric>)> {
    let metric = state.metrics.create_health_metric(&user_id, &new).await?;
    Ok((StatusCode::CREATED, Json(metric)))
}

async fn update_health_metric(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Path(id): Path<String>,
    ApiJson(patch): ApiJson<HealthMetricPatch>,
) -> Result<Json<HealthMetric>> {
    Ok(Json(
        state.metrics.update_health_metric(&user_id, &id, &patch).await?,
    ))
}

async fn delete_health_metric(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<Success>> {
    state.metrics.delete_health_metric(&user_id, &id).await?;
    Ok(success())
}

async fn list_heartbeat_work(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
) -> Result<Json<Vec<HeartbeatWork>>> {
    Ok(Json(state.metrics.list_heartbeat_work(&user_id).await?))
}

async fn create_heartbeat_work(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    ApiJson(new): ApiJson<NewHeartbeatWork>,
) -> Result<(StatusCode, Json<HeartbeatWork>)> {
    let work = state.metrics.create_heartbeat_work(&user_id, &new).await?;
    Ok((StatusCode::CREATED, Json(work)))
}

async fn update_heartbeat_work(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Path(id): Path<String>,
    ApiJson(patch): ApiJson<HeartbeatWorkPatch>,
) -> Result<Json<HeartbeatWork>> {
    Ok(Json(
        state.metrics.update_heartbeat_work(&user_id, &id, &patch).await?,
    ))
}

async fn delete_heartbeat_work(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<Success>> {
    state.metrics.delete_heartbeat_work(&user_id, &id).await?;
    Ok(success())
}
