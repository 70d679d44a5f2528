use super::ApiJson;
use crate::app::AppState;
use crate::services::quality::{assess, QualityInput, QualityReport};
use axum::routing::post;
use axum::{Json, Router};

pub fn routes() -> Router<AppState> {
    Router::new().route("/okr/quality", post(check))
}

async fn check(ApiJson(input): ApiJson<QualityInput>) -> Json<QualityReport> {
    Json(assess(&input))
}
