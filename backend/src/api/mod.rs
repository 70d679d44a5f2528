//! HTTP API
//!
//! Route groups are merged into one router nested under `/api`. Callers
//! identify themselves with the `X-User-Id` header; every handler that
//! takes `CurrentUser` rejects requests without it.

mod auth;
mod email;
mod metrics;
mod objectives;
mod quality;
mod tasks;
mod user;

use crate::app::AppState;
use crate::error::AppError;
use axum::extract::{FromRequest, FromRequestParts};
use axum::http::request::Parts;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Header carrying the caller's user id
pub const USER_ID_HEADER: &str = "x-user-id";

/// Build the full application router
pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/health", get(health))
        .merge(auth::routes())
        .merge(user::routes())
        .merge(objectives::routes())
        .merge(metrics::routes())
        .merge(tasks::routes())
        .merge(email::routes())
        .merge(quality::routes());

    Router::new()
        .nest("/api", api)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Caller identity taken from the `X-User-Id` header
#[derive(Debug, Clone)]
pub struct CurrentUser(pub String);

impl<S: Send + Sync> FromRequestParts<S> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(|v| CurrentUser(v.to_string()))
            .ok_or(AppError::Unauthenticated)
    }
}

/// JSON body extractor whose rejections use the API error shape
#[derive(Debug, FromRequest)]
#[from_request(via(axum::Json), rejection(AppError))]
pub struct ApiJson<T>(pub T);

/// `{"success": true}` acknowledgement
#[derive(Debug, Serialize)]
pub struct Success {
    pub success: bool,
}

pub(crate) fn success() -> Json<Success> {
    Json(Success { success: true })
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}
