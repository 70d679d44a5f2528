use super::ApiJson;
use crate::app::AppState;
use crate::error::Result;
use crate::services::auth::LoginResponse;
use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/auth/login", post(login))
        .route("/auth/verify/{token}", get(verify))
}

#[derive(Deserialize)]
struct LoginRequest {
    email: String,
}

#[derive(Serialize)]
struct VerifiedUser {
    id: String,
    email: String,
}

#[derive(Serialize)]
struct VerifyResponse {
    user: VerifiedUser,
}

async fn login(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<LoginRequest>,
) -> Result<Json<LoginResponse>> {
    Ok(Json(state.auth.login(&req.email).await?))
}

async fn verify(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<Json<VerifyResponse>> {
    let user = state.auth.verify(&token).await?;
    Ok(Json(VerifyResponse {
        user: VerifiedUser {
            id: user.id,
            email: user.email,
        },
    }))
}
