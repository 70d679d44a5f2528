use super::CurrentUser;
use crate::app::AppState;
use crate::error::Result;
use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use serde::Serialize;

pub fn routes() -> Router<AppState> {
    Router::new().route("/email/test", post(send_test))
}

#[derive(Serialize)]
struct TestEmailResponse {
    success: bool,
    message: String,
}

/// Build and dispatch the caller's digest right away
async fn send_test(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
) -> Result<Json<TestEmailResponse>> {
    let digest = state.digests.send_now(&user_id).await?;
    Ok(Json(TestEmailResponse {
        success: true,
        message: format!("Test digest sent to {}", digest.to),
    }))
}
