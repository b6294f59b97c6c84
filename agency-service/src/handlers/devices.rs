use axum::{extract::State, http::StatusCode, Json};
use serde_json::json;
use validator::Validate;

use crate::middleware::AuthUser;
use crate::models::RegisterDevice;
use crate::AppState;
use service_core::error::AppError;

#[tracing::instrument(skip(state, request), fields(user_id = actor.id))]
pub async fn register_device(
    State(state): State<AppState>,
    actor: AuthUser,
    Json(request): Json<RegisterDevice>,
) -> Result<(StatusCode, Json<serde_json::Value>), AppError> {
    request.validate()?;
    let platform = request.platform.as_deref().unwrap_or("unknown");

    let device = state
        .db
        .register_device(actor.id, &request.token, platform)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({ "success": true, "device": device })),
    ))
}
