use axum::{extract::State, Json};
use serde_json::json;
use validator::Validate;

use crate::models::{ConfirmVerification, RequestVerification};
use crate::AppState;
use service_core::error::AppError;

fn lookup_key(email: &str) -> String {
    format!("email:{}", email)
}

#[tracing::instrument(skip(state, request))]
pub async fn request_verification(
    State(state): State<AppState>,
    Json(request): Json<RequestVerification>,
) -> Result<Json<serde_json::Value>, AppError> {
    request.validate()?;
    let email = request.email.trim().to_lowercase();

    let user = state
        .db
        .get_user_by_email(&email)
        .await?
        .ok_or_else(|| AppError::NotFound("No account with this email".to_string()))?;

    let payload = json!({ "user_id": user.id, "email": email });
    state
        .verification
        .request(&lookup_key(&email), payload, &email)
        .await?;

    Ok(Json(json!({
        "success": true,
        "message": "Verification code sent"
    })))
}

#[tracing::instrument(skip(state, request))]
pub async fn confirm_verification(
    State(state): State<AppState>,
    Json(request): Json<ConfirmVerification>,
) -> Result<Json<serde_json::Value>, AppError> {
    request.validate()?;
    let email = request.email.trim().to_lowercase();

    let payload = state
        .verification
        .confirm(&lookup_key(&email), &request.code)
        .await?;

    Ok(Json(json!({
        "success": true,
        "verified": true,
        "payload": payload
    })))
}
