use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde_json::json;

use crate::middleware::AuthUser;
use crate::models::CreateComment;
use crate::AppState;
use service_core::error::AppError;

#[tracing::instrument(skip(state, request), fields(actor_id = actor.id))]
pub async fn create_comment(
    State(state): State<AppState>,
    actor: AuthUser,
    Path(item_id): Path<i64>,
    Json(request): Json<CreateComment>,
) -> Result<(StatusCode, Json<serde_json::Value>), AppError> {
    let item = state.pipeline.get_item(&actor, item_id).await?;
    let comment = state.comments.create_comment(&actor, &item, &request).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "success": true, "comment": comment })),
    ))
}

#[tracing::instrument(skip(state), fields(actor_id = actor.id))]
pub async fn list_comments(
    State(state): State<AppState>,
    actor: AuthUser,
    Path(item_id): Path<i64>,
) -> Result<Json<serde_json::Value>, AppError> {
    let item = state.pipeline.get_item(&actor, item_id).await?;
    let comments = state.comments.list_comments(&actor, &item).await?;
    Ok(Json(json!({ "success": true, "comments": comments })))
}
