use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde_json::json;

use crate::middleware::AuthUser;
use crate::models::{
    ApprovalRequest, AttachMedia, CreateContentItem, ListContentItemsFilter, MoveRequest,
    ScheduleRequest, UpdateContentItem,
};
use crate::AppState;
use service_core::error::AppError;

#[tracing::instrument(skip(state, request), fields(actor_id = actor.id))]
pub async fn create_item(
    State(state): State<AppState>,
    actor: AuthUser,
    Json(request): Json<CreateContentItem>,
) -> Result<(StatusCode, Json<serde_json::Value>), AppError> {
    let item = state.pipeline.create_item(&actor, &request).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "success": true, "content_item": item })),
    ))
}

#[tracing::instrument(skip(state, filter), fields(actor_id = actor.id))]
pub async fn list_items(
    State(state): State<AppState>,
    actor: AuthUser,
    Query(filter): Query<ListContentItemsFilter>,
) -> Result<Json<serde_json::Value>, AppError> {
    let items = state.pipeline.list_items(&actor, &filter).await?;
    Ok(Json(json!({ "success": true, "content_items": items })))
}

#[tracing::instrument(skip(state), fields(actor_id = actor.id))]
pub async fn get_item(
    State(state): State<AppState>,
    actor: AuthUser,
    Path(item_id): Path<i64>,
) -> Result<Json<serde_json::Value>, AppError> {
    let item = state.pipeline.get_item(&actor, item_id).await?;
    let media = state.pipeline.list_media(&actor, item_id).await?;
    let unread = state.comments.unread_count(item.id, actor.id).await?;
    Ok(Json(json!({
        "success": true,
        "content_item": item,
        "media": media,
        "unread_comments": unread
    })))
}

#[tracing::instrument(skip(state, request), fields(actor_id = actor.id))]
pub async fn update_item(
    State(state): State<AppState>,
    actor: AuthUser,
    Path(item_id): Path<i64>,
    Json(request): Json<UpdateContentItem>,
) -> Result<Json<serde_json::Value>, AppError> {
    let item = state.pipeline.update_item(&actor, item_id, &request).await?;
    Ok(Json(json!({ "success": true, "content_item": item })))
}

#[tracing::instrument(skip(state, request), fields(actor_id = actor.id))]
pub async fn move_item(
    State(state): State<AppState>,
    actor: AuthUser,
    Path(item_id): Path<i64>,
    Json(request): Json<MoveRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let item = state.pipeline.move_item(&actor, item_id, &request).await?;
    Ok(Json(json!({ "success": true, "content_item": item })))
}

#[tracing::instrument(skip(state, request), fields(actor_id = actor.id))]
pub async fn approval(
    State(state): State<AppState>,
    actor: AuthUser,
    Path(item_id): Path<i64>,
    Json(request): Json<ApprovalRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let item = state.pipeline.approve(&actor, item_id, &request).await?;
    Ok(Json(json!({ "success": true, "content_item": item })))
}

#[tracing::instrument(skip(state, request), fields(actor_id = actor.id))]
pub async fn schedule(
    State(state): State<AppState>,
    actor: AuthUser,
    Path(item_id): Path<i64>,
    Json(request): Json<ScheduleRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let item = state.pipeline.schedule(&actor, item_id, &request).await?;
    Ok(Json(json!({ "success": true, "content_item": item })))
}

#[tracing::instrument(skip(state, request), fields(actor_id = actor.id))]
pub async fn attach_media(
    State(state): State<AppState>,
    actor: AuthUser,
    Path(item_id): Path<i64>,
    Json(request): Json<AttachMedia>,
) -> Result<(StatusCode, Json<serde_json::Value>), AppError> {
    let asset = state.pipeline.attach_media(&actor, item_id, &request).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "success": true, "media": asset })),
    ))
}

#[tracing::instrument(skip(state), fields(actor_id = actor.id))]
pub async fn list_media(
    State(state): State<AppState>,
    actor: AuthUser,
    Path(item_id): Path<i64>,
) -> Result<Json<serde_json::Value>, AppError> {
    let media = state.pipeline.list_media(&actor, item_id).await?;
    Ok(Json(json!({ "success": true, "media": media })))
}

#[tracing::instrument(skip(state), fields(actor_id = actor.id))]
pub async fn item_history(
    State(state): State<AppState>,
    actor: AuthUser,
    Path(item_id): Path<i64>,
) -> Result<Json<serde_json::Value>, AppError> {
    let history = state.pipeline.item_history(&actor, item_id).await?;
    Ok(Json(json!({ "success": true, "history": history })))
}
