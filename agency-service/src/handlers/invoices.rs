use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde_json::json;

use crate::middleware::AuthUser;
use crate::models::{
    CreateInvoice, ListInvoicesFilter, NewInvoiceItem, RecordPayment, UpdateInvoice,
    UpdateInvoiceItem,
};
use crate::AppState;
use service_core::error::AppError;

#[tracing::instrument(skip(state, request), fields(actor_id = actor.id))]
pub async fn create_invoice(
    State(state): State<AppState>,
    actor: AuthUser,
    Json(request): Json<CreateInvoice>,
) -> Result<(StatusCode, Json<serde_json::Value>), AppError> {
    let invoice = state.ledger.create_invoice(&actor, &request).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "success": true, "invoice": invoice })),
    ))
}

#[tracing::instrument(skip(state, filter), fields(actor_id = actor.id))]
pub async fn list_invoices(
    State(state): State<AppState>,
    actor: AuthUser,
    Query(filter): Query<ListInvoicesFilter>,
) -> Result<Json<serde_json::Value>, AppError> {
    let invoices = state.ledger.list_invoices(&actor, &filter).await?;
    Ok(Json(json!({ "success": true, "invoices": invoices })))
}

#[tracing::instrument(skip(state), fields(actor_id = actor.id))]
pub async fn get_invoice(
    State(state): State<AppState>,
    actor: AuthUser,
    Path(invoice_id): Path<i64>,
) -> Result<Json<serde_json::Value>, AppError> {
    let (invoice, items, payments) = state.ledger.get_invoice_detail(&actor, invoice_id).await?;
    Ok(Json(json!({
        "success": true,
        "invoice": invoice,
        "items": items,
        "payments": payments
    })))
}

#[tracing::instrument(skip(state, request), fields(actor_id = actor.id))]
pub async fn update_invoice(
    State(state): State<AppState>,
    actor: AuthUser,
    Path(invoice_id): Path<i64>,
    Json(request): Json<UpdateInvoice>,
) -> Result<Json<serde_json::Value>, AppError> {
    let invoice = state
        .ledger
        .update_invoice(&actor, invoice_id, &request)
        .await?;
    Ok(Json(json!({ "success": true, "invoice": invoice })))
}

#[tracing::instrument(skip(state, request), fields(actor_id = actor.id))]
pub async fn add_item(
    State(state): State<AppState>,
    actor: AuthUser,
    Path(invoice_id): Path<i64>,
    Json(request): Json<NewInvoiceItem>,
) -> Result<(StatusCode, Json<serde_json::Value>), AppError> {
    let (item, invoice) = state.ledger.add_item(&actor, invoice_id, &request).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "success": true, "item": item, "invoice": invoice })),
    ))
}

#[tracing::instrument(skip(state, request), fields(actor_id = actor.id))]
pub async fn update_item(
    State(state): State<AppState>,
    actor: AuthUser,
    Path((invoice_id, item_id)): Path<(i64, i64)>,
    Json(request): Json<UpdateInvoiceItem>,
) -> Result<Json<serde_json::Value>, AppError> {
    let (item, invoice) = state
        .ledger
        .update_item(&actor, invoice_id, item_id, &request)
        .await?;
    Ok(Json(json!({ "success": true, "item": item, "invoice": invoice })))
}

#[tracing::instrument(skip(state), fields(actor_id = actor.id))]
pub async fn remove_item(
    State(state): State<AppState>,
    actor: AuthUser,
    Path((invoice_id, item_id)): Path<(i64, i64)>,
) -> Result<Json<serde_json::Value>, AppError> {
    let invoice = state
        .ledger
        .remove_item(&actor, invoice_id, item_id)
        .await?;
    Ok(Json(json!({ "success": true, "invoice": invoice })))
}

#[tracing::instrument(skip(state, request), fields(actor_id = actor.id))]
pub async fn record_payment(
    State(state): State<AppState>,
    actor: AuthUser,
    Path(invoice_id): Path<i64>,
    Json(request): Json<RecordPayment>,
) -> Result<(StatusCode, Json<serde_json::Value>), AppError> {
    let (payment, invoice) = state
        .ledger
        .record_payment(&actor, invoice_id, &request)
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "success": true, "payment": payment, "invoice": invoice })),
    ))
}

#[tracing::instrument(skip(state), fields(actor_id = actor.id))]
pub async fn start_pipeline(
    State(state): State<AppState>,
    actor: AuthUser,
    Path(invoice_id): Path<i64>,
) -> Result<Json<serde_json::Value>, AppError> {
    let outcome = state.provisioning.start_pipeline(&actor, invoice_id).await?;
    Ok(Json(json!({
        "success": true,
        "invoice": outcome.invoice,
        "created": outcome.created,
        "skipped": outcome.skipped
    })))
}

#[tracing::instrument(skip(state), fields(actor_id = actor.id))]
pub async fn invoice_history(
    State(state): State<AppState>,
    actor: AuthUser,
    Path(invoice_id): Path<i64>,
) -> Result<Json<serde_json::Value>, AppError> {
    let history = state.ledger.invoice_history(&actor, invoice_id).await?;
    Ok(Json(json!({ "success": true, "history": history })))
}
