pub mod config;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;

use axum::{
    middleware::{from_fn, from_fn_with_state},
    routing::{get, patch, post},
    Router,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::config::AgencyConfig;
use crate::middleware::{auth_middleware, metrics_middleware, JwtValidator};
use crate::services::{
    CommentService, Database, LedgerService, PipelineService, ProvisioningService,
    VerificationService,
};

#[derive(Clone)]
pub struct AppState {
    pub config: AgencyConfig,
    pub db: Database,
    pub jwt: Arc<JwtValidator>,
    pub ledger: LedgerService,
    pub pipeline: PipelineService,
    pub provisioning: ProvisioningService,
    pub comments: CommentService,
    pub verification: VerificationService,
}

pub fn build_router(state: AppState) -> Router {
    // Verification runs before the caller holds a token.
    let verification_routes = Router::new()
        .route(
            "/auth/verification/request",
            post(handlers::verification::request_verification),
        )
        .route(
            "/auth/verification/confirm",
            post(handlers::verification::confirm_verification),
        );

    let protected_routes = Router::new()
        .route("/devices", post(handlers::devices::register_device))
        .route(
            "/invoices",
            post(handlers::invoices::create_invoice).get(handlers::invoices::list_invoices),
        )
        .route(
            "/invoices/:id",
            get(handlers::invoices::get_invoice).patch(handlers::invoices::update_invoice),
        )
        .route("/invoices/:id/items", post(handlers::invoices::add_item))
        .route(
            "/invoices/:id/items/:item_id",
            patch(handlers::invoices::update_item).delete(handlers::invoices::remove_item),
        )
        .route(
            "/invoices/:id/payments",
            post(handlers::invoices::record_payment),
        )
        .route(
            "/invoices/:id/start-pipeline",
            post(handlers::invoices::start_pipeline),
        )
        .route(
            "/invoices/:id/history",
            get(handlers::invoices::invoice_history),
        )
        .route(
            "/content-items",
            post(handlers::content_items::create_item).get(handlers::content_items::list_items),
        )
        .route(
            "/content-items/:id",
            get(handlers::content_items::get_item).patch(handlers::content_items::update_item),
        )
        .route(
            "/content-items/:id/move",
            post(handlers::content_items::move_item),
        )
        .route(
            "/content-items/:id/approval",
            post(handlers::content_items::approval),
        )
        .route(
            "/content-items/:id/schedule",
            post(handlers::content_items::schedule),
        )
        .route(
            "/content-items/:id/media",
            post(handlers::content_items::attach_media).get(handlers::content_items::list_media),
        )
        .route(
            "/content-items/:id/comments",
            post(handlers::comments::create_comment).get(handlers::comments::list_comments),
        )
        .route(
            "/content-items/:id/history",
            get(handlers::content_items::item_history),
        )
        .layer(from_fn_with_state(state.clone(), auth_middleware));

    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/metrics", get(handlers::metrics))
        .nest("/api/v1", verification_routes.merge(protected_routes))
        .with_state(state)
        .layer(from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
