use agency_service::config::AgencyConfig;
use agency_service::middleware::JwtValidator;
use agency_service::services::{
    init_metrics, ChannelBroker, CommentService, Database, EmailProvider, FcmProvider,
    LedgerService, MockEmailProvider, MockPushProvider, Notifier, PipelineService,
    ProvisioningService, PushProvider, RealtimeBroker, SmtpProvider, TokenSource,
    VerificationService,
};
use agency_service::{build_router, AppState};
use service_core::error::AppError;
use service_core::observability::{init_tracing, shutdown_tracing};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;

/// Buffered events per realtime group before slow subscribers lag.
const BROKER_CAPACITY: usize = 256;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    let config = AgencyConfig::load()?;

    init_tracing(
        "agency-service",
        &config.common.log_level,
        config.common.otlp_endpoint.as_deref(),
    );
    init_metrics();

    tracing::info!(
        environment = %config.common.environment,
        "Starting agency service"
    );

    let db = Database::new(
        &config.database.url,
        config.database.max_connections,
        config.database.min_connections,
    )
    .await?;
    db.run_migrations().await?;
    tracing::info!("Database ready");

    let email: Arc<dyn EmailProvider> = if config.smtp.enabled {
        match SmtpProvider::new(config.smtp.clone()) {
            Ok(provider) => {
                tracing::info!("SMTP email provider initialized");
                Arc::new(provider)
            }
            Err(e) => {
                tracing::warn!("Failed to initialize SMTP provider: {}. Using mock.", e);
                Arc::new(MockEmailProvider::new(true))
            }
        }
    } else {
        tracing::info!("SMTP provider disabled, using mock email provider");
        Arc::new(MockEmailProvider::new(true))
    };

    let push: Arc<dyn PushProvider> = if config.fcm.enabled {
        match FcmProvider::new(config.fcm.clone()) {
            Ok(provider) => {
                tracing::info!("FCM push provider initialized");
                Arc::new(provider)
            }
            Err(e) => {
                tracing::warn!("Failed to initialize FCM provider: {}. Using mock.", e);
                Arc::new(MockPushProvider::new(true))
            }
        }
    } else {
        tracing::info!("FCM provider disabled, using mock push provider");
        Arc::new(MockPushProvider::new(true))
    };

    let broker: Arc<dyn RealtimeBroker> = Arc::new(ChannelBroker::new(BROKER_CAPACITY));
    let tokens: Arc<dyn TokenSource> = Arc::new(db.clone());
    let notifier = Notifier::new(tokens, broker, push);

    let jwt = Arc::new(JwtValidator::new(&config.auth.jwt_secret));

    let state = AppState {
        db: db.clone(),
        jwt,
        ledger: LedgerService::new(db.clone(), notifier.clone()),
        pipeline: PipelineService::new(
            db.clone(),
            notifier.clone(),
            config.app.utc_offset_minutes,
        ),
        provisioning: ProvisioningService::new(db.clone()),
        comments: CommentService::new(db.clone(), notifier),
        verification: VerificationService::new(db, email),
        config: config.clone(),
    };

    let app = build_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.common.port));
    tracing::info!(address = %addr, "Listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    shutdown_tracing();
    tracing::info!("Service shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
