//! Calendar Backend - Main Entry Point

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use calendar_backend::{
    api,
    config::Config,
    db,
    error::Result,
    services::{
        audit_service::AuditService,
        auth_service::AuthService,
        backup_service::BackupService,
        dump_tool::PgDumpTool,
        entity_store::PgEntityStore,
        metrics_service,
        notification_service::{BackupNotifier, EmailNotificationSink},
        scheduler_service::BackupScheduler,
    },
    telemetry,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = Config::from_env()?;

    // Hold the guard so pending spans are flushed on exit
    let _otel_guard =
        telemetry::init_tracing(config.otel_endpoint.as_deref(), &config.otel_service_name)?;
    tracing::info!("Starting Calendar Backend");
    tracing::debug!(?config, "Loaded configuration");

    // Connect to database
    let db_pool = db::create_pool(&config.database_url).await?;
    tracing::info!("Connected to database");

    // Run migrations
    db::run_migrations(&db_pool).await?;
    tracing::info!("Database migrations complete");

    // Initialize Prometheus metrics recorder
    let metrics_handle = metrics_service::init_metrics()?;
    tracing::info!("Prometheus metrics recorder initialized");

    let dump_tool = Arc::new(PgDumpTool::new(
        config.backup.pg_dump_path.clone(),
        config.backup.psql_path.clone(),
    ));
    let entity_store = Arc::new(PgEntityStore::new(db_pool.clone()));
    let audit = Arc::new(AuditService::new(db_pool.clone()));
    let backups = Arc::new(BackupService::new(
        config.backup.clone(),
        dump_tool,
        entity_store,
        audit,
    ));

    let email = Arc::new(EmailNotificationSink::new(
        config.resend_api_key.clone(),
        config.from_email.clone(),
    )?);
    let notifier = Arc::new(BackupNotifier::new(email, config.notifications.clone()));

    let scheduler = Arc::new(BackupScheduler::new(
        config.scheduler.clone(),
        backups.clone(),
        notifier.clone(),
    ));
    let schedule_state = scheduler.start();
    tracing::info!(state = ?schedule_state, "Backup scheduler initialized");

    let mut app_state = api::AppState::new(
        db_pool,
        backups,
        scheduler.clone(),
        notifier,
        Arc::new(AuthService::new(&config.jwt_secret)),
    );
    app_state.set_metrics_handle(metrics_handle);
    let state = Arc::new(app_state);

    // Build router
    let app = Router::new()
        .merge(api::routes::create_router(state))
        .layer(axum::middleware::from_fn(metrics_service::metrics_middleware))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http());

    // Start server
    let addr: SocketAddr = config.bind_address.parse()?;
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let stopping = scheduler.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { stopping.stop_on(shutdown_signal()).await })
        .await?;

    scheduler.shutdown().await;
    tracing::info!("Shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
