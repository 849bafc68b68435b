//! services/api/src/bin/api.rs

use api_lib::{
    adapters::{auth::DbTokenVerifier, db::DbAdapter, rate::DbRateSource},
    config::Config,
    error::ApiError,
    web::{
        free_target::{
            free_target_today_handler, override_day_handler, record_call_handler,
            start_timer_handler, stop_timer_handler, toggle_free_target_handler,
        },
        middleware::require_auth,
        presence::PresenceRegistry,
        rest::{
            accept_call_handler, end_call_handler, initiate_call_handler, rate_call_handler,
            ApiDoc,
        },
        signaling::SignalingRouter,
        state::AppState,
        sweeper::spawn_sweeper,
        ws_handler,
    },
};
use axum::{
    http::{
        header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE},
        HeaderValue, Method,
    },
    middleware as axum_middleware,
    routing::{get, patch, post},
    Router,
};
use hostline_core::{free_target::FreeTargetService, ledger::CallLedger};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[tokio::main]
async fn main() -> Result<(), ApiError> {
    // --- 1. Load Configuration & Set Up Logging ---
    let config = Arc::new(Config::from_env()?);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.to_string()))
        .with(tracing_subscriber::fmt::layer())
        .init();
    info!("Configuration loaded. Starting server...");

    // --- 2. Connect to Database & Run Migrations ---
    info!("Connecting to database...");
    let db_pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await?;
    let db_adapter = Arc::new(DbAdapter::new(db_pool.clone()));
    info!("Running database migrations...");
    db_adapter.run_migrations().await?;
    info!("Database migrations complete.");

    // --- 3. Build the Core Services ---
    let free_targets = Arc::new(FreeTargetService::new(db_adapter.clone()));
    let ledger = Arc::new(CallLedger::new(
        db_adapter.clone(),
        db_adapter.clone(),
        db_adapter.clone(),
        db_adapter.clone(),
        db_adapter.clone(),
        Arc::new(DbRateSource::new(db_pool.clone())),
        free_targets.clone(),
        config.host_share_percent,
    ));
    let presence = PresenceRegistry::new();
    let signaling = Arc::new(SignalingRouter::new(presence.clone()));
    let verifier = Arc::new(DbTokenVerifier::new(db_pool.clone()));

    // --- 4. Build the Shared AppState ---
    let app_state = Arc::new(AppState {
        config: config.clone(),
        ledger: ledger.clone(),
        free_targets,
        hosts: db_adapter.clone(),
        verifier,
        presence,
        signaling,
    });

    // --- 5. Start the Idle-Call Sweeper ---
    let shutdown = CancellationToken::new();
    let _sweeper = spawn_sweeper(
        ledger,
        config.call_idle_timeout_secs,
        config.sweep_interval_secs,
        shutdown.clone(),
    );

    let cors = CorsLayer::new()
        .allow_origin(
            config
                .cors_origin
                .parse::<HeaderValue>()
                .map_err(|e| ApiError::Internal(format!("invalid CORS_ORIGIN: {e}")))?,
        )
        .allow_credentials(true)
        .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::OPTIONS])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE, ACCEPT]);

    // --- 6. Create the Web Router ---
    // Every route requires authentication.
    let protected_routes = Router::new()
        .route("/calls/initiate", post(initiate_call_handler))
        .route("/calls/accept", post(accept_call_handler))
        .route("/calls/end", post(end_call_handler))
        .route("/calls/rate", post(rate_call_handler))
        .route("/free-target/today", get(free_target_today_handler))
        .route("/free-target/start-timer", post(start_timer_handler))
        .route("/free-target/stop-timer", post(stop_timer_handler))
        .route("/free-target/record-call", post(record_call_handler))
        .route(
            "/admin/free-target/{host_id}/toggle",
            patch(toggle_free_target_handler),
        )
        .route(
            "/admin/free-target/{host_id}/override-day",
            patch(override_day_handler),
        )
        .route("/ws", get(ws_handler))
        .layer(axum_middleware::from_fn_with_state(
            app_state.clone(),
            require_auth,
        ));

    let api_router = Router::new()
        .merge(protected_routes)
        .layer(cors)
        .with_state(app_state);

    // Merge the API router with the Swagger UI router for a complete application.
    let app = Router::new()
        .merge(api_router)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()));

    // --- 7. Start the Server ---
    info!("Starting server on {}", config.bind_address);
    info!(
        "Swagger UI available at http://{}/swagger-ui",
        config.bind_address
    );
    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown({
            let shutdown = shutdown.clone();
            async move {
                let _ = tokio::signal::ctrl_c().await;
                info!("shutdown signal received");
                shutdown.cancel();
            }
        })
        .await?;

    Ok(())
}
