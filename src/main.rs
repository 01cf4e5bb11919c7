use anyhow::Context;
use rust_lead_scout::config::Config;
use rust_lead_scout::db::Database;
use rust_lead_scout::handlers::{self, AppState};
use rust_lead_scout::pipeline::LeadPipeline;
use rust_lead_scout::providers::ProviderSelector;
use rust_lead_scout::quota::{PgQuotaStore, QuotaEnforcer};
use rust_lead_scout::scorer::LeadScorer;
use rust_lead_scout::session::{PgUserDirectory, SessionResolver};
use rust_lead_scout::storage::{LeadGate, LeadStore, PgLeadStore};

use axum::{routing::get, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceBuilder;
use tower_governor::{
    governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor, GovernorLayer,
};
use tower_http::{cors::CorsLayer, limit::RequestBodyLimitLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Main entry point for the application.
///
/// Initializes tracing, configuration, the database pool and migrations, the
/// provider chain, scorer and stores, then serves the HTTP API.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rust_lead_scout=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env()?;

    // Initialize database connection pool
    let db = Database::new(&config.database_url).await?;
    tracing::info!("Database connection pool established");
    db.migrate().await.context("Failed to run migrations")?;
    tracing::info!("Migrations applied");

    let lead_store: Arc<dyn LeadStore> = Arc::new(PgLeadStore::new(db.pool.clone()));
    let quota = Arc::new(QuotaEnforcer::new(Arc::new(PgQuotaStore::new(
        db.pool.clone(),
    ))));
    let sessions = Arc::new(SessionResolver::new(
        Arc::new(PgUserDirectory::new(db.pool.clone())),
        Duration::from_secs(config.session_cache_ttl_secs),
        config.allow_query_auth,
    ));
    tracing::info!(
        "Session cache initialized ({}s TTL)",
        config.session_cache_ttl_secs
    );

    let selector = ProviderSelector::from_settings(&config.providers)?;
    let scorer = Arc::new(LeadScorer::new(config.scorer.clone())?);
    let gate = Arc::new(LeadGate::new(lead_store.clone()));

    let pipeline = Arc::new(LeadPipeline::new(
        selector,
        scorer,
        gate,
        quota.clone(),
        config.pipeline.clone(),
    ));

    // Build application state
    let app_state = Arc::new(AppState {
        pipeline,
        sessions,
        leads: lead_store,
        quota,
    });

    // Configure rate limiter: 10 requests/second per IP, burst of 20
    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_second(10)
            .burst_size(20)
            .key_extractor(SmartIpKeyExtractor)
            .finish()
            .context("Invalid rate limiter configuration")?,
    );

    let protected_routes = handlers::api_routes().layer(
        ServiceBuilder::new()
            // Request size limit: 1MB max payload
            .layer(RequestBodyLimitLayer::new(1024 * 1024))
            // Rate limiting: 10 req/sec per IP, burst of 20
            .layer(GovernorLayer {
                config: governor_conf,
            }),
    );

    // Health check bypasses rate limiting
    let app = Router::new()
        .route("/health", get(handlers::health))
        .merge(protected_routes)
        .with_state(app_state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
