use axum::{
    routing::{get, post},
    Router,
};
use lead_gateway::config::{Config, PipelineRules};
use lead_gateway::db::Database;
use lead_gateway::handlers::{self, AppState};
use lead_gateway::mapping::Mapper;
use lead_gateway::normalization::Normalizer;
use lead_gateway::partner_client::PartnerClient;
use lead_gateway::processor::Processor;
use lead_gateway::retry::RetryPolicy;
use lead_gateway::store::PgLeadStore;
use lead_gateway::validation::Validator;
use lead_gateway::worker;
use moka::future::Cache;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceBuilder;
use tower_governor::{
    governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor, GovernorLayer,
};
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::prelude::*;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "lead_gateway=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    let rules = PipelineRules::from_file(&config.rules_path)?;

    let db = Database::new(&config.database_url).await?;
    tracing::info!("Database connection pool established, migrations applied");

    let store = Arc::new(PgLeadStore::new(db.pool.clone()));

    let processor = Arc::new(Processor::new(
        store.clone(),
        Validator::new(rules.validation)?,
        Normalizer::new(rules.normalization),
        Mapper::new(rules.attributes, config.product_name.clone()),
        PartnerClient::new(
            config.partner_api_url.clone(),
            config.partner_api_token.clone(),
            Duration::from_secs(config.partner_timeout_secs),
        )?,
        RetryPolicy::new(
            Duration::from_millis(config.retry_base_ms),
            Duration::from_millis(config.retry_max_ms),
            config.max_delivery_attempts,
        ),
    ));

    let queue = worker::spawn_worker(processor, 1024);

    // Repeat-submission cache: 24 hour TTL, annotation only.
    let recent_submission_cache = Cache::builder()
        .time_to_live(Duration::from_secs(86400))
        .max_capacity(50_000)
        .build();
    tracing::info!("Repeat-submission cache initialized");

    let app_state = Arc::new(AppState {
        store,
        queue,
        webhook_secret: config.webhook_secret.clone(),
        recent_submission_cache,
    });

    // Rate limiter: 10 requests/second per IP, burst of 20
    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_second(10)
            .burst_size(20)
            .key_extractor(SmartIpKeyExtractor)
            .finish()
            .ok_or_else(|| anyhow::anyhow!("invalid rate limiter configuration"))?,
    );

    let protected_routes = Router::new()
        .route("/webhooks/leads", post(handlers::intake_lead))
        .route("/api/v1/leads/:id", get(handlers::get_lead))
        .route("/api/v1/stats", get(handlers::get_stats))
        .layer(
            ServiceBuilder::new()
                // 1MB max payload
                .layer(RequestBodyLimitLayer::new(1024 * 1024))
                .layer(GovernorLayer {
                    config: governor_conf,
                }),
        );

    // Health check bypasses rate limiting.
    let app = Router::new()
        .route("/health", get(handlers::health))
        .merge(protected_routes)
        .with_state(app_state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
