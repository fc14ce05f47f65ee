use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    http::header,
    routing::{get, post},
    Router,
};
use mimalloc::MiMalloc;
use logsieve::{
    config::AppConfig,
    db,
    jobs::{spawn_worker_pool, JobQueue},
    routes,
    services::insights::NullInsightClient,
    AppState,
};
use tower_http::{
    compression::CompressionLayer, cors::CorsLayer, limit::RequestBodyLimitLayer,
    timeout::TimeoutLayer, trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

// M-MIMALLOC-APP: Use mimalloc as global allocator for improved performance.
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "logsieve=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    let config = AppConfig::from_env().expect("Failed to load configuration");

    let pool = db::create_pool(&config.database_url, config.database_max_connections).await?;
    tracing::info!("Database connection pool created");

    sqlx::migrate!("./migrations").run(&pool).await?;
    tracing::info!("Database migrations applied");

    let jobs = JobQueue::new(&config.redis_url)?;

    let worker_handles = spawn_worker_pool(
        pool.clone(),
        jobs.clone(),
        Arc::from(config.blob_store_root.as_str()),
        config.worker_count,
    );
    tracing::info!(count = worker_handles.len(), "background workers started");

    let cors = if config.allowed_origins.trim() == "*" {
        CorsLayer::new().allow_origin(tower_http::cors::Any)
    } else {
        let origins: Vec<axum::http::HeaderValue> = config
            .allowed_origins
            .split(',')
            .filter_map(|o| o.trim().parse().ok())
            .collect();
        CorsLayer::new().allow_origin(origins)
    }
    .allow_methods([
        axum::http::Method::GET,
        axum::http::Method::POST,
        axum::http::Method::DELETE,
    ])
    .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION, header::ACCEPT]);

    let state = AppState {
        db: pool,
        config: config.clone(),
        jobs,
        insight_client: Arc::new(NullInsightClient),
    };

    let ingestion_routes = Router::new()
        .route(
            "/orgs/{org_id}/projects/{project_id}/ingestions",
            get(routes::ingestions::list_ingestions).post(routes::ingestions::create_ingestion),
        )
        .route(
            "/orgs/{org_id}/projects/{project_id}/ingestions/{id}",
            get(routes::ingestions::get_ingestion).delete(routes::ingestions::delete_ingestion),
        )
        .route(
            "/orgs/{org_id}/projects/{project_id}/ingestions/{id}/logs/paste",
            post(routes::ingestions::paste_logs),
        )
        .route(
            "/orgs/{org_id}/projects/{project_id}/ingestions/{id}/logs/upload",
            post(routes::ingestions::upload_logs),
        )
        .route(
            "/orgs/{org_id}/projects/{project_id}/ingestions/{id}/overview",
            get(routes::ingestions::overview),
        )
        .route(
            "/orgs/{org_id}/projects/{project_id}/ingestions/{id}/events",
            get(routes::ingestions::list_events),
        )
        .route(
            "/orgs/{org_id}/projects/{project_id}/ingestions/{id}/groups",
            get(routes::ingestions::list_groups),
        )
        .route(
            "/orgs/{org_id}/projects/{project_id}/ingestions/{id}/groups/{fingerprint}",
            get(routes::ingestions::group_detail),
        )
        .route(
            "/orgs/{org_id}/projects/{project_id}/ingestions/{id}/findings",
            get(routes::ingestions::list_findings),
        )
        .route(
            "/orgs/{org_id}/projects/{project_id}/ingestions/{id}/findings/{finding_id}",
            get(routes::ingestions::finding_detail),
        )
        .route(
            "/orgs/{org_id}/projects/{project_id}/ingestions/{id}/insights",
            post(routes::ingestions::generate_insight),
        );

    let app = Router::new()
        .route("/health/live", get(routes::health::live))
        .route("/health/ready", get(routes::health::ready))
        .nest("/api/v1", ingestion_routes)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(TimeoutLayer::new(Duration::from_secs(config.request_timeout_secs)))
        .layer(RequestBodyLimitLayer::new(config.max_body_size))
        .with_state(state);

    let host: std::net::IpAddr = config.host.parse().expect("invalid BACKEND_HOST");
    let addr = SocketAddr::from((host, config.port));

    match (&config.tls_cert_path, &config.tls_key_path) {
        (Some(cert), Some(key)) => {
            let cert_path = std::path::PathBuf::from(cert);
            let key_path = std::path::PathBuf::from(key);

            tracing::info!("TLS enabled — loading certificates...");
            let tls_config =
                axum_server::tls_rustls::RustlsConfig::from_pem_file(&cert_path, &key_path)
                    .await
                    .map_err(|e| anyhow::anyhow!("Failed to load TLS certificates: {e}"))?;

            tracing::info!(host = %addr, "HTTPS server listening");
            axum_server::bind_rustls(addr, tls_config)
                .serve(app.into_make_service())
                .await?;
        }
        _ => {
            tracing::warn!(host = %addr, "Starting HTTP server (TLS not configured)");
            let listener = tokio::net::TcpListener::bind(addr).await?;
            axum::serve(listener, app).await?;
        }
    }

    Ok(())
}
