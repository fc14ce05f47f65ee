use std::sync::Arc;

use sqlx::PgPool;

pub mod config;
pub mod db;
pub mod errors;
pub mod fingerprint;
pub mod jobs;
pub mod middleware;
pub mod models;
pub mod parser;
pub mod routes;
pub mod rules;
pub mod services;

use config::AppConfig;
use jobs::JobQueue;
use services::insights::InsightClient;

/// Shared application state handed to every Axum handler.
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub config: AppConfig,
    pub jobs: JobQueue,
    pub insight_client: Arc<dyn InsightClient>,
}
