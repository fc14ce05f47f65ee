//! Stored LLM-generated explanation for a scope within an ingestion.
//! Replace-only per `(ingestion_id, scope_type, scope_id)`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "ai_scope_type", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ScopeType {
    Group,
    Finding,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct AiAnalysis {
    pub id: Uuid,
    pub ingestion_id: Uuid,
    pub scope_type: ScopeType,
    /// Fingerprint hex digest for `group` scope, finding id (as text) for `finding` scope.
    pub scope_id: String,
    pub result: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct GenerateInsightRequest {
    pub scope_type: ScopeType,
    pub fingerprint: Option<String>,
    pub finding_id: Option<Uuid>,
}
