//! Ingestion entity: one submission of log text and the status of its
//! two independent background pipelines.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "ingestion_source_type", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Paste,
    Upload,
    Bundle,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "job_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Done,
    Failed,
}

/// One submission of log text, owning (cascade) its events, findings, and analyses.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Ingestion {
    pub id: Uuid,
    pub project_id: Uuid,
    pub source_type: SourceType,
    pub status: JobStatus,
    pub finding_status: JobStatus,
    pub created_at: DateTime<Utc>,
}

/// Narrow view returned by create/get endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct IngestionSummary {
    pub id: Uuid,
    pub project_id: Uuid,
    pub source_type: SourceType,
    pub status: JobStatus,
}

impl From<&Ingestion> for IngestionSummary {
    fn from(i: &Ingestion) -> Self {
        Self {
            id: i.id,
            project_id: i.project_id,
            source_type: i.source_type,
            status: i.status,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateIngestion {
    pub source_type: SourceType,
}

#[derive(Debug, Deserialize)]
pub struct PasteLogsRequest {
    pub text: String,
}
