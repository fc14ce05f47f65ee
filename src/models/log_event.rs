//! A single normalized log record produced by the parser.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "parse_kind", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ParseKind {
    Json,
    Text,
}

/// A parsed, persisted log record. Immutable once written.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct LogEvent {
    pub id: Uuid,
    pub ingestion_id: Uuid,
    pub seq: i64,
    pub ts: Option<DateTime<Utc>>,
    pub ts_raw: Option<String>,
    pub service: Option<String>,
    pub level: Option<String>,
    pub message: String,
    pub raw: String,
    pub attrs: serde_json::Value,
    pub parse_kind: ParseKind,
    pub parse_confidence: f64,
    pub fingerprint: String,
}

/// Serialized shape returned by the event-listing query.
#[derive(Debug, Clone, Serialize)]
pub struct LogEventView {
    pub id: Uuid,
    pub seq: i64,
    pub ts: Option<DateTime<Utc>>,
    pub ts_raw: Option<String>,
    pub service: Option<String>,
    pub level: Option<String>,
    pub message: String,
    pub attrs: serde_json::Value,
    pub parse_kind: ParseKind,
    pub parse_confidence: f64,
    pub fingerprint: String,
}

impl From<&LogEvent> for LogEventView {
    fn from(e: &LogEvent) -> Self {
        Self {
            id: e.id,
            seq: e.seq,
            ts: e.ts,
            ts_raw: e.ts_raw.clone(),
            service: e.service.clone(),
            level: e.level.clone(),
            message: e.message.clone(),
            attrs: e.attrs.clone(),
            parse_kind: e.parse_kind,
            parse_confidence: e.parse_confidence,
            fingerprint: e.fingerprint.clone(),
        }
    }
}
