//! A rule match aggregated across fingerprint groups and/or error events
//! within one ingestion. Replace-only: every analysis run deletes the prior
//! set and inserts the new one atomically.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq, PartialOrd, Ord)]
#[sqlx(type_name = "severity_level", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Low,
    Med,
    High,
    Crit,
}

impl Severity {
    /// Rank used to sort findings, higher first. Matches the source's
    /// `{CRIT:4, HIGH:3, MED:2, LOW:1}` table.
    pub fn rank(self) -> u8 {
        match self {
            Severity::Crit => 4,
            Severity::High => 3,
            Severity::Med => 2,
            Severity::Low => 1,
        }
    }
}

/// One `{fingerprint, count}` entry within a finding's matched-fingerprints list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MatchedFingerprint {
    pub fingerprint: String,
    pub count: i64,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct FindingRow {
    pub id: Uuid,
    pub ingestion_id: Uuid,
    pub rule_id: String,
    pub title: String,
    pub severity: Severity,
    pub confidence: f64,
    pub total_occurrences: i64,
    pub matched_fingerprints: serde_json::Value,
    pub evidence_event_ids: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Application-level view with `matched_fingerprints`/`evidence_event_ids`
/// decoded out of their JSONB columns.
#[derive(Debug, Clone, Serialize)]
pub struct Finding {
    pub id: Uuid,
    pub ingestion_id: Uuid,
    pub rule_id: String,
    pub title: String,
    pub severity: Severity,
    pub confidence: f64,
    pub total_occurrences: i64,
    pub matched_fingerprints: Vec<MatchedFingerprint>,
    pub evidence_event_ids: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl From<FindingRow> for Finding {
    fn from(row: FindingRow) -> Self {
        Self {
            id: row.id,
            ingestion_id: row.ingestion_id,
            rule_id: row.rule_id,
            title: row.title,
            severity: row.severity,
            confidence: row.confidence,
            total_occurrences: row.total_occurrences,
            matched_fingerprints: serde_json::from_value(row.matched_fingerprints)
                .unwrap_or_default(),
            evidence_event_ids: serde_json::from_value(row.evidence_event_ids)
                .unwrap_or_default(),
            created_at: row.created_at,
        }
    }
}

/// Row-shaped insert payload built by the findings engine before persistence.
#[derive(Debug, Clone)]
pub struct NewFinding {
    pub rule_id: String,
    pub title: String,
    pub severity: Severity,
    pub confidence: f64,
    pub total_occurrences: i64,
    pub matched_fingerprints: Vec<MatchedFingerprint>,
    pub evidence_event_ids: Vec<Uuid>,
}
