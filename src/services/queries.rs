//! Read-only aggregate and detail views over one ingestion's events and
//! findings: cursor-paginated listing, overview stats, group drill-down, and
//! finding detail with evidence preview.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::finding::{Finding, FindingRow};
use crate::models::log_event::{LogEvent, LogEventView};
use crate::models::pagination::CursorPage;
use crate::services::events::{self, EventFilters};

/// `GET /{id}/events`
pub async fn list_events(
    pool: &PgPool,
    ingestion_id: Uuid,
    filters: &EventFilters,
    cursor: i64,
    limit: i64,
) -> Result<CursorPage<LogEventView>, AppError> {
    let probe = limit + 1;
    let rows = events::list_events(pool, ingestion_id, filters, cursor, probe).await?;
    let views: Vec<LogEventView> = rows.iter().map(LogEventView::from).collect();
    Ok(CursorPage::from_probe(views, limit, |v| v.seq))
}

#[derive(Debug, Serialize)]
pub struct TimeRange {
    pub min_ts: Option<DateTime<Utc>>,
    pub max_ts: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct TopFingerprintSummary {
    pub fingerprint: String,
    pub count: i64,
    pub latest: LogEventView,
}

#[derive(Debug, Serialize)]
pub struct Overview {
    pub total_events: i64,
    pub total_events_with_ts: i64,
    pub time_range: TimeRange,
    pub levels: BTreeMap<String, i64>,
    pub services_top: BTreeMap<String, i64>,
    pub top_fingerprints: Vec<TopFingerprintSummary>,
    pub findings: Vec<Finding>,
}

/// `GET /{id}/overview`: totals, histograms, top-10 groups, findings.
pub async fn overview(pool: &PgPool, ingestion_id: Uuid) -> Result<Overview, AppError> {
    #[derive(sqlx::FromRow)]
    struct Totals {
        total: i64,
        with_ts: i64,
        min_ts: Option<DateTime<Utc>>,
        max_ts: Option<DateTime<Utc>>,
    }
    let totals = sqlx::query_as::<_, Totals>(
        r#"
        SELECT
            COUNT(*) AS total,
            COUNT(ts) AS with_ts,
            MIN(ts) AS min_ts,
            MAX(ts) AS max_ts
        FROM log_events WHERE ingestion_id = $1
        "#,
    )
    .bind(ingestion_id)
    .fetch_one(pool)
    .await?;

    let level_rows: Vec<(Option<String>, i64)> = sqlx::query_as(
        "SELECT level, COUNT(*) FROM log_events WHERE ingestion_id = $1 GROUP BY level",
    )
    .bind(ingestion_id)
    .fetch_all(pool)
    .await?;
    let levels: BTreeMap<String, i64> = level_rows
        .into_iter()
        .map(|(level, count)| (level.unwrap_or_else(|| "UNKNOWN".to_string()), count))
        .collect();

    let service_rows: Vec<(Option<String>, i64)> = sqlx::query_as(
        "SELECT service, COUNT(*) FROM log_events WHERE ingestion_id = $1 GROUP BY service",
    )
    .bind(ingestion_id)
    .fetch_all(pool)
    .await?;
    let services_top: BTreeMap<String, i64> = service_rows
        .into_iter()
        .map(|(service, count)| {
            (
                service
                    .filter(|s| !s.is_empty())
                    .unwrap_or_else(|| "unknown".to_string()),
                count,
            )
        })
        .collect();

    let top_fingerprints = events::top_fingerprints(pool, ingestion_id, 0, 10)
        .await?
        .into_iter()
        .map(|r| TopFingerprintSummary {
            fingerprint: r.fingerprint,
            count: r.count,
            latest: LogEventView::from(&r.latest),
        })
        .collect();

    let findings = list_findings(pool, ingestion_id).await?;

    Ok(Overview {
        total_events: totals.total,
        total_events_with_ts: totals.with_ts,
        time_range: TimeRange {
            min_ts: totals.min_ts,
            max_ts: totals.max_ts,
        },
        levels,
        services_top,
        top_fingerprints,
        findings,
    })
}

/// `GET /{id}/groups`: paginated top fingerprints.
pub async fn top_fingerprints_page(
    pool: &PgPool,
    ingestion_id: Uuid,
    offset: i64,
    limit: i64,
) -> Result<Vec<TopFingerprintSummary>, AppError> {
    let rows = events::top_fingerprints(pool, ingestion_id, offset, limit).await?;
    Ok(rows
        .into_iter()
        .map(|r| TopFingerprintSummary {
            fingerprint: r.fingerprint,
            count: r.count,
            latest: LogEventView::from(&r.latest),
        })
        .collect())
}

#[derive(Debug, Serialize)]
pub struct GroupOverview {
    pub fingerprint: String,
    pub count: i64,
    pub first_ts: Option<DateTime<Utc>>,
    pub last_ts: Option<DateTime<Utc>>,
    pub levels: BTreeMap<String, i64>,
    pub services: BTreeMap<String, i64>,
    /// Ordered by `ts desc nulls last, seq asc`.
    pub sample: Option<LogEventView>,
    /// Ordered by `ts desc nulls last, seq desc`.
    pub latest: Option<LogEventView>,
}

/// `GET /{id}/groups/{fingerprint}`
pub async fn group_overview(
    pool: &PgPool,
    ingestion_id: Uuid,
    fingerprint: &str,
) -> Result<GroupOverview, AppError> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM log_events WHERE ingestion_id = $1 AND fingerprint = $2",
    )
    .bind(ingestion_id)
    .bind(fingerprint)
    .fetch_one(pool)
    .await?;

    if count == 0 {
        return Err(AppError::NotFound(format!(
            "fingerprint group {fingerprint} not found"
        )));
    }

    #[derive(sqlx::FromRow)]
    struct Range {
        first_ts: Option<DateTime<Utc>>,
        last_ts: Option<DateTime<Utc>>,
    }
    let range = sqlx::query_as::<_, Range>(
        "SELECT MIN(ts) AS first_ts, MAX(ts) AS last_ts FROM log_events WHERE ingestion_id = $1 AND fingerprint = $2",
    )
    .bind(ingestion_id)
    .bind(fingerprint)
    .fetch_one(pool)
    .await?;

    let level_rows: Vec<(Option<String>, i64)> = sqlx::query_as(
        "SELECT level, COUNT(*) FROM log_events WHERE ingestion_id = $1 AND fingerprint = $2 GROUP BY level",
    )
    .bind(ingestion_id)
    .bind(fingerprint)
    .fetch_all(pool)
    .await?;
    let levels = level_rows
        .into_iter()
        .map(|(l, c)| (l.unwrap_or_else(|| "UNKNOWN".to_string()), c))
        .collect();

    let service_rows: Vec<(Option<String>, i64)> = sqlx::query_as(
        "SELECT service, COUNT(*) FROM log_events WHERE ingestion_id = $1 AND fingerprint = $2 GROUP BY service",
    )
    .bind(ingestion_id)
    .bind(fingerprint)
    .fetch_all(pool)
    .await?;
    let services = service_rows
        .into_iter()
        .map(|(s, c)| (s.filter(|s| !s.is_empty()).unwrap_or_else(|| "unknown".to_string()), c))
        .collect();

    let sample = sqlx::query_as::<_, LogEvent>(
        r#"SELECT id, ingestion_id, seq, ts, ts_raw, service, level, message, raw,
                  attrs, parse_kind, parse_confidence, fingerprint
           FROM log_events WHERE ingestion_id = $1 AND fingerprint = $2
           ORDER BY ts DESC NULLS LAST, seq ASC LIMIT 1"#,
    )
    .bind(ingestion_id)
    .bind(fingerprint)
    .fetch_optional(pool)
    .await?;

    let latest = sqlx::query_as::<_, LogEvent>(
        r#"SELECT id, ingestion_id, seq, ts, ts_raw, service, level, message, raw,
                  attrs, parse_kind, parse_confidence, fingerprint
           FROM log_events WHERE ingestion_id = $1 AND fingerprint = $2
           ORDER BY ts DESC NULLS LAST, seq DESC LIMIT 1"#,
    )
    .bind(ingestion_id)
    .bind(fingerprint)
    .fetch_optional(pool)
    .await?;

    Ok(GroupOverview {
        fingerprint: fingerprint.to_string(),
        count,
        first_ts: range.first_ts,
        last_ts: range.last_ts,
        levels,
        services,
        sample: sample.as_ref().map(LogEventView::from),
        latest: latest.as_ref().map(LogEventView::from),
    })
}

/// `GET /{id}/findings`
pub async fn list_findings(pool: &PgPool, ingestion_id: Uuid) -> Result<Vec<Finding>, AppError> {
    let rows = sqlx::query_as::<_, FindingRow>(
        r#"SELECT id, ingestion_id, rule_id, title, severity, confidence,
                  total_occurrences, matched_fingerprints, evidence_event_ids, created_at
           FROM findings WHERE ingestion_id = $1
           ORDER BY severity DESC, total_occurrences DESC"#,
    )
    .bind(ingestion_id)
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(Finding::from).collect())
}

#[derive(Debug, Serialize)]
pub struct FindingDetail {
    #[serde(flatten)]
    pub finding: Finding,
    pub evidence: Vec<LogEventView>,
}

/// `GET /{id}/findings/{finding_id}`: finding plus up to 20 evidence events.
pub async fn finding_detail(
    pool: &PgPool,
    ingestion_id: Uuid,
    finding_id: Uuid,
) -> Result<FindingDetail, AppError> {
    let row = sqlx::query_as::<_, FindingRow>(
        r#"SELECT id, ingestion_id, rule_id, title, severity, confidence,
                  total_occurrences, matched_fingerprints, evidence_event_ids, created_at
           FROM findings WHERE id = $1 AND ingestion_id = $2"#,
    )
    .bind(finding_id)
    .bind(ingestion_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::NotFound("finding not found".to_string()))?;

    let finding: Finding = row.into();
    let mut evidence = events::fetch_by_ids(pool, &finding.evidence_event_ids).await?;
    evidence.sort_by_key(|e| e.seq);
    evidence.truncate(20);

    Ok(FindingDetail {
        evidence: evidence.iter().map(LogEventView::from).collect(),
        finding,
    })
}
