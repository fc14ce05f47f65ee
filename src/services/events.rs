//! Event store: batch insertion of parsed records and the low-level queries
//! the findings engine and query layer are built on.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::errors::AppError;
use crate::fingerprint;
use crate::models::log_event::{LogEvent, ParseKind};
use crate::parser::ParsedRecord;

/// Insert parsed records as a contiguous 1-based `seq` run, in one
/// transaction. On any failure the whole batch is rolled back.
pub async fn insert_batch(
    pool: &PgPool,
    ingestion_id: Uuid,
    records: &[ParsedRecord],
) -> Result<(), AppError> {
    let mut tx = pool.begin().await?;

    for (i, record) in records.iter().enumerate() {
        let seq = (i + 1) as i64;
        let fp = fingerprint::make_fingerprint(&record.signature);
        sqlx::query(
            r#"
            INSERT INTO log_events (
                id, ingestion_id, seq, ts, ts_raw, service, level, message, raw,
                attrs, parse_kind, parse_confidence, fingerprint
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(ingestion_id)
        .bind(seq)
        .bind(record.ts)
        .bind(&record.ts_raw)
        .bind(&record.service)
        .bind(&record.level)
        .bind(&record.message)
        .bind(&record.raw)
        .bind(&record.attrs)
        .bind(record.parse_kind)
        .bind(record.parse_confidence)
        .bind(&fp)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(())
}

/// A fingerprint group's event count and its latest (by `seq`) event.
pub struct TopFingerprintRow {
    pub fingerprint: String,
    pub count: i64,
    pub latest: LogEvent,
}

/// Top fingerprint groups for an ingestion, ordered by count descending then
/// fingerprint ascending, via `ROW_NUMBER()`/`COUNT()` window functions.
pub async fn top_fingerprints(
    pool: &PgPool,
    ingestion_id: Uuid,
    offset: i64,
    limit: i64,
) -> Result<Vec<TopFingerprintRow>, AppError> {
    let rows = sqlx::query_as::<_, LogEventWithCount>(
        r#"
        SELECT * FROM (
            SELECT
                id, ingestion_id, seq, ts, ts_raw, service, level, message, raw,
                attrs, parse_kind, parse_confidence, fingerprint,
                COUNT(*) OVER (PARTITION BY fingerprint) AS group_count,
                ROW_NUMBER() OVER (PARTITION BY fingerprint ORDER BY seq DESC) AS rn
            FROM log_events
            WHERE ingestion_id = $1
        ) ranked
        WHERE rn = 1
        ORDER BY group_count DESC, fingerprint ASC
        OFFSET $2 LIMIT $3
        "#,
    )
    .bind(ingestion_id)
    .bind(offset)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|r| TopFingerprintRow {
            fingerprint: r.event.fingerprint.clone(),
            count: r.group_count,
            latest: r.event,
        })
        .collect())
}

/// Every fingerprint group for the ingestion, uncapped, used internally by
/// the findings engine's pass 1 (which caps to 200 itself).
pub async fn all_top_fingerprints(
    pool: &PgPool,
    ingestion_id: Uuid,
    limit: i64,
) -> Result<Vec<TopFingerprintRow>, AppError> {
    top_fingerprints(pool, ingestion_id, 0, limit).await
}

struct LogEventWithCount {
    event: LogEvent,
    group_count: i64,
}

impl sqlx::FromRow<'_, sqlx::postgres::PgRow> for LogEventWithCount {
    fn from_row(row: &sqlx::postgres::PgRow) -> sqlx::Result<Self> {
        use sqlx::Row;
        Ok(Self {
            event: LogEvent {
                id: row.try_get("id")?,
                ingestion_id: row.try_get("ingestion_id")?,
                seq: row.try_get("seq")?,
                ts: row.try_get("ts")?,
                ts_raw: row.try_get("ts_raw")?,
                service: row.try_get("service")?,
                level: row.try_get("level")?,
                message: row.try_get("message")?,
                raw: row.try_get("raw")?,
                attrs: row.try_get("attrs")?,
                parse_kind: row.try_get("parse_kind")?,
                parse_confidence: row.try_get("parse_confidence")?,
                fingerprint: row.try_get("fingerprint")?,
            },
            group_count: row.try_get("group_count")?,
        })
    }
}

/// Head-N + tail-N event ids for a fingerprint group, ordered by `seq`,
/// deduplicated while preserving head-then-tail order.
pub async fn evidence_ids_for_fingerprint(
    pool: &PgPool,
    ingestion_id: Uuid,
    fingerprint: &str,
    head: i64,
    tail: i64,
) -> Result<Vec<Uuid>, AppError> {
    let head_ids: Vec<Uuid> = sqlx::query_scalar(
        r#"
        SELECT id FROM log_events
        WHERE ingestion_id = $1 AND fingerprint = $2
        ORDER BY seq ASC
        LIMIT $3
        "#,
    )
    .bind(ingestion_id)
    .bind(fingerprint)
    .bind(head)
    .fetch_all(pool)
    .await?;

    let tail_ids: Vec<Uuid> = sqlx::query_scalar(
        r#"
        SELECT id FROM log_events
        WHERE ingestion_id = $1 AND fingerprint = $2
        ORDER BY seq DESC
        LIMIT $3
        "#,
    )
    .bind(ingestion_id)
    .bind(fingerprint)
    .bind(tail)
    .fetch_all(pool)
    .await?;

    let mut seen = std::collections::HashSet::new();
    let mut ids = Vec::new();
    for id in head_ids.into_iter().chain(tail_ids) {
        if seen.insert(id) {
            ids.push(id);
        }
    }
    Ok(ids)
}

/// The most recent `limit` events at ERROR/CRITICAL/FATAL level, newest first.
pub async fn recent_error_events(
    pool: &PgPool,
    ingestion_id: Uuid,
    limit: i64,
) -> Result<Vec<LogEvent>, AppError> {
    let rows = sqlx::query_as::<_, LogEvent>(
        r#"
        SELECT id, ingestion_id, seq, ts, ts_raw, service, level, message, raw,
               attrs, parse_kind, parse_confidence, fingerprint
        FROM log_events
        WHERE ingestion_id = $1 AND level IN ('ERROR', 'CRITICAL', 'FATAL')
        ORDER BY seq DESC
        LIMIT $2
        "#,
    )
    .bind(ingestion_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Fetch events by id, in no particular order (caller re-sorts as needed).
pub async fn fetch_by_ids(pool: &PgPool, ids: &[Uuid]) -> Result<Vec<LogEvent>, AppError> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    let rows = sqlx::query_as::<_, LogEvent>(
        r#"
        SELECT id, ingestion_id, seq, ts, ts_raw, service, level, message, raw,
               attrs, parse_kind, parse_confidence, fingerprint
        FROM log_events
        WHERE id = ANY($1)
        ORDER BY seq ASC
        "#,
    )
    .bind(ids)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

#[derive(Debug, Default)]
pub struct EventFilters {
    pub levels: Vec<String>,
    pub service: Option<String>,
    pub fingerprint: Option<String>,
    pub ts_from: Option<DateTime<Utc>>,
    pub ts_to: Option<DateTime<Utc>>,
    pub q: Option<String>,
}

/// Cursor-paginated event listing. `cursor` is the last `seq` already
/// returned; results are strictly `seq > cursor`, ordered ascending.
/// Fetches `limit + 1` rows so the caller can determine `has_more` without a
/// second round trip.
pub async fn list_events(
    pool: &PgPool,
    ingestion_id: Uuid,
    filters: &EventFilters,
    cursor: i64,
    probe_limit: i64,
) -> Result<Vec<LogEvent>, AppError> {
    let mut qb = sqlx::QueryBuilder::new(
        r#"SELECT id, ingestion_id, seq, ts, ts_raw, service, level, message, raw,
                  attrs, parse_kind, parse_confidence, fingerprint
           FROM log_events WHERE ingestion_id = "#,
    );
    qb.push_bind(ingestion_id);
    qb.push(" AND seq > ").push_bind(cursor);

    if !filters.levels.is_empty() {
        qb.push(" AND level = ANY(")
            .push_bind(filters.levels.clone())
            .push(")");
    }
    if let Some(service) = &filters.service {
        if service.eq_ignore_ascii_case("unknown") {
            qb.push(" AND (service IS NULL OR service = '')");
        } else {
            qb.push(" AND service = ").push_bind(service.clone());
        }
    }
    if let Some(fp) = &filters.fingerprint {
        qb.push(" AND fingerprint = ").push_bind(fp.clone());
    }
    if let Some(ts_from) = filters.ts_from {
        qb.push(" AND ts >= ").push_bind(ts_from);
    }
    if let Some(ts_to) = filters.ts_to {
        qb.push(" AND ts <= ").push_bind(ts_to);
    }
    if let Some(q) = &filters.q {
        qb.push(" AND message ILIKE ")
            .push_bind(format!("%{q}%"));
    }

    qb.push(" ORDER BY seq ASC LIMIT ").push_bind(probe_limit);

    let rows = qb.build_query_as::<LogEvent>().fetch_all(pool).await?;
    Ok(rows)
}
