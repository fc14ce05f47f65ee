//! Ingestion routes: create/list/get/delete, log submission, and the
//! event/group/finding/insight read surface, all scoped under
//! `/orgs/{org_id}/projects/{project_id}/ingestions`.

use axum::{
    extract::{Multipart, Path, Query, State},
    Json,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;

use crate::errors::{ApiResponse, AppError};
use crate::jobs::{JobEnvelope, JobKind};
use crate::middleware::auth::CurrentActor;
use crate::models::ai_analysis::{AiAnalysis, GenerateInsightRequest, ScopeType};
use crate::models::ingestion::{CreateIngestion, Ingestion, IngestionSummary, PasteLogsRequest};
use crate::models::log_event::LogEventView;
use crate::models::pagination::CursorPage;
use crate::services::events::{self, EventFilters};
use crate::services::insights::{self, FindingInsightContext, GroupInsightContext, InsightClient};
use crate::services::{blob_store, queries};
use crate::AppState;

/// Cap on redacted sample events carried in an insight prompt.
const MAX_INSIGHT_SAMPLE_EVENTS: usize = 12;

/// Verifies the `org_id -> project_id -> ingestion_id` chain, returning
/// `NotFound` on any link mismatch (no membership check is performed here —
/// see DESIGN.md).
async fn scoped_ingestion(
    state: &AppState,
    org_id: Uuid,
    project_id: Uuid,
    ingestion_id: Uuid,
) -> Result<Ingestion, AppError> {
    let ingestion = sqlx::query_as::<_, Ingestion>(
        r#"
        SELECT i.id, i.project_id, i.source_type, i.status, i.finding_status, i.created_at
        FROM ingestions i
        JOIN projects p ON p.id = i.project_id
        WHERE i.id = $1 AND i.project_id = $2 AND p.org_id = $3
        "#,
    )
    .bind(ingestion_id)
    .bind(project_id)
    .bind(org_id)
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(|| {
        AppError::NotFound(format!(
            "ingestion {ingestion_id} not found in project {project_id} / org {org_id}"
        ))
    })?;
    Ok(ingestion)
}

/// POST `/orgs/{org_id}/projects/{project_id}/ingestions`
pub async fn create_ingestion(
    State(state): State<AppState>,
    _actor: CurrentActor,
    Path((org_id, project_id)): Path<(Uuid, Uuid)>,
    Json(payload): Json<CreateIngestion>,
) -> Result<Json<ApiResponse<IngestionSummary>>, AppError> {
    let project_exists: bool = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM projects WHERE id = $1 AND org_id = $2)",
    )
    .bind(project_id)
    .bind(org_id)
    .fetch_one(&state.db)
    .await?;
    if !project_exists {
        return Err(AppError::NotFound(format!(
            "project {project_id} not found in org {org_id}"
        )));
    }

    let ingestion = sqlx::query_as::<_, Ingestion>(
        r#"
        INSERT INTO ingestions (id, project_id, source_type, status, finding_status, created_at)
        VALUES ($1, $2, $3, 'pending', 'pending', $4)
        RETURNING id, project_id, source_type, status, finding_status, created_at
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(project_id)
    .bind(payload.source_type)
    .bind(Utc::now())
    .fetch_one(&state.db)
    .await?;

    Ok(ApiResponse::success(IngestionSummary::from(&ingestion)))
}

/// GET `/orgs/{org_id}/projects/{project_id}/ingestions`
pub async fn list_ingestions(
    State(state): State<AppState>,
    _actor: CurrentActor,
    Path((org_id, project_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<ApiResponse<Vec<IngestionSummary>>>, AppError> {
    let project_exists: bool = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM projects WHERE id = $1 AND org_id = $2)",
    )
    .bind(project_id)
    .bind(org_id)
    .fetch_one(&state.db)
    .await?;
    if !project_exists {
        return Err(AppError::NotFound(format!(
            "project {project_id} not found in org {org_id}"
        )));
    }

    let rows = sqlx::query_as::<_, Ingestion>(
        r#"SELECT id, project_id, source_type, status, finding_status, created_at
           FROM ingestions WHERE project_id = $1 ORDER BY created_at DESC"#,
    )
    .bind(project_id)
    .fetch_all(&state.db)
    .await?;

    Ok(ApiResponse::success(
        rows.iter().map(IngestionSummary::from).collect(),
    ))
}

/// GET `/orgs/{org_id}/projects/{project_id}/ingestions/{id}`
pub async fn get_ingestion(
    State(state): State<AppState>,
    _actor: CurrentActor,
    Path((org_id, project_id, id)): Path<(Uuid, Uuid, Uuid)>,
) -> Result<Json<ApiResponse<IngestionSummary>>, AppError> {
    let ingestion = scoped_ingestion(&state, org_id, project_id, id).await?;
    Ok(ApiResponse::success(IngestionSummary::from(&ingestion)))
}

/// DELETE `/orgs/{org_id}/projects/{project_id}/ingestions/{id}`
pub async fn delete_ingestion(
    State(state): State<AppState>,
    _actor: CurrentActor,
    Path((org_id, project_id, id)): Path<(Uuid, Uuid, Uuid)>,
) -> Result<Json<ApiResponse<()>>, AppError> {
    scoped_ingestion(&state, org_id, project_id, id).await?;
    sqlx::query("DELETE FROM ingestions WHERE id = $1")
        .bind(id)
        .execute(&state.db)
        .await?;
    Ok(ApiResponse::success(()))
}

/// POST `/orgs/{org_id}/projects/{project_id}/ingestions/{id}/logs/paste`
pub async fn paste_logs(
    State(state): State<AppState>,
    _actor: CurrentActor,
    Path((org_id, project_id, id)): Path<(Uuid, Uuid, Uuid)>,
    Json(payload): Json<PasteLogsRequest>,
) -> Result<Json<ApiResponse<()>>, AppError> {
    scoped_ingestion(&state, org_id, project_id, id).await?;
    if payload.text.trim().is_empty() {
        return Err(AppError::Validation("text must not be empty".to_string()));
    }
    blob_store::put(&state.config.blob_store_root, id, &payload.text).await?;
    state
        .jobs
        .enqueue(&JobEnvelope {
            kind: JobKind::ProcessIngestion,
            ingestion_id: id,
        })
        .await?;
    Ok(ApiResponse::success(()))
}

/// POST `/orgs/{org_id}/projects/{project_id}/ingestions/{id}/logs/upload`
pub async fn upload_logs(
    State(state): State<AppState>,
    _actor: CurrentActor,
    Path((org_id, project_id, id)): Path<(Uuid, Uuid, Uuid)>,
    mut multipart: Multipart,
) -> Result<Json<ApiResponse<()>>, AppError> {
    scoped_ingestion(&state, org_id, project_id, id).await?;

    let mut file_bytes: Option<Vec<u8>> = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::Validation(format!("Multipart error: {e}")))?
    {
        if field.name() == Some("file") {
            file_bytes = Some(
                field
                    .bytes()
                    .await
                    .map_err(|e| AppError::Validation(format!("Failed to read file: {e}")))?
                    .to_vec(),
            );
        }
    }

    let bytes = file_bytes
        .ok_or_else(|| AppError::Validation("Missing 'file' field in multipart request".to_string()))?;
    let text = String::from_utf8(bytes)
        .map_err(|e| AppError::Validation(format!("File is not valid UTF-8: {e}")))?;
    if text.trim().is_empty() {
        return Err(AppError::Validation("file must not be empty".to_string()));
    }

    blob_store::put(&state.config.blob_store_root, id, &text).await?;
    state
        .jobs
        .enqueue(&JobEnvelope {
            kind: JobKind::ProcessIngestion,
            ingestion_id: id,
        })
        .await?;
    Ok(ApiResponse::success(()))
}

/// GET `/orgs/{org_id}/projects/{project_id}/ingestions/{id}/overview`
pub async fn overview(
    State(state): State<AppState>,
    _actor: CurrentActor,
    Path((org_id, project_id, id)): Path<(Uuid, Uuid, Uuid)>,
) -> Result<Json<ApiResponse<queries::Overview>>, AppError> {
    scoped_ingestion(&state, org_id, project_id, id).await?;
    let overview = queries::overview(&state.db, id).await?;
    Ok(ApiResponse::success(overview))
}

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    pub levels: Option<String>,
    pub service: Option<String>,
    pub fingerprint: Option<String>,
    pub ts_from: Option<DateTime<Utc>>,
    pub ts_to: Option<DateTime<Utc>>,
    pub q: Option<String>,
    pub cursor: Option<i64>,
    pub limit: Option<i64>,
}

const MAX_EVENTS_LIMIT: i64 = 500;
const DEFAULT_EVENTS_LIMIT: i64 = 100;

/// GET `/orgs/{org_id}/projects/{project_id}/ingestions/{id}/events`
pub async fn list_events(
    State(state): State<AppState>,
    _actor: CurrentActor,
    Path((org_id, project_id, id)): Path<(Uuid, Uuid, Uuid)>,
    Query(q): Query<EventsQuery>,
) -> Result<Json<ApiResponse<CursorPage<LogEventView>>>, AppError> {
    scoped_ingestion(&state, org_id, project_id, id).await?;

    let filters = EventFilters {
        levels: q
            .levels
            .map(|s| s.split(',').map(|l| l.trim().to_uppercase()).collect())
            .unwrap_or_default(),
        service: q.service,
        fingerprint: q.fingerprint,
        ts_from: q.ts_from,
        ts_to: q.ts_to,
        q: q.q,
    };
    let limit = q.limit.unwrap_or(DEFAULT_EVENTS_LIMIT).clamp(1, MAX_EVENTS_LIMIT);
    let cursor = q.cursor.unwrap_or(0);

    let page = queries::list_events(&state.db, id, &filters, cursor, limit).await?;
    Ok(ApiResponse::success(page))
}

#[derive(Debug, Deserialize)]
pub struct GroupsQuery {
    pub offset: Option<i64>,
    pub limit: Option<i64>,
}

/// GET `/orgs/{org_id}/projects/{project_id}/ingestions/{id}/groups`
pub async fn list_groups(
    State(state): State<AppState>,
    _actor: CurrentActor,
    Path((org_id, project_id, id)): Path<(Uuid, Uuid, Uuid)>,
    Query(q): Query<GroupsQuery>,
) -> Result<Json<ApiResponse<Vec<queries::TopFingerprintSummary>>>, AppError> {
    scoped_ingestion(&state, org_id, project_id, id).await?;
    let offset = q.offset.unwrap_or(0).max(0);
    let limit = q.limit.unwrap_or(25).clamp(1, 100);
    let groups = queries::top_fingerprints_page(&state.db, id, offset, limit).await?;
    Ok(ApiResponse::success(groups))
}

/// GET `/orgs/{org_id}/projects/{project_id}/ingestions/{id}/groups/{fingerprint}`
pub async fn group_detail(
    State(state): State<AppState>,
    _actor: CurrentActor,
    Path((org_id, project_id, id, fingerprint)): Path<(Uuid, Uuid, Uuid, String)>,
) -> Result<Json<ApiResponse<queries::GroupOverview>>, AppError> {
    scoped_ingestion(&state, org_id, project_id, id).await?;
    let group = queries::group_overview(&state.db, id, &fingerprint).await?;
    Ok(ApiResponse::success(group))
}

/// GET `/orgs/{org_id}/projects/{project_id}/ingestions/{id}/findings`
pub async fn list_findings(
    State(state): State<AppState>,
    _actor: CurrentActor,
    Path((org_id, project_id, id)): Path<(Uuid, Uuid, Uuid)>,
) -> Result<Json<ApiResponse<Vec<crate::models::finding::Finding>>>, AppError> {
    scoped_ingestion(&state, org_id, project_id, id).await?;
    let findings = queries::list_findings(&state.db, id).await?;
    Ok(ApiResponse::success(findings))
}

async fn fetch_insight(
    state: &AppState,
    ingestion_id: Uuid,
    scope_type: ScopeType,
    scope_id: &str,
) -> Result<Option<AiAnalysis>, AppError> {
    let row = sqlx::query_as::<_, AiAnalysis>(
        r#"SELECT id, ingestion_id, scope_type, scope_id, result, created_at
           FROM ai_analyses WHERE ingestion_id = $1 AND scope_type = $2 AND scope_id = $3"#,
    )
    .bind(ingestion_id)
    .bind(scope_type)
    .bind(scope_id)
    .fetch_optional(&state.db)
    .await?;
    Ok(row)
}

#[derive(Debug, serde::Serialize)]
pub struct FindingDetailResponse {
    #[serde(flatten)]
    pub detail: queries::FindingDetail,
    pub insight: Option<AiAnalysis>,
}

/// GET `/orgs/{org_id}/projects/{project_id}/ingestions/{id}/findings/{finding_id}`
pub async fn finding_detail(
    State(state): State<AppState>,
    _actor: CurrentActor,
    Path((org_id, project_id, id, finding_id)): Path<(Uuid, Uuid, Uuid, Uuid)>,
) -> Result<Json<ApiResponse<FindingDetailResponse>>, AppError> {
    scoped_ingestion(&state, org_id, project_id, id).await?;
    let detail = queries::finding_detail(&state.db, id, finding_id).await?;
    let insight = fetch_insight(&state, id, ScopeType::Finding, &finding_id.to_string()).await?;
    Ok(ApiResponse::success(FindingDetailResponse { detail, insight }))
}

/// POST `/orgs/{org_id}/projects/{project_id}/ingestions/{id}/insights`
pub async fn generate_insight(
    State(state): State<AppState>,
    _actor: CurrentActor,
    Path((org_id, project_id, id)): Path<(Uuid, Uuid, Uuid)>,
    Json(payload): Json<GenerateInsightRequest>,
) -> Result<Json<ApiResponse<AiAnalysis>>, AppError> {
    scoped_ingestion(&state, org_id, project_id, id).await?;

    let (scope_id, messages) = match payload.scope_type {
        ScopeType::Group => {
            let fingerprint = payload
                .fingerprint
                .ok_or_else(|| AppError::Validation("fingerprint is required for scope_type=group".to_string()))?;
            let group = queries::group_overview(&state.db, id, &fingerprint).await?;
            let evidence_ids = events::evidence_ids_for_fingerprint(&state.db, id, &fingerprint, 6, 6).await?;
            let mut sample_events: Vec<LogEventView> = events::fetch_by_ids(&state.db, &evidence_ids)
                .await?
                .iter()
                .map(LogEventView::from)
                .collect();
            sample_events.truncate(MAX_INSIGHT_SAMPLE_EVENTS);
            let ctx = GroupInsightContext {
                fingerprint: &fingerprint,
                count: group.count,
                levels: &serde_json::to_value(&group.levels).unwrap_or_default(),
                services: &serde_json::to_value(&group.services).unwrap_or_default(),
                sample_events: &sample_events,
            };
            (fingerprint, insights::build_group_prompt(&ctx))
        }
        ScopeType::Finding => {
            let finding_id = payload
                .finding_id
                .ok_or_else(|| AppError::Validation("finding_id is required for scope_type=finding".to_string()))?;
            let detail = queries::finding_detail(&state.db, id, finding_id).await?;
            let matched = serde_json::to_value(&detail.finding.matched_fingerprints).unwrap_or_default();
            let mut sample_events = detail.evidence.clone();
            sample_events.truncate(MAX_INSIGHT_SAMPLE_EVENTS);
            let ctx = FindingInsightContext {
                rule_id: &detail.finding.rule_id,
                title: &detail.finding.title,
                severity: &format!("{:?}", detail.finding.severity).to_uppercase(),
                confidence: detail.finding.confidence,
                total_occurrences: detail.finding.total_occurrences,
                matched_fingerprints: &matched,
                sample_events: &sample_events,
            };
            (finding_id.to_string(), insights::build_finding_prompt(&ctx))
        }
    };

    let result = state.insight_client.complete(&messages).await?;

    let row = sqlx::query_as::<_, AiAnalysis>(
        r#"
        INSERT INTO ai_analyses (id, ingestion_id, scope_type, scope_id, result, created_at)
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (ingestion_id, scope_type, scope_id)
        DO UPDATE SET result = EXCLUDED.result, created_at = EXCLUDED.created_at
        RETURNING id, ingestion_id, scope_type, scope_id, result, created_at
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(id)
    .bind(payload.scope_type)
    .bind(&scope_id)
    .bind(&result)
    .bind(Utc::now())
    .fetch_one(&state.db)
    .await?;

    Ok(ApiResponse::success(row))
}
