//! Two-pass rule matching that turns an ingestion's events into findings.
//! Pass 1 scans the top fingerprint groups by volume; pass 2 scans recent
//! error-level events directly, so low-volume but severe errors still
//! surface. Every run replaces the ingestion's prior findings wholesale.

use std::collections::{HashMap, HashSet};

use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::finding::{MatchedFingerprint, NewFinding, Severity};
use crate::models::ingestion::JobStatus;
use crate::rules::{self, RuleMatch};
use crate::services::events;

const MAX_EVIDENCE_PER_RULE: usize = 12;
const MAX_FPS_PER_RULE_IN_SUMMARY: usize = 10;
const TOP_GROUPS_LIMIT: i64 = 200;
const RECENT_ERRORS_LIMIT: i64 = 5000;

struct Accumulator {
    title: &'static str,
    severity: Severity,
    confidence: f64,
    total_occurrences: i64,
    matched_fingerprints: Vec<MatchedFingerprint>,
    evidence_ids: Vec<Uuid>,
    fps_seen: HashSet<String>,
    evidence_seen: HashSet<Uuid>,
}

impl Accumulator {
    fn new(title: &'static str, severity: Severity, confidence: f64) -> Self {
        Self {
            title,
            severity,
            confidence,
            total_occurrences: 0,
            matched_fingerprints: Vec::new(),
            evidence_ids: Vec::new(),
            fps_seen: HashSet::new(),
            evidence_seen: HashSet::new(),
        }
    }
}

type FindingsByRule = HashMap<&'static str, Accumulator>;

fn get_or_create<'a>(map: &'a mut FindingsByRule, m: &RuleMatch) -> &'a mut Accumulator {
    map.entry(m.rule_id)
        .or_insert_with(|| Accumulator::new(m.title, m.severity, m.confidence))
}

/// Pass 1: apply the catalogue to each top fingerprint group's latest
/// message, aggregating full group counts and head/tail evidence.
async fn run_rules_on_groups(
    pool: &PgPool,
    ingestion_id: Uuid,
    findings_by_rule: &mut FindingsByRule,
) -> Result<(), AppError> {
    let groups = events::all_top_fingerprints(pool, ingestion_id, TOP_GROUPS_LIMIT).await?;

    for group in groups {
        let matches = rules::apply_rules(&group.latest.message);
        if matches.is_empty() {
            continue;
        }

        let evidence_ids =
            events::evidence_ids_for_fingerprint(pool, ingestion_id, &group.fingerprint, 5, 5)
                .await?;

        for m in &matches {
            let acc = get_or_create(findings_by_rule, m);
            acc.total_occurrences += group.count;
            acc.matched_fingerprints.push(MatchedFingerprint {
                fingerprint: group.fingerprint.clone(),
                count: group.count,
            });
            acc.fps_seen.insert(group.fingerprint.clone());

            for eid in &evidence_ids {
                if acc.evidence_ids.len() >= MAX_EVIDENCE_PER_RULE {
                    break;
                }
                if acc.evidence_seen.insert(*eid) {
                    acc.evidence_ids.push(*eid);
                }
            }
        }
    }

    Ok(())
}

/// Pass 2: apply the catalogue (plus the generic fallback) directly to the
/// most recent error-level events, catching low-volume but severe matches
/// pass 1's top-200-groups cutoff would otherwise miss.
async fn run_rules_on_errors(
    pool: &PgPool,
    ingestion_id: Uuid,
    findings_by_rule: &mut FindingsByRule,
) -> Result<(), AppError> {
    let errors = events::recent_error_events(pool, ingestion_id, RECENT_ERRORS_LIMIT).await?;

    for error in &errors {
        let mut matches = rules::apply_rules(&error.message);
        if matches.is_empty() {
            if rules::apply_generic(&error.message) {
                let severity = match error.level.as_deref() {
                    Some("CRITICAL") | Some("FATAL") => Severity::Crit,
                    _ => Severity::High,
                };
                matches.push(RuleMatch {
                    rule_id: "generic_error",
                    title: "Generic error pattern match",
                    severity,
                    confidence: 0.5,
                });
            } else {
                continue;
            }
        }

        for m in &matches {
            let acc = get_or_create(findings_by_rule, m);
            acc.total_occurrences += 1;

            if acc.matched_fingerprints.len() < MAX_FPS_PER_RULE_IN_SUMMARY
                && acc.fps_seen.insert(error.fingerprint.clone())
            {
                acc.matched_fingerprints.push(MatchedFingerprint {
                    fingerprint: error.fingerprint.clone(),
                    count: 1,
                });
            }

            if acc.evidence_ids.len() < MAX_EVIDENCE_PER_RULE && acc.evidence_seen.insert(error.id)
            {
                acc.evidence_ids.push(error.id);
            }
        }
    }

    Ok(())
}

/// Sort each finding's matched fingerprints by count descending and cap to
/// the summary limit, then sort findings by severity, then volume.
fn finalize(findings_by_rule: FindingsByRule) -> Vec<NewFinding> {
    let mut findings: Vec<NewFinding> = findings_by_rule
        .into_iter()
        .map(|(rule_id, acc)| {
            let mut matched_fingerprints = acc.matched_fingerprints;
            matched_fingerprints.sort_by(|a, b| b.count.cmp(&a.count));
            matched_fingerprints.truncate(MAX_FPS_PER_RULE_IN_SUMMARY);
            NewFinding {
                rule_id: rule_id.to_string(),
                title: acc.title.to_string(),
                severity: acc.severity,
                confidence: acc.confidence,
                total_occurrences: acc.total_occurrences,
                matched_fingerprints,
                evidence_event_ids: acc.evidence_ids,
            }
        })
        .collect();

    findings.sort_by(|a, b| {
        (b.severity.rank(), b.total_occurrences).cmp(&(a.severity.rank(), a.total_occurrences))
    });

    findings
}

/// Run both passes and replace the ingestion's findings. Sets
/// `finding_status` to `processing` on entry and `done`/`failed` on exit.
pub async fn analyze_ingestion(pool: &PgPool, ingestion_id: Uuid) -> Result<(), AppError> {
    sqlx::query("UPDATE ingestions SET finding_status = $1 WHERE id = $2")
        .bind(JobStatus::Processing)
        .bind(ingestion_id)
        .execute(pool)
        .await?;

    let result = run_analysis(pool, ingestion_id).await;

    let final_status = if result.is_ok() {
        JobStatus::Done
    } else {
        JobStatus::Failed
    };
    sqlx::query("UPDATE ingestions SET finding_status = $1 WHERE id = $2")
        .bind(final_status)
        .bind(ingestion_id)
        .execute(pool)
        .await?;

    result
}

async fn run_analysis(pool: &PgPool, ingestion_id: Uuid) -> Result<(), AppError> {
    let mut findings_by_rule = FindingsByRule::new();
    run_rules_on_groups(pool, ingestion_id, &mut findings_by_rule).await?;
    run_rules_on_errors(pool, ingestion_id, &mut findings_by_rule).await?;
    let findings = finalize(findings_by_rule);

    let mut tx = pool.begin().await?;

    sqlx::query("DELETE FROM findings WHERE ingestion_id = $1")
        .bind(ingestion_id)
        .execute(&mut *tx)
        .await?;

    for f in &findings {
        let matched_fingerprints = serde_json::to_value(&f.matched_fingerprints)
            .map_err(|e| AppError::Internal(format!("failed to encode matched_fingerprints: {e}")))?;
        let evidence_event_ids = serde_json::to_value(&f.evidence_event_ids)
            .map_err(|e| AppError::Internal(format!("failed to encode evidence_event_ids: {e}")))?;

        sqlx::query(
            r#"
            INSERT INTO findings (
                id, ingestion_id, rule_id, title, severity, confidence,
                total_occurrences, matched_fingerprints, evidence_event_ids, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(ingestion_id)
        .bind(&f.rule_id)
        .bind(&f.title)
        .bind(f.severity)
        .bind(f.confidence)
        .bind(f.total_occurrences)
        .bind(matched_fingerprints)
        .bind(evidence_event_ids)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule_match(rule_id: &'static str, title: &'static str) -> RuleMatch {
        RuleMatch {
            rule_id,
            title,
            severity: Severity::High,
            confidence: 0.8,
        }
    }

    #[test]
    fn finalize_truncates_matched_fingerprints_and_sorts_by_count() {
        let mut map = FindingsByRule::new();
        let m = rule_match("db_connection_failure", "Database connection failures");
        let acc = get_or_create(&mut map, &m);
        for i in 0..15 {
            acc.matched_fingerprints.push(MatchedFingerprint {
                fingerprint: format!("fp{i}"),
                count: i as i64,
            });
        }
        acc.total_occurrences = 100;

        let findings = finalize(map);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].matched_fingerprints.len(), MAX_FPS_PER_RULE_IN_SUMMARY);
        assert_eq!(findings[0].matched_fingerprints[0].count, 14);
    }

    #[test]
    fn finalize_sorts_by_severity_then_occurrences() {
        let mut map = FindingsByRule::new();
        let low = get_or_create(
            &mut map,
            &RuleMatch {
                rule_id: "http_rate_limited",
                title: "Rate limiting",
                severity: Severity::Med,
                confidence: 0.8,
            },
        );
        low.total_occurrences = 1000;
        let high = get_or_create(
            &mut map,
            &RuleMatch {
                rule_id: "oom_memory",
                title: "OOM",
                severity: Severity::Crit,
                confidence: 0.9,
            },
        );
        high.total_occurrences = 1;

        let findings = finalize(map);
        assert_eq!(findings[0].rule_id, "oom_memory");
        assert_eq!(findings[1].rule_id, "http_rate_limited");
    }

    #[test]
    fn evidence_cap_is_enforced_and_deduplicated() {
        let mut map = FindingsByRule::new();
        let m = rule_match("disk_full", "Disk full");
        let acc = get_or_create(&mut map, &m);
        let fixed_id = Uuid::new_v4();
        for _ in 0..20 {
            if acc.evidence_ids.len() < MAX_EVIDENCE_PER_RULE && acc.evidence_seen.insert(fixed_id)
            {
                acc.evidence_ids.push(fixed_id);
            }
        }
        assert_eq!(acc.evidence_ids.len(), 1);
    }
}
