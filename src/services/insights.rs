//! Builds the chat-completion prompt for an LLM-backed incident explanation
//! and defines the boundary this crate calls through to get one. No HTTP
//! client lives here: `InsightClient` is implemented outside this crate;
//! `NullInsightClient` exists only so tests can exercise the call site.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::json;

use crate::errors::AppError;
use crate::fingerprint;
use crate::models::log_event::LogEventView;

const SYSTEM_PROMPT: &str = "You are a production incident analysis assistant.

Hard rules:
- Use ONLY the provided context. Do not assume details not in the context.
- If something is uncertain or missing, say \"Unknown\" or \"Not enough data\".
- Never invent stack traces, metrics, code, or service behavior.
- Do not reveal secrets. If the context contains tokens/credentials, treat them as redacted placeholders.
- Keep output concise and actionable.

Output format:
- Return Markdown only.
- Use the exact headings requested.
- When referencing evidence, cite event sequence numbers like: (evidence: seq 12, seq 18).";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatRole {
    System,
    User,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: &'static str,
    pub content: String,
}

/// Boundary to whatever LLM backend is configured outside this crate.
#[async_trait]
pub trait InsightClient: Send + Sync {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, AppError>;
}

/// Test double: returns a fixed, clearly-synthetic response without calling
/// out anywhere.
pub struct NullInsightClient;

#[async_trait]
impl InsightClient for NullInsightClient {
    async fn complete(&self, _messages: &[ChatMessage]) -> Result<String, AppError> {
        Ok("## Summary\nNo insight backend configured.\n".to_string())
    }
}

/// Redact event messages the same way the fingerprinter would, so sample
/// evidence handed to the LLM never carries raw tokens/IPs/emails.
fn redact_sample_events(events: &[LogEventView]) -> Vec<serde_json::Value> {
    events
        .iter()
        .map(|e| {
            json!({
                "seq": e.seq,
                "level": e.level,
                "service": e.service,
                "message": fingerprint::normalize(&e.message),
            })
        })
        .collect()
}

/// Context for a fingerprint-group explanation request.
pub struct GroupInsightContext<'a> {
    pub fingerprint: &'a str,
    pub count: i64,
    pub levels: &'a serde_json::Value,
    pub services: &'a serde_json::Value,
    pub sample_events: &'a [LogEventView],
}

/// Context for a rule-finding explanation request.
pub struct FindingInsightContext<'a> {
    pub rule_id: &'a str,
    pub title: &'a str,
    pub severity: &'a str,
    pub confidence: f64,
    pub total_occurrences: i64,
    pub matched_fingerprints: &'a serde_json::Value,
    pub sample_events: &'a [LogEventView],
}

const GROUP_TASK_TEMPLATE: &str = r#"
You will explain a log GROUP (same fingerprint). Produce an incident-style explanation.

Context (JSON, redacted):
{CONTEXT}

Tasks:
1) Summarize what this group represents in 2-4 sentences using ONLY the context.
2) Identify the strongest signals (level/service/time-range/message pattern).
3) Provide up to 3 likely root causes with confidence scores (0-100) and justification tied to evidence.
4) Provide a "Next checks" list of 5-8 concrete debugging steps.
5) Provide "Immediate mitigations" (safe actions) and "Longer-term fixes" (engineering actions).

Constraints:
- If timestamps are missing, do not infer timing. Use seq ordering only.
- If service is missing/unknown, do not guess; propose how to find it.
- If the message is generic, say so and focus on what can be confirmed.
- Do not mention other groups unless explicitly present in context.

Return Markdown with exactly these headings:

## Summary
## What we know from evidence
## Likely causes
## Next checks
## Mitigations
## Longer-term fixes
## Evidence cited

Evidence citing rules:
- In each section, cite evidence as: (evidence: seq X, seq Y)
- In "Evidence cited", list the seq numbers you referenced grouped by why they matter.
"#;

const FINDING_TASK_TEMPLATE: &str = r#"
You will explain a RULE-BASED FINDING detected from logs.

Context (JSON, redacted):
{CONTEXT}

Tasks:
1) Explain what this finding means in plain language (1 paragraph).
2) Explain why the system flagged it: what patterns matched, and what evidence supports it.
3) Assess severity and impact using ONLY the context (if impact is unknown, say unknown).
4) Provide 5-8 targeted debugging steps.
5) Provide "Fix suggestions" split into quick fixes vs durable fixes.
6) If multiple fingerprints are involved, compare them briefly (what's common vs different).

Constraints:
- Do not claim the exact root cause unless it is explicitly shown in evidence.
- If rule_id is "generic_error", explain that it is broad and requires triage.
- Keep advice technology-agnostic unless evidence clearly indicates a stack (e.g., Java traceback).
- Cite evidence by seq numbers only.

Return Markdown with exactly these headings:

## What this finding means
## Why it was flagged
## Severity and impact
## Debugging steps
## Fix suggestions
## Evidence cited

Evidence citing rules:
- Every claim must be backed by evidence citations where possible: (evidence: seq X, seq Y)
- "Evidence cited" should list the key seq numbers and what each shows.
"#;

fn role_str(role: ChatRole) -> &'static str {
    match role {
        ChatRole::System => "system",
        ChatRole::User => "user",
    }
}

fn message(role: ChatRole, content: String) -> ChatMessage {
    ChatMessage {
        role: role_str(role),
        content,
    }
}

/// Build the two-message prompt for explaining a fingerprint group.
pub fn build_group_prompt(ctx: &GroupInsightContext<'_>) -> Vec<ChatMessage> {
    let context_json = json!({
        "type": "group",
        "fingerprint": ctx.fingerprint,
        "count": ctx.count,
        "levels": ctx.levels,
        "services": ctx.services,
        "events": redact_sample_events(ctx.sample_events),
    });

    let user_prompt = GROUP_TASK_TEMPLATE
        .trim()
        .replace("{CONTEXT}", &context_json.to_string());

    vec![
        message(ChatRole::System, SYSTEM_PROMPT.to_string()),
        message(ChatRole::User, user_prompt),
    ]
}

/// Build the two-message prompt for explaining a rule-based finding.
pub fn build_finding_prompt(ctx: &FindingInsightContext<'_>) -> Vec<ChatMessage> {
    let context_json = json!({
        "type": "finding",
        "rule_id": ctx.rule_id,
        "title": ctx.title,
        "severity": ctx.severity,
        "confidence": ctx.confidence,
        "total_occurrences": ctx.total_occurrences,
        "matched_fingerprints": ctx.matched_fingerprints,
        "events": redact_sample_events(ctx.sample_events),
    });

    let user_prompt = FINDING_TASK_TEMPLATE
        .trim()
        .replace("{CONTEXT}", &context_json.to_string());

    vec![
        message(ChatRole::System, SYSTEM_PROMPT.to_string()),
        message(ChatRole::User, user_prompt),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    fn sample_event() -> LogEventView {
        LogEventView {
            id: Uuid::new_v4(),
            seq: 12,
            ts: None,
            ts_raw: None,
            service: Some("api".to_string()),
            level: Some("ERROR".to_string()),
            message: "connection refused 10.0.0.5".to_string(),
            attrs: serde_json::Value::Null,
            parse_kind: crate::models::log_event::ParseKind::Text,
            parse_confidence: 0.9,
            fingerprint: "abc123".to_string(),
        }
    }

    #[test]
    fn group_prompt_has_two_messages_with_exact_headings() {
        let events = vec![sample_event()];
        let ctx = GroupInsightContext {
            fingerprint: "abc123",
            count: 42,
            levels: &json!({"ERROR": 42}),
            services: &json!({"api": 42}),
            sample_events: &events,
        };
        let messages = build_group_prompt(&ctx);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, "system");
        assert_eq!(messages[1].role, "user");
        assert!(messages[1].content.contains("## Summary"));
        assert!(messages[1].content.contains("## Evidence cited"));
    }

    #[test]
    fn finding_prompt_redacts_ip_from_sample_events() {
        let events = vec![sample_event()];
        let ctx = FindingInsightContext {
            rule_id: "db_connection_failure",
            title: "Database connection failures",
            severity: "HIGH",
            confidence: 0.85,
            total_occurrences: 42,
            matched_fingerprints: &json!([{"fingerprint": "abc123", "count": 42}]),
            sample_events: &events,
        };
        let messages = build_finding_prompt(&ctx);
        assert!(!messages[1].content.contains("10.0.0.5"));
        assert!(messages[1].content.contains("<ip>"));
    }

    #[tokio::test]
    async fn null_client_returns_a_canned_response() {
        let client = NullInsightClient;
        let result = client.complete(&[]).await.unwrap();
        assert!(result.contains("No insight backend configured"));
    }
}
