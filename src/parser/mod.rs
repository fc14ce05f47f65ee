//! Turns a blob of mixed-format log text into an ordered list of normalized
//! records. Pure and deterministic: no I/O, no shared state, never panics on
//! malformed input — a line that resists every extractor still becomes a
//! text record with confidence 0.

use std::sync::OnceLock;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use regex::Regex;
use serde_json::Value;

use crate::models::log_event::ParseKind;

const MAX_MESSAGE_LEN: usize = 500;
const LEVELS: [&str; 8] = [
    "INFO", "WARN", "WARNING", "ERROR", "DEBUG", "TRACE", "CRITICAL", "FATAL",
];
const HTTP_VERBS: [&str; 7] = ["GET", "POST", "PUT", "DELETE", "PATCH", "HEAD", "OPTIONS"];

/// One fully extracted record, ready to become a `LogEvent` once a sequence
/// number and fingerprint are assigned by the caller.
#[derive(Debug, Clone)]
pub struct ParsedRecord {
    pub ts: Option<DateTime<Utc>>,
    pub ts_raw: Option<String>,
    pub service: Option<String>,
    pub level: Option<String>,
    pub message: String,
    pub raw: String,
    pub attrs: Value,
    pub parse_kind: ParseKind,
    pub parse_confidence: f64,
    /// Canonical substring fed to the fingerprinter.
    pub signature: String,
}

fn re_bracketed_ts() -> &'static Regex {
    static R: OnceLock<Regex> = OnceLock::new();
    R.get_or_init(|| Regex::new(r"^\[\d{4}-\d{2}-\d{2}").unwrap())
}

fn re_leading_iso_ts() -> &'static Regex {
    static R: OnceLock<Regex> = OnceLock::new();
    R.get_or_init(|| {
        Regex::new(r"^\d{4}-\d{2}-\d{2}[ T]\d{2}:\d{2}:\d{2}(\.\d+)?(Z|[+-]\d{2}:\d{2}|UTC)?")
            .unwrap()
    })
}

fn re_leading_level() -> &'static Regex {
    static R: OnceLock<Regex> = OnceLock::new();
    R.get_or_init(|| {
        Regex::new(r"(?i)^\[?(INFO|WARN|WARNING|ERROR|DEBUG|TRACE|CRITICAL|FATAL)\]?\b").unwrap()
    })
}

fn re_service_kv() -> &'static Regex {
    static R: OnceLock<Regex> = OnceLock::new();
    R.get_or_init(|| Regex::new(r"(?i)\bservice=(\S+)").unwrap())
}

fn re_bracketed_tag() -> &'static Regex {
    static R: OnceLock<Regex> = OnceLock::new();
    R.get_or_init(|| Regex::new(r"^\[([A-Za-z0-9_.\-]+)\]\s*").unwrap())
}

fn re_name_prefix() -> &'static Regex {
    static R: OnceLock<Regex> = OnceLock::new();
    R.get_or_init(|| Regex::new(r"^([A-Za-z0-9][A-Za-z0-9_.\-]{1,63}):\s*").unwrap())
}

fn re_stack_error_line() -> &'static Regex {
    static R: OnceLock<Regex> = OnceLock::new();
    R.get_or_init(|| Regex::new(r"\w+(Error|Exception)(: .*)?$").unwrap())
}

fn re_request_id() -> &'static Regex {
    static R: OnceLock<Regex> = OnceLock::new();
    R.get_or_init(|| {
        Regex::new(r"(?i)\[?(?:req-id|request-id|trace-id|span-id):?\s*([a-f0-9-]+)\]?").unwrap()
    })
}

fn re_user_id() -> &'static Regex {
    static R: OnceLock<Regex> = OnceLock::new();
    R.get_or_init(|| Regex::new(r"(?i)user[:_]?(\w+)").unwrap())
}

fn re_http_status() -> &'static Regex {
    static R: OnceLock<Regex> = OnceLock::new();
    R.get_or_init(|| Regex::new(r"\b(?:HTTP[/\d]*\s+)?([45]\d{2})\b").unwrap())
}

/// Opportunistic correlation-id / user-id / HTTP-status extraction from a
/// text record's header. Never affects confidence or the fingerprint
/// signature; present only so these common operational fields land in
/// `attrs` when they're there to find.
fn extract_request_metadata(header: &str) -> Option<Value> {
    let mut metadata = serde_json::Map::new();
    if let Some(c) = re_request_id().captures(header) {
        metadata.insert("request_id".to_string(), Value::String(c[1].to_string()));
    }
    if let Some(c) = re_user_id().captures(header) {
        metadata.insert("user_id".to_string(), Value::String(c[1].to_string()));
    }
    if let Some(c) = re_http_status().captures(header) {
        if let Ok(status) = c[1].parse::<i64>() {
            metadata.insert("http_status".to_string(), Value::Number(status.into()));
        }
    }
    if metadata.is_empty() {
        None
    } else {
        Some(Value::Object(metadata))
    }
}

/// True if `line` continues the previous record rather than starting a new one.
fn is_continuation(line: &str) -> bool {
    line.starts_with(' ')
        || line.starts_with('\t')
        || line.starts_with("at ")
        || line.contains("Caused by:")
        || line.starts_with("Traceback")
        || line.starts_with("File \"")
        || line.starts_with("...")
}

/// True if `line` looks like the header of a new record.
fn is_new_record_start(line: &str) -> bool {
    let trimmed = line.trim_start();
    if re_bracketed_ts().is_match(trimmed) {
        return true;
    }
    if re_leading_iso_ts().is_match(trimmed) {
        return true;
    }
    if re_leading_level().is_match(trimmed) {
        return true;
    }
    let t = trimmed.trim_end();
    t.starts_with('{') && t.ends_with('}')
}

/// Partition raw input into per-record line groups, applying the
/// continuation/new-record boundary rule.
fn group_lines(text: &str) -> Vec<Vec<&str>> {
    let mut records: Vec<Vec<&str>> = Vec::new();
    for line in text.lines() {
        if records.is_empty() {
            records.push(vec![line]);
            continue;
        }
        if line.trim().is_empty() {
            records.last_mut().unwrap().push(line);
            continue;
        }
        if is_continuation(line) {
            records.last_mut().unwrap().push(line);
        } else if is_new_record_start(line) {
            records.push(vec![line]);
        } else {
            records.last_mut().unwrap().push(line);
        }
    }
    records
}

/// Parse a complete blob of log text into an ordered list of records.
pub fn parse_logs(text: &str) -> Vec<ParsedRecord> {
    group_lines(text)
        .into_iter()
        .map(|lines| parse_record(&lines))
        .collect()
}

fn parse_record(lines: &[&str]) -> ParsedRecord {
    let raw = lines.join("\n");

    if let Some(record) = try_parse_json(&raw) {
        return record;
    }

    parse_text_record(lines, &raw)
}

/// Attempt the JSON extraction path; returns `None` if the joined record
/// text is not a JSON object.
fn try_parse_json(raw: &str) -> Option<ParsedRecord> {
    let trimmed = raw.trim();
    let value: Value = serde_json::from_str(trimmed).ok()?;
    let obj = value.as_object()?;

    let ts_raw = ["ts", "time", "timestamp", "@timestamp", "datetime"]
        .iter()
        .find_map(|k| obj.get(*k))
        .and_then(value_as_string);
    let ts = ts_raw.as_deref().and_then(parse_timestamp);

    let level = ["level", "severity", "log.level"]
        .iter()
        .find_map(|k| obj.get(*k))
        .and_then(value_as_string)
        .map(|l| normalize_level(&l));

    let service = ["service", "service_name", "svc", "app", "component", "logger", "source"]
        .iter()
        .find_map(|k| obj.get(*k))
        .and_then(value_as_string);

    let message = ["message", "msg", "event"]
        .iter()
        .find_map(|k| obj.get(*k))
        .and_then(value_as_string)
        .unwrap_or_else(|| trimmed.to_string());
    let message = truncate_message(&message);

    let signature = build_signature(&[trimmed], &message);

    Some(ParsedRecord {
        ts,
        ts_raw,
        service,
        level,
        message,
        raw: raw.to_string(),
        attrs: value,
        parse_kind: ParseKind::Json,
        parse_confidence: 0.95,
        signature,
    })
}

fn value_as_string(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn parse_text_record(lines: &[&str], raw: &str) -> ParsedRecord {
    let header = lines.first().copied().unwrap_or("");
    let mut remaining = header.trim_start().to_string();

    let (ts_raw, ts, ts_conf) = extract_timestamp(&remaining);
    if let Some(ref matched) = ts_raw {
        remaining = strip_prefix_str(&remaining, matched);
    }

    let (level, lvl_conf) = extract_level(&remaining);
    if level.is_some() {
        remaining = re_leading_level().replace(&remaining, "").trim_start().to_string();
    }

    let (service, remaining_after_service, svc_conf) =
        extract_service(&remaining, ts_conf, lvl_conf);

    let message_source = remaining_after_service.trim();
    let message = if message_source.is_empty() {
        header.trim().to_string()
    } else {
        truncate_message(message_source)
    };

    let confidence = 0.45 * ts_conf + 0.35 * lvl_conf + 0.20 * svc_conf;
    let signature = build_signature(lines, &message);

    ParsedRecord {
        ts,
        ts_raw,
        service,
        level,
        message,
        raw: raw.to_string(),
        attrs: extract_request_metadata(header).unwrap_or(Value::Null),
        parse_kind: ParseKind::Text,
        parse_confidence: confidence,
        signature,
    }
}

fn strip_prefix_str(s: &str, matched: &str) -> String {
    s.strip_prefix(matched)
        .unwrap_or(s)
        .trim_start()
        .to_string()
}

/// Returns `(matched substring, parsed instant, confidence)`.
fn extract_timestamp(header: &str) -> (Option<String>, Option<DateTime<Utc>>, f64) {
    if let Some(m) = re_bracketed_ts().find(header) {
        // Extend to the closing bracket if present.
        let end = header[m.end()..].find(']').map(|i| m.end() + i + 1).unwrap_or(m.end());
        let matched = header[..end].to_string();
        let inner = matched.trim_start_matches('[').trim_end_matches(']');
        let ts = parse_timestamp(inner);
        return (Some(matched), ts, 0.9);
    }
    if let Some(m) = re_leading_iso_ts().find(header) {
        let matched = m.as_str().to_string();
        let ts = parse_timestamp(&matched);
        return (Some(matched), ts, 0.9);
    }
    (None, None, 0.0)
}

fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    let cleaned = s.replace('T', " ").replace("UTC", "").trim().to_string();
    for fmt in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(&cleaned, fmt) {
            return Some(DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc));
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Some(DateTime::<Utc>::from_naive_utc_and_offset(
            date.and_hms_opt(0, 0, 0).unwrap(),
            Utc,
        ));
    }
    None
}

fn normalize_level(raw: &str) -> String {
    let upper = raw.trim().to_uppercase();
    if upper == "WARNING" {
        "WARN".to_string()
    } else {
        upper
    }
}

fn extract_level(header: &str) -> (Option<String>, f64) {
    if let Some(m) = re_leading_level().captures(header) {
        let level = normalize_level(&m[1]);
        (Some(level), 0.9)
    } else {
        (None, 0.0)
    }
}

fn looks_like_date_token(token: &str) -> bool {
    token.len() >= 4 && token.chars().take(4).all(|c| c.is_ascii_digit())
}

/// Returns `(service, remaining text with the service cue removed, confidence)`.
fn extract_service(remaining: &str, ts_conf: f64, lvl_conf: f64) -> (Option<String>, String, f64) {
    if ts_conf >= 0.85 && lvl_conf >= 0.85 {
        if let Some((svc, rest)) = try_next_token_as_service(remaining) {
            return (Some(svc), rest, 0.70);
        }
    }

    if let Some(m) = re_service_kv().captures(remaining) {
        let svc = m[1].to_string();
        let rest = re_service_kv().replace(remaining, "").to_string();
        return (Some(svc), rest, 0.85);
    }

    if let Some(m) = re_bracketed_tag().captures(remaining) {
        let candidate = m[1].to_string();
        if !is_level_name(&candidate) && !looks_like_date_token(&candidate) {
            let rest = remaining[m.get(0).unwrap().end()..].to_string();
            return (Some(candidate), rest, 0.60);
        }
    }

    if let Some(m) = re_name_prefix().captures(remaining) {
        let candidate = m[1].to_string();
        if !is_level_name(&candidate) && !is_http_verb(&candidate) {
            let rest = remaining[m.get(0).unwrap().end()..].to_string();
            return (Some(candidate), rest, 0.65);
        }
    }

    (None, remaining.to_string(), 0.0)
}

fn try_next_token_as_service(remaining: &str) -> Option<(String, String)> {
    let trimmed = remaining.trim_start();
    let (token, rest) = match trimmed.find(char::is_whitespace) {
        Some(i) => (&trimmed[..i], &trimmed[i..]),
        None => (trimmed, ""),
    };
    let candidate = token.trim_end_matches([':', ',']).to_string();
    if candidate.is_empty() {
        return None;
    }
    if is_level_name(&candidate) || is_http_verb(&candidate) || looks_like_date_token(&candidate) {
        return None;
    }
    Some((candidate, rest.to_string()))
}

fn is_level_name(s: &str) -> bool {
    LEVELS.iter().any(|l| l.eq_ignore_ascii_case(s))
}

fn is_http_verb(s: &str) -> bool {
    HTTP_VERBS.iter().any(|v| v.eq_ignore_ascii_case(s))
}

fn truncate_message(message: &str) -> String {
    if message.chars().count() <= MAX_MESSAGE_LEN {
        message.to_string()
    } else {
        let mut truncated: String = message.chars().take(MAX_MESSAGE_LEN - 3).collect();
        truncated.push_str("...");
        truncated
    }
}

/// Choose the canonical substring fed to the fingerprinter.
fn build_signature(lines: &[&str], message: &str) -> String {
    if lines.len() <= 1 {
        return if message.is_empty() {
            lines.first().unwrap_or(&"").trim().to_string()
        } else {
            message.to_string()
        };
    }

    let mut pieces: Vec<String> = Vec::new();

    if let Some(line) = lines.iter().rev().find(|l| re_stack_error_line().is_match(l.trim())) {
        pieces.push(line.trim().to_string());
    }
    for line in lines {
        if line.contains("Caused by:") {
            let t = line.trim().to_string();
            if !pieces.contains(&t) {
                pieces.push(t);
            }
        }
    }
    if lines.iter().any(|l| l.trim_start().starts_with("Traceback")) {
        if let Some(last) = lines.iter().rev().find(|l| !l.trim().is_empty()) {
            let t = last.trim().to_string();
            if !pieces.contains(&t) {
                pieces.push(t);
            }
        }
    }

    if pieces.is_empty() {
        pieces.push(message.to_string());
        if message.ends_with(':') || message.chars().count() < 18 {
            let indented: Vec<String> = lines
                .iter()
                .skip(1)
                .filter(|l| l.starts_with(' ') || l.starts_with('\t'))
                .map(|l| l.trim().to_string())
                .take(2)
                .collect();
            pieces.extend(indented);
        }
    }

    pieces.join(" | ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multiline_java_exception() {
        let text = "2024-01-01 10:00:00 ERROR svc-a: boom\n  at com.example.A.m(A.java:1)\nCaused by: java.lang.NullPointerException";
        let records = parse_logs(text);
        assert_eq!(records.len(), 1);
        let r = &records[0];
        assert_eq!(r.level.as_deref(), Some("ERROR"));
        assert_eq!(r.service.as_deref(), Some("svc-a"));
        assert!(r.signature.contains("Caused by: java.lang.NullPointerException"));
    }

    #[test]
    fn json_line() {
        let text = r#"{"ts":"2024-01-01T00:00:00Z","level":"error","service":"api","message":"connection refused 10.0.0.1"}"#;
        let records = parse_logs(text);
        assert_eq!(records.len(), 1);
        let r = &records[0];
        assert!(matches!(r.parse_kind, ParseKind::Json));
        assert!((r.parse_confidence - 0.95).abs() < 1e-9);
        assert_eq!(r.level.as_deref(), Some("ERROR"));
    }

    #[test]
    fn seq_is_contiguous_and_no_gaps() {
        let text = "INFO a\nINFO b\nINFO c\n";
        let records = parse_logs(text);
        assert_eq!(records.len(), 3);
    }

    #[test]
    fn empty_lines_do_not_start_new_records() {
        let text = "ERROR boom\n\nmore context\nINFO next";
        let records = parse_logs(text);
        assert_eq!(records.len(), 2);
        assert!(records[0].raw.contains("more context"));
    }

    #[test]
    fn malformed_line_still_becomes_a_record() {
        let text = "not a recognizable log line at all";
        let records = parse_logs(text);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].message, text);
    }

    #[test]
    fn warning_level_normalizes_to_warn() {
        let text = "WARNING svc-b: disk usage high";
        let records = parse_logs(text);
        assert_eq!(records[0].level.as_deref(), Some("WARN"));
    }

    #[test]
    fn bracketed_timestamp_starts_new_record() {
        let text = "[2024-01-01 10:00:00] INFO starting up\n[2024-01-01 10:00:01] INFO ready";
        let records = parse_logs(text);
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn opportunistic_metadata_lands_in_attrs() {
        let text = "2024-01-01 10:00:00 ERROR api: request-id: abc-123 failed with 503";
        let records = parse_logs(text);
        let attrs = &records[0].attrs;
        assert_eq!(attrs["request_id"], "abc-123");
        assert_eq!(attrs["http_status"], 503);
    }

    #[test]
    fn text_record_without_metadata_has_null_attrs() {
        let text = "2024-01-01 10:00:00 ERROR svc-a: boom";
        let records = parse_logs(text);
        assert!(records[0].attrs.is_null());
    }
}
