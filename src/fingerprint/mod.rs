//! Reduces a record's signature to a stable content hash by stripping
//! volatile tokens before hashing, so semantically equivalent events collapse
//! to one fingerprint group.

use std::sync::OnceLock;

use regex::Regex;
use sha1::{Digest, Sha1};

struct NormalizationRule {
    pattern: &'static str,
    replacement: &'static str,
}

/// Order matters: token-like runs must be matched before the numeric
/// catch-all would otherwise subsume them, and timestamps before the
/// catch-all digit run would shred them.
const RULES: &[NormalizationRule] = &[
    NormalizationRule {
        pattern: r"\b[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}\b",
        replacement: "<uuid>",
    },
    NormalizationRule {
        pattern: r"\b\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3}\b",
        replacement: "<ip>",
    },
    NormalizationRule {
        pattern: r"\b0x[0-9a-f]+\b",
        replacement: "<hex>",
    },
    NormalizationRule {
        pattern: r"\b[a-z0-9._%+\-]+@[a-z0-9.\-]+\.[a-z]{2,}\b",
        replacement: "<email>",
    },
    NormalizationRule {
        pattern: r"https?://[^\s]+",
        replacement: "<url>",
    },
    NormalizationRule {
        pattern: r"\b[a-z0-9]{20,}\b",
        replacement: "<token>",
    },
    NormalizationRule {
        pattern: r"\d{4}-\d{2}-\d{2}[t ]\d{2}:\d{2}:\d{2}(\.\d+)?(z|[+\-]\d{2}:\d{2})?",
        replacement: "<timestamp>",
    },
    NormalizationRule {
        pattern: r"\b\d{4,}\b",
        replacement: "<number>",
    },
];

fn compiled_rules() -> &'static Vec<Regex> {
    static RE: OnceLock<Vec<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        RULES
            .iter()
            .map(|r| Regex::new(&format!("(?i){}", r.pattern)).unwrap())
            .collect()
    })
}

fn re_whitespace() -> &'static Regex {
    static R: OnceLock<Regex> = OnceLock::new();
    R.get_or_init(|| Regex::new(r"\s+").unwrap())
}

/// Apply the nine-step normalization pipeline to a signature string.
pub fn normalize(signature: &str) -> String {
    let mut text = signature.trim().to_lowercase();
    for (rule, re) in RULES.iter().zip(compiled_rules()) {
        text = re.replace_all(&text, rule.replacement).into_owned();
    }
    re_whitespace().replace_all(&text, " ").trim().to_string()
}

/// SHA-1 hex digest (40 chars) of the normalized signature.
pub fn make_fingerprint(signature: &str) -> String {
    let normalized = normalize(signature);
    let mut hasher = Sha1::new();
    hasher.update(normalized.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_forty_hex_chars() {
        let fp = make_fingerprint("connection refused 10.0.0.1");
        assert_eq!(fp.len(), 40);
        assert!(fp.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn ips_collapse_to_same_fingerprint() {
        let a = make_fingerprint("connection refused 10.0.0.1");
        let b = make_fingerprint("connection refused 10.0.0.2");
        assert_eq!(a, b);
    }

    #[test]
    fn uuids_collapse_to_same_fingerprint() {
        let a = make_fingerprint("session 550e8400-e29b-41d4-a716-446655440000 expired");
        let b = make_fingerprint("session 6ba7b810-9dad-11d1-80b4-00c04fd430c8 expired");
        assert_eq!(a, b);
    }

    #[test]
    fn long_numeric_runs_collapse() {
        let a = make_fingerprint("order 20240101123456 failed");
        let b = make_fingerprint("order 99999999999999 failed");
        assert_eq!(a, b);
    }

    #[test]
    fn tokens_collapse_before_numeric_rule_would_apply() {
        let a = make_fingerprint("token abcdefghij1234567890 invalid");
        let b = make_fingerprint("token zzzzzzzzzzzzzzzzzzzz invalid");
        assert_eq!(a, b);
    }

    #[test]
    fn distinct_messages_produce_distinct_fingerprints() {
        let a = make_fingerprint("disk full");
        let b = make_fingerprint("out of memory");
        assert_ne!(a, b);
    }

    #[test]
    fn normalization_is_idempotent() {
        let once = normalize("User admin@example.com logged in from 10.1.2.3 at 2024-01-01T10:00:00Z");
        let twice = normalize(&once);
        assert_eq!(once, twice);
    }
}
