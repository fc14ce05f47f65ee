//! Static rule catalogue applied to event messages by the findings engine.
//! Compiled once at process start; read-only thereafter.

use std::sync::OnceLock;

use regex::Regex;

use crate::models::finding::Severity;

pub struct Rule {
    pub id: &'static str,
    pub title: &'static str,
    pub severity: Severity,
    pub confidence: f64,
    patterns: &'static [&'static str],
}

pub struct RuleMatch {
    pub rule_id: &'static str,
    pub title: &'static str,
    pub severity: Severity,
    pub confidence: f64,
}

const CATALOGUE: &[Rule] = &[
    Rule {
        id: "db_connection_failure",
        title: "Database connection failures",
        severity: Severity::High,
        confidence: 0.85,
        patterns: &[
            r"\bconnection refused\b",
            r"\beconnrefused\b",
            r"\bno route to host\b",
            r"\btimeout acquiring connection\b",
            r"\bconnection timed out\b",
            r"\btoo many connections\b",
        ],
    },
    Rule {
        id: "db_auth_failure",
        title: "Database authentication/permission errors",
        severity: Severity::High,
        confidence: 0.80,
        patterns: &[
            r"\bpassword authentication failed\b",
            r"\bauthentication failed\b",
            r"\baccess denied for user\b",
            r"\bpermission denied\b",
            r"\brole .* does not exist\b",
        ],
    },
    Rule {
        id: "http_rate_limited",
        title: "Rate limiting (HTTP 429 / too many requests)",
        severity: Severity::Med,
        confidence: 0.80,
        patterns: &[
            r"\b429\b",
            r"\btoo many requests\b",
            r"\brate limit(ed|ing)?\b",
            r"\bthrottl(ed|ing)\b",
        ],
    },
    Rule {
        id: "auth_token_expired",
        title: "Auth token/session expired",
        severity: Severity::Med,
        confidence: 0.75,
        patterns: &[
            r"\bjwt expired\b",
            r"\btoken expired\b",
            r"\bsession expired\b",
            r"\bexpired signature\b",
        ],
    },
    Rule {
        id: "invalid_credentials",
        title: "Invalid credentials / login failures",
        severity: Severity::Med,
        confidence: 0.70,
        patterns: &[
            r"\binvalid credentials\b",
            r"\blogin failed\b",
            r"\bwrong password\b",
            r"\bunauthorized\b",
            r"\b401\b",
        ],
    },
    Rule {
        id: "oom_memory",
        title: "Out of memory / heap exhaustion",
        severity: Severity::Crit,
        confidence: 0.90,
        patterns: &[
            r"\bout of memory\b",
            r"\boomed\b",
            r"\bjava\.lang\.outofmemoryerror\b",
            r"\bcannot allocate memory\b",
            r"\bmalloc\(\) failed\b",
            r"\bheap space\b",
            r"\bkilled process .* out of memory\b",
        ],
    },
    Rule {
        id: "disk_full",
        title: "Disk full / no space left",
        severity: Severity::High,
        confidence: 0.85,
        patterns: &[
            r"\bno space left on device\b",
            r"\bdisk quota exceeded\b",
            r"\bfilesystem is full\b",
            r"\benospc\b",
        ],
    },
    Rule {
        id: "tls_cert_failure",
        title: "TLS/SSL handshake or certificate failures",
        severity: Severity::High,
        confidence: 0.80,
        patterns: &[
            r"\bcertificate verify failed\b",
            r"\bself[- ]signed certificate\b",
            r"\bssl handshake failed\b",
            r"\btls handshake failed\b",
            r"\bunknown ca\b",
            r"\bcertificate has expired\b",
        ],
    },
    Rule {
        id: "upstream_timeout",
        title: "Upstream timeouts / gateway errors",
        severity: Severity::High,
        confidence: 0.78,
        patterns: &[
            r"\b504\b",
            r"\bgateway timeout\b",
            r"\bupstream timed out\b",
            r"\brequest timeout\b",
            r"\betimedout\b",
        ],
    },
    Rule {
        id: "payment_failure",
        title: "Payment/charge failures",
        severity: Severity::High,
        confidence: 0.70,
        patterns: &[
            r"\bpayment failed\b",
            r"\bcharge (declined|failed)\b",
            r"\binsufficient funds\b",
            r"\bcard declined\b",
            r"\bdo not honor\b",
        ],
    },
];

const GENERIC_PATTERNS: &[&str] = &[
    r"\bpanic\b",
    r"\bfail(ed|ure)?\b",
    r"\bexception\b",
    r"\bcritical\b",
    r"\bsegmentation fault\b",
    r"\bcore dumped\b",
    r"\bstack trace\b",
    r"\btraceback\b",
    r"\bunhandled\b",
    r"\bunexpected\b",
    r"\bfatal\b",
    r"\bsegfault\b",
    r"\bshutdown\b",
    r"\bcrash(es|ed)?\b",
    r"\bdeadlock\b",
    r"\btimeout\b",
    r"\bcorrupted\b",
    r"\bdata loss\b",
];

fn compiled_catalogue() -> &'static Vec<Vec<Regex>> {
    static RE: OnceLock<Vec<Vec<Regex>>> = OnceLock::new();
    RE.get_or_init(|| {
        CATALOGUE
            .iter()
            .map(|rule| {
                rule.patterns
                    .iter()
                    .map(|p| Regex::new(&format!("(?i){p}")).unwrap())
                    .collect()
            })
            .collect()
    })
}

fn compiled_generic() -> &'static Vec<Regex> {
    static RE: OnceLock<Vec<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        GENERIC_PATTERNS
            .iter()
            .map(|p| Regex::new(&format!("(?i){p}")).unwrap())
            .collect()
    })
}

/// All catalogue rules whose any pattern matches `message`.
pub fn apply_rules(message: &str) -> Vec<RuleMatch> {
    CATALOGUE
        .iter()
        .zip(compiled_catalogue())
        .filter(|(_, patterns)| patterns.iter().any(|p| p.is_match(message)))
        .map(|(rule, _)| RuleMatch {
            rule_id: rule.id,
            title: rule.title,
            severity: rule.severity,
            confidence: rule.confidence,
        })
        .collect()
}

/// Fallback pattern set for untagged error events.
pub fn apply_generic(message: &str) -> bool {
    compiled_generic().iter().any(|p| p.is_match(message))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn db_auth_failure_matches_password_message() {
        let matches = apply_rules("password authentication failed for user X");
        assert!(matches.iter().any(|m| m.rule_id == "db_auth_failure"));
    }

    #[test]
    fn generic_fallback_catches_panic() {
        assert!(apply_generic("something went terribly wrong, panic!"));
    }

    #[test]
    fn unrelated_message_matches_nothing() {
        let matches = apply_rules("user logged in successfully");
        assert!(matches.is_empty());
        assert!(!apply_generic("user logged in successfully"));
    }

    #[test]
    fn a_message_may_match_multiple_rules() {
        let matches = apply_rules("request timeout: gateway timeout after 504");
        let ids: Vec<_> = matches.iter().map(|m| m.rule_id).collect();
        assert!(ids.contains(&"upstream_timeout"));
    }
}
