//! Maps opaque upstream failures onto [`ErrorKind`].
//!
//! This is the only place in the crate that inspects message text. Callers
//! build an [`UpstreamError`](crate::error::UpstreamError) once at the
//! transport boundary and branch on its `kind` from then on.

use crate::error::ErrorKind;
use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;
use std::time::Duration;

const MAX_MESSAGE_CHARS: usize = 500;

const NETWORK_MARKERS: [&str; 6] = [
    "network",
    "timeout",
    "timed out",
    "connection",
    "fetch failed",
    "aborted",
];

fn quota_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    // "rate" is matched as a word so that "generate" does not count.
    PATTERN.get_or_init(|| {
        Regex::new(r"quota|resource_exhausted|resource exhausted|rate[ _-]?limit|\brate\b")
            .expect("valid quota regex")
    })
}

fn status_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\b([1-5][0-9]{2})\b").expect("valid status regex"))
}

fn retry_delay_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#""retryDelay"\s*:\s*"([0-9]+(?:\.[0-9]+)?)s""#).expect("valid retryDelay regex")
    })
}

fn retry_in_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)retry in ([0-9]+(?:\.[0-9]+)?)\s*s").expect("valid retry-in regex")
    })
}

/// Classify a failure, in priority order: quota, access, network, server,
/// and everything else as fatal.
///
/// `aborted` marks failures where the request never produced a response
/// (deadline fired, connection refused).
pub fn classify(status: Option<u16>, message: &str, aborted: bool) -> ErrorKind {
    let lower = message.to_ascii_lowercase();
    let status = status.or_else(|| status_from_message(&lower));

    if status == Some(429) || quota_pattern().is_match(&lower) {
        return ErrorKind::Quota;
    }

    if matches!(status, Some(401 | 403 | 404))
        || lower.contains("unauthorized")
        || lower.contains("forbidden")
        || lower.contains("permission")
        || (lower.contains("model") && lower.contains("not found"))
    {
        return ErrorKind::AccessDenied;
    }

    if aborted || NETWORK_MARKERS.iter().any(|marker| lower.contains(marker)) {
        return ErrorKind::NetworkTransient;
    }

    if matches!(status, Some(500..=599)) {
        return ErrorKind::ServerTransient;
    }

    ErrorKind::ClientFatal
}

/// Recover an HTTP status from message text.
pub fn status_from_message(message: &str) -> Option<u16> {
    if let Some(code) = status_pattern()
        .captures(message)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
    {
        return Some(code);
    }

    let lower = message.to_ascii_lowercase();
    if lower.contains("unavailable") || lower.contains("overloaded") {
        return Some(503);
    }
    None
}

/// Best-effort provider retry hint.
///
/// Structured `RetryInfo.retryDelay` wins; a "retry in Ns" phrase in the
/// message is the fallback.
pub fn retry_after_from(body: &str) -> Option<Duration> {
    if let Ok(value) = serde_json::from_str::<Value>(body) {
        if let Some(delay) = find_retry_delay(&value).and_then(parse_seconds) {
            return Some(delay);
        }
    }

    if let Some(delay) = retry_delay_pattern()
        .captures(body)
        .and_then(|caps| caps.get(1))
        .and_then(|m| parse_seconds(m.as_str()))
    {
        return Some(delay);
    }

    retry_in_pattern()
        .captures(body)
        .and_then(|caps| caps.get(1))
        .and_then(|m| parse_seconds(m.as_str()))
}

fn find_retry_delay(value: &Value) -> Option<&str> {
    match value {
        Value::Object(map) => {
            if let Some(delay) = map.get("retryDelay").and_then(Value::as_str) {
                return Some(delay);
            }
            map.values().find_map(find_retry_delay)
        }
        Value::Array(items) => items.iter().find_map(find_retry_delay),
        _ => None,
    }
}

/// Upper bound on any honored retry hint.
pub const MAX_RETRY_HINT: Duration = Duration::from_secs(24 * 60 * 60);

fn parse_seconds(raw: &str) -> Option<Duration> {
    let secs: f64 = raw.trim().trim_end_matches('s').parse().ok()?;
    Duration::try_from_secs_f64(secs)
        .ok()
        .map(|delay| delay.min(MAX_RETRY_HINT))
}

/// Pull a human-readable message (and numeric code, if any) out of an error
/// body. Understands the Google RPC envelope, `{"error": "..."}`,
/// `{"message": "..."}` and plain text.
pub fn error_message_from_body(body: &str) -> (String, Option<u16>) {
    let Ok(value) = serde_json::from_str::<Value>(body) else {
        return (truncate(body.trim()), None);
    };

    match value.get("error") {
        Some(Value::Object(error)) => {
            let code = error
                .get("code")
                .and_then(Value::as_u64)
                .and_then(|c| u16::try_from(c).ok());
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or_default();
            let message = match error.get("status").and_then(Value::as_str) {
                Some(status) if !message.is_empty() => format!("{} ({})", message, status),
                Some(status) => status.to_string(),
                None => message.to_string(),
            };
            (truncate(&message), code)
        }
        Some(Value::String(message)) => (truncate(message), None),
        _ => match value.get("message").and_then(Value::as_str) {
            Some(message) => (truncate(message), None),
            None => (truncate(body.trim()), None),
        },
    }
}

fn truncate(message: &str) -> String {
    if message.chars().count() <= MAX_MESSAGE_CHARS {
        message.to_string()
    } else {
        let mut short: String = message.chars().take(MAX_MESSAGE_CHARS).collect();
        short.push('…');
        short
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quota_by_status_and_message() {
        assert_eq!(classify(Some(429), "", false), ErrorKind::Quota);
        assert_eq!(
            classify(Some(400), "Quota exceeded for metric", false),
            ErrorKind::Quota
        );
        assert_eq!(
            classify(None, "RESOURCE_EXHAUSTED", false),
            ErrorKind::Quota
        );
        assert_eq!(classify(None, "rate limit reached", false), ErrorKind::Quota);
    }

    #[test]
    fn test_generate_does_not_look_like_rate() {
        assert_eq!(
            classify(Some(400), "failed to generate content: bad schema", false),
            ErrorKind::ClientFatal
        );
    }

    #[test]
    fn test_quota_wins_over_access_denied() {
        assert_eq!(
            classify(Some(403), "quota exceeded for project", false),
            ErrorKind::Quota
        );
    }

    #[test]
    fn test_access_denied_rules() {
        assert_eq!(classify(Some(401), "", false), ErrorKind::AccessDenied);
        assert_eq!(classify(Some(403), "", false), ErrorKind::AccessDenied);
        assert_eq!(classify(Some(404), "", false), ErrorKind::AccessDenied);
        assert_eq!(
            classify(None, "Permission denied on resource", false),
            ErrorKind::AccessDenied
        );
        assert_eq!(
            classify(Some(400), "models/gemini-9 is not found for API version", false),
            ErrorKind::AccessDenied
        );
    }

    #[test]
    fn test_network_rules() {
        assert_eq!(classify(None, "fetch failed", false), ErrorKind::NetworkTransient);
        assert_eq!(
            classify(None, "Connection reset by peer", false),
            ErrorKind::NetworkTransient
        );
        assert_eq!(classify(None, "", true), ErrorKind::NetworkTransient);
    }

    #[test]
    fn test_server_rules() {
        assert_eq!(classify(Some(500), "internal", false), ErrorKind::ServerTransient);
        assert_eq!(classify(Some(599), "", false), ErrorKind::ServerTransient);
        assert_eq!(
            classify(None, "The model is overloaded", false),
            ErrorKind::ServerTransient
        );
        assert_eq!(
            classify(None, "upstream said 502 bad gateway", false),
            ErrorKind::ServerTransient
        );
    }

    #[test]
    fn test_everything_else_is_fatal() {
        assert_eq!(classify(Some(400), "invalid argument", false), ErrorKind::ClientFatal);
        assert_eq!(classify(None, "something odd", false), ErrorKind::ClientFatal);
    }

    #[test]
    fn test_status_from_message() {
        assert_eq!(status_from_message("got HTTP 503 from upstream"), Some(503));
        assert_eq!(status_from_message("Service Unavailable"), Some(503));
        assert_eq!(status_from_message("waited 45000ms"), None);
        assert_eq!(status_from_message("plain failure"), None);
    }

    #[test]
    fn test_retry_after_prefers_structured_retry_info() {
        let body = serde_json::json!({
            "error": {
                "code": 429,
                "message": "Quota exceeded. Please retry in 5s.",
                "status": "RESOURCE_EXHAUSTED",
                "details": [{
                    "@type": "type.googleapis.com/google.rpc.RetryInfo",
                    "retryDelay": "42s"
                }]
            }
        })
        .to_string();
        assert_eq!(retry_after_from(&body), Some(Duration::from_secs(42)));
    }

    #[test]
    fn test_retry_after_falls_back_to_message_phrase() {
        assert_eq!(
            retry_after_from("Please retry in 12.5s."),
            Some(Duration::from_millis(12_500))
        );
        assert_eq!(
            retry_after_from(r#"proxy: {"retryDelay": "7s"} (truncated"#),
            Some(Duration::from_secs(7))
        );
        assert_eq!(retry_after_from("no hint here"), None);
    }

    #[test]
    fn test_oversized_retry_hint_is_clamped_or_dropped() {
        let huge = r#"{"error":{"code":429,"details":[{"retryDelay":"99999999999999999999999s"}]}}"#;
        assert_eq!(retry_after_from(huge), None);
        assert_eq!(retry_after_from("please retry in 99999999999999999999999s"), None);
        assert_eq!(retry_after_from("retry in 172800s"), Some(MAX_RETRY_HINT));

        let err = crate::error::UpstreamError::from_response(429, huge);
        assert_eq!(err.kind, ErrorKind::Quota);
        assert_eq!(err.retry_after, None);
    }

    #[test]
    fn test_error_message_from_google_envelope() {
        let body = r#"{"error":{"code":429,"message":"Quota exceeded","status":"RESOURCE_EXHAUSTED"}}"#;
        let (message, code) = error_message_from_body(body);
        assert_eq!(message, "Quota exceeded (RESOURCE_EXHAUSTED)");
        assert_eq!(code, Some(429));
    }

    #[test]
    fn test_error_message_from_plain_text_and_string_error() {
        assert_eq!(
            error_message_from_body("  upstream exploded \n"),
            ("upstream exploded".to_string(), None)
        );
        assert_eq!(
            error_message_from_body(r#"{"error":"bad key"}"#),
            ("bad key".to_string(), None)
        );
    }
}
