//! Error handling and custom error types
//!
//! Every failure surfaced by the relay maps onto an [`ErrorKind`], which the
//! retry controller uses to choose between backoff, failover and abort.

use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::resilience::classify;

/// Retry-relevant classification of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Quota,
    AccessDenied,
    NetworkTransient,
    ServerTransient,
    ClientFatal,
}

impl ErrorKind {
    /// Transient kinds are retried against the same model after a backoff.
    pub fn is_transient(self) -> bool {
        matches!(self, ErrorKind::NetworkTransient | ErrorKind::ServerTransient)
    }

    /// Failover kinds abandon the current model without further attempts.
    pub fn is_failover(self) -> bool {
        matches!(self, ErrorKind::Quota | ErrorKind::AccessDenied)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Quota => "quota",
            ErrorKind::AccessDenied => "access_denied",
            ErrorKind::NetworkTransient => "network_transient",
            ErrorKind::ServerTransient => "server_transient",
            ErrorKind::ClientFatal => "client_fatal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed call to the provider or the proxy, tagged once at the transport
/// boundary.
#[derive(Debug, Clone, PartialEq)]
pub struct UpstreamError {
    pub kind: ErrorKind,
    pub status: Option<u16>,
    pub message: String,
    pub retry_after: Option<Duration>,
}

impl UpstreamError {
    pub fn new(kind: ErrorKind, status: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            kind,
            status,
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = Some(retry_after);
        self
    }

    /// Build from a non-2xx HTTP response and its body.
    pub fn from_response(status: u16, body: &str) -> Self {
        Self::from_body(Some(status), body)
    }

    /// Build from an error body whose HTTP status may be unknown, as happens
    /// when the proxy wraps a provider failure in a 2xx envelope.
    pub fn from_body(status: Option<u16>, body: &str) -> Self {
        let (message, code) = classify::error_message_from_body(body);
        let status = status.or(code);
        Self {
            kind: classify::classify(status, &message, false),
            status: status.or_else(|| classify::status_from_message(&message)),
            message,
            retry_after: classify::retry_after_from(body),
        }
    }

    /// Build from an opaque message with no structured body.
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            kind: classify::classify(None, &message, false),
            status: classify::status_from_message(&message),
            retry_after: classify::retry_after_from(&message),
            message,
        }
    }

    /// Build from a failure to send or read an HTTP exchange.
    pub fn from_reqwest(err: &reqwest::Error) -> Self {
        let aborted = err.is_timeout() || err.is_connect() || err.is_request();
        let status = err.status().map(|s| s.as_u16());
        let message = err.to_string();
        Self {
            kind: classify::classify(status, &message, aborted),
            status,
            message,
            retry_after: None,
        }
    }

    /// The per-attempt deadline fired and the in-flight call was dropped.
    pub fn timed_out(after: Duration) -> Self {
        Self::new(
            ErrorKind::NetworkTransient,
            None,
            format!("request aborted after {}ms timeout", after.as_millis()),
        )
    }
}

impl fmt::Display for UpstreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(status) => write!(f, "{} error (status {}): {}", self.kind, status, self.message),
            None => write!(f, "{} error: {}", self.kind, self.message),
        }
    }
}

impl std::error::Error for UpstreamError {}

fn ceil_secs(duration: &Duration) -> u64 {
    duration.as_millis().div_ceil(1000) as u64
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{0}")]
    Upstream(#[from] UpstreamError),

    #[error("Rate limited: try again in {}s", ceil_secs(.remaining))]
    RateLimited { remaining: Duration },

    #[error("Upload failed (status {status}): {body}")]
    UploadFailed { status: u16, body: String },

    #[error("Upload {name} not ACTIVE after {attempts} polls (last state: {last_state})")]
    UploadTimeout {
        name: String,
        attempts: u32,
        last_state: String,
    },

    #[error("Upload {name} failed provider-side processing")]
    UploadProcessingFailed { name: String },

    #[error("No transport available: {0}")]
    NoTransportAvailable(String),

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Upstream(e) => e.kind,
            Error::RateLimited { .. } => ErrorKind::Quota,
            Error::Http(e) => UpstreamError::from_reqwest(e).kind,
            _ => ErrorKind::ClientFatal,
        }
    }

    /// Provider-suggested wait before the next attempt, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Error::Upstream(e) => e.retry_after,
            Error::RateLimited { remaining } => Some(*remaining),
            _ => None,
        }
    }

    /// Remaining breaker cooldown when the call was rejected without a
    /// network attempt.
    pub fn cooldown_remaining(&self) -> Option<Duration> {
        match self {
            Error::RateLimited { remaining } => Some(*remaining),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
