//! Resilient client layer for a hosted generative-model API.
//!
//! Requests are routed through a trusted proxy or sent directly with a local
//! credential, retried per model with exponential backoff, failed over along a
//! candidate model chain, and short-circuited by a process-wide rate-limit
//! breaker. Media payloads are inlined, uploaded directly, or handed to the
//! proxy depending on type, size and available credentials.

pub mod ai;
pub mod clock;
pub mod error;
pub mod models;
pub mod orchestrator;
pub mod resilience;
pub mod selector;

pub use error::{Error, ErrorKind, Result, UpstreamError};
pub use models::{
    Config, GenerationConfig, GenerationOutput, MediaOutcome, MediaReference, RequestOptions,
    RequestSpec,
};
pub use orchestrator::{ClientServices, GenerationClient, RetryConfig, RetryEvent};
pub use resilience::RateLimiter;
