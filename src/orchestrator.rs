//! Resilient generation: the model × attempt retry matrix.
//!
//! [`GenerationClient::execute`] checks the shared [`RateLimiter`], resolves
//! media through the [`TransportSelector`], then walks the candidate chain.
//! Transient failures are retried on the same model with backoff,
//! quota/access failures move to the next model immediately, and fatal
//! failures abort the whole call.

use crate::ai::gemini::types::GenerateContentResponse;
use crate::ai::{
    GeminiDirectClient, GeminiFilesClient, GenerationTransport, MediaUploader, ProxyClient,
    TransportCall,
};
use crate::clock::{Clock, SystemClock};
use crate::error::{ErrorKind, UpstreamError};
use crate::models::{
    Config, GenerationConfig, GenerationOutput, MediaOutcome, ModelSettings, PromptContent,
    RequestOptions, RequestSpec,
};
use crate::resilience::backoff::DEFAULT_BASE_DELAY;
use crate::resilience::{backoff_delay, build_chain, RateLimiter};
use crate::selector::{Route, TransportSelector};
use crate::{Error, Result};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn, Instrument};
use uuid::Uuid;

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(45);
pub const MEDIA_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);
pub const DEFAULT_MAX_RETRIES: u32 = 2;
pub const DEFAULT_MAX_MODELS: usize = 4;

/// Observation emitted before each backoff sleep and each model switch.
#[derive(Debug, Clone, PartialEq)]
pub enum RetryEvent {
    Backoff {
        model: String,
        attempt: u32,
        delay: Duration,
        kind: ErrorKind,
        message: String,
    },
    Failover {
        from: String,
        to: Option<String>,
        kind: ErrorKind,
        message: String,
    },
}

pub type RetryHook = Arc<dyn Fn(&RetryEvent) + Send + Sync>;

/// Per-call retry budget.
#[derive(Clone)]
pub struct RetryConfig {
    /// Retries after the first attempt, per model.
    pub max_retries: u32,
    pub base_delay: Duration,
    /// Per-attempt timeout; `None` picks 45s, or 120s when media is attached.
    pub request_timeout: Option<Duration>,
    pub max_models: usize,
    pub on_retry: Option<RetryHook>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: DEFAULT_BASE_DELAY,
            request_timeout: None,
            max_models: DEFAULT_MAX_MODELS,
            on_retry: None,
        }
    }
}

impl RetryConfig {
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    pub fn with_hook(mut self, hook: impl Fn(&RetryEvent) + Send + Sync + 'static) -> Self {
        self.on_retry = Some(Arc::new(hook));
        self
    }

    fn notify(&self, event: RetryEvent) {
        if let Some(hook) = &self.on_retry {
            hook(&event);
        }
    }
}

impl std::fmt::Debug for RetryConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryConfig")
            .field("max_retries", &self.max_retries)
            .field("base_delay", &self.base_delay)
            .field("request_timeout", &self.request_timeout)
            .field("max_models", &self.max_models)
            .field("on_retry", &self.on_retry.is_some())
            .finish()
    }
}

/// Injectable collaborators used to construct a [`GenerationClient`].
pub struct ClientServices {
    pub proxy: Option<Arc<dyn GenerationTransport>>,
    pub direct: Option<Arc<dyn GenerationTransport>>,
    pub uploader: Option<Arc<dyn MediaUploader>>,
    pub limiter: Arc<RateLimiter>,
    pub clock: Arc<dyn Clock>,
    pub models: ModelSettings,
}

/// Cloning shares the transports and the rate limiter.
#[derive(Clone)]
pub struct GenerationClient {
    proxy: Option<Arc<dyn GenerationTransport>>,
    direct: Option<Arc<dyn GenerationTransport>>,
    uploader: Option<Arc<dyn MediaUploader>>,
    limiter: Arc<RateLimiter>,
    clock: Arc<dyn Clock>,
    models: ModelSettings,
}

impl GenerationClient {
    pub fn with_services(services: ClientServices) -> Self {
        Self {
            proxy: services.proxy,
            direct: services.direct,
            uploader: services.uploader,
            limiter: services.limiter,
            clock: services.clock,
            models: services.models,
        }
    }

    /// Build the production transports described by `config`.
    pub fn from_config(config: &Config) -> Result<Self> {
        // One connection pool for every transport.
        let http_client = reqwest::Client::new();
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);

        let proxy = config.proxy_url.as_ref().map(|url| {
            info!("Proxy transport: {}", url);
            Arc::new(
                ProxyClient::new_with_client(url.clone(), http_client.clone())
                    .with_token(config.proxy_token.clone()),
            ) as Arc<dyn GenerationTransport>
        });

        let (direct, uploader) = match &config.gemini_api_key {
            Some(api_key) => {
                info!("Direct transport: {}", config.gemini_base_url);
                let direct = GeminiDirectClient::new_with_client(api_key.clone(), http_client.clone())
                    .with_base_url(config.gemini_base_url.clone())
                    .with_app_identity(config.app_identity.clone());
                let files =
                    GeminiFilesClient::new_with_client(api_key.clone(), http_client, clock.clone())
                        .with_base_url(config.gemini_base_url.clone())
                        .with_app_identity(config.app_identity.clone());
                (
                    Some(Arc::new(direct) as Arc<dyn GenerationTransport>),
                    Some(Arc::new(files) as Arc<dyn MediaUploader>),
                )
            }
            None => (None, None),
        };

        if proxy.is_none() && direct.is_none() {
            return Err(Error::Config(
                "Neither a proxy URL nor a direct credential is configured".to_string(),
            ));
        }

        Ok(Self::with_services(ClientServices {
            proxy,
            direct,
            uploader,
            limiter: Arc::new(RateLimiter::new(clock.clone())),
            clock,
            models: config.models.clone(),
        }))
    }

    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn is_rate_limited(&self) -> bool {
        self.limiter.is_rate_limited()
    }

    pub fn remaining_cooldown(&self) -> Duration {
        self.limiter.remaining_cooldown()
    }

    pub async fn generate(
        &self,
        contents: impl Into<PromptContent>,
        config: GenerationConfig,
        options: RequestOptions,
        retry: &RetryConfig,
    ) -> Result<GenerationOutput> {
        let spec = RequestSpec::new(contents.into(), config, options);
        self.execute(&spec, retry).await
    }

    /// Generate and parse the response text as JSON.
    ///
    /// A response that does not parse is a [`Error::MalformedResponse`] and is
    /// not retried.
    pub async fn generate_json<T: DeserializeOwned>(
        &self,
        contents: impl Into<PromptContent>,
        config: GenerationConfig,
        options: RequestOptions,
        retry: &RetryConfig,
    ) -> Result<T> {
        let output = self.generate(contents, config, options, retry).await?;
        parse_structured(&output.text)
    }

    pub async fn execute(&self, spec: &RequestSpec, retry: &RetryConfig) -> Result<GenerationOutput> {
        let request_id = Uuid::new_v4();
        let span = tracing::info_span!("generate", %request_id);
        self.execute_inner(spec, retry).instrument(span).await
    }

    fn check_breaker(&self) -> Result<()> {
        if self.limiter.is_rate_limited() {
            let remaining = self.limiter.remaining_cooldown();
            warn!(
                remaining_ms = remaining.as_millis() as u64,
                "Rate-limit cooldown active; failing fast"
            );
            return Err(Error::RateLimited { remaining });
        }
        Ok(())
    }

    async fn execute_inner(&self, spec: &RequestSpec, retry: &RetryConfig) -> Result<GenerationOutput> {
        spec.config.validate()?;

        self.check_breaker()?;

        let selector = TransportSelector {
            direct_available: self.direct.is_some(),
            proxy_available: self.proxy.is_some(),
            uploader: self.uploader.as_deref(),
        };
        let resolved = selector
            .resolve(
                spec.contents.clone().into_contents(),
                spec.media.as_ref(),
                spec.prefer_direct_transport,
            )
            .await?;

        let transport = match resolved.route {
            Route::Direct => self.direct.as_ref(),
            Route::Proxy => self.proxy.as_ref(),
        }
        .ok_or_else(|| {
            Error::NoTransportAvailable(format!("{:?} transport is not configured", resolved.route))
        })?;

        let mut chain = build_chain(
            spec.model.as_deref(),
            &self.models.default_model,
            &self.models.fallback_model,
            &self.models.extra_fallbacks,
        );
        chain.truncate(retry.max_models.max(1));
        if chain.is_empty() {
            return Err(Error::Config("No candidate models configured".to_string()));
        }

        let timeout = retry.request_timeout.unwrap_or(if resolved.has_media() {
            MEDIA_REQUEST_TIMEOUT
        } else {
            DEFAULT_REQUEST_TIMEOUT
        });

        info!(
            transport = transport.name(),
            media = ?resolved.media,
            "Generating with chain {:?}",
            chain
        );

        let mut attempts: u32 = 0;
        let mut last_error: Option<Error> = None;

        'models: for (index, model) in chain.iter().enumerate() {
            let is_last_model = index + 1 == chain.len();
            let next_model = chain.get(index + 1).cloned();

            for attempt in 0..=retry.max_retries {
                // A concurrent call may have armed the cooldown mid-sequence.
                self.check_breaker()?;
                attempts += 1;
                let call = TransportCall {
                    model,
                    contents: &resolved.contents,
                    config: &spec.config,
                    upload: resolved.upload.as_ref(),
                    timeout,
                };

                let result = match tokio::time::timeout(timeout, transport.generate(&call)).await {
                    Ok(result) => result,
                    Err(_) => Err(UpstreamError::timed_out(timeout).into()),
                };

                let err = match result {
                    Ok(raw) => return finish(raw, model, attempts, resolved.media),
                    Err(err) => err,
                };

                let kind = err.kind();
                match kind {
                    ErrorKind::ClientFatal => {
                        error!(model = %model, attempt, "Fatal error, aborting: {}", err);
                        return Err(err);
                    }
                    ErrorKind::Quota | ErrorKind::AccessDenied => {
                        warn!(model = %model, kind = %kind, "Abandoning model: {}", err);
                        if is_last_model && kind == ErrorKind::Quota {
                            self.limiter.arm_cooldown(err.retry_after());
                        }
                        retry.notify(RetryEvent::Failover {
                            from: model.clone(),
                            to: next_model.clone(),
                            kind,
                            message: err.to_string(),
                        });
                        last_error = Some(err);
                        continue 'models;
                    }
                    ErrorKind::NetworkTransient | ErrorKind::ServerTransient => {
                        if attempt < retry.max_retries {
                            let delay = backoff_delay(retry.base_delay, attempt);
                            warn!(
                                model = %model,
                                attempt,
                                delay_ms = delay.as_millis() as u64,
                                "Transient error, backing off: {}",
                                err
                            );
                            retry.notify(RetryEvent::Backoff {
                                model: model.clone(),
                                attempt,
                                delay,
                                kind,
                                message: err.to_string(),
                            });
                            last_error = Some(err);
                            self.clock.sleep(delay).await;
                        } else {
                            warn!(model = %model, "Retry budget exhausted: {}", err);
                            retry.notify(RetryEvent::Failover {
                                from: model.clone(),
                                to: next_model.clone(),
                                kind,
                                message: err.to_string(),
                            });
                            last_error = Some(err);
                        }
                    }
                }
            }
        }

        let err = last_error
            .unwrap_or_else(|| Error::Config("Candidate chain produced no attempt".to_string()));
        error!(attempts, "All candidate models exhausted: {}", err);
        Err(err)
    }
}

fn finish(
    raw: serde_json::Value,
    model: &str,
    attempts: u32,
    media: MediaOutcome,
) -> Result<GenerationOutput> {
    let response: GenerateContentResponse = serde_json::from_value(raw.clone()).map_err(|e| {
        Error::MalformedResponse(format!("Unexpected response shape: {}", e))
    })?;

    let text = response.text().ok_or_else(|| match response.block_reason() {
        Some(reason) => Error::MalformedResponse(format!("Prompt blocked: {}", reason)),
        None => Error::MalformedResponse("No text in response".to_string()),
    })?;

    info!(model, attempts, "Generation succeeded");
    Ok(GenerationOutput {
        text,
        raw,
        model: model.to_string(),
        attempts,
        media,
    })
}

fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = match rest.split_once('\n') {
        // Drop the language tag line.
        Some((_, body)) => body,
        None => {
            let untagged = rest.trim_start_matches(|c: char| c.is_ascii_alphabetic());
            if untagged.trim_start().starts_with(['{', '[']) {
                untagged
            } else {
                rest
            }
        }
    };
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

/// Parse model output as JSON, tolerating a surrounding Markdown fence.
pub fn parse_structured<T: DeserializeOwned>(text: &str) -> Result<T> {
    serde_json::from_str(strip_code_fences(text)).map_err(|e| {
        Error::MalformedResponse(format!("Response is not valid JSON: {}", e))
    })
}
