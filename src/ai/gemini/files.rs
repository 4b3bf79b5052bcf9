//! Files API client: upload local bytes, then poll until the provider marks
//! the file `ACTIVE`.
//!
//! A handle is only returned after a status poll has observed `ACTIVE`; the
//! state in the upload response itself is never trusted.

use super::types::{FileResource, UploadResponse};
use crate::ai::MediaUploader;
use crate::clock::{Clock, SystemClock};
use crate::models::{AppIdentity, UploadRecord, UploadState, DEFAULT_GEMINI_BASE_URL};
use crate::{Error, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;

pub const UPLOAD_TIMEOUT: Duration = Duration::from_secs(120);
pub const STATUS_TIMEOUT: Duration = Duration::from_secs(15);
pub const POLL_INTERVAL: Duration = Duration::from_millis(1_000);
pub const MAX_POLLS: u32 = 15;

pub struct GeminiFilesClient {
    client: Client,
    api_key: String,
    base_url: String,
    app_identity: Option<AppIdentity>,
    clock: Arc<dyn Clock>,
    poll_interval: Duration,
    max_polls: u32,
}

impl GeminiFilesClient {
    pub fn new(api_key: String) -> Self {
        Self::new_with_client(api_key, Client::new(), Arc::new(SystemClock))
    }

    pub fn new_with_client(api_key: String, client: Client, clock: Arc<dyn Clock>) -> Self {
        Self {
            client,
            api_key,
            base_url: DEFAULT_GEMINI_BASE_URL.to_string(),
            app_identity: None,
            clock,
            poll_interval: POLL_INTERVAL,
            max_polls: MAX_POLLS,
        }
    }

    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    pub fn with_app_identity(mut self, identity: Option<AppIdentity>) -> Self {
        self.app_identity = identity;
        self
    }

    pub fn with_poll_policy(mut self, interval: Duration, max_polls: u32) -> Self {
        self.poll_interval = interval;
        self.max_polls = max_polls.max(1);
        self
    }

    fn with_identity(&self, mut request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if let Some(identity) = &self.app_identity {
            for (name, value) in identity.headers() {
                request = request.header(name, value);
            }
        }
        request
    }

    /// Submit bytes in a single raw upload. The returned record is `Pending`
    /// until [`wait_until_active`](Self::wait_until_active) observes it.
    pub async fn upload(&self, data: &[u8], mime_type: &str, file_name: &str) -> Result<UploadRecord> {
        tracing::info!(
            "Uploading {} ({} bytes, {}) to Gemini Files API",
            file_name,
            data.len(),
            mime_type
        );

        let request = self
            .client
            .post(format!("{}/upload/v1beta/files", self.base_url))
            .query(&[("key", self.api_key.as_str())])
            .timeout(UPLOAD_TIMEOUT)
            .header("X-Goog-Upload-Protocol", "raw")
            .header("X-Goog-Upload-File-Name", file_name)
            .header("Content-Type", mime_type)
            .body(data.to_vec());

        let response = self.with_identity(request).send().await.map_err(|e| {
            tracing::error!("Failed to send upload request: {}", e);
            e
        })?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            tracing::error!("Upload rejected (status {}): {}", status, body);
            return Err(Error::UploadFailed {
                status: status.as_u16(),
                body,
            });
        }

        let uploaded: UploadResponse = serde_json::from_str(&body).map_err(|e| {
            Error::MalformedResponse(format!("Failed to parse upload response: {}", e))
        })?;

        Ok(UploadRecord {
            name: uploaded.file.name,
            uri: uploaded.file.uri,
            mime_type: if uploaded.file.mime_type.is_empty() {
                mime_type.to_string()
            } else {
                uploaded.file.mime_type
            },
            state: UploadState::Pending,
        })
    }

    async fn file_status(&self, name: &str) -> Result<FileResource> {
        let id = name.strip_prefix("files/").unwrap_or(name);
        let request = self
            .client
            .get(format!("{}/v1beta/files/{}", self.base_url, id))
            .query(&[("key", self.api_key.as_str())])
            .timeout(STATUS_TIMEOUT);

        let response = self.with_identity(request).send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(Error::UploadFailed {
                status: status.as_u16(),
                body,
            });
        }
        Ok(serde_json::from_str(&body)?)
    }

    /// Poll the file until it is `ACTIVE`, fails, or the poll budget runs out.
    pub async fn wait_until_active(&self, mut record: UploadRecord) -> Result<UploadRecord> {
        let mut last_state = "UNKNOWN".to_string();

        for attempt in 1..=self.max_polls {
            match self.file_status(&record.name).await {
                Ok(file) => {
                    let state = file.state.unwrap_or_else(|| "STATE_UNSPECIFIED".to_string());
                    tracing::debug!(
                        "Poll {}/{} for {}: {}",
                        attempt,
                        self.max_polls,
                        record.name,
                        state
                    );
                    match state.as_str() {
                        "ACTIVE" => {
                            if !file.uri.is_empty() {
                                record.uri = file.uri;
                            }
                            if !file.mime_type.is_empty() {
                                record.mime_type = file.mime_type;
                            }
                            record.state = UploadState::Active;
                            tracing::info!("Upload {} is ACTIVE after {} polls", record.name, attempt);
                            return Ok(record);
                        }
                        "FAILED" => {
                            record.state = UploadState::Failed;
                            tracing::error!("Upload {} failed provider-side processing", record.name);
                            return Err(Error::UploadProcessingFailed { name: record.name });
                        }
                        _ => last_state = state,
                    }
                }
                Err(e) => {
                    tracing::warn!("Status poll {} for {} failed: {}", attempt, record.name, e);
                    last_state = format!("UNKNOWN ({})", e);
                }
            }

            if attempt < self.max_polls {
                self.clock.sleep(self.poll_interval).await;
            }
        }

        tracing::error!(
            "Upload {} not ACTIVE after {} polls (last state: {})",
            record.name,
            self.max_polls,
            last_state
        );
        Err(Error::UploadTimeout {
            name: record.name,
            attempts: self.max_polls,
            last_state,
        })
    }
}

#[async_trait]
impl MediaUploader for GeminiFilesClient {
    async fn upload_and_activate(
        &self,
        data: &[u8],
        mime_type: &str,
        file_name: &str,
    ) -> Result<UploadRecord> {
        let record = self.upload(data, mime_type, file_name).await?;
        self.wait_until_active(record).await
    }
}
