//! Provider transports.
//!
//! Two interchangeable [`GenerationTransport`]s reach the model: a proxied
//! one through a trusted intermediary holding the real credential, and a
//! direct one using a locally held key. [`MediaUploader`] turns local bytes
//! into a provider file handle for the direct path.

pub mod gemini;
pub mod mime;
pub mod mock;
pub mod proxy;

pub use gemini::{GeminiDirectClient, GeminiFilesClient};
pub use mock::{MockTransport, MockUploader};
pub use proxy::ProxyClient;

use crate::ai::gemini::types::Content;
use crate::models::{GenerationConfig, UploadRecord};
use crate::Result;
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;

/// Media the proxy uploads and references server-side.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyUpload {
    /// Base64 of the raw bytes.
    pub data: String,
    pub mime_type: String,
    pub file_name: String,
}

/// One attempt against one model.
#[derive(Debug, Clone, Copy)]
pub struct TransportCall<'a> {
    pub model: &'a str,
    pub contents: &'a [Content],
    pub config: &'a GenerationConfig,
    pub upload: Option<&'a ProxyUpload>,
    pub timeout: Duration,
}

#[async_trait]
pub trait GenerationTransport: Send + Sync {
    fn name(&self) -> &'static str;

    /// Returns the raw provider response body.
    async fn generate(&self, call: &TransportCall<'_>) -> Result<serde_json::Value>;
}

#[async_trait]
pub trait MediaUploader: Send + Sync {
    /// Upload bytes and return the handle once the provider reports it
    /// `ACTIVE`.
    async fn upload_and_activate(
        &self,
        data: &[u8],
        mime_type: &str,
        file_name: &str,
    ) -> Result<UploadRecord>;
}
