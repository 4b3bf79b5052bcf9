use super::{GenerationTransport, MediaUploader, TransportCall};
use crate::error::UpstreamError;
use crate::models::{UploadRecord, UploadState};
use crate::{Error, Result};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Scripted transport result.
#[derive(Debug, Clone)]
pub enum MockOutcome {
    Text(String),
    Raw(serde_json::Value),
    Fail(UpstreamError),
    Malformed(String),
}

/// What the transport saw for one attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub model: String,
    pub timeout: Duration,
    pub parts: usize,
    pub upload: Option<String>,
}

/// Provider response envelope holding a single text part.
pub fn text_response(text: &str) -> serde_json::Value {
    serde_json::json!({
        "candidates": [{
            "content": { "role": "model", "parts": [{ "text": text }] },
            "finishReason": "STOP"
        }]
    })
}

/// Transport that replays scripted outcomes in order, then succeeds with a
/// default response once the script is exhausted.
#[derive(Clone)]
pub struct MockTransport {
    name: &'static str,
    script: Arc<Mutex<VecDeque<MockOutcome>>>,
    calls: Arc<Mutex<Vec<RecordedCall>>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::named("mock")
    }

    pub fn named(name: &'static str) -> Self {
        Self {
            name,
            script: Arc::new(Mutex::new(VecDeque::new())),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_outcome(self, outcome: MockOutcome) -> Self {
        self.script.lock().unwrap().push_back(outcome);
        self
    }

    pub fn with_text_response(self, text: &str) -> Self {
        self.with_outcome(MockOutcome::Text(text.to_string()))
    }

    pub fn with_error(self, error: UpstreamError) -> Self {
        self.with_outcome(MockOutcome::Fail(error))
    }

    pub fn with_errors(self, error: UpstreamError, times: usize) -> Self {
        (0..times).fold(self, |mock, _| mock.with_error(error.clone()))
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn get_call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn models_called(&self) -> Vec<String> {
        self.calls().into_iter().map(|c| c.model).collect()
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GenerationTransport for MockTransport {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn generate(&self, call: &TransportCall<'_>) -> Result<serde_json::Value> {
        self.calls.lock().unwrap().push(RecordedCall {
            model: call.model.to_string(),
            timeout: call.timeout,
            parts: call.contents.iter().map(|c| c.parts.len()).sum(),
            upload: call.upload.map(|u| u.file_name.clone()),
        });

        let next = self.script.lock().unwrap().pop_front();
        match next {
            None => Ok(text_response("mock response")),
            Some(MockOutcome::Text(text)) => Ok(text_response(&text)),
            Some(MockOutcome::Raw(value)) => Ok(value),
            Some(MockOutcome::Fail(error)) => Err(Error::Upstream(error)),
            Some(MockOutcome::Malformed(message)) => Err(Error::MalformedResponse(message)),
        }
    }
}

/// Scripted upload result.
#[derive(Debug, Clone)]
pub enum MockUploadOutcome {
    Active,
    Rejected { status: u16, body: String },
    ProcessingFailed,
    TimedOut,
}

/// Uploader that records submissions and replays scripted outcomes,
/// defaulting to an `ACTIVE` handle.
#[derive(Clone, Default)]
pub struct MockUploader {
    script: Arc<Mutex<VecDeque<MockUploadOutcome>>>,
    uploads: Arc<Mutex<Vec<(String, String, usize)>>>,
}

impl MockUploader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_outcome(self, outcome: MockUploadOutcome) -> Self {
        self.script.lock().unwrap().push_back(outcome);
        self
    }

    /// `(file_name, mime_type, byte_len)` for each upload.
    pub fn uploads(&self) -> Vec<(String, String, usize)> {
        self.uploads.lock().unwrap().clone()
    }

    pub fn get_call_count(&self) -> usize {
        self.uploads.lock().unwrap().len()
    }
}

#[async_trait]
impl MediaUploader for MockUploader {
    async fn upload_and_activate(
        &self,
        data: &[u8],
        mime_type: &str,
        file_name: &str,
    ) -> Result<UploadRecord> {
        let index = {
            let mut uploads = self.uploads.lock().unwrap();
            uploads.push((file_name.to_string(), mime_type.to_string(), data.len()));
            uploads.len()
        };
        let name = format!("files/mock-{}", index);

        let next = self.script.lock().unwrap().pop_front();
        match next.unwrap_or(MockUploadOutcome::Active) {
            MockUploadOutcome::Active => Ok(UploadRecord {
                uri: format!("https://mock.files/{}", name),
                name,
                mime_type: mime_type.to_string(),
                state: UploadState::Active,
            }),
            MockUploadOutcome::Rejected { status, body } => Err(Error::UploadFailed { status, body }),
            MockUploadOutcome::ProcessingFailed => Err(Error::UploadProcessingFailed { name }),
            MockUploadOutcome::TimedOut => Err(Error::UploadTimeout {
                name,
                attempts: 15,
                last_state: "PROCESSING".to_string(),
            }),
        }
    }
}
