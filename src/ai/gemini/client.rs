use super::types::{Content, Part};
use crate::ai::{GenerationTransport, TransportCall};
use crate::error::UpstreamError;
use crate::models::{AppIdentity, GenerationConfig, SafetySetting, DEFAULT_GEMINI_BASE_URL};
use crate::resilience::normalize_model;
use crate::{Error, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DirectRequest<'a> {
    contents: &'a [Content],
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<WireGenerationConfig<'a>>,
    #[serde(skip_serializing_if = "is_empty_slice")]
    safety_settings: &'a [SafetySetting],
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
}

fn is_empty_slice<T>(slice: &&[T]) -> bool {
    slice.is_empty()
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WireGenerationConfig<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    response_mime_type: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_schema: Option<&'a serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
}

impl<'a> DirectRequest<'a> {
    fn new(contents: &'a [Content], config: &'a GenerationConfig) -> Self {
        let generation_config = WireGenerationConfig {
            response_mime_type: config.response_mime_type.as_deref(),
            response_schema: config.response_schema.as_ref(),
            temperature: config.temperature,
            max_output_tokens: config.max_output_tokens,
        };
        let has_generation_config = generation_config.response_mime_type.is_some()
            || generation_config.response_schema.is_some()
            || generation_config.temperature.is_some()
            || generation_config.max_output_tokens.is_some();

        Self {
            contents,
            generation_config: has_generation_config.then_some(generation_config),
            safety_settings: &config.safety_settings,
            system_instruction: config.system_instruction.as_ref().map(|text| Content {
                role: None,
                parts: vec![Part::text(text.clone())],
            }),
        }
    }
}

/// Calls the provider's REST API with a locally held key.
pub struct GeminiDirectClient {
    client: Client,
    api_key: String,
    base_url: String,
    app_identity: Option<AppIdentity>,
}

impl GeminiDirectClient {
    pub fn new(api_key: String) -> Self {
        Self::new_with_client(api_key, Client::new())
    }

    pub fn new_with_client(api_key: String, client: Client) -> Self {
        Self {
            client,
            api_key,
            base_url: DEFAULT_GEMINI_BASE_URL.to_string(),
            app_identity: None,
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

    fn generate_url(&self, model: &str) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url,
            normalize_model(model)
        )
    }
}

#[async_trait]
impl GenerationTransport for GeminiDirectClient {
    fn name(&self) -> &'static str {
        "direct"
    }

    async fn generate(&self, call: &TransportCall<'_>) -> Result<serde_json::Value> {
        tracing::debug!("Sending generateContent request to Gemini (model: {})", call.model);

        let body = DirectRequest::new(call.contents, call.config);
        let mut request = self
            .client
            .post(self.generate_url(call.model))
            .query(&[("key", self.api_key.as_str())])
            .timeout(call.timeout)
            .json(&body);
        if let Some(identity) = &self.app_identity {
            for (name, value) in identity.headers() {
                request = request.header(name, value);
            }
        }

        let response = request.send().await.map_err(|e| {
            tracing::error!("Failed to send request to Gemini: {}", e);
            UpstreamError::from_reqwest(&e)
        })?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| UpstreamError::from_reqwest(&e))?;

        if !status.is_success() {
            tracing::error!("Gemini API error (status {}): {}", status, text);
            return Err(UpstreamError::from_response(status.as_u16(), &text).into());
        }

        serde_json::from_str(&text).map_err(|e| {
            tracing::error!("Failed to parse Gemini response: {}\nBody: {}", e, text);
            Error::MalformedResponse(format!("Failed to parse Gemini response: {}", e))
        })
    }
}
