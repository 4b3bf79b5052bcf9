//! Data models and structures
//!
//! Request/response shapes exchanged with callers, plus process
//! configuration loaded from the environment.

use crate::ai::gemini::types::{Content, Part};
use crate::resilience::normalize_model;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";
pub const DEFAULT_FALLBACK_MODEL: &str = "gemini-2.0-flash";
pub const DEFAULT_EXTRA_FALLBACKS: &str = "gemini-2.5-flash-lite";

/// Instruction text or pre-built provider contents.
#[derive(Debug, Clone, PartialEq)]
pub enum PromptContent {
    Text(String),
    Contents(Vec<Content>),
}

impl PromptContent {
    pub fn into_contents(self) -> Vec<Content> {
        match self {
            PromptContent::Text(text) => vec![Content {
                role: Some("user".to_string()),
                parts: vec![Part::text(text)],
            }],
            PromptContent::Contents(contents) => contents,
        }
    }
}

impl From<&str> for PromptContent {
    fn from(text: &str) -> Self {
        PromptContent::Text(text.to_string())
    }
}

impl From<String> for PromptContent {
    fn from(text: String) -> Self {
        PromptContent::Text(text)
    }
}

impl From<Vec<Content>> for PromptContent {
    fn from(contents: Vec<Content>) -> Self {
        PromptContent::Contents(contents)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HarmCategory {
    #[serde(rename = "HARM_CATEGORY_HARASSMENT")]
    Harassment,
    #[serde(rename = "HARM_CATEGORY_HATE_SPEECH")]
    HateSpeech,
    #[serde(rename = "HARM_CATEGORY_SEXUALLY_EXPLICIT")]
    SexuallyExplicit,
    #[serde(rename = "HARM_CATEGORY_DANGEROUS_CONTENT")]
    DangerousContent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HarmBlockThreshold {
    BlockNone,
    BlockOnlyHigh,
    BlockMediumAndAbove,
    BlockLowAndAbove,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafetySetting {
    pub category: HarmCategory,
    pub threshold: HarmBlockThreshold,
}

/// Generation options. `None` / empty means provider default.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_mime_type: Option<String>,
    /// Structured-output contract (OpenAPI-style schema object).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_schema: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub safety_settings: Vec<SafetySetting>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,
}

impl GenerationConfig {
    /// JSON output constrained by `schema`.
    pub fn json(schema: serde_json::Value) -> Self {
        Self {
            response_mime_type: Some("application/json".to_string()),
            response_schema: Some(schema),
            ..Self::default()
        }
    }

    pub fn with_system_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.system_instruction = Some(instruction.into());
        self
    }

    pub fn with_safety_setting(mut self, setting: SafetySetting) -> Self {
        self.safety_settings.push(setting);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(schema) = &self.response_schema {
            if !schema.is_object() {
                return Err(Error::Config(
                    "responseSchema must be a JSON object".to_string(),
                ));
            }
            if self.response_mime_type.as_deref() != Some("application/json") {
                return Err(Error::Config(
                    "responseSchema requires responseMimeType application/json".to_string(),
                ));
            }
        }

        if let Some(temperature) = self.temperature {
            if !(0.0..=2.0).contains(&temperature) {
                return Err(Error::Config(format!(
                    "temperature {} outside 0.0..=2.0",
                    temperature
                )));
            }
        }

        if self.max_output_tokens == Some(0) {
            return Err(Error::Config("maxOutputTokens must be positive".to_string()));
        }

        Ok(())
    }
}

/// Media attached to a generation request.
#[derive(Debug, Clone, PartialEq)]
pub enum MediaReference {
    /// Small payloads embedded directly in the request.
    InlineBytes { data: Vec<u8>, mime_type: String },
    /// An already-uploaded provider file.
    FileHandle {
        uri: String,
        mime_type: String,
        file_name: String,
    },
    /// In-memory bytes that may need an upload step.
    RawBytesForUpload {
        data: Vec<u8>,
        mime_type: String,
        file_name: String,
    },
    /// A local file, eligible for direct upload.
    LocalFile {
        path: PathBuf,
        mime_type: String,
        file_name: String,
    },
}

impl MediaReference {
    pub fn mime_type(&self) -> &str {
        match self {
            MediaReference::InlineBytes { mime_type, .. }
            | MediaReference::FileHandle { mime_type, .. }
            | MediaReference::RawBytesForUpload { mime_type, .. }
            | MediaReference::LocalFile { mime_type, .. } => mime_type,
        }
    }

    pub fn file_name(&self) -> &str {
        match self {
            MediaReference::InlineBytes { .. } => "inline",
            MediaReference::FileHandle { file_name, .. }
            | MediaReference::RawBytesForUpload { file_name, .. }
            | MediaReference::LocalFile { file_name, .. } => file_name,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestOptions {
    pub model: Option<String>,
    pub media: Option<MediaReference>,
    pub prefer_direct_transport: bool,
}

impl RequestOptions {
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_media(mut self, media: MediaReference) -> Self {
        self.media = Some(media);
        self
    }

    pub fn prefer_direct(mut self) -> Self {
        self.prefer_direct_transport = true;
        self
    }
}

/// One immutable orchestrated call.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestSpec {
    pub contents: PromptContent,
    pub config: GenerationConfig,
    pub model: Option<String>,
    pub media: Option<MediaReference>,
    pub prefer_direct_transport: bool,
}

impl RequestSpec {
    pub fn new(contents: PromptContent, config: GenerationConfig, options: RequestOptions) -> Self {
        Self {
            contents,
            config,
            model: options.model,
            media: options.media,
            prefer_direct_transport: options.prefer_direct_transport,
        }
    }
}

/// How attached media reached the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaOutcome {
    None,
    Inline,
    FileHandle,
    DirectUpload,
    ProxyUpload,
    /// Direct upload failed and the in-memory bytes went through the proxy.
    ProxyFallback,
}

#[derive(Debug, Clone)]
pub struct GenerationOutput {
    pub text: String,
    pub raw: serde_json::Value,
    pub model: String,
    pub attempts: u32,
    pub media: MediaOutcome,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UploadState {
    Pending,
    Active,
    Failed,
}

/// Provider-side file produced by the upload state machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadRecord {
    pub name: String,
    pub uri: String,
    pub mime_type: String,
    pub state: UploadState,
}

/// Platform identity headers attached to direct provider calls, matching
/// API-key application restrictions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppIdentity {
    Android {
        package: String,
        cert_sha1: Option<String>,
    },
    Ios {
        bundle_id: String,
    },
}

impl AppIdentity {
    pub fn headers(&self) -> Vec<(&'static str, String)> {
        match self {
            AppIdentity::Android { package, cert_sha1 } => {
                let mut headers = vec![("X-Android-Package", package.clone())];
                if let Some(cert) = cert_sha1 {
                    headers.push(("X-Android-Cert", cert.clone()));
                }
                headers
            }
            AppIdentity::Ios { bundle_id } => {
                vec![("X-Ios-Bundle-Identifier", bundle_id.clone())]
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSettings {
    pub default_model: String,
    pub fallback_model: String,
    pub extra_fallbacks: Vec<String>,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            default_model: DEFAULT_MODEL.to_string(),
            fallback_model: DEFAULT_FALLBACK_MODEL.to_string(),
            extra_fallbacks: parse_model_list(DEFAULT_EXTRA_FALLBACKS),
        }
    }
}

fn parse_model_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(normalize_model)
        .filter(|m| !m.is_empty())
        .collect()
}

// Configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub proxy_url: Option<String>,
    pub proxy_token: Option<String>,
    pub gemini_api_key: Option<String>,
    pub gemini_base_url: String,
    pub models: ModelSettings,
    pub app_identity: Option<AppIdentity>,
}

impl Config {
    pub fn from_env() -> crate::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> crate::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let proxy_url = get("GENAI_PROXY_URL").map(|url| url.trim_end_matches('/').to_string());
        let gemini_api_key = get("GEMINI_API_KEY");
        if proxy_url.is_none() && gemini_api_key.is_none() {
            return Err(Error::Config(
                "Set GENAI_PROXY_URL or GEMINI_API_KEY".to_string(),
            ));
        }

        let app_identity = match (get("GENAI_ANDROID_PACKAGE"), get("GENAI_IOS_BUNDLE_ID")) {
            (Some(_), Some(_)) => {
                return Err(Error::Config(
                    "GENAI_ANDROID_PACKAGE and GENAI_IOS_BUNDLE_ID are mutually exclusive"
                        .to_string(),
                ))
            }
            (Some(package), None) => Some(AppIdentity::Android {
                package,
                cert_sha1: get("GENAI_ANDROID_CERT_SHA1"),
            }),
            (None, Some(bundle_id)) => Some(AppIdentity::Ios { bundle_id }),
            (None, None) => None,
        };

        let models = ModelSettings {
            default_model: get("GENAI_DEFAULT_MODEL")
                .map(|m| normalize_model(&m))
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            fallback_model: get("GENAI_FALLBACK_MODEL")
                .map(|m| normalize_model(&m))
                .unwrap_or_else(|| DEFAULT_FALLBACK_MODEL.to_string()),
            extra_fallbacks: parse_model_list(
                &get("GENAI_EXTRA_FALLBACK_MODELS")
                    .unwrap_or_else(|| DEFAULT_EXTRA_FALLBACKS.to_string()),
            ),
        };

        Ok(Self {
            proxy_url,
            proxy_token: get("GENAI_PROXY_TOKEN"),
            gemini_api_key,
            gemini_base_url: get("GEMINI_BASE_URL")
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_GEMINI_BASE_URL.to_string()),
            models,
            app_identity,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_generation_config_serializes_camel_case_and_skips_unset() {
        let config = GenerationConfig::json(serde_json::json!({"type": "OBJECT"}))
            .with_system_instruction("be terse")
            .with_safety_setting(SafetySetting {
                category: HarmCategory::DangerousContent,
                threshold: HarmBlockThreshold::BlockOnlyHigh,
            });

        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "responseMimeType": "application/json",
                "responseSchema": {"type": "OBJECT"},
                "systemInstruction": "be terse",
                "safetySettings": [{
                    "category": "HARM_CATEGORY_DANGEROUS_CONTENT",
                    "threshold": "BLOCK_ONLY_HIGH"
                }]
            })
        );
    }

    #[test]
    fn test_validate_rejects_schema_without_json_mime() {
        let config = GenerationConfig {
            response_schema: Some(serde_json::json!({"type": "OBJECT"})),
            ..GenerationConfig::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_validate_rejects_non_object_schema_and_bad_temperature() {
        assert!(GenerationConfig::json(serde_json::json!("string"))
            .validate()
            .is_err());
        let config = GenerationConfig {
            temperature: Some(3.5),
            ..GenerationConfig::default()
        };
        assert!(config.validate().is_err());
        assert!(GenerationConfig::default().validate().is_ok());
    }

    #[test]
    fn test_prompt_text_becomes_user_content() {
        let contents = PromptContent::from("hello").into_contents();
        assert_eq!(contents.len(), 1);
        assert_eq!(contents[0].role.as_deref(), Some("user"));
        assert_eq!(contents[0].parts, vec![Part::text("hello")]);
    }

    #[test]
    fn test_config_requires_a_transport() {
        let err = Config::from_lookup(lookup_from(&[])).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_config_defaults() {
        let config = Config::from_lookup(lookup_from(&[(
            "GENAI_PROXY_URL",
            "https://proxy.test/",
        )]))
        .unwrap();

        assert_eq!(config.proxy_url.as_deref(), Some("https://proxy.test"));
        assert_eq!(config.gemini_api_key, None);
        assert_eq!(config.gemini_base_url, DEFAULT_GEMINI_BASE_URL);
        assert_eq!(config.models, ModelSettings::default());
        assert_eq!(config.app_identity, None);
    }

    #[test]
    fn test_config_overrides() {
        let config = Config::from_lookup(lookup_from(&[
            ("GEMINI_API_KEY", "key"),
            ("GENAI_DEFAULT_MODEL", "models/gemini-x"),
            ("GENAI_FALLBACK_MODEL", "gemini-y"),
            ("GENAI_EXTRA_FALLBACK_MODELS", "a, ,b"),
            ("GENAI_ANDROID_PACKAGE", "com.example.app"),
            ("GENAI_ANDROID_CERT_SHA1", "AB:CD"),
        ]))
        .unwrap();

        assert_eq!(config.models.default_model, "gemini-x");
        assert_eq!(config.models.fallback_model, "gemini-y");
        assert_eq!(config.models.extra_fallbacks, vec!["a", "b"]);
        assert_eq!(
            config.app_identity.unwrap().headers(),
            vec![
                ("X-Android-Package", "com.example.app".to_string()),
                ("X-Android-Cert", "AB:CD".to_string())
            ]
        );
    }

    #[test]
    fn test_config_rejects_two_identities() {
        let err = Config::from_lookup(lookup_from(&[
            ("GEMINI_API_KEY", "key"),
            ("GENAI_ANDROID_PACKAGE", "com.example.app"),
            ("GENAI_IOS_BUNDLE_ID", "com.example.app"),
        ]))
        .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
