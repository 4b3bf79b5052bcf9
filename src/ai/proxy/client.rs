//! Transport through the trusted intermediary that holds the real provider
//! credential.
//!
//! `POST <proxy>/generate` with `{model, contents, config, upload?}`; a 2xx
//! reply is the provider's raw `generateContent` response.

use crate::ai::gemini::types::Content;
use crate::ai::{GenerationTransport, ProxyUpload, TransportCall};
use crate::error::UpstreamError;
use crate::models::GenerationConfig;
use crate::resilience::normalize_model;
use crate::{Error, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;

#[derive(Debug, Serialize)]
struct ProxyRequest<'a> {
    model: String,
    contents: &'a [Content],
    config: &'a GenerationConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    upload: Option<&'a ProxyUpload>,
}

pub struct ProxyClient {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl ProxyClient {
    pub fn new(base_url: String) -> Self {
        Self::new_with_client(base_url, Client::new())
    }

    pub fn new_with_client(base_url: String, client: Client) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: None,
        }
    }

    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token;
        self
    }
}

#[async_trait]
impl GenerationTransport for ProxyClient {
    fn name(&self) -> &'static str {
        "proxy"
    }

    async fn generate(&self, call: &TransportCall<'_>) -> Result<serde_json::Value> {
        tracing::debug!(
            "Sending generate request to proxy (model: {}, upload: {})",
            call.model,
            call.upload.is_some()
        );

        let body = ProxyRequest {
            model: normalize_model(call.model),
            contents: call.contents,
            config: call.config,
            upload: call.upload,
        };

        let mut request = self
            .client
            .post(format!("{}/generate", self.base_url))
            .timeout(call.timeout)
            .json(&body);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| {
            tracing::error!("Failed to send request to proxy: {}", e);
            UpstreamError::from_reqwest(&e)
        })?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| UpstreamError::from_reqwest(&e))?;

        if !status.is_success() {
            tracing::error!("Proxy error (status {}): {}", status, text);
            return Err(UpstreamError::from_response(status.as_u16(), &text).into());
        }

        let value: serde_json::Value = serde_json::from_str(&text).map_err(|e| {
            tracing::error!("Failed to parse proxy response: {}\nBody: {}", e, text);
            Error::MalformedResponse(format!("Failed to parse proxy response: {}", e))
        })?;

        // Some proxy deployments relay provider failures inside a 200.
        if value.get("error").is_some() && value.get("candidates").is_none() {
            tracing::error!("Proxy relayed provider error: {}", text);
            return Err(UpstreamError::from_body(None, &text).into());
        }

        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::gemini::test_support;
    use crate::ai::gemini::types::Part;
    use crate::error::ErrorKind;
    use std::time::Duration;
    use wiremock::matchers::{body_json, header};
    use wiremock::{MockServer, ResponseTemplate};

    fn contents() -> Vec<Content> {
        vec![Content {
            role: Some("user".to_string()),
            parts: vec![Part::text("describe this")],
        }]
    }

    async fn call(client: &ProxyClient, upload: Option<&ProxyUpload>) -> Result<serde_json::Value> {
        let contents = contents();
        client
            .generate(&TransportCall {
                model: "gemini-2.5-flash",
                contents: &contents,
                config: &GenerationConfig::default(),
                upload,
                timeout: Duration::from_secs(5),
            })
            .await
    }

    #[tokio::test]
    async fn test_generate_posts_envelope_with_upload() {
        let server = MockServer::start().await;

        test_support::post_path("/generate")
            .and(header("Authorization", "Bearer app-token"))
            .and(body_json(serde_json::json!({
                "model": "gemini-2.5-flash",
                "contents": [{"role": "user", "parts": [{"text": "describe this"}]}],
                "config": {},
                "upload": {"data": "AAEC", "mimeType": "video/mp4", "fileName": "clip.mp4"}
            })))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(test_support::text_response("a clip")),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = ProxyClient::new(format!("{}/", server.uri()))
            .with_token(Some("app-token".to_string()));
        let upload = ProxyUpload {
            data: "AAEC".to_string(),
            mime_type: "video/mp4".to_string(),
            file_name: "clip.mp4".to_string(),
        };

        let raw = call(&client, Some(&upload)).await.unwrap();
        assert_eq!(raw, test_support::text_response("a clip"));
    }

    #[tokio::test]
    async fn test_json_error_body_is_classified() {
        let server = MockServer::start().await;

        test_support::post_path("/generate")
            .respond_with(ResponseTemplate::new(429).set_body_json(serde_json::json!({
                "error": "Rate limit hit, retry in 20s"
            })))
            .mount(&server)
            .await;

        let err = call(&ProxyClient::new(server.uri()), None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Quota);
        assert_eq!(err.retry_after(), Some(Duration::from_secs(20)));
    }

    #[tokio::test]
    async fn test_plain_text_error_body_is_classified() {
        let server = MockServer::start().await;

        test_support::post_path("/generate")
            .respond_with(ResponseTemplate::new(502).set_body_string("Bad Gateway"))
            .mount(&server)
            .await;

        let err = call(&ProxyClient::new(server.uri()), None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ServerTransient);
    }

    #[tokio::test]
    async fn test_error_relayed_inside_success_is_classified() {
        let server = MockServer::start().await;

        test_support::post_path("/generate")
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "error": {"code": 403, "message": "API key not valid", "status": "PERMISSION_DENIED"}
            })))
            .mount(&server)
            .await;

        match call(&ProxyClient::new(server.uri()), None).await.unwrap_err() {
            Error::Upstream(e) => {
                assert_eq!(e.kind, ErrorKind::AccessDenied);
                assert_eq!(e.status, Some(403));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unreachable_proxy_is_network_transient() {
        // Port 9 (discard) on localhost is expected to refuse connections.
        let client = ProxyClient::new("http://127.0.0.1:9".to_string());
        let err = call(&client, None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NetworkTransient);
    }
}
