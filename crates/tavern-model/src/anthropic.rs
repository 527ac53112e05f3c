// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Anthropic Messages API driver.
//!
//! Non-streaming: narrative artifacts are delivered whole to the session
//! hub, so there is nothing to stream to. The worker's deadline bounds the
//! call; HTTP status codes map onto the [`ProviderError`] taxonomy that
//! drives the pipeline's retry policy.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::{AiProvider, Generation, GenerationRequest, ProviderError};

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const API_VERSION: &str = "2023-06-01";

pub struct AnthropicProvider {
    model: String,
    api_key: Option<String>,
    base_url: String,
    max_tokens: u32,
    temperature: f32,
    client: reqwest::Client,
}

impl AnthropicProvider {
    pub fn new(
        model: String,
        api_key: Option<String>,
        base_url: Option<String>,
        max_tokens: u32,
        temperature: f32,
    ) -> Self {
        Self {
            model,
            api_key,
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            max_tokens,
            temperature,
            client: reqwest::Client::new(),
        }
    }

    fn build_body(&self, req: &GenerationRequest) -> Value {
        let mut body = json!({
            "model": self.model,
            "max_tokens": req.max_tokens.unwrap_or(self.max_tokens),
            "temperature": req.temperature.unwrap_or(self.temperature),
            "messages": [
                { "role": "user", "content": req.user_text() }
            ],
        });
        if let Some(system) = &req.system {
            body["system"] = json!(system);
        }
        body
    }
}

#[async_trait]
impl AiProvider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, req: GenerationRequest) -> Result<Generation, ProviderError> {
        let url = format!("{}/v1/messages", self.base_url.trim_end_matches('/'));
        let body = self.build_body(&req);
        debug!(model = %self.model, "anthropic generate");

        let mut http = self
            .client
            .post(&url)
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .json(&body);
        if let Some(key) = &self.api_key {
            http = http.header("x-api-key", key);
        }

        let response = http.send().await.map_err(|e| {
            if e.is_timeout() {
                ProviderError::Canceled
            } else {
                ProviderError::Upstream(format!("request failed: {e}"))
            }
        })?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs);
            return Err(ProviderError::RateLimited { retry_after });
        }
        if status.is_client_error() {
            let detail = error_detail(response).await;
            return Err(ProviderError::BadRequest(format!("{status}: {detail}")));
        }
        if !status.is_success() {
            let detail = error_detail(response).await;
            return Err(ProviderError::Upstream(format!("{status}: {detail}")));
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|e| ProviderError::Upstream(format!("malformed response body: {e}")))?;

        let text = payload["content"]
            .as_array()
            .map(|blocks| {
                blocks
                    .iter()
                    .filter_map(|b| (b["type"] == "text").then(|| b["text"].as_str()).flatten())
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();
        if text.is_empty() {
            return Err(ProviderError::Upstream(
                "response contained no text blocks".to_string(),
            ));
        }

        Ok(Generation {
            text,
            model: payload["model"]
                .as_str()
                .unwrap_or(&self.model)
                .to_string(),
            input_tokens: payload["usage"]["input_tokens"].as_u64().unwrap_or(0) as u32,
            output_tokens: payload["usage"]["output_tokens"].as_u64().unwrap_or(0) as u32,
        })
    }
}

/// Pull the API's error message out of a failure body, best-effort.
async fn error_detail(response: reqwest::Response) -> String {
    match response.json::<Value>().await {
        Ok(v) => v["error"]["message"]
            .as_str()
            .unwrap_or("no detail")
            .to_string(),
        Err(_) => "no detail".to_string(),
    }
}

// ── Unit tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> AnthropicProvider {
        AnthropicProvider::new("claude-sonnet-4-5".into(), None, None, 512, 0.8)
    }

    #[test]
    fn body_includes_model_and_user_message() {
        let body = provider().build_body(&GenerationRequest::new("Name three rival guilds."));
        assert_eq!(body["model"], "claude-sonnet-4-5");
        assert_eq!(body["max_tokens"], 512);
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["messages"][0]["content"], "Name three rival guilds.");
        assert!(body.get("system").is_none());
    }

    #[test]
    fn body_carries_system_prompt_when_set() {
        let req = GenerationRequest::new("Narrate the ambush.")
            .with_system("You are the narrator of a grim fantasy campaign.");
        let body = provider().build_body(&req);
        assert_eq!(
            body["system"],
            "You are the narrator of a grim fantasy campaign."
        );
    }

    #[test]
    fn request_overrides_take_precedence() {
        let mut req = GenerationRequest::new("x");
        req.max_tokens = Some(64);
        req.temperature = Some(0.1);
        let body = provider().build_body(&req);
        assert_eq!(body["max_tokens"], 64);
        // f32 → f64 widening is not exact; compare at f32 precision.
        assert_eq!(body["temperature"].as_f64().unwrap() as f32, 0.1);
    }
}
