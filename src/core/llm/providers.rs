use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::json;
use tracing::debug;

use crate::config::LlmConfig;
use crate::error::{RepoIntelError, Result};
use super::documenter::{
    DocGenerator, FailureKind, GeneratedArtifact, GenerationError, GenerationRequest,
};
use super::prompt::PromptRenderer;

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Factory function to create the configured generator
pub fn create_generator(config: &LlmConfig) -> Result<Box<dyn DocGenerator>> {
    match config.provider.as_str() {
        "openai" => Ok(Box::new(OpenAiGenerator::new(config)?)),
        _ => Err(RepoIntelError::Config(format!(
            "Unsupported LLM provider: {}",
            config.provider
        ))),
    }
}

/// OpenAI-compatible chat completions generator
pub struct OpenAiGenerator {
    client: reqwest::Client,
    api_key: String,
    endpoint: String,
    model: String,
    renderer: PromptRenderer,
}

impl OpenAiGenerator {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let api_key = config.api_key.clone().ok_or_else(|| {
            RepoIntelError::Config(
                "OpenAI API key not set (llm.api_key or OPENAI_API_KEY)".to_string(),
            )
        })?;
        let base = config
            .base_url
            .as_deref()
            .unwrap_or(OPENAI_BASE_URL)
            .trim_end_matches('/');

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            endpoint: format!("{}/chat/completions", base),
            model: config.model.clone(),
            renderer: PromptRenderer::new()?,
        })
    }
}

#[async_trait]
impl DocGenerator for OpenAiGenerator {
    async fn generate(
        &self,
        request: &GenerationRequest,
    ) -> std::result::Result<GeneratedArtifact, GenerationError> {
        let prompt = self.renderer.render(request).map_err(|e| {
            GenerationError::new(FailureKind::MalformedInput, format!("prompt rendering failed: {}", e))
        })?;

        let mut payload = json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": self.renderer.system_prompt() },
                { "role": "user", "content": prompt }
            ],
        });
        if let Some(max_tokens) = request.style.max_tokens {
            payload["max_tokens"] = json!(max_tokens);
        }
        if let Some(temperature) = request.style.temperature {
            payload["temperature"] = json!(temperature);
        }

        debug!(group = %request.group_id, "Calling {}", self.endpoint);
        let response = self
            .client
            .post(&self.endpoint)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&payload)
            .send()
            .await
            .map_err(classify_transport)?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_retry_after);
            let error_text = response.text().await.unwrap_or_default();
            return Err(classify_status(status, retry_after, &error_text));
        }

        let response_data: serde_json::Value = response.json().await.map_err(|e| {
            GenerationError::new(
                FailureKind::InvalidResponse,
                format!("Failed to parse OpenAI response: {}", e),
            )
        })?;

        let content = response_data["choices"][0]["message"]["content"]
            .as_str()
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| {
                GenerationError::new(
                    FailureKind::InvalidResponse,
                    "response carried no message content",
                )
            })?
            .to_string();

        Ok(GeneratedArtifact {
            content,
            model: response_data["model"]
                .as_str()
                .unwrap_or(&self.model)
                .to_string(),
            tokens_used: response_data["usage"]["total_tokens"].as_u64(),
        })
    }

    fn provider_name(&self) -> &str {
        "OpenAI"
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// Map a non-success HTTP status to a failure kind
pub fn classify_status(
    status: StatusCode,
    retry_after: Option<Duration>,
    body: &str,
) -> GenerationError {
    let kind = match status {
        StatusCode::TOO_MANY_REQUESTS => FailureKind::RateLimited,
        StatusCode::REQUEST_TIMEOUT => FailureKind::Timeout,
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => FailureKind::Authentication,
        s if s.is_server_error() => FailureKind::ServiceUnavailable,
        s if s.is_client_error() => FailureKind::MalformedInput,
        _ => FailureKind::InvalidResponse,
    };

    let snippet: String = body.chars().take(300).collect();
    let error = GenerationError::new(kind, format!("OpenAI API error {}: {}", status, snippet));
    if kind == FailureKind::RateLimited {
        error.with_retry_after(retry_after)
    } else {
        error
    }
}

fn classify_transport(err: reqwest::Error) -> GenerationError {
    let kind = if err.is_timeout() {
        FailureKind::Timeout
    } else if err.is_builder() {
        FailureKind::MalformedInput
    } else {
        FailureKind::Network
    };
    GenerationError::new(kind, format!("OpenAI API request failed: {}", err))
}

/// `Retry-After` in delta-seconds; HTTP-date values are ignored
fn parse_retry_after(value: &str) -> Option<Duration> {
    let seconds: f64 = value.trim().parse().ok()?;
    (seconds.is_finite() && seconds >= 0.0).then(|| Duration::from_secs_f64(seconds))
}
