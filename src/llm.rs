//! Ollama chat generator.
//!
//! Sends the whole transcript to `POST {url}/api/chat` with `stream: false`
//! and returns `message.content`. A single attempt per call: timeouts and
//! retries belong to the orchestrator, which wraps this in
//! [`crate::deadline::DeadlineGenerator`].
//!
//! The health check lists the local models with `GET {url}/api/tags` and
//! fails when the configured model is not among them.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::time::Duration;

use rag_support_core::generation::{GenerationRequest, Generator, SamplingParams};

use crate::config::LlmConfig;

pub struct OllamaGenerator {
    client: reqwest::Client,
    model: String,
    url: String,
}

impl OllamaGenerator {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            model: config.model.clone(),
            url: config.url.trim_end_matches('/').to_string(),
        })
    }
}

fn chat_body(model: &str, request: &GenerationRequest, params: &SamplingParams) -> serde_json::Value {
    let mut options = serde_json::json!({
        "temperature": params.temperature,
        "num_ctx": params.num_ctx,
        "top_k": params.top_k,
        "top_p": params.top_p,
        "stop": params.stop,
    });
    if let Some(seed) = params.seed {
        options["seed"] = serde_json::json!(seed);
    }
    serde_json::json!({
        "model": model,
        "messages": request.messages,
        "stream": false,
        "options": options,
    })
}

fn parse_chat_response(json: &serde_json::Value) -> Result<String> {
    json.get("message")
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .map(|s| s.trim().to_string())
        .ok_or_else(|| anyhow::anyhow!("Invalid Ollama response: missing message.content"))
}

/// Ollama reports untagged models as `name:latest`.
fn model_listed(json: &serde_json::Value, model: &str) -> bool {
    json.get("models")
        .and_then(|m| m.as_array())
        .map(|models| {
            models.iter().filter_map(|m| m.get("name")?.as_str()).any(|name| {
                name == model || name.strip_suffix(":latest") == Some(model)
            })
        })
        .unwrap_or(false)
}

#[async_trait]
impl Generator for OllamaGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: &GenerationRequest, params: &SamplingParams) -> Result<String> {
        let endpoint = format!("{}/api/chat", self.url);
        let response = self
            .client
            .post(&endpoint)
            .json(&chat_body(&self.model, request, params))
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("Ollama connection error ({}): {}", endpoint, e))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            bail!("Ollama API error {}: {}", status, body_text);
        }

        let json: serde_json::Value = response.json().await?;
        let text = parse_chat_response(&json)?;
        tracing::debug!(model = %self.model, chars = text.len(), "generation complete");
        Ok(text)
    }

    async fn health_check(&self) -> Result<()> {
        let endpoint = format!("{}/api/tags", self.url);
        let response = self
            .client
            .get(&endpoint)
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("Ollama unreachable ({}): {}", endpoint, e))?;
        if !response.status().is_success() {
            bail!("Ollama API error {}", response.status());
        }
        let json: serde_json::Value = response.json().await?;
        if !model_listed(&json, &self.model) {
            bail!("model {} is not available in Ollama", self.model);
        }
        Ok(())
    }
}
