//! Generation capability: the language model that composes answers.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptMessage {
    pub role: PromptRole,
    pub content: String,
}

impl PromptMessage {
    pub fn new(role: PromptRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// A single generation request: an ordered chat transcript.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationRequest {
    pub messages: Vec<PromptMessage>,
}

impl GenerationRequest {
    /// The transcript flattened into one prompt string, for completion-style
    /// backends and logging.
    pub fn render(&self) -> String {
        self.messages
            .iter()
            .map(|m| {
                let label = match m.role {
                    PromptRole::System => "System",
                    PromptRole::User => "Human",
                    PromptRole::Assistant => "Assistant",
                };
                format!("{}: {}", label, m.content)
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

/// Sampling options forwarded to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplingParams {
    pub temperature: f32,
    /// Context window in tokens.
    pub num_ctx: u32,
    pub top_k: u32,
    pub top_p: f32,
    pub stop: Vec<String>,
    pub seed: Option<i64>,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            temperature: 0.0,
            num_ctx: 4096,
            top_k: 10,
            top_p: 0.9,
            stop: vec!["\nHuman:".to_string(), "\nAssistant:".to_string()],
            seed: Some(42),
        }
    }
}

#[async_trait]
pub trait Generator: Send + Sync {
    fn model_name(&self) -> &str;

    async fn generate(&self, request: &GenerationRequest, params: &SamplingParams) -> Result<String>;

    /// Whether the backend is reachable and serves this model.
    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}
