//! OpenAI-compatible chat-completions generator

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use super::{build_user_prompt, AnswerGenerator, SYSTEM_PROMPT};
use crate::embedding::ApiEndpoint;

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Answer generator backed by `/chat/completions`
pub struct OpenAIGenerator {
    http: Client,
    endpoint: ApiEndpoint,
    model: String,
}

impl OpenAIGenerator {
    pub fn new(endpoint: ApiEndpoint, model: impl Into<String>) -> Result<Self> {
        Ok(Self {
            http: endpoint.client()?,
            endpoint,
            model: model.into(),
        })
    }

    fn request_body(&self, question: &str, context: &[String]) -> serde_json::Value {
        serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": SYSTEM_PROMPT},
                {"role": "user", "content": build_user_prompt(question, context)},
            ],
        })
    }
}

#[async_trait]
impl AnswerGenerator for OpenAIGenerator {
    async fn generate(&self, question: &str, context: &[String]) -> Result<String> {
        let response = self
            .http
            .post(self.endpoint.url("chat/completions"))
            .header("Authorization", format!("Bearer {}", self.endpoint.api_key))
            .json(&self.request_body(question, context))
            .send()
            .await
            .context("Chat completion request failed")?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            anyhow::bail!("Chat completion API returned {}: {}", status, text);
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .context("Failed to parse chat completion response")?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .context("Chat completion response has no content")
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
