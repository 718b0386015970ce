//! OpenAI chat-completions client.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::{json, Value};

use nerdsiq_core::prompt::ChatPrompt;
use nerdsiq_core::provider::LanguageModel;

use crate::config::OpenAiConfig;
use crate::embedding::{build_http_client, post_json_with_retry};

pub struct OpenAIChat {
    client: reqwest::Client,
    api_key: String,
    url: String,
    model: String,
    temperature: f32,
    max_retries: u32,
}

impl OpenAIChat {
    pub fn new(config: &OpenAiConfig, api_key: String) -> Result<Self> {
        Ok(Self {
            client: build_http_client(config.timeout_secs)?,
            api_key,
            url: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            model: config.chat_model.clone(),
            temperature: config.temperature,
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl LanguageModel for OpenAIChat {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &ChatPrompt) -> Result<String> {
        let body = json!({
            "model": self.model,
            "temperature": self.temperature,
            "messages": [
                { "role": "system", "content": prompt.system },
                { "role": "user", "content": prompt.user },
            ],
        });
        let payload =
            post_json_with_retry(&self.client, &self.url, &self.api_key, &body, self.max_retries)
                .await?;
        parse_completion(&payload)
    }
}

/// Pull the assistant text out of a chat-completions response.
pub fn parse_completion(payload: &Value) -> Result<String> {
    payload["choices"][0]["message"]["content"]
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| anyhow!("Invalid OpenAI response: missing message content"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_completion() {
        let payload = json!({
            "choices": [{ "message": { "role": "assistant", "content": "Returns are accepted within 30 days." } }]
        });
        assert_eq!(
            parse_completion(&payload).unwrap(),
            "Returns are accepted within 30 days."
        );
        assert!(parse_completion(&json!({ "choices": [] })).is_err());
        assert!(parse_completion(&json!({ "choices": [{ "message": { "content": null } }] })).is_err());
    }
}
