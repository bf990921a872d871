//! LLM client.
//!
//! One operation: `generate(prompt) -> String`. The Gemini backend posts
//! to the `generateContent` endpoint with a fixed low temperature so
//! answers stay grounded in the supplied context. Retry policy is the
//! orchestrator's concern; this client reports each failure exactly once.

use async_trait::async_trait;
use serde_json::Value;

use crate::config::LlmConfig;
use crate::error::{PilotError, Result};

const GEMINI_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String>;
}

pub struct GeminiClient {
    client: reqwest::Client,
    model: String,
    api_key: String,
}

impl GeminiClient {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env).map_err(|_| {
            PilotError::Auth(format!(
                "{} environment variable not set",
                config.api_key_env
            ))
        })?;
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            model: config.model.clone(),
            api_key,
        })
    }
}

#[async_trait]
impl LlmClient for GeminiClient {
    async fn generate(&self, prompt: &str) -> Result<String> {
        let url = format!(
            "{GEMINI_BASE}/models/{}:generateContent?key={}",
            self.model, self.api_key
        );

        let body = serde_json::json!({
            "contents": [{"parts": [{"text": prompt}]}],
            "generationConfig": {"temperature": 0.3}
        });

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| PilotError::LlmUnavailable(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(match status.as_u16() {
                401 | 403 => PilotError::Auth(format!("LLM rejected credentials: {text}")),
                code => PilotError::LlmUnavailable(format!("LLM error {code}: {text}")),
            });
        }

        let json: Value = response
            .json()
            .await
            .map_err(|e| PilotError::LlmUnavailable(format!("invalid response: {e}")))?;
        parse_generate_response(&json)
    }
}

fn parse_generate_response(json: &Value) -> Result<String> {
    let parts = json
        .get("candidates")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("content"))
        .and_then(|c| c.get("parts"))
        .and_then(|p| p.as_array())
        .ok_or_else(|| {
            PilotError::LlmUnavailable("response contained no candidates".to_string())
        })?;

    let text: String = parts
        .iter()
        .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
        .collect::<Vec<_>>()
        .join("");

    if text.trim().is_empty() {
        return Err(PilotError::LlmUnavailable(
            "response contained no text".to_string(),
        ));
    }
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_candidate_text() {
        let json = serde_json::json!({
            "candidates": [{
                "content": {"parts": [{"text": "Your next meeting "}, {"text": "is Tuesday."}]}
            }]
        });
        assert_eq!(
            parse_generate_response(&json).unwrap(),
            "Your next meeting is Tuesday."
        );
    }

    #[test]
    fn empty_candidates_is_unavailable() {
        let json = serde_json::json!({"candidates": []});
        assert!(matches!(
            parse_generate_response(&json).unwrap_err(),
            PilotError::LlmUnavailable(_)
        ));
    }

    #[test]
    fn blank_text_is_unavailable() {
        let json = serde_json::json!({
            "candidates": [{"content": {"parts": [{"text": "   "}]}}]
        });
        assert!(matches!(
            parse_generate_response(&json).unwrap_err(),
            PilotError::LlmUnavailable(_)
        ));
    }
}
