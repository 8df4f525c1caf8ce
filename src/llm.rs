//! Analyst-model client: a thin `reqwest`-based chat-completion wrapper
//! configured from the environment, reused here by the Classifier and the
//! Scenario Engine's two call sites (parse + narrative).

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::models::Config;

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessageOut,
}

#[derive(Debug, Deserialize)]
struct ChatMessageOut {
    content: String,
}

#[derive(Clone)]
pub struct AnalystClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
}

impl AnalystClient {
    pub fn from_config(config: &Config) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: config
                .analyst_model_endpoint
                .clone()
                .unwrap_or_else(|| "https://api.openai.com/v1/chat/completions".to_string()),
            api_key: config.analyst_model_api_key.clone(),
            model: config.analyst_model_name.clone(),
        }
    }

    /// Sends a system + user prompt pair and returns the raw text content.
    /// Callers apply the three-strategy JSON fallback themselves since each
    /// call site expects a different object shape.
    pub async fn complete(&self, system_prompt: &str, user_content: &str) -> Result<String> {
        let request = ChatCompletionRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: system_prompt.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: user_content.to_string(),
                },
            ],
            temperature: 0.2,
            max_tokens: 1500,
        };

        let mut req = self.http.post(&self.endpoint).json(&request);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let response = req.send().await.context("sending analyst-model request")?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("analyst model returned {status}: {body}");
        }

        let parsed: ChatCompletionResponse = response
            .json()
            .await
            .context("decoding analyst-model response envelope")?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .unwrap_or_default();
        Ok(content)
    }
}

/// Three-strategy JSON extraction: (i) raw parse, (ii) strip code-fence
/// wrappers, (iii) substring from the first `{` to the last `}` (spec
/// §4.4, reused verbatim by the Scenario Engine per §4.5).
pub fn extract_json<T: serde::de::DeserializeOwned>(text: &str) -> Option<T> {
    if let Ok(v) = serde_json::from_str::<T>(text) {
        return Some(v);
    }

    let stripped = strip_code_fence(text);
    if stripped != text {
        if let Ok(v) = serde_json::from_str::<T>(&stripped) {
            return Some(v);
        }
    }

    if let (Some(start), Some(end)) = (text.find('{'), text.rfind('}')) {
        if end > start {
            if let Ok(v) = serde_json::from_str::<T>(&text[start..=end]) {
                return Some(v);
            }
        }
    }

    None
}

fn strip_code_fence(text: &str) -> String {
    let trimmed = text.trim();
    if let Some(rest) = trimmed.strip_prefix("```") {
        let rest = rest
            .strip_prefix("json")
            .or_else(|| rest.strip_prefix("JSON"))
            .unwrap_or(rest);
        let rest = rest.strip_suffix("```").unwrap_or(rest);
        rest.trim().to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Sample {
        a: u32,
    }

    #[test]
    fn raw_parse_succeeds() {
        let parsed: Sample = extract_json(r#"{"a": 1}"#).unwrap();
        assert_eq!(parsed, Sample { a: 1 });
    }

    #[test]
    fn strips_code_fence_wrapper() {
        let text = "```json\n{\"a\": 2}\n```";
        let parsed: Sample = extract_json(text).unwrap();
        assert_eq!(parsed, Sample { a: 2 });
    }

    #[test]
    fn extracts_substring_with_surrounding_prose() {
        let text = "Sure, here you go: {\"a\": 3} -- hope that helps!";
        let parsed: Sample = extract_json(text).unwrap();
        assert_eq!(parsed, Sample { a: 3 });
    }

    #[test]
    fn returns_none_when_all_strategies_fail() {
        let parsed: Option<Sample> = extract_json("not json at all");
        assert!(parsed.is_none());
    }
}
