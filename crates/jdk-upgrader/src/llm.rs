//! OpenAI-compatible chat-completions client.

use async_trait::async_trait;
use buildfix::{LlmClient, LlmError};
use reqwest::header;
use serde::{Deserialize, Serialize};

use crate::config::EndpointConfig;

const SYSTEM_PROMPT: &str = "You are a senior JVM engineer migrating Java, Kotlin and Groovy projects to a newer JDK. \
You make the smallest correct change and answer exactly in the requested format.";

#[derive(Serialize)]
struct ChatRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<&'a str>,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessageOut,
}

#[derive(Deserialize)]
struct ChatMessageOut {
    #[serde(default)]
    content: Option<String>,
}

pub struct ChatClient {
    http: reqwest::Client,
    endpoint: EndpointConfig,
}

impl ChatClient {
    pub fn new(endpoint: EndpointConfig) -> Result<Self, LlmError> {
        let http = reqwest::Client::builder()
            .timeout(endpoint.request_timeout)
            .build()
            .map_err(|e| LlmError::Request(e.to_string()))?;
        Ok(Self { http, endpoint })
    }

    pub fn endpoint(&self) -> &EndpointConfig {
        &self.endpoint
    }

    fn request_body<'a>(&'a self, prompt: &'a str) -> ChatRequest<'a> {
        ChatRequest {
            // Azure takes the deployment from the URL.
            model: (!self.endpoint.is_azure()).then_some(self.endpoint.model.as_str()),
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
            temperature: self.endpoint.temperature,
        }
    }
}

#[async_trait]
impl LlmClient for ChatClient {
    async fn complete(&self, prompt: &str) -> Result<Option<String>, LlmError> {
        let url = self.endpoint.completions_url();
        let mut request = self
            .http
            .post(&url)
            .header(header::CONTENT_TYPE, "application/json")
            .json(&self.request_body(prompt));
        if let Some(key) = &self.endpoint.api_key {
            request = if self.endpoint.is_azure() {
                request.header("api-key", key)
            } else {
                request.header(header::AUTHORIZATION, format!("Bearer {key}"))
            };
        }

        tracing::debug!(%url, model = %self.endpoint.model, bytes = prompt.len(), "Sending chat completion");
        let response = request
            .send()
            .await
            .map_err(|e| LlmError::Request(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| LlmError::Request(e.to_string()))?;
        if !status.is_success() {
            return Err(LlmError::Status {
                status: status.as_u16(),
                body: truncate(&body, 500),
            });
        }
        parse_content(&body)
    }
}

/// Assistant text from a chat-completions body; `None` when empty.
pub fn parse_content(body: &str) -> Result<Option<String>, LlmError> {
    let parsed: ChatResponse =
        serde_json::from_str(body).map_err(|e| LlmError::Malformed(e.to_string()))?;
    Ok(parsed
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .filter(|c| !c.trim().is_empty()))
}

fn truncate(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_content() {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":"hello"}}]}"#;
        assert_eq!(parse_content(body).unwrap().as_deref(), Some("hello"));
    }

    #[test]
    fn test_parse_empty_and_null_content() {
        assert_eq!(parse_content(r#"{"choices":[]}"#).unwrap(), None);
        let null = r#"{"choices":[{"message":{"content":null}}]}"#;
        assert_eq!(parse_content(null).unwrap(), None);
        let blank = r#"{"choices":[{"message":{"content":"  "}}]}"#;
        assert_eq!(parse_content(blank).unwrap(), None);
    }

    #[test]
    fn test_parse_malformed() {
        assert!(matches!(parse_content("<html>"), Err(LlmError::Malformed(_))));
    }

    #[test]
    fn test_request_body_omits_model_for_azure() {
        let mut endpoint = EndpointConfig::from_lookup(|_| None);
        let client = ChatClient::new(endpoint.clone()).unwrap();
        let body = serde_json::to_value(client.request_body("fix it")).unwrap();
        assert_eq!(body["model"], "gpt-4o-mini");
        assert_eq!(body["messages"][1]["content"], "fix it");

        endpoint.azure_api_version = Some("2025-04-01-preview".into());
        let client = ChatClient::new(endpoint).unwrap();
        let body = serde_json::to_value(client.request_body("fix it")).unwrap();
        assert!(body.get("model").is_none());
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("abcdef", 3), "abc...");
        assert_eq!(truncate("ab", 3), "ab");
    }
}
