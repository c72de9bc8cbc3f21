use async_trait::async_trait;
use serde_json::{json, Value};

use docchat_core::models::TokenUsage;

use super::{ChatBackend, ChatReply, ChatRequest};
use crate::upstream::{send_json, BackendFailure};

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Anthropic Messages API.
pub struct AnthropicChat {
    client: reqwest::Client,
    url: String,
    model: String,
    api_key: Option<String>,
}

impl AnthropicChat {
    pub fn new(
        client: reqwest::Client,
        base_url: &str,
        model: String,
        api_key: Option<String>,
    ) -> Self {
        Self {
            client,
            url: format!("{}/messages", base_url.trim_end_matches('/')),
            model,
            api_key,
        }
    }

    fn request_body(&self, request: &ChatRequest) -> Value {
        json!({
            "model": self.model,
            "max_tokens": request.max_output_tokens,
            "system": request.system,
            "messages": [{"role": "user", "content": request.user}],
            "temperature": request.temperature,
        })
    }
}

#[async_trait]
impl ChatBackend for AnthropicChat {
    fn model(&self) -> &str {
        &self.model
    }

    async fn chat(&self, request: &ChatRequest) -> Result<ChatReply, BackendFailure> {
        let key = self
            .api_key
            .as_deref()
            .ok_or_else(|| BackendFailure::MissingCredential("Anthropic API key".to_string()))?;
        let builder = self
            .client
            .post(&self.url)
            .header("x-api-key", key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&self.request_body(request));
        let json = send_json(builder).await?;
        Ok(parse_response(&json))
    }
}

/// Text of the first content block. Anthropic reports no total, so it is
/// input + output.
fn parse_response(json: &Value) -> ChatReply {
    let text = json
        .pointer("/content/0/text")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let input = json
        .pointer("/usage/input_tokens")
        .and_then(Value::as_i64)
        .unwrap_or(0);
    let output = json
        .pointer("/usage/output_tokens")
        .and_then(Value::as_i64)
        .unwrap_or(0);
    ChatReply {
        text,
        usage: TokenUsage::new(input, output),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_body_puts_system_at_top_level() {
        let chat = AnthropicChat::new(
            reqwest::Client::new(),
            "https://api.anthropic.com/v1",
            "claude-3-5-haiku-latest".into(),
            Some("sk-ant-x".into()),
        );
        assert_eq!(chat.url, "https://api.anthropic.com/v1/messages");
        let body = chat.request_body(&ChatRequest {
            system: "sys".into(),
            user: "q".into(),
            temperature: 0.2,
            max_output_tokens: 800,
        });
        assert_eq!(body["system"], "sys");
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_usage_total_is_sum() {
        let json = serde_json::json!({
            "content": [{"type": "text", "text": "Hello"}],
            "usage": {"input_tokens": 300, "output_tokens": 25}
        });
        let reply = parse_response(&json);
        assert_eq!(reply.text, "Hello");
        assert_eq!(reply.usage.total, 325);
    }

    #[tokio::test]
    async fn test_missing_key() {
        let chat = AnthropicChat::new(
            reqwest::Client::new(),
            "http://127.0.0.1:9",
            "claude-3-opus".into(),
            None,
        );
        let err = chat
            .chat(&ChatRequest {
                system: String::new(),
                user: String::new(),
                temperature: 0.2,
                max_output_tokens: 10,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, BackendFailure::MissingCredential(_)));
    }
}
