use async_trait::async_trait;
use serde_json::{json, Value};

use docchat_core::models::TokenUsage;

use super::{ChatBackend, ChatReply, ChatRequest};
use crate::upstream::{send_json, BackendFailure};

/// `/chat/completions` client for OpenAI, Gemini's OpenAI-compatible
/// endpoint and Ollama's `/v1` endpoint.
pub struct OpenAiCompatChat {
    client: reqwest::Client,
    url: String,
    model: String,
    api_key: Option<String>,
    requires_key: bool,
}

impl OpenAiCompatChat {
    pub fn new(
        client: reqwest::Client,
        base_url: &str,
        model: String,
        api_key: Option<String>,
        requires_key: bool,
    ) -> Self {
        Self {
            client,
            url: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            model,
            api_key,
            requires_key,
        }
    }

    fn request_body(&self, request: &ChatRequest) -> Value {
        json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": request.system},
                {"role": "user", "content": request.user},
            ],
            "temperature": request.temperature,
            "max_tokens": request.max_output_tokens,
        })
    }
}

#[async_trait]
impl ChatBackend for OpenAiCompatChat {
    fn model(&self) -> &str {
        &self.model
    }

    async fn chat(&self, request: &ChatRequest) -> Result<ChatReply, BackendFailure> {
        let mut builder = self.client.post(&self.url).json(&self.request_body(request));
        match &self.api_key {
            Some(key) => builder = builder.bearer_auth(key),
            None if self.requires_key => {
                return Err(BackendFailure::MissingCredential("API key".to_string()))
            }
            None => {}
        }
        let json = send_json(builder).await?;
        Ok(parse_response(&json))
    }
}

/// First choice's content; usage from `prompt_tokens` / `completion_tokens`,
/// zeros when the provider omits it.
fn parse_response(json: &Value) -> ChatReply {
    let text = json
        .pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let usage = match json.get("usage").filter(|u| u.is_object()) {
        Some(u) => {
            let input = u.get("prompt_tokens").and_then(Value::as_i64).unwrap_or(0);
            let output = u.get("completion_tokens").and_then(Value::as_i64).unwrap_or(0);
            let total = u
                .get("total_tokens")
                .and_then(Value::as_i64)
                .unwrap_or(input + output);
            TokenUsage {
                input,
                output,
                total,
            }
        }
        None => TokenUsage::default(),
    };

    ChatReply { text, usage }
}
