use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{parse_vector, EmbeddingBackend, Embeddings};
use crate::upstream::{send_json, BackendFailure};

/// Local Ollama `/api/embed`. Token usage is always reported as zero.
pub struct OllamaEmbeddings {
    client: reqwest::Client,
    url: String,
    model: String,
}

impl OllamaEmbeddings {
    pub fn new(client: reqwest::Client, base_url: &str, model: String) -> Self {
        Self {
            client,
            url: format!("{}/api/embed", base_url.trim_end_matches('/')),
            model,
        }
    }
}

#[async_trait]
impl EmbeddingBackend for OllamaEmbeddings {
    fn model(&self) -> &str {
        &self.model
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Embeddings, BackendFailure> {
        let body = json!({
            "model": self.model,
            "input": texts,
        });
        let json = send_json(self.client.post(&self.url).json(&body)).await?;
        parse_response(&json)
    }
}

fn parse_response(json: &Value) -> Result<Embeddings, BackendFailure> {
    let embeddings = json
        .get("embeddings")
        .and_then(Value::as_array)
        .ok_or_else(|| {
            BackendFailure::Other("Ollama response missing embeddings array".to_string())
        })?;

    Ok(Embeddings {
        vectors: embeddings
            .iter()
            .map(parse_vector)
            .collect::<Result<Vec<_>, _>>()?,
        tokens: 0,
    })
}

/// Names of the models installed in a local Ollama, from `/api/tags`.
pub async fn list_local_models(base_url: &str, timeout: Duration) -> Result<Vec<String>, BackendFailure> {
    let client = reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| BackendFailure::Other(e.to_string()))?;
    let url = format!("{}/api/tags", base_url.trim_end_matches('/'));
    let json = send_json(client.get(url)).await?;
    Ok(parse_tags(&json))
}

fn parse_tags(json: &Value) -> Vec<String> {
    let mut names: Vec<String> = json
        .get("models")
        .and_then(Value::as_array)
        .map(|models| {
            models
                .iter()
                .filter_map(|m| m.get("name").and_then(Value::as_str))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    names.sort();
    names
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_response_reports_zero_tokens() {
        let json = serde_json::json!({
            "model": "nomic-embed-text",
            "embeddings": [[0.1, 0.2], [0.3, 0.4]],
            "prompt_eval_count": 12
        });
        let out = parse_response(&json).unwrap();
        assert_eq!(out.vectors.len(), 2);
        assert_eq!(out.tokens, 0);
    }

    #[test]
    fn test_parse_tags_sorted() {
        let json = serde_json::json!({
            "models": [
                {"name": "nomic-embed-text:latest", "size": 1},
                {"name": "llama3.2:latest"},
                {"size": 3}
            ]
        });
        assert_eq!(
            parse_tags(&json),
            vec!["llama3.2:latest".to_string(), "nomic-embed-text:latest".to_string()]
        );
        assert!(parse_tags(&serde_json::json!({})).is_empty());
    }
}
