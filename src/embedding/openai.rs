use async_trait::async_trait;
use serde_json::{json, Value};

use super::{parse_vector, EmbeddingBackend, Embeddings};
use crate::upstream::{send_json, BackendFailure};

/// OpenAI `/embeddings` with an explicit `dimensions` parameter, so that
/// vectors match the local model's dimensionality.
pub struct OpenAiEmbeddings {
    client: reqwest::Client,
    url: String,
    model: String,
    api_key: String,
    dims: usize,
}

impl OpenAiEmbeddings {
    pub fn new(
        client: reqwest::Client,
        base_url: &str,
        model: String,
        api_key: String,
        dims: usize,
    ) -> Self {
        Self {
            client,
            url: format!("{}/embeddings", base_url.trim_end_matches('/')),
            model,
            api_key,
            dims,
        }
    }

    fn request_body(&self, texts: &[String]) -> Value {
        json!({
            "model": self.model,
            "input": texts,
            "dimensions": self.dims,
        })
    }
}

#[async_trait]
impl EmbeddingBackend for OpenAiEmbeddings {
    fn model(&self) -> &str {
        &self.model
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Embeddings, BackendFailure> {
        let request = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&self.request_body(texts));
        let json = send_json(request).await?;
        parse_response(&json)
    }
}

/// `data[].embedding`, reordered by `data[].index`, plus `usage.total_tokens`.
fn parse_response(json: &Value) -> Result<Embeddings, BackendFailure> {
    let data = json
        .get("data")
        .and_then(Value::as_array)
        .ok_or_else(|| BackendFailure::Other("OpenAI response missing data array".to_string()))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (pos, item) in data.iter().enumerate() {
        let index = item
            .get("index")
            .and_then(Value::as_u64)
            .map(|i| i as usize)
            .unwrap_or(pos);
        let embedding = item
            .get("embedding")
            .ok_or_else(|| BackendFailure::Other("OpenAI response missing embedding".to_string()))?;
        indexed.push((index, parse_vector(embedding)?));
    }
    indexed.sort_by_key(|(i, _)| *i);

    let tokens = json
        .pointer("/usage/total_tokens")
        .and_then(Value::as_i64)
        .unwrap_or(0);

    Ok(Embeddings {
        vectors: indexed.into_iter().map(|(_, v)| v).collect(),
        tokens,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_carries_dimensions() {
        let backend = OpenAiEmbeddings::new(
            reqwest::Client::new(),
            "https://api.openai.com/v1/",
            "text-embedding-3-small".into(),
            "sk-test".into(),
            768,
        );
        assert_eq!(backend.url, "https://api.openai.com/v1/embeddings");
        let body = backend.request_body(&["a".to_string()]);
        assert_eq!(body["dimensions"], 768);
        assert_eq!(body["input"][0], "a");
    }

    #[test]
    fn test_parse_response_orders_by_index_and_reads_usage() {
        let json = serde_json::json!({
            "data": [
                {"index": 1, "embedding": [0.0, 1.0]},
                {"index": 0, "embedding": [1.0, 0.0]}
            ],
            "usage": {"prompt_tokens": 9, "total_tokens": 9}
        });
        let out = parse_response(&json).unwrap();
        assert_eq!(out.vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
        assert_eq!(out.tokens, 9);
    }

    #[test]
    fn test_parse_response_missing_data() {
        assert!(parse_response(&serde_json::json!({"object": "list"})).is_err());
    }
}
