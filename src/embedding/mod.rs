//! Embedding router: texts in, fixed-dimension vectors out.
//!
//! A tenant's embedding selector resolves to exactly one [`EmbeddingRoute`]:
//!
//! | Selector | Credential | Route |
//! |----------|------------|-------|
//! | `openai` | starts with `sk-` | [`OpenAiEmbeddings`], true token usage |
//! | `openai` | missing or other shape | default local model |
//! | `ollama:<model>` | ignored | [`OllamaEmbeddings`] with `<model>`, zero usage |
//! | anything else | ignored | default local model |
//!
//! Texts are sent in batches of `embedding.batch_size`. One failed batch
//! fails the whole call; nothing is persisted here. Every returned vector
//! is checked against `embedding.dims`.

mod ollama;
mod openai;

pub use ollama::{list_local_models, OllamaEmbeddings};
pub use openai::OpenAiEmbeddings;

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use docchat_core::embedding::ensure_dims;
use docchat_core::error::{RagError, Result};

use crate::config::EmbeddingConfig;
use crate::upstream::{normalize_failure, BackendFailure};

const LOCAL_PREFIX: &str = "ollama:";
const OPENAI_SELECTOR: &str = "openai";
const OPENAI_KEY_PREFIX: &str = "sk-";

/// The backend a selector resolved to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EmbeddingRoute {
    OpenAi { model: String, api_key: String },
    Local { model: String },
}

impl EmbeddingRoute {
    /// Resolve `selector` and `credential`. Never fails: anything not
    /// usable falls back to the configured default local model.
    pub fn resolve(selector: &str, credential: Option<&str>, config: &EmbeddingConfig) -> Self {
        let selector = selector.trim();
        if selector == OPENAI_SELECTOR {
            match credential {
                Some(key) if key.starts_with(OPENAI_KEY_PREFIX) => {
                    return EmbeddingRoute::OpenAi {
                        model: config.openai_model.clone(),
                        api_key: key.to_string(),
                    };
                }
                _ => warn!("openai embeddings selected without a valid key, using local model"),
            }
        } else if let Some(model) = selector.strip_prefix(LOCAL_PREFIX) {
            if !model.trim().is_empty() {
                return EmbeddingRoute::Local {
                    model: model.trim().to_string(),
                };
            }
        } else {
            warn!(selector, "unknown embedding selector, using local model");
        }
        EmbeddingRoute::Local {
            model: config.default_local_model.clone(),
        }
    }

    pub fn model(&self) -> &str {
        match self {
            EmbeddingRoute::OpenAi { model, .. } | EmbeddingRoute::Local { model } => model,
        }
    }
}

/// Vectors for one request, in input order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Embeddings {
    pub vectors: Vec<Vec<f32>>,
    /// Tokens billed by the provider; zero for local models.
    pub tokens: i64,
}

/// One provider's embedding endpoint.
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    fn model(&self) -> &str;

    async fn embed_batch(&self, texts: &[String]) -> std::result::Result<Embeddings, BackendFailure>;
}

/// The capability the ingestion pipeline and the answer flow depend on.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(
        &self,
        texts: &[String],
        credential: Option<&str>,
        selector: &str,
    ) -> Result<Embeddings>;

    /// Embed a single text.
    async fn embed_query(
        &self,
        text: &str,
        credential: Option<&str>,
        selector: &str,
    ) -> Result<(Vec<f32>, i64)> {
        let mut out = self.embed(&[text.to_string()], credential, selector).await?;
        match out.vectors.pop() {
            Some(v) => Ok((v, out.tokens)),
            None => Err(RagError::generation("embedding backend returned no vector")),
        }
    }
}

/// Routes embedding requests to OpenAI or Ollama over HTTP.
pub struct EmbeddingRouter {
    config: EmbeddingConfig,
    client: reqwest::Client,
}

impl EmbeddingRouter {
    pub fn new(config: &EmbeddingConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            config: config.clone(),
            client,
        })
    }

    fn backend(&self, route: EmbeddingRoute) -> Box<dyn EmbeddingBackend> {
        match route {
            EmbeddingRoute::OpenAi { model, api_key } => Box::new(OpenAiEmbeddings::new(
                self.client.clone(),
                &self.config.openai_url,
                model,
                api_key,
                self.config.dims,
            )),
            EmbeddingRoute::Local { model } => Box::new(OllamaEmbeddings::new(
                self.client.clone(),
                &self.config.ollama_url,
                model,
            )),
        }
    }
}

#[async_trait]
impl Embedder for EmbeddingRouter {
    async fn embed(
        &self,
        texts: &[String],
        credential: Option<&str>,
        selector: &str,
    ) -> Result<Embeddings> {
        let route = EmbeddingRoute::resolve(selector, credential, &self.config);
        let backend = self.backend(route);
        embed_in_batches(backend.as_ref(), texts, self.config.batch_size, self.config.dims).await
    }
}

/// Send `texts` through `backend` in batches of `batch_size`, checking
/// counts and dimensions.
pub async fn embed_in_batches(
    backend: &dyn EmbeddingBackend,
    texts: &[String],
    batch_size: usize,
    dims: usize,
) -> Result<Embeddings> {
    let mut out = Embeddings {
        vectors: Vec::with_capacity(texts.len()),
        tokens: 0,
    };

    for batch in texts.chunks(batch_size.max(1)) {
        let result = backend
            .embed_batch(batch)
            .await
            .map_err(|f| normalize_failure(backend.model(), f))?;

        if result.vectors.len() != batch.len() {
            return Err(RagError::generation(format!(
                "embedding backend returned {} vectors for {} texts",
                result.vectors.len(),
                batch.len()
            )));
        }
        ensure_dims(&result.vectors, dims)?;

        out.tokens += result.tokens;
        out.vectors.extend(result.vectors);
    }

    debug!(
        model = backend.model(),
        texts = texts.len(),
        tokens = out.tokens,
        "embedded"
    );
    Ok(out)
}

/// Parse a JSON array of numbers into a vector.
fn parse_vector(value: &serde_json::Value) -> std::result::Result<Vec<f32>, BackendFailure> {
    value
        .as_array()
        .ok_or_else(|| BackendFailure::Other("embedding is not an array".to_string()))?
        .iter()
        .map(|v| {
            v.as_f64()
                .map(|f| f as f32)
                .ok_or_else(|| BackendFailure::Other("embedding contains a non-number".to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn config() -> EmbeddingConfig {
        EmbeddingConfig::default()
    }

    #[test]
    fn test_route_openai_requires_key_shape() {
        let cfg = config();
        assert_eq!(
            EmbeddingRoute::resolve("openai", Some("sk-abc"), &cfg),
            EmbeddingRoute::OpenAi {
                model: "text-embedding-3-small".into(),
                api_key: "sk-abc".into()
            }
        );
        assert_eq!(
            EmbeddingRoute::resolve("openai", Some("AIza-google"), &cfg),
            EmbeddingRoute::Local {
                model: "nomic-embed-text".into()
            }
        );
        assert_eq!(
            EmbeddingRoute::resolve("openai", None, &cfg),
            EmbeddingRoute::Local {
                model: "nomic-embed-text".into()
            }
        );
    }

    #[test]
    fn test_route_local_and_unknown() {
        let cfg = config();
        assert_eq!(
            EmbeddingRoute::resolve("ollama:mxbai-embed-large", Some("sk-x"), &cfg),
            EmbeddingRoute::Local {
                model: "mxbai-embed-large".into()
            }
        );
        assert_eq!(
            EmbeddingRoute::resolve("cohere-v3", Some("sk-x"), &cfg).model(),
            "nomic-embed-text"
        );
        assert_eq!(EmbeddingRoute::resolve("ollama:", None, &cfg).model(), "nomic-embed-text");
    }

    struct CountingBackend {
        dims: usize,
        calls: Mutex<Vec<usize>>,
        fail_on_call: Option<usize>,
    }

    #[async_trait]
    impl EmbeddingBackend for CountingBackend {
        fn model(&self) -> &str {
            "fake"
        }

        async fn embed_batch(
            &self,
            texts: &[String],
        ) -> std::result::Result<Embeddings, BackendFailure> {
            let call = {
                let mut calls = self.calls.lock().unwrap();
                calls.push(texts.len());
                calls.len()
            };
            if self.fail_on_call == Some(call) {
                return Err(BackendFailure::Unreachable("connection refused".into()));
            }
            Ok(Embeddings {
                vectors: texts.iter().map(|_| vec![0.5; self.dims]).collect(),
                tokens: texts.len() as i64 * 3,
            })
        }
    }

    fn texts(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("text {i}")).collect()
    }

    #[tokio::test]
    async fn test_batches_and_sums_tokens() {
        let backend = CountingBackend {
            dims: 4,
            calls: Mutex::new(Vec::new()),
            fail_on_call: None,
        };
        let out = embed_in_batches(&backend, &texts(250), 100, 4).await.unwrap();
        assert_eq!(out.vectors.len(), 250);
        assert_eq!(out.tokens, 750);
        assert_eq!(*backend.calls.lock().unwrap(), vec![100, 100, 50]);
    }

    #[tokio::test]
    async fn test_one_failed_batch_aborts_call() {
        let backend = CountingBackend {
            dims: 4,
            calls: Mutex::new(Vec::new()),
            fail_on_call: Some(2),
        };
        let err = embed_in_batches(&backend, &texts(250), 100, 4).await.unwrap_err();
        assert!(matches!(err, RagError::UpstreamUnavailable(_)));
        assert_eq!(backend.calls.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_dimension_mismatch_rejected() {
        let backend = CountingBackend {
            dims: 3,
            calls: Mutex::new(Vec::new()),
            fail_on_call: None,
        };
        let err = embed_in_batches(&backend, &texts(2), 100, 768).await.unwrap_err();
        assert!(matches!(
            err,
            RagError::DimensionMismatch {
                expected: 768,
                actual: 3
            }
        ));
    }

    #[test]
    fn test_parse_vector_rejects_garbage() {
        assert_eq!(parse_vector(&serde_json::json!([1, 2.5])).unwrap(), vec![1.0, 2.5]);
        assert!(parse_vector(&serde_json::json!({"a": 1})).is_err());
        assert!(parse_vector(&serde_json::json!([1, "x"])).is_err());
    }
}
