//! Generation router: grounded answers from retrieved passages.
//!
//! The tenant's model identifier selects a [`GenerationRoute`]:
//!
//! | Model id | Route | Endpoint |
//! |----------|-------|----------|
//! | `ollama:<m>` | `Local` | `{ollama_url}/v1/chat/completions` |
//! | `claude-*` | `Anthropic` | `{anthropic_url}/messages` |
//! | `gemini-*` | `Gemini` | `{gemini_url}/chat/completions` |
//! | anything else | `OpenAi` | `{openai_url}/chat/completions` |
//!
//! Every route gets the same system instruction (see [`build_system_prompt`]).
//! The local route also restates the grounding rule in the user turn and
//! decodes at temperature 0.

mod anthropic;
mod openai_compat;

pub use anthropic::AnthropicChat;
pub use openai_compat::OpenAiCompatChat;

use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use docchat_core::error::{RagError, Result};
use docchat_core::models::{RetrievedPassage, Tenant, TokenUsage};

use crate::config::GenerationConfig;
use crate::upstream::{normalize_failure, BackendFailure};

pub const DEFAULT_PERSONA: &str = "You are a helpful AI assistant.";

pub const GROUNDING_DIRECTIVE: &str = "STRICT RULE: Base your answers ONLY on information found in the <context> section below. \
When asked for recommendations, comparisons, or opinions, present and summarize the relevant options, specs, and prices from the context instead of giving a personal opinion. \
If a topic is completely absent from the context, say so briefly in the same language the user used. \
Do NOT add any information from your general knowledge. \
Do NOT use your general knowledge to fill gaps.";

pub const CLOSING_REMINDER: &str =
    "Reminder: answer ONLY based on the context above. If the information is not there, say so.";

const LOCAL_USER_PREAMBLE: &str = "IMPORTANT: Use ONLY the information from the context in the system prompt. \
Do NOT use your training knowledge. Do NOT invent numbers, models or facts. \
If the answer is not in the context, say so.";

const PASSAGE_SEPARATOR: &str = "\n\n---\n\n";

const LOCAL_PREFIX: &str = "ollama:";

/// Provider selected by a model identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationRoute {
    Local(String),
    OpenAi(String),
    Anthropic(String),
    Gemini(String),
}

impl GenerationRoute {
    /// Fails with [`RagError::Configuration`] when no model name is given.
    pub fn parse(model_id: &str) -> Result<Self> {
        let model_id = model_id.trim();
        let route = if let Some(model) = model_id.strip_prefix(LOCAL_PREFIX) {
            GenerationRoute::Local(model.trim().to_string())
        } else if model_id.starts_with("claude-") {
            GenerationRoute::Anthropic(model_id.to_string())
        } else if model_id.starts_with("gemini-") {
            GenerationRoute::Gemini(model_id.to_string())
        } else {
            GenerationRoute::OpenAi(model_id.to_string())
        };
        if route.model().is_empty() {
            return Err(RagError::Configuration(format!(
                "unknown generation model '{model_id}'"
            )));
        }
        Ok(route)
    }

    pub fn model(&self) -> &str {
        match self {
            GenerationRoute::Local(m)
            | GenerationRoute::OpenAi(m)
            | GenerationRoute::Anthropic(m)
            | GenerationRoute::Gemini(m) => m,
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self, GenerationRoute::Local(_))
    }
}

/// One chat turn sent to a provider.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatRequest {
    pub system: String,
    pub user: String,
    pub temperature: f32,
    pub max_output_tokens: u32,
}

/// Provider reply with usage already normalized.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatReply {
    pub text: String,
    pub usage: TokenUsage,
}

#[async_trait]
pub trait ChatBackend: Send + Sync {
    fn model(&self) -> &str;

    async fn chat(&self, request: &ChatRequest) -> std::result::Result<ChatReply, BackendFailure>;
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GeneratedAnswer {
    pub text: String,
    pub usage: TokenUsage,
}

/// The capability the answer flow depends on.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(
        &self,
        question: &str,
        passages: &[RetrievedPassage],
        tenant: &Tenant,
    ) -> Result<GeneratedAnswer>;
}

/// `[1] text`, `[2] text`, ... joined by a horizontal rule.
pub fn build_context(passages: &[RetrievedPassage]) -> String {
    passages
        .iter()
        .enumerate()
        .map(|(i, p)| format!("[{}] {}", i + 1, p.text))
        .collect::<Vec<_>>()
        .join(PASSAGE_SEPARATOR)
}

pub fn build_system_prompt(persona: Option<&str>, context: &str) -> String {
    let persona = persona
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .unwrap_or(DEFAULT_PERSONA);
    format!(
        "{persona}\n\n{GROUNDING_DIRECTIVE}\n\n<context>\n{context}\n</context>\n\n{CLOSING_REMINDER}"
    )
}

/// Assemble the request for `route`.
pub fn build_request(
    route: &GenerationRoute,
    question: &str,
    passages: &[RetrievedPassage],
    persona: Option<&str>,
    config: &GenerationConfig,
) -> ChatRequest {
    let system = build_system_prompt(persona, &build_context(passages));
    if route.is_local() {
        ChatRequest {
            system,
            user: format!("{LOCAL_USER_PREAMBLE}\n\nQuestion: {question}"),
            temperature: 0.0,
            max_output_tokens: config.max_output_tokens,
        }
    } else {
        ChatRequest {
            system,
            user: question.to_string(),
            temperature: config.temperature,
            max_output_tokens: config.max_output_tokens,
        }
    }
}

/// Dispatches to the provider backend named by the tenant's model.
pub struct GenerationRouter {
    config: GenerationConfig,
    client: reqwest::Client,
}

impl GenerationRouter {
    pub fn new(config: &GenerationConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            config: config.clone(),
            client,
        })
    }

    fn backend(&self, route: &GenerationRoute, credential: Option<&str>) -> Box<dyn ChatBackend> {
        let key = credential.filter(|k| !k.trim().is_empty()).map(str::to_string);
        match route {
            GenerationRoute::Local(model) => Box::new(OpenAiCompatChat::new(
                self.client.clone(),
                &format!("{}/v1", self.config.ollama_url.trim_end_matches('/')),
                model.clone(),
                None,
                false,
            )),
            GenerationRoute::OpenAi(model) => Box::new(OpenAiCompatChat::new(
                self.client.clone(),
                &self.config.openai_url,
                model.clone(),
                key,
                true,
            )),
            GenerationRoute::Gemini(model) => Box::new(OpenAiCompatChat::new(
                self.client.clone(),
                &self.config.gemini_url,
                model.clone(),
                key,
                true,
            )),
            GenerationRoute::Anthropic(model) => Box::new(AnthropicChat::new(
                self.client.clone(),
                &self.config.anthropic_url,
                model.clone(),
                key,
            )),
        }
    }
}

#[async_trait]
impl Generator for GenerationRouter {
    async fn generate(
        &self,
        question: &str,
        passages: &[RetrievedPassage],
        tenant: &Tenant,
    ) -> Result<GeneratedAnswer> {
        let route = GenerationRoute::parse(&tenant.generation_model)?;
        let request = build_request(
            &route,
            question,
            passages,
            tenant.persona.as_deref(),
            &self.config,
        );
        let backend = self.backend(&route, tenant.generation_credential.as_deref());

        let reply = backend
            .chat(&request)
            .await
            .map_err(|f| normalize_failure(&tenant.generation_model, f))?;

        info!(
            tenant = %tenant.id,
            model = %tenant.generation_model,
            input_tokens = reply.usage.input,
            output_tokens = reply.usage.output,
            "generated answer"
        );
        Ok(GeneratedAnswer {
            text: reply.text,
            usage: reply.usage,
        })
    }
}
