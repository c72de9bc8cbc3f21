//! Question answering: guard, reserve, retrieve, generate, commit.
//!
//! Steps run strictly in order for one question. The only shared state
//! touched is the tenant's quota row, inside [`UsageGovernor::reserve`].

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use docchat_core::error::{truncate_chars, RagError, Result};
use docchat_core::guard::{GuardVerdict, InjectionGuard, MAX_QUESTION_CHARS};
use docchat_core::models::{FlaggedQuestion, RetrievedPassage, Tenant, TokenUsage};
use docchat_core::retrieval::{self, CorpusMode, RetrievalParams, RetrievalQuery};
use docchat_core::store::Store;

use crate::config::Config;
use crate::embedding::Embedder;
use crate::generation::Generator;
use crate::governor::UsageGovernor;

pub const EMPTY_KNOWLEDGE_BASE_ANSWER: &str =
    "I could not find an answer in the available documents.";

const PREVIEW_CHARS: usize = 200;

/// A passage cited by an answer.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SourceRef {
    pub passage_id: String,
    pub document_id: String,
    pub document_name: String,
    pub preview: String,
}

impl From<&RetrievedPassage> for SourceRef {
    fn from(p: &RetrievedPassage) -> Self {
        Self {
            passage_id: p.passage_id.clone(),
            document_id: p.document_id.clone(),
            document_name: p.document_name.clone(),
            preview: truncate_chars(&p.text, PREVIEW_CHARS),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub text: String,
    pub sources: Vec<SourceRef>,
    pub usage: TokenUsage,
    pub embedding_tokens: i64,
    pub cost_usd: f64,
    pub corpus_mode: &'static str,
}

pub struct AnswerService {
    store: Arc<dyn Store>,
    embedder: Arc<dyn Embedder>,
    generator: Arc<dyn Generator>,
    governor: UsageGovernor,
    guard: InjectionGuard,
    params: RetrievalParams,
}

impl AnswerService {
    pub fn new(
        store: Arc<dyn Store>,
        embedder: Arc<dyn Embedder>,
        generator: Arc<dyn Generator>,
        config: &Config,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            governor: UsageGovernor::new(Arc::clone(&store), config),
            store,
            embedder,
            generator,
            guard: InjectionGuard::new()?,
            params: config.retrieval.params(),
        })
    }

    pub async fn ask(&self, tenant_id: &str, question: &str) -> Result<Answer> {
        let tenant = self
            .store
            .get_tenant(tenant_id)
            .await?
            .ok_or_else(|| RagError::NotFound(format!("tenant {tenant_id}")))?;
        if !tenant.is_available() {
            return Err(RagError::TenantUnavailable(tenant_id.to_string()));
        }

        if let GuardVerdict::Reject { category, reason } = self.guard.check(question) {
            warn!(tenant = tenant_id, %category, "question rejected by injection guard");
            self.store
                .record_flagged_question(&FlaggedQuestion {
                    id: uuid::Uuid::new_v4().to_string(),
                    tenant_id: tenant_id.to_string(),
                    question: truncate_chars(question, MAX_QUESTION_CHARS),
                    reason: category.to_string(),
                    created_at: chrono::Utc::now().timestamp(),
                })
                .await?;
            return Err(RagError::InjectionDetected(reason.to_string()));
        }

        self.governor.reserve(tenant_id).await?;

        match self.answer_reserved(&tenant, question).await {
            Ok(answer) => Ok(answer),
            Err(err) => {
                if self.governor.refunds_on_failure() {
                    if let Err(refund_err) =
                        self.governor.refund(tenant_id, self.governor.estimate()).await
                    {
                        warn!(tenant = tenant_id, error = %refund_err, "quota refund failed");
                    }
                }
                Err(err)
            }
        }
    }

    async fn answer_reserved(&self, tenant: &Tenant, question: &str) -> Result<Answer> {
        let (mode, eligible) =
            retrieval::plan(self.store.as_ref(), &tenant.id, &self.params).await?;

        let mut embedding_tokens = 0;
        let passages = match mode {
            CorpusMode::Small => {
                retrieval::retrieve(
                    self.store.as_ref(),
                    &tenant.id,
                    question,
                    RetrievalQuery::All,
                    &self.params,
                )
                .await?
            }
            CorpusMode::Large => {
                let (vector, tokens) = self
                    .embedder
                    .embed_query(
                        question,
                        tenant.effective_embedding_credential(),
                        &tenant.embedding_model,
                    )
                    .await?;
                embedding_tokens = tokens;
                retrieval::retrieve(
                    self.store.as_ref(),
                    &tenant.id,
                    question,
                    RetrievalQuery::Vector(&vector),
                    &self.params,
                )
                .await?
            }
        };

        let (text, usage) = if passages.is_empty() {
            (EMPTY_KNOWLEDGE_BASE_ANSWER.to_string(), TokenUsage::default())
        } else {
            let generated = self.generator.generate(question, &passages, tenant).await?;
            (generated.text, generated.usage)
        };

        let delta = self
            .governor
            .usage_delta(&tenant.generation_model, &usage, embedding_tokens);
        self.governor.commit(&tenant.id, &delta).await?;

        info!(
            tenant = %tenant.id,
            mode = mode.as_str(),
            eligible,
            passages = passages.len(),
            total_tokens = usage.total,
            "question answered"
        );

        Ok(Answer {
            text,
            sources: passages.iter().map(SourceRef::from).collect(),
            usage,
            embedding_tokens,
            cost_usd: delta.cost_usd,
            corpus_mode: mode.as_str(),
        })
    }
}
