//! Core data models shared by the store, the pipelines, and the binary.
//!
//! These types represent tenants, documents, passages, and the ephemeral
//! retrieval and usage values that flow through ingestion and answering.

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Default generation model for freshly created tenants.
pub const DEFAULT_GENERATION_MODEL: &str = "ollama:llama3.2";
/// Default embedding selector for freshly created tenants.
pub const DEFAULT_EMBEDDING_SELECTOR: &str = "ollama:nomic-embed-text";
pub const DEFAULT_DAILY_LIMIT: i64 = 50_000;
pub const DEFAULT_MONTHLY_LIMIT: i64 = 1_000_000;

/// A customer account. The core reads every field but only ever writes
/// the quota counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tenant {
    pub id: String,
    pub name: String,
    pub active: bool,
    pub blocked: bool,
    pub generation_model: String,
    pub embedding_model: String,
    pub generation_credential: Option<String>,
    pub embedding_credential: Option<String>,
    pub persona: Option<String>,
    pub quota: QuotaState,
}

impl Tenant {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            active: true,
            blocked: false,
            generation_model: DEFAULT_GENERATION_MODEL.to_string(),
            embedding_model: DEFAULT_EMBEDDING_SELECTOR.to_string(),
            generation_credential: None,
            embedding_credential: None,
            persona: None,
            quota: QuotaState::default(),
        }
    }

    pub fn is_available(&self) -> bool {
        self.active && !self.blocked
    }

    /// Credential used for embeddings: the dedicated one, else the
    /// generation credential.
    pub fn effective_embedding_credential(&self) -> Option<&str> {
        self.embedding_credential
            .as_deref()
            .filter(|k| !k.is_empty())
            .or(self.generation_credential.as_deref())
            .filter(|k| !k.is_empty())
    }
}

/// Per-tenant token counters with their last-reset markers.
///
/// `last_reset_daily` is a calendar date; `last_reset_monthly` is a
/// `YYYY-MM` key so that the same month number in different years never
/// compares equal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaState {
    pub daily_limit: i64,
    pub monthly_limit: i64,
    pub tokens_used_day: i64,
    pub tokens_used_month: i64,
    pub last_reset_daily: Option<NaiveDate>,
    pub last_reset_monthly: Option<String>,
}

impl Default for QuotaState {
    fn default() -> Self {
        Self {
            daily_limit: DEFAULT_DAILY_LIMIT,
            monthly_limit: DEFAULT_MONTHLY_LIMIT,
            tokens_used_day: 0,
            tokens_used_month: 0,
            last_reset_daily: None,
            last_reset_monthly: None,
        }
    }
}

/// Lifecycle of an uploaded document.
///
/// `Pending → Processing → {Done, Error}`; only the ingestion pipeline
/// moves a document out of `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    Pending,
    Processing,
    Done,
    Error,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Pending => "pending",
            DocumentStatus::Processing => "processing",
            DocumentStatus::Done => "done",
            DocumentStatus::Error => "error",
        }
    }
}

impl fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocumentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(DocumentStatus::Pending),
            "processing" => Ok(DocumentStatus::Processing),
            "done" => Ok(DocumentStatus::Done),
            "error" => Ok(DocumentStatus::Error),
            other => Err(format!("unknown document status '{}'", other)),
        }
    }
}

/// An uploaded document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub tenant_id: String,
    pub name: String,
    /// Where the uploaded bytes live on disk.
    pub location: String,
    /// Media type declared at upload time.
    pub media_type: String,
    pub size_bytes: i64,
    pub status: DocumentStatus,
    pub chunk_count: i64,
    pub error_text: Option<String>,
    pub created_at: i64,
}

impl Document {
    /// A fresh `Pending` document with a random id.
    pub fn pending(
        tenant_id: &str,
        name: &str,
        location: &str,
        media_type: &str,
        size_bytes: i64,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            tenant_id: tenant_id.to_string(),
            name: name.to_string(),
            location: location.to_string(),
            media_type: media_type.to_string(),
            size_bytes,
            status: DocumentStatus::Pending,
            chunk_count: 0,
            error_text: None,
            created_at: chrono::Utc::now().timestamp(),
        }
    }
}

/// A stored, immutable slice of a document.
#[derive(Debug, Clone)]
pub struct Passage {
    pub id: String,
    pub tenant_id: String,
    pub document_id: String,
    pub ordinal: i64,
    pub text: String,
    pub token_estimate: i64,
    /// SHA-256 of `text`.
    pub hash: String,
    pub vector: Option<Vec<f32>>,
    pub created_at: i64,
}

/// A passage as listed for retrieval: tenant-scoped, from a `done`
/// document, carrying its vector and parent document name.
#[derive(Debug, Clone)]
pub struct CandidatePassage {
    pub passage_id: String,
    pub document_id: String,
    pub document_name: String,
    pub ordinal: i64,
    pub text: String,
    pub vector: Vec<f32>,
}

/// One entry of a retrieval result. Never persisted.
#[derive(Debug, Clone, Serialize)]
pub struct RetrievedPassage {
    pub passage_id: String,
    pub document_id: String,
    pub document_name: String,
    pub ordinal: i64,
    pub text: String,
    pub score: f32,
}

/// Token usage reported by a generation backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input: i64,
    pub output: i64,
    pub total: i64,
}

impl TokenUsage {
    pub fn new(input: i64, output: i64) -> Self {
        Self {
            input,
            output,
            total: input + output,
        }
    }
}

/// Amounts added to the per-day ledger row by one answered question.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct UsageDelta {
    pub embedding_tokens: i64,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub cost_usd: f64,
}

/// Per-tenant-per-day usage aggregate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UsageLedgerEntry {
    pub tenant_id: String,
    pub day: NaiveDate,
    pub embedding_tokens: i64,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub cost_usd: f64,
    pub query_count: i64,
}

impl UsageLedgerEntry {
    pub fn empty(tenant_id: &str, day: NaiveDate) -> Self {
        Self {
            tenant_id: tenant_id.to_string(),
            day,
            embedding_tokens: 0,
            input_tokens: 0,
            output_tokens: 0,
            cost_usd: 0.0,
            query_count: 0,
        }
    }

    /// Add one answered question's usage.
    pub fn absorb(&mut self, delta: &UsageDelta) {
        self.embedding_tokens += delta.embedding_tokens;
        self.input_tokens += delta.input_tokens;
        self.output_tokens += delta.output_tokens;
        self.cost_usd += delta.cost_usd;
        self.query_count += 1;
    }
}

/// A question rejected by the injection guard, kept for review.
#[derive(Debug, Clone, Serialize)]
pub struct FlaggedQuestion {
    pub id: String,
    pub tenant_id: String,
    pub question: String,
    pub reason: String,
    pub created_at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip_through_str() {
        for status in [
            DocumentStatus::Pending,
            DocumentStatus::Processing,
            DocumentStatus::Done,
            DocumentStatus::Error,
        ] {
            assert_eq!(status.as_str().parse::<DocumentStatus>(), Ok(status));
        }
        assert!("archived".parse::<DocumentStatus>().is_err());
    }

    #[test]
    fn test_embedding_credential_falls_back_to_generation_key() {
        let mut tenant = Tenant::new("t1", "Acme");
        assert_eq!(tenant.effective_embedding_credential(), None);

        tenant.generation_credential = Some("sk-gen".into());
        assert_eq!(tenant.effective_embedding_credential(), Some("sk-gen"));

        tenant.embedding_credential = Some("sk-emb".into());
        assert_eq!(tenant.effective_embedding_credential(), Some("sk-emb"));

        tenant.embedding_credential = Some(String::new());
        assert_eq!(tenant.effective_embedding_credential(), Some("sk-gen"));
    }

    #[test]
    fn test_ledger_absorb_counts_queries() {
        let day = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        let mut entry = UsageLedgerEntry::empty("t1", day);
        let delta = UsageDelta {
            embedding_tokens: 3,
            input_tokens: 100,
            output_tokens: 20,
            cost_usd: 0.5,
        };
        entry.absorb(&delta);
        entry.absorb(&delta);
        assert_eq!(entry.query_count, 2);
        assert_eq!(entry.input_tokens, 200);
        assert_eq!(entry.embedding_tokens, 6);
        assert!((entry.cost_usd - 1.0).abs() < 1e-9);
    }
}
