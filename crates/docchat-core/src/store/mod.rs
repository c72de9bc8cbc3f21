//! Storage abstraction for docchat.
//!
//! The [`Store`] trait covers every read and write the ingestion pipeline,
//! the retrieval engine and the usage governor perform. Every query that
//! touches tenant data takes the tenant id, so a caller cannot reach
//! another tenant's documents or passages by construction.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::error::Result;
use crate::models::{
    CandidatePassage, Document, FlaggedQuestion, Passage, Tenant, UsageDelta, UsageLedgerEntry,
};
use crate::quota::QuotaSnapshot;

/// Abstract storage backend.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`claim_document`](Store::claim_document) | Atomic `pending → processing` transition |
/// | [`insert_passage`](Store::insert_passage) | Individually atomic passage insert |
/// | [`complete_document`](Store::complete_document) / [`fail_document`](Store::fail_document) | Terminal transitions |
/// | [`eligible_passages`](Store::eligible_passages) | Tenant-scoped passages of `done` documents with vectors |
/// | [`reserve_quota`](Store::reserve_quota) | Locked reset-check-increment |
/// | [`record_usage`](Store::record_usage) | Additive per-day ledger upsert |
#[async_trait]
pub trait Store: Send + Sync {
    async fn create_tenant(&self, tenant: &Tenant) -> Result<()>;

    async fn get_tenant(&self, tenant_id: &str) -> Result<Option<Tenant>>;

    async fn insert_document(&self, doc: &Document) -> Result<()>;

    /// Tenant-scoped document lookup.
    async fn get_document(&self, tenant_id: &str, document_id: &str) -> Result<Option<Document>>;

    /// Unscoped lookup used by the ingestion worker, which is handed
    /// bare document ids.
    async fn load_document(&self, document_id: &str) -> Result<Option<Document>>;

    async fn list_documents(&self, tenant_id: &str) -> Result<Vec<Document>>;

    /// Ids of `pending` documents, oldest first.
    async fn pending_documents(&self, limit: usize) -> Result<Vec<String>>;

    /// Move a `pending` document to `processing`.
    ///
    /// Returns `false` when the document was not pending, so that two
    /// workers never process the same document.
    async fn claim_document(&self, document_id: &str) -> Result<bool>;

    async fn insert_passage(&self, passage: &Passage) -> Result<()>;

    async fn complete_document(&self, document_id: &str, chunk_count: i64) -> Result<()>;

    async fn fail_document(&self, document_id: &str, error_text: &str) -> Result<()>;

    /// Delete a document and its passages. Returns the removed document.
    async fn delete_document(&self, tenant_id: &str, document_id: &str)
        -> Result<Option<Document>>;

    async fn count_passages(&self, document_id: &str) -> Result<i64>;

    /// Number of passages eligible for retrieval for this tenant.
    async fn count_eligible_passages(&self, tenant_id: &str) -> Result<usize>;

    /// Eligible passages ordered by document id then ordinal, optionally
    /// capped at `limit` rows.
    async fn eligible_passages(
        &self,
        tenant_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<CandidatePassage>>;

    /// Lazy-reset, check and increment the tenant's counters under an
    /// exclusive per-tenant lock.
    async fn reserve_quota(
        &self,
        tenant_id: &str,
        estimate: i64,
        today: NaiveDate,
    ) -> Result<QuotaSnapshot>;

    async fn refund_quota(&self, tenant_id: &str, tokens: i64, today: NaiveDate) -> Result<()>;

    /// Add `delta` and one query to the tenant's ledger row for `day`.
    async fn record_usage(&self, tenant_id: &str, day: NaiveDate, delta: &UsageDelta)
        -> Result<()>;

    async fn usage_for_day(&self, tenant_id: &str, day: NaiveDate)
        -> Result<Option<UsageLedgerEntry>>;

    async fn record_flagged_question(&self, flagged: &FlaggedQuestion) -> Result<()>;

    async fn flagged_questions(&self, tenant_id: &str) -> Result<Vec<FlaggedQuestion>>;
}
