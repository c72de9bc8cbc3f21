//! In-memory [`Store`] implementation for tests.
//!
//! Collections live behind `std::sync::RwLock`. Each tenant record sits
//! behind its own `Mutex`, which serializes quota reservations per tenant
//! without blocking other tenants.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::error::{RagError, Result};
use crate::models::{
    CandidatePassage, Document, DocumentStatus, FlaggedQuestion, Passage, Tenant, UsageDelta,
    UsageLedgerEntry,
};
use crate::quota::{self, QuotaSnapshot};

use super::Store;

/// In-memory store for tests.
pub struct InMemoryStore {
    tenants: RwLock<HashMap<String, Arc<Mutex<Tenant>>>>,
    docs: RwLock<HashMap<String, Document>>,
    passages: RwLock<Vec<Passage>>,
    ledger: RwLock<HashMap<(String, NaiveDate), UsageLedgerEntry>>,
    flagged: RwLock<Vec<FlaggedQuestion>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            tenants: RwLock::new(HashMap::new()),
            docs: RwLock::new(HashMap::new()),
            passages: RwLock::new(Vec::new()),
            ledger: RwLock::new(HashMap::new()),
            flagged: RwLock::new(Vec::new()),
        }
    }

    fn tenant_slot(&self, tenant_id: &str) -> Result<Arc<Mutex<Tenant>>> {
        let tenants = self.tenants.read().map_err(poisoned)?;
        tenants
            .get(tenant_id)
            .cloned()
            .ok_or_else(|| RagError::NotFound(format!("tenant {tenant_id}")))
    }

    fn set_status(
        &self,
        document_id: &str,
        status: DocumentStatus,
        chunk_count: i64,
        error_text: Option<String>,
    ) -> Result<()> {
        let mut docs = self.docs.write().map_err(poisoned)?;
        let doc = docs
            .get_mut(document_id)
            .ok_or_else(|| RagError::NotFound(format!("document {document_id}")))?;
        doc.status = status;
        doc.chunk_count = chunk_count;
        doc.error_text = error_text;
        Ok(())
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned<T>(_: PoisonError<T>) -> RagError {
    RagError::Storage("in-memory store lock poisoned".to_string())
}

#[async_trait]
impl Store for InMemoryStore {
    async fn create_tenant(&self, tenant: &Tenant) -> Result<()> {
        let mut tenants = self.tenants.write().map_err(poisoned)?;
        tenants.insert(tenant.id.clone(), Arc::new(Mutex::new(tenant.clone())));
        Ok(())
    }

    async fn get_tenant(&self, tenant_id: &str) -> Result<Option<Tenant>> {
        let tenants = self.tenants.read().map_err(poisoned)?;
        match tenants.get(tenant_id) {
            Some(slot) => Ok(Some(slot.lock().map_err(poisoned)?.clone())),
            None => Ok(None),
        }
    }

    async fn insert_document(&self, doc: &Document) -> Result<()> {
        let mut docs = self.docs.write().map_err(poisoned)?;
        docs.insert(doc.id.clone(), doc.clone());
        Ok(())
    }

    async fn get_document(&self, tenant_id: &str, document_id: &str) -> Result<Option<Document>> {
        let docs = self.docs.read().map_err(poisoned)?;
        Ok(docs
            .get(document_id)
            .filter(|d| d.tenant_id == tenant_id)
            .cloned())
    }

    async fn load_document(&self, document_id: &str) -> Result<Option<Document>> {
        let docs = self.docs.read().map_err(poisoned)?;
        Ok(docs.get(document_id).cloned())
    }

    async fn list_documents(&self, tenant_id: &str) -> Result<Vec<Document>> {
        let docs = self.docs.read().map_err(poisoned)?;
        let mut out: Vec<Document> = docs
            .values()
            .filter(|d| d.tenant_id == tenant_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(out)
    }

    async fn pending_documents(&self, limit: usize) -> Result<Vec<String>> {
        let docs = self.docs.read().map_err(poisoned)?;
        let mut pending: Vec<&Document> = docs
            .values()
            .filter(|d| d.status == DocumentStatus::Pending)
            .collect();
        pending.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(pending.into_iter().take(limit).map(|d| d.id.clone()).collect())
    }

    async fn claim_document(&self, document_id: &str) -> Result<bool> {
        let mut docs = self.docs.write().map_err(poisoned)?;
        match docs.get_mut(document_id) {
            Some(doc) if doc.status == DocumentStatus::Pending => {
                doc.status = DocumentStatus::Processing;
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(RagError::NotFound(format!("document {document_id}"))),
        }
    }

    async fn insert_passage(&self, passage: &Passage) -> Result<()> {
        let mut passages = self.passages.write().map_err(poisoned)?;
        passages.push(passage.clone());
        Ok(())
    }

    async fn complete_document(&self, document_id: &str, chunk_count: i64) -> Result<()> {
        self.set_status(document_id, DocumentStatus::Done, chunk_count, None)
    }

    async fn fail_document(&self, document_id: &str, error_text: &str) -> Result<()> {
        let chunk_count = {
            let docs = self.docs.read().map_err(poisoned)?;
            docs.get(document_id).map(|d| d.chunk_count).unwrap_or(0)
        };
        self.set_status(
            document_id,
            DocumentStatus::Error,
            chunk_count,
            Some(error_text.to_string()),
        )
    }

    async fn delete_document(
        &self,
        tenant_id: &str,
        document_id: &str,
    ) -> Result<Option<Document>> {
        let removed = {
            let mut docs = self.docs.write().map_err(poisoned)?;
            match docs.get(document_id) {
                Some(d) if d.tenant_id == tenant_id => docs.remove(document_id),
                _ => None,
            }
        };
        if removed.is_some() {
            let mut passages = self.passages.write().map_err(poisoned)?;
            passages.retain(|p| p.document_id != document_id);
        }
        Ok(removed)
    }

    async fn count_passages(&self, document_id: &str) -> Result<i64> {
        let passages = self.passages.read().map_err(poisoned)?;
        Ok(passages
            .iter()
            .filter(|p| p.document_id == document_id)
            .count() as i64)
    }

    async fn count_eligible_passages(&self, tenant_id: &str) -> Result<usize> {
        Ok(self.eligible_passages(tenant_id, None).await?.len())
    }

    async fn eligible_passages(
        &self,
        tenant_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<CandidatePassage>> {
        let docs = self.docs.read().map_err(poisoned)?;
        let passages = self.passages.read().map_err(poisoned)?;

        let mut out: Vec<CandidatePassage> = passages
            .iter()
            .filter(|p| p.tenant_id == tenant_id)
            .filter_map(|p| {
                let doc = docs.get(&p.document_id)?;
                let vector = p.vector.as_ref()?;
                (doc.tenant_id == tenant_id && doc.status == DocumentStatus::Done).then(|| {
                    CandidatePassage {
                        passage_id: p.id.clone(),
                        document_id: p.document_id.clone(),
                        document_name: doc.name.clone(),
                        ordinal: p.ordinal,
                        text: p.text.clone(),
                        vector: vector.clone(),
                    }
                })
            })
            .collect();

        out.sort_by(|a, b| {
            a.document_id
                .cmp(&b.document_id)
                .then(a.ordinal.cmp(&b.ordinal))
        });
        if let Some(limit) = limit {
            out.truncate(limit);
        }
        Ok(out)
    }

    async fn reserve_quota(
        &self,
        tenant_id: &str,
        estimate: i64,
        today: NaiveDate,
    ) -> Result<QuotaSnapshot> {
        let slot = self.tenant_slot(tenant_id)?;
        let mut tenant = slot.lock().map_err(poisoned)?;
        if !tenant.is_available() {
            return Err(RagError::TenantUnavailable(tenant_id.to_string()));
        }
        quota::reserve(&mut tenant.quota, estimate, today)
    }

    async fn refund_quota(&self, tenant_id: &str, tokens: i64, today: NaiveDate) -> Result<()> {
        let slot = self.tenant_slot(tenant_id)?;
        let mut tenant = slot.lock().map_err(poisoned)?;
        quota::refund(&mut tenant.quota, tokens, today);
        Ok(())
    }

    async fn record_usage(
        &self,
        tenant_id: &str,
        day: NaiveDate,
        delta: &UsageDelta,
    ) -> Result<()> {
        let mut ledger = self.ledger.write().map_err(poisoned)?;
        ledger
            .entry((tenant_id.to_string(), day))
            .or_insert_with(|| UsageLedgerEntry::empty(tenant_id, day))
            .absorb(delta);
        Ok(())
    }

    async fn usage_for_day(
        &self,
        tenant_id: &str,
        day: NaiveDate,
    ) -> Result<Option<UsageLedgerEntry>> {
        let ledger = self.ledger.read().map_err(poisoned)?;
        Ok(ledger.get(&(tenant_id.to_string(), day)).cloned())
    }

    async fn record_flagged_question(&self, flagged: &FlaggedQuestion) -> Result<()> {
        let mut all = self.flagged.write().map_err(poisoned)?;
        all.push(flagged.clone());
        Ok(())
    }

    async fn flagged_questions(&self, tenant_id: &str) -> Result<Vec<FlaggedQuestion>> {
        let all = self.flagged.read().map_err(poisoned)?;
        Ok(all
            .iter()
            .filter(|f| f.tenant_id == tenant_id)
            .cloned()
            .collect())
    }
}
