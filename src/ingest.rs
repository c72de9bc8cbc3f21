//! Ingestion pipeline: one uploaded document to stored passages.
//!
//! ```text
//! pending ──claim──▶ processing ──extract ▸ chunk ▸ embed ▸ insert──▶ done
//!                        │
//!                        └──────────── any failure ──────────────────▶ error
//! ```
//!
//! Passages are inserted one at a time. A failure after some inserts
//! leaves those passages in place and marks the document `error`; the
//! document is never retried here.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use docchat_core::chunk::chunk_document;
use docchat_core::error::{truncate_chars, RagError, Result};
use docchat_core::models::{Document, Passage};
use docchat_core::store::Store;

use crate::config::Config;
use crate::embedding::Embedder;
use crate::extract;

/// Longest diagnostic stored on a failed document.
pub const MAX_ERROR_TEXT: usize = 500;

pub const NO_TEXT_MESSAGE: &str = "No text content found in document";
pub const NO_CHUNKS_MESSAGE: &str = "Failed to create chunks";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    Done { chunks: usize },
    Failed { error: String },
    /// The document was not `pending`, so another worker owns it.
    Skipped,
}

/// Totals for one `ingest_pending` run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestSummary {
    pub done: usize,
    pub failed: usize,
    pub skipped: usize,
    pub chunks: usize,
}

impl IngestSummary {
    fn add(&mut self, outcome: &IngestOutcome) {
        match outcome {
            IngestOutcome::Done { chunks } => {
                self.done += 1;
                self.chunks += chunks;
            }
            IngestOutcome::Failed { .. } => self.failed += 1,
            IngestOutcome::Skipped => self.skipped += 1,
        }
    }
}

/// Claim and process one document.
///
/// Returns `Err` only when the document does not exist or the store
/// cannot record the failure; pipeline failures, including a failed
/// `done` write, are reported as [`IngestOutcome::Failed`] after the
/// document is marked `error`.
pub async fn ingest_document(
    store: &dyn Store,
    embedder: &dyn Embedder,
    config: &Config,
    document_id: &str,
) -> Result<IngestOutcome> {
    let doc = store
        .load_document(document_id)
        .await?
        .ok_or_else(|| RagError::NotFound(format!("document {document_id}")))?;

    if !store.claim_document(document_id).await? {
        info!(document = document_id, status = %doc.status, "document not pending, skipping");
        return Ok(IngestOutcome::Skipped);
    }
    info!(document = document_id, tenant = %doc.tenant_id, name = %doc.name, "processing document");

    match process(store, embedder, config, &doc).await {
        Ok(chunks) => {
            info!(document = document_id, chunks, "document done");
            Ok(IngestOutcome::Done { chunks })
        }
        Err(err) => {
            let message = truncate_chars(&err.to_string(), MAX_ERROR_TEXT);
            store.fail_document(document_id, &message).await?;
            warn!(document = document_id, error = %message, "document failed");
            Ok(IngestOutcome::Failed { error: message })
        }
    }
}

async fn process(
    store: &dyn Store,
    embedder: &dyn Embedder,
    config: &Config,
    doc: &Document,
) -> Result<usize> {
    let tenant = store
        .get_tenant(&doc.tenant_id)
        .await?
        .ok_or_else(|| RagError::NotFound(format!("tenant {}", doc.tenant_id)))?;

    let path = PathBuf::from(&doc.location);
    let media_type = doc.media_type.clone();
    let text = tokio::task::spawn_blocking(move || extract::extract(&path, &media_type))
        .await
        .map_err(|e| RagError::ExtractionFailure(format!("extractor aborted: {e}")))??;

    if text.trim().is_empty() {
        return Err(RagError::ExtractionFailure(NO_TEXT_MESSAGE.to_string()));
    }

    let drafts = chunk_document(&text, config.chunking.size, config.chunking.overlap);
    if drafts.is_empty() {
        return Err(RagError::ExtractionFailure(NO_CHUNKS_MESSAGE.to_string()));
    }

    let texts: Vec<String> = drafts.iter().map(|d| d.text.clone()).collect();
    let embeddings = embedder
        .embed(
            &texts,
            tenant.effective_embedding_credential(),
            &tenant.embedding_model,
        )
        .await?;

    if embeddings.vectors.len() != drafts.len() {
        return Err(RagError::generation(format!(
            "embedder returned {} vectors for {} chunks",
            embeddings.vectors.len(),
            drafts.len()
        )));
    }

    let now = chrono::Utc::now().timestamp();
    let count = drafts.len();
    for (draft, vector) in drafts.into_iter().zip(embeddings.vectors) {
        let passage = Passage {
            id: uuid::Uuid::new_v4().to_string(),
            tenant_id: doc.tenant_id.clone(),
            document_id: doc.id.clone(),
            ordinal: draft.ordinal,
            text: draft.text,
            token_estimate: draft.token_estimate,
            hash: draft.hash,
            vector: Some(vector),
            created_at: now,
        };
        store.insert_passage(&passage).await?;
    }

    store.complete_document(&doc.id, count as i64).await?;
    Ok(count)
}

/// Process up to `limit` pending documents, at most `concurrency` at a time.
///
/// Each document is its own task with its own store handle; one failure
/// does not affect the others.
pub async fn ingest_pending(
    store: Arc<dyn Store>,
    embedder: Arc<dyn Embedder>,
    config: Arc<Config>,
    limit: usize,
    concurrency: usize,
) -> Result<IngestSummary> {
    let ids = store.pending_documents(limit).await?;
    let mut summary = IngestSummary::default();
    if ids.is_empty() {
        return Ok(summary);
    }
    info!(documents = ids.len(), concurrency, "ingesting pending documents");

    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
    let mut tasks = JoinSet::new();

    for id in ids {
        let semaphore = Arc::clone(&semaphore);
        let store = Arc::clone(&store);
        let embedder = Arc::clone(&embedder);
        let config = Arc::clone(&config);
        tasks.spawn(async move {
            let _permit = semaphore
                .acquire_owned()
                .await
                .map_err(|e| RagError::storage(format!("ingest scheduler closed: {e}")))?;
            ingest_document(store.as_ref(), embedder.as_ref(), &config, &id).await
        });
    }

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Ok(outcome)) => summary.add(&outcome),
            Ok(Err(err)) => {
                error!(error = %err, "ingestion task failed");
                summary.failed += 1;
            }
            Err(err) => {
                error!(error = %err, "ingestion task panicked");
                summary.failed += 1;
            }
        }
    }

    info!(
        done = summary.done,
        failed = summary.failed,
        skipped = summary.skipped,
        chunks = summary.chunks,
        "ingestion finished"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;
    use crate::embedding::Embeddings;
    use async_trait::async_trait;
    use docchat_core::models::{DocumentStatus, Tenant};
    use docchat_core::store::memory::InMemoryStore;
    use std::io::Write;
    use std::sync::Mutex;

    struct FakeEmbedder {
        dims: usize,
        fail: bool,
        drop_last: bool,
        seen: Mutex<Vec<(Option<String>, String)>>,
    }

    impl FakeEmbedder {
        fn new(fail: bool) -> Self {
            Self {
                dims: 4,
                fail,
                drop_last: false,
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Embedder for FakeEmbedder {
        async fn embed(
            &self,
            texts: &[String],
            credential: Option<&str>,
            selector: &str,
        ) -> Result<Embeddings> {
            self.seen
                .lock()
                .unwrap()
                .push((credential.map(str::to_string), selector.to_string()));
            if self.fail {
                return Err(RagError::UpstreamUnavailable("ollama down".into()));
            }
            let mut vectors: Vec<Vec<f32>> = texts.iter().map(|_| vec![1.0; self.dims]).collect();
            if self.drop_last {
                vectors.pop();
            }
            Ok(Embeddings { vectors, tokens: 0 })
        }
    }

    fn config() -> Config {
        parse_config("[db]\npath = \"x\"\n[chunking]\nsize = 60\noverlap = 10\n").unwrap()
    }

    async fn setup(contents: &[u8], ext: &str) -> (InMemoryStore, Document, tempfile::NamedTempFile) {
        let mut file = tempfile::Builder::new().suffix(ext).tempfile().unwrap();
        file.write_all(contents).unwrap();

        let store = InMemoryStore::new();
        let mut tenant = Tenant::new("t1", "Acme");
        tenant.generation_credential = Some("sk-gen".into());
        store.create_tenant(&tenant).await.unwrap();

        let media = crate::extract::DocumentFormat::media_type_for(file.path()).unwrap_or("application/octet-stream");
        let doc = Document::pending(
            "t1",
            "upload",
            &file.path().display().to_string(),
            media,
            contents.len() as i64,
        );
        store.insert_document(&doc).await.unwrap();
        (store, doc, file)
    }

    #[tokio::test]
    async fn test_text_document_reaches_done() {
        let body = "First paragraph about opening hours.\n\nSecond paragraph about prices and returns policy.\n\nThird one.";
        let (store, doc, _file) = setup(body.as_bytes(), ".txt").await;
        let embedder = FakeEmbedder::new(false);

        let outcome = ingest_document(&store, &embedder, &config(), &doc.id).await.unwrap();
        let IngestOutcome::Done { chunks } = outcome else {
            panic!("unexpected outcome: {outcome:?}");
        };
        assert!(chunks >= 2);

        let stored = store.load_document(&doc.id).await.unwrap().unwrap();
        assert_eq!(stored.status, DocumentStatus::Done);
        assert_eq!(stored.chunk_count, chunks as i64);
        assert_eq!(store.count_passages(&doc.id).await.unwrap(), chunks as i64);

        // embedding credential falls back to the generation credential
        let seen = embedder.seen.lock().unwrap();
        assert_eq!(seen[0].0.as_deref(), Some("sk-gen"));
    }

    #[tokio::test]
    async fn test_second_claim_is_skipped() {
        let (store, doc, _file) = setup(b"hello world", ".txt").await;
        let embedder = FakeEmbedder::new(false);
        ingest_document(&store, &embedder, &config(), &doc.id).await.unwrap();
        let again = ingest_document(&store, &embedder, &config(), &doc.id).await.unwrap();
        assert_eq!(again, IngestOutcome::Skipped);
    }

    #[tokio::test]
    async fn test_blank_document_fails_with_no_text() {
        let (store, doc, _file) = setup(b"   \n\n  ", ".txt").await;
        let outcome = ingest_document(&store, &FakeEmbedder::new(false), &config(), &doc.id)
            .await
            .unwrap();
        let IngestOutcome::Failed { error } = outcome else {
            panic!("expected failure");
        };
        assert!(error.contains(NO_TEXT_MESSAGE));

        let stored = store.load_document(&doc.id).await.unwrap().unwrap();
        assert_eq!(stored.status, DocumentStatus::Error);
        assert_eq!(stored.chunk_count, 0);
        assert_eq!(store.count_passages(&doc.id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_corrupt_pdf_fails_without_passages() {
        let (store, doc, _file) = setup(b"%PDF-1.4 this is not really a pdf", ".pdf").await;
        let outcome = ingest_document(&store, &FakeEmbedder::new(false), &config(), &doc.id)
            .await
            .unwrap();
        assert!(matches!(outcome, IngestOutcome::Failed { .. }));
        let stored = store.load_document(&doc.id).await.unwrap().unwrap();
        assert_eq!(stored.status, DocumentStatus::Error);
        assert_eq!(stored.chunk_count, 0);
        assert!(stored.error_text.is_some());
        assert_eq!(store.count_passages(&doc.id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_embedding_failure_marks_error() {
        let (store, doc, _file) = setup(b"some useful text", ".txt").await;
        let outcome = ingest_document(&store, &FakeEmbedder::new(true), &config(), &doc.id)
            .await
            .unwrap();
        let IngestOutcome::Failed { error } = outcome else {
            panic!("expected failure");
        };
        assert!(error.contains("ollama down"));
        assert!(error.chars().count() <= MAX_ERROR_TEXT);
    }

    #[tokio::test]
    async fn test_unknown_document_is_not_found() {
        let store = InMemoryStore::new();
        let err = ingest_document(&store, &FakeEmbedder::new(false), &config(), "missing")
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_short_embedding_response_marks_error() {
        let body = "First paragraph about opening hours.\n\nSecond paragraph about prices and returns policy.\n\nThird one.";
        let (store, doc, _file) = setup(body.as_bytes(), ".txt").await;
        let mut embedder = FakeEmbedder::new(false);
        embedder.drop_last = true;

        let outcome = ingest_document(&store, &embedder, &config(), &doc.id).await.unwrap();
        let IngestOutcome::Failed { error } = outcome else {
            panic!("expected failure, got {outcome:?}");
        };
        assert!(error.contains("vectors for"));

        let stored = store.load_document(&doc.id).await.unwrap().unwrap();
        assert_eq!(stored.status, DocumentStatus::Error);
        assert_eq!(stored.chunk_count, 0);
        assert_eq!(store.count_passages(&doc.id).await.unwrap(), 0);
    }
}
