//! SQLite-backed [`Store`] implementation.
//!
//! Quota reservations open a transaction whose first statement is a
//! no-op `UPDATE` of the tenant row. That takes SQLite's write lock
//! before anything is read, so concurrent reservations for any tenant
//! queue on the lock (bounded by the pool's busy timeout) and the
//! read-reset-check-increment sequence can never interleave.

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, SqlitePool, Transaction};

use docchat_core::embedding::{blob_to_vec, vec_to_blob};
use docchat_core::error::{RagError, Result};
use docchat_core::models::{
    CandidatePassage, Document, DocumentStatus, FlaggedQuestion, Passage, QuotaState, Tenant,
    UsageDelta, UsageLedgerEntry,
};
use docchat_core::quota::{self, QuotaSnapshot};
use docchat_core::store::Store;

/// SQLite implementation of the [`Store`] trait.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn set_terminal_status(
        &self,
        document_id: &str,
        status: DocumentStatus,
        chunk_count: Option<i64>,
        error_text: Option<&str>,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE documents
            SET status = ?, chunk_count = COALESCE(?, chunk_count), error_text = ?
            WHERE id = ?
            "#,
        )
        .bind(status.as_str())
        .bind(chunk_count)
        .bind(error_text)
        .bind(document_id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if result.rows_affected() == 0 {
            return Err(RagError::NotFound(format!("document {document_id}")));
        }
        Ok(())
    }
}

fn db_err(e: sqlx::Error) -> RagError {
    RagError::storage(e)
}

fn day_to_text(day: NaiveDate) -> String {
    day.format("%Y-%m-%d").to_string()
}

fn text_to_day(s: Option<String>) -> Option<NaiveDate> {
    s.and_then(|s| NaiveDate::parse_from_str(&s, "%Y-%m-%d").ok())
}

fn row_to_tenant(row: &SqliteRow) -> Result<Tenant> {
    Ok(Tenant {
        id: row.try_get("id").map_err(db_err)?,
        name: row.try_get("name").map_err(db_err)?,
        active: row.try_get("active").map_err(db_err)?,
        blocked: row.try_get("blocked").map_err(db_err)?,
        generation_model: row.try_get("generation_model").map_err(db_err)?,
        embedding_model: row.try_get("embedding_model").map_err(db_err)?,
        generation_credential: row.try_get("generation_credential").map_err(db_err)?,
        embedding_credential: row.try_get("embedding_credential").map_err(db_err)?,
        persona: row.try_get("persona").map_err(db_err)?,
        quota: QuotaState {
            daily_limit: row.try_get("daily_limit").map_err(db_err)?,
            monthly_limit: row.try_get("monthly_limit").map_err(db_err)?,
            tokens_used_day: row.try_get("tokens_used_day").map_err(db_err)?,
            tokens_used_month: row.try_get("tokens_used_month").map_err(db_err)?,
            last_reset_daily: text_to_day(row.try_get("last_reset_daily").map_err(db_err)?),
            last_reset_monthly: row.try_get("last_reset_monthly").map_err(db_err)?,
        },
    })
}

fn row_to_document(row: &SqliteRow) -> Result<Document> {
    let status: String = row.try_get("status").map_err(db_err)?;
    Ok(Document {
        id: row.try_get("id").map_err(db_err)?,
        tenant_id: row.try_get("tenant_id").map_err(db_err)?,
        name: row.try_get("name").map_err(db_err)?,
        location: row.try_get("location").map_err(db_err)?,
        media_type: row.try_get("media_type").map_err(db_err)?,
        size_bytes: row.try_get("size_bytes").map_err(db_err)?,
        status: status.parse().map_err(RagError::Storage)?,
        chunk_count: row.try_get("chunk_count").map_err(db_err)?,
        error_text: row.try_get("error_text").map_err(db_err)?,
        created_at: row.try_get("created_at").map_err(db_err)?,
    })
}

const TENANT_COLUMNS: &str = "id, name, active, blocked, generation_model, embedding_model, \
     generation_credential, embedding_credential, persona, daily_limit, monthly_limit, \
     tokens_used_day, tokens_used_month, last_reset_daily, last_reset_monthly";

const DOCUMENT_COLUMNS: &str =
    "id, tenant_id, name, location, media_type, size_bytes, status, chunk_count, error_text, created_at";

async fn lock_tenant(
    tx: &mut Transaction<'_, Sqlite>,
    tenant_id: &str,
) -> Result<Tenant> {
    // Touch first: the write lock is held from here to commit.
    let touched = sqlx::query("UPDATE tenants SET tokens_used_day = tokens_used_day WHERE id = ?")
        .bind(tenant_id)
        .execute(&mut **tx)
        .await
        .map_err(db_err)?;
    if touched.rows_affected() == 0 {
        return Err(RagError::NotFound(format!("tenant {tenant_id}")));
    }

    let row = sqlx::query(&format!("SELECT {TENANT_COLUMNS} FROM tenants WHERE id = ?"))
        .bind(tenant_id)
        .fetch_one(&mut **tx)
        .await
        .map_err(db_err)?;
    row_to_tenant(&row)
}

async fn write_quota(
    tx: &mut Transaction<'_, Sqlite>,
    tenant_id: &str,
    q: &QuotaState,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE tenants
        SET tokens_used_day = ?, tokens_used_month = ?,
            last_reset_daily = ?, last_reset_monthly = ?
        WHERE id = ?
        "#,
    )
    .bind(q.tokens_used_day)
    .bind(q.tokens_used_month)
    .bind(q.last_reset_daily.map(day_to_text))
    .bind(&q.last_reset_monthly)
    .bind(tenant_id)
    .execute(&mut **tx)
    .await
    .map_err(db_err)?;
    Ok(())
}

#[async_trait]
impl Store for SqliteStore {
    async fn create_tenant(&self, tenant: &Tenant) -> Result<()> {
        let q = &tenant.quota;
        sqlx::query(
            r#"
            INSERT INTO tenants (id, name, active, blocked, generation_model, embedding_model,
                                 generation_credential, embedding_credential, persona,
                                 daily_limit, monthly_limit, tokens_used_day, tokens_used_month,
                                 last_reset_daily, last_reset_monthly)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                active = excluded.active,
                blocked = excluded.blocked,
                generation_model = excluded.generation_model,
                embedding_model = excluded.embedding_model,
                generation_credential = excluded.generation_credential,
                embedding_credential = excluded.embedding_credential,
                persona = excluded.persona,
                daily_limit = excluded.daily_limit,
                monthly_limit = excluded.monthly_limit
            "#,
        )
        .bind(&tenant.id)
        .bind(&tenant.name)
        .bind(tenant.active)
        .bind(tenant.blocked)
        .bind(&tenant.generation_model)
        .bind(&tenant.embedding_model)
        .bind(&tenant.generation_credential)
        .bind(&tenant.embedding_credential)
        .bind(&tenant.persona)
        .bind(q.daily_limit)
        .bind(q.monthly_limit)
        .bind(q.tokens_used_day)
        .bind(q.tokens_used_month)
        .bind(q.last_reset_daily.map(day_to_text))
        .bind(&q.last_reset_monthly)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn get_tenant(&self, tenant_id: &str) -> Result<Option<Tenant>> {
        let row = sqlx::query(&format!("SELECT {TENANT_COLUMNS} FROM tenants WHERE id = ?"))
            .bind(tenant_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.as_ref().map(row_to_tenant).transpose()
    }

    async fn insert_document(&self, doc: &Document) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO documents (id, tenant_id, name, location, media_type, size_bytes,
                                   status, chunk_count, error_text, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&doc.id)
        .bind(&doc.tenant_id)
        .bind(&doc.name)
        .bind(&doc.location)
        .bind(&doc.media_type)
        .bind(doc.size_bytes)
        .bind(doc.status.as_str())
        .bind(doc.chunk_count)
        .bind(&doc.error_text)
        .bind(doc.created_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn get_document(&self, tenant_id: &str, document_id: &str) -> Result<Option<Document>> {
        let row = sqlx::query(&format!(
            "SELECT {DOCUMENT_COLUMNS} FROM documents WHERE id = ? AND tenant_id = ?"
        ))
        .bind(document_id)
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        row.as_ref().map(row_to_document).transpose()
    }

    async fn load_document(&self, document_id: &str) -> Result<Option<Document>> {
        let row = sqlx::query(&format!("SELECT {DOCUMENT_COLUMNS} FROM documents WHERE id = ?"))
            .bind(document_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.as_ref().map(row_to_document).transpose()
    }

    async fn list_documents(&self, tenant_id: &str) -> Result<Vec<Document>> {
        let rows = sqlx::query(&format!(
            "SELECT {DOCUMENT_COLUMNS} FROM documents WHERE tenant_id = ? ORDER BY created_at, id"
        ))
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.iter().map(row_to_document).collect()
    }

    async fn pending_documents(&self, limit: usize) -> Result<Vec<String>> {
        let rows = sqlx::query(
            "SELECT id FROM documents WHERE status = 'pending' ORDER BY created_at, id LIMIT ?",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.iter()
            .map(|r| r.try_get::<String, _>("id").map_err(db_err))
            .collect()
    }

    async fn claim_document(&self, document_id: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE documents SET status = 'processing', error_text = NULL WHERE id = ? AND status = 'pending'",
        )
        .bind(document_id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if result.rows_affected() == 1 {
            return Ok(true);
        }
        match self.load_document(document_id).await? {
            Some(_) => Ok(false),
            None => Err(RagError::NotFound(format!("document {document_id}"))),
        }
    }

    async fn insert_passage(&self, passage: &Passage) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO passages (id, tenant_id, document_id, ordinal, text, token_estimate,
                                  hash, vector, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&passage.id)
        .bind(&passage.tenant_id)
        .bind(&passage.document_id)
        .bind(passage.ordinal)
        .bind(&passage.text)
        .bind(passage.token_estimate)
        .bind(&passage.hash)
        .bind(passage.vector.as_deref().map(vec_to_blob))
        .bind(passage.created_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn complete_document(&self, document_id: &str, chunk_count: i64) -> Result<()> {
        self.set_terminal_status(document_id, DocumentStatus::Done, Some(chunk_count), None)
            .await
    }

    async fn fail_document(&self, document_id: &str, error_text: &str) -> Result<()> {
        self.set_terminal_status(document_id, DocumentStatus::Error, None, Some(error_text))
            .await
    }

    async fn delete_document(
        &self,
        tenant_id: &str,
        document_id: &str,
    ) -> Result<Option<Document>> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let row = sqlx::query(&format!(
            "SELECT {DOCUMENT_COLUMNS} FROM documents WHERE id = ? AND tenant_id = ?"
        ))
        .bind(document_id)
        .bind(tenant_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_err)?;
        let Some(row) = row else {
            return Ok(None);
        };
        let doc = row_to_document(&row)?;

        sqlx::query("DELETE FROM passages WHERE document_id = ?")
            .bind(document_id)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        sqlx::query("DELETE FROM documents WHERE id = ? AND tenant_id = ?")
            .bind(document_id)
            .bind(tenant_id)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;
        Ok(Some(doc))
    }

    async fn count_passages(&self, document_id: &str) -> Result<i64> {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM passages WHERE document_id = ?")
            .bind(document_id)
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)
    }

    async fn count_eligible_passages(&self, tenant_id: &str) -> Result<usize> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM passages p
            JOIN documents d ON d.id = p.document_id
            WHERE p.tenant_id = ? AND d.tenant_id = ?
              AND p.vector IS NOT NULL
              AND d.status = 'done'
            "#,
        )
        .bind(tenant_id)
        .bind(tenant_id)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(count.max(0) as usize)
    }

    async fn eligible_passages(
        &self,
        tenant_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<CandidatePassage>> {
        // SQLite treats a negative LIMIT as unbounded.
        let limit = limit.map(|l| l as i64).unwrap_or(-1);
        let rows = sqlx::query(
            r#"
            SELECT p.id, p.document_id, d.name AS document_name, p.ordinal, p.text, p.vector
            FROM passages p
            JOIN documents d ON d.id = p.document_id
            WHERE p.tenant_id = ? AND d.tenant_id = ?
              AND p.vector IS NOT NULL
              AND d.status = 'done'
            ORDER BY p.document_id, p.ordinal
            LIMIT ?
            "#,
        )
        .bind(tenant_id)
        .bind(tenant_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.iter()
            .map(|row| -> Result<CandidatePassage> {
                let blob: Vec<u8> = row.try_get("vector").map_err(db_err)?;
                Ok(CandidatePassage {
                    passage_id: row.try_get("id").map_err(db_err)?,
                    document_id: row.try_get("document_id").map_err(db_err)?,
                    document_name: row.try_get("document_name").map_err(db_err)?,
                    ordinal: row.try_get("ordinal").map_err(db_err)?,
                    text: row.try_get("text").map_err(db_err)?,
                    vector: blob_to_vec(&blob),
                })
            })
            .collect()
    }

    async fn reserve_quota(
        &self,
        tenant_id: &str,
        estimate: i64,
        today: NaiveDate,
    ) -> Result<QuotaSnapshot> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        let mut tenant = lock_tenant(&mut tx, tenant_id).await?;

        if !tenant.is_available() {
            tx.rollback().await.map_err(db_err)?;
            return Err(RagError::TenantUnavailable(tenant_id.to_string()));
        }

        let outcome = quota::reserve(&mut tenant.quota, estimate, today);
        // Resets are persisted even when the limit check fails.
        write_quota(&mut tx, tenant_id, &tenant.quota).await?;
        tx.commit().await.map_err(db_err)?;
        outcome
    }

    async fn refund_quota(&self, tenant_id: &str, tokens: i64, today: NaiveDate) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        let mut tenant = lock_tenant(&mut tx, tenant_id).await?;
        quota::refund(&mut tenant.quota, tokens, today);
        write_quota(&mut tx, tenant_id, &tenant.quota).await?;
        tx.commit().await.map_err(db_err)?;
        Ok(())
    }

    async fn record_usage(
        &self,
        tenant_id: &str,
        day: NaiveDate,
        delta: &UsageDelta,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO usage_ledger (tenant_id, day, embedding_tokens, input_tokens,
                                      output_tokens, cost_usd, query_count, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, 1, ?)
            ON CONFLICT(tenant_id, day) DO UPDATE SET
                embedding_tokens = embedding_tokens + excluded.embedding_tokens,
                input_tokens = input_tokens + excluded.input_tokens,
                output_tokens = output_tokens + excluded.output_tokens,
                cost_usd = cost_usd + excluded.cost_usd,
                query_count = query_count + 1,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(tenant_id)
        .bind(day_to_text(day))
        .bind(delta.embedding_tokens)
        .bind(delta.input_tokens)
        .bind(delta.output_tokens)
        .bind(delta.cost_usd)
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn usage_for_day(
        &self,
        tenant_id: &str,
        day: NaiveDate,
    ) -> Result<Option<UsageLedgerEntry>> {
        let row = sqlx::query(
            r#"
            SELECT embedding_tokens, input_tokens, output_tokens, cost_usd, query_count
            FROM usage_ledger WHERE tenant_id = ? AND day = ?
            "#,
        )
        .bind(tenant_id)
        .bind(day_to_text(day))
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.map(|row| -> Result<UsageLedgerEntry> {
            Ok(UsageLedgerEntry {
                tenant_id: tenant_id.to_string(),
                day,
                embedding_tokens: row.try_get("embedding_tokens").map_err(db_err)?,
                input_tokens: row.try_get("input_tokens").map_err(db_err)?,
                output_tokens: row.try_get("output_tokens").map_err(db_err)?,
                cost_usd: row.try_get("cost_usd").map_err(db_err)?,
                query_count: row.try_get("query_count").map_err(db_err)?,
            })
        })
        .transpose()
    }

    async fn record_flagged_question(&self, flagged: &FlaggedQuestion) -> Result<()> {
        sqlx::query(
            "INSERT INTO flagged_questions (id, tenant_id, question, reason, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&flagged.id)
        .bind(&flagged.tenant_id)
        .bind(&flagged.question)
        .bind(&flagged.reason)
        .bind(flagged.created_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn flagged_questions(&self, tenant_id: &str) -> Result<Vec<FlaggedQuestion>> {
        let rows = sqlx::query(
            "SELECT id, tenant_id, question, reason, created_at FROM flagged_questions WHERE tenant_id = ? ORDER BY created_at, id",
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.iter()
            .map(|row| -> Result<FlaggedQuestion> {
                Ok(FlaggedQuestion {
                    id: row.try_get("id").map_err(db_err)?,
                    tenant_id: row.try_get("tenant_id").map_err(db_err)?,
                    question: row.try_get("question").map_err(db_err)?,
                    reason: row.try_get("reason").map_err(db_err)?,
                    created_at: row.try_get("created_at").map_err(db_err)?,
                })
            })
            .collect()
    }
}
