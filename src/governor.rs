//! Usage governor: quota reservation before a question, ledger commit after.
//!
//! `reserve` charges the configured estimate against the tenant's daily and
//! monthly counters inside the store's per-tenant critical section. The
//! critical section never contains a network call. `commit` adds the true
//! usage and cost to the tenant's ledger row for the day.

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use tracing::{info, warn};

use docchat_core::error::{RagError, Result};
use docchat_core::models::{TokenUsage, UsageDelta};
use docchat_core::pricing::PriceTable;
use docchat_core::quota::QuotaSnapshot;
use docchat_core::store::Store;

use crate::config::Config;

/// Calendar day used for quota resets and ledger rows.
pub fn today() -> NaiveDate {
    Utc::now().date_naive()
}

pub struct UsageGovernor {
    store: Arc<dyn Store>,
    prices: PriceTable,
    estimate: i64,
    refund_on_failure: bool,
}

impl UsageGovernor {
    pub fn new(store: Arc<dyn Store>, config: &Config) -> Self {
        Self {
            store,
            prices: config.price_table(),
            estimate: config.quota.estimated_tokens_per_query,
            refund_on_failure: config.quota.refund_on_failure,
        }
    }

    /// Tokens charged up front for one question.
    pub fn estimate(&self) -> i64 {
        self.estimate
    }

    pub fn refunds_on_failure(&self) -> bool {
        self.refund_on_failure
    }

    pub async fn reserve(&self, tenant_id: &str) -> Result<QuotaSnapshot> {
        self.reserve_on(tenant_id, today()).await
    }

    pub async fn reserve_on(&self, tenant_id: &str, day: NaiveDate) -> Result<QuotaSnapshot> {
        match self.store.reserve_quota(tenant_id, self.estimate, day).await {
            Ok(snapshot) => Ok(snapshot),
            Err(err @ RagError::QuotaExceeded { .. }) => {
                warn!(tenant = tenant_id, error = %err, "quota reservation rejected");
                Err(err)
            }
            Err(err) => Err(err),
        }
    }

    /// Price one answered question. Embedding tokens are charged at the
    /// hosted embedding rate; local generation models are free.
    pub fn usage_delta(&self, model: &str, usage: &TokenUsage, embedding_tokens: i64) -> UsageDelta {
        let generation = self.prices.estimate_cost(model, usage.input, usage.output);
        let embedding = if embedding_tokens > 0 {
            self.prices.embedding_cost(embedding_tokens)
        } else {
            0.0
        };
        UsageDelta {
            embedding_tokens,
            input_tokens: usage.input,
            output_tokens: usage.output,
            cost_usd: round_usd(generation + embedding),
        }
    }

    pub async fn commit(&self, tenant_id: &str, delta: &UsageDelta) -> Result<()> {
        self.commit_on(tenant_id, today(), delta).await
    }

    pub async fn commit_on(&self, tenant_id: &str, day: NaiveDate, delta: &UsageDelta) -> Result<()> {
        self.store.record_usage(tenant_id, day, delta).await?;
        info!(
            tenant = tenant_id,
            input_tokens = delta.input_tokens,
            output_tokens = delta.output_tokens,
            embedding_tokens = delta.embedding_tokens,
            cost_usd = delta.cost_usd,
            "usage committed"
        );
        Ok(())
    }

    /// Return the reserved estimate, saturating at zero.
    pub async fn refund(&self, tenant_id: &str, tokens: i64) -> Result<()> {
        self.refund_on(tenant_id, tokens, today()).await
    }

    pub async fn refund_on(&self, tenant_id: &str, tokens: i64, day: NaiveDate) -> Result<()> {
        self.store.refund_quota(tenant_id, tokens, day).await
    }
}

fn round_usd(v: f64) -> f64 {
    (v * 1_000_000.0).round() / 1_000_000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;
    use docchat_core::models::Tenant;
    use docchat_core::store::memory::InMemoryStore;

    fn day(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    async fn governor(config_extra: &str) -> (UsageGovernor, Arc<InMemoryStore>) {
        let config = parse_config(&format!("[db]\npath = \"x\"\n{config_extra}")).unwrap();
        let store = Arc::new(InMemoryStore::new());
        let mut tenant = Tenant::new("t1", "Acme");
        tenant.quota.daily_limit = 4000;
        store.create_tenant(&tenant).await.unwrap();
        (UsageGovernor::new(store.clone(), &config), store)
    }

    #[tokio::test]
    async fn test_reserve_until_daily_limit() {
        let (gov, _store) = governor("").await;
        let d = day("2026-03-01");
        gov.reserve_on("t1", d).await.unwrap();
        let snap = gov.reserve_on("t1", d).await.unwrap();
        assert_eq!(snap.tokens_used_day, 3000);
        let err = gov.reserve_on("t1", d).await.unwrap_err();
        assert!(matches!(err, RagError::QuotaExceeded { limit: 4000, .. }));

        // next day resets the daily counter only
        let snap = gov.reserve_on("t1", day("2026-03-02")).await.unwrap();
        assert_eq!(snap.tokens_used_day, 1500);
        assert_eq!(snap.tokens_used_month, 4500);
    }

    #[tokio::test]
    async fn test_commit_accumulates_ledger() {
        let (gov, store) = governor("").await;
        let d = day("2026-03-01");
        let delta = gov.usage_delta("gpt-4o-mini", &TokenUsage::new(1_000_000, 0), 0);
        assert!((delta.cost_usd - 0.15).abs() < 1e-9);
        gov.commit_on("t1", d, &delta).await.unwrap();
        gov.commit_on("t1", d, &delta).await.unwrap();

        let row = store.usage_for_day("t1", d).await.unwrap().unwrap();
        assert_eq!(row.query_count, 2);
        assert_eq!(row.input_tokens, 2_000_000);
        assert!((row.cost_usd - 0.30).abs() < 1e-9);
    }

    #[test]
    fn test_local_model_and_embedding_costs() {
        let config = parse_config("[db]\npath = \"x\"\n").unwrap();
        let gov = UsageGovernor::new(Arc::new(InMemoryStore::new()), &config);
        let local = gov.usage_delta("ollama:llama3.2", &TokenUsage::new(5000, 500), 0);
        assert_eq!(local.cost_usd, 0.0);

        let with_embedding = gov.usage_delta("ollama:llama3.2", &TokenUsage::new(0, 0), 1_000_000);
        assert!((with_embedding.cost_usd - 0.02).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_refund_returns_estimate() {
        let (gov, store) = governor("[quota]\nrefund_on_failure = true\n").await;
        assert!(gov.refunds_on_failure());
        let d = day("2026-03-01");
        gov.reserve_on("t1", d).await.unwrap();
        gov.refund_on("t1", gov.estimate(), d).await.unwrap();
        let tenant = store.get_tenant("t1").await.unwrap().unwrap();
        assert_eq!(tenant.quota.tokens_used_day, 0);
        assert_eq!(tenant.quota.tokens_used_month, 0);
    }
}
