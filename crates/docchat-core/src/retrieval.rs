//! Tenant-scoped passage retrieval.
//!
//! Two modes, chosen from the number of eligible passages:
//!
//! | Mode | When | Result |
//! |------|------|--------|
//! | [`CorpusMode::Small`] | count ≤ `small_corpus_threshold` | every passage, document then ordinal order, score `1.0` |
//! | [`CorpusMode::Large`] | otherwise | cosine top-K with a per-document cap, then keyword supplement |
//!
//! # Large-mode ranking
//!
//! 1. Score every eligible passage against the query vector.
//! 2. Group by document and keep the best `max_per_document` of each.
//! 3. Merge the groups and keep the global best `top_k`.
//!    Ties break on document id, then ordinal.
//! 4. Keyword supplement: up to `keyword_limit` passages from the first
//!    `keyword_scan_window` eligible passages whose lowercased text
//!    contains one of the question's stems, appended with a fixed score.
//!
//! Eligibility (same tenant, `done` document, vector present) is enforced
//! by the [`Store`]; this module never sees other tenants' rows.

use std::collections::{BTreeMap, HashSet};

use tracing::debug;

use crate::embedding::cosine_similarity;
use crate::error::Result;
use crate::models::{CandidatePassage, RetrievedPassage};
use crate::store::Store;

pub const DEFAULT_SMALL_CORPUS_THRESHOLD: usize = 20;
pub const DEFAULT_TOP_K: usize = 12;
pub const DEFAULT_MAX_PER_DOCUMENT: usize = 4;
pub const DEFAULT_KEYWORD_LIMIT: usize = 4;
pub const DEFAULT_KEYWORD_SCAN_WINDOW: usize = 500;
pub const DEFAULT_KEYWORD_SCORE: f32 = 0.55;

const MAX_STEMS: usize = 4;
const MIN_WORD_CHARS: usize = 4;
const STEM_CHARS: usize = 5;

/// Question words skipped when building keyword stems.
const STOP_WORDS: &[&str] = &[
    "czy", "jest", "jakie", "jaki", "jaka", "które", "który", "która", "ile", "jak", "gdzie",
    "kiedy", "masz", "mam", "nie", "tak", "tych", "tego", "tej", "proszę", "powiedz", "podaj",
    "what", "which", "where", "when", "does", "have", "tell", "about", "give", "list", "show",
    "find",
];

#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalParams {
    pub small_corpus_threshold: usize,
    pub top_k: usize,
    pub max_per_document: usize,
    pub keyword_limit: usize,
    pub keyword_scan_window: usize,
    pub keyword_score: f32,
}

impl Default for RetrievalParams {
    fn default() -> Self {
        Self {
            small_corpus_threshold: DEFAULT_SMALL_CORPUS_THRESHOLD,
            top_k: DEFAULT_TOP_K,
            max_per_document: DEFAULT_MAX_PER_DOCUMENT,
            keyword_limit: DEFAULT_KEYWORD_LIMIT,
            keyword_scan_window: DEFAULT_KEYWORD_SCAN_WINDOW,
            keyword_score: DEFAULT_KEYWORD_SCORE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorpusMode {
    Small,
    Large,
}

impl CorpusMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CorpusMode::Small => "small",
            CorpusMode::Large => "large",
        }
    }
}

pub fn corpus_mode(eligible_count: usize, params: &RetrievalParams) -> CorpusMode {
    if eligible_count <= params.small_corpus_threshold {
        CorpusMode::Small
    } else {
        CorpusMode::Large
    }
}

/// What to retrieve with.
#[derive(Debug, Clone, Copy)]
pub enum RetrievalQuery<'a> {
    /// Small-corpus mode: return everything.
    All,
    /// Large-corpus mode: rank against this query vector.
    Vector(&'a [f32]),
}

/// Count the tenant's eligible passages and pick a mode.
pub async fn plan(
    store: &dyn Store,
    tenant_id: &str,
    params: &RetrievalParams,
) -> Result<(CorpusMode, usize)> {
    let count = store.count_eligible_passages(tenant_id).await?;
    let mode = corpus_mode(count, params);
    debug!(tenant_id, count, mode = mode.as_str(), "retrieval plan");
    Ok((mode, count))
}

/// Retrieve passages for `question` within one tenant.
pub async fn retrieve(
    store: &dyn Store,
    tenant_id: &str,
    question: &str,
    query: RetrievalQuery<'_>,
    params: &RetrievalParams,
) -> Result<Vec<RetrievedPassage>> {
    let candidates = store.eligible_passages(tenant_id, None).await?;

    let results = match query {
        RetrievalQuery::All => all_passages(&candidates),
        RetrievalQuery::Vector(query_vec) => {
            let mut ranked = rank_by_similarity(
                &candidates,
                query_vec,
                params.top_k,
                params.max_per_document,
            );
            let stems = keyword_stems(question);
            if !stems.is_empty() {
                let window = &candidates[..candidates.len().min(params.keyword_scan_window)];
                let extra = keyword_supplement(
                    window,
                    &stems,
                    &ranked,
                    params.keyword_limit,
                    params.keyword_score,
                );
                debug!(tenant_id, ranked = ranked.len(), supplement = extra.len(), "keyword supplement");
                ranked.extend(extra);
            }
            ranked
        }
    };
    Ok(results)
}

/// Every candidate, in document then ordinal order, with score `1.0`.
pub fn all_passages(candidates: &[CandidatePassage]) -> Vec<RetrievedPassage> {
    let mut out: Vec<RetrievedPassage> = candidates.iter().map(|c| to_retrieved(c, 1.0)).collect();
    out.sort_by(|a, b| {
        a.document_id
            .cmp(&b.document_id)
            .then(a.ordinal.cmp(&b.ordinal))
    });
    out
}

/// Two-phase rank: per-document top `max_per_document`, then global top `top_k`.
pub fn rank_by_similarity(
    candidates: &[CandidatePassage],
    query_vec: &[f32],
    top_k: usize,
    max_per_document: usize,
) -> Vec<RetrievedPassage> {
    let mut by_doc: BTreeMap<&str, Vec<RetrievedPassage>> = BTreeMap::new();
    for c in candidates {
        let score = cosine_similarity(query_vec, &c.vector);
        by_doc
            .entry(c.document_id.as_str())
            .or_default()
            .push(to_retrieved(c, score));
    }

    let mut merged: Vec<RetrievedPassage> = Vec::new();
    for (_, mut group) in by_doc {
        group.sort_by(|a, b| b.score.total_cmp(&a.score).then(a.ordinal.cmp(&b.ordinal)));
        group.truncate(max_per_document);
        merged.extend(group);
    }

    merged.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.document_id.cmp(&b.document_id))
            .then(a.ordinal.cmp(&b.ordinal))
    });
    merged.truncate(top_k);
    merged
}

/// Keyword stems of `question`: lowercased with full Unicode case
/// mapping, punctuation stripped, words of at least four characters that
/// are not stop words, cut to a five-character prefix, deduplicated, at
/// most four.
pub fn keyword_stems(question: &str) -> Vec<String> {
    let cleaned: String = question
        .to_lowercase()
        .chars()
        .map(|c| match c {
            '?' | '!' | '.' | ',' | ';' | ':' | '(' | ')' | '"' | '\'' => ' ',
            other => other,
        })
        .collect();

    let mut stems: Vec<String> = Vec::new();
    for word in cleaned.split_whitespace() {
        if word.chars().count() < MIN_WORD_CHARS || STOP_WORDS.contains(&word) {
            continue;
        }
        let stem: String = word.chars().take(STEM_CHARS).collect();
        if !stems.contains(&stem) {
            stems.push(stem);
        }
    }
    stems.truncate(MAX_STEMS);
    stems
}

/// Substring matches for `stems` in `window`, skipping passages already in
/// `selected`.
pub fn keyword_supplement(
    window: &[CandidatePassage],
    stems: &[String],
    selected: &[RetrievedPassage],
    limit: usize,
    score: f32,
) -> Vec<RetrievedPassage> {
    let taken: HashSet<&str> = selected.iter().map(|r| r.passage_id.as_str()).collect();
    let mut out = Vec::new();
    for c in window {
        if out.len() >= limit {
            break;
        }
        if taken.contains(c.passage_id.as_str()) {
            continue;
        }
        let lower = c.text.to_lowercase();
        if stems.iter().any(|s| lower.contains(s.as_str())) {
            out.push(to_retrieved(c, score));
        }
    }
    out
}

fn to_retrieved(c: &CandidatePassage, score: f32) -> RetrievedPassage {
    RetrievedPassage {
        passage_id: c.passage_id.clone(),
        document_id: c.document_id.clone(),
        document_name: c.document_name.clone(),
        ordinal: c.ordinal,
        text: c.text.clone(),
        score,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cand(doc: &str, ordinal: i64, vector: Vec<f32>, text: &str) -> CandidatePassage {
        CandidatePassage {
            passage_id: format!("{doc}-{ordinal}"),
            document_id: doc.to_string(),
            document_name: format!("{doc}.txt"),
            ordinal,
            text: text.to_string(),
            vector,
        }
    }

    #[test]
    fn test_corpus_mode_threshold_is_inclusive() {
        let p = RetrievalParams::default();
        assert_eq!(corpus_mode(0, &p), CorpusMode::Small);
        assert_eq!(corpus_mode(20, &p), CorpusMode::Small);
        assert_eq!(corpus_mode(21, &p), CorpusMode::Large);
    }

    #[test]
    fn test_per_document_cap() {
        // doc "a" holds the 10 best passages; "b" and "c" are weaker.
        let mut cands = Vec::new();
        for i in 0..10 {
            cands.push(cand("a", i, vec![1.0, 0.01 * i as f32], "a"));
        }
        for i in 0..3 {
            cands.push(cand("b", i, vec![1.0, 0.5 + 0.1 * i as f32], "b"));
            cands.push(cand("c", i, vec![0.2, 1.0 + i as f32], "c"));
        }

        let ranked = rank_by_similarity(&cands, &[1.0, 0.0], 12, 4);
        let from_a = ranked.iter().filter(|r| r.document_id == "a").count();
        assert_eq!(from_a, 4);
        assert_eq!(ranked.len(), 10);
        assert_eq!(ranked[0].passage_id, "a-0");
        for w in ranked.windows(2) {
            assert!(w[0].score >= w[1].score);
        }
    }

    #[test]
    fn test_top_k_limits_result() {
        let cands: Vec<_> = (0..30)
            .map(|i| cand(&format!("d{i:02}"), 0, vec![1.0, i as f32 * 0.1], "x"))
            .collect();
        let ranked = rank_by_similarity(&cands, &[1.0, 0.0], 12, 4);
        assert_eq!(ranked.len(), 12);
        assert_eq!(ranked[0].document_id, "d00");
    }

    #[test]
    fn test_keyword_stems() {
        assert_eq!(
            keyword_stems("Jakie są ceny lodówki Samsung?"),
            vec!["ceny", "lodów", "samsu"]
        );
        assert_eq!(
            keyword_stems("What warranty does the LODÓWKA have, and (price)?"),
            vec!["warra", "lodów", "price"]
        );
        assert!(keyword_stems("what is it?").is_empty());
    }

    #[test]
    fn test_keyword_stems_capped_at_four() {
        let stems = keyword_stems("alpha bravo charlie delta echoes foxtrot");
        assert_eq!(stems, vec!["alpha", "bravo", "charl", "delta"]);
    }

    #[test]
    fn test_keyword_stems_dedupe_shared_prefix() {
        assert_eq!(keyword_stems("lodówka lodówki lodówkę"), vec!["lodów"]);
    }

    #[test]
    fn test_keyword_supplement_skips_selected_and_respects_limit() {
        let window = vec![
            cand("a", 0, vec![1.0], "Nothing here"),
            cand("a", 1, vec![1.0], "Lodówka Samsung RB34"),
            cand("a", 2, vec![1.0], "another LODÓWKA model"),
            cand("b", 0, vec![1.0], "lodówki na promocji"),
            cand("b", 1, vec![1.0], "lodówka z zamrażarką"),
        ];
        let selected = vec![to_retrieved(&window[1], 0.9)];
        let stems = vec!["lodów".to_string()];

        let extra = keyword_supplement(&window, &stems, &selected, 2, 0.55);
        let ids: Vec<&str> = extra.iter().map(|r| r.passage_id.as_str()).collect();
        assert_eq!(ids, vec!["a-2", "b-0"]);
        assert!(extra.iter().all(|r| (r.score - 0.55).abs() < f32::EPSILON));
    }

    async fn warranty_store() -> crate::store::memory::InMemoryStore {
        use crate::models::{Document, DocumentStatus, Passage};
        let store = crate::store::memory::InMemoryStore::new();
        // d1 is closest to the query, d3 furthest; 24 passages in total.
        for (doc_id, base, step) in [("d1", 0.0, 0.05), ("d2", 0.5, 0.05), ("d3", 1.0, 0.1)] {
            let mut doc = Document::pending("t1", &format!("{doc_id}.txt"), doc_id, "text/plain", 1);
            doc.id = doc_id.to_string();
            doc.status = DocumentStatus::Done;
            store.insert_document(&doc).await.unwrap();
            for i in 0..8i64 {
                let mentions = matches!((doc_id, i), ("d1", 0) | ("d1", 5) | ("d2", 4) | ("d3", 7));
                let text = if mentions {
                    format!("{doc_id} warranty clause {i}")
                } else {
                    format!("{doc_id} general text {i}")
                };
                store
                    .insert_passage(&Passage {
                        id: format!("{doc_id}-{i}"),
                        tenant_id: "t1".into(),
                        document_id: doc_id.into(),
                        ordinal: i,
                        text,
                        token_estimate: 4,
                        hash: String::new(),
                        vector: Some(vec![1.0, base + step * i as f32]),
                        created_at: 0,
                    })
                    .await
                    .unwrap();
            }
        }
        store
    }

    #[tokio::test]
    async fn test_large_mode_ranked_prefix_then_keyword_suffix() {
        let store = warranty_store().await;
        let params = RetrievalParams {
            top_k: 5,
            max_per_document: 2,
            keyword_scan_window: 16,
            ..RetrievalParams::default()
        };
        let (mode, count) = plan(&store, "t1", &params).await.unwrap();
        assert_eq!((mode, count), (CorpusMode::Large, 24));

        let query = [1.0f32, 0.0];
        let results = retrieve(&store, "t1", "warranty?", RetrievalQuery::Vector(&query), &params)
            .await
            .unwrap();

        let split = results
            .iter()
            .position(|r| (r.score - params.keyword_score).abs() < f32::EPSILON)
            .unwrap_or(results.len());
        let (ranked, supplement) = results.split_at(split);

        assert_eq!(ranked.len(), 5);
        for doc in ["d1", "d2", "d3"] {
            assert!(ranked.iter().filter(|r| r.document_id == doc).count() <= 2);
        }
        for w in ranked.windows(2) {
            assert!(w[0].score >= w[1].score);
        }
        let ranked_ids: Vec<&str> = ranked.iter().map(|r| r.passage_id.as_str()).collect();
        assert_eq!(ranked_ids, vec!["d1-0", "d1-1", "d2-0", "d2-1", "d3-0"]);

        // d1-0 is already ranked; d3-7 lies past the scan window.
        let extra_ids: Vec<&str> = supplement.iter().map(|r| r.passage_id.as_str()).collect();
        assert_eq!(extra_ids, vec!["d1-5", "d2-4"]);

        let unique: HashSet<&str> = results.iter().map(|r| r.passage_id.as_str()).collect();
        assert_eq!(unique.len(), results.len());
    }

    #[tokio::test]
    async fn test_wider_scan_window_reaches_later_passages() {
        let store = warranty_store().await;
        let params = RetrievalParams {
            top_k: 5,
            max_per_document: 2,
            ..RetrievalParams::default()
        };
        let query = [1.0f32, 0.0];
        let results = retrieve(&store, "t1", "warranty?", RetrievalQuery::Vector(&query), &params)
            .await
            .unwrap();
        assert!(results
            .iter()
            .any(|r| r.passage_id == "d3-7" && (r.score - 0.55).abs() < f32::EPSILON));
    }

    #[test]
    fn test_all_passages_ordering() {
        let cands = vec![
            cand("b", 1, vec![], "b1"),
            cand("a", 1, vec![], "a1"),
            cand("b", 0, vec![], "b0"),
            cand("a", 0, vec![], "a0"),
        ];
        let all = all_passages(&cands);
        let texts: Vec<&str> = all.iter().map(|r| r.text.as_str()).collect();
        assert_eq!(texts, vec!["a0", "a1", "b0", "b1"]);
        assert!(all.iter().all(|r| r.score == 1.0));
    }
}
