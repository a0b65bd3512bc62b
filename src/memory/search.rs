//! Hybrid retrieval: parallel vector + lexical candidates, merge,
//! rule-based rerank, dedup, optional cross-encoder pass.
//!
//! Scoring formula:
//!
//! ```text
//! score = w_strength * strength
//!       + w_recency  * recency(age)
//!       + w_refs     * min(refs_count, refs_cap) / refs_cap
//!       + w_lexical  * normalized_lexical
//!       + w_vector   * vector_similarity
//!       + w_metadata * metadata_bonus
//! ```
//!
//! Ordering is fully deterministic: descending final score, ties broken on
//! memory id. When a `project_id` is active the pool-first degraded
//! workflow runs, falling back to the full corpus when the pool pass is
//! insufficient.

use chrono::Utc;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::config::{RerankWeights, SearchConfig};
use crate::embedding::EmbeddingProvider;
use crate::error::{OrchestratorError, Result, SearchCause};
use crate::memory::pool::ProjectMemoryPool;
use crate::memory::rerank::CrossEncoderReranker;
use crate::memory::types::{base_memory_id, parse_timestamp, Tier};
use crate::storage::{LexicalIndex, MetadataFilter, VectorStore};

/// Cap used by the refs-reliability feature.
const REFS_CAP: f64 = 10.0;

/// Bound on the metadata alignment bonus so it never dominates.
const METADATA_BONUS_CAP: f64 = 0.15;

/// Strength boost applied when a memory is returned to a caller.
const ACCESS_STRENGTH_BOOST: f64 = 0.1;

/// Query hints extracted from the query text. The extractor is wired but
/// policy-disabled; the scoring path must stay fast when hints are absent.
#[derive(Debug, Clone, Default)]
pub struct QueryAttributes {
    pub topic: Option<String>,
    pub doc_type: Option<String>,
    pub severity: Option<String>,
    pub project_name: Option<String>,
}

#[derive(Default)]
pub struct QueryAttributeExtractor;

impl QueryAttributeExtractor {
    /// Disabled by policy: per-query reasoner fallback stacked multi-second
    /// latencies in replay runs. The seam stays so re-enablement only
    /// touches this body.
    pub fn extract(&self, _query: &str) -> Option<QueryAttributes> {
        None
    }
}

/// One search result, ordered by descending final score.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SearchResult {
    pub id: String,
    pub content: String,
    pub metadata: Value,
    pub score: f64,
    pub vector_similarity: f64,
    pub lexical_score: f64,
    pub combined_score: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rerank_score: Option<f64>,
}

impl SearchResult {
    pub fn memory_id(&self) -> String {
        match self.metadata.get("memory_id").and_then(Value::as_str) {
            Some(id) => id.to_string(),
            None => base_memory_id(&self.id).to_string(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    pub top_k: Option<usize>,
    pub filters: Option<MetadataFilter>,
    pub project_id: Option<String>,
    pub include_session_summaries: Option<bool>,
    /// Cache-warming traffic: quieter logs, no access tracking.
    pub prefetch: bool,
}

#[derive(Default)]
struct SearchMetrics {
    searches: AtomicU64,
    pool_passes: AtomicU64,
    full_corpus_fallbacks: AtomicU64,
}

pub struct SearchService {
    vector: VectorStore,
    lexical: LexicalIndex,
    embedder: Arc<dyn EmbeddingProvider>,
    reranker: Option<Arc<CrossEncoderReranker>>,
    pool: Arc<ProjectMemoryPool>,
    qam: QueryAttributeExtractor,
    config: SearchConfig,
    weights: RerankWeights,
    metrics: SearchMetrics,
}

impl SearchService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        vector: VectorStore,
        lexical: LexicalIndex,
        embedder: Arc<dyn EmbeddingProvider>,
        reranker: Option<Arc<CrossEncoderReranker>>,
        pool: Arc<ProjectMemoryPool>,
        config: SearchConfig,
        weights: RerankWeights,
    ) -> Self {
        Self {
            vector,
            lexical,
            embedder,
            reranker,
            pool,
            qam: QueryAttributeExtractor,
            config,
            weights,
            metrics: SearchMetrics::default(),
        }
    }

    pub fn reranker(&self) -> Option<&Arc<CrossEncoderReranker>> {
        self.reranker.as_ref()
    }

    pub fn pool(&self) -> &Arc<ProjectMemoryPool> {
        &self.pool
    }

    /// Entry point for `search_memory`.
    pub async fn search(&self, query: &str, options: SearchOptions) -> Result<Vec<SearchResult>> {
        if query.trim().is_empty() {
            return Err(OrchestratorError::InvalidRequest(
                "query must not be empty".into(),
            ));
        }
        let top_k = options.top_k.unwrap_or(self.config.top_k);
        if top_k == 0 {
            return Ok(Vec::new());
        }

        self.metrics.searches.fetch_add(1, Ordering::Relaxed);

        let results = match options.project_id.clone() {
            Some(project_id) => {
                self.search_in_project(query, &project_id, top_k, &options)
                    .await?
            }
            None => self.full_search(query, top_k, &options).await?,
        };

        if !options.prefetch {
            self.track_access(&results);
        }
        Ok(results)
    }

    /// Pool-first degraded workflow: constrain candidates to the project's
    /// memory pool; when the pool pass is insufficient, merge in a
    /// full-corpus pass restricted to the project filter.
    async fn search_in_project(
        &self,
        query: &str,
        project_id: &str,
        top_k: usize,
        options: &SearchOptions,
    ) -> Result<Vec<SearchResult>> {
        let pool_ids = self.pool.memory_ids(project_id);

        let pool_results = if pool_ids.is_empty() {
            Vec::new()
        } else {
            self.metrics.pool_passes.fetch_add(1, Ordering::Relaxed);
            let (candidates, query_embedding) = self
                .gather_candidates(query, self.config.pool_candidate_count, options)
                .await?;
            let filtered: Vec<Candidate> = candidates
                .into_iter()
                .filter(|c| pool_ids.contains(base_memory_id(&c.memory_id())))
                .collect();
            self.finish(query, &query_embedding, filtered, top_k, options)
                .await
        };

        if self.is_sufficient(&pool_results, top_k) {
            return Ok(pool_results);
        }

        tracing::debug!(
            project_id,
            pool_results = pool_results.len(),
            "pool pass insufficient, running full-corpus fallback"
        );
        self.metrics
            .full_corpus_fallbacks
            .fetch_add(1, Ordering::Relaxed);

        // Second pass drops the pool constraint entirely: full corpus,
        // standard candidate caps. Caller-supplied filters still apply; the
        // project-alignment bonus keeps project-local results preferred.
        let full_results = self.full_search(query, top_k, options).await?;

        Ok(merge_passes(pool_results, full_results, top_k))
    }

    async fn full_search(
        &self,
        query: &str,
        top_k: usize,
        options: &SearchOptions,
    ) -> Result<Vec<SearchResult>> {
        let (candidates, query_embedding) = self
            .gather_candidates(query, self.config.vector_candidate_count, options)
            .await?;
        Ok(self
            .finish(query, &query_embedding, candidates, top_k, options)
            .await)
    }

    /// Steps 1–3: embed the query once, fire both candidate searches
    /// concurrently, merge by candidate id.
    async fn gather_candidates(
        &self,
        query: &str,
        vector_limit: usize,
        options: &SearchOptions,
    ) -> Result<(Vec<Candidate>, Vec<f32>)> {
        let query_embedding = self.embed_query(query).await?;

        let include_summaries = options
            .include_session_summaries
            .unwrap_or(self.config.include_session_summaries);
        let mut vector_filter = options.filters.clone().unwrap_or_default();
        if !include_summaries {
            vector_filter = vector_filter.eq("is_memory_entry", false);
        }

        let vector = self.vector.clone();
        let vector_embedding = query_embedding.clone();
        let vector_task = tokio::task::spawn_blocking(move || {
            vector.search(&vector_embedding, vector_limit, Some(&vector_filter))
        });

        let lexical = self.lexical.clone();
        let lexical_query = query.to_string();
        let lexical_limit = self.config.lexical_candidate_count;
        let lexical_task =
            tokio::task::spawn_blocking(move || lexical.search(&lexical_query, lexical_limit));

        let (vector_hits, lexical_hits) = tokio::join!(vector_task, lexical_task);
        let vector_hits = vector_hits
            .map_err(|e| OrchestratorError::search(SearchCause::Vector, e.to_string()))?
            .map_err(|e| OrchestratorError::search(SearchCause::Vector, e.to_string()))?;
        let lexical_hits = lexical_hits
            .map_err(|e| OrchestratorError::search(SearchCause::Lexical, e.to_string()))?
            .map_err(|e| OrchestratorError::search(SearchCause::Lexical, e.to_string()))?;

        let mut merged: HashMap<String, Candidate> = HashMap::new();
        for hit in vector_hits {
            merged.insert(
                hit.id.clone(),
                Candidate {
                    id: hit.id,
                    content: hit.document,
                    metadata: hit.metadata,
                    vector_similarity: hit.similarity,
                    lexical_score: 0.0,
                },
            );
        }
        for hit in &lexical_hits {
            if let Some(existing) = merged.get_mut(&hit.chunk_id) {
                existing.lexical_score = hit.score;
                continue;
            }
            // Lexical-only hit: enrich from the vector store; the record
            // must still satisfy the metadata filter.
            let record = self
                .vector
                .get(&hit.chunk_id)
                .map_err(|e| OrchestratorError::search(SearchCause::Lexical, e.to_string()))?;
            let Some(record) = record else { continue };
            if let Some(filter) = &options.filters {
                if !filter.matches(&record.metadata) {
                    continue;
                }
            }
            if !include_summaries
                && record.metadata.get("is_memory_entry") == Some(&Value::Bool(true))
            {
                continue;
            }
            merged.insert(
                hit.chunk_id.clone(),
                Candidate {
                    id: record.id,
                    content: record.document,
                    metadata: record.metadata,
                    vector_similarity: 0.0,
                    lexical_score: hit.score,
                },
            );
        }

        Ok((merged.into_values().collect(), query_embedding))
    }

    /// Steps 4–7: rule-based rerank, per-memory dedup, optional
    /// cross-encoder pass, deterministic ordering, truncation.
    async fn finish(
        &self,
        query: &str,
        query_embedding: &[f32],
        candidates: Vec<Candidate>,
        top_k: usize,
        options: &SearchOptions,
    ) -> Vec<SearchResult> {
        let attributes = self.qam.extract(query);
        let mut scored: Vec<SearchResult> = candidates
            .iter()
            .map(|candidate| self.score_candidate(candidate, query, options, attributes.as_ref()))
            .collect();

        sort_deterministic(&mut scored);
        let deduped = dedup_by_memory(scored);
        let mut trimmed: Vec<SearchResult> = deduped.into_iter().take(top_k.max(1) * 2).collect();

        if let Some(reranker) = &self.reranker {
            trimmed = reranker
                .rerank(
                    query,
                    query_embedding,
                    options.project_id.as_deref(),
                    trimmed,
                    options.prefetch,
                )
                .await;
        }

        sort_deterministic(&mut trimmed);
        trimmed.truncate(top_k);
        trimmed
    }

    fn score_candidate(
        &self,
        candidate: &Candidate,
        query: &str,
        options: &SearchOptions,
        attributes: Option<&QueryAttributes>,
    ) -> SearchResult {
        let metadata = &candidate.metadata;
        let w = &self.weights;

        let strength = metadata
            .get("strength")
            .and_then(Value::as_f64)
            .unwrap_or(0.5);
        let recency = self.recency_score(metadata);
        let refs = refs_reliability(metadata);
        let lexical = normalize_lexical(candidate.lexical_score);
        let bonus = metadata_bonus(metadata, query, options, attributes);

        let combined = (strength * w.strength
            + recency * w.recency
            + refs * w.refs
            + lexical * w.lexical
            + candidate.vector_similarity * w.vector
            + bonus * w.metadata)
            .clamp(0.0, 1.0);

        // A metadata entry's document is the enriched summary; callers get
        // the original conversation text as the result content.
        let content = if metadata.get("is_memory_entry") == Some(&Value::Bool(true)) {
            metadata
                .get("content")
                .and_then(Value::as_str)
                .filter(|c| !c.is_empty())
                .unwrap_or(&candidate.content)
                .to_string()
        } else {
            candidate.content.clone()
        };

        SearchResult {
            id: candidate.id.clone(),
            content,
            metadata: candidate.metadata.clone(),
            score: combined,
            vector_similarity: candidate.vector_similarity,
            lexical_score: candidate.lexical_score,
            combined_score: combined,
            rerank_score: None,
        }
    }

    /// Exponential recency decay with tier-specific half-life multipliers
    /// so long-term memories decay more slowly.
    fn recency_score(&self, metadata: &Value) -> f64 {
        let Some(created_at) = metadata
            .get("created_at")
            .and_then(Value::as_str)
            .and_then(parse_timestamp)
        else {
            return 0.5;
        };
        let age_hours = (Utc::now() - created_at).num_seconds().max(0) as f64 / 3600.0;

        let tier: Tier = metadata
            .get("tier")
            .and_then(Value::as_str)
            .and_then(|s| s.parse().ok())
            .unwrap_or(Tier::Working);
        let half_life = (self.config.recency_half_life_hours * tier.half_life_multiplier()).max(1.0);
        (-age_hours / half_life).exp().clamp(0.0, 1.0)
    }

    fn is_sufficient(&self, results: &[SearchResult], top_k: usize) -> bool {
        if results.len() < top_k {
            return false;
        }
        results
            .iter()
            .all(|r| r.score >= self.config.min_score_threshold)
    }

    /// Background side effect on return: bump access_count, refresh
    /// last_accessed, boost strength. Failure is logged, never surfaced.
    fn track_access(&self, results: &[SearchResult]) {
        let memory_ids: Vec<String> = {
            let mut ids: Vec<String> = results.iter().map(|r| r.memory_id()).collect();
            ids.sort();
            ids.dedup();
            ids
        };
        if memory_ids.is_empty() {
            return;
        }
        let vector = self.vector.clone();
        tokio::spawn(async move {
            tokio::task::spawn_blocking(move || {
                for memory_id in memory_ids {
                    if let Err(err) = bump_access(&vector, &memory_id) {
                        tracing::debug!(memory_id, error = %err, "access tracking failed");
                    }
                }
            })
            .await
            .ok();
        });
    }

    /// Timestamp-descending listing of memory entries.
    pub fn list_recent(
        &self,
        limit: usize,
        filters: Option<&MetadataFilter>,
    ) -> Result<Vec<SearchResult>> {
        let filter = filters
            .cloned()
            .unwrap_or_default()
            .eq("is_memory_entry", true);
        let mut entries = self
            .vector
            .list_by_metadata(&filter, false)
            .map_err(|e| OrchestratorError::search(SearchCause::Vector, e.to_string()))?;

        entries.sort_by(|a, b| {
            let ts_a = a.metadata.get("created_at").and_then(Value::as_str).unwrap_or("");
            let ts_b = b.metadata.get("created_at").and_then(Value::as_str).unwrap_or("");
            ts_b.cmp(ts_a).then_with(|| a.id.cmp(&b.id))
        });
        entries.truncate(limit);

        Ok(entries
            .into_iter()
            .map(|record| SearchResult {
                content: record.document,
                metadata: record.metadata,
                id: record.id,
                score: 0.0,
                vector_similarity: 0.0,
                lexical_score: 0.0,
                combined_score: 0.0,
                rerank_score: None,
            })
            .collect())
    }

    /// Nearest memory entries to an existing memory, by its stored
    /// summary embedding, excluding itself.
    pub fn get_related(&self, memory_id: &str, top_k: usize) -> Result<Vec<SearchResult>> {
        let entry_id = crate::memory::types::entry_id(memory_id);
        let embedding = self
            .vector
            .get_embedding(&entry_id)
            .map_err(|e| OrchestratorError::search(SearchCause::Vector, e.to_string()))?
            .ok_or_else(|| OrchestratorError::NotFound(memory_id.to_string()))?;

        let filter = MetadataFilter::new().eq("is_memory_entry", true);
        let hits = self
            .vector
            .search(&embedding, top_k + 1, Some(&filter))
            .map_err(|e| OrchestratorError::search(SearchCause::Vector, e.to_string()))?;

        Ok(hits
            .into_iter()
            .filter(|hit| hit.id != entry_id)
            .take(top_k)
            .map(|hit| SearchResult {
                id: hit.id,
                content: hit.document,
                metadata: hit.metadata,
                score: hit.similarity,
                vector_similarity: hit.similarity,
                lexical_score: 0.0,
                combined_score: hit.similarity,
                rerank_score: None,
            })
            .collect())
    }

    pub fn metrics_snapshot(&self) -> Value {
        json!({
            "searches": self.metrics.searches.load(Ordering::Relaxed),
            "pool_passes": self.metrics.pool_passes.load(Ordering::Relaxed),
            "full_corpus_fallbacks": self.metrics.full_corpus_fallbacks.load(Ordering::Relaxed),
        })
    }

    /// Best-effort cache warm-up for a project: load the pool and push its
    /// embeddings into L3, then run the configured prefetch queries through
    /// the normal search path to populate L1/L2. Never blocks user queries;
    /// callers run this in a background task.
    pub async fn prefetch_project(&self, project_id: &str, queries: &[String]) -> Value {
        let pool_stats = self
            .reranker
            .as_ref()
            .map(|reranker| self.pool.warm_reranker(reranker, project_id));

        let mut executed = 0usize;
        let mut total_results = 0usize;
        for query in queries {
            let query = query.trim();
            if query.is_empty() {
                continue;
            }
            executed += 1;
            let options = SearchOptions {
                project_id: Some(project_id.to_string()),
                prefetch: true,
                ..Default::default()
            };
            match self.search(query, options).await {
                Ok(results) => total_results += results.len(),
                Err(err) => {
                    tracing::debug!(project_id, query, error = %err, "prefetch query failed")
                }
            }
        }

        json!({
            "project_id": project_id,
            "queries_executed": executed,
            "total_results": total_results,
            "pool": pool_stats,
        })
    }

    async fn embed_query(&self, query: &str) -> Result<Vec<f32>> {
        let embedder = Arc::clone(&self.embedder);
        let text = query.to_string();
        tokio::task::spawn_blocking(move || embedder.embed(&text))
            .await
            .map_err(|e| OrchestratorError::search(SearchCause::Embedding, e.to_string()))?
            .map_err(|e| OrchestratorError::search(SearchCause::Embedding, e.to_string()))
    }
}

struct Candidate {
    id: String,
    content: String,
    metadata: Value,
    vector_similarity: f64,
    lexical_score: f64,
}

impl Candidate {
    fn memory_id(&self) -> String {
        match self.metadata.get("memory_id").and_then(Value::as_str) {
            Some(id) => id.to_string(),
            None => base_memory_id(&self.id).to_string(),
        }
    }
}

/// Sigmoid normalization for raw BM25 scores, which are unbounded.
fn normalize_lexical(score: f64) -> f64 {
    if score <= 0.0 {
        0.0
    } else {
        1.0 / (1.0 + (-0.1 * score).exp())
    }
}

fn refs_reliability(metadata: &Value) -> f64 {
    let count = metadata
        .get("refs_count")
        .and_then(Value::as_u64)
        .unwrap_or(0) as f64;
    (count.min(REFS_CAP)) / REFS_CAP
}

/// Small positive/negative adjustments when metadata aligns with the query,
/// filters, or extracted attributes. Capped so it never dominates.
fn metadata_bonus(
    metadata: &Value,
    query: &str,
    options: &SearchOptions,
    attributes: Option<&QueryAttributes>,
) -> f64 {
    let mut bonus: f64 = 0.0;
    let query_lc = query.to_lowercase();

    if metadata.get("source").and_then(Value::as_str) == Some("session") {
        bonus -= 0.05;
    }

    let topic = metadata
        .get("topic")
        .and_then(Value::as_str)
        .map(str::to_lowercase);
    if let Some(topic) = &topic {
        if !topic.is_empty() && query_lc.contains(topic.as_str()) {
            bonus += 0.05;
        } else {
            bonus -= 0.01;
        }
    }

    let severity = metadata
        .get("severity")
        .and_then(Value::as_str)
        .map(str::to_lowercase);
    if severity.as_deref() == Some("high")
        && ["incident", "inc", "bug", "sev", "pager"]
            .iter()
            .any(|kw| query_lc.contains(kw))
    {
        bonus += 0.05;
    }

    if let Some(project_id) = &options.project_id {
        if metadata.get("project_id").and_then(Value::as_str) == Some(project_id.as_str()) {
            bonus += 0.03;
        } else {
            bonus -= 0.05;
        }
    }

    if let Some(attrs) = attributes {
        if let (Some(want), Some(have)) = (&attrs.topic, &topic) {
            if want.to_lowercase() == *have {
                bonus += 0.05;
            }
        }
        if let Some(want) = &attrs.doc_type {
            if metadata.get("doc_type").and_then(Value::as_str)
                == Some(want.to_lowercase().as_str())
            {
                bonus += 0.03;
            }
        }
        if let (Some(want), Some(have)) = (&attrs.severity, &severity) {
            if want.to_lowercase() == *have {
                bonus += 0.02;
            }
        }
    }

    bonus.clamp(-METADATA_BONUS_CAP, METADATA_BONUS_CAP)
}

/// Collapse to one result per memory, keeping the best-scoring
/// representative. A memory's metadata entry and its chunks compete on the
/// merged score alone.
fn dedup_by_memory(sorted: Vec<SearchResult>) -> Vec<SearchResult> {
    let mut best: HashMap<String, SearchResult> = HashMap::new();
    let mut order: Vec<String> = Vec::new();

    for result in sorted {
        let memory_id = result.memory_id();
        match best.get(&memory_id) {
            Some(existing) if !is_better(&result, existing) => {}
            _ => {
                if !best.contains_key(&memory_id) {
                    order.push(memory_id.clone());
                }
                best.insert(memory_id, result);
            }
        }
    }

    let mut out: Vec<SearchResult> = order
        .into_iter()
        .filter_map(|memory_id| best.remove(&memory_id))
        .collect();
    sort_deterministic(&mut out);
    out
}

fn is_better(new: &SearchResult, existing: &SearchResult) -> bool {
    new.score > existing.score
}

fn sort_deterministic(results: &mut [SearchResult]) {
    results.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.memory_id().cmp(&b.memory_id()))
            .then_with(|| a.id.cmp(&b.id))
    });
}

/// Merge pool-pass and fallback-pass results, keeping the best-scoring
/// entry per memory, capped at `top_k`.
fn merge_passes(
    pool: Vec<SearchResult>,
    fallback: Vec<SearchResult>,
    top_k: usize,
) -> Vec<SearchResult> {
    let mut combined = pool;
    combined.extend(fallback);
    sort_deterministic(&mut combined);
    let mut merged = dedup_by_memory(combined);
    merged.truncate(top_k);
    merged
}

fn bump_access(vector: &VectorStore, memory_id: &str) -> anyhow::Result<()> {
    let entry_id = crate::memory::types::entry_id(memory_id);
    let Some(record) = vector.get(&entry_id)? else {
        return Ok(());
    };
    let access_count = record
        .metadata
        .get("access_count")
        .and_then(Value::as_u64)
        .unwrap_or(0);
    let strength = record
        .metadata
        .get("strength")
        .and_then(Value::as_f64)
        .unwrap_or(0.5);

    vector.update_metadata(
        &entry_id,
        &json!({
            "access_count": access_count + 1,
            "last_accessed": Utc::now().to_rfc3339(),
            "strength": (strength + ACCESS_STRENGTH_BOOST).min(1.0),
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(id: &str, memory_id: &str, score: f64, is_entry: bool, tier: &str) -> SearchResult {
        SearchResult {
            id: id.into(),
            content: "content".into(),
            metadata: json!({
                "memory_id": memory_id,
                "is_memory_entry": is_entry,
                "tier": tier,
                "chunk_index": if is_entry { Value::Null } else { json!(0) },
            }),
            score,
            vector_similarity: 0.0,
            lexical_score: 0.0,
            combined_score: score,
            rerank_score: None,
        }
    }

    #[test]
    fn lexical_normalization_is_sigmoid() {
        assert_eq!(normalize_lexical(0.0), 0.0);
        assert_eq!(normalize_lexical(-3.0), 0.0);
        assert!(normalize_lexical(5.0) > 0.6);
        assert!(normalize_lexical(50.0) > 0.99);
        assert!(normalize_lexical(50.0) <= 1.0);
    }

    #[test]
    fn refs_reliability_caps_at_one() {
        assert_eq!(refs_reliability(&json!({})), 0.0);
        assert!((refs_reliability(&json!({"refs_count": 5})) - 0.5).abs() < 1e-9);
        assert_eq!(refs_reliability(&json!({"refs_count": 25})), 1.0);
    }

    #[test]
    fn metadata_bonus_is_capped() {
        let metadata = json!({
            "topic": "egress",
            "severity": "high",
            "project_id": "infra",
        });
        let options = SearchOptions {
            project_id: Some("infra".into()),
            ..Default::default()
        };
        let bonus = metadata_bonus(&metadata, "incident egress bug sev", &options, None);
        assert!(bonus <= METADATA_BONUS_CAP);
        assert!(bonus > 0.0);
    }

    #[test]
    fn project_mismatch_is_penalized() {
        let metadata = json!({"project_id": "other"});
        let options = SearchOptions {
            project_id: Some("infra".into()),
            ..Default::default()
        };
        assert!(metadata_bonus(&metadata, "query", &options, None) < 0.0);
    }

    #[test]
    fn dedup_keeps_best_scoring_representative() {
        let results = vec![
            result("mem-1#0", "mem-1", 0.9, false, "working"),
            result("mem-1-metadata", "mem-1", 0.7, true, "working"),
            result("mem-2-metadata", "mem-2", 0.5, true, "working"),
        ];
        let deduped = dedup_by_memory(results);
        assert_eq!(deduped.len(), 2);
        // the chunk carries the higher merged score, so it represents mem-1
        assert_eq!(deduped[0].id, "mem-1#0");
        assert!((deduped[0].score - 0.9).abs() < 1e-9);
    }

    #[test]
    fn dedup_ignores_tier_and_record_kind() {
        let results = vec![
            result("mem-a-metadata", "mem-a", 0.9, true, "long_term"),
            result("mem-b-metadata", "mem-b", 0.2, true, "working"),
        ];
        // different memories: both survive
        assert_eq!(dedup_by_memory(results).len(), 2);

        // entry vs chunk of the same memory: score decides, nothing else
        let duplicates = vec![
            result("mem-c-metadata", "mem-c", 0.9, true, "long_term"),
            result("mem-c#0", "mem-c", 0.95, false, "working"),
        ];
        let deduped = dedup_by_memory(duplicates);
        assert_eq!(deduped.len(), 1);
        assert_eq!(deduped[0].id, "mem-c#0");

        let reversed = vec![
            result("mem-d-metadata", "mem-d", 0.95, true, "long_term"),
            result("mem-d#0", "mem-d", 0.9, false, "working"),
        ];
        let deduped = dedup_by_memory(reversed);
        assert_eq!(deduped.len(), 1);
        assert_eq!(deduped[0].id, "mem-d-metadata");
    }

    #[test]
    fn ordering_is_deterministic_with_id_tiebreak() {
        let mut results = vec![
            result("mem-b-metadata", "mem-b", 0.5, true, "working"),
            result("mem-a-metadata", "mem-a", 0.5, true, "working"),
            result("mem-c-metadata", "mem-c", 0.9, true, "working"),
        ];
        sort_deterministic(&mut results);
        let ids: Vec<&str> = results.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(
            ids,
            vec!["mem-c-metadata", "mem-a-metadata", "mem-b-metadata"]
        );
    }

    #[test]
    fn merge_passes_dedups_across_passes() {
        let pool = vec![result("mem-1-metadata", "mem-1", 0.8, true, "working")];
        let fallback = vec![
            result("mem-1-metadata", "mem-1", 0.6, true, "working"),
            result("mem-2-metadata", "mem-2", 0.7, true, "working"),
        ];
        let merged = merge_passes(pool, fallback, 5);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].memory_id(), "mem-1");
        assert!((merged[0].score - 0.8).abs() < 1e-9);
    }

    #[test]
    fn memory_id_falls_back_to_base_id() {
        let mut r = result("mem-9-metadata", "mem-9", 0.5, true, "working");
        r.metadata = json!({});
        assert_eq!(r.memory_id(), "mem-9");
    }
}
