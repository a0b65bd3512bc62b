//! Cross-encoder reranker with a three-level cache.
//!
//! Scores (query, candidate) pairs with the local reasoner to improve
//! top-of-list ordering, blending into the rule-based combined score.
//! Lookup order, first hit wins:
//!
//! - L1 exact: `(query, project_id, candidate_id)`
//! - L2 keyword: `(sorted top-3 keyword signature, project_id, candidate_id)`
//! - L3 semantic: per-candidate stored embedding; a hit requires
//!   cosine(query, candidate) ≥ `semantic_hit_threshold`
//!
//! L3 is filled on miss-and-score and by project-pool warm-up. A warm
//! entry has no observed score yet; on hit the cosine similarity itself is
//! used, which is what makes warm-up save reasoner calls. All cache
//! operations are O(1) expected (`lru` + hashed value keys).
//!
//! Scoring calls run in parallel up to `cross_encoder_max_parallel`; when
//! the wait queue backs up, the remaining candidates keep their rule-based
//! order and the fallback is logged.

use lru::LruCache;
use serde_json::{json, Value};
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::config::RerankerConfig;
use crate::memory::keywords::query_signature;
use crate::memory::search::SearchResult;
use crate::model::{GenerateOptions, ModelRouter, TaskKind};
use crate::storage::{cosine_similarity, VectorStore};

/// L1 key: pure value type with explicit equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ExactKey {
    query: String,
    project_id: Option<String>,
    candidate_id: String,
}

/// L2 key: keyword signature instead of the raw query.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct KeywordKey {
    signature: String,
    project_id: Option<String>,
    candidate_id: String,
}

#[derive(Debug, Clone)]
struct ScoreEntry {
    score: f64,
    inserted: Instant,
}

#[derive(Debug, Clone)]
struct SemanticEntry {
    embedding: Vec<f32>,
    /// `None` until a real pair score is observed (pool warm-up path).
    score: Option<f64>,
    inserted: Instant,
}

#[derive(Default)]
struct RerankerMetrics {
    l1_hits: AtomicU64,
    l1_misses: AtomicU64,
    l2_hits: AtomicU64,
    l2_misses: AtomicU64,
    l3_hits: AtomicU64,
    l3_misses: AtomicU64,
    pairs_scored: AtomicU64,
    score_failures: AtomicU64,
    score_latency_total_ms: AtomicU64,
    score_latency_max_ms: AtomicU64,
    backpressure_skips: AtomicU64,
    prefetch_requests: AtomicU64,
    prefetch_hits: AtomicU64,
    prefetch_misses: AtomicU64,
    warm_entries_added: AtomicU64,
}

pub struct CrossEncoderReranker {
    router: Arc<ModelRouter>,
    vector: VectorStore,
    config: RerankerConfig,
    ttl: Duration,
    l1: Mutex<LruCache<ExactKey, ScoreEntry>>,
    l2: Mutex<LruCache<KeywordKey, ScoreEntry>>,
    l3: Mutex<LruCache<String, SemanticEntry>>,
    semaphore: Arc<Semaphore>,
    waiting: AtomicUsize,
    metrics: RerankerMetrics,
}

enum CacheOutcome {
    Hit(f64),
    Miss,
}

impl CrossEncoderReranker {
    pub fn new(router: Arc<ModelRouter>, vector: VectorStore, config: RerankerConfig) -> Self {
        let capacity = NonZeroUsize::new(config.cross_encoder_cache_size.max(1))
            .expect("max(1) is non-zero");
        let max_parallel = config.cross_encoder_max_parallel.max(1);
        Self {
            ttl: Duration::from_secs(config.cross_encoder_cache_ttl_seconds),
            l1: Mutex::new(LruCache::new(capacity)),
            l2: Mutex::new(LruCache::new(capacity)),
            l3: Mutex::new(LruCache::new(capacity)),
            semaphore: Arc::new(Semaphore::new(max_parallel)),
            waiting: AtomicUsize::new(0),
            metrics: RerankerMetrics::default(),
            router,
            vector,
            config,
        }
    }

    pub fn enabled(&self) -> bool {
        self.config.cross_encoder_enabled
    }

    /// Cumulative count of failed pair scorings; callers diff this around a
    /// search to know whether the ordering degraded to rule-based.
    pub fn score_failure_count(&self) -> u64 {
        self.metrics.score_failures.load(Ordering::Relaxed)
    }

    /// Rerank the top slice of `results`. Each scored candidate receives a
    /// `rerank_score` and a blended final score; the rest pass through.
    pub async fn rerank(
        self: &Arc<Self>,
        query: &str,
        query_embedding: &[f32],
        project_id: Option<&str>,
        mut results: Vec<SearchResult>,
        prefetch: bool,
    ) -> Vec<SearchResult> {
        if !self.enabled() || results.is_empty() || query.trim().is_empty() {
            return results;
        }

        let top_k = self.config.cross_encoder_top_k.min(results.len());
        let signature = query_signature(query);
        let mut tasks: JoinSet<(usize, Option<f64>)> = JoinSet::new();
        let mut skipped = false;

        for index in 0..top_k {
            let candidate = &results[index];
            if prefetch {
                self.metrics.prefetch_requests.fetch_add(1, Ordering::Relaxed);
            }

            match self.cache_lookup(query, &signature, query_embedding, project_id, candidate) {
                CacheOutcome::Hit(score) => {
                    if prefetch {
                        self.metrics.prefetch_hits.fetch_add(1, Ordering::Relaxed);
                    }
                    apply_rerank_score(&mut results[index], score, self.config.blend_weight);
                }
                CacheOutcome::Miss => {
                    if prefetch {
                        self.metrics.prefetch_misses.fetch_add(1, Ordering::Relaxed);
                    }
                    if skipped {
                        continue;
                    }
                    // Back-pressure: a saturated wait queue degrades the
                    // remaining candidates to rule-based order.
                    let queue_limit = self.config.cross_encoder_max_parallel.max(1) * 2;
                    if self.semaphore.available_permits() == 0
                        && self.waiting.load(Ordering::Relaxed) >= queue_limit
                    {
                        self.metrics
                            .backpressure_skips
                            .fetch_add(1, Ordering::Relaxed);
                        tracing::warn!(
                            "cross-encoder queue saturated, keeping rule-based order for remaining candidates"
                        );
                        skipped = true;
                        continue;
                    }

                    let reranker = Arc::clone(self);
                    let query = query.to_string();
                    let signature = signature.clone();
                    let project_id = project_id.map(String::from);
                    let candidate_id = candidate.id.clone();
                    let content = candidate.content.clone();
                    tasks.spawn(async move {
                        let score = reranker
                            .score_pair(&query, &signature, project_id, &candidate_id, &content)
                            .await;
                        (index, score)
                    });
                }
            }
        }

        while let Some(joined) = tasks.join_next().await {
            if let Ok((index, Some(score))) = joined {
                apply_rerank_score(&mut results[index], score, self.config.blend_weight);
            }
        }

        results
    }

    fn cache_lookup(
        &self,
        query: &str,
        signature: &str,
        query_embedding: &[f32],
        project_id: Option<&str>,
        candidate: &SearchResult,
    ) -> CacheOutcome {
        let now = Instant::now();

        // L1 exact
        let exact_key = ExactKey {
            query: query.to_string(),
            project_id: project_id.map(String::from),
            candidate_id: candidate.id.clone(),
        };
        {
            let mut l1 = self.l1.lock().expect("l1 lock");
            let cached = l1.get(&exact_key).map(|e| (e.score, e.inserted));
            match cached {
                Some((score, inserted)) if now.duration_since(inserted) <= self.ttl => {
                    self.metrics.l1_hits.fetch_add(1, Ordering::Relaxed);
                    return CacheOutcome::Hit(score);
                }
                Some(_) => {
                    l1.pop(&exact_key);
                }
                None => {}
            }
        }
        self.metrics.l1_misses.fetch_add(1, Ordering::Relaxed);

        // L2 keyword signature
        if !signature.is_empty() {
            let keyword_key = KeywordKey {
                signature: signature.to_string(),
                project_id: project_id.map(String::from),
                candidate_id: candidate.id.clone(),
            };
            let hit = {
                let mut l2 = self.l2.lock().expect("l2 lock");
                let cached = l2.get(&keyword_key).map(|e| (e.score, e.inserted));
                match cached {
                    Some((score, inserted)) if now.duration_since(inserted) <= self.ttl => {
                        Some(score)
                    }
                    Some(_) => {
                        l2.pop(&keyword_key);
                        None
                    }
                    None => None,
                }
            };
            if let Some(score) = hit {
                self.metrics.l2_hits.fetch_add(1, Ordering::Relaxed);
                self.store_l1(query, project_id, &candidate.id, score);
                return CacheOutcome::Hit(score);
            }
        }
        self.metrics.l2_misses.fetch_add(1, Ordering::Relaxed);

        // L3 semantic
        let semantic = {
            let mut l3 = self.l3.lock().expect("l3 lock");
            let cached = l3
                .get(&candidate.id)
                .map(|e| (e.embedding.clone(), e.score, e.inserted));
            match cached {
                Some((embedding, score, inserted))
                    if now.duration_since(inserted) <= self.ttl =>
                {
                    Some((embedding, score))
                }
                Some(_) => {
                    l3.pop(&candidate.id);
                    None
                }
                None => None,
            }
        };
        if let Some((embedding, stored_score)) = semantic {
            let cosine = cosine_similarity(query_embedding, &embedding);
            if cosine >= self.config.semantic_hit_threshold {
                // A warm entry has no observed score; the cosine itself is
                // the relevance estimate.
                let score = stored_score.unwrap_or(cosine);
                self.metrics.l3_hits.fetch_add(1, Ordering::Relaxed);
                self.store_l1(query, project_id, &candidate.id, score);
                self.store_l2(signature, project_id, &candidate.id, score);
                return CacheOutcome::Hit(score);
            }
        }
        self.metrics.l3_misses.fetch_add(1, Ordering::Relaxed);

        CacheOutcome::Miss
    }

    /// Score one (query, candidate) pair with the reasoner and fill all
    /// three cache levels. Returns `None` on failure (degrade, don't fail).
    async fn score_pair(
        &self,
        query: &str,
        signature: &str,
        project_id: Option<String>,
        candidate_id: &str,
        content: &str,
    ) -> Option<f64> {
        self.waiting.fetch_add(1, Ordering::Relaxed);
        let permit = self.semaphore.acquire().await;
        self.waiting.fetch_sub(1, Ordering::Relaxed);
        let _permit = permit.ok()?;

        let prompt = build_score_prompt(query, content);
        let opts = GenerateOptions::default().with_max_tokens(20);
        let start = Instant::now();
        let result = self
            .router
            .generate(TaskKind::CrossEncoderScore, &prompt, &opts, None)
            .await;
        let elapsed_ms = start.elapsed().as_millis() as u64;
        self.metrics
            .score_latency_total_ms
            .fetch_add(elapsed_ms, Ordering::Relaxed);
        self.metrics
            .score_latency_max_ms
            .fetch_max(elapsed_ms, Ordering::Relaxed);

        let score = match result.map(|raw| parse_score(&raw)) {
            Ok(Some(score)) => score,
            Ok(None) => {
                self.metrics.score_failures.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(candidate_id, "cross-encoder output unparseable");
                return None;
            }
            Err(err) => {
                self.metrics.score_failures.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(candidate_id, error = %err, "cross-encoder scoring failed");
                return None;
            }
        };

        self.metrics.pairs_scored.fetch_add(1, Ordering::Relaxed);
        let project_id = project_id.as_deref();
        self.store_l1(query, project_id, candidate_id, score);
        self.store_l2(signature, project_id, candidate_id, score);
        self.store_l3_scored(candidate_id, score);
        Some(score)
    }

    fn store_l1(&self, query: &str, project_id: Option<&str>, candidate_id: &str, score: f64) {
        let mut l1 = self.l1.lock().expect("l1 lock");
        l1.put(
            ExactKey {
                query: query.to_string(),
                project_id: project_id.map(String::from),
                candidate_id: candidate_id.to_string(),
            },
            ScoreEntry {
                score,
                inserted: Instant::now(),
            },
        );
    }

    fn store_l2(&self, signature: &str, project_id: Option<&str>, candidate_id: &str, score: f64) {
        if signature.is_empty() {
            return;
        }
        let mut l2 = self.l2.lock().expect("l2 lock");
        l2.put(
            KeywordKey {
                signature: signature.to_string(),
                project_id: project_id.map(String::from),
                candidate_id: candidate_id.to_string(),
            },
            ScoreEntry {
                score,
                inserted: Instant::now(),
            },
        );
    }

    /// L3 fill on miss-and-score: the candidate's stored embedding (summary
    /// embedding for metadata entries, chunk embedding otherwise) plus the
    /// observed score.
    fn store_l3_scored(&self, candidate_id: &str, score: f64) {
        let embedding = match self.vector.get_embedding(candidate_id) {
            Ok(Some(embedding)) => embedding,
            _ => return,
        };
        let mut l3 = self.l3.lock().expect("l3 lock");
        l3.put(
            candidate_id.to_string(),
            SemanticEntry {
                embedding,
                score: Some(score),
                inserted: Instant::now(),
            },
        );
    }

    /// Project-pool warm-up path: insert candidate embeddings without an
    /// observed score. Existing scored entries are not downgraded.
    pub fn warm_semantic_cache(&self, embeddings: &[(String, Vec<f32>)]) -> usize {
        let mut l3 = self.l3.lock().expect("l3 lock");
        let mut added = 0;
        for (candidate_id, embedding) in embeddings {
            if l3.contains(candidate_id) {
                continue;
            }
            l3.put(
                candidate_id.clone(),
                SemanticEntry {
                    embedding: embedding.clone(),
                    score: None,
                    inserted: Instant::now(),
                },
            );
            added += 1;
        }
        self.metrics
            .warm_entries_added
            .fetch_add(added as u64, Ordering::Relaxed);
        added
    }

    pub fn metrics_snapshot(&self) -> Value {
        let m = &self.metrics;
        let pairs = m.pairs_scored.load(Ordering::Relaxed);
        let total_ms = m.score_latency_total_ms.load(Ordering::Relaxed);
        json!({
            "enabled": self.enabled(),
            "l1_hits": m.l1_hits.load(Ordering::Relaxed),
            "l1_misses": m.l1_misses.load(Ordering::Relaxed),
            "l2_hits": m.l2_hits.load(Ordering::Relaxed),
            "l2_misses": m.l2_misses.load(Ordering::Relaxed),
            "l3_hits": m.l3_hits.load(Ordering::Relaxed),
            "l3_misses": m.l3_misses.load(Ordering::Relaxed),
            "pairs_scored": pairs,
            "score_failures": m.score_failures.load(Ordering::Relaxed),
            "avg_score_latency_ms": if pairs > 0 { total_ms as f64 / pairs as f64 } else { 0.0 },
            "max_score_latency_ms": m.score_latency_max_ms.load(Ordering::Relaxed),
            "queue_length": self.waiting.load(Ordering::Relaxed),
            "backpressure_skips": m.backpressure_skips.load(Ordering::Relaxed),
            "prefetch_requests": m.prefetch_requests.load(Ordering::Relaxed),
            "prefetch_hits": m.prefetch_hits.load(Ordering::Relaxed),
            "prefetch_misses": m.prefetch_misses.load(Ordering::Relaxed),
            "warm_entries_added": m.warm_entries_added.load(Ordering::Relaxed),
            "l1_entries": self.l1.lock().expect("l1 lock").len(),
            "l2_entries": self.l2.lock().expect("l2 lock").len(),
            "l3_entries": self.l3.lock().expect("l3 lock").len(),
        })
    }
}

fn apply_rerank_score(result: &mut SearchResult, rerank_score: f64, blend_weight: f64) {
    result.rerank_score = Some(rerank_score);
    result.score =
        ((1.0 - blend_weight) * result.combined_score + blend_weight * rerank_score).clamp(0.0, 1.0);
}

fn build_score_prompt(query: &str, content: &str) -> String {
    let truncated: String = content.chars().take(2000).collect();
    format!(
        "You are a reranker that scores how well a retrieved passage answers a query.\n\
         Return only a floating-point number between 0.0 (irrelevant) and 1.0 (perfect match).\n\
         Query:\n{query}\n\nCandidate Passage:\n{truncated}\n\nScore (0.0-1.0):"
    )
}

/// Parse the model's score output: first token as a float, rejected when
/// wildly out of range, clamped into [0, 1].
fn parse_score(raw: &str) -> Option<f64> {
    let first = raw.trim().split_whitespace().next()?;
    let score: f64 = first.trim_matches(|c: char| !c.is_ascii_digit() && c != '.' && c != '-')
        .parse()
        .ok()?;
    if !(0.0..=1.5).contains(&score) {
        return None;
    }
    Some(score.clamp(0.0, 1.0))
}
