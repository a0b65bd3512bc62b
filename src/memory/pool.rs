//! Project memory pool: per-project memory ids plus their stored
//! summary embeddings, loaded lazily from the vector store.
//!
//! Pool ids are always base memory ids — the `-metadata` storage suffix is
//! normalised away at this boundary, and candidate filtering in the
//! degraded workflow compares base ids only. Pools expire on a TTL and the
//! pool map itself is LRU-bounded by project count.

use lru::LruCache;
use serde_json::Value;
use std::collections::HashSet;
use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::config::ProjectConfig;
use crate::memory::rerank::CrossEncoderReranker;
use crate::memory::types::base_memory_id;
use crate::storage::{MetadataFilter, VectorStore};

#[derive(Debug, Clone)]
struct PoolEntry {
    loaded_at: Instant,
    /// Base memory ids, suffix-normalised.
    memory_ids: HashSet<String>,
    /// Candidate-id keyed embeddings for L3 warm-up.
    embeddings: Vec<(String, Vec<f32>)>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct WarmupStats {
    pub project_id: String,
    pub memories_loaded: usize,
    pub cache_entries_added: usize,
    pub elapsed_ms: u64,
}

pub struct ProjectMemoryPool {
    vector: VectorStore,
    size_cap: usize,
    ttl: Duration,
    pools: Mutex<LruCache<String, PoolEntry>>,
}

impl ProjectMemoryPool {
    pub fn new(vector: VectorStore, config: &ProjectConfig) -> Self {
        Self {
            vector,
            size_cap: config.pool_size_cap.max(1),
            ttl: Duration::from_secs(config.pool_ttl_seconds),
            pools: Mutex::new(LruCache::new(
                NonZeroUsize::new(config.pool_project_cap.max(1)).expect("max(1) is non-zero"),
            )),
        }
    }

    /// The pool's base memory ids, loading or refreshing as needed.
    /// Empty set when the project has no memories or the load fails.
    pub fn memory_ids(&self, project_id: &str) -> HashSet<String> {
        self.entry(project_id)
            .map(|entry| entry.memory_ids)
            .unwrap_or_default()
    }

    /// Push the pool's embeddings into the reranker's semantic cache.
    /// Best-effort: failures leave the caches unchanged.
    pub fn warm_reranker(
        &self,
        reranker: &CrossEncoderReranker,
        project_id: &str,
    ) -> WarmupStats {
        let start = Instant::now();
        let mut stats = WarmupStats {
            project_id: project_id.to_string(),
            memories_loaded: 0,
            cache_entries_added: 0,
            elapsed_ms: 0,
        };

        if let Some(entry) = self.entry(project_id) {
            stats.memories_loaded = entry.memory_ids.len();
            stats.cache_entries_added = reranker.warm_semantic_cache(&entry.embeddings);
        }
        stats.elapsed_ms = start.elapsed().as_millis() as u64;

        tracing::info!(
            project_id,
            memories = stats.memories_loaded,
            cache_entries = stats.cache_entries_added,
            elapsed_ms = stats.elapsed_ms,
            "project pool warm-up"
        );
        stats
    }

    pub fn clear(&self, project_id: &str) -> bool {
        self.pools
            .lock()
            .expect("pool lock")
            .pop(project_id)
            .is_some()
    }

    pub fn stats(&self, project_id: &str) -> Option<Value> {
        let mut pools = self.pools.lock().expect("pool lock");
        pools.get(project_id).map(|entry| {
            serde_json::json!({
                "project_id": project_id,
                "memory_count": entry.memory_ids.len(),
                "age_seconds": entry.loaded_at.elapsed().as_secs(),
                "is_fresh": entry.loaded_at.elapsed() <= self.ttl,
            })
        })
    }

    fn entry(&self, project_id: &str) -> Option<PoolEntry> {
        {
            let mut pools = self.pools.lock().expect("pool lock");
            if let Some(entry) = pools.get(project_id) {
                if entry.loaded_at.elapsed() <= self.ttl {
                    return Some(entry.clone());
                }
                pools.pop(project_id);
            }
        }
        self.load(project_id)
    }

    fn load(&self, project_id: &str) -> Option<PoolEntry> {
        let filter = MetadataFilter::new()
            .eq("project_id", project_id)
            .eq("is_memory_entry", true);
        let mut records = match self.vector.list_by_metadata(&filter, true) {
            Ok(records) => records,
            Err(err) => {
                tracing::warn!(project_id, error = %err, "project pool load failed");
                return None;
            }
        };
        if records.is_empty() {
            tracing::debug!(project_id, "no memories for project");
            return None;
        }

        // Most recent first, capped per load.
        records.sort_by(|a, b| {
            let ts_a = a.metadata.get("created_at").and_then(Value::as_str).unwrap_or("");
            let ts_b = b.metadata.get("created_at").and_then(Value::as_str).unwrap_or("");
            ts_b.cmp(ts_a)
        });
        records.truncate(self.size_cap);

        let mut memory_ids = HashSet::new();
        let mut embeddings = Vec::new();
        for record in records {
            memory_ids.insert(base_memory_id(&record.id).to_string());
            if let Some(embedding) = record.embedding {
                embeddings.push((record.id, embedding));
            }
        }

        let entry = PoolEntry {
            loaded_at: Instant::now(),
            memory_ids,
            embeddings,
        };
        tracing::info!(
            project_id,
            memories = entry.memory_ids.len(),
            embeddings = entry.embeddings.len(),
            "project pool loaded"
        );

        self.pools
            .lock()
            .expect("pool lock")
            .put(project_id.to_string(), entry.clone());
        Some(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::test_support::{scripted_router, StubEmbedder};
    use serde_json::json;
    use std::sync::{Arc, Mutex as StdMutex};

    fn test_vector() -> VectorStore {
        let conn = Arc::new(StdMutex::new(crate::db::open_memory_database().unwrap()));
        VectorStore::new(conn)
    }

    fn seed_project(vector: &VectorStore, project_id: &str, count: usize) {
        for i in 0..count {
            let memory_id = format!("mem-{project_id}-{i}");
            vector
                .add(
                    &format!("{memory_id}-metadata"),
                    &StubEmbedder::embed_text(&format!("summary {i} for {project_id}")),
                    "summary",
                    &json!({
                        "memory_id": memory_id,
                        "project_id": project_id,
                        "is_memory_entry": true,
                        "created_at": format!("2026-07-{:02}T00:00:00Z", (i % 28) + 1),
                    }),
                )
                .unwrap();
        }
    }

    fn pool_config(cap: usize) -> ProjectConfig {
        ProjectConfig {
            pool_size_cap: cap,
            ..Default::default()
        }
    }

    #[test]
    fn loads_base_ids_without_suffix() {
        let vector = test_vector();
        seed_project(&vector, "alpha", 3);
        let pool = ProjectMemoryPool::new(vector, &pool_config(100));

        let ids = pool.memory_ids("alpha");
        assert_eq!(ids.len(), 3);
        assert!(ids.contains("mem-alpha-0"));
        assert!(ids.iter().all(|id| !id.ends_with("-metadata")));
    }

    #[test]
    fn empty_project_yields_empty_set() {
        let pool = ProjectMemoryPool::new(test_vector(), &pool_config(100));
        assert!(pool.memory_ids("ghost").is_empty());
        assert!(pool.stats("ghost").is_none());
    }

    #[test]
    fn load_cap_takes_most_recent() {
        let vector = test_vector();
        seed_project(&vector, "beta", 10);
        let pool = ProjectMemoryPool::new(vector, &pool_config(4));

        let ids = pool.memory_ids("beta");
        assert_eq!(ids.len(), 4);
        // seeded days 01..10; most recent four are 10, 9, 8, 7 → indices 9, 8, 7, 6
        assert!(ids.contains("mem-beta-9"));
        assert!(!ids.contains("mem-beta-0"));
    }

    #[test]
    fn pool_is_reused_until_cleared() {
        let vector = test_vector();
        seed_project(&vector, "gamma", 2);
        let pool = ProjectMemoryPool::new(vector.clone(), &pool_config(100));

        assert_eq!(pool.memory_ids("gamma").len(), 2);

        // new memory arrives but the cached pool is still fresh
        seed_project(&vector, "gamma", 3);
        assert_eq!(pool.memory_ids("gamma").len(), 2);

        assert!(pool.clear("gamma"));
        assert_eq!(pool.memory_ids("gamma").len(), 3);
    }

    #[test]
    fn warm_reranker_inserts_embeddings() {
        let vector = test_vector();
        seed_project(&vector, "delta", 3);
        let pool = ProjectMemoryPool::new(vector.clone(), &pool_config(100));

        let reranker = CrossEncoderReranker::new(
            scripted_router(vec!["0.5"]),
            vector,
            crate::config::RerankerConfig {
                cross_encoder_enabled: true,
                ..Default::default()
            },
        );

        let stats = pool.warm_reranker(&reranker, "delta");
        assert_eq!(stats.memories_loaded, 3);
        assert_eq!(stats.cache_entries_added, 3);

        // repeat warm-up adds nothing new
        let again = pool.warm_reranker(&reranker, "delta");
        assert_eq!(again.cache_entries_added, 0);
    }
}
