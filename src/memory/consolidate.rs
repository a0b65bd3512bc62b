//! Consolidation: the scheduled lifecycle pass.
//!
//! Order inside one pass: migrate working memories → cluster short-term
//! summary embeddings → compress non-representatives → forget old and
//! unimportant → orphan sweep → persist stats and `last_consolidation`.
//! The pass holds the consolidation gate exclusively so ingestion and
//! deletion never observe half-migrated state; searches read a consistent
//! snapshot either side of the pass. Steps are idempotent: a second run
//! with no intervening ingestion migrates, compresses, forgets, and sweeps
//! nothing.
//!
//! Compression runs before forgetting, never interleaved: a compressed
//! member loses its chunks in both indexes but keeps its metadata entry;
//! forgetting a representative carries its compressed peers with it.

use chrono::{DateTime, Duration, Utc};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::config::ConsolidationConfig;
use crate::error::{OrchestratorError, Result};
use crate::memory::indexer::Indexer;
use crate::memory::types::{base_memory_id, parse_timestamp};
use crate::storage::{cosine_similarity, MetadataFilter, VecRecord};

/// Forget exemptions: heavily used or recently touched memories survive.
const EXEMPT_ACCESS_COUNT: u64 = 10;
const EXEMPT_RECENT_ACCESS_DAYS: i64 = 7;

/// Importance added to a representative per absorbed peer.
const REPRESENTATIVE_BOOST: f64 = 0.05;

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct ConsolidationStats {
    pub migrated: usize,
    pub promoted_long_term: usize,
    pub clusters_formed: usize,
    pub representatives: usize,
    pub compressed: usize,
    pub forgotten: usize,
    pub orphans_removed: usize,
    pub duration_ms: u64,
}

pub struct ConsolidationService {
    indexer: Indexer,
    config: ConsolidationConfig,
    gate: Arc<RwLock<()>>,
    last_run_path: PathBuf,
}

impl ConsolidationService {
    pub fn new(
        indexer: Indexer,
        config: ConsolidationConfig,
        gate: Arc<RwLock<()>>,
        last_run_path: PathBuf,
    ) -> Self {
        Self {
            indexer,
            config,
            gate,
            last_run_path,
        }
    }

    /// Run the full pass under the exclusive gate.
    pub async fn consolidate(&self) -> Result<ConsolidationStats> {
        let _guard = self.gate.write().await;
        let started = std::time::Instant::now();
        tracing::info!("consolidation starting");

        let mut stats = ConsolidationStats::default();

        self.migrate(&mut stats)
            .map_err(|e| OrchestratorError::Consolidation(e.to_string()))?;
        let clusters = self
            .cluster(&mut stats)
            .map_err(|e| OrchestratorError::Consolidation(e.to_string()))?;
        self.compress(clusters, &mut stats)
            .map_err(|e| OrchestratorError::Consolidation(e.to_string()))?;
        self.forget(&mut stats)
            .map_err(|e| OrchestratorError::Consolidation(e.to_string()))?;
        self.orphan_sweep(&mut stats)
            .map_err(|e| OrchestratorError::Consolidation(e.to_string()))?;

        stats.duration_ms = started.elapsed().as_millis() as u64;
        // Only a completed pass advances the timestamp; a failed pass
        // leaves it unchanged so the next startup retries.
        self.write_last_run(Utc::now());

        tracing::info!(
            migrated = stats.migrated,
            clusters = stats.clusters_formed,
            compressed = stats.compressed,
            forgotten = stats.forgotten,
            orphans = stats.orphans_removed,
            duration_ms = stats.duration_ms,
            "consolidation finished"
        );
        Ok(stats)
    }

    /// Step 1: Working older than the retention window → ShortTerm, and
    /// ShortTerm with importance over the long-term threshold → LongTerm.
    fn migrate(&self, stats: &mut ConsolidationStats) -> anyhow::Result<()> {
        let cutoff = Utc::now() - Duration::hours(self.config.working_retention_hours);

        let working = self.entries(&MetadataFilter::new().eq("tier", "working"), false)?;
        for record in working {
            let Some(memory_id) = record_memory_id(&record) else {
                continue;
            };
            // Retention clock runs from creation time.
            let Some(created) = record_timestamp(&record, "created_at") else {
                continue;
            };
            if created > cutoff {
                continue;
            }
            let now_iso = Utc::now().to_rfc3339();
            self.indexer.update_metadata(
                &memory_id,
                &json!({"tier": "short_term", "migrated_at": now_iso}),
            )?;
            stats.migrated += 1;
        }

        let short_term = self.entries(&MetadataFilter::new().eq("tier", "short_term"), false)?;
        for record in short_term {
            let Some(memory_id) = record_memory_id(&record) else {
                continue;
            };
            let importance = record_f64(&record, "importance").unwrap_or(0.5);
            if importance >= self.config.long_term_threshold {
                self.indexer
                    .update_metadata(&memory_id, &json!({"tier": "long_term"}))?;
                stats.promoted_long_term += 1;
            }
        }
        Ok(())
    }

    /// Step 2: greedy clustering of short-term summary embeddings.
    /// Compressed members never re-cluster.
    fn cluster(&self, stats: &mut ConsolidationStats) -> anyhow::Result<Vec<Vec<String>>> {
        let records = self.entries(&MetadataFilter::new().eq("tier", "short_term"), true)?;

        let members: Vec<(String, Vec<f32>)> = records
            .iter()
            .filter(|r| r.metadata.get("is_compressed") != Some(&Value::Bool(true)))
            .filter_map(|r| {
                let memory_id = record_memory_id(r)?;
                let embedding = r.embedding.clone()?;
                Some((memory_id, embedding))
            })
            .collect();

        let mut visited: HashSet<usize> = HashSet::new();
        let mut clusters: Vec<Vec<String>> = Vec::new();

        for i in 0..members.len() {
            if visited.contains(&i) {
                continue;
            }
            visited.insert(i);
            let mut cluster = vec![members[i].0.clone()];
            for j in (i + 1)..members.len() {
                if visited.contains(&j) {
                    continue;
                }
                let similarity = cosine_similarity(&members[i].1, &members[j].1);
                if similarity >= self.config.cluster_similarity_threshold {
                    visited.insert(j);
                    cluster.push(members[j].0.clone());
                }
            }
            if cluster.len() >= self.config.min_cluster_size {
                clusters.push(cluster);
            }
        }

        stats.clusters_formed = clusters.len();
        Ok(clusters)
    }

    /// Step 3: choose a representative per cluster, boost it, compress the
    /// rest (content rewritten to a reference + delta summary, chunks
    /// dropped from both indexes, metadata entry kept).
    fn compress(
        &self,
        clusters: Vec<Vec<String>>,
        stats: &mut ConsolidationStats,
    ) -> anyhow::Result<()> {
        for cluster in clusters {
            let Some(representative) = self.select_representative(&cluster)? else {
                continue;
            };
            stats.representatives += 1;

            let cluster_id = format!("cluster-{representative}");
            let boost = REPRESENTATIVE_BOOST * (cluster.len() - 1) as f64;
            let rep_importance = self
                .entry_record(&representative)?
                .as_ref()
                .and_then(|r| record_f64(r, "importance"))
                .unwrap_or(0.5);
            self.indexer.update_metadata(
                &representative,
                &json!({
                    "cluster_id": cluster_id,
                    "is_representative": true,
                    "cluster_size": cluster.len(),
                    "importance": (rep_importance + boost).min(1.0),
                }),
            )?;

            for member in &cluster {
                if member == &representative {
                    continue;
                }
                let Some(record) = self.entry_record(member)? else {
                    continue;
                };
                if record.metadata.get("is_compressed") == Some(&Value::Bool(true)) {
                    continue;
                }
                let delta = record
                    .document
                    .lines()
                    .next()
                    .unwrap_or_default()
                    .to_string();
                self.indexer.delete_chunks(member)?;
                self.indexer.update_metadata(
                    member,
                    &json!({
                        "is_compressed": true,
                        "compressed_into": representative,
                        "compressed_at": Utc::now().to_rfc3339(),
                        "cluster_id": cluster_id,
                        "content": format!("Consolidated into {representative}. {delta}"),
                    }),
                )?;
                stats.compressed += 1;
            }
        }
        Ok(())
    }

    /// Representative = max of detail + recency + importance; ties break
    /// by newer timestamp, then lexicographic memory id.
    fn select_representative(&self, cluster: &[String]) -> anyhow::Result<Option<String>> {
        let mut scored: Vec<(f64, DateTime<Utc>, String)> = Vec::new();
        for memory_id in cluster {
            let Some(record) = self.entry_record(memory_id)? else {
                continue;
            };
            let content_len = record
                .metadata
                .get("content")
                .and_then(Value::as_str)
                .map(str::len)
                .unwrap_or(0) as f64;
            let created = record_timestamp(&record, "created_at").unwrap_or_else(Utc::now);
            let age_days = (Utc::now() - created).num_days().max(0) as f64;
            let recency = 1.0 / (1.0 + age_days);
            let importance = record_f64(&record, "importance").unwrap_or(0.5);

            let score = content_len * 0.5 + recency * 1000.0 * 0.3 + importance * 1000.0 * 0.2;
            scored.push((score, created, memory_id.clone()));
        }

        scored.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.1.cmp(&a.1))
                .then_with(|| a.2.cmp(&b.2))
        });
        Ok(scored.into_iter().next().map(|(_, _, id)| id))
    }

    /// Step 4: delete memories past the age threshold with importance
    /// below the floor, unless heavily or recently accessed. A forgotten
    /// representative takes its compressed peers with it.
    fn forget(&self, stats: &mut ConsolidationStats) -> anyhow::Result<()> {
        let cutoff = Utc::now() - Duration::days(self.config.age_threshold_days);
        let entries = self.entries(&MetadataFilter::new(), false)?;
        let mut deleted: HashSet<String> = HashSet::new();

        for record in &entries {
            let Some(memory_id) = record_memory_id(record) else {
                continue;
            };
            if deleted.contains(&memory_id) {
                continue;
            }

            let importance = record_f64(record, "importance").unwrap_or(0.5);
            if importance >= self.config.importance_threshold {
                continue;
            }
            let Some(created) = record_timestamp(record, "created_at") else {
                continue;
            };
            if created > cutoff {
                continue;
            }
            if is_exempt(record) {
                continue;
            }

            if record.metadata.get("is_representative") == Some(&Value::Bool(true)) {
                for peer in &entries {
                    let Some(peer_id) = record_memory_id(peer) else {
                        continue;
                    };
                    if peer.metadata.get("compressed_into").and_then(Value::as_str)
                        == Some(memory_id.as_str())
                        && deleted.insert(peer_id.clone())
                    {
                        self.indexer.delete_by_memory_id(&peer_id)?;
                        stats.forgotten += 1;
                    }
                }
            }

            if deleted.insert(memory_id.clone()) {
                self.indexer.delete_by_memory_id(&memory_id)?;
                stats.forgotten += 1;
            }
        }
        Ok(())
    }

    /// Step 5: reconcile the two indexes. Chunks (in either index) whose
    /// memory no longer has a metadata entry go away; chunkless
    /// uncompressed metadata entries go away too.
    fn orphan_sweep(&self, stats: &mut ConsolidationStats) -> anyhow::Result<()> {
        let entry_ids: HashSet<String> = self
            .entries(&MetadataFilter::new(), false)?
            .iter()
            .filter_map(record_memory_id)
            .collect();

        // Vector-side chunk orphans (crash between V and L writes).
        let vector_chunks = self
            .indexer
            .vector()
            .list_by_metadata(&MetadataFilter::new().eq("is_memory_entry", false), false)?;
        let mut chunked_memories: HashSet<String> = HashSet::new();
        for chunk in vector_chunks {
            let memory_id = chunk
                .metadata
                .get("memory_id")
                .and_then(Value::as_str)
                .map(String::from)
                .unwrap_or_else(|| base_memory_id(&chunk.id).to_string());
            if entry_ids.contains(&memory_id) {
                chunked_memories.insert(memory_id);
            } else {
                self.indexer.vector().delete(&chunk.id)?;
                self.indexer.lexical().delete_chunk(&chunk.id)?;
                stats.orphans_removed += 1;
            }
        }

        // Lexical-side chunk orphans.
        for (chunk_id, memory_id) in self.indexer.lexical().list_chunk_ids()? {
            if !entry_ids.contains(&memory_id) {
                self.indexer.lexical().delete_chunk(&chunk_id)?;
                stats.orphans_removed += 1;
            }
        }

        // Chunkless metadata entries, unless compressed.
        for record in self.entries(&MetadataFilter::new(), false)? {
            let Some(memory_id) = record_memory_id(&record) else {
                continue;
            };
            if record.metadata.get("is_compressed") == Some(&Value::Bool(true)) {
                continue;
            }
            if !chunked_memories.contains(&memory_id) {
                self.indexer
                    .vector()
                    .delete(&crate::memory::types::entry_id(&memory_id))?;
                stats.orphans_removed += 1;
            }
        }
        Ok(())
    }

    fn entries(
        &self,
        extra: &MetadataFilter,
        include_embeddings: bool,
    ) -> anyhow::Result<Vec<VecRecord>> {
        self.indexer.vector().list_by_metadata(
            &extra.clone().eq("is_memory_entry", true),
            include_embeddings,
        )
    }

    fn entry_record(&self, memory_id: &str) -> anyhow::Result<Option<VecRecord>> {
        self.indexer
            .vector()
            .get(&crate::memory::types::entry_id(memory_id))
    }

    /// Timestamp of the last completed pass, from the sidecar file.
    pub fn last_run(&self) -> Option<DateTime<Utc>> {
        let raw = std::fs::read_to_string(&self.last_run_path).ok()?;
        parse_timestamp(raw.trim())
    }

    fn write_last_run(&self, at: DateTime<Utc>) {
        if let Some(parent) = self.last_run_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        if let Err(err) = std::fs::write(&self.last_run_path, at.to_rfc3339()) {
            tracing::warn!(error = %err, "failed to persist last_consolidation");
        }
    }

    /// Startup catch-up: run when the last completed pass is missing or
    /// older than 24 hours.
    pub fn needs_catchup(&self) -> bool {
        match self.last_run() {
            Some(last) => Utc::now() - last > Duration::hours(24),
            None => true,
        }
    }
}

fn is_exempt(record: &VecRecord) -> bool {
    let access_count = record
        .metadata
        .get("access_count")
        .and_then(Value::as_u64)
        .unwrap_or(0);
    if access_count >= EXEMPT_ACCESS_COUNT {
        return true;
    }
    if let Some(last_accessed) = record_timestamp(record, "last_accessed") {
        if Utc::now() - last_accessed < Duration::days(EXEMPT_RECENT_ACCESS_DAYS) {
            return true;
        }
    }
    false
}

fn record_memory_id(record: &VecRecord) -> Option<String> {
    record
        .metadata
        .get("memory_id")
        .and_then(Value::as_str)
        .map(String::from)
        .or_else(|| Some(base_memory_id(&record.id).to_string()))
}

fn record_timestamp(record: &VecRecord, key: &str) -> Option<DateTime<Utc>> {
    record
        .metadata
        .get(key)
        .and_then(Value::as_str)
        .and_then(parse_timestamp)
}

fn record_f64(record: &VecRecord, key: &str) -> Option<f64> {
    record.metadata.get(key).and_then(Value::as_f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::test_support::StubEmbedder;
    use crate::storage::{LexicalIndex, VectorStore};
    use std::sync::Mutex;

    fn service(config: ConsolidationConfig) -> (ConsolidationService, Indexer, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let conn = Arc::new(Mutex::new(crate::db::open_memory_database().unwrap()));
        let indexer = Indexer::new(VectorStore::new(conn.clone()), LexicalIndex::new(conn));
        let svc = ConsolidationService::new(
            indexer.clone(),
            config,
            Arc::new(RwLock::new(())),
            dir.path().join("last_consolidation"),
        );
        (svc, indexer, dir)
    }

    /// Insert a memory entry plus one chunk directly through the adapters.
    #[allow(clippy::too_many_arguments)]
    fn seed_memory(
        indexer: &Indexer,
        memory_id: &str,
        summary_text: &str,
        tier: &str,
        age_days: i64,
        importance: f64,
        access_count: u64,
        last_accessed_days_ago: Option<i64>,
    ) {
        let created = (Utc::now() - Duration::days(age_days)).to_rfc3339();
        let mut metadata = json!({
            "memory_id": memory_id,
            "is_memory_entry": true,
            "tier": tier,
            "schema": "Process",
            "created_at": created,
            "importance": importance,
            "strength": 0.5,
            "access_count": access_count,
            "content": format!("content of {memory_id}: {summary_text}"),
            "refs_count": 0,
        });
        if let Some(days) = last_accessed_days_ago {
            metadata["last_accessed"] = json!((Utc::now() - Duration::days(days)).to_rfc3339());
        }
        indexer
            .vector()
            .add(
                &format!("{memory_id}-metadata"),
                &StubEmbedder::embed_text(summary_text),
                summary_text,
                &metadata,
            )
            .unwrap();

        indexer
            .vector()
            .add(
                &format!("{memory_id}#0"),
                &StubEmbedder::embed_text(&format!("chunk {summary_text}")),
                &format!("chunk of {memory_id}"),
                &json!({
                    "memory_id": memory_id,
                    "chunk_index": 0,
                    "is_memory_entry": false,
                    "tier": tier,
                    "created_at": created,
                }),
            )
            .unwrap();
        indexer
            .lexical()
            .add_batch(&[(
                format!("{memory_id}#0"),
                memory_id.to_string(),
                format!("chunk of {memory_id}"),
            )])
            .unwrap();
    }

    fn entry_metadata(indexer: &Indexer, memory_id: &str) -> Option<Value> {
        indexer
            .vector()
            .get(&format!("{memory_id}-metadata"))
            .unwrap()
            .map(|r| r.metadata)
    }

    #[tokio::test]
    async fn migrates_old_working_memories() {
        let (svc, indexer, _dir) = service(ConsolidationConfig::default());
        seed_memory(&indexer, "mem-old", "old working", "working", 1, 0.5, 0, None);
        seed_memory(&indexer, "mem-new", "fresh working", "working", 0, 0.5, 0, None);

        let stats = svc.consolidate().await.unwrap();
        assert_eq!(stats.migrated, 1);
        assert_eq!(
            entry_metadata(&indexer, "mem-old").unwrap()["tier"],
            "short_term"
        );
        assert_eq!(
            entry_metadata(&indexer, "mem-new").unwrap()["tier"],
            "working"
        );
    }

    #[tokio::test]
    async fn promotes_important_short_term_to_long_term() {
        let (svc, indexer, _dir) = service(ConsolidationConfig::default());
        seed_memory(&indexer, "mem-vip", "important", "short_term", 2, 0.9, 0, None);

        let stats = svc.consolidate().await.unwrap();
        assert_eq!(stats.promoted_long_term, 1);
        assert_eq!(
            entry_metadata(&indexer, "mem-vip").unwrap()["tier"],
            "long_term"
        );
    }

    #[tokio::test]
    async fn clusters_and_compresses_similar_memories() {
        let (svc, indexer, _dir) = service(ConsolidationConfig::default());
        // identical summary text → identical stub embeddings → cosine 1.0
        for i in 0..3 {
            seed_memory(
                &indexer,
                &format!("mem-sim-{i}"),
                "database migration rollback runbook",
                "short_term",
                2,
                0.5,
                0,
                None,
            );
        }
        seed_memory(&indexer, "mem-other", "totally different topic entirely", "short_term", 2, 0.5, 0, None);

        let stats = svc.consolidate().await.unwrap();
        assert_eq!(stats.clusters_formed, 1);
        assert_eq!(stats.representatives, 1);
        assert_eq!(stats.compressed, 2);

        let compressed: Vec<bool> = (0..3)
            .map(|i| {
                entry_metadata(&indexer, &format!("mem-sim-{i}")).unwrap()["is_compressed"]
                    == json!(true)
            })
            .collect();
        assert_eq!(compressed.iter().filter(|c| **c).count(), 2);

        // compressed members keep their metadata entry, lose their chunks
        for i in 0..3 {
            let id = format!("mem-sim-{i}");
            let meta = entry_metadata(&indexer, &id).unwrap();
            if meta["is_compressed"] == json!(true) {
                assert!(indexer.vector().get(&format!("{id}#0")).unwrap().is_none());
                assert!(meta["content"]
                    .as_str()
                    .unwrap()
                    .starts_with("Consolidated into "));
            } else {
                assert_eq!(meta["is_representative"], json!(true));
                // importance boosted by 0.05 per absorbed peer
                assert!(meta["importance"].as_f64().unwrap() > 0.5);
            }
        }
    }

    #[tokio::test]
    async fn forgets_old_unimportant_memories() {
        let (svc, indexer, _dir) = service(ConsolidationConfig::default());
        seed_memory(&indexer, "mem-doomed", "stale and unimportant", "short_term", 40, 0.1, 0, None);
        seed_memory(&indexer, "mem-keeper", "old but important", "short_term", 40, 0.9, 0, None);
        seed_memory(&indexer, "mem-young", "young and unimportant", "short_term", 2, 0.1, 0, None);

        let stats = svc.consolidate().await.unwrap();
        assert_eq!(stats.forgotten, 1);
        assert!(entry_metadata(&indexer, "mem-doomed").is_none());
        assert!(entry_metadata(&indexer, "mem-keeper").is_some());
        assert!(entry_metadata(&indexer, "mem-young").is_some());
    }

    #[tokio::test]
    async fn forget_exempts_heavily_and_recently_accessed() {
        let (svc, indexer, _dir) = service(ConsolidationConfig::default());
        seed_memory(&indexer, "mem-hot", "old but heavily used", "short_term", 40, 0.1, 25, None);
        seed_memory(&indexer, "mem-warm", "old but recently read", "short_term", 40, 0.1, 0, Some(2));

        let stats = svc.consolidate().await.unwrap();
        assert_eq!(stats.forgotten, 0);
        assert!(entry_metadata(&indexer, "mem-hot").is_some());
        assert!(entry_metadata(&indexer, "mem-warm").is_some());
    }

    #[tokio::test]
    async fn compress_runs_before_forget_and_carries_the_cluster() {
        // Scenario: a pile of near-identical stale memories. Compression
        // picks a representative and boosts it; the boosted representative
        // survives the forget step while unboosted peers are forgotten.
        let (svc, indexer, _dir) = service(ConsolidationConfig::default());
        for i in 0..10 {
            seed_memory(
                &indexer,
                &format!("mem-c-{i}"),
                "identical incident about egress timeouts",
                "short_term",
                31,
                0.1,
                0,
                None,
            );
        }
        seed_memory(&indexer, "mem-lone", "unrelated lonely memory", "short_term", 31, 0.1, 0, None);

        let stats = svc.consolidate().await.unwrap();
        assert_eq!(stats.clusters_formed, 1);
        assert_eq!(stats.compressed, 9);
        // 9 * 0.05 boost lifts the representative past the 0.3 floor; the
        // 9 compressed peers and the lone memory are forgotten.
        assert_eq!(stats.forgotten, 10);

        let survivors: Vec<String> = (0..10)
            .map(|i| format!("mem-c-{i}"))
            .filter(|id| entry_metadata(&indexer, id).is_some())
            .collect();
        assert_eq!(survivors.len(), 1);
        let rep_meta = entry_metadata(&indexer, &survivors[0]).unwrap();
        assert_eq!(rep_meta["is_representative"], json!(true));
        assert!(entry_metadata(&indexer, "mem-lone").is_none());
    }

    #[tokio::test]
    async fn orphan_sweep_reconciles_both_indexes() {
        let (svc, indexer, _dir) = service(ConsolidationConfig::default());
        seed_memory(&indexer, "mem-ok", "healthy memory", "short_term", 1, 0.5, 0, None);

        // orphan chunk in V + L with no metadata entry
        indexer
            .vector()
            .add(
                "mem-ghost#0",
                &StubEmbedder::embed_text("ghost"),
                "ghost chunk",
                &json!({"memory_id": "mem-ghost", "is_memory_entry": false, "chunk_index": 0}),
            )
            .unwrap();
        indexer
            .lexical()
            .add_batch(&[("mem-ghost#0".into(), "mem-ghost".into(), "ghost chunk".into())])
            .unwrap();
        // chunkless, uncompressed metadata entry
        indexer
            .vector()
            .add(
                "mem-empty-metadata",
                &StubEmbedder::embed_text("empty"),
                "empty summary",
                &json!({
                    "memory_id": "mem-empty",
                    "is_memory_entry": true,
                    "tier": "short_term",
                    "created_at": Utc::now().to_rfc3339(),
                    "importance": 0.5,
                }),
            )
            .unwrap();

        let stats = svc.consolidate().await.unwrap();
        // ghost chunk (removed from V and L together) + empty metadata entry
        assert_eq!(stats.orphans_removed, 2);
        assert!(indexer.vector().get("mem-ghost#0").unwrap().is_none());
        assert!(indexer.vector().get("mem-empty-metadata").unwrap().is_none());
        assert!(entry_metadata(&indexer, "mem-ok").is_some());
    }

    #[tokio::test]
    async fn consolidation_is_idempotent() {
        let (svc, indexer, _dir) = service(ConsolidationConfig::default());
        for i in 0..3 {
            seed_memory(
                &indexer,
                &format!("mem-i-{i}"),
                "repeated summary for idempotence",
                "working",
                1,
                0.5,
                0,
                None,
            );
        }
        seed_memory(&indexer, "mem-i-old", "stale to forget", "short_term", 40, 0.05, 0, None);

        let first = svc.consolidate().await.unwrap();
        assert!(first.migrated > 0);
        assert_eq!(first.forgotten, 1);

        let second = svc.consolidate().await.unwrap();
        assert_eq!(second.migrated, 0);
        assert_eq!(second.forgotten, 0);
        assert_eq!(second.compressed, 0);
        assert_eq!(second.orphans_removed, 0);
    }

    #[tokio::test]
    async fn last_run_is_persisted_and_gates_catchup() {
        let (svc, _indexer, _dir) = service(ConsolidationConfig::default());
        assert!(svc.needs_catchup());

        svc.consolidate().await.unwrap();
        assert!(svc.last_run().is_some());
        assert!(!svc.needs_catchup());
    }
}
