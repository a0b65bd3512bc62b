//! Ingestion pipeline: classify → summarise → chunk → embed → index.
//!
//! Classifier and summariser failures degrade (Process schema, fallback
//! summary); embedder and storage failures are fatal to the ingestion and
//! surface as `IngestFailed` with the stage as cause, leaving no partial
//! state. Writes take the consolidation gate in read mode so a running
//! consolidation pass is never observed half-migrated.

use chrono::Utc;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::embedding::EmbeddingProvider;
use crate::error::{IngestCause, OrchestratorError, Result};
use crate::memory::chunker::Chunker;
use crate::memory::classifier::SchemaClassifier;
use crate::memory::indexer::Indexer;
use crate::memory::summary::{build_enriched_summary, Summarizer};
use crate::memory::types::{Chunk, Conversation, Memory, Tier};
use crate::storage::MetadataFilter;

/// A chunk as returned by `get_memory`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ChunkView {
    pub id: String,
    pub chunk_index: usize,
    pub content: String,
}

pub struct IngestionService {
    indexer: Indexer,
    classifier: SchemaClassifier,
    summarizer: Summarizer,
    chunker: Arc<Chunker>,
    embedder: Arc<dyn EmbeddingProvider>,
    consolidation_gate: Arc<RwLock<()>>,
}

impl IngestionService {
    pub fn new(
        indexer: Indexer,
        classifier: SchemaClassifier,
        summarizer: Summarizer,
        chunker: Arc<Chunker>,
        embedder: Arc<dyn EmbeddingProvider>,
        consolidation_gate: Arc<RwLock<()>>,
    ) -> Self {
        Self {
            indexer,
            classifier,
            summarizer,
            chunker,
            embedder,
            consolidation_gate,
        }
    }

    /// Run the full pipeline and return the new memory id.
    pub async fn ingest(&self, conversation: Conversation) -> Result<String> {
        conversation
            .validate()
            .map_err(OrchestratorError::InvalidRequest)?;

        let source = conversation.source.clone().unwrap_or_else(|| "unknown".into());
        tracing::info!(source = %source, "ingesting conversation");

        let schema = self
            .classifier
            .classify(&conversation.user, &conversation.assistant)
            .await;
        tracing::debug!(schema = %schema, "classified");

        let language = self.summarizer.resolve_language(&conversation);
        let summary = self.summarizer.summarize(&conversation, &language).await;
        tracing::debug!(language = %language, "summarized");

        let memory = build_memory(&conversation, schema, summary, language, source);
        let content = memory.content.clone();

        let text_chunks = self.chunker.chunk_conversation(&content);
        if text_chunks.is_empty() {
            return Err(OrchestratorError::InvalidRequest(
                "conversation produced no indexable content".into(),
            ));
        }

        let enriched = build_enriched_summary(&memory.summary, &content);

        // One batched pass: every chunk plus the enriched summary.
        let mut texts: Vec<String> = text_chunks.iter().map(|c| c.content.clone()).collect();
        texts.push(enriched.clone());
        let embedder = Arc::clone(&self.embedder);
        let mut embeddings = tokio::task::spawn_blocking(move || {
            let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
            embedder.embed_batch(&refs)
        })
        .await
        .map_err(|e| OrchestratorError::ingest(IngestCause::Embedding, e.to_string()))?
        .map_err(|e| OrchestratorError::ingest(IngestCause::Embedding, e.to_string()))?;

        let entry_embedding = embeddings
            .pop()
            .ok_or_else(|| OrchestratorError::ingest(IngestCause::Embedding, "empty batch"))?;

        let chunks: Vec<Chunk> = text_chunks
            .into_iter()
            .zip(embeddings)
            .enumerate()
            .map(|(i, (text, embedding))| Chunk {
                id: Chunk::id_for(&memory.id, i),
                memory_id: memory.id.clone(),
                chunk_index: i,
                content: text.content,
                tokens: text.tokens,
                embedding,
            })
            .collect();

        {
            let _gate = self.consolidation_gate.read().await;
            self.indexer
                .index(&memory, &enriched, &entry_embedding, &chunks)
                .map_err(|e| OrchestratorError::ingest(IngestCause::Storage, e.to_string()))?;
        }

        tracing::info!(memory_id = %memory.id, chunks = chunks.len(), "ingested");
        Ok(memory.id)
    }

    /// Fetch a memory and its chunks. `NotFound` when the metadata entry
    /// is missing.
    pub fn get_memory(&self, memory_id: &str) -> Result<(Memory, Vec<ChunkView>)> {
        let entry = self
            .indexer
            .vector()
            .get(&crate::memory::types::entry_id(memory_id))
            .map_err(|e| OrchestratorError::search(crate::error::SearchCause::Vector, e.to_string()))?
            .ok_or_else(|| OrchestratorError::NotFound(memory_id.to_string()))?;

        let memory = Memory::from_entry(memory_id, &entry.document, &entry.metadata)
            .ok_or_else(|| OrchestratorError::NotFound(memory_id.to_string()))?;

        let mut chunks: Vec<ChunkView> = self
            .indexer
            .vector()
            .list_by_metadata(
                &MetadataFilter::new()
                    .eq("memory_id", memory_id)
                    .eq("is_memory_entry", false),
                false,
            )
            .map_err(|e| OrchestratorError::search(crate::error::SearchCause::Vector, e.to_string()))?
            .into_iter()
            .map(|record| ChunkView {
                chunk_index: record
                    .metadata
                    .get("chunk_index")
                    .and_then(Value::as_u64)
                    .unwrap_or(0) as usize,
                id: record.id,
                content: record.document,
            })
            .collect();
        chunks.sort_by_key(|c| c.chunk_index);

        Ok((memory, chunks))
    }

    /// Delete a memory via the indexer's cascade. `NotFound` when the
    /// metadata entry does not exist.
    pub async fn delete_memory(&self, memory_id: &str) -> Result<()> {
        let exists = self
            .indexer
            .vector()
            .get(&crate::memory::types::entry_id(memory_id))
            .map_err(|e| OrchestratorError::search(crate::error::SearchCause::Vector, e.to_string()))?
            .is_some();
        if !exists {
            return Err(OrchestratorError::NotFound(memory_id.to_string()));
        }

        let _gate = self.consolidation_gate.read().await;
        self.indexer
            .delete_by_memory_id(memory_id)
            .map_err(|e| OrchestratorError::ingest(IngestCause::Storage, e.to_string()))?;
        Ok(())
    }

    pub fn language_routing_metrics(&self) -> Value {
        self.summarizer.metrics_snapshot()
    }
}

fn build_memory(
    conversation: &Conversation,
    schema: crate::memory::types::Schema,
    summary: String,
    language: String,
    source: String,
) -> Memory {
    let mut metadata = match &conversation.metadata {
        Value::Object(map) => Value::Object(map.clone()),
        _ => json!({}),
    };
    if let Some(obj) = metadata.as_object_mut() {
        obj.insert("source".into(), json!(source));
    }

    Memory {
        id: Memory::new_id(),
        schema,
        tier: Tier::Working,
        content: conversation.to_content(),
        summary,
        refs: conversation.refs.clone(),
        timestamp: conversation.timestamp.unwrap_or_else(Utc::now),
        last_accessed: None,
        access_count: 0,
        importance: 0.5,
        strength: 1.0,
        project_id: conversation.project_id.clone(),
        language,
        metadata,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::chunker::TokenCounter;
    use crate::memory::test_support::{scripted_router, StubEmbedder};
    use crate::storage::{LexicalIndex, VectorStore};
    use std::sync::Mutex;

    fn service_with_summary(summary_output: &'static str) -> IngestionService {
        let conn = Arc::new(Mutex::new(crate::db::open_memory_database().unwrap()));
        let indexer = Indexer::new(VectorStore::new(conn.clone()), LexicalIndex::new(conn));
        let router = scripted_router(vec!["Incident", summary_output, summary_output]);
        IngestionService::new(
            indexer,
            SchemaClassifier::new(router.clone()),
            Summarizer::new(router, &crate::config::LanguageConfig::default(), 1),
            Arc::new(Chunker::new(TokenCounter::approximate(), 512)),
            Arc::new(StubEmbedder::default()),
            Arc::new(RwLock::new(())),
        )
    }

    const VALID_SUMMARY: &str =
        "Topic: egress\nDocType: incident\nProject: infra\nKeyActions:\n- Add 443 rule";

    fn sample_conversation() -> Conversation {
        Conversation {
            user: "Why does our ECS task fail outbound HTTPS?".into(),
            assistant: "Security group egress was missing 443; added rule.".into(),
            source: Some("cli".into()),
            refs: vec!["https://example/pr/42".into()],
            project_id: Some("infra".into()),
            metadata: json!({}),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn ingest_then_get_round_trips() {
        let service = service_with_summary(VALID_SUMMARY);
        let memory_id = service.ingest(sample_conversation()).await.unwrap();

        let (memory, chunks) = service.get_memory(&memory_id).unwrap();
        assert_eq!(memory.id, memory_id);
        assert_eq!(memory.schema, crate::memory::types::Schema::Incident);
        assert_eq!(memory.tier, Tier::Working);
        assert!(memory.content.contains("Security group egress"));
        assert_eq!(memory.refs, vec!["https://example/pr/42".to_string()]);
        assert_eq!(memory.project_id.as_deref(), Some("infra"));
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_index, 0);
        assert!(chunks[0].content.contains("**User:**"));
    }

    #[tokio::test]
    async fn empty_conversation_is_invalid() {
        let service = service_with_summary(VALID_SUMMARY);
        let err = service
            .ingest(Conversation::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "InvalidRequest");
    }

    #[tokio::test]
    async fn invalid_summary_falls_back_after_retry() {
        // summariser always emits a numbered list — both attempts fail
        let service = service_with_summary("1. not a structured summary");
        let memory_id = service.ingest(sample_conversation()).await.unwrap();

        let (memory, _) = service.get_memory(&memory_id).unwrap();
        assert!(
            crate::memory::summary::is_structured_summary(&memory.summary),
            "stored summary must parse: {}",
            memory.summary
        );
    }

    #[tokio::test]
    async fn delete_makes_memory_not_found() {
        let service = service_with_summary(VALID_SUMMARY);
        let memory_id = service.ingest(sample_conversation()).await.unwrap();

        service.delete_memory(&memory_id).await.unwrap();

        let err = service.get_memory(&memory_id).unwrap_err();
        assert_eq!(err.kind(), "NotFound");

        let err = service.delete_memory(&memory_id).await.unwrap_err();
        assert_eq!(err.kind(), "NotFound");
    }

    #[tokio::test]
    async fn get_unknown_memory_is_not_found() {
        let service = service_with_summary(VALID_SUMMARY);
        assert_eq!(
            service.get_memory("mem-missing").unwrap_err().kind(),
            "NotFound"
        );
    }

    #[tokio::test]
    async fn explicit_timestamp_is_preserved() {
        let service = service_with_summary(VALID_SUMMARY);
        let mut conversation = sample_conversation();
        let ts = crate::memory::types::parse_timestamp("2026-01-15T09:30:00Z").unwrap();
        conversation.timestamp = Some(ts);

        let memory_id = service.ingest(conversation).await.unwrap();
        let (memory, _) = service.get_memory(&memory_id).unwrap();
        assert_eq!(memory.timestamp, ts);
    }
}
