//! Dual-index writer: the only path that touches both indexes.
//!
//! `index` writes the metadata entry and all chunk records to the vector
//! store first, then the chunk text to the lexical index; a lexical failure
//! compensates by deleting the just-written vector ids, so callers observe
//! all-or-nothing. `delete_by_memory_id` is the only supported deletion
//! path — callers never poke storage directly.

use anyhow::{Context, Result};
use serde_json::Value;

use crate::memory::types::{entry_id, Chunk, Memory};
use crate::storage::{LexicalIndex, MetadataFilter, VectorStore};

#[derive(Clone)]
pub struct Indexer {
    vector: VectorStore,
    lexical: LexicalIndex,
}

impl Indexer {
    pub fn new(vector: VectorStore, lexical: LexicalIndex) -> Self {
        Self { vector, lexical }
    }

    pub fn vector(&self) -> &VectorStore {
        &self.vector
    }

    pub fn lexical(&self) -> &LexicalIndex {
        &self.lexical
    }

    /// Write one memory: metadata entry (document = enriched summary,
    /// embedding supplied by the caller) plus all chunk records.
    pub fn index(
        &self,
        memory: &Memory,
        enriched_summary: &str,
        entry_embedding: &[f32],
        chunks: &[Chunk],
    ) -> Result<()> {
        let mut vector_records: Vec<(String, Vec<f32>, String, Value)> =
            Vec::with_capacity(chunks.len() + 1);
        for chunk in chunks {
            vector_records.push((
                chunk.id.clone(),
                chunk.embedding.clone(),
                chunk.content.clone(),
                memory.to_chunk_metadata(chunk.chunk_index),
            ));
        }
        vector_records.push((
            memory.entry_id(),
            entry_embedding.to_vec(),
            enriched_summary.to_string(),
            memory.to_entry_metadata(),
        ));

        self.vector
            .add_batch(&vector_records)
            .context("vector index write failed")?;

        let lexical_entries: Vec<(String, String, String)> = chunks
            .iter()
            .map(|chunk| {
                (
                    chunk.id.clone(),
                    memory.id.clone(),
                    chunk.content.clone(),
                )
            })
            .collect();

        if let Err(err) = self.lexical.add_batch(&lexical_entries) {
            // Compensate: roll the vector side back so no partial memory
            // remains visible.
            let written: Vec<String> = vector_records.into_iter().map(|(id, ..)| id).collect();
            if let Err(cleanup_err) = self.vector.delete_many(&written) {
                tracing::error!(
                    memory_id = %memory.id,
                    error = %cleanup_err,
                    "failed to compensate vector writes after lexical failure"
                );
            }
            return Err(err).context("lexical index write failed");
        }

        Ok(())
    }

    /// Cascade delete: metadata entry + all chunks in both indexes.
    /// Resolves chunk ids from vector metadata. Idempotent; returns the
    /// number of chunk records removed.
    pub fn delete_by_memory_id(&self, memory_id: &str) -> Result<usize> {
        let chunk_ids: Vec<String> = self
            .vector
            .list_by_metadata(
                &MetadataFilter::new()
                    .eq("memory_id", memory_id)
                    .eq("is_memory_entry", false),
                false,
            )?
            .into_iter()
            .map(|record| record.id)
            .collect();

        let mut to_delete = chunk_ids.clone();
        to_delete.push(entry_id(memory_id));
        self.vector.delete_many(&to_delete)?;
        self.lexical.delete_by_memory(memory_id)?;

        Ok(chunk_ids.len())
    }

    /// Remove a memory's chunks from both indexes but keep its metadata
    /// entry (consolidation compression).
    pub fn delete_chunks(&self, memory_id: &str) -> Result<usize> {
        let chunk_ids: Vec<String> = self
            .vector
            .list_by_metadata(
                &MetadataFilter::new()
                    .eq("memory_id", memory_id)
                    .eq("is_memory_entry", false),
                false,
            )?
            .into_iter()
            .map(|record| record.id)
            .collect();

        self.vector.delete_many(&chunk_ids)?;
        self.lexical.delete_by_memory(memory_id)?;
        Ok(chunk_ids.len())
    }

    /// Patch the metadata entry only; chunk metadata is not mirrored.
    pub fn update_metadata(&self, memory_id: &str, patch: &Value) -> Result<()> {
        self.vector.update_metadata(&entry_id(memory_id), patch)
    }

    pub fn stats(&self) -> Result<Value> {
        Ok(serde_json::json!({
            "vector_records": self.vector.count()?,
            "lexical_chunks": self.lexical.count()?,
        }))
    }
}
