//! Dense vector store: `records` rows paired with vec0 KNN entries.
//!
//! Every record carries an id, a document string, and an open JSON metadata
//! object. Chunks and memory metadata entries share this table and are told
//! apart by the `is_memory_entry` metadata key. KNN queries cannot filter on
//! metadata inside vec0, so filtered searches over-fetch and post-filter
//! against the `records` table.

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use std::sync::{Arc, Mutex};

use super::{embedding_to_bytes, l2_distance_to_cosine};

/// Over-fetch multiplier for filtered KNN queries.
const FILTER_OVERFETCH: usize = 4;

/// A full record fetched from the store.
#[derive(Debug, Clone)]
pub struct VecRecord {
    pub id: String,
    pub document: String,
    pub metadata: Value,
    pub embedding: Option<Vec<f32>>,
}

/// A KNN search hit with cosine similarity.
#[derive(Debug, Clone)]
pub struct VectorHit {
    pub id: String,
    pub document: String,
    pub metadata: Value,
    pub similarity: f64,
}

/// Conjunction of metadata equality constraints.
///
/// Built from the request's `filters` object: either a flat map of
/// key/value pairs or `{"$and": [{k: v}, ...]}`.
#[derive(Debug, Clone, Default)]
pub struct MetadataFilter {
    pairs: Vec<(String, Value)>,
}

impl MetadataFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.pairs.push((key.into(), value.into()));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Parse a request filter object. Returns `InvalidRequest`-worthy errors
    /// as strings so the caller can map them.
    pub fn from_request(value: &Value) -> std::result::Result<Self, String> {
        let mut filter = Self::new();
        let obj = value
            .as_object()
            .ok_or_else(|| "filters must be a JSON object".to_string())?;

        if let Some(and) = obj.get("$and") {
            let items = and
                .as_array()
                .ok_or_else(|| "$and must be an array of objects".to_string())?;
            for item in items {
                let inner = item
                    .as_object()
                    .ok_or_else(|| "$and entries must be objects".to_string())?;
                for (k, v) in inner {
                    filter.pairs.push((k.clone(), v.clone()));
                }
            }
            if obj.len() > 1 {
                return Err("$and cannot be combined with top-level keys".to_string());
            }
        } else {
            for (k, v) in obj {
                filter.pairs.push((k.clone(), v.clone()));
            }
        }
        Ok(filter)
    }

    /// Evaluate against a record's metadata object.
    pub fn matches(&self, metadata: &Value) -> bool {
        self.pairs
            .iter()
            .all(|(key, expected)| metadata.get(key) == Some(expected))
    }
}

#[derive(Clone)]
pub struct VectorStore {
    conn: Arc<Mutex<Connection>>,
}

impl VectorStore {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    /// Insert a record with its embedding. Overwrites an existing id.
    pub fn add(
        &self,
        id: &str,
        embedding: &[f32],
        document: &str,
        metadata: &Value,
    ) -> Result<()> {
        let conn = self.lock();
        add_with_conn(&conn, id, embedding, document, metadata)
    }

    /// Insert a batch of records in one transaction.
    pub fn add_batch(&self, records: &[(String, Vec<f32>, String, Value)]) -> Result<()> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        for (id, embedding, document, metadata) in records {
            add_with_tx(&tx, id, embedding, document, metadata)?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Fetch a record by id, without its embedding.
    pub fn get(&self, id: &str) -> Result<Option<VecRecord>> {
        let conn = self.lock();
        let row = conn
            .query_row(
                "SELECT id, document, metadata FROM records WHERE id = ?1",
                params![id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()?;

        Ok(row.map(|(id, document, metadata)| VecRecord {
            id,
            document,
            metadata: serde_json::from_str(&metadata).unwrap_or(Value::Null),
            embedding: None,
        }))
    }

    /// Fetch the stored embedding for a record id.
    pub fn get_embedding(&self, id: &str) -> Result<Option<Vec<f32>>> {
        let conn = self.lock();
        let bytes: Option<Vec<u8>> = conn
            .query_row(
                "SELECT embedding FROM vec_index WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(bytes.map(|b| super::bytes_to_embedding(&b)))
    }

    /// KNN search. Filters are applied by over-fetching candidates and
    /// post-filtering on the record metadata; the result is capped at `limit`.
    pub fn search(
        &self,
        embedding: &[f32],
        limit: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<VectorHit>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let fetch = match filter {
            Some(f) if !f.is_empty() => limit.saturating_mul(FILTER_OVERFETCH),
            _ => limit,
        };

        let conn = self.lock();
        let embedding_bytes = embedding_to_bytes(embedding);
        let mut stmt = conn.prepare(
            "SELECT id, distance FROM vec_index \
             WHERE embedding MATCH ?1 ORDER BY distance LIMIT ?2",
        )?;
        let neighbors: Vec<(String, f64)> = stmt
            .query_map(params![embedding_bytes, fetch as i64], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut hits = Vec::with_capacity(limit);
        let mut record_stmt =
            conn.prepare("SELECT document, metadata FROM records WHERE id = ?1")?;
        for (id, distance) in neighbors {
            let row: Option<(String, String)> = record_stmt
                .query_row(params![id], |row| Ok((row.get(0)?, row.get(1)?)))
                .optional()?;
            let Some((document, metadata_str)) = row else {
                continue;
            };
            let metadata: Value = serde_json::from_str(&metadata_str).unwrap_or(Value::Null);
            if let Some(f) = filter {
                if !f.matches(&metadata) {
                    continue;
                }
            }
            hits.push(VectorHit {
                id,
                document,
                metadata,
                similarity: l2_distance_to_cosine(distance),
            });
            if hits.len() >= limit {
                break;
            }
        }
        Ok(hits)
    }

    /// List every record matching a metadata filter.
    pub fn list_by_metadata(
        &self,
        filter: &MetadataFilter,
        include_embeddings: bool,
    ) -> Result<Vec<VecRecord>> {
        let conn = self.lock();
        let mut stmt = conn.prepare("SELECT id, document, metadata FROM records")?;
        let rows: Vec<(String, String, String)> = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut emb_stmt = if include_embeddings {
            Some(conn.prepare("SELECT embedding FROM vec_index WHERE id = ?1")?)
        } else {
            None
        };

        let mut out = Vec::new();
        for (id, document, metadata_str) in rows {
            let metadata: Value = serde_json::from_str(&metadata_str).unwrap_or(Value::Null);
            if !filter.matches(&metadata) {
                continue;
            }
            let embedding = match emb_stmt.as_mut() {
                Some(stmt) => stmt
                    .query_row(params![id], |row| row.get::<_, Vec<u8>>(0))
                    .optional()?
                    .map(|b| super::bytes_to_embedding(&b)),
                None => None,
            };
            out.push(VecRecord {
                id,
                document,
                metadata,
                embedding,
            });
        }
        Ok(out)
    }

    /// Delete a record and its embedding. Idempotent.
    pub fn delete(&self, id: &str) -> Result<()> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM records WHERE id = ?1", params![id])?;
        tx.execute("DELETE FROM vec_index WHERE id = ?1", params![id])?;
        tx.commit()?;
        Ok(())
    }

    /// Delete a batch of records in one transaction. Idempotent.
    pub fn delete_many(&self, ids: &[String]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        for id in ids {
            tx.execute("DELETE FROM records WHERE id = ?1", params![id])?;
            tx.execute("DELETE FROM vec_index WHERE id = ?1", params![id])?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Merge a patch into a record's metadata JSON. Keys set to null are removed.
    pub fn update_metadata(&self, id: &str, patch: &Value) -> Result<()> {
        let conn = self.lock();
        let current: String = conn
            .query_row(
                "SELECT metadata FROM records WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .with_context(|| format!("record not found: {id}"))?;

        let mut metadata: Value =
            serde_json::from_str(&current).unwrap_or_else(|_| Value::Object(Default::default()));
        if let (Some(target), Some(updates)) = (metadata.as_object_mut(), patch.as_object()) {
            for (k, v) in updates {
                if v.is_null() {
                    target.remove(k);
                } else {
                    target.insert(k.clone(), v.clone());
                }
            }
        }

        conn.execute(
            "UPDATE records SET metadata = ?1 WHERE id = ?2",
            params![metadata.to_string(), id],
        )?;
        Ok(())
    }

    /// Replace a record's document text.
    pub fn update_document(&self, id: &str, document: &str) -> Result<()> {
        let conn = self.lock();
        let changed = conn.execute(
            "UPDATE records SET document = ?1 WHERE id = ?2",
            params![document, id],
        )?;
        anyhow::ensure!(changed > 0, "record not found: {id}");
        Ok(())
    }

    pub fn count(&self) -> Result<i64> {
        let conn = self.lock();
        Ok(conn.query_row("SELECT COUNT(*) FROM records", [], |row| row.get(0))?)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().expect("vector store lock poisoned")
    }
}

fn add_with_conn(
    conn: &Connection,
    id: &str,
    embedding: &[f32],
    document: &str,
    metadata: &Value,
) -> Result<()> {
    let now = chrono::Utc::now().to_rfc3339();
    conn.execute(
        "INSERT OR REPLACE INTO records (id, document, metadata, created_at) VALUES (?1, ?2, ?3, ?4)",
        params![id, document, metadata.to_string(), now],
    )?;
    conn.execute("DELETE FROM vec_index WHERE id = ?1", params![id])?;
    conn.execute(
        "INSERT INTO vec_index (id, embedding) VALUES (?1, ?2)",
        params![id, embedding_to_bytes(embedding)],
    )?;
    Ok(())
}

fn add_with_tx(
    tx: &rusqlite::Transaction,
    id: &str,
    embedding: &[f32],
    document: &str,
    metadata: &Value,
) -> Result<()> {
    add_with_conn(tx, id, embedding, document, metadata)
}
