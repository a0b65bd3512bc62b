//! Lexical index: BM25 keyword search over chunk text via FTS5.
//!
//! Standalone FTS5 table (not an external-content mirror) so chunk rows can
//! be deleted directly. FTS5 `rank` is negative (more negative = better);
//! scores are negated so larger is better everywhere else.

use anyhow::Result;
use rusqlite::{params, Connection};
use std::sync::{Arc, Mutex};

/// A BM25 hit. `score` is the negated FTS5 rank.
#[derive(Debug, Clone)]
pub struct LexicalHit {
    pub chunk_id: String,
    pub memory_id: String,
    pub score: f64,
}

#[derive(Clone)]
pub struct LexicalIndex {
    conn: Arc<Mutex<Connection>>,
}

impl LexicalIndex {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    /// Add chunk documents: `(chunk_id, memory_id, content)` triples, one
    /// transaction. Re-adding a chunk id replaces the previous row.
    pub fn add_batch(&self, entries: &[(String, String, String)]) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        for (chunk_id, memory_id, content) in entries {
            tx.execute(
                "DELETE FROM chunk_index WHERE chunk_id = ?1",
                params![chunk_id],
            )?;
            tx.execute(
                "INSERT INTO chunk_index (content, chunk_id, memory_id) VALUES (?1, ?2, ?3)",
                params![content, chunk_id, memory_id],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// BM25 search over chunk text.
    pub fn search(&self, query: &str, limit: usize) -> Result<Vec<LexicalHit>> {
        let escaped = escape_fts_query(query);
        if escaped.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT chunk_id, memory_id, rank FROM chunk_index \
             WHERE chunk_index MATCH ?1 ORDER BY rank LIMIT ?2",
        )?;
        let hits = stmt
            .query_map(params![escaped, limit as i64], |row| {
                Ok(LexicalHit {
                    chunk_id: row.get(0)?,
                    memory_id: row.get(1)?,
                    score: -row.get::<_, f64>(2)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(hits)
    }

    /// Delete a single chunk. Idempotent.
    pub fn delete_chunk(&self, chunk_id: &str) -> Result<()> {
        let conn = self.lock();
        conn.execute(
            "DELETE FROM chunk_index WHERE chunk_id = ?1",
            params![chunk_id],
        )?;
        Ok(())
    }

    /// Delete every chunk belonging to a memory. Idempotent.
    pub fn delete_by_memory(&self, memory_id: &str) -> Result<usize> {
        let conn = self.lock();
        let deleted = conn.execute(
            "DELETE FROM chunk_index WHERE memory_id = ?1",
            params![memory_id],
        )?;
        Ok(deleted)
    }

    /// All `(chunk_id, memory_id)` pairs — used by the orphan sweep.
    pub fn list_chunk_ids(&self) -> Result<Vec<(String, String)>> {
        let conn = self.lock();
        let mut stmt = conn.prepare("SELECT chunk_id, memory_id FROM chunk_index")?;
        let pairs = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(pairs)
    }

    pub fn count(&self) -> Result<i64> {
        let conn = self.lock();
        Ok(conn.query_row("SELECT COUNT(*) FROM chunk_index", [], |row| row.get(0))?)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().expect("lexical index lock poisoned")
    }
}

/// Escape a user query for FTS5 MATCH syntax: wrap each whitespace-delimited
/// word in double quotes (implicit AND), stripping embedded quotes.
fn escape_fts_query(query: &str) -> String {
    query
        .split_whitespace()
        .map(|word| {
            let clean = word.replace('"', "");
            format!("\"{clean}\"")
        })
        .filter(|w| w != "\"\"")
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_index() -> LexicalIndex {
        let conn = crate::db::open_memory_database().unwrap();
        LexicalIndex::new(Arc::new(Mutex::new(conn)))
    }

    fn seed(index: &LexicalIndex) {
        index
            .add_batch(&[
                (
                    "mem-1#0".into(),
                    "mem-1".into(),
                    "The quantum computer operates at very low temperatures".into(),
                ),
                (
                    "mem-2#0".into(),
                    "mem-2".into(),
                    "Rust is a systems programming language".into(),
                ),
                (
                    "mem-2#1".into(),
                    "mem-2".into(),
                    "Cargo manages Rust dependencies and builds".into(),
                ),
            ])
            .unwrap();
    }

    #[test]
    fn search_matches_keywords() {
        let index = test_index();
        seed(&index);

        let hits = index.search("quantum computer", 10).unwrap();
        assert!(!hits.is_empty());
        assert_eq!(hits[0].chunk_id, "mem-1#0");
        assert_eq!(hits[0].memory_id, "mem-1");
        assert!(hits[0].score > 0.0);
    }

    #[test]
    fn search_ranks_better_matches_first() {
        let index = test_index();
        seed(&index);

        let hits = index.search("rust", 10).unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits.iter().all(|h| h.memory_id == "mem-2"));
    }

    #[test]
    fn empty_query_returns_nothing() {
        let index = test_index();
        seed(&index);
        assert!(index.search("", 10).unwrap().is_empty());
        assert!(index.search("   ", 10).unwrap().is_empty());
        assert!(index.search("rust", 0).unwrap().is_empty());
    }

    #[test]
    fn delete_by_memory_removes_all_chunks() {
        let index = test_index();
        seed(&index);

        let deleted = index.delete_by_memory("mem-2").unwrap();
        assert_eq!(deleted, 2);
        assert!(index.search("rust", 10).unwrap().is_empty());
        assert_eq!(index.count().unwrap(), 1);
        // idempotent
        assert_eq!(index.delete_by_memory("mem-2").unwrap(), 0);
    }

    #[test]
    fn readd_replaces_existing_chunk() {
        let index = test_index();
        seed(&index);
        index
            .add_batch(&[(
                "mem-1#0".into(),
                "mem-1".into(),
                "replacement text about databases".into(),
            )])
            .unwrap();

        assert!(index.search("quantum", 10).unwrap().is_empty());
        assert_eq!(index.search("databases", 10).unwrap().len(), 1);
        assert_eq!(index.count().unwrap(), 3);
    }

    #[test]
    fn escape_handles_quotes_and_spacing() {
        assert_eq!(escape_fts_query("hello world"), "\"hello\" \"world\"");
        assert_eq!(escape_fts_query("  spaces  "), "\"spaces\"");
        assert_eq!(escape_fts_query("say \"hi\""), "\"say\" \"hi\"");
        assert_eq!(escape_fts_query(""), "");
    }
}
