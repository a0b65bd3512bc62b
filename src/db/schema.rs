//! SQL DDL for the orchestrator's tables.
//!
//! The vector store lives in `records` (documents + JSON metadata) paired
//! with the `vec_index` vec0 virtual table; the lexical index is the
//! standalone `chunk_index` FTS5 table. All DDL uses `IF NOT EXISTS` for
//! idempotent initialization.

use rusqlite::Connection;

const SCHEMA_SQL: &str = r#"
-- Vector-store records: one row per chunk and one per memory metadata entry.
-- `metadata` is a JSON object queried via json_extract.
CREATE TABLE IF NOT EXISTS records (
    id TEXT PRIMARY KEY,
    document TEXT NOT NULL,
    metadata TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_records_memory_id
    ON records(json_extract(metadata, '$.memory_id'));
CREATE INDEX IF NOT EXISTS idx_records_is_entry
    ON records(json_extract(metadata, '$.is_memory_entry'));
CREATE INDEX IF NOT EXISTS idx_records_project
    ON records(json_extract(metadata, '$.project_id'));

-- Lexical index: standalone FTS5 over chunk text (BM25 via rank).
CREATE VIRTUAL TABLE IF NOT EXISTS chunk_index USING fts5(
    content,
    chunk_id UNINDEXED,
    memory_id UNINDEXED
);

-- Schema metadata
CREATE TABLE IF NOT EXISTS schema_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

/// vec0 virtual table must be created separately (sqlite-vec syntax).
const VEC_TABLE_SQL: &str = r#"
CREATE VIRTUAL TABLE IF NOT EXISTS vec_index USING vec0(
    id TEXT PRIMARY KEY,
    embedding FLOAT[384]
);
"#;

/// Initialize all schema tables. Idempotent (uses IF NOT EXISTS).
pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)?;
    conn.execute_batch(VEC_TABLE_SQL)?;

    conn.execute(
        "INSERT OR IGNORE INTO schema_meta (key, value) VALUES ('schema_version', '1')",
        [],
    )?;

    Ok(())
}
