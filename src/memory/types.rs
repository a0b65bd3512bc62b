//! Core data model: schemas, tiers, memories, chunks, conversations.
//!
//! A [`Memory`] persists across both indexes as one metadata entry record
//! (id `{memory_id}-metadata`, embedding from its enriched summary) plus a
//! sequence of [`Chunk`]s (ids `{memory_id}#i`). The metadata-entry JSON is
//! the durable form of the memory-level fields; [`Memory::to_entry_metadata`]
//! and [`Memory::from_entry`] are the round trip.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Suffix distinguishing a memory's metadata entry from its chunks.
pub const METADATA_SUFFIX: &str = "-metadata";

/// The domain class of a memory. Immutable after ingestion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Schema {
    /// Bug reports, errors, troubleshooting.
    Incident,
    /// Code examples with usage context.
    Snippet,
    /// Architectural choices and trade-offs.
    Decision,
    /// Thought processes, learning, experimentation.
    Process,
}

impl Schema {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Incident => "Incident",
            Self::Snippet => "Snippet",
            Self::Decision => "Decision",
            Self::Process => "Process",
        }
    }
}

impl std::fmt::Display for Schema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Schema {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "Incident" => Ok(Self::Incident),
            "Snippet" => Ok(Self::Snippet),
            "Decision" => Ok(Self::Decision),
            "Process" => Ok(Self::Process),
            other => Err(format!("unknown schema: {other}")),
        }
    }
}

/// Lifecycle stage of a memory. Working (hours) → ShortTerm (days-weeks) →
/// LongTerm (indefinite).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Working,
    ShortTerm,
    LongTerm,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Working => "working",
            Self::ShortTerm => "short_term",
            Self::LongTerm => "long_term",
        }
    }

    /// Recency half-life multiplier: longer-lived tiers decay more slowly.
    pub fn half_life_multiplier(&self) -> f64 {
        match self {
            Self::Working => 1.0,
            Self::ShortTerm => 3.0,
            Self::LongTerm => 6.0,
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Tier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "working" => Ok(Self::Working),
            "short_term" => Ok(Self::ShortTerm),
            "long_term" => Ok(Self::LongTerm),
            other => Err(format!("unknown tier: {other}")),
        }
    }
}

/// A durable memory record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Memory {
    pub id: String,
    pub schema: Schema,
    pub tier: Tier,
    /// Original concatenated conversation text.
    pub content: String,
    /// Structured summary text (validated or fallback form).
    pub summary: String,
    /// External references: URLs, file paths, commit ids.
    pub refs: Vec<String>,
    pub timestamp: DateTime<Utc>,
    pub last_accessed: Option<DateTime<Utc>>,
    pub access_count: u32,
    /// In [0, 1]; drives forgetting and long-term promotion.
    pub importance: f64,
    /// In [0, 1]; decays over time, boosted by access.
    pub strength: f64,
    pub project_id: Option<String>,
    pub language: String,
    /// Open key/value bag carried through to both index records.
    pub metadata: Value,
}

impl Memory {
    /// Generate a fresh time-sortable memory id.
    pub fn new_id() -> String {
        format!("mem-{}", uuid::Uuid::now_v7())
    }

    /// Id of this memory's metadata entry in the vector store.
    pub fn entry_id(&self) -> String {
        entry_id(&self.id)
    }

    /// Metadata JSON written to the metadata entry record.
    pub fn to_entry_metadata(&self) -> Value {
        let mut out = match &self.metadata {
            Value::Object(map) => Value::Object(map.clone()),
            _ => json!({}),
        };
        let obj = out.as_object_mut().expect("object constructed above");
        obj.insert("memory_id".into(), json!(self.id));
        obj.insert("schema".into(), json!(self.schema.as_str()));
        obj.insert("tier".into(), json!(self.tier.as_str()));
        obj.insert("content".into(), json!(self.content));
        obj.insert("refs".into(), json!(self.refs));
        obj.insert("refs_count".into(), json!(self.refs.len()));
        obj.insert("created_at".into(), json!(self.timestamp.to_rfc3339()));
        if let Some(accessed) = self.last_accessed {
            obj.insert("last_accessed".into(), json!(accessed.to_rfc3339()));
        }
        obj.insert("access_count".into(), json!(self.access_count));
        obj.insert("importance".into(), json!(self.importance));
        obj.insert("strength".into(), json!(self.strength));
        if let Some(project) = &self.project_id {
            obj.insert("project_id".into(), json!(project));
        }
        obj.insert("language".into(), json!(self.language));
        obj.insert("is_memory_entry".into(), json!(true));
        out
    }

    /// Metadata JSON inherited by each chunk record.
    pub fn to_chunk_metadata(&self, chunk_index: usize) -> Value {
        let mut obj = serde_json::Map::new();
        obj.insert("memory_id".into(), json!(self.id));
        obj.insert("chunk_index".into(), json!(chunk_index));
        obj.insert("schema".into(), json!(self.schema.as_str()));
        obj.insert("tier".into(), json!(self.tier.as_str()));
        obj.insert("created_at".into(), json!(self.timestamp.to_rfc3339()));
        obj.insert("refs".into(), json!(self.refs));
        obj.insert("refs_count".into(), json!(self.refs.len()));
        obj.insert("strength".into(), json!(self.strength));
        obj.insert("importance".into(), json!(self.importance));
        if let Some(project) = &self.project_id {
            obj.insert("project_id".into(), json!(project));
        }
        obj.insert("is_memory_entry".into(), json!(false));
        Value::Object(obj)
    }

    /// Reconstruct a memory from its metadata entry record. `document` is
    /// the entry's stored document (the summary text).
    pub fn from_entry(memory_id: &str, document: &str, metadata: &Value) -> Option<Self> {
        let schema = metadata
            .get("schema")
            .and_then(Value::as_str)?
            .parse()
            .ok()?;
        let tier = metadata
            .get("tier")
            .and_then(Value::as_str)
            .unwrap_or("working")
            .parse()
            .unwrap_or(Tier::Working);
        let timestamp = metadata
            .get("created_at")
            .and_then(Value::as_str)
            .and_then(parse_timestamp)?;
        let last_accessed = metadata
            .get("last_accessed")
            .and_then(Value::as_str)
            .and_then(parse_timestamp);

        Some(Self {
            id: memory_id.to_string(),
            schema,
            tier,
            content: metadata
                .get("content")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            summary: document.to_string(),
            refs: metadata
                .get("refs")
                .and_then(Value::as_array)
                .map(|arr| {
                    arr.iter()
                        .filter_map(Value::as_str)
                        .map(String::from)
                        .collect()
                })
                .unwrap_or_default(),
            timestamp,
            last_accessed,
            access_count: metadata
                .get("access_count")
                .and_then(Value::as_u64)
                .unwrap_or(0) as u32,
            importance: metadata
                .get("importance")
                .and_then(Value::as_f64)
                .unwrap_or(0.5),
            strength: metadata
                .get("strength")
                .and_then(Value::as_f64)
                .unwrap_or(0.5),
            project_id: metadata
                .get("project_id")
                .and_then(Value::as_str)
                .map(String::from),
            language: metadata
                .get("language")
                .and_then(Value::as_str)
                .unwrap_or("en")
                .to_string(),
            metadata: metadata.clone(),
        })
    }
}

/// A retrieval unit derived from a memory. `content` stays within the
/// chunker's token ceiling unless it is a single fenced code block.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub id: String,
    pub memory_id: String,
    pub chunk_index: usize,
    pub content: String,
    pub tokens: usize,
    pub embedding: Vec<f32>,
}

impl Chunk {
    pub fn id_for(memory_id: &str, index: usize) -> String {
        format!("{memory_id}#{index}")
    }
}

/// A validated inbound conversation. All downstream code consumes this
/// shape; validation happens once at the ingestion boundary.
#[derive(Debug, Clone, Default)]
pub struct Conversation {
    pub user: String,
    pub assistant: String,
    pub source: Option<String>,
    pub refs: Vec<String>,
    pub timestamp: Option<DateTime<Utc>>,
    pub project_id: Option<String>,
    pub language_override: Option<String>,
    pub metadata: Value,
}

impl Conversation {
    /// Single content string: the markdown form both chunker and indexes see.
    pub fn to_content(&self) -> String {
        format!(
            "**User:**\n{}\n\n**Assistant:**\n{}",
            self.user, self.assistant
        )
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.user.trim().is_empty() && self.assistant.trim().is_empty() {
            return Err("conversation must contain user or assistant text".into());
        }
        Ok(())
    }
}

/// Strip the `-metadata` suffix to recover a base memory id. Ids without
/// the suffix pass through unchanged.
pub fn base_memory_id(candidate_id: &str) -> &str {
    candidate_id
        .strip_suffix(METADATA_SUFFIX)
        .unwrap_or(candidate_id)
}

/// Metadata entry id for a memory.
pub fn entry_id(memory_id: &str) -> String {
    format!("{memory_id}{METADATA_SUFFIX}")
}

/// Parse an RFC3339/ISO-8601 timestamp, tolerating a trailing `Z`.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
