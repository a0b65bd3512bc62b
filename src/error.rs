//! Error kinds surfaced at service boundaries.
//!
//! Internal failures are caught where a service hands results back to the
//! protocol layer and mapped to one of these kinds. Stack traces and causes
//! go to the logs; clients only see the kind plus a short message.

use thiserror::Error;

/// What stage of ingestion failed. Partial state is rolled back before
/// this is returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestCause {
    Classification,
    Summary,
    Embedding,
    Storage,
}

impl IngestCause {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Classification => "classification",
            Self::Summary => "summary",
            Self::Embedding => "embedding",
            Self::Storage => "storage",
        }
    }
}

/// What stage of search failed. A rerank failure alone never surfaces —
/// the call degrades to rule-based ordering instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchCause {
    Embedding,
    Vector,
    Lexical,
    Rerank,
}

impl SearchCause {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Embedding => "embedding",
            Self::Vector => "vector",
            Self::Lexical => "lexical",
            Self::Rerank => "rerank",
        }
    }
}

#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Malformed request or schema violation. Never retried.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Memory or session id not known.
    #[error("not found: {0}")]
    NotFound(String),

    #[error("ingestion failed ({}): {message}", .cause.as_str())]
    IngestFailed { cause: IngestCause, message: String },

    #[error("search failed ({}): {message}", .cause.as_str())]
    SearchFailed { cause: SearchCause, message: String },

    /// Deadline exceeded; partial results were discarded.
    #[error("deadline exceeded after {0}s")]
    Timeout(u64),

    #[error("consolidation failed: {0}")]
    Consolidation(String),
}

impl OrchestratorError {
    /// Stable kind tag carried in error payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "InvalidRequest",
            Self::NotFound(_) => "NotFound",
            Self::IngestFailed { .. } => "IngestFailed",
            Self::SearchFailed { .. } => "SearchFailed",
            Self::Timeout(_) => "Timeout",
            Self::Consolidation(_) => "ConsolidationError",
        }
    }

    pub fn ingest(cause: IngestCause, message: impl Into<String>) -> Self {
        Self::IngestFailed {
            cause,
            message: message.into(),
        }
    }

    pub fn search(cause: SearchCause, message: impl Into<String>) -> Self {
        Self::SearchFailed {
            cause,
            message: message.into(),
        }
    }

    /// Wire form: `Kind: message`, suitable for an MCP tool error string.
    pub fn to_wire(&self) -> String {
        format!("{}: {}", self.kind(), self)
    }
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;
