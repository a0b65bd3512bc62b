//! MCP `search_memory` tool parameter definition.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Parameters for the `search_memory` MCP tool.
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct SearchMemoryParams {
    /// Natural-language search query.
    #[schemars(description = "Natural language search query")]
    pub query: String,

    /// Number of results to return (default from config).
    #[schemars(description = "Number of results to return")]
    pub top_k: Option<usize>,

    /// Metadata equality filters; use `$and` for explicit conjunction.
    #[schemars(
        description = "Metadata equality filters, e.g. {\"schema\": \"Incident\"}; multiple keys conjoin, or use {\"$and\": [...]}"
    )]
    pub filters: Option<serde_json::Value>,

    /// Constrain to a project's memory pool with full-corpus fallback.
    #[schemars(description = "Project id for pool-scoped retrieval with full-corpus fallback")]
    pub project_id: Option<String>,

    /// Include memory-level summary entries alongside chunks (default true).
    #[schemars(description = "Include memory-level summary entries in results (default true)")]
    pub include_session_summaries: Option<bool>,
}
