//! MCP `list_recent_memories` tool parameter definition.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Parameters for the `list_recent_memories` MCP tool.
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct ListRecentMemoriesParams {
    /// Maximum number of memories to return (default 20).
    #[schemars(description = "Maximum number of memories to return (default 20)")]
    pub limit: Option<usize>,

    /// Metadata equality filters.
    #[schemars(description = "Metadata equality filters, e.g. {\"project_id\": \"infra\"}")]
    pub filters: Option<serde_json::Value>,
}
