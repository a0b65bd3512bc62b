//! MCP `get_memory` tool parameter definition.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Parameters for the `get_memory` MCP tool.
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct GetMemoryParams {
    /// Memory id as returned by `ingest_conversation`.
    #[schemars(description = "Memory id to fetch")]
    pub memory_id: String,
}
