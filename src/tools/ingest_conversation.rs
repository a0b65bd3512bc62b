//! MCP `ingest_conversation` tool parameter definition.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Parameters for the `ingest_conversation` MCP tool.
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct IngestConversationParams {
    /// The user's side of the exchange.
    #[schemars(description = "The user message text")]
    pub user: String,

    /// The assistant's side of the exchange.
    #[schemars(description = "The assistant response text")]
    pub assistant: String,

    /// Where the conversation came from: `"cli"`, `"obsidian"`, or `"editor"`.
    #[schemars(description = "Source tag: 'cli', 'obsidian', or 'editor'")]
    pub source: Option<String>,

    /// External references (URLs, file paths, commit ids).
    #[schemars(description = "External references: URLs, file paths, commit ids")]
    pub refs: Option<Vec<String>>,

    /// ISO-8601 creation time; defaults to now.
    #[schemars(description = "ISO-8601 timestamp of the conversation (defaults to now)")]
    pub timestamp: Option<String>,

    /// Project to associate the memory with.
    #[schemars(description = "Optional project id to associate the memory with")]
    pub project_id: Option<String>,

    /// Open metadata bag carried onto the stored memory.
    #[schemars(description = "Optional open metadata object")]
    pub metadata: Option<serde_json::Value>,
}
