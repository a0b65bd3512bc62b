//! Session lifecycle tool parameter definitions.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Parameters for the `start_session` MCP tool.
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct StartSessionParams {
    /// Session id; generated when omitted.
    #[schemars(description = "Session id; a fresh one is generated when omitted")]
    pub session_id: Option<String>,
}

/// Parameters for the `end_session` MCP tool.
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct EndSessionParams {
    /// Session id to close.
    #[schemars(description = "Session id to close")]
    pub session_id: String,
}

/// Parameters for the `add_command` MCP tool.
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct AddCommandParams {
    /// Session the command belongs to.
    #[schemars(description = "Session id the command belongs to")]
    pub session_id: String,

    /// The command line that was executed.
    #[schemars(description = "The command line that was executed")]
    pub command: String,

    /// Working directory of the command, used for project inference.
    #[schemars(description = "Working directory of the command")]
    pub cwd: Option<String>,

    /// Explicit project association, overrides inference.
    #[schemars(description = "Explicit project id (overrides cwd inference)")]
    pub project: Option<String>,
}
