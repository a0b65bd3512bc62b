//! MCP tool surface.
//!
//! [`OrchestratorTools`] holds the shared services and exposes the
//! JSON-RPC tools via the rmcp `#[tool_router]` macro. Validation failures
//! map to `InvalidRequest`; internal failures carry their error kind in
//! the returned message. Stack traces stay in the logs.

pub mod get_memory;
pub mod ingest_conversation;
pub mod list_recent_memories;
pub mod search_memory;
pub mod sessions;

use rmcp::handler::server::tool::ToolRouter;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::{tool, tool_handler, tool_router, ServerHandler};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use get_memory::GetMemoryParams;
use ingest_conversation::IngestConversationParams;
use list_recent_memories::ListRecentMemoriesParams;
use search_memory::SearchMemoryParams;
use sessions::{AddCommandParams, EndSessionParams, StartSessionParams};

use crate::config::OrchestratorConfig;
use crate::error::OrchestratorError;
use crate::memory::consolidate::ConsolidationService;
use crate::memory::ingest::IngestionService;
use crate::memory::search::{SearchOptions, SearchService};
use crate::memory::session::SessionManager;
use crate::memory::types::{parse_timestamp, Conversation};
use crate::storage::MetadataFilter;

/// The MCP tool handler: shared state plus the generated tool router.
#[derive(Clone)]
pub struct OrchestratorTools {
    tool_router: ToolRouter<Self>,
    ingest: Arc<IngestionService>,
    search: Arc<SearchService>,
    consolidation: Arc<ConsolidationService>,
    sessions: Arc<SessionManager>,
    config: Arc<OrchestratorConfig>,
}

#[tool_router]
impl OrchestratorTools {
    pub fn new(
        ingest: Arc<IngestionService>,
        search: Arc<SearchService>,
        consolidation: Arc<ConsolidationService>,
        sessions: Arc<SessionManager>,
        config: Arc<OrchestratorConfig>,
    ) -> Self {
        Self {
            tool_router: Self::tool_router(),
            ingest,
            search,
            consolidation,
            sessions,
            config,
        }
    }

    /// Ingest a conversation into the memory store.
    #[tool(
        description = "Ingest a user/assistant conversation: classify, summarize, chunk, embed, and index it. Returns the new memory_id."
    )]
    async fn ingest_conversation(
        &self,
        Parameters(params): Parameters<IngestConversationParams>,
    ) -> Result<String, String> {
        let timestamp = match &params.timestamp {
            Some(raw) => Some(parse_timestamp(raw).ok_or_else(|| {
                OrchestratorError::InvalidRequest(format!("unparseable timestamp: {raw}"))
                    .to_wire()
            })?),
            None => None,
        };

        let conversation = Conversation {
            user: params.user,
            assistant: params.assistant,
            source: params.source,
            refs: params.refs.unwrap_or_default(),
            timestamp,
            project_id: params.project_id,
            language_override: None,
            metadata: params.metadata.unwrap_or_else(|| json!({})),
        };

        let memory_id = self
            .ingest
            .ingest(conversation)
            .await
            .map_err(|e| e.to_wire())?;

        Ok(json!({ "memory_id": memory_id }).to_string())
    }

    /// Hybrid search over past memories.
    #[tool(
        description = "Search memories with hybrid vector + keyword retrieval, rule-based rerank, and optional cross-encoder rerank. Project-scoped searches use the pool-first workflow."
    )]
    async fn search_memory(
        &self,
        Parameters(params): Parameters<SearchMemoryParams>,
    ) -> Result<String, String> {
        let filters = match &params.filters {
            Some(value) => Some(MetadataFilter::from_request(value).map_err(|msg| {
                OrchestratorError::InvalidRequest(msg).to_wire()
            })?),
            None => None,
        };

        let options = SearchOptions {
            top_k: params.top_k,
            filters,
            project_id: params.project_id,
            include_session_summaries: params.include_session_summaries,
            prefetch: false,
        };

        let failures_before = self
            .search
            .reranker()
            .map(|r| r.score_failure_count())
            .unwrap_or(0);

        let timeout = Duration::from_secs(self.config.search.timeout_seconds.max(1));
        let results = match tokio::time::timeout(timeout, self.search.search(&params.query, options))
            .await
        {
            Ok(result) => result.map_err(|e| e.to_wire())?,
            Err(_) => {
                return Err(
                    OrchestratorError::Timeout(self.config.search.timeout_seconds).to_wire(),
                )
            }
        };

        let mut response = json!({ "results": results });
        let failures_after = self
            .search
            .reranker()
            .map(|r| r.score_failure_count())
            .unwrap_or(0);
        if failures_after > failures_before {
            // The cross-encoder layer failed for some pairs; the call still
            // succeeds with rule-based ordering.
            response["warning"] = json!("cross-encoder rerank degraded to rule-based order");
        }

        serde_json::to_string(&response).map_err(|e| format!("serialization failed: {e}"))
    }

    /// Fetch one memory with its chunks.
    #[tool(description = "Fetch a memory by id, including its chunks.")]
    async fn get_memory(
        &self,
        Parameters(params): Parameters<GetMemoryParams>,
    ) -> Result<String, String> {
        let ingest = Arc::clone(&self.ingest);
        let memory_id = params.memory_id.clone();
        let (memory, chunks) = tokio::task::spawn_blocking(move || ingest.get_memory(&memory_id))
            .await
            .map_err(|e| format!("task failed: {e}"))?
            .map_err(|e| e.to_wire())?;

        serde_json::to_string(&json!({ "memory": memory, "chunks": chunks }))
            .map_err(|e| format!("serialization failed: {e}"))
    }

    /// List recently ingested memories.
    #[tool(description = "List recent memories, newest first, with optional metadata filters.")]
    async fn list_recent_memories(
        &self,
        Parameters(params): Parameters<ListRecentMemoriesParams>,
    ) -> Result<String, String> {
        let filters = match &params.filters {
            Some(value) => Some(MetadataFilter::from_request(value).map_err(|msg| {
                OrchestratorError::InvalidRequest(msg).to_wire()
            })?),
            None => None,
        };
        let limit = params.limit.unwrap_or(20);

        let search = Arc::clone(&self.search);
        let memories =
            tokio::task::spawn_blocking(move || search.list_recent(limit, filters.as_ref()))
                .await
                .map_err(|e| format!("task failed: {e}"))?
                .map_err(|e| e.to_wire())?;

        serde_json::to_string(&json!({ "memories": memories }))
            .map_err(|e| format!("serialization failed: {e}"))
    }

    /// Run the consolidation pass now.
    #[tool(
        description = "Run memory consolidation synchronously: migrate tiers, cluster similar memories, compress, forget, and sweep orphans. Returns statistics."
    )]
    async fn consolidate_memories(&self) -> Result<String, String> {
        let stats = self
            .consolidation
            .consolidate()
            .await
            .map_err(|e| e.to_wire())?;
        serde_json::to_string(&stats).map_err(|e| format!("serialization failed: {e}"))
    }

    /// Start a session.
    #[tool(description = "Start a session for command tracking and project inference.")]
    async fn start_session(
        &self,
        Parameters(params): Parameters<StartSessionParams>,
    ) -> Result<String, String> {
        let session_id = params
            .session_id
            .unwrap_or_else(|| format!("sess-{}", uuid::Uuid::now_v7()));
        self.sessions.start_session(&session_id);
        Ok(json!({ "session_id": session_id }).to_string())
    }

    /// End a session.
    #[tool(description = "End a session and return its summary.")]
    async fn end_session(
        &self,
        Parameters(params): Parameters<EndSessionParams>,
    ) -> Result<String, String> {
        let summary = self
            .sessions
            .end_session(&params.session_id)
            .map_err(|e| e.to_wire())?;
        Ok(summary.to_string())
    }

    /// Record a command event.
    #[tool(
        description = "Record a command event in a session. May emit a project hint that warms the project's retrieval caches in the background."
    )]
    async fn add_command(
        &self,
        Parameters(params): Parameters<AddCommandParams>,
    ) -> Result<String, String> {
        let warmup = self
            .sessions
            .add_command(
                &params.session_id,
                &params.command,
                params.cwd.as_deref(),
                params.project.as_deref(),
            )
            .map_err(|e| e.to_wire())?;

        let prefetch_triggered = warmup.is_some();
        if let Some(request) = warmup {
            // Warm-up is best-effort and must never block the caller.
            let search = Arc::clone(&self.search);
            let queries = self.config.project.prefetch_queries.clone();
            tokio::spawn(async move {
                let stats = search.prefetch_project(&request.project_id, &queries).await;
                tracing::info!(stats = %stats, "project prefetch finished");
            });
        }

        Ok(json!({ "recorded": true, "prefetch_triggered": prefetch_triggered }).to_string())
    }

    /// Reranker cache and latency metrics.
    #[tool(
        description = "Snapshot of reranker cache hit/miss counts per layer, scoring latency, queue length, and prefetch counters."
    )]
    async fn get_reranker_metrics(&self) -> Result<String, String> {
        let reranker = self
            .search
            .reranker()
            .map(|r| r.metrics_snapshot())
            .unwrap_or_else(|| json!({ "enabled": false }));

        Ok(json!({
            "reranker": reranker,
            "search": self.search.metrics_snapshot(),
            "language_routing": self.ingest.language_routing_metrics(),
        })
        .to_string())
    }
}

#[tool_handler]
impl ServerHandler for OrchestratorTools {
    fn get_info(&self) -> rmcp::model::ServerInfo {
        rmcp::model::ServerInfo {
            instructions: Some(
                "Context Orchestrator is a personal memory server. Use ingest_conversation \
                 to record exchanges, search_memory to retrieve past experiences, and \
                 consolidate_memories to run lifecycle maintenance."
                    .into(),
            ),
            capabilities: rmcp::model::ServerCapabilities::builder()
                .enable_tools()
                .build(),
            ..Default::default()
        }
    }
}
