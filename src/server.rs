//! Server assembly and the stdio MCP entry point.
//!
//! Wires config → database → embedder → reasoners → services, spawns the
//! consolidation scheduler, and serves the tool router over stdio. Stdout
//! stays clean for JSON-RPC; all logging goes to stderr.

use anyhow::Result;
use rmcp::ServiceExt;
use std::sync::{Arc, Mutex};
use tokio::sync::RwLock;

use crate::config::OrchestratorConfig;
use crate::embedding::{local::LocalEmbedder, EmbeddingProvider};
use crate::memory::chunker::{Chunker, TokenCounter};
use crate::memory::classifier::SchemaClassifier;
use crate::memory::consolidate::ConsolidationService;
use crate::memory::indexer::Indexer;
use crate::memory::ingest::IngestionService;
use crate::memory::pool::ProjectMemoryPool;
use crate::memory::rerank::CrossEncoderReranker;
use crate::memory::search::SearchService;
use crate::memory::session::SessionManager;
use crate::memory::summary::Summarizer;
use crate::model::external::ExternalReasoner;
use crate::model::local::LocalReasoner;
use crate::model::{ModelRouter, Reasoner};
use crate::tools::OrchestratorTools;

pub struct AppState {
    pub ingest: Arc<IngestionService>,
    pub search: Arc<SearchService>,
    pub consolidation: Arc<ConsolidationService>,
    pub sessions: Arc<SessionManager>,
    pub config: Arc<OrchestratorConfig>,
}

/// Build every service from config.
pub fn build_state(config: OrchestratorConfig) -> Result<AppState> {
    let conn = crate::db::open_database(config.database_path())?;

    // Warn on embedding model changes; stored vectors would be stale.
    if let Ok(Some(stored_model)) = crate::db::migrations::get_embedding_model(&conn) {
        if stored_model != config.embedder.model {
            tracing::warn!(
                stored = %stored_model,
                configured = %config.embedder.model,
                "embedding model changed — previously stored vectors are stale"
            );
        }
    }
    let conn = Arc::new(Mutex::new(conn));

    let embedder = LocalEmbedder::new(&config.embedder)?;
    let counter = TokenCounter::Tokenizer(Arc::new(embedder.tokenizer()));
    let embedder: Arc<dyn EmbeddingProvider> = Arc::new(embedder);
    tracing::info!("embedder ready");

    let local: Arc<dyn Reasoner> = Arc::new(LocalReasoner::new(&config.reasoner.local));
    let external: Option<Arc<dyn Reasoner>> = ExternalReasoner::from_config(&config.reasoner.external)
        .map(|r| Arc::new(r) as Arc<dyn Reasoner>);
    if external.is_some() {
        tracing::info!(command = %config.reasoner.external.command, "external reasoner enabled");
    }
    let router = Arc::new(ModelRouter::new(local, external));

    let vector = crate::storage::VectorStore::new(conn.clone());
    let lexical = crate::storage::LexicalIndex::new(conn);
    let indexer = Indexer::new(vector.clone(), lexical.clone());

    let gate = Arc::new(RwLock::new(()));
    let chunker = Arc::new(Chunker::new(counter, config.chunker.max_tokens));

    let ingest = Arc::new(IngestionService::new(
        indexer.clone(),
        SchemaClassifier::new(router.clone()),
        Summarizer::new(
            router.clone(),
            &config.language,
            config.ingestion.summary_retry_max,
        ),
        chunker,
        embedder.clone(),
        gate.clone(),
    ));

    let reranker = Arc::new(CrossEncoderReranker::new(
        router.clone(),
        vector.clone(),
        config.reranker.clone(),
    ));
    let pool = Arc::new(ProjectMemoryPool::new(vector.clone(), &config.project));

    let search = Arc::new(SearchService::new(
        vector,
        lexical,
        embedder,
        Some(reranker),
        pool,
        config.search.clone(),
        config.reranker.weights.clone(),
    ));

    let consolidation = Arc::new(ConsolidationService::new(
        indexer,
        config.consolidation.clone(),
        gate,
        config.last_consolidation_path(),
    ));

    let sessions = Arc::new(SessionManager::new(&config.project));

    Ok(AppState {
        ingest,
        search,
        consolidation,
        sessions,
        config: Arc::new(config),
    })
}

/// Start the MCP server over stdio transport.
pub async fn serve_stdio(config: OrchestratorConfig) -> Result<()> {
    tracing::info!("starting Context Orchestrator MCP server on stdio");

    let state = build_state(config)?;

    let (scheduler, scheduler_shutdown) = crate::memory::scheduler::spawn(
        state.consolidation.clone(),
        state.config.consolidation.schedule.clone(),
        state.config.consolidation.enabled,
    );

    let tools = OrchestratorTools::new(
        state.ingest,
        state.search,
        state.consolidation,
        state.sessions,
        state.config,
    );
    let transport = rmcp::transport::stdio();

    let server = tools.serve(transport).await?;
    tracing::info!("MCP server running — waiting for client");

    server.waiting().await?;

    // A running consolidation step finishes before the task exits.
    let _ = scheduler_shutdown.send(true);
    let _ = scheduler.await;
    tracing::info!("MCP server shut down");

    Ok(())
}
