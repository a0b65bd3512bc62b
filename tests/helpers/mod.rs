#![allow(dead_code)]

use anyhow::Result;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::RwLock;

use context_orchestrator::config::{
    ConsolidationConfig, LanguageConfig, ProjectConfig, RerankWeights, RerankerConfig,
    SearchConfig,
};
use context_orchestrator::embedding::{EmbeddingProvider, EMBEDDING_DIM};
use context_orchestrator::memory::chunker::{Chunker, TokenCounter};
use context_orchestrator::memory::classifier::SchemaClassifier;
use context_orchestrator::memory::consolidate::ConsolidationService;
use context_orchestrator::memory::indexer::Indexer;
use context_orchestrator::memory::ingest::IngestionService;
use context_orchestrator::memory::pool::ProjectMemoryPool;
use context_orchestrator::memory::rerank::CrossEncoderReranker;
use context_orchestrator::memory::search::SearchService;
use context_orchestrator::memory::summary::Summarizer;
use context_orchestrator::model::{GenerateOptions, ModelRouter, Reasoner};
use context_orchestrator::storage::{LexicalIndex, VectorStore};

/// Deterministic bag-of-words embedder. Texts sharing words land close in
/// cosine space; disjoint texts land far apart.
#[derive(Default)]
pub struct StubEmbedder;

impl StubEmbedder {
    pub fn embed_text(text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; EMBEDDING_DIM];
        for word in text.to_lowercase().split_whitespace() {
            let mut hash: u64 = 1469598103934665603;
            for b in word.bytes() {
                hash ^= b as u64;
                hash = hash.wrapping_mul(1099511628211);
            }
            v[(hash % EMBEDDING_DIM as u64) as usize] += 1.0;
        }
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut v {
                *x /= norm;
            }
        }
        v
    }
}

impl EmbeddingProvider for StubEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(Self::embed_text(text))
    }
}

/// Reasoner that replays a queue of outputs, repeating the last entry once
/// the queue drains.
pub struct ScriptedReasoner {
    outputs: Mutex<VecDeque<String>>,
    last: Mutex<String>,
}

impl ScriptedReasoner {
    pub fn new(outputs: Vec<&str>) -> Self {
        let last = outputs.last().map(|s| s.to_string()).unwrap_or_default();
        Self {
            outputs: Mutex::new(outputs.into_iter().map(String::from).collect()),
            last: Mutex::new(last),
        }
    }
}

#[async_trait]
impl Reasoner for ScriptedReasoner {
    async fn generate(&self, _prompt: &str, _opts: &GenerateOptions) -> Result<String> {
        let mut queue = self.outputs.lock().unwrap();
        match queue.pop_front() {
            Some(output) => Ok(output),
            None => Ok(self.last.lock().unwrap().clone()),
        }
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

pub const VALID_SUMMARY: &str =
    "Topic: test topic\nDocType: process\nProject: Unknown\nKeyActions:\n- Record the outcome";

/// The assembled service graph used by integration tests.
pub struct TestServices {
    pub ingest: Arc<IngestionService>,
    pub search: Arc<SearchService>,
    pub consolidation: Arc<ConsolidationService>,
    pub reranker: Arc<CrossEncoderReranker>,
    pub indexer: Indexer,
    _dir: tempfile::TempDir,
}

pub struct TestConfig {
    /// Local reasoner outputs, replayed in order.
    pub reasoner_outputs: Vec<&'static str>,
    pub cross_encoder_enabled: bool,
    pub search: SearchConfig,
    pub consolidation: ConsolidationConfig,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            // classifier answer, then summaries forever
            reasoner_outputs: vec!["Process", VALID_SUMMARY],
            cross_encoder_enabled: false,
            search: SearchConfig::default(),
            consolidation: ConsolidationConfig::default(),
        }
    }
}

/// Build the full service graph over an in-memory database with stub
/// embedder and scripted reasoner.
pub fn build_services(test_config: TestConfig) -> TestServices {
    let dir = tempfile::tempdir().unwrap();
    let conn = Arc::new(Mutex::new(
        context_orchestrator::db::open_memory_database().unwrap(),
    ));

    let vector = VectorStore::new(conn.clone());
    let lexical = LexicalIndex::new(conn);
    let indexer = Indexer::new(vector.clone(), lexical.clone());

    let router = Arc::new(ModelRouter::new(
        Arc::new(ScriptedReasoner::new(test_config.reasoner_outputs)),
        None,
    ));
    let embedder: Arc<dyn EmbeddingProvider> = Arc::new(StubEmbedder);
    let gate = Arc::new(RwLock::new(()));

    let ingest = Arc::new(IngestionService::new(
        indexer.clone(),
        SchemaClassifier::new(router.clone()),
        Summarizer::new(router.clone(), &LanguageConfig::default(), 1),
        Arc::new(Chunker::new(TokenCounter::approximate(), 512)),
        embedder.clone(),
        gate.clone(),
    ));

    let reranker_config = RerankerConfig {
        cross_encoder_enabled: test_config.cross_encoder_enabled,
        ..Default::default()
    };
    let reranker = Arc::new(CrossEncoderReranker::new(
        router,
        vector.clone(),
        reranker_config,
    ));
    let pool = Arc::new(ProjectMemoryPool::new(
        vector.clone(),
        &ProjectConfig::default(),
    ));

    let search = Arc::new(SearchService::new(
        vector,
        lexical,
        embedder,
        Some(reranker.clone()),
        pool,
        test_config.search,
        RerankWeights::default(),
    ));

    let consolidation = Arc::new(ConsolidationService::new(
        indexer.clone(),
        test_config.consolidation,
        gate,
        dir.path().join("last_consolidation"),
    ));

    TestServices {
        ingest,
        search,
        consolidation,
        reranker,
        indexer,
        _dir: dir,
    }
}

/// Shorthand: default services with an always-valid summariser.
pub fn default_services() -> TestServices {
    build_services(TestConfig::default())
}
