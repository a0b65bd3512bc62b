use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub embedder: EmbedderConfig,
    pub reasoner: ReasonerConfig,
    pub chunker: ChunkerConfig,
    pub ingestion: IngestionConfig,
    pub search: SearchConfig,
    pub reranker: RerankerConfig,
    pub consolidation: ConsolidationConfig,
    pub project: ProjectConfig,
    pub language: LanguageConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub log_level: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EmbedderConfig {
    pub model: String,
    pub cache_dir: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ReasonerConfig {
    pub local: LocalReasonerConfig,
    pub external: ExternalReasonerConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LocalReasonerConfig {
    pub model: String,
    pub base_url: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ExternalReasonerConfig {
    /// CLI command invoked for heavy tasks. Empty disables the external reasoner.
    pub command: String,
    pub timeout_seconds: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ChunkerConfig {
    pub max_tokens: usize,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct IngestionConfig {
    /// Retries after the first failed structured-summary attempt.
    pub summary_retry_max: u32,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SearchConfig {
    pub top_k: usize,
    pub vector_candidate_count: usize,
    pub lexical_candidate_count: usize,
    pub pool_candidate_count: usize,
    pub include_session_summaries: bool,
    pub timeout_seconds: u64,
    pub recency_half_life_hours: f64,
    /// Minimum score a pool-pass result must reach to count as sufficient.
    pub min_score_threshold: f64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RerankerConfig {
    pub cross_encoder_enabled: bool,
    pub cross_encoder_top_k: usize,
    pub cross_encoder_cache_size: usize,
    pub cross_encoder_cache_ttl_seconds: u64,
    pub cross_encoder_max_parallel: usize,
    pub semantic_hit_threshold: f64,
    /// Blend between the rule-based combined score and the cross-encoder
    /// score: final = (1 - w) * combined + w * rerank.
    pub blend_weight: f64,
    pub weights: RerankWeights,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RerankWeights {
    pub strength: f64,
    pub recency: f64,
    pub refs: f64,
    pub lexical: f64,
    pub vector: f64,
    pub metadata: f64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ConsolidationConfig {
    pub enabled: bool,
    /// Daily fire time, `HH:MM` local.
    pub schedule: String,
    pub age_threshold_days: i64,
    pub importance_threshold: f64,
    pub cluster_similarity_threshold: f64,
    pub min_cluster_size: usize,
    pub working_retention_hours: i64,
    pub long_term_threshold: f64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ProjectConfig {
    pub prefetch_threshold: f64,
    pub pool_size_cap: usize,
    pub pool_ttl_seconds: u64,
    /// Maximum distinct projects kept warm at once.
    pub pool_project_cap: usize,
    pub prefetch_queries: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LanguageConfig {
    pub supported_local: Vec<String>,
    /// `"local"` or `"external"` — where summaries in unsupported languages route.
    pub fallback_strategy: String,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            storage: StorageConfig::default(),
            embedder: EmbedderConfig::default(),
            reasoner: ReasonerConfig::default(),
            chunker: ChunkerConfig::default(),
            ingestion: IngestionConfig::default(),
            search: SearchConfig::default(),
            reranker: RerankerConfig::default(),
            consolidation: ConsolidationConfig::default(),
            project: ProjectConfig::default(),
            language: LanguageConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            log_level: "info".into(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        let data_dir = default_data_dir().to_string_lossy().into_owned();
        Self { data_dir }
    }
}

impl Default for EmbedderConfig {
    fn default() -> Self {
        let cache_dir = default_data_dir()
            .join("models")
            .to_string_lossy()
            .into_owned();
        Self {
            model: "all-MiniLM-L6-v2".into(),
            cache_dir,
        }
    }
}

impl Default for ReasonerConfig {
    fn default() -> Self {
        Self {
            local: LocalReasonerConfig::default(),
            external: ExternalReasonerConfig::default(),
        }
    }
}

impl Default for LocalReasonerConfig {
    fn default() -> Self {
        Self {
            model: "qwen2.5:7b".into(),
            base_url: "http://127.0.0.1:11434".into(),
        }
    }
}

impl Default for ExternalReasonerConfig {
    fn default() -> Self {
        Self {
            command: String::new(),
            timeout_seconds: 60,
        }
    }
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self { max_tokens: 512 }
    }
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            summary_retry_max: 1,
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            top_k: 10,
            vector_candidate_count: 100,
            lexical_candidate_count: 30,
            pool_candidate_count: 30,
            include_session_summaries: true,
            timeout_seconds: 30,
            recency_half_life_hours: 24.0,
            min_score_threshold: 0.3,
        }
    }
}

impl Default for RerankerConfig {
    fn default() -> Self {
        Self {
            cross_encoder_enabled: false,
            cross_encoder_top_k: 5,
            cross_encoder_cache_size: 256,
            cross_encoder_cache_ttl_seconds: 28_800,
            cross_encoder_max_parallel: 3,
            semantic_hit_threshold: 0.85,
            blend_weight: 0.5,
            weights: RerankWeights::default(),
        }
    }
}

impl Default for RerankWeights {
    fn default() -> Self {
        Self {
            strength: 0.3,
            recency: 0.2,
            refs: 0.1,
            lexical: 0.2,
            vector: 0.2,
            metadata: 1.0,
        }
    }
}

impl Default for ConsolidationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            schedule: "03:00".into(),
            age_threshold_days: 30,
            importance_threshold: 0.3,
            cluster_similarity_threshold: 0.9,
            min_cluster_size: 2,
            working_retention_hours: 8,
            long_term_threshold: 0.8,
        }
    }
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            prefetch_threshold: 0.8,
            pool_size_cap: 100,
            pool_ttl_seconds: 28_800,
            pool_project_cap: 8,
            prefetch_queries: Vec::new(),
        }
    }
}

impl Default for LanguageConfig {
    fn default() -> Self {
        Self {
            supported_local: vec!["en".into(), "ja".into(), "es".into()],
            fallback_strategy: "external".into(),
        }
    }
}

/// Returns `~/.context-orchestrator/`
pub fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .expect("home directory must exist")
        .join(".context-orchestrator")
}

/// Returns the default config file path: `~/.context-orchestrator/config.toml`
pub fn default_config_path() -> PathBuf {
    default_data_dir().join("config.toml")
}

impl OrchestratorConfig {
    /// Load config from the TOML file (if it exists) then apply env overrides.
    /// Loaded once at startup; treated as immutable for the process lifetime.
    pub fn load() -> Result<Self> {
        Self::load_from(default_config_path())
    }

    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let contents =
                std::fs::read_to_string(path).context("failed to read config file")?;
            toml::from_str(&contents).context("failed to parse config TOML")?
        } else {
            info!("no config file at {}, using defaults", path.display());
            OrchestratorConfig::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("CONTEXT_ORCHESTRATOR_DATA_DIR") {
            self.storage.data_dir = val;
        }
        if let Ok(val) = std::env::var("CONTEXT_ORCHESTRATOR_LOG_LEVEL") {
            self.server.log_level = val;
        }
    }

    /// Resolve the data directory, expanding `~` if needed.
    pub fn resolved_data_dir(&self) -> PathBuf {
        expand_tilde(&self.storage.data_dir)
    }

    /// Path of the SQLite database holding both indexes.
    pub fn database_path(&self) -> PathBuf {
        self.resolved_data_dir().join("orchestrator.db")
    }

    /// Path of the `last_consolidation` timestamp file.
    pub fn last_consolidation_path(&self) -> PathBuf {
        self.resolved_data_dir().join("last_consolidation")
    }

    /// The external reasoner is available only when a command is configured.
    pub fn external_reasoner_enabled(&self) -> bool {
        !self.reasoner.external.command.trim().is_empty()
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        dirs::home_dir()
            .expect("home directory must exist")
            .join(rest)
    } else {
        PathBuf::from(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.server.log_level, "info");
        assert_eq!(config.search.top_k, 10);
        assert_eq!(config.search.vector_candidate_count, 100);
        assert_eq!(config.search.lexical_candidate_count, 30);
        assert_eq!(config.reranker.cross_encoder_cache_ttl_seconds, 28_800);
        assert_eq!(config.consolidation.working_retention_hours, 8);
        assert!(config.storage.data_dir.ends_with(".context-orchestrator"));
        assert!(!config.external_reasoner_enabled());
    }

    #[test]
    fn parse_toml_config() {
        let toml_str = r#"
[server]
log_level = "debug"

[storage]
data_dir = "/tmp/orchestrator-test"

[search]
top_k = 5
vector_candidate_count = 50

[reasoner.external]
command = "claude"

[reranker]
cross_encoder_enabled = true

[reranker.weights]
strength = 0.4
"#;
        let config: OrchestratorConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.log_level, "debug");
        assert_eq!(config.storage.data_dir, "/tmp/orchestrator-test");
        assert_eq!(config.search.top_k, 5);
        assert_eq!(config.search.vector_candidate_count, 50);
        assert!(config.external_reasoner_enabled());
        assert!(config.reranker.cross_encoder_enabled);
        assert!((config.reranker.weights.strength - 0.4).abs() < 1e-9);
        // defaults still apply for unset fields
        assert!((config.reranker.weights.recency - 0.2).abs() < 1e-9);
        assert_eq!(config.search.lexical_candidate_count, 30);
    }

    #[test]
    fn env_overrides_apply() {
        let mut config = OrchestratorConfig::default();
        std::env::set_var("CONTEXT_ORCHESTRATOR_DATA_DIR", "/tmp/override-dir");
        std::env::set_var("CONTEXT_ORCHESTRATOR_LOG_LEVEL", "trace");

        config.apply_env_overrides();

        assert_eq!(config.storage.data_dir, "/tmp/override-dir");
        assert_eq!(config.server.log_level, "trace");

        std::env::remove_var("CONTEXT_ORCHESTRATOR_DATA_DIR");
        std::env::remove_var("CONTEXT_ORCHESTRATOR_LOG_LEVEL");
    }

    #[test]
    fn empty_external_command_disables_rext() {
        let config: OrchestratorConfig = toml::from_str(
            r#"
[reasoner.external]
command = "   "
"#,
        )
        .unwrap();
        assert!(!config.external_reasoner_enabled());
    }
}
