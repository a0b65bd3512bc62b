//! Reasoner clients and task routing.
//!
//! Two reasoner backends produce short text outputs (classification labels,
//! structured summaries, cross-encoder scores): [`local::LocalReasoner`]
//! talks to an Ollama server, [`external::ExternalReasoner`] shells out to a
//! CLI assistant. [`router::ModelRouter`] picks between them per task and
//! falls back to local when the external side misbehaves.

pub mod external;
pub mod local;
pub mod router;

use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;

pub use router::{ModelRouter, RouteTarget, TaskKind};

/// Generation knobs passed through to a reasoner backend.
#[derive(Debug, Clone)]
pub struct GenerateOptions {
    pub max_tokens: Option<u32>,
    pub temperature: f32,
    pub timeout: Duration,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self {
            max_tokens: None,
            temperature: 0.0,
            timeout: Duration::from_secs(60),
        }
    }
}

impl GenerateOptions {
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// A text-in, text-out reasoner. Implementations are opaque and may fail;
/// the router owns fallback policy.
#[async_trait]
pub trait Reasoner: Send + Sync {
    async fn generate(&self, prompt: &str, opts: &GenerateOptions) -> Result<String>;

    /// Short label for logs and metrics.
    fn name(&self) -> &'static str;
}
