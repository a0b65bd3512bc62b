//! Shared unit-test doubles: a deterministic embedder and a scripted
//! reasoner. Integration tests carry their own copies under
//! `tests/helpers`.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::embedding::{EmbeddingProvider, EMBEDDING_DIM};
use crate::model::{GenerateOptions, ModelRouter, Reasoner};

/// Deterministic bag-of-words embedder: each word bumps a hashed
/// dimension, then L2-normalize. Texts sharing words land close in cosine
/// space; disjoint texts land far apart.
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

/// Embedder that always fails — for IngestFailed(embedding) paths.
pub struct FailingEmbedder;

impl EmbeddingProvider for FailingEmbedder {
    fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        anyhow::bail!("stub embedder failure")
    }
}

/// Reasoner that replays a queue of outputs, repeating the last entry once
/// the queue drains.
pub struct ScriptedReasoner {
    outputs: Mutex<VecDeque<String>>,
    last: Mutex<String>,
    calls: std::sync::atomic::AtomicUsize,
}

impl ScriptedReasoner {
    pub fn new(outputs: Vec<&str>) -> Self {
        let last = outputs.last().map(|s| s.to_string()).unwrap_or_default();
        Self {
            outputs: Mutex::new(outputs.into_iter().map(String::from).collect()),
            last: Mutex::new(last),
            calls: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[async_trait]
impl Reasoner for ScriptedReasoner {
    async fn generate(&self, _prompt: &str, _opts: &GenerateOptions) -> Result<String> {
        self.calls
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
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

/// Router over a scripted local reasoner, external disabled.
pub fn scripted_router(outputs: Vec<&str>) -> Arc<ModelRouter> {
    Arc::new(ModelRouter::new(
        Arc::new(ScriptedReasoner::new(outputs)),
        None,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stub_embedder_is_deterministic_and_similarity_aware() {
        let a = StubEmbedder::embed_text("ecs egress security group");
        let b = StubEmbedder::embed_text("ecs egress security group");
        let c = StubEmbedder::embed_text("completely unrelated words here");
        assert_eq!(a, b);

        let sim_ab = crate::storage::cosine_similarity(&a, &b);
        let sim_ac = crate::storage::cosine_similarity(&a, &c);
        assert!((sim_ab - 1.0).abs() < 1e-6);
        assert!(sim_ac < 0.5);
    }

    #[tokio::test]
    async fn scripted_reasoner_replays_then_repeats() {
        let reasoner = ScriptedReasoner::new(vec!["one", "two"]);
        let opts = GenerateOptions::default();
        assert_eq!(reasoner.generate("", &opts).await.unwrap(), "one");
        assert_eq!(reasoner.generate("", &opts).await.unwrap(), "two");
        assert_eq!(reasoner.generate("", &opts).await.unwrap(), "two");
        assert_eq!(reasoner.call_count(), 3);
    }
}
