//! Task routing between the local and external reasoners.
//!
//! Lightweight tasks (classification, short summaries, cross-encoder
//! scoring) always run locally. Heavy tasks (long summaries, consolidation
//! reasoning) go external when a command is configured, with a silent
//! fallback to local on any external failure — a router preference never
//! fails a user-facing request.

use anyhow::Result;
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use super::{GenerateOptions, Reasoner};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    Classification,
    ShortSummary,
    LongSummary,
    CrossEncoderScore,
    Reasoning,
    Consolidation,
}

impl TaskKind {
    /// Lightweight tasks never leave the machine.
    pub fn is_lightweight(&self) -> bool {
        matches!(
            self,
            Self::Classification | Self::ShortSummary | Self::CrossEncoderScore
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteTarget {
    Local,
    External,
}

#[derive(Default)]
struct RouterMetrics {
    local_calls: AtomicU64,
    external_calls: AtomicU64,
    external_failures: AtomicU64,
    external_latency_total_ms: AtomicU64,
    external_latency_max_ms: AtomicU64,
}

pub struct ModelRouter {
    local: Arc<dyn Reasoner>,
    external: Option<Arc<dyn Reasoner>>,
    metrics: RouterMetrics,
}

impl ModelRouter {
    pub fn new(local: Arc<dyn Reasoner>, external: Option<Arc<dyn Reasoner>>) -> Self {
        Self {
            local,
            external,
            metrics: RouterMetrics::default(),
        }
    }

    pub fn external_enabled(&self) -> bool {
        self.external.is_some()
    }

    /// Routing decision for a task, before any forced override.
    pub fn target_for(&self, task: TaskKind) -> RouteTarget {
        if task.is_lightweight() || self.external.is_none() {
            RouteTarget::Local
        } else {
            RouteTarget::External
        }
    }

    /// Generate text for a task. `force` overrides the default routing
    /// (used by language-based summary routing); an unavailable external
    /// target silently resolves to local.
    pub async fn generate(
        &self,
        task: TaskKind,
        prompt: &str,
        opts: &GenerateOptions,
        force: Option<RouteTarget>,
    ) -> Result<String> {
        let target = match force {
            Some(RouteTarget::External) if self.external.is_some() => RouteTarget::External,
            Some(RouteTarget::External) => RouteTarget::Local,
            Some(RouteTarget::Local) => RouteTarget::Local,
            None => self.target_for(task),
        };

        match target {
            RouteTarget::Local => {
                self.metrics.local_calls.fetch_add(1, Ordering::Relaxed);
                self.local.generate(prompt, opts).await
            }
            RouteTarget::External => {
                let external = self.external.as_ref().expect("target checked above");
                self.metrics.external_calls.fetch_add(1, Ordering::Relaxed);
                let start = Instant::now();
                match external.generate(prompt, opts).await {
                    Ok(text) => {
                        self.record_external_latency(start);
                        Ok(text)
                    }
                    Err(err) => {
                        self.record_external_latency(start);
                        self.metrics
                            .external_failures
                            .fetch_add(1, Ordering::Relaxed);
                        // RouterFallback: logged, never surfaced
                        tracing::warn!(
                            task = ?task,
                            error = %err,
                            "external reasoner failed, falling back to local"
                        );
                        self.metrics.local_calls.fetch_add(1, Ordering::Relaxed);
                        self.local.generate(prompt, opts).await
                    }
                }
            }
        }
    }

    fn record_external_latency(&self, start: Instant) {
        let elapsed_ms = start.elapsed().as_millis() as u64;
        self.metrics
            .external_latency_total_ms
            .fetch_add(elapsed_ms, Ordering::Relaxed);
        self.metrics
            .external_latency_max_ms
            .fetch_max(elapsed_ms, Ordering::Relaxed);
    }

    pub fn metrics_snapshot(&self) -> serde_json::Value {
        let external_calls = self.metrics.external_calls.load(Ordering::Relaxed);
        let total_ms = self.metrics.external_latency_total_ms.load(Ordering::Relaxed);
        json!({
            "local_calls": self.metrics.local_calls.load(Ordering::Relaxed),
            "external_calls": external_calls,
            "external_failures": self.metrics.external_failures.load(Ordering::Relaxed),
            "external_latency_avg_ms": if external_calls > 0 {
                total_ms as f64 / external_calls as f64
            } else {
                0.0
            },
            "external_latency_max_ms": self.metrics.external_latency_max_ms.load(Ordering::Relaxed),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    struct ScriptedReasoner {
        output: Option<&'static str>,
        calls: AtomicUsize,
        name: &'static str,
    }

    impl ScriptedReasoner {
        fn ok(name: &'static str, output: &'static str) -> Self {
            Self {
                output: Some(output),
                calls: AtomicUsize::new(0),
                name,
            }
        }

        fn failing(name: &'static str) -> Self {
            Self {
                output: None,
                calls: AtomicUsize::new(0),
                name,
            }
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Reasoner for ScriptedReasoner {
        async fn generate(&self, _prompt: &str, _opts: &GenerateOptions) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.output {
                Some(text) => Ok(text.to_string()),
                None => anyhow::bail!("scripted failure"),
            }
        }

        fn name(&self) -> &'static str {
            self.name
        }
    }

    #[test]
    fn lightweight_tasks_route_local() {
        let local = Arc::new(ScriptedReasoner::ok("local", "ok"));
        let external = Arc::new(ScriptedReasoner::ok("external", "ok"));
        let router = ModelRouter::new(local, Some(external));

        assert_eq!(
            router.target_for(TaskKind::Classification),
            RouteTarget::Local
        );
        assert_eq!(
            router.target_for(TaskKind::CrossEncoderScore),
            RouteTarget::Local
        );
        assert_eq!(
            router.target_for(TaskKind::LongSummary),
            RouteTarget::External
        );
        assert_eq!(
            router.target_for(TaskKind::Consolidation),
            RouteTarget::External
        );
    }

    #[test]
    fn heavy_tasks_route_local_when_external_disabled() {
        let local = Arc::new(ScriptedReasoner::ok("local", "ok"));
        let router = ModelRouter::new(local, None);
        assert_eq!(router.target_for(TaskKind::LongSummary), RouteTarget::Local);
        assert!(!router.external_enabled());
    }

    #[tokio::test]
    async fn external_failure_falls_back_to_local() {
        let local = Arc::new(ScriptedReasoner::ok("local", "local says hi"));
        let external = Arc::new(ScriptedReasoner::failing("external"));
        let router = ModelRouter::new(local.clone(), Some(external.clone()));

        let out = router
            .generate(
                TaskKind::LongSummary,
                "prompt",
                &GenerateOptions::default(),
                None,
            )
            .await
            .unwrap();

        assert_eq!(out, "local says hi");
        assert_eq!(external.call_count(), 1);
        assert_eq!(local.call_count(), 1);

        let metrics = router.metrics_snapshot();
        assert_eq!(metrics["external_failures"], 1);
    }

    #[tokio::test]
    async fn forced_external_resolves_local_when_unavailable() {
        let local = Arc::new(ScriptedReasoner::ok("local", "fine"));
        let router = ModelRouter::new(local.clone(), None);

        let out = router
            .generate(
                TaskKind::ShortSummary,
                "prompt",
                &GenerateOptions::default(),
                Some(RouteTarget::External),
            )
            .await
            .unwrap();

        assert_eq!(out, "fine");
        assert_eq!(local.call_count(), 1);
    }

    #[tokio::test]
    async fn forced_external_uses_external() {
        let local = Arc::new(ScriptedReasoner::ok("local", "local"));
        let external = Arc::new(ScriptedReasoner::ok("external", "external"));
        let router = ModelRouter::new(local.clone(), Some(external.clone()));

        let out = router
            .generate(
                TaskKind::ShortSummary,
                "prompt",
                &GenerateOptions::default(),
                Some(RouteTarget::External),
            )
            .await
            .unwrap();

        assert_eq!(out, "external");
        assert_eq!(local.call_count(), 0);
    }
}
