//! Structured summary contract and generation.
//!
//! The summariser must emit:
//!
//! ```text
//! Topic: <non-empty>
//! DocType: <incident|decision|checklist|guide|snippet|process|...>
//! Project: <name or "Unknown">
//! KeyActions:
//! - <imperative line>
//! ```
//!
//! Validation failure triggers a stricter-prompt retry, then a
//! deterministic fallback built from the first sentence and up to three
//! imperative clauses. Downstream rerank features and the project-hint
//! extraction depend on this shape; keep it strict.

use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::config::LanguageConfig;
use crate::memory::keywords::extract_keywords;
use crate::memory::types::Conversation;
use crate::model::{GenerateOptions, ModelRouter, RouteTarget, TaskKind};

const STRUCTURED_HEADERS: [&str; 4] = ["Topic:", "DocType:", "Project:", "KeyActions:"];

/// Parsed form of a valid structured summary.
#[derive(Debug, Clone, PartialEq)]
pub struct StructuredSummary {
    pub topic: String,
    pub doc_type: String,
    pub project: String,
    pub key_actions: Vec<String>,
}

/// Validate the structured form: fixed header order, each `KeyActions`
/// item starting with `- `. Leading/trailing whitespace is tolerated.
pub fn is_structured_summary(summary: &str) -> bool {
    parse_structured_summary(summary).is_some()
}

pub fn parse_structured_summary(summary: &str) -> Option<StructuredSummary> {
    let lines: Vec<&str> = summary.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
    if lines.len() < 5 {
        return None;
    }
    for (header, line) in STRUCTURED_HEADERS.iter().zip(lines.iter()) {
        if !line.starts_with(header) {
            return None;
        }
    }

    let topic = lines[0].strip_prefix("Topic:")?.trim().to_string();
    if topic.is_empty() {
        return None;
    }
    let doc_type = lines[1].strip_prefix("DocType:")?.trim().to_string();
    let project = lines[2].strip_prefix("Project:")?.trim().to_string();

    // KeyActions header must be bare; the bullets follow.
    if !lines[3].strip_prefix("KeyActions:")?.trim().is_empty() {
        return None;
    }

    let mut key_actions = Vec::new();
    for line in &lines[4..] {
        let action = line.strip_prefix("- ")?;
        if action.trim().is_empty() {
            return None;
        }
        key_actions.push(action.trim().to_string());
    }
    if key_actions.is_empty() {
        return None;
    }

    Some(StructuredSummary {
        topic,
        doc_type,
        project,
        key_actions,
    })
}

/// Aggregate stats for language-based routing decisions, exposed through
/// the metrics surface.
#[derive(Default)]
pub struct LanguageRoutingMetrics {
    total_requests: AtomicU64,
    local_requests: AtomicU64,
    external_requests: AtomicU64,
    external_failures: AtomicU64,
    external_latency_total_ms: AtomicU64,
    external_latency_max_ms: AtomicU64,
}

impl LanguageRoutingMetrics {
    pub fn record(&self, target: RouteTarget, duration_ms: u64, success: bool) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        match target {
            RouteTarget::Local => {
                self.local_requests.fetch_add(1, Ordering::Relaxed);
            }
            RouteTarget::External => {
                self.external_requests.fetch_add(1, Ordering::Relaxed);
                self.external_latency_total_ms
                    .fetch_add(duration_ms, Ordering::Relaxed);
                self.external_latency_max_ms
                    .fetch_max(duration_ms, Ordering::Relaxed);
                if !success {
                    self.external_failures.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    }

    pub fn snapshot(&self) -> Value {
        let external = self.external_requests.load(Ordering::Relaxed);
        let total_ms = self.external_latency_total_ms.load(Ordering::Relaxed);
        serde_json::json!({
            "total_requests": self.total_requests.load(Ordering::Relaxed),
            "local_requests": self.local_requests.load(Ordering::Relaxed),
            "external_requests": external,
            "external_failures": self.external_failures.load(Ordering::Relaxed),
            "avg_external_latency_ms": if external > 0 { total_ms as f64 / external as f64 } else { 0.0 },
            "max_external_latency_ms": self.external_latency_max_ms.load(Ordering::Relaxed),
        })
    }
}

pub struct Summarizer {
    router: Arc<ModelRouter>,
    supported_local: Vec<String>,
    fallback_strategy: String,
    retry_max: u32,
    metrics: LanguageRoutingMetrics,
}

impl Summarizer {
    pub fn new(router: Arc<ModelRouter>, language: &LanguageConfig, retry_max: u32) -> Self {
        Self {
            router,
            supported_local: language
                .supported_local
                .iter()
                .map(|l| l.to_lowercase())
                .collect(),
            fallback_strategy: language.fallback_strategy.to_lowercase(),
            retry_max,
            metrics: LanguageRoutingMetrics::default(),
        }
    }

    pub fn metrics_snapshot(&self) -> Value {
        self.metrics.snapshot()
    }

    /// Detect the conversation language and resolve the override chain:
    /// explicit metadata > environment override > script heuristic > "en".
    pub fn resolve_language(&self, conversation: &Conversation) -> String {
        if let Some(explicit) = conversation
            .language_override
            .as_deref()
            .or_else(|| {
                conversation
                    .metadata
                    .get("language_override")
                    .and_then(Value::as_str)
            })
        {
            return explicit.to_lowercase();
        }
        if let Ok(env_override) = std::env::var("CONTEXT_ORCHESTRATOR_LANG_OVERRIDE") {
            if !env_override.trim().is_empty() {
                return env_override.to_lowercase();
            }
        }
        detect_language(&format!("{} {}", conversation.user, conversation.assistant))
    }

    /// Where a summary in this language should run.
    pub fn routing_for(&self, language: &str) -> RouteTarget {
        if self.supported_local.iter().any(|l| l == language) {
            RouteTarget::Local
        } else if self.fallback_strategy == "external" {
            RouteTarget::External
        } else {
            RouteTarget::Local
        }
    }

    /// Generate a structured summary, retrying with a stricter prompt, then
    /// falling back deterministically. Never fails.
    pub async fn summarize(&self, conversation: &Conversation, language: &str) -> String {
        let target = self.routing_for(language);
        let content = conversation.to_content();
        let attempts = 1 + self.retry_max;

        for attempt in 1..=attempts {
            let prompt = build_prompt(&content, language, attempt > 1);
            let opts = GenerateOptions::default().with_max_tokens(200);
            let start = Instant::now();
            let result = self
                .router
                .generate(TaskKind::ShortSummary, &prompt, &opts, Some(target))
                .await;
            let duration_ms = start.elapsed().as_millis() as u64;

            let cleaned = result
                .as_deref()
                .map(str::trim)
                .unwrap_or_default()
                .to_string();
            let valid = is_structured_summary(&cleaned);
            self.metrics.record(target, duration_ms, valid);

            if valid {
                return cleaned;
            }
            tracing::warn!(attempt, "structured summary validation failed");
        }

        tracing::warn!("structured summary generation exhausted retries, using fallback");
        fallback_summary(conversation)
    }
}

fn build_prompt(content: &str, language: &str, enforce: bool) -> String {
    let language_name = language_name(language);
    let notice = if enforce {
        "Output EXACTLY the headers and bullet list."
    } else {
        "Follow the format strictly."
    };
    format!(
        "You are a summarization assistant. Respond in {language_name}.\n\
         Summarize the conversation in the same language.\n\
         {notice}\n\n\
         Required format:\n\
         Topic: <value>\n\
         DocType: <value>\n\
         Project: <value>\n\
         KeyActions:\n\
         - <assistant guidance 1>\n\
         - <assistant guidance 2>\n\
         (bullet list can be 1-3 items.)\n\n\
         Do not add extra commentary before or after the headers.\n\n\
         Conversation:\n---\n{}\n---\n\nSummary:",
        truncate_chars(content, 1500)
    )
}

/// Deterministic minimally-compliant summary: topic from the first
/// sentence, up to three imperative clauses from the assistant text.
pub fn fallback_summary(conversation: &Conversation) -> String {
    let topic = first_sentence(&conversation.user)
        .or_else(|| first_sentence(&conversation.assistant))
        .unwrap_or_else(|| "Conversation".to_string());
    let project = conversation
        .project_id
        .clone()
        .unwrap_or_else(|| "Unknown".to_string());

    let mut actions = imperative_clauses(&conversation.assistant, 3);
    if actions.is_empty() {
        actions.push("(no actions recorded)".to_string());
    }

    let mut out = format!(
        "Topic: {}\nDocType: process\nProject: {}\nKeyActions:\n",
        truncate_chars(&topic, 120),
        project
    );
    for action in actions {
        out.push_str("- ");
        out.push_str(&truncate_chars(&action, 120));
        out.push('\n');
    }
    out.trim_end().to_string()
}

/// Enriched summary for the metadata entry's embedding: summary text plus
/// top content keywords and the first markdown heading. Richer context than
/// the raw summary for memory-level retrieval.
pub fn build_enriched_summary(summary: &str, content: &str) -> String {
    let mut parts = vec![summary.to_string()];

    let keywords = extract_keywords(content, 5, 3);
    if !keywords.is_empty() {
        parts.push(format!("Keywords: {}", keywords.join(", ")));
    }

    if let Some(heading) = content.lines().find_map(|line| {
        let hashes = line.len() - line.trim_start_matches('#').len();
        if (1..=3).contains(&hashes) && line[hashes..].starts_with(' ') {
            Some(line[hashes + 1..].trim().to_string())
        } else {
            None
        }
    }) {
        parts.push(format!("Heading: {heading}"));
    }

    parts.join(" | ")
}

/// Script-based language heuristic. Kana or CJK → "ja", Spanish marker
/// characters → "es", otherwise "en".
pub fn detect_language(text: &str) -> String {
    let mut cjk = 0usize;
    let mut spanish = 0usize;
    for c in text.chars() {
        match c {
            '\u{3040}'..='\u{30ff}' | '\u{4e00}'..='\u{9fff}' => cjk += 1,
            '¿' | '¡' | 'ñ' | 'Ñ' | 'á' | 'é' | 'í' | 'ó' | 'ú' | 'Á' | 'É' | 'Í' | 'Ó'
            | 'Ú' => spanish += 1,
            _ => {}
        }
    }
    if cjk > 0 {
        "ja".into()
    } else if spanish > 0 {
        "es".into()
    } else {
        "en".into()
    }
}

fn language_name(code: &str) -> &str {
    match code {
        "ja" => "Japanese",
        "es" => "Spanish",
        "en" => "English",
        _ => "English",
    }
}

fn first_sentence(text: &str) -> Option<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    let end = trimmed
        .char_indices()
        .find(|(_, c)| matches!(c, '.' | '!' | '?' | '\n'))
        .map(|(i, _)| i)
        .unwrap_or(trimmed.len());
    Some(trimmed[..end].trim().to_string()).filter(|s| !s.is_empty())
}

/// Clauses starting with a leading verb-ish token: short lines or
/// sentences beginning with a lowercase-insensitive imperative shape.
fn imperative_clauses(text: &str, max: usize) -> Vec<String> {
    const IMPERATIVE_STARTERS: [&str; 16] = [
        "add", "check", "run", "fix", "use", "update", "remove", "install", "set", "create",
        "delete", "restart", "verify", "apply", "enable", "disable",
    ];

    let mut clauses = Vec::new();
    for raw in text.split(|c: char| matches!(c, '.' | '\n' | ';')) {
        let clause = raw.trim().trim_start_matches("- ");
        if clause.is_empty() {
            continue;
        }
        let first_word = clause
            .split_whitespace()
            .next()
            .unwrap_or_default()
            .to_lowercase();
        if IMPERATIVE_STARTERS.contains(&first_word.as_str()) {
            clauses.push(clause.to_string());
            if clauses.len() >= max {
                break;
            }
        }
    }
    clauses
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = "Topic: ECS egress failure\n\
                         DocType: incident\n\
                         Project: infra\n\
                         KeyActions:\n\
                         - Add egress rule for 443\n\
                         - Verify task connectivity";

    #[test]
    fn valid_summary_parses() {
        assert!(is_structured_summary(VALID));
        let parsed = parse_structured_summary(VALID).unwrap();
        assert_eq!(parsed.topic, "ECS egress failure");
        assert_eq!(parsed.doc_type, "incident");
        assert_eq!(parsed.project, "infra");
        assert_eq!(parsed.key_actions.len(), 2);
    }

    #[test]
    fn whitespace_is_tolerated() {
        let padded = format!("\n  {}\n\n", VALID.replace('\n', "\n  "));
        assert!(is_structured_summary(&padded));
    }

    #[test]
    fn numbered_lists_fail_validation() {
        let numbered = "Topic: t\nDocType: d\nProject: p\nKeyActions:\n1. do the thing";
        assert!(!is_structured_summary(numbered));
    }

    #[test]
    fn missing_headers_fail_validation() {
        assert!(!is_structured_summary("Topic: t\nKeyActions:\n- x"));
        assert!(!is_structured_summary(""));
        // empty topic
        assert!(!is_structured_summary(
            "Topic: \nDocType: d\nProject: p\nKeyActions:\n- x"
        ));
        // inline text after the KeyActions header
        assert!(!is_structured_summary(
            "Topic: t\nDocType: d\nProject: p\nKeyActions: do it\n- x"
        ));
    }

    #[test]
    fn paragraph_output_fails_validation() {
        assert!(!is_structured_summary(
            "This conversation was about fixing an egress rule in ECS."
        ));
    }

    fn conversation(user: &str, assistant: &str) -> Conversation {
        Conversation {
            user: user.into(),
            assistant: assistant.into(),
            ..Default::default()
        }
    }

    #[test]
    fn fallback_is_always_valid() {
        let convo = conversation(
            "Why does our ECS task fail outbound HTTPS?",
            "Security group egress was missing 443. Add the rule and restart the task.",
        );
        let summary = fallback_summary(&convo);
        assert!(is_structured_summary(&summary), "fallback: {summary}");
        assert!(summary.contains("Why does our ECS task fail outbound HTTPS"));
        assert!(summary.contains("- Add the rule"));
    }

    #[test]
    fn fallback_without_actions_uses_placeholder() {
        let convo = conversation("What is Rust?", "A systems language.");
        let summary = fallback_summary(&convo);
        assert!(is_structured_summary(&summary));
        assert!(summary.contains("- (no actions recorded)"));
    }

    #[test]
    fn fallback_uses_project_id_when_present() {
        let mut convo = conversation("q", "Run the tests.");
        convo.project_id = Some("alpha".into());
        assert!(fallback_summary(&convo).contains("Project: alpha"));
    }

    #[test]
    fn language_detection_heuristics() {
        assert_eq!(detect_language("hello world"), "en");
        assert_eq!(detect_language("これはテストです"), "ja");
        assert_eq!(detect_language("¿Cómo estás?"), "es");
        assert_eq!(detect_language(""), "en");
    }

    #[test]
    fn enriched_summary_carries_keywords_and_heading() {
        let enriched = build_enriched_summary(
            VALID,
            "# Deployment checklist\n\nRolling deployment requires healthcheck configuration",
        );
        assert!(enriched.starts_with("Topic: ECS egress failure"));
        assert!(enriched.contains("Keywords:"));
        assert!(enriched.contains("Heading: Deployment checklist"));
    }

    #[test]
    fn imperative_extraction_limits_and_filters() {
        let clauses = imperative_clauses(
            "Add the rule. This is context. Check the logs. Run the deploy. Verify output.",
            3,
        );
        assert_eq!(clauses.len(), 3);
        assert_eq!(clauses[0], "Add the rule");
    }
}
