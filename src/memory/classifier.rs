//! Schema classification via the local reasoner.
//!
//! The label set is closed; anything the model returns outside it (or any
//! reasoner failure) falls back to [`Schema::Process`], so classification
//! can never fail an ingestion.

use std::sync::Arc;

use crate::memory::types::Schema;
use crate::model::{GenerateOptions, ModelRouter, TaskKind};

pub struct SchemaClassifier {
    router: Arc<ModelRouter>,
}

impl SchemaClassifier {
    pub fn new(router: Arc<ModelRouter>) -> Self {
        Self { router }
    }

    pub async fn classify(&self, user: &str, assistant: &str) -> Schema {
        let prompt = build_prompt(user, assistant);
        let opts = GenerateOptions::default().with_max_tokens(10);

        match self
            .router
            .generate(TaskKind::Classification, &prompt, &opts, None)
            .await
        {
            Ok(output) => parse_label(&output).unwrap_or_else(|| {
                tracing::warn!(output = %output, "unrecognized schema label, using Process");
                Schema::Process
            }),
            Err(err) => {
                tracing::warn!(error = %err, "classification failed, using Process");
                Schema::Process
            }
        }
    }
}

fn build_prompt(user: &str, assistant: &str) -> String {
    format!(
        "Classify the following conversation into one of these schema types:\n\
         - Incident: Bug reports, errors, troubleshooting\n\
         - Snippet: Code examples with usage context\n\
         - Decision: Architectural choices, trade-offs\n\
         - Process: Thought processes, learning, experimentation\n\n\
         Conversation:\n\
         User: {}\n\
         Assistant: {}\n\n\
         Respond with ONLY the schema type (Incident, Snippet, Decision, or Process).\n\
         Schema type:",
        truncate(user, 800),
        truncate(assistant, 800)
    )
}

/// Find the first recognised label in the model output, tolerating prose
/// around it.
fn parse_label(output: &str) -> Option<Schema> {
    let trimmed = output.trim();
    if let Ok(schema) = trimmed.parse::<Schema>() {
        return Some(schema);
    }
    for word in trimmed.split(|c: char| !c.is_alphanumeric()) {
        if let Ok(schema) = word.parse::<Schema>() {
            return Some(schema);
        }
    }
    None
}

fn truncate(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
