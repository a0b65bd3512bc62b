//! Local reasoner over the Ollama HTTP API.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{GenerateOptions, Reasoner};
use crate::config::LocalReasonerConfig;

pub struct LocalReasoner {
    client: reqwest::Client,
    base_url: String,
    model: String,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: ModelOptions,
}

#[derive(Serialize)]
struct ModelOptions {
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<u32>,
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}

impl LocalReasoner {
    pub fn new(config: &LocalReasonerConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
        }
    }
}

#[async_trait]
impl Reasoner for LocalReasoner {
    async fn generate(&self, prompt: &str, opts: &GenerateOptions) -> Result<String> {
        let url = format!("{}/api/generate", self.base_url);
        let body = GenerateRequest {
            model: &self.model,
            prompt,
            stream: false,
            options: ModelOptions {
                temperature: opts.temperature,
                num_predict: opts.max_tokens,
            },
        };

        let response = self
            .client
            .post(&url)
            .timeout(opts.timeout)
            .json(&body)
            .send()
            .await
            .context("local reasoner request failed")?
            .error_for_status()
            .context("local reasoner returned an error status")?;

        let parsed: GenerateResponse = response
            .json()
            .await
            .context("local reasoner returned unparseable output")?;

        Ok(parsed.response.trim().to_string())
    }

    fn name(&self) -> &'static str {
        "local"
    }
}
