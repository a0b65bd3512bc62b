//! External reasoner: heavy tasks delegated to a CLI assistant subprocess.
//!
//! The child runs with `CONTEXT_ORCHESTRATOR_INTERNAL=1` so a surrounding
//! CLI wrapper does not re-record the orchestrator's own calls. The flag is
//! advisory; absence of the wrapper is still safe. Calls are bounded by a
//! timeout and the child is killed cleanly on expiry.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use super::{GenerateOptions, Reasoner};
use crate::config::ExternalReasonerConfig;

/// Environment sentinel understood by the CLI wrappers.
pub const INTERNAL_ENV_FLAG: &str = "CONTEXT_ORCHESTRATOR_INTERNAL";

pub struct ExternalReasoner {
    program: String,
    args: Vec<String>,
    default_timeout: std::time::Duration,
}

impl ExternalReasoner {
    /// Returns `None` when no command is configured (R-ext disabled).
    pub fn from_config(config: &ExternalReasonerConfig) -> Option<Self> {
        let mut parts = config.command.split_whitespace().map(String::from);
        let program = parts.next()?;
        Some(Self {
            program,
            args: parts.collect(),
            default_timeout: std::time::Duration::from_secs(config.timeout_seconds.max(1)),
        })
    }
}

#[async_trait]
impl Reasoner for ExternalReasoner {
    async fn generate(&self, prompt: &str, opts: &GenerateOptions) -> Result<String> {
        let timeout = if opts.timeout.is_zero() {
            self.default_timeout
        } else {
            opts.timeout
        };

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .env(INTERNAL_ENV_FLAG, "1")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to spawn external reasoner: {}", self.program))?;

        // The prompt goes through stdin to avoid argv length limits.
        let mut stdin = child
            .stdin
            .take()
            .context("external reasoner stdin unavailable")?;
        stdin
            .write_all(prompt.as_bytes())
            .await
            .context("failed to write prompt to external reasoner")?;
        drop(stdin);

        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(result) => result.context("external reasoner wait failed")?,
            Err(_) => {
                // kill_on_drop reaps the child once the future is dropped
                bail!("external reasoner timed out after {}s", timeout.as_secs());
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "external reasoner exited with {}: {}",
                output.status,
                stderr.trim()
            );
        }

        let text = String::from_utf8(output.stdout)
            .context("external reasoner produced non-UTF8 output")?;
        let trimmed = text.trim();
        if trimmed.is_empty() {
            bail!("external reasoner produced empty output");
        }
        Ok(trimmed.to_string())
    }

    fn name(&self) -> &'static str {
        "external"
    }
}
