//! Maintenance commands that run outside the MCP server.

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;

const MODEL_URL: &str =
    "https://huggingface.co/sentence-transformers/all-MiniLM-L6-v2/resolve/main/onnx/model.onnx";
const TOKENIZER_URL: &str =
    "https://huggingface.co/sentence-transformers/all-MiniLM-L6-v2/resolve/main/tokenizer.json";

/// Download the ONNX embedding model and tokenizer to the cache directory.
pub async fn model_download(config: &crate::config::EmbedderConfig) -> Result<()> {
    let cache_dir = crate::config::expand_tilde(&config.cache_dir);
    std::fs::create_dir_all(&cache_dir)
        .with_context(|| format!("failed to create cache dir: {}", cache_dir.display()))?;

    download_file(MODEL_URL, &cache_dir.join("model.onnx")).await?;
    download_file(TOKENIZER_URL, &cache_dir.join("tokenizer.json")).await?;

    println!("Model files ready in {}", cache_dir.display());
    Ok(())
}

async fn download_file(url: &str, target: &PathBuf) -> Result<()> {
    if target.exists() {
        println!("Already present: {}", target.display());
        return Ok(());
    }

    println!("Downloading {url}");
    let response = reqwest::get(url)
        .await
        .with_context(|| format!("failed to fetch {url}"))?
        .error_for_status()
        .with_context(|| format!("server rejected {url}"))?;

    let total = response.content_length().unwrap_or(0);
    let bar = ProgressBar::new(total);
    bar.set_style(
        ProgressStyle::with_template("{bar:40} {bytes}/{total_bytes} {eta}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );

    let bytes = response
        .bytes()
        .await
        .with_context(|| format!("failed to read body of {url}"))?;
    bar.set_position(bytes.len() as u64);

    // Write to a temp name first so an interrupted download never leaves a
    // half-written model behind.
    let tmp = target.with_extension("partial");
    std::fs::write(&tmp, &bytes)
        .with_context(|| format!("failed to write {}", tmp.display()))?;
    std::fs::rename(&tmp, target)
        .with_context(|| format!("failed to move into place: {}", target.display()))?;

    bar.finish();
    println!("Saved {}", target.display());
    Ok(())
}
