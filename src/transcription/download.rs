use anyhow::{Context, Result};
use std::fs;
use std::io::{Read, Write};
use std::path::Path;

use super::protocol::DownloadProgress;

const MODEL_BASE_URL: &str = "https://huggingface.co/ggerganov/whisper.cpp/resolve/main";

/// Read granularity for the streamed download (64 KiB).
const DOWNLOAD_CHUNK_BYTES: usize = 64 * 1024;

/// Maps model names to their HuggingFace filenames
fn model_filename(model_name: &str) -> String {
    format!("ggml-{model_name}.bin")
}

/// Ensures the model is downloaded, returns true if downloaded, false if already existed
///
/// Download progress is reported through `on_progress` once per read chunk.
/// Blocking; callers on an async runtime must wrap this in `spawn_blocking`.
///
/// # Errors
/// Returns error if the download fails or the file cannot be written
pub fn ensure_model_downloaded(
    model_name: &str,
    model_path: &Path,
    on_progress: &dyn Fn(DownloadProgress),
) -> Result<bool> {
    if model_path.exists() {
        tracing::info!(
            path = %model_path.display(),
            "model already exists, skipping download"
        );
        return Ok(false);
    }

    tracing::info!(
        model = model_name,
        path = %model_path.display(),
        "model not found, starting download"
    );

    download_model(model_name, model_path, on_progress)?;

    Ok(true)
}

fn download_model(
    model_name: &str,
    model_path: &Path,
    on_progress: &dyn Fn(DownloadProgress),
) -> Result<()> {
    let filename = model_filename(model_name);
    let url = format!("{MODEL_BASE_URL}/{filename}");

    // Create parent directory if it doesn't exist
    if let Some(parent) = model_path.parent() {
        fs::create_dir_all(parent).context("failed to create model directory")?;
    }

    tracing::info!(url = %url, "downloading model");

    // Download to temporary file first for atomic operation
    let temp_path = model_path.with_extension("tmp");

    let mut response = reqwest::blocking::get(&url)
        .with_context(|| format!("failed to download model from {url}"))?;

    if !response.status().is_success() {
        anyhow::bail!("download failed with status {}: {}", response.status(), url);
    }

    let total = response.content_length().unwrap_or(0);

    let mut file = fs::File::create(&temp_path)
        .with_context(|| format!("failed to create temp file at {}", temp_path.display()))?;

    // Stream the body so progress is observable for multi-GB weights
    let mut buffer = vec![0_u8; DOWNLOAD_CHUNK_BYTES];
    let mut loaded: u64 = 0;
    loop {
        let read = response
            .read(&mut buffer)
            .context("failed to read response body")?;
        if read == 0 {
            break;
        }

        file.write_all(&buffer[..read])
            .context("failed to write model to temp file")?;

        loaded += read as u64;
        on_progress(progress_snapshot(&filename, loaded, total));
    }

    // Drop file handle before rename
    drop(file);

    // Atomic rename - if this fails, temp file remains and will be cleaned up next run
    fs::rename(&temp_path, model_path).with_context(|| {
        format!(
            "failed to rename {} to {}",
            temp_path.display(),
            model_path.display()
        )
    })?;

    tracing::info!(
        path = %model_path.display(),
        size = loaded,
        "model downloaded successfully"
    );

    Ok(())
}

/// Builds one progress report; fractional progress stays 0.0 when the server
/// did not report a content length.
fn progress_snapshot(file: &str, loaded: u64, total: u64) -> DownloadProgress {
    // u64 → f64 → f32: progress only needs a few significant digits
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
    let progress = if total > 0 {
        (loaded as f64 / total as f64).min(1.0) as f32
    } else {
        0.0
    };

    DownloadProgress {
        file: file.to_owned(),
        progress,
        loaded,
        total,
    }
}
