//! Utility functions
//!
use std::{fs::File, io::Cursor, path::PathBuf};

use anyhow::{anyhow, ensure, Result};
use reqwest::Client;

const MODEL_URL: &str = "https://huggingface.co/Xenova/yolov8s/resolve/main/onnx/model.onnx";
const MODEL_FILENAME: &str = "yolov8s.onnx";
const CACHE_SUBDIR: &str = "cat_tracker";

/// Resolve the model file on disk.
///
/// An explicit path must exist. Without one, the model is cached under
/// the user cache directory and downloaded on first use.
pub async fn ensure_model_file(explicit: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        ensure!(path.is_file(), "model file {} not found", path.display());
        return Ok(path);
    }

    let cache_dir = dirs::cache_dir()
        .ok_or_else(|| anyhow!("no cache directory on this system"))?
        .join(CACHE_SUBDIR);
    let path = cache_dir.join(MODEL_FILENAME);

    if !path.is_file() {
        std::fs::create_dir_all(&cache_dir)?;
        log::info!("downloading detection model to {}", path.display());
        download_file(&Client::new(), MODEL_URL, &path).await?;
    }

    Ok(path)
}

/// Download a file from a URL to a given filepath.
async fn download_file(
    client: &Client,
    url: &str,
    filepath: impl AsRef<std::path::Path>,
) -> Result<()> {
    let resp = client.get(url).send().await?.error_for_status()?;

    let mut file = File::create(filepath)?;
    let mut content = Cursor::new(resp.bytes().await?);
    std::io::copy(&mut content, &mut file)?;

    Ok(())
}
