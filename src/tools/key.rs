use anyhow::Result;
use std::path::PathBuf;

use crate::config::{store_api_key, Settings};

/// Save the API key to the configured key file and return its path.
pub fn execute(settings: &Settings, key: &str) -> Result<PathBuf> {
    let path = settings.key_file_path();
    store_api_key(key, &path)?;
    tracing::info!(path = %path.display(), "Stored API key");
    Ok(path)
}
