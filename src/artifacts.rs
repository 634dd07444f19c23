//! Files produced by `screenshot` and `download` steps.

use std::path::{Path, PathBuf};

use tracing::info;

use crate::error::AgentError;

/// Keep `[a-z0-9._-]`, collapsing other runs of characters into `_`.
pub fn sanitize_file_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut in_gap = false;
    for ch in name.trim().chars() {
        if ch.is_ascii_alphanumeric() || matches!(ch, '.' | '_' | '-') {
            out.push(ch);
            in_gap = false;
        } else if !in_gap {
            out.push('_');
            in_gap = true;
        }
    }
    if out.is_empty() || out.chars().all(|c| c == '.') {
        out = "artifact".to_string();
    }
    out
}

pub async fn save_screenshot(dir: &Path, name: &str, png: &[u8]) -> Result<PathBuf, AgentError> {
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(AgentError::step)?;
    let path = dir.join(sanitize_file_name(name));
    tokio::fs::write(&path, png).await.map_err(AgentError::step)?;
    info!(path = %path.display(), "screenshot saved");
    Ok(path)
}

/// Name a download after the last path segment of its URL.
pub fn download_file_name(url: &reqwest::Url) -> String {
    url.path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|s| !s.is_empty())
        .map(sanitize_file_name)
        .unwrap_or_else(|| "download".to_string())
}

pub async fn download_to_dir(url: &str, dir: &Path) -> Result<PathBuf, AgentError> {
    let url = reqwest::Url::parse(url)
        .map_err(|e| AgentError::StepExecution(format!("bad download url {}: {}", url, e)))?;

    let response = reqwest::get(url.clone())
        .await
        .map_err(AgentError::step)?;
    let status = response.status();
    if !status.is_success() {
        return Err(AgentError::StepExecution(format!(
            "download of {} failed with {}",
            url, status
        )));
    }
    let body = response.bytes().await.map_err(AgentError::step)?;

    tokio::fs::create_dir_all(dir)
        .await
        .map_err(AgentError::step)?;
    let path = dir.join(download_file_name(&url));
    tokio::fs::write(&path, &body)
        .await
        .map_err(AgentError::step)?;
    info!(path = %path.display(), bytes = body.len(), "download saved");
    Ok(path)
}
