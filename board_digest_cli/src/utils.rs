use crate::scraper::thread_id;
use crate::ThreadDescriptor;
use chrono::{DateTime, Utc};
use std::io;
use std::path::{Path, PathBuf};

pub async fn save_json(data: &serde_json::Value, path: &Path) -> io::Result<()> {
    let pretty = serde_json::to_string_pretty(data)?;
    save_bytes(pretty.as_bytes(), path).await
}

pub async fn save_text(content: &str, path: &Path) -> io::Result<()> {
    save_bytes(content.as_bytes(), path).await
}

pub async fn save_bytes(content: &[u8], path: &Path) -> io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, content).await?;
    tracing::debug!(path = %path.display(), bytes = content.len(), "file written");
    Ok(())
}

/// `{prefix}_part{N}_{threadId}_{YYYYMMDDTHHMMSSZ}.{ext}` under `output_dir`.
pub fn artifact_path(
    output_dir: &Path,
    prefix: &str,
    thread: &ThreadDescriptor,
    run_at: DateTime<Utc>,
    extension: &str,
) -> PathBuf {
    let id = thread_id(&thread.url).unwrap_or_else(|| "unknown".to_string());
    let timestamp = run_at.format("%Y%m%dT%H%M%SZ");
    output_dir.join(format!(
        "{}_part{}_{}_{}.{}",
        file_prefix(prefix),
        thread.part_number,
        id,
        timestamp,
        extension
    ))
}

/// Lower-cased prefix with anything outside `[a-z0-9_-]` replaced.
fn file_prefix(prefix: &str) -> String {
    let cleaned: String = prefix
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "thread".to_string()
    } else {
        cleaned
    }
}
