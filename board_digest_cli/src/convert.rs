//! Chunk-by-chunk conversion with bounded retry.

use crate::config::RetryPolicy;
use crate::{ConversionReport, ConversionResult, TextChunk};
use async_trait::async_trait;
use backoff::backoff::Backoff;
use backoff::future::retry;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("rate limited: {0}")]
    RateLimited(String),
    #[error("conversion timed out after {0:?}")]
    Timeout(Duration),
    #[error("nothing to convert")]
    EmptyText,
    #[error("conversion failed: {0}")]
    Failed(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl SinkError {
    /// Rate limits and hangs are worth another attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            SinkError::RateLimited(_) | SinkError::Timeout(_) => true,
            SinkError::Failed(msg) => msg.contains("429") || msg.contains("Too Many Requests"),
            SinkError::EmptyText | SinkError::Io(_) => false,
        }
    }
}

/// Turns one chunk of text into an artifact at `output`.
#[async_trait]
pub trait ChunkSink: Send + Sync {
    async fn convert(&self, text: &str, language: &str, output: &Path) -> Result<(), SinkError>;

    /// How long one `convert` call on `text` may run before it counts as hung.
    ///
    /// `per_call` is the configured guard for a single remote call. Sinks that
    /// make several calls per chunk scale it by their call count.
    fn call_budget(&self, _text: &str, per_call: Duration) -> Duration {
        per_call
    }
}

/// Fixed delay between attempts, giving up after `remaining` retries.
#[derive(Debug, Clone)]
struct FixedRetry {
    delay: Duration,
    max_retries: u32,
    remaining: u32,
}

impl FixedRetry {
    fn new(policy: &RetryPolicy) -> Self {
        Self {
            delay: policy.delay,
            max_retries: policy.max_retries,
            remaining: policy.max_retries,
        }
    }
}

impl Backoff for FixedRetry {
    fn reset(&mut self) {
        self.remaining = self.max_retries;
    }

    fn next_backoff(&mut self) -> Option<Duration> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        Some(self.delay)
    }
}

/// Where each chunk's artifact goes.
#[derive(Debug, Clone)]
pub struct ArtifactPlan {
    pub base_path: PathBuf,
    pub language: String,
    pub max_bytes: u64,
}

/// Converts every chunk in index order, one at a time.
///
/// A chunk that fails is recorded and the batch moves on.
pub async fn convert(
    chunks: &[TextChunk],
    sink: &dyn ChunkSink,
    plan: &ArtifactPlan,
    policy: &RetryPolicy,
) -> ConversionReport {
    let total = chunks.len();
    let mut results = Vec::with_capacity(total);

    for chunk in chunks {
        let path = part_path(&plan.base_path, chunk.index, total);
        tracing::info!(chunk = chunk.index, total, chars = chunk.char_count, path = %path.display(), "converting chunk");
        let (outcome, attempts) = convert_with_retry(chunk, sink, &path, &plan.language, policy).await;

        let result = match outcome {
            Ok(size) => {
                let size_warning = size > plan.max_bytes;
                if size_warning {
                    tracing::warn!(
                        chunk = chunk.index,
                        bytes = size,
                        limit = plan.max_bytes,
                        "artifact exceeds the transport size limit"
                    );
                }
                ConversionResult {
                    chunk_index: chunk.index,
                    success: true,
                    byte_size: Some(size),
                    attempts,
                    path,
                    size_warning,
                }
            }
            Err(e) => {
                tracing::error!(chunk = chunk.index, attempts, error = %e, "chunk conversion failed");
                ConversionResult {
                    chunk_index: chunk.index,
                    success: false,
                    byte_size: None,
                    attempts,
                    path,
                    size_warning: false,
                }
            }
        };
        results.push(result);
    }

    let report = ConversionReport::from_results(results);
    tracing::info!(
        chunks = total,
        failed = report.failed_count(),
        bytes = report.total_bytes,
        "conversion finished"
    );
    report
}

async fn convert_with_retry(
    chunk: &TextChunk,
    sink: &dyn ChunkSink,
    path: &Path,
    language: &str,
    policy: &RetryPolicy,
) -> (Result<u64, SinkError>, u32) {
    let mut attempts = 0u32;
    let call_timeout = sink.call_budget(&chunk.text, policy.call_timeout);

    let outcome = retry(FixedRetry::new(policy), || {
        attempts += 1;
        let attempt = attempts;
        async move {
            let call = sink.convert(&chunk.text, language, path);
            let result = match tokio::time::timeout(call_timeout, call).await {
                Ok(result) => result,
                Err(_) => Err(SinkError::Timeout(call_timeout)),
            };
            let result = match result {
                Ok(()) => artifact_size(path).await,
                Err(e) => Err(e),
            };
            result.map_err(|e| {
                if e.is_transient() {
                    tracing::warn!(chunk = chunk.index, attempt, error = %e, "transient conversion failure");
                    backoff::Error::transient(e)
                } else {
                    backoff::Error::permanent(e)
                }
            })
        }
    })
    .await;

    (outcome, attempts)
}

async fn artifact_size(path: &Path) -> Result<u64, SinkError> {
    match tokio::fs::metadata(path).await {
        Ok(meta) => Ok(meta.len()),
        Err(e) => Err(SinkError::Failed(format!(
            "no artifact at {}: {e}",
            path.display()
        ))),
    }
}

/// Path for chunk `index` of `total`: `name_3.mp3` when split, `name.mp3` otherwise.
pub fn part_path(base: &Path, index: usize, total: usize) -> PathBuf {
    if total <= 1 {
        return base.to_path_buf();
    }
    let stem = base
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match base.extension() {
        Some(ext) => format!("{stem}_{index}.{}", ext.to_string_lossy()),
        None => format!("{stem}_{index}"),
    };
    base.with_file_name(name)
}
