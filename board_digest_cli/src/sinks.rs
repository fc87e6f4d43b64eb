use crate::chunker::split_into_chunks;
use crate::config::Settings;
use crate::convert::{ChunkSink, SinkError};
use crate::utils;
use crate::DeliveryMode;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use dashmap::DashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const GOOGLE_TTS_ENDPOINT: &str = "https://translate.google.com/translate_tts";
/// The translate endpoint rejects longer `q` values.
pub const TTS_MAX_CHARS: usize = 100;

/// Synthesizes MP3 through the Google Translate speech endpoint.
///
/// A chunk is sent as a run of short requests. Segments that already came
/// back are kept per output path, so a retried chunk resumes where the last
/// attempt stopped instead of requesting everything again.
pub struct GoogleTtsSink {
    client: Client,
    endpoint: String,
    request_timeout: Duration,
    partial: DashMap<PathBuf, PartialAudio>,
}

/// Segments received so far for one output.
#[derive(Default)]
struct PartialAudio {
    text: String,
    segments: Vec<Vec<u8>>,
}

impl GoogleTtsSink {
    pub fn new(request_timeout: Duration) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: Client::builder()
                .timeout(request_timeout)
                .user_agent("Mozilla/5.0")
                .build()?,
            endpoint: GOOGLE_TTS_ENDPOINT.to_string(),
            request_timeout,
            partial: DashMap::new(),
        })
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    async fn synthesize_segment(
        &self,
        segment: &str,
        language: &str,
        idx: usize,
        total: usize,
    ) -> Result<Vec<u8>, SinkError> {
        let idx = idx.to_string();
        let total = total.to_string();
        let textlen = segment.chars().count().to_string();
        let res = self
            .client
            .get(&self.endpoint)
            .query(&[
                ("ie", "UTF-8"),
                ("client", "tw-ob"),
                ("tl", language),
                ("q", segment),
                ("idx", idx.as_str()),
                ("total", total.as_str()),
                ("textlen", textlen.as_str()),
            ])
            .send()
            .await
            .map_err(|e| self.request_error(e))?;

        match res.status() {
            StatusCode::TOO_MANY_REQUESTS => Err(SinkError::RateLimited(format!(
                "{} returned 429",
                self.endpoint
            ))),
            status if !status.is_success() => {
                Err(SinkError::Failed(format!("tts endpoint returned {status}")))
            }
            _ => Ok(res
                .bytes()
                .await
                .map_err(|e| self.request_error(e))?
                .to_vec()),
        }
    }

    fn request_error(&self, e: reqwest::Error) -> SinkError {
        if e.is_timeout() {
            SinkError::Timeout(self.request_timeout)
        } else {
            SinkError::Failed(e.to_string())
        }
    }

    /// Segments already synthesized for `output`, dropped if the text changed.
    fn resume_from(&self, output: &Path, text: &str) -> usize {
        let mut entry = self.partial.entry(output.to_path_buf()).or_default();
        if entry.text != text {
            entry.text = text.to_string();
            entry.segments.clear();
        }
        entry.segments.len()
    }
}

#[async_trait]
impl ChunkSink for GoogleTtsSink {
    async fn convert(&self, text: &str, language: &str, output: &Path) -> Result<(), SinkError> {
        if text.trim().is_empty() {
            return Err(SinkError::EmptyText);
        }
        let segments = tts_segments(text, TTS_MAX_CHARS);
        let done = self.resume_from(output, text);
        if done > 0 {
            tracing::info!(path = %output.display(), done, total = segments.len(), "resuming audio");
        }
        for (i, segment) in segments.iter().enumerate().skip(done) {
            let bytes = match self.synthesize_segment(segment, language, i, segments.len()).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    if !e.is_transient() {
                        self.partial.remove(output);
                    }
                    return Err(e);
                }
            };
            if let Some(mut entry) = self.partial.get_mut(output) {
                entry.segments.push(bytes);
            }
        }

        let Some((_, partial)) = self.partial.remove(output) else {
            return Err(SinkError::Failed(format!(
                "audio for {} was discarded mid-run",
                output.display()
            )));
        };
        // MP3 frames concatenate into a playable stream.
        let audio = partial.segments.concat();
        utils::save_bytes(&audio, output).await?;
        tracing::debug!(path = %output.display(), segments = segments.len(), bytes = audio.len(), "audio written");
        Ok(())
    }

    /// Each request gets the full per-call budget.
    fn call_budget(&self, text: &str, per_call: Duration) -> Duration {
        let requests = tts_segments(text, TTS_MAX_CHARS).len().max(1);
        per_call.saturating_mul(u32::try_from(requests).unwrap_or(u32::MAX))
    }
}

/// Writes chunk text as-is; the plain-text delivery variant.
#[derive(Debug, Default, Clone, Copy)]
pub struct TextFileSink;

#[async_trait]
impl ChunkSink for TextFileSink {
    async fn convert(&self, text: &str, _language: &str, output: &Path) -> Result<(), SinkError> {
        if text.trim().is_empty() {
            return Err(SinkError::EmptyText);
        }
        utils::save_text(text, output).await?;
        Ok(())
    }
}

/// The converter a delivery mode needs; chat previews need none.
pub fn sink_for_mode(
    mode: DeliveryMode,
    settings: &Settings,
) -> Result<Option<Box<dyn ChunkSink>>, reqwest::Error> {
    let sink: Box<dyn ChunkSink> = match mode {
        DeliveryMode::Message => return Ok(None),
        DeliveryMode::File => Box::new(TextFileSink),
        DeliveryMode::AudioFile => Box::new(GoogleTtsSink::new(settings.retry.call_timeout)?),
    };
    Ok(Some(sink))
}

/// Splits text into request-sized pieces, preferring sentence breaks, then
/// commas and spaces, then a hard cut.
pub fn tts_segments(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut segments = Vec::new();
    for chunk in split_into_chunks(text, max_chars) {
        let mut rest: Vec<char> = chunk.text.trim().chars().collect();
        while rest.len() > max_chars {
            let window = &rest[..max_chars];
            let cut = window
                .iter()
                .rposition(|c| matches!(c, '、' | ',' | ' ' | '\u{3000}' | '\n'))
                .map(|pos| pos + 1)
                .unwrap_or(max_chars);
            let piece: String = rest.drain(..cut).collect();
            push_segment(&mut segments, &piece);
        }
        let piece: String = rest.into_iter().collect();
        push_segment(&mut segments, &piece);
    }
    segments
}

fn push_segment(segments: &mut Vec<String>, piece: &str) {
    let piece = piece.trim();
    if !piece.is_empty() {
        segments.push(piece.to_string());
    }
}
