pub mod chunker;
pub mod config;
pub mod convert;
pub mod delivery;
pub mod normalize;
pub mod runner;
pub mod scraper;
pub mod sinks;
pub mod transport;
pub mod utils;

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A single cleaned reply body, in forum order.
pub type Post = String;

/// A thread chosen from the board listing.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ThreadDescriptor {
    pub display_name: String,
    pub url: String,
    pub part_number: u32,
    pub reply_count: u32,
}

impl ThreadDescriptor {
    pub fn new(display_name: String, url: String, part_number: u32, reply_count: u32) -> Self {
        Self {
            display_name,
            url,
            part_number,
            reply_count,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChunk {
    /// 1-based position in the document.
    pub index: usize,
    pub text: String,
    pub char_count: usize,
}

impl TextChunk {
    pub fn new(index: usize, text: String) -> Self {
        let char_count = text.chars().count();
        Self {
            index,
            text,
            char_count,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ConversionResult {
    pub chunk_index: usize,
    pub success: bool,
    pub byte_size: Option<u64>,
    pub attempts: u32,
    pub path: PathBuf,
    /// Set when the artifact is larger than the transport accepts.
    pub size_warning: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct ConversionReport {
    pub all_succeeded: bool,
    pub total_bytes: u64,
    pub per_chunk: Vec<ConversionResult>,
}

impl ConversionReport {
    pub fn from_results(per_chunk: Vec<ConversionResult>) -> Self {
        let all_succeeded = per_chunk.iter().all(|r| r.success);
        let total_bytes = per_chunk
            .iter()
            .filter(|r| r.success)
            .filter_map(|r| r.byte_size)
            .sum();
        Self {
            all_succeeded,
            total_bytes,
            per_chunk,
        }
    }

    pub fn succeeded(&self) -> impl Iterator<Item = &ConversionResult> {
        self.per_chunk.iter().filter(|r| r.success)
    }

    pub fn failed_count(&self) -> usize {
        self.per_chunk.iter().filter(|r| !r.success).count()
    }
}

/// How a run hands its result to the transport.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryMode {
    /// Preview of the first posts as a chat message.
    Message,
    /// Aggregated posts written to text files and attached.
    File,
    /// Aggregated posts synthesized to MP3 and attached.
    #[value(name = "audio")]
    #[serde(rename = "audio")]
    AudioFile,
}

impl DeliveryMode {
    pub fn extension(&self) -> Option<&'static str> {
        match self {
            DeliveryMode::Message => None,
            DeliveryMode::File => Some("txt"),
            DeliveryMode::AudioFile => Some("mp3"),
        }
    }
}
