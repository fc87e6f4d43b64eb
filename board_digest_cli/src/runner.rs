use crate::chunker::split_into_chunks;
use crate::config::Settings;
use crate::convert::{convert, ArtifactPlan, ChunkSink};
use crate::delivery::{file_caption, format_preview, Notice, DISCORD_MESSAGE_LIMIT};
use crate::scraper::{Board, FetchError};
use crate::transport::Transport;
use crate::utils::{artifact_path, save_json};
use crate::{ConversionReport, DeliveryMode, ThreadDescriptor};
use chrono::Utc;
use std::path::Path;

/// Separator between posts when they are aggregated for conversion.
pub const POST_JOINER: &str = "\n\n";

#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    NoThread,
    NoPosts {
        thread: ThreadDescriptor,
    },
    Previewed {
        thread: ThreadDescriptor,
        post_count: usize,
        delivered: bool,
    },
    Converted {
        thread: ThreadDescriptor,
        post_count: usize,
        report: ConversionReport,
        delivered: usize,
    },
}

/// One pass over the board: select, extract, convert, deliver.
pub struct Pipeline {
    settings: Settings,
    board: Board,
    mode: DeliveryMode,
    sink: Option<Box<dyn ChunkSink>>,
    /// `None` runs every stage but delivers nothing.
    transport: Option<Box<dyn Transport>>,
}

impl Pipeline {
    pub fn new(settings: Settings, mode: DeliveryMode) -> Result<Self, FetchError> {
        let board = Board::new(settings.board.clone())?;
        Ok(Self {
            settings,
            board,
            mode,
            sink: None,
            transport: None,
        })
    }

    pub fn with_sink(mut self, sink: Box<dyn ChunkSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn with_transport(mut self, transport: Box<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub async fn run(&self) -> RunOutcome {
        let Some(thread) = self.board.latest_thread().await else {
            tracing::warn!("no thread matched the selection rules");
            self.notify(Notice::NoThread).await;
            return RunOutcome::NoThread;
        };
        tracing::info!(name = %thread.display_name, replies = thread.reply_count, "target thread");

        let posts = self
            .board
            .extract_posts(&thread.url, Some(thread.reply_count))
            .await;
        if posts.is_empty() {
            self.notify(Notice::NoPosts).await;
            return RunOutcome::NoPosts { thread };
        }
        tracing::info!(count = posts.len(), "posts extracted");

        match self.mode {
            DeliveryMode::Message => {
                let limit = self
                    .transport
                    .as_ref()
                    .map(|t| t.message_limit())
                    .unwrap_or(DISCORD_MESSAGE_LIMIT);
                let preview = format_preview(&thread.display_name, &posts, limit);
                let delivered = self.deliver_message(&preview).await;
                RunOutcome::Previewed {
                    post_count: posts.len(),
                    thread,
                    delivered,
                }
            }
            DeliveryMode::File | DeliveryMode::AudioFile => {
                let text = posts.join(POST_JOINER);
                let (report, delivered) = self.convert_and_deliver(&thread, &text, posts.len()).await;
                RunOutcome::Converted {
                    post_count: posts.len(),
                    thread,
                    report,
                    delivered,
                }
            }
        }
    }

    async fn convert_and_deliver(
        &self,
        thread: &ThreadDescriptor,
        text: &str,
        post_count: usize,
    ) -> (ConversionReport, usize) {
        let Some(sink) = self.sink.as_deref() else {
            tracing::error!(mode = ?self.mode, "no converter configured for this delivery mode");
            self.notify(Notice::ConversionFailed).await;
            return (ConversionReport::default(), 0);
        };

        let extension = self.mode.extension().unwrap_or("bin");
        let plan = ArtifactPlan {
            base_path: artifact_path(
                &self.settings.output_dir,
                &self.settings.board.thread_prefix,
                thread,
                Utc::now(),
                extension,
            ),
            language: self.settings.language.clone(),
            max_bytes: self.settings.max_artifact_bytes,
        };

        let chunks = split_into_chunks(text, self.settings.chunk_size);
        tracing::info!(chars = text.chars().count(), chunks = chunks.len(), "converting aggregated posts");
        let report = convert(&chunks, sink, &plan, &self.settings.retry).await;
        self.save_report(thread, &plan, &report).await;

        if report.succeeded().next().is_none() {
            self.notify(Notice::ConversionFailed).await;
            return (report, 0);
        }
        if !report.all_succeeded {
            tracing::warn!(failed = report.failed_count(), "delivering a partial result");
        }

        let parts = report.per_chunk.len();
        let mut delivered = 0;
        for part in report.succeeded() {
            let caption = file_caption(&thread.display_name, post_count, part, parts);
            if self.deliver_file(&part.path, &caption).await {
                delivered += 1;
            }
        }
        (report, delivered)
    }

    /// Writes `{artifact}.json` next to the artifacts describing the run.
    async fn save_report(&self, thread: &ThreadDescriptor, plan: &ArtifactPlan, report: &ConversionReport) {
        let path = plan.base_path.with_extension("json");
        let summary = serde_json::json!({
            "thread": thread,
            "mode": self.mode,
            "report": report,
        });
        match save_json(&summary, &path).await {
            Ok(()) => tracing::info!(path = %path.display(), "run report written"),
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "could not write run report"),
        }
    }

    async fn deliver_message(&self, message: &str) -> bool {
        match &self.transport {
            Some(transport) => transport.send_message(message).await,
            None => {
                tracing::info!(chars = message.chars().count(), "dry run, message not sent");
                false
            }
        }
    }

    async fn deliver_file(&self, path: &Path, caption: &str) -> bool {
        match &self.transport {
            Some(transport) => {
                tracing::info!(transport = transport.name(), path = %path.display(), "sending file");
                transport.send_file(path, caption).await
            }
            None => {
                tracing::info!(path = %path.display(), "dry run, file kept locally");
                false
            }
        }
    }

    async fn notify(&self, notice: Notice) {
        if let Some(transport) = &self.transport {
            transport.send_message(notice.text()).await;
        }
    }
}
