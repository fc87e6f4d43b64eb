use crate::{ConversionResult, Post};

/// Posts included in a chat preview.
pub const PREVIEW_POSTS: usize = 20;
/// Slack kept free when the body has to be cut.
const TRUNCATION_MARGIN: usize = 20;
const ELLIPSIS: &str = "…";
const POST_SEPARATOR: &str = "\n\n";

pub const DISCORD_MESSAGE_LIMIT: usize = 2000;
pub const LINE_MESSAGE_LIMIT: usize = 1000;

/// Builds a preview message of at most `transport_limit` characters.
pub fn format_preview(thread_name: &str, posts: &[Post], transport_limit: usize) -> String {
    let header = format!("📌 {thread_name}\n{}\n", "─".repeat(16));
    let shown = posts.len().min(PREVIEW_POSTS);
    let body = posts[..shown].join(POST_SEPARATOR);
    let footer = format!("\n\n({shown} of {} shown)", posts.len());

    let message = format!("{header}{body}{footer}");
    if char_len(&message) <= transport_limit {
        return message;
    }

    let footer_len = char_len(&footer);
    let allowed = transport_limit as i64
        - char_len(&header) as i64
        - footer_len as i64
        - TRUNCATION_MARGIN as i64;
    let cut: String = if allowed > 0 {
        body.chars().take(allowed as usize).collect()
    } else {
        String::new()
    };
    let cut = cut.trim_end();
    if !cut.is_empty() {
        return format!("{header}{cut}{ELLIPSIS}{footer}");
    }
    // The header gives way first so the count stays readable.
    let header: String = header
        .chars()
        .take(transport_limit.saturating_sub(footer_len))
        .collect();
    format!("{header}{footer}").chars().take(transport_limit).collect()
}

/// Caption for an attached artifact; multi-part deliveries get `[i/N]`.
pub fn file_caption(thread_name: &str, post_count: usize, part: &ConversionResult, parts: usize) -> String {
    let mut caption = format!("🎙️ {thread_name} ({post_count} posts)");
    if parts > 1 {
        caption.push_str(&format!(" [{}/{}]", part.chunk_index, parts));
    }
    if part.size_warning {
        caption.push_str(" ⚠️ may exceed the upload limit");
    }
    caption
}

/// Short notices sent through the transport when a run cannot deliver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notice {
    NoThread,
    NoPosts,
    ConversionFailed,
}

impl Notice {
    pub fn text(&self) -> &'static str {
        match self {
            Notice::NoThread => "⚠️ No thread matched the selection criteria",
            Notice::NoPosts => "⚠️ Could not fetch any posts from the thread",
            Notice::ConversionFailed => "⚠️ Conversion failed for every part",
        }
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}
