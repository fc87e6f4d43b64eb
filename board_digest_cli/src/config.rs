use encoding_rs::Encoding;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_LISTING_URL: &str = "https://jbbs.shitaraba.net/bbs/subject.cgi/netgame/16797/";
pub const DEFAULT_BASE_URL: &str = "https://jbbs.shitaraba.net";
pub const DEFAULT_THREAD_PREFIX: &str = "VALORANT";
/// Threads with fewer replies than this are not worth a digest.
pub const DEFAULT_MIN_REPLIES: u32 = 300;
pub const DEFAULT_CHUNK_SIZE: usize = 5000;
pub const DEFAULT_LANGUAGE: &str = "ja";
/// Discord's attachment limit.
pub const MAX_ARTIFACT_BYTES: u64 = 25 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),
    #[error("invalid value for {key}: {value}")]
    Invalid { key: &'static str, value: String },
    #[error("unknown charset label: {0}")]
    UnknownCharset(String),
}

/// The text encoding a board serves its pages in.
///
/// Pages are always decoded with this value; the charset a server advertises
/// in its headers is ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Charset(&'static Encoding);

impl Charset {
    pub fn from_label(label: &str) -> Result<Self, ConfigError> {
        Encoding::for_label(label.trim().as_bytes())
            .map(Charset)
            .ok_or_else(|| ConfigError::UnknownCharset(label.to_string()))
    }

    pub fn euc_jp() -> Self {
        Charset(encoding_rs::EUC_JP)
    }

    pub fn name(&self) -> &'static str {
        self.0.name()
    }

    /// Decodes `bytes`, returning the text and whether malformed sequences were replaced.
    pub fn decode(&self, bytes: &[u8]) -> (String, bool) {
        let (text, _, had_errors) = self.0.decode(bytes);
        (text.into_owned(), had_errors)
    }

    pub fn encode(&self, text: &str) -> Vec<u8> {
        let (bytes, _, _) = self.0.encode(text);
        bytes.into_owned()
    }
}

impl Default for Charset {
    fn default() -> Self {
        Self::euc_jp()
    }
}

/// Where the board lives and which threads count as candidates.
#[derive(Debug, Clone)]
pub struct BoardConfig {
    pub listing_url: String,
    pub base_url: String,
    pub thread_prefix: String,
    pub min_replies: u32,
    pub charset: Charset,
    pub fetch_timeout: Duration,
    pub skip_tls_verification: bool,
}

impl Default for BoardConfig {
    fn default() -> Self {
        Self {
            listing_url: DEFAULT_LISTING_URL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            thread_prefix: DEFAULT_THREAD_PREFIX.to_string(),
            min_replies: DEFAULT_MIN_REPLIES,
            charset: Charset::default(),
            fetch_timeout: Duration::from_secs(10),
            skip_tls_verification: false,
        }
    }
}

/// Fixed-delay retry ceiling for per-chunk conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub delay: Duration,
    /// Hang guard around a single sink call.
    pub call_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            delay: Duration::from_secs(3),
            call_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DiscordCredentials {
    pub bot_token: String,
    pub channel_id: String,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub board: BoardConfig,
    pub retry: RetryPolicy,
    pub output_dir: PathBuf,
    pub chunk_size: usize,
    pub language: String,
    pub max_artifact_bytes: u64,
    pub discord: Option<DiscordCredentials>,
    pub line_notify_token: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            board: BoardConfig::default(),
            retry: RetryPolicy::default(),
            output_dir: PathBuf::from("outputs"),
            chunk_size: DEFAULT_CHUNK_SIZE,
            language: DEFAULT_LANGUAGE.to_string(),
            max_artifact_bytes: MAX_ARTIFACT_BYTES,
            discord: None,
            line_notify_token: None,
        }
    }
}

impl Settings {
    /// Reads settings from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds settings from an arbitrary key lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut settings = Settings::default();

        if let Some(v) = get("BOARD_LISTING_URL") {
            settings.board.listing_url = v;
        }
        if let Some(v) = get("BOARD_BASE_URL") {
            settings.board.base_url = v;
        }
        if let Some(v) = get("THREAD_PREFIX") {
            settings.board.thread_prefix = v;
        }
        if let Some(v) = get("MIN_REPLIES") {
            settings.board.min_replies = parse_value("MIN_REPLIES", &v)?;
        }
        if let Some(v) = get("BOARD_CHARSET") {
            settings.board.charset = Charset::from_label(&v)?;
        }
        if let Some(v) = get("SKIP_TLS_VERIFY") {
            settings.board.skip_tls_verification = parse_flag("SKIP_TLS_VERIFY", &v)?;
        }
        if let Some(v) = get("OUTPUT_DIR") {
            settings.output_dir = PathBuf::from(v);
        }
        if let Some(v) = get("CHUNK_SIZE") {
            let size: usize = parse_value("CHUNK_SIZE", &v)?;
            if size == 0 {
                return Err(ConfigError::Invalid {
                    key: "CHUNK_SIZE",
                    value: v,
                });
            }
            settings.chunk_size = size;
        }
        if let Some(v) = get("TTS_LANGUAGE") {
            settings.language = v;
        }

        settings.discord = match (get("DISCORD_BOT_TOKEN"), get("DISCORD_CHANNEL_ID")) {
            (Some(bot_token), Some(channel_id)) => Some(DiscordCredentials {
                bot_token,
                channel_id,
            }),
            _ => None,
        };
        settings.line_notify_token = get("LINE_NOTIFY_TOKEN");

        Ok(settings)
    }

    pub fn require_discord(&self) -> Result<&DiscordCredentials, ConfigError> {
        self.discord.as_ref().ok_or(ConfigError::Missing(
            "DISCORD_BOT_TOKEN / DISCORD_CHANNEL_ID",
        ))
    }

    pub fn require_line(&self) -> Result<&str, ConfigError> {
        self.line_notify_token
            .as_deref()
            .ok_or(ConfigError::Missing("LINE_NOTIFY_TOKEN"))
    }
}

fn parse_value<T: FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Invalid {
        key,
        value: value.to_string(),
    })
}

fn parse_flag(key: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid {
            key,
            value: value.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn defaults_without_environment() {
        let settings = Settings::from_lookup(lookup(&[])).unwrap();
        assert_eq!(settings.board.min_replies, 300);
        assert_eq!(settings.board.charset.name(), "EUC-JP");
        assert_eq!(settings.retry.max_retries, 5);
        assert_eq!(settings.retry.delay, Duration::from_secs(3));
        assert!(settings.discord.is_none());
        assert!(settings.require_discord().is_err());
    }

    #[test]
    fn discord_needs_both_token_and_channel() {
        let only_token = Settings::from_lookup(lookup(&[("DISCORD_BOT_TOKEN", "abc")])).unwrap();
        assert!(only_token.discord.is_none());

        let both = Settings::from_lookup(lookup(&[
            ("DISCORD_BOT_TOKEN", "abc"),
            ("DISCORD_CHANNEL_ID", "42"),
        ]))
        .unwrap();
        let creds = both.require_discord().unwrap();
        assert_eq!(creds.bot_token, "abc");
        assert_eq!(creds.channel_id, "42");
    }

    #[test]
    fn blank_values_are_treated_as_unset() {
        let settings = Settings::from_lookup(lookup(&[("LINE_NOTIFY_TOKEN", "  ")])).unwrap();
        assert!(matches!(
            settings.require_line(),
            Err(ConfigError::Missing("LINE_NOTIFY_TOKEN"))
        ));
    }

    #[test]
    fn overrides_are_parsed() {
        let settings = Settings::from_lookup(lookup(&[
            ("MIN_REPLIES", "10"),
            ("BOARD_CHARSET", "shift_jis"),
            ("SKIP_TLS_VERIFY", "yes"),
            ("CHUNK_SIZE", "200"),
        ]))
        .unwrap();
        assert_eq!(settings.board.min_replies, 10);
        assert_eq!(settings.board.charset.name(), "Shift_JIS");
        assert!(settings.board.skip_tls_verification);
        assert_eq!(settings.chunk_size, 200);
    }

    #[test]
    fn invalid_overrides_are_rejected() {
        assert!(matches!(
            Settings::from_lookup(lookup(&[("MIN_REPLIES", "many")])),
            Err(ConfigError::Invalid { key: "MIN_REPLIES", .. })
        ));
        assert!(matches!(
            Settings::from_lookup(lookup(&[("CHUNK_SIZE", "0")])),
            Err(ConfigError::Invalid { key: "CHUNK_SIZE", .. })
        ));
        assert!(matches!(
            Settings::from_lookup(lookup(&[("BOARD_CHARSET", "klingon")])),
            Err(ConfigError::UnknownCharset(_))
        ));
    }

    #[test]
    fn charset_round_trips_japanese_text() {
        let charset = Charset::euc_jp();
        let bytes = charset.encode("ヴァロラント");
        let (text, lossy) = charset.decode(&bytes);
        assert_eq!(text, "ヴァロラント");
        assert!(!lossy);
    }
}
