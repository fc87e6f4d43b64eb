//! Outbound delivery to chat services.

use crate::delivery::{DISCORD_MESSAGE_LIMIT, LINE_MESSAGE_LIMIT};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

pub const DISCORD_API_BASE: &str = "https://discord.com/api/v10";
pub const LINE_NOTIFY_API: &str = "https://notify-api.line.me/api/notify";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
/// Upload requests carry up to 25 MiB.
const UPLOAD_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("invalid header value: {0}")]
    Header(#[from] reqwest::header::InvalidHeaderValue),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("{0} cannot deliver files")]
    Unsupported(&'static str),
}

/// A destination for run results. Failures are logged and reported as `false`.
#[async_trait]
pub trait Transport: Send + Sync {
    fn name(&self) -> &'static str;

    /// Longest message the service accepts, in characters.
    fn message_limit(&self) -> usize;

    async fn try_send_message(&self, message: &str) -> Result<(), TransportError>;

    async fn try_send_file(&self, path: &Path, caption: &str) -> Result<(), TransportError>;

    async fn send_message(&self, message: &str) -> bool {
        match self.try_send_message(message).await {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(transport = self.name(), error = %e, "message delivery failed");
                false
            }
        }
    }

    async fn send_file(&self, path: &Path, caption: &str) -> bool {
        match self.try_send_file(path, caption).await {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(transport = self.name(), path = %path.display(), error = %e, "file delivery failed");
                false
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct RateLimitBody {
    retry_after: Option<f64>,
}

pub struct DiscordTransport {
    client: Client,
    api_base: String,
    token: String,
    channel_id: String,
}

impl DiscordTransport {
    pub fn new(token: impl Into<String>, channel_id: impl Into<String>) -> Result<Self, TransportError> {
        Ok(Self {
            client: Client::builder().build()?,
            api_base: DISCORD_API_BASE.to_string(),
            token: token.into(),
            channel_id: channel_id.into(),
        })
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    fn messages_url(&self) -> String {
        format!("{}/channels/{}/messages", self.api_base, self.channel_id)
    }

    fn headers(&self) -> Result<HeaderMap, TransportError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bot {}", self.token))?,
        );
        Ok(headers)
    }

    /// Sends once, and once more after the advised wait if rate limited.
    async fn send_with_retry<F>(&self, build: F) -> Result<(), TransportError>
    where
        F: Fn() -> Result<RequestBuilder, TransportError> + Send + Sync,
    {
        let res = build()?.send().await?;
        if res.status() != StatusCode::TOO_MANY_REQUESTS {
            return check(res).await;
        }

        let wait = retry_after(res).await;
        tracing::warn!(wait_secs = wait.as_secs_f64(), "discord rate limited, retrying once");
        tokio::time::sleep(wait).await;
        check(build()?.send().await?).await
    }
}

#[async_trait]
impl Transport for DiscordTransport {
    fn name(&self) -> &'static str {
        "discord"
    }

    fn message_limit(&self) -> usize {
        DISCORD_MESSAGE_LIMIT
    }

    async fn try_send_message(&self, message: &str) -> Result<(), TransportError> {
        let headers = self.headers()?;
        let url = self.messages_url();
        let payload = json!({ "content": message });
        self.send_with_retry(|| {
            Ok(self
                .client
                .post(&url)
                .headers(headers.clone())
                .json(&payload)
                .timeout(REQUEST_TIMEOUT))
        })
        .await
    }

    async fn try_send_file(&self, path: &Path, caption: &str) -> Result<(), TransportError> {
        let headers = self.headers()?;
        let url = self.messages_url();
        let bytes = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "attachment".to_string());
        let payload = json!({ "content": caption }).to_string();
        let mime = mime_for(path);

        self.send_with_retry(|| {
            let file = Part::bytes(bytes.clone())
                .file_name(file_name.clone())
                .mime_str(mime)?;
            let form = Form::new()
                .text("payload_json", payload.clone())
                .part("files[0]", file);
            Ok(self
                .client
                .post(&url)
                .headers(headers.clone())
                .multipart(form)
                .timeout(UPLOAD_TIMEOUT))
        })
        .await
    }
}

/// LINE Notify; text only.
pub struct LineNotifyTransport {
    client: Client,
    endpoint: String,
    token: String,
}

impl LineNotifyTransport {
    pub fn new(token: impl Into<String>) -> Result<Self, TransportError> {
        Ok(Self {
            client: Client::builder().timeout(REQUEST_TIMEOUT).build()?,
            endpoint: LINE_NOTIFY_API.to_string(),
            token: token.into(),
        })
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

#[async_trait]
impl Transport for LineNotifyTransport {
    fn name(&self) -> &'static str {
        "line"
    }

    fn message_limit(&self) -> usize {
        LINE_MESSAGE_LIMIT
    }

    async fn try_send_message(&self, message: &str) -> Result<(), TransportError> {
        let res = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.token)
            .form(&[("message", message)])
            .send()
            .await?;
        check(res).await
    }

    async fn try_send_file(&self, path: &Path, caption: &str) -> Result<(), TransportError> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let notice = format!("{caption}\n📎 {name} (saved locally, attachments unsupported)");
        self.try_send_message(&notice).await?;
        Err(TransportError::Unsupported("LINE Notify"))
    }
}

async fn check(res: Response) -> Result<(), TransportError> {
    let status = res.status();
    if status.is_success() {
        return Ok(());
    }
    let body = res.text().await.unwrap_or_default();
    Err(TransportError::Rejected {
        status: status.as_u16(),
        body,
    })
}

async fn retry_after(res: Response) -> Duration {
    let seconds = res
        .json::<RateLimitBody>()
        .await
        .ok()
        .and_then(|b| b.retry_after)
        .filter(|s| s.is_finite() && *s >= 0.0)
        .unwrap_or(1.0);
    Duration::from_secs_f64(seconds)
}

fn mime_for(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("mp3") => "audio/mpeg",
        Some("txt") => "text/plain; charset=utf-8",
        _ => "application/octet-stream",
    }
}
