use crate::config::{BoardConfig, Charset};
use crate::normalize::normalize;
use crate::{Post, ThreadDescriptor};
use regex::Regex;
use reqwest::Client;
use scraper::{Html, Selector};
use thiserror::Error;
use url::Url;

/// Below this many posts a variant is not trusted when the thread is known to be larger.
const MIN_TRUSTED_POSTS: usize = 50;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{url} returned status {status}")]
    Status { url: String, status: u16 },
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("invalid thread pattern: {0}")]
    Pattern(#[from] regex::Error),
}

pub struct Board {
    client: Client,
    base_url: Url,
    config: BoardConfig,
}

impl Board {
    pub fn new(config: BoardConfig) -> Result<Self, FetchError> {
        Ok(Self {
            client: Client::builder()
                .timeout(config.fetch_timeout)
                .danger_accept_invalid_certs(config.skip_tls_verification)
                .build()?,
            base_url: Url::parse(&config.base_url)?,
            config,
        })
    }

    pub fn config(&self) -> &BoardConfig {
        &self.config
    }

    /// Fetches the listing page and picks the newest qualifying thread.
    ///
    /// Network and parse failures are logged and reported as `None`.
    pub async fn latest_thread(&self) -> Option<ThreadDescriptor> {
        let url = self.config.listing_url.clone();
        tracing::info!(url = %url, "fetching thread listing");
        let body = match self.fetch(&url).await {
            Ok(body) => body,
            Err(e) => {
                tracing::error!(url = %url, error = %e, "thread listing fetch failed");
                return None;
            }
        };

        let rules = match SelectionRules::new(&self.config.thread_prefix, self.config.min_replies) {
            Ok(rules) => rules,
            Err(e) => {
                tracing::error!(error = %e, "thread selection rules rejected");
                return None;
            }
        };

        select_latest_thread(&body, self.config.charset, &self.base_url, &rules)
    }

    /// Collects cleaned reply bodies for `thread_url`.
    ///
    /// Up to three URL variants are tried. With an expected count the first
    /// variant reaching `min(50, expected)` wins; otherwise the largest result
    /// seen is kept. An empty vector means no usable data, not an empty thread.
    pub async fn extract_posts(&self, thread_url: &str, expected_count: Option<u32>) -> Vec<Post> {
        let expected = expected_count.filter(|n| *n > 0).map(|n| n as usize);
        let mut posts: Vec<Post> = Vec::new();

        for url in url_variants(thread_url) {
            let body = match self.fetch(&url).await {
                Ok(body) => body,
                Err(e) => {
                    tracing::warn!(url = %url, error = %e, "skipping thread page variant");
                    continue;
                }
            };
            let (html, lossy) = self.config.charset.decode(&body);
            if lossy {
                tracing::debug!(url = %url, charset = self.config.charset.name(), "page had undecodable bytes");
            }
            let found = extract_post_bodies(&html);
            tracing::debug!(url = %url, count = found.len(), "extracted posts from variant");

            let trusted = expected.is_some_and(|n| found.len() >= MIN_TRUSTED_POSTS.min(n));
            if found.len() > posts.len() {
                posts = found;
            }
            if trusted {
                break;
            }
        }

        if posts.is_empty() {
            tracing::warn!(url = %thread_url, "no posts extracted from any variant");
        }
        posts
    }

    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let res = self.client.get(url).send().await?;
        if !res.status().is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: res.status().as_u16(),
            });
        }
        Ok(res.bytes().await?.to_vec())
    }
}

/// Which listing entries count as candidate threads.
#[derive(Debug, Clone)]
pub struct SelectionRules {
    pattern: Regex,
    min_replies: u32,
}

impl SelectionRules {
    /// Matches link text like `PREFIX part1925(2763)`.
    pub fn new(prefix: &str, min_replies: u32) -> Result<Self, regex::Error> {
        let pattern = Regex::new(&format!(r"^{} part(\d+)\((\d+)\)", regex::escape(prefix)))?;
        Ok(Self {
            pattern,
            min_replies,
        })
    }

    /// Returns `(part, replies)` for a matching link text.
    pub fn parse(&self, text: &str) -> Option<(u32, u32)> {
        let caps = self.pattern.captures(text.trim())?;
        let part = caps.get(1)?.as_str().parse().ok()?;
        let replies = caps.get(2)?.as_str().parse().ok()?;
        Some((part, replies))
    }
}

/// Picks the candidate with the highest part number from a listing page.
pub fn select_latest_thread(
    listing: &[u8],
    charset: Charset,
    base_url: &Url,
    rules: &SelectionRules,
) -> Option<ThreadDescriptor> {
    let (html, _) = charset.decode(listing);
    let doc = Html::parse_document(&html);
    let link_selector = Selector::parse("a[href]").expect("static selector");

    let mut candidates = Vec::new();
    for el in doc.select(&link_selector) {
        let text = el.text().collect::<String>();
        let text = text.trim();
        let Some((part, replies)) = rules.parse(text) else {
            continue;
        };
        if replies < rules.min_replies {
            continue;
        }
        let Some(href) = el.value().attr("href") else {
            continue;
        };
        match base_url.join(href) {
            Ok(link) => candidates.push(ThreadDescriptor::new(
                text.to_string(),
                link.to_string(),
                part,
                replies,
            )),
            Err(e) => tracing::warn!(href, error = %e, "unresolvable thread link"),
        }
    }

    let latest = candidates.into_iter().max_by_key(|t| t.part_number);
    match &latest {
        Some(t) => tracing::info!(name = %t.display_name, url = %t.url, "selected thread"),
        None => tracing::info!("no thread matched the selection rules"),
    }
    latest
}

/// Reply bodies from a thread page, cleaned, in page order.
pub fn extract_post_bodies(html: &str) -> Vec<Post> {
    let doc = Html::parse_document(html);
    let body_selector = Selector::parse("dd").expect("static selector");

    doc.select(&body_selector)
        .map(|el| normalize(&el.text().collect::<Vec<_>>().join(" ")))
        .filter(|text| !text.is_empty())
        .collect()
}

/// Points a thread URL at the thread root.
///
/// Drops the query, ensures a trailing slash and removes a page-range segment
/// after `/read.cgi/{category}/{board}/{thread}/`.
pub fn canonical_thread_url(thread_url: &str) -> String {
    let without_query = thread_url.split('?').next().unwrap_or_default();
    let Ok(mut url) = Url::parse(without_query) else {
        return with_trailing_slash(without_query);
    };
    url.set_fragment(None);

    let segments: Vec<String> = match url.path_segments() {
        Some(segments) => segments.filter(|s| !s.is_empty()).map(str::to_string).collect(),
        None => return with_trailing_slash(without_query),
    };
    if let Some(pos) = segments.iter().position(|s| s == "read.cgi") {
        if segments.len() >= pos + 4 {
            let root = &segments[..pos + 4];
            url.set_path(&format!("/{}/", root.join("/")));
            return url.to_string();
        }
    }
    with_trailing_slash(url.as_str())
}

/// The numeric thread segment of a `read.cgi` URL.
pub fn thread_id(thread_url: &str) -> Option<String> {
    let canonical = canonical_thread_url(thread_url);
    let url = Url::parse(&canonical).ok()?;
    let segments: Vec<&str> = url.path_segments()?.filter(|s| !s.is_empty()).collect();
    let pos = segments.iter().position(|s| *s == "read.cgi")?;
    let id = segments.get(pos + 3)?;
    id.chars().all(|c| c.is_ascii_digit()).then(|| id.to_string())
}

/// Candidate URLs for a thread, in the order they are tried.
pub fn url_variants(thread_url: &str) -> Vec<String> {
    let base = canonical_thread_url(thread_url);
    vec![
        base.clone(),
        format!("{base}?mode=all"),
        format!("{base}index.html"),
    ]
}

fn with_trailing_slash(url: &str) -> String {
    if url.ends_with('/') {
        url.to_string()
    } else {
        format!("{url}/")
    }
}
