//! Cleanup of raw reply bodies before they are aggregated.

use regex::Regex;
use std::sync::LazyLock;

/// Back-references such as `>>123` or `>>123-456`.
static RE_ANCHOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r">>\d+(-\d+)?").expect("anchor pattern"));
static RE_URL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"https?://\S+").expect("url pattern"));
static RE_WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("whitespace pattern"));

/// Strips reply anchors and links from a reply body and collapses whitespace.
pub fn normalize(raw: &str) -> String {
    let mut text = raw.to_string();
    // Removing `>>5` from `>>>5>9` leaves `>>9`, so strip until nothing matches.
    while RE_ANCHOR.is_match(&text) {
        text = RE_ANCHOR.replace_all(&text, "").into_owned();
    }
    let text = RE_URL.replace_all(&text, "");
    let text = RE_WHITESPACE.replace_all(&text, " ");
    text.trim().to_string()
}

pub fn normalize_opt(raw: Option<&str>) -> String {
    raw.map(normalize).unwrap_or_default()
}
