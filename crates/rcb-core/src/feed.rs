//! Feed entries, the feed source port, and entry normalization.

use std::sync::OnceLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;

use crate::formatting::bound_length;

/// A linked media object (media attachment or enclosure).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MediaRef {
    pub url: String,
    pub mime_type: Option<String>,
}

impl MediaRef {
    pub fn new(url: impl Into<String>, mime_type: Option<&str>) -> Self {
        Self {
            url: url.into(),
            mime_type: mime_type.map(|s| s.to_string()),
        }
    }

    fn is_image(&self) -> bool {
        !self.url.is_empty()
            && self
                .mime_type
                .as_deref()
                .map(|t| t.trim().to_ascii_lowercase().starts_with("image"))
                .unwrap_or(false)
    }
}

/// One feed item as fetched. Text fields keep their original markup.
#[derive(Clone, Debug, Default)]
pub struct FeedEntry {
    /// Unique key used for deduplication.
    pub link: String,
    pub title: String,
    pub raw_description: String,
    pub published_at: Option<DateTime<Utc>>,
    /// Structured media attachments (e.g. `media:content`).
    pub media: Vec<MediaRef>,
    pub enclosures: Vec<MediaRef>,
    /// Full-content markup blocks (e.g. `content:encoded`).
    pub content_blocks: Vec<String>,
}

/// Entry text after markup stripping and length bounding.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NormalizedEntry {
    pub title: String,
    pub description: String,
}

impl FeedEntry {
    pub fn normalized(&self, description_limit: usize) -> NormalizedEntry {
        let title = clean_html(&self.title);
        let title = if title.is_empty() {
            "No title".to_string()
        } else {
            title
        };
        let description = bound_length(&clean_html(&self.raw_description), description_limit);
        NormalizedEntry { title, description }
    }
}

/// Port for fetching one feed.
///
/// Implementations never fail: fetch or parse errors are logged and reported as
/// an empty entry list so the poll loop simply skips the source this cycle.
#[async_trait]
pub trait FeedSource: Send + Sync {
    /// Entries in feed order (newest first for well-behaved feeds).
    async fn fetch(&self, url: &str) -> Vec<FeedEntry>;
}

fn tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<[^>]*>").expect("valid regex"))
}

fn hidden_block_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?is)<(script|style)\b[^>]*>.*?</(script|style)\s*>").expect("valid regex")
    })
}

fn img_src_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?is)<img\b[^>]*?\bsrc\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s>]+))"#)
            .expect("valid regex")
    })
}

fn entity_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"&(#[0-9]+|#[xX][0-9a-fA-F]+|[a-zA-Z]+);").expect("valid regex"))
}

/// Strip markup and return the plain text content, trimmed.
pub fn clean_html(text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }
    let without_hidden = hidden_block_re().replace_all(text, "");
    let without_tags = tag_re().replace_all(&without_hidden, "");
    decode_entities(&without_tags).trim().to_string()
}

fn decode_entities(text: &str) -> String {
    entity_re()
        .replace_all(text, |caps: &regex::Captures<'_>| {
            let raw = &caps[1];
            let decoded = if let Some(hex) = raw
                .strip_prefix("#x")
                .or_else(|| raw.strip_prefix("#X"))
            {
                u32::from_str_radix(hex, 16).ok().and_then(char::from_u32)
            } else if let Some(dec) = raw.strip_prefix('#') {
                dec.parse::<u32>().ok().and_then(char::from_u32)
            } else {
                match raw {
                    "amp" => Some('&'),
                    "lt" => Some('<'),
                    "gt" => Some('>'),
                    "quot" => Some('"'),
                    "apos" => Some('\''),
                    "nbsp" => Some('\u{a0}'),
                    "mdash" => Some('—'),
                    "ndash" => Some('–'),
                    "hellip" => Some('…'),
                    "laquo" => Some('«'),
                    "raquo" => Some('»'),
                    _ => None,
                }
            };
            match decoded {
                Some(c) => c.to_string(),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

/// First `<img src>` found in a markup fragment.
pub fn first_img_src(markup: &str) -> Option<String> {
    img_src_re().captures_iter(markup).find_map(|caps| {
        let src = caps
            .get(1)
            .or_else(|| caps.get(2))
            .or_else(|| caps.get(3))?
            .as_str()
            .trim();
        if src.is_empty() {
            None
        } else {
            Some(decode_entities(src))
        }
    })
}

/// Pick a representative image for an entry.
///
/// Priority: image media attachments, image enclosures, `<img>` in content
/// blocks, `<img>` in the description.
pub fn extract_image(entry: &FeedEntry) -> Option<String> {
    if let Some(m) = entry.media.iter().find(|m| m.is_image()) {
        return Some(m.url.clone());
    }
    if let Some(e) = entry.enclosures.iter().find(|e| e.is_image()) {
        return Some(e.url.clone());
    }
    if let Some(src) = entry.content_blocks.iter().find_map(|c| first_img_src(c)) {
        return Some(src);
    }
    first_img_src(&entry.raw_description)
}
