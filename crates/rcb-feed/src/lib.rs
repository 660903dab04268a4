//! HTTP feed source (reqwest + feed-rs).
//!
//! Implements the `rcb-core` FeedSource port. Any failure is logged and turns
//! into an empty entry list.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use rcb_core::{
    errors::Error,
    feed::{FeedEntry, FeedSource, MediaRef},
    Result,
};

const USER_AGENT: &str = concat!("rcb/", env!("CARGO_PKG_VERSION"), " (rss channel bot)");

#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    #[error("invalid feed url {0}")]
    InvalidUrl(String),

    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP {0}")]
    Status(u16),

    #[error("parse failed: {0}")]
    Parse(String),
}

#[derive(Clone, Debug)]
pub struct HttpFeedSource {
    http: reqwest::Client,
}

impl HttpFeedSource {
    pub fn new(timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| Error::External(format!("reqwest client build: {e}")))?;
        Ok(Self { http })
    }

    async fn try_fetch(&self, url: &str) -> std::result::Result<Vec<FeedEntry>, FeedError> {
        if !is_valid_feed_url(url) {
            return Err(FeedError::InvalidUrl(url.to_string()));
        }

        let resp = self.http.get(url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(FeedError::Status(status.as_u16()));
        }
        let body = resp.bytes().await?;
        parse_entries(&body)
    }
}

#[async_trait]
impl FeedSource for HttpFeedSource {
    async fn fetch(&self, url: &str) -> Vec<FeedEntry> {
        match self.try_fetch(url).await {
            Ok(entries) if entries.is_empty() => {
                warn!("empty feed: {url}");
                entries
            }
            Ok(entries) => {
                debug!("fetched {} entries from {url}", entries.len());
                entries
            }
            Err(e) => {
                warn!("feed {url} skipped: {e}");
                Vec::new()
            }
        }
    }
}

/// A media object synthesized from an RSS `<enclosure>`: a single content
/// item carrying only url, type and length.
fn is_enclosure(obj: &feed_rs::model::MediaObject) -> bool {
    let [c] = obj.content.as_slice() else {
        return false;
    };
    obj.title.is_none()
        && obj.description.is_none()
        && obj.thumbnails.is_empty()
        && c.size.is_some()
        && c.width.is_none()
        && c.height.is_none()
        && c.duration.is_none()
}

pub fn is_valid_feed_url(raw: &str) -> bool {
    url::Url::parse(raw)
        .map(|u| u.scheme() == "http" || u.scheme() == "https")
        .unwrap_or(false)
}

/// Parse RSS/Atom/JSON Feed bytes into entries, keeping feed order.
pub fn parse_entries(body: &[u8]) -> std::result::Result<Vec<FeedEntry>, FeedError> {
    let feed = feed_rs::parser::parse(body).map_err(|e| FeedError::Parse(e.to_string()))?;
    Ok(feed.entries.into_iter().filter_map(convert_entry).collect())
}

fn convert_entry(entry: feed_rs::model::Entry) -> Option<FeedEntry> {
    // Prefer the alternate (or first non-enclosure) link; fall back to the item id.
    let link = entry
        .links
        .iter()
        .find(|l| l.rel.as_deref().map(|r| r == "alternate").unwrap_or(true))
        .map(|l| l.href.clone())
        .or_else(|| {
            let id = entry.id.trim();
            (!id.is_empty()).then(|| id.to_string())
        })?;

    // feed-rs turns RSS <enclosure> elements into media objects as well; split
    // them back out so media:content keeps priority over enclosures.
    let mut enclosures: Vec<MediaRef> = entry
        .links
        .iter()
        .filter(|l| l.rel.as_deref() == Some("enclosure"))
        .map(|l| MediaRef::new(l.href.clone(), l.media_type.as_deref()))
        .collect();

    let mut media = Vec::new();
    for obj in &entry.media {
        let target = if is_enclosure(obj) {
            &mut enclosures
        } else {
            &mut media
        };
        for c in &obj.content {
            let Some(url) = &c.url else {
                continue;
            };
            let mime = c.content_type.as_ref().map(|m| m.to_string());
            target.push(MediaRef::new(url.as_str(), mime.as_deref()));
        }
        for t in &obj.thumbnails {
            media.push(MediaRef::new(t.image.uri.clone(), Some("image/*")));
        }
    }

    let content_blocks = entry
        .content
        .as_ref()
        .and_then(|c| c.body.clone())
        .into_iter()
        .collect();

    Some(FeedEntry {
        link,
        title: entry.title.map(|t| t.content).unwrap_or_default(),
        raw_description: entry.summary.map(|s| s.content).unwrap_or_default(),
        published_at: entry.published.or(entry.updated),
        media,
        enclosures,
        content_blocks,
    })
}
