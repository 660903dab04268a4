//! Cache-checked text enrichment through an external generative text service.
//!
//! Enrichment never blocks publishing: any failure degrades to the original text.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Local;
use tracing::{debug, error, info};

use crate::{
    cache::{content_hash, ContentCache},
    stats::{CacheInfo, EnrichmentErrorKind, EnrichmentStats},
};

/// Fixed instructions sent with every rewrite request.
pub const SYSTEM_PROMPT: &str = "You are a professional journalist. Write an engaging Telegram \
post based on the news item. Make the text: 1. Lively and emotional 2. With emoji 3. Split into \
paragraphs 4. Up to 500 characters";

/// One rewrite request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EnrichmentRequest {
    pub system_prompt: String,
    pub title: String,
    pub description: String,
}

impl EnrichmentRequest {
    pub fn new(title: &str, description: &str) -> Self {
        Self {
            system_prompt: SYSTEM_PROMPT.to_string(),
            title: title.to_string(),
            description: description.to_string(),
        }
    }

    /// User message body sent to the model.
    pub fn user_message(&self) -> String {
        format!("Title: {}\n\nText: {}", self.title, self.description)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum EnrichmentError {
    #[error("request timed out")]
    Timeout,

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("{0}")]
    General(String),
}

impl EnrichmentError {
    pub fn kind(&self) -> EnrichmentErrorKind {
        match self {
            EnrichmentError::Timeout => EnrichmentErrorKind::Timeout,
            EnrichmentError::Connection(_) => EnrichmentErrorKind::Connection,
            EnrichmentError::Http { .. } => EnrichmentErrorKind::Http,
            EnrichmentError::General(_) => EnrichmentErrorKind::General,
        }
    }

    pub fn status_code(&self) -> Option<u16> {
        match self {
            EnrichmentError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Port for the generative text backend.
///
/// Implementations issue exactly one outbound request per call (no retries)
/// and enforce their own timeout.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    fn model(&self) -> &str;

    async fn generate(
        &self,
        req: &EnrichmentRequest,
    ) -> std::result::Result<String, EnrichmentError>;
}

/// Result of an enrichment attempt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EnrichOutcome {
    Cached(String),
    Generated(String),
    /// The service failed; `text` is the original content unmodified.
    Fallback { text: String, error: EnrichmentError },
}

impl EnrichOutcome {
    pub fn text(&self) -> &str {
        match self {
            EnrichOutcome::Cached(t) | EnrichOutcome::Generated(t) => t,
            EnrichOutcome::Fallback { text, .. } => text,
        }
    }

    pub fn into_text(self) -> String {
        match self {
            EnrichOutcome::Cached(t) | EnrichOutcome::Generated(t) => t,
            EnrichOutcome::Fallback { text, .. } => text,
        }
    }

    pub fn is_enriched(&self) -> bool {
        !matches!(self, EnrichOutcome::Fallback { .. })
    }
}

pub struct EnrichmentClient {
    generator: Arc<dyn TextGenerator>,
    cache: ContentCache,
    stats: Mutex<EnrichmentStats>,
}

impl EnrichmentClient {
    pub fn new(generator: Arc<dyn TextGenerator>, cache: ContentCache) -> Self {
        Self {
            generator,
            cache,
            stats: Mutex::new(EnrichmentStats::default()),
        }
    }

    pub fn model(&self) -> &str {
        self.generator.model()
    }

    pub fn stats(&self) -> EnrichmentStats {
        self.stats.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn cache_info(&self) -> CacheInfo {
        CacheInfo {
            enabled: self.cache.is_enabled(),
            records: self.cache.len(),
        }
    }

    fn with_stats(&self, f: impl FnOnce(&mut EnrichmentStats)) {
        if let Ok(mut s) = self.stats.lock() {
            f(&mut s);
        }
    }

    /// Rewrite `title` + `description`, consulting the cache first.
    pub async fn enrich(&self, title: &str, description: &str) -> EnrichOutcome {
        self.with_stats(|s| s.total_requests += 1);

        let content = format!("{title}\n\n{description}");
        let key = content_hash(&content);

        if let Some(cached) = self.cache.get(&key) {
            debug!("enrichment cache hit {key}");
            self.with_stats(|s| s.cache_hits += 1);
            return EnrichOutcome::Cached(cached);
        }

        let req = EnrichmentRequest::new(title, description);
        match self.generator.generate(&req).await {
            Ok(text) => {
                self.cache.put(&key, &text);
                self.with_stats(|s| {
                    s.successful += 1;
                    s.last_success = Some(Local::now());
                });
                EnrichOutcome::Generated(text)
            }
            Err(e) => {
                error!("enrichment failed ({}): {e}", e.kind().label());
                self.with_stats(|s| s.record_error(e.kind(), e.status_code()));
                EnrichOutcome::Fallback {
                    text: content,
                    error: e,
                }
            }
        }
    }

    /// Uncached, uncounted round-trip used as a startup connectivity check.
    pub async fn probe(&self) -> std::result::Result<String, EnrichmentError> {
        let req = EnrichmentRequest::new("Test", "This is a connection test");
        let out = self.generator.generate(&req).await?;
        info!("enrichment probe ok ({})", self.generator.model());
        Ok(out)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Scripted generator: replies with `reply` or fails with `error`.
    pub struct FakeGenerator {
        pub calls: AtomicUsize,
        pub error: Option<EnrichmentError>,
        pub reply: String,
    }

    impl FakeGenerator {
        pub fn ok(reply: &str) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                error: None,
                reply: reply.to_string(),
            }
        }

        pub fn failing(error: EnrichmentError) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                error: Some(error),
                reply: String::new(),
            }
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TextGenerator for FakeGenerator {
        fn model(&self) -> &str {
            "fake-model"
        }

        async fn generate(
            &self,
            req: &EnrichmentRequest,
        ) -> std::result::Result<String, EnrichmentError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.error {
                Some(e) => Err(e.clone()),
                None => Ok(format!("{} [{}]", self.reply, req.title)),
            }
        }
    }
}
