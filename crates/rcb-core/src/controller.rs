//! Poll loop and its start/stop/restart lifecycle.
//!
//! One background worker task polls every source, publishes entries it has not
//! seen yet, and sleeps until the next cycle. Lifecycle calls come from the
//! command interface on other tasks:
//! - at most one worker is alive at a time (running flag checked under the
//!   lifecycle lock)
//! - `stop()` is best-effort: it cancels the worker and waits a bounded time,
//!   returning even if the worker is still finishing an in-flight call
//! - cancellation is observed at checkpoints (between sources, between entries,
//!   while sleeping), never in the middle of a fetch/enrich/publish call

use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
};

use chrono::Local;
use tokio::{task::JoinHandle, time::sleep};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::{
    config::PollSettings,
    domain::RunState,
    enrich::{EnrichOutcome, EnrichmentClient},
    feed::{extract_image, FeedEntry, FeedSource},
    publish::{Post, PublishSink},
    stats::{RunStats, StatusSnapshot},
    Result,
};

/// Message length ceilings for published posts.
#[derive(Clone, Copy, Debug)]
pub struct PostLimits {
    pub max_post_length: usize,
    /// Ceiling for photo captions (applied on top of `max_post_length`).
    pub caption_limit: usize,
}

impl Default for PostLimits {
    fn default() -> Self {
        Self {
            max_post_length: 2000,
            caption_limit: 1024,
        }
    }
}

impl PostLimits {
    fn for_post(&self, has_image: bool) -> usize {
        if has_image {
            self.max_post_length.min(self.caption_limit)
        } else {
            self.max_post_length
        }
    }
}

/// Links of entries already published during this process lifetime.
///
/// Grows without bound; a long-running deployment with very busy feeds would
/// want a retention window here.
#[derive(Debug, Default)]
pub struct SeenSet {
    links: HashSet<String>,
}

impl SeenSet {
    pub fn contains(&self, link: &str) -> bool {
        self.links.contains(link)
    }

    pub fn insert(&mut self, link: &str) -> bool {
        self.links.insert(link.to_string())
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }
}

/// Summary of one pass over all sources.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub sources_checked: usize,
    pub entries_considered: usize,
    pub published: usize,
    pub failed: usize,
}

#[derive(Default)]
struct Lifecycle {
    cancel: Option<CancellationToken>,
    worker: Option<JoinHandle<()>>,
}

struct Inner {
    settings: PollSettings,
    limits: PostLimits,
    sources: Vec<String>,
    feed: Arc<dyn FeedSource>,
    sink: Arc<dyn PublishSink>,
    enricher: Option<Arc<EnrichmentClient>>,
    enrichment_enabled: AtomicBool,
    running: AtomicBool,
    seen: Mutex<SeenSet>,
    stats: Mutex<RunStats>,
    lifecycle: tokio::sync::Mutex<Lifecycle>,
}

#[derive(Clone)]
pub struct Controller {
    inner: Arc<Inner>,
}

impl Controller {
    pub fn new(
        settings: PollSettings,
        limits: PostLimits,
        sources: Vec<String>,
        feed: Arc<dyn FeedSource>,
        sink: Arc<dyn PublishSink>,
        enricher: Option<Arc<EnrichmentClient>>,
        enrichment_enabled: bool,
    ) -> Self {
        let enrichment_enabled = enrichment_enabled && enricher.is_some();
        Self {
            inner: Arc::new(Inner {
                settings,
                limits,
                sources,
                feed,
                sink,
                enricher,
                enrichment_enabled: AtomicBool::new(enrichment_enabled),
                running: AtomicBool::new(false),
                seen: Mutex::new(SeenSet::default()),
                stats: Mutex::new(RunStats::default()),
                lifecycle: tokio::sync::Mutex::new(Lifecycle::default()),
            }),
        }
    }

    pub fn settings(&self) -> &PollSettings {
        &self.inner.settings
    }

    pub fn sources(&self) -> &[String] {
        &self.inner.sources
    }

    pub fn enricher(&self) -> Option<&Arc<EnrichmentClient>> {
        self.inner.enricher.as_ref()
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> RunState {
        if self.is_running() {
            RunState::Running
        } else {
            RunState::Stopped
        }
    }

    // ============== Lifecycle ==============

    /// Spawn the worker. Returns `false` if one is already running.
    pub async fn start(&self) -> bool {
        let mut lc = self.inner.lifecycle.lock().await;
        if self.is_running() {
            return false;
        }

        let cancel = CancellationToken::new();
        self.with_stats(|s| {
            s.started_at = Some(Local::now());
            s.errors = 0;
        });
        self.inner.running.store(true, Ordering::SeqCst);

        let controller = self.clone();
        let token = cancel.clone();
        let worker = tokio::spawn(async move { controller.worker_loop(token).await });

        lc.cancel = Some(cancel);
        lc.worker = Some(worker);
        info!("poll worker started");
        true
    }

    /// Signal the worker to stop and wait up to `stop_timeout` for it.
    ///
    /// Returns `false` only when nothing was running.
    pub async fn stop(&self) -> bool {
        let mut lc = self.inner.lifecycle.lock().await;
        if !self.is_running() {
            return false;
        }
        self.inner.running.store(false, Ordering::SeqCst);

        if let Some(tok) = lc.cancel.take() {
            tok.cancel();
        }
        if let Some(worker) = lc.worker.take() {
            match tokio::time::timeout(self.inner.settings.stop_timeout, worker).await {
                Ok(_) => info!("poll worker stopped"),
                Err(_) => warn!(
                    "poll worker did not exit within {:?}; it will stop at its next checkpoint",
                    self.inner.settings.stop_timeout
                ),
            }
        }
        true
    }

    pub async fn restart(&self) -> bool {
        self.stop().await;
        sleep(self.inner.settings.restart_pause).await;
        self.start().await
    }

    // ============== Enrichment switch ==============

    pub fn enrichment_enabled(&self) -> bool {
        self.inner.enrichment_enabled.load(Ordering::SeqCst)
    }

    /// Turn enrichment on/off. Cannot be enabled without a configured client.
    pub fn set_enrichment(&self, enabled: bool) -> bool {
        let enabled = enabled && self.inner.enricher.is_some();
        self.inner
            .enrichment_enabled
            .store(enabled, Ordering::SeqCst);
        enabled
    }

    pub fn toggle_enrichment(&self) -> bool {
        self.set_enrichment(!self.enrichment_enabled())
    }

    // ============== Status ==============

    pub fn snapshot(&self) -> StatusSnapshot {
        let run = self
            .inner
            .stats
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default();
        let seen_entries = self.inner.seen.lock().map(|s| s.len()).unwrap_or(0);
        let enricher = self.inner.enricher.as_ref();
        StatusSnapshot {
            state: self.state(),
            run,
            sources: self.inner.sources.len(),
            seen_entries,
            enrichment_enabled: self.enrichment_enabled(),
            enrichment_model: enricher.map(|e| e.model().to_string()),
            enrichment: enricher.map(|e| e.stats()),
            cache: enricher.map(|e| e.cache_info()),
        }
    }

    pub fn is_seen(&self, link: &str) -> bool {
        self.inner
            .seen
            .lock()
            .map(|s| s.contains(link))
            .unwrap_or(false)
    }

    fn with_stats(&self, f: impl FnOnce(&mut RunStats)) {
        if let Ok(mut s) = self.inner.stats.lock() {
            f(&mut s);
        }
    }

    // ============== Worker ==============

    async fn worker_loop(self, cancel: CancellationToken) {
        info!("poll loop started");
        while !cancel.is_cancelled() {
            // Each cycle runs in its own task so a panic inside it is reported
            // here as a loop error instead of killing the worker.
            let controller = self.clone();
            let token = cancel.clone();
            let cycle = tokio::spawn(async move { controller.run_cycle(&token).await });

            let wait = match cycle.await {
                Ok(report) => {
                    info!(
                        "cycle done: {} sources, {} new entries, {} published, {} failed",
                        report.sources_checked,
                        report.entries_considered,
                        report.published,
                        report.failed
                    );
                    self.inner.settings.poll_interval
                }
                Err(e) => {
                    error!("poll cycle failed: {e}");
                    self.with_stats(|s| {
                        s.errors += 1;
                        s.last_error = Some(Local::now());
                    });
                    self.inner.settings.error_backoff
                }
            };

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = sleep(wait) => {}
            }
        }
        info!("poll loop stopped");
    }

    /// One pass over every configured source.
    pub async fn run_cycle(&self, cancel: &CancellationToken) -> CycleReport {
        let mut report = CycleReport::default();
        self.with_stats(|s| s.last_check = Some(Local::now()));
        info!("checking {} sources", self.inner.sources.len());

        for url in &self.inner.sources {
            if cancel.is_cancelled() {
                break;
            }
            report.sources_checked += 1;

            let entries = self.inner.feed.fetch(url).await;
            let take = self.inner.settings.entries_per_source.min(entries.len());

            // Newest N in feed order, processed oldest first.
            for entry in entries[..take].iter().rev() {
                if cancel.is_cancelled() {
                    break;
                }
                if entry.link.is_empty() || self.is_seen(&entry.link) {
                    continue;
                }
                report.entries_considered += 1;

                match self.process_entry(entry).await {
                    Ok(()) => {
                        report.published += 1;
                        sleep(self.inner.settings.post_delay).await;
                    }
                    Err(e) => {
                        report.failed += 1;
                        error!("publish failed for {}: {e}", entry.link);
                        self.with_stats(|s| {
                            s.errors += 1;
                            s.publish_failures += 1;
                            s.last_error = Some(Local::now());
                        });
                    }
                }
            }
        }

        report
    }

    async fn process_entry(&self, entry: &FeedEntry) -> Result<()> {
        let text = entry.normalized(self.inner.settings.description_limit);

        let mut enriched = false;
        let body = match self.active_enricher() {
            Some(enricher) => {
                let outcome = enricher.enrich(&text.title, &text.description).await;
                if let EnrichOutcome::Fallback { error, .. } = &outcome {
                    let msg = error.to_string();
                    self.with_stats(|s| s.last_enrichment_error = Some(msg));
                }
                enriched = outcome.is_enriched();
                outcome.into_text()
            }
            None => text.description,
        };

        let image_url = extract_image(entry);
        let max_len = self.inner.limits.for_post(image_url.is_some());
        let post = Post::new(&text.title, &body, &entry.link, image_url, max_len);

        self.inner.sink.publish(&post).await?;

        if let Ok(mut seen) = self.inner.seen.lock() {
            seen.insert(&entry.link);
        }
        self.with_stats(|s| {
            s.posts_sent += 1;
            if enriched {
                s.posts_enriched += 1;
            }
            s.last_post = Some(Local::now());
        });
        info!("posted: {}", entry.link);
        Ok(())
    }

    fn active_enricher(&self) -> Option<&Arc<EnrichmentClient>> {
        if self.enrichment_enabled() {
            self.inner.enricher.as_ref()
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        cache::ContentCache,
        enrich::{testing::FakeGenerator, EnrichmentError},
        errors::Error,
        feed::MediaRef,
    };
    use async_trait::async_trait;
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    #[derive(Default)]
    struct FakeSource {
        entries: Mutex<Vec<FeedEntry>>,
        fetches: AtomicUsize,
        panic_on_fetch: bool,
    }

    impl FakeSource {
        fn with(entries: Vec<FeedEntry>) -> Self {
            Self {
                entries: Mutex::new(entries),
                ..Self::default()
            }
        }
    }

    #[async_trait]
    impl FeedSource for FakeSource {
        async fn fetch(&self, _url: &str) -> Vec<FeedEntry> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            if self.panic_on_fetch {
                panic!("feed exploded");
            }
            self.entries.lock().unwrap().clone()
        }
    }

    #[derive(Default)]
    struct FakeSink {
        posts: Mutex<Vec<Post>>,
        attempts: AtomicUsize,
        fail_links: Mutex<HashSet<String>>,
    }

    impl FakeSink {
        fn posts(&self) -> Vec<Post> {
            self.posts.lock().unwrap().clone()
        }

        fn fail_for(&self, link: &str) {
            self.fail_links.lock().unwrap().insert(link.to_string());
        }

        fn heal(&self) {
            self.fail_links.lock().unwrap().clear();
        }
    }

    #[async_trait]
    impl PublishSink for FakeSink {
        async fn publish(&self, post: &Post) -> Result<()> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            if self.fail_links.lock().unwrap().contains(&post.link) {
                return Err(Error::Publish("chat not found".to_string()));
            }
            self.posts.lock().unwrap().push(post.clone());
            Ok(())
        }
    }

    fn fast_settings() -> PollSettings {
        PollSettings {
            poll_interval: Duration::from_secs(3600),
            entries_per_source: 10,
            post_delay: Duration::from_millis(0),
            error_backoff: Duration::from_millis(10),
            stop_timeout: Duration::from_secs(1),
            restart_pause: Duration::from_millis(1),
            description_limit: 1000,
        }
    }

    /// `n` entries, newest first (entry 0 is the most recent).
    fn entries(n: usize) -> Vec<FeedEntry> {
        (0..n)
            .map(|i| FeedEntry {
                link: format!("https://news.example/{i}"),
                title: format!("Title {i}"),
                raw_description: format!("<p>Description {i}</p>"),
                ..FeedEntry::default()
            })
            .collect()
    }

    fn controller(
        source: Arc<FakeSource>,
        sink: Arc<FakeSink>,
        enricher: Option<Arc<EnrichmentClient>>,
    ) -> Controller {
        let enabled = enricher.is_some();
        Controller::new(
            fast_settings(),
            PostLimits::default(),
            vec!["https://news.example/rss".to_string()],
            source,
            sink,
            enricher,
            enabled,
        )
    }

    #[tokio::test]
    async fn processes_ten_most_recent_oldest_first() {
        let source = Arc::new(FakeSource::with(entries(12)));
        let sink = Arc::new(FakeSink::default());
        let c = controller(source, sink.clone(), None);

        let report = c.run_cycle(&CancellationToken::new()).await;
        assert_eq!(report.published, 10);

        let links: Vec<String> = sink.posts().into_iter().map(|p| p.link).collect();
        let expected: Vec<String> = (0..10)
            .rev()
            .map(|i| format!("https://news.example/{i}"))
            .collect();
        assert_eq!(links, expected);

        let snap = c.snapshot();
        assert_eq!(snap.seen_entries, 10);
        assert_eq!(snap.run.posts_sent, 10);
        assert!(!c.is_seen("https://news.example/10"));
        assert!(!c.is_seen("https://news.example/11"));
    }

    #[tokio::test]
    async fn seen_entries_are_not_republished() {
        let source = Arc::new(FakeSource::with(entries(3)));
        let sink = Arc::new(FakeSink::default());
        let c = controller(source.clone(), sink.clone(), None);

        c.run_cycle(&CancellationToken::new()).await;
        let second = c.run_cycle(&CancellationToken::new()).await;

        assert_eq!(second.published, 0);
        assert_eq!(sink.posts().len(), 3);
        assert_eq!(source.fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn disabled_enrichment_posts_cleaned_description() {
        let source = Arc::new(FakeSource::with(entries(1)));
        let sink = Arc::new(FakeSink::default());
        let c = controller(source, sink.clone(), None);

        c.run_cycle(&CancellationToken::new()).await;
        let post = &sink.posts()[0];
        assert_eq!(post.title, "Title 0");
        assert_eq!(post.body, "Description 0");
    }

    #[tokio::test]
    async fn rate_limited_service_falls_back_to_original_text() {
        let source = Arc::new(FakeSource::with(entries(3)));
        let sink = Arc::new(FakeSink::default());
        let gen = Arc::new(FakeGenerator::failing(EnrichmentError::Http {
            status: 429,
            message: "Too Many Requests".to_string(),
        }));
        let enricher = Arc::new(EnrichmentClient::new(gen, ContentCache::disabled()));
        let c = controller(source, sink.clone(), Some(enricher.clone()));

        c.run_cycle(&CancellationToken::new()).await;

        assert_eq!(enricher.stats().errors_for_code(429), 3);
        let posts = sink.posts();
        assert_eq!(posts.len(), 3);
        for (post, i) in posts.iter().zip([2, 1, 0]) {
            assert!(post.body.contains(&format!("Description {i}")));
        }
        let snap = c.snapshot();
        assert_eq!(snap.run.posts_enriched, 0);
        assert!(snap.run.last_enrichment_error.is_some());
    }

    #[tokio::test]
    async fn enriched_text_is_published() {
        let source = Arc::new(FakeSource::with(entries(1)));
        let sink = Arc::new(FakeSink::default());
        let gen = Arc::new(FakeGenerator::ok("✨ rewritten"));
        let enricher = Arc::new(EnrichmentClient::new(gen, ContentCache::disabled()));
        let c = controller(source, sink.clone(), Some(enricher));

        c.run_cycle(&CancellationToken::new()).await;
        assert_eq!(sink.posts()[0].body, "✨ rewritten [Title 0]");
        assert_eq!(c.snapshot().run.posts_enriched, 1);
    }

    #[tokio::test]
    async fn failed_publish_is_retried_next_cycle() {
        let source = Arc::new(FakeSource::with(entries(2)));
        let sink = Arc::new(FakeSink::default());
        sink.fail_for("https://news.example/0");
        let c = controller(source, sink.clone(), None);

        let first = c.run_cycle(&CancellationToken::new()).await;
        assert_eq!(first.published, 1);
        assert_eq!(first.failed, 1);
        assert!(!c.is_seen("https://news.example/0"));
        assert_eq!(c.snapshot().run.publish_failures, 1);
        assert_eq!(c.snapshot().run.errors, 1);

        sink.heal();
        let second = c.run_cycle(&CancellationToken::new()).await;
        assert_eq!(second.published, 1);
        assert!(c.is_seen("https://news.example/0"));
        assert_eq!(sink.attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn image_posts_use_caption_ceiling() {
        let mut e = entries(1);
        e[0].raw_description = "x".repeat(900);
        e[0].media = vec![MediaRef::new("https://img.example/a.jpg", Some("image/jpeg"))];
        let source = Arc::new(FakeSource::with(e));
        let sink = Arc::new(FakeSink::default());
        let c = Controller::new(
            fast_settings(),
            PostLimits {
                max_post_length: 2000,
                caption_limit: 200,
            },
            vec!["u".to_string()],
            source,
            sink.clone(),
            None,
            false,
        );

        c.run_cycle(&CancellationToken::new()).await;
        let post = &sink.posts()[0];
        assert_eq!(post.image_url.as_deref(), Some("https://img.example/a.jpg"));
        assert_eq!(post.visible_len(), 200);
    }

    #[tokio::test]
    async fn cancelled_cycle_publishes_nothing() {
        let source = Arc::new(FakeSource::with(entries(5)));
        let sink = Arc::new(FakeSink::default());
        let c = controller(source.clone(), sink.clone(), None);

        let tok = CancellationToken::new();
        tok.cancel();
        let report = c.run_cycle(&tok).await;
        assert_eq!(report, CycleReport::default());
        assert_eq!(source.fetches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn lifecycle_transitions() {
        let source = Arc::new(FakeSource::with(entries(2)));
        let sink = Arc::new(FakeSink::default());
        let c = controller(source, sink.clone(), None);

        assert_eq!(c.state(), RunState::Stopped);
        assert!(!c.stop().await);

        assert!(c.start().await);
        assert!(!c.start().await);
        assert!(c.is_running());

        assert!(c.stop().await);
        assert!(!c.is_running());
        assert!(!c.stop().await);

        assert!(c.restart().await);
        assert_eq!(c.state(), RunState::Running);
        assert!(c.snapshot().run.started_at.is_some());
        assert!(c.stop().await);
    }

    #[tokio::test]
    async fn worker_publishes_on_start() {
        let source = Arc::new(FakeSource::with(entries(2)));
        let sink = Arc::new(FakeSink::default());
        let c = controller(source, sink.clone(), None);

        assert!(c.start().await);
        for _ in 0..100 {
            if sink.posts().len() == 2 {
                break;
            }
            sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(sink.posts().len(), 2);
        assert!(c.snapshot().run.last_check.is_some());
        assert!(c.stop().await);
    }

    #[tokio::test]
    async fn stop_wakes_worker_sleeping_between_cycles() {
        let source = Arc::new(FakeSource::with(entries(1)));
        let sink = Arc::new(FakeSink::default());
        let settings = PollSettings {
            poll_interval: Duration::from_secs(3600),
            stop_timeout: Duration::from_secs(5),
            ..fast_settings()
        };
        let c = Controller::new(
            settings,
            PostLimits::default(),
            vec!["https://news.example/rss".to_string()],
            source,
            sink.clone(),
            None,
            false,
        );

        assert!(c.start().await);
        for _ in 0..100 {
            if sink.posts().len() == 1 {
                break;
            }
            sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(sink.posts().len(), 1);
        // Let the worker reach the between-cycle sleep.
        sleep(Duration::from_millis(50)).await;

        let began = std::time::Instant::now();
        assert!(c.stop().await);
        assert!(
            began.elapsed() < Duration::from_secs(1),
            "stop waited {:?}",
            began.elapsed()
        );
    }

    #[tokio::test]
    async fn panicking_cycle_is_counted_and_loop_survives() {
        let source = Arc::new(FakeSource {
            panic_on_fetch: true,
            ..FakeSource::default()
        });
        let sink = Arc::new(FakeSink::default());
        let c = controller(source.clone(), sink, None);

        assert!(c.start().await);
        for _ in 0..200 {
            if c.snapshot().run.errors >= 2 {
                break;
            }
            sleep(Duration::from_millis(10)).await;
        }
        assert!(c.snapshot().run.errors >= 2);
        assert!(source.fetches.load(Ordering::SeqCst) >= 2);
        assert!(c.is_running());
        assert!(c.stop().await);
    }

    #[tokio::test]
    async fn start_resets_error_counter() {
        let source = Arc::new(FakeSource::with(entries(1)));
        let sink = Arc::new(FakeSink::default());
        sink.fail_for("https://news.example/0");
        let c = controller(source, sink, None);

        c.run_cycle(&CancellationToken::new()).await;
        assert_eq!(c.snapshot().run.errors, 1);

        assert!(c.start().await);
        let snap = c.snapshot();
        assert_eq!(snap.run.errors, 0);
        assert_eq!(snap.run.publish_failures, 1);
        assert!(c.stop().await);
    }

    #[tokio::test]
    async fn enrichment_toggle_requires_client() {
        let source = Arc::new(FakeSource::default());
        let sink = Arc::new(FakeSink::default());
        let c = controller(source.clone(), sink.clone(), None);
        assert!(!c.enrichment_enabled());
        assert!(!c.toggle_enrichment());

        let gen = Arc::new(FakeGenerator::ok("x"));
        let enricher = Arc::new(EnrichmentClient::new(gen, ContentCache::disabled()));
        let c = controller(source, sink, Some(enricher));
        assert!(c.enrichment_enabled());
        assert!(!c.toggle_enrichment());
        assert!(c.toggle_enrichment());
        assert_eq!(c.snapshot().enrichment_model.as_deref(), Some("fake-model"));
    }
}
