use std::sync::Arc;

use teloxide::Bot;

use rcb_core::{
    cache::ContentCache,
    config::Config,
    controller::{Controller, PostLimits},
    enrich::EnrichmentClient,
};
use rcb_deepseek::DeepSeekClient;
use rcb_feed::HttpFeedSource;
use rcb_telegram::TelegramPublisher;

#[tokio::main]
async fn main() -> Result<(), rcb_core::Error> {
    let cfg = Arc::new(Config::load()?);
    let _log_guard = rcb_core::logging::init("rcb", &cfg.log)?;
    tracing::info!("===== bot starting =====");

    let enricher = match DeepSeekClient::from_settings(&cfg.enrichment)? {
        Some(client) => {
            let cache = if cfg.cache_enabled {
                ContentCache::new(cfg.cache_dir.clone(), true)
            } else {
                ContentCache::disabled()
            };
            Some(Arc::new(EnrichmentClient::new(Arc::new(client), cache)))
        }
        None => {
            if cfg.enrichment.enabled {
                tracing::warn!("DEEPSEEK_API_KEY not set, AI generation disabled");
            }
            None
        }
    };

    let feed = Arc::new(HttpFeedSource::new(cfg.feed_timeout)?);
    let publisher = TelegramPublisher::new(Bot::new(cfg.telegram_token.clone()), cfg.channel.clone());

    let controller = Controller::new(
        cfg.poll,
        PostLimits {
            max_post_length: cfg.max_post_length,
            caption_limit: cfg.caption_limit,
        },
        cfg.rss_urls.clone(),
        feed.clone(),
        Arc::new(publisher.clone()),
        enricher,
        cfg.enrichment.enabled,
    );

    rcb_telegram::router::run_polling(cfg, controller, publisher, feed)
        .await
        .map_err(|e| rcb_core::Error::External(format!("telegram bot failed: {e}")))?;

    Ok(())
}
