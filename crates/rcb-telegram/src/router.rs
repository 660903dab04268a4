use std::sync::Arc;

use chrono::Local;
use teloxide::{dispatching::Dispatcher, dptree, prelude::*, types::ParseMode};
use tracing::{error, info, warn};

use rcb_core::{
    config::Config, controller::Controller, feed::FeedSource, formatting::escape_html,
};

use crate::handlers::{self, commands, menu};
use crate::TelegramPublisher;

#[derive(Clone)]
pub struct AppState {
    pub cfg: Arc<Config>,
    pub controller: Controller,
}

/// Startup checks, auto-start, then long polling for owner commands.
///
/// Returns an error only when the bot identity or channel access check fails.
pub async fn run_polling(
    cfg: Arc<Config>,
    controller: Controller,
    publisher: TelegramPublisher,
    feed: Arc<dyn FeedSource>,
) -> anyhow::Result<()> {
    let bot = publisher.bot();
    let owner = ChatId(cfg.owner_id);

    if let Err(e) = initial_check(&bot, &publisher).await {
        error!("startup check failed: {e}");
        notify_owner(
            &bot,
            owner,
            &format!("⚠️ Startup error: {}", escape_html(&e.to_string())),
        )
        .await;
        return Err(e);
    }

    if let Err(e) = bot.set_my_commands(commands::bot_commands()).await {
        warn!("set_my_commands failed: {e}");
    }

    check_feeds(feed.as_ref(), controller.sources()).await;
    check_enrichment(&bot, owner, &controller).await;

    controller.start().await;
    info!("ready for commands");

    let report = commands::status_report(&controller.snapshot(), Local::now());
    if let Err(e) = bot
        .send_message(owner, format!("🤖 Bot started!\n{report}"))
        .parse_mode(ParseMode::Html)
        .reply_markup(menu::main_menu(controller.is_running()))
        .await
    {
        warn!("startup status to owner failed: {e}");
    }

    let state = Arc::new(AppState {
        cfg: cfg.clone(),
        controller: controller.clone(),
    });

    let handler = dptree::entry().branch(Update::filter_message().endpoint(handlers::handle_message));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .build()
        .dispatch()
        .await;

    controller.stop().await;
    Ok(())
}

async fn initial_check(bot: &Bot, publisher: &TelegramPublisher) -> anyhow::Result<()> {
    let me = bot.get_me().await?;
    info!("bot started: @{}", me.username());

    publisher.check_channel().await?;
    info!("channel access OK: {}", publisher.channel());
    Ok(())
}

async fn check_feeds(feed: &dyn FeedSource, sources: &[String]) {
    if sources.is_empty() {
        warn!("no feed sources configured");
    }
    for url in sources {
        let entries = feed.fetch(url).await;
        let status = if entries.is_empty() { "EMPTY" } else { "OK" };
        info!("feed check: {url} - {status} ({} entries)", entries.len());
    }
}

async fn check_enrichment(bot: &Bot, owner: ChatId, controller: &Controller) {
    if !controller.enrichment_enabled() {
        return;
    }
    let Some(client) = controller.enricher() else {
        return;
    };
    let text = match client.probe().await {
        Ok(sample) => {
            let preview: String = sample.chars().take(50).collect();
            info!("AI connection test passed: {preview}...");
            "✅ AI connection test successful!".to_string()
        }
        Err(e) => {
            error!("AI connection test failed: {e}");
            format!("⚠️ AI connection test failed: {}", escape_html(&e.to_string()))
        }
    };
    notify_owner(bot, owner, &text).await;
}

async fn notify_owner(bot: &Bot, owner: ChatId, html: &str) {
    if let Err(e) = bot
        .send_message(owner, html.to_string())
        .parse_mode(ParseMode::Html)
        .await
    {
        warn!("owner notification failed: {e}");
    }
}
