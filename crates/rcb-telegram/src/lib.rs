//! Telegram adapter (teloxide).
//!
//! This crate implements the `rcb-core` PublishSink over the Telegram Bot API
//! and hosts the owner command interface.

use std::time::Duration;

use async_trait::async_trait;

use teloxide::{
    prelude::*,
    types::{ChatAction, InputFile, ParseMode, Recipient},
};

use tokio::time::sleep;
use tracing::{debug, warn};

pub mod handlers;
pub mod router;

use rcb_core::{
    domain::ChannelRef,
    errors::Error,
    publish::{Post, PublishSink},
    Result,
};

#[derive(Clone)]
pub struct TelegramPublisher {
    bot: Bot,
    channel: ChannelRef,
}

impl TelegramPublisher {
    pub fn new(bot: Bot, channel: ChannelRef) -> Self {
        Self { bot, channel }
    }

    pub fn bot(&self) -> Bot {
        self.bot.clone()
    }

    pub fn channel(&self) -> &ChannelRef {
        &self.channel
    }

    fn recipient(&self) -> Recipient {
        tg_recipient(&self.channel)
    }

    fn map_err(e: teloxide::RequestError) -> Error {
        Error::Publish(format!("telegram error: {e}"))
    }

    async fn with_retry<T, Fut>(&self, mut op: impl FnMut() -> Fut) -> Result<T>
    where
        Fut: std::future::IntoFuture<Output = std::result::Result<T, teloxide::RequestError>>,
        Fut::IntoFuture: Send,
    {
        const MAX_RETRIES: usize = 1;
        let mut attempts = 0usize;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(e) => match retry_delay(&e) {
                    Some(d) if attempts < MAX_RETRIES => {
                        attempts += 1;
                        warn!("telegram flood control, retrying in {}s", d.as_secs());
                        sleep(d).await;
                        continue;
                    }
                    _ => return Err(Self::map_err(e)),
                },
            }
        }
    }

    /// Channel access check: a "typing" action the bot may only send when it
    /// can post there.
    pub async fn check_channel(&self) -> Result<()> {
        self.with_retry(|| {
            self.bot
                .send_chat_action(self.recipient(), ChatAction::Typing)
        })
        .await?;
        Ok(())
    }

    async fn send_text(&self, html: &str) -> Result<()> {
        self.with_retry(|| {
            self.bot
                .send_message(self.recipient(), html.to_string())
                .parse_mode(ParseMode::Html)
        })
        .await?;
        Ok(())
    }

    async fn send_photo(&self, image: url::Url, caption: &str) -> Result<()> {
        self.with_retry(|| {
            self.bot
                .send_photo(self.recipient(), InputFile::url(image.clone()))
                .caption(caption.to_string())
                .parse_mode(ParseMode::Html)
        })
        .await?;
        Ok(())
    }
}

/// Flood-control wait requested by Telegram, if this is a 429.
fn retry_delay(e: &teloxide::RequestError) -> Option<Duration> {
    match e {
        teloxide::RequestError::RetryAfter(d) => Some(*d),
        _ => None,
    }
}

pub fn tg_recipient(channel: &ChannelRef) -> Recipient {
    match channel {
        ChannelRef::Id(id) => Recipient::Id(ChatId(*id)),
        ChannelRef::Username(name) => Recipient::ChannelUsername(name.clone()),
    }
}

/// Absolute http(s) image URL, or `None` when the post should go out as text.
fn image_url(raw: Option<&str>) -> Option<url::Url> {
    let raw = raw?.trim();
    let parsed = url::Url::parse(raw).ok()?;
    match parsed.scheme() {
        "http" | "https" => Some(parsed),
        _ => None,
    }
}

#[async_trait]
impl PublishSink for TelegramPublisher {
    async fn publish(&self, post: &Post) -> Result<()> {
        let html = post.html();
        match image_url(post.image_url.as_deref()) {
            Some(image) => {
                debug!("sending photo post {}", post.link);
                self.send_photo(image, &html).await
            }
            None => {
                if let Some(raw) = &post.image_url {
                    warn!("unusable image url {raw:?}, sending text post");
                }
                self.send_text(&html).await
            }
        }
    }
}
