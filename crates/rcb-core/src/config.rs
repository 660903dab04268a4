use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{domain::ChannelRef, errors::Error, Result};

pub const DEFAULT_DEEPSEEK_URL: &str = "https://api.deepseek.com/v1/chat/completions";
pub const DEFAULT_DEEPSEEK_MODEL: &str = "deepseek-chat";

/// Typed configuration for the bot, sourced from the environment (and `.env`).
#[derive(Clone, Debug)]
pub struct Config {
    // Telegram
    pub telegram_token: String,
    pub channel: ChannelRef,
    pub owner_id: i64,

    // Feeds + loop
    pub rss_urls: Vec<String>,
    pub poll: PollSettings,
    pub feed_timeout: Duration,

    // Enrichment
    pub enrichment: EnrichmentSettings,

    // Cache
    pub cache_enabled: bool,
    pub cache_dir: PathBuf,

    // Telegram limits
    pub max_post_length: usize,
    pub caption_limit: usize,

    // Logging
    pub log: LogSettings,
}

/// Poll loop timings and limits.
#[derive(Clone, Copy, Debug)]
pub struct PollSettings {
    /// Pause between full cycles.
    pub poll_interval: Duration,
    /// How many of the newest entries of each source are considered per cycle.
    pub entries_per_source: usize,
    /// Courtesy pause after each published post.
    pub post_delay: Duration,
    /// Sleep after a failed cycle before retrying.
    pub error_backoff: Duration,
    /// How long `stop()` waits for the worker to exit.
    pub stop_timeout: Duration,
    /// Pause between stop and start on `restart()`.
    pub restart_pause: Duration,
    /// Description length bound (characters, before the ellipsis).
    pub description_limit: usize,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(300),
            entries_per_source: 10,
            post_delay: Duration::from_millis(1500),
            error_backoff: Duration::from_secs(30),
            stop_timeout: Duration::from_secs(5),
            restart_pause: Duration::from_secs(1),
            description_limit: 1000,
        }
    }
}

#[derive(Clone, Debug)]
pub struct EnrichmentSettings {
    /// Enrichment switched on at startup (can be toggled at runtime).
    pub enabled: bool,
    pub api_key: Option<String>,
    pub model: String,
    pub api_url: String,
    pub timeout: Duration,
}

#[derive(Clone, Debug)]
pub struct LogSettings {
    pub file: PathBuf,
    pub max_bytes: u64,
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));

        // Required env vars
        let telegram_token = env_str("TELEGRAM_TOKEN")
            .or_else(|| env_str("TELEGRAM_BOT_TOKEN"))
            .unwrap_or_default();
        if telegram_token.trim().is_empty() {
            return Err(Error::Config(
                "TELEGRAM_TOKEN environment variable is required".to_string(),
            ));
        }

        let channel = env_str("CHANNEL_ID")
            .and_then(|s| ChannelRef::parse(&s))
            .ok_or_else(|| {
                Error::Config("CHANNEL_ID environment variable is required".to_string())
            })?;

        let owner_id = env_str("OWNER_ID")
            .and_then(|s| s.trim().parse::<i64>().ok())
            .ok_or_else(|| {
                Error::Config("OWNER_ID must be set to a numeric Telegram user id".to_string())
            })?;

        let rss_urls = parse_csv(env_str("RSS_URLS"));

        let poll = PollSettings {
            poll_interval: Duration::from_secs(env_u64("CHECK_INTERVAL").unwrap_or(300)),
            entries_per_source: env_usize("ENTRIES_PER_SOURCE").unwrap_or(10).max(1),
            ..PollSettings::default()
        };
        let feed_timeout = Duration::from_secs(env_u64("FEED_TIMEOUT").unwrap_or(30));

        let enrichment = EnrichmentSettings {
            enabled: env_bool("USE_AI_GENERATION").unwrap_or(true),
            api_key: env_str("DEEPSEEK_API_KEY").and_then(non_empty),
            model: env_str("DEEPSEEK_MODEL")
                .and_then(non_empty)
                .unwrap_or_else(|| DEFAULT_DEEPSEEK_MODEL.to_string()),
            api_url: env_str("DEEPSEEK_API_URL")
                .and_then(non_empty)
                .unwrap_or_else(|| DEFAULT_DEEPSEEK_URL.to_string()),
            timeout: Duration::from_secs(30),
        };

        let cache_enabled = env_bool("CACHE_ENABLED").unwrap_or(true);
        let cache_dir = env_path("CACHE_DIR").unwrap_or_else(|| PathBuf::from("cache"));

        let max_post_length = env_usize("MAX_POST_LENGTH").unwrap_or(2000);
        let caption_limit = env_usize("CAPTION_LIMIT").unwrap_or(1024);
        if max_post_length < 16 || caption_limit < 16 {
            return Err(Error::Config(
                "MAX_POST_LENGTH and CAPTION_LIMIT must be at least 16".to_string(),
            ));
        }

        let log = LogSettings {
            file: env_path("LOG_FILE").unwrap_or_else(|| PathBuf::from("rss_bot.log")),
            max_bytes: env_u64("LOG_MAX_BYTES").unwrap_or(10 * 1024 * 1024),
        };

        Ok(Self {
            telegram_token,
            channel,
            owner_id,
            rss_urls,
            poll,
            feed_timeout,
            enrichment,
            cache_enabled,
            cache_dir,
            max_post_length,
            caption_limit,
            log,
        })
    }
}

fn env_str(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };
    apply_dotenv(&contents);
}

fn apply_dotenv(contents: &str) {
    for (key, val) in parse_dotenv(contents) {
        if env::var_os(&key).is_some() {
            continue; // do not override existing env
        }
        env::set_var(key, val);
    }
}

fn parse_dotenv(contents: &str) -> Vec<(String, String)> {
    let mut out = Vec::new();
    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() {
            continue;
        }

        let mut val = v.trim().to_string();
        // Strip optional surrounding quotes.
        if val.len() >= 2
            && ((val.starts_with('"') && val.ends_with('"'))
                || (val.starts_with('\'') && val.ends_with('\'')))
        {
            val = val[1..val.len() - 1].to_string();
        }

        out.push((key.to_string(), val));
    }
    out
}

fn env_bool(key: &str) -> Option<bool> {
    env_str(key).map(|s| parse_bool(&s))
}

fn parse_bool(s: &str) -> bool {
    matches!(
        s.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn env_u64(key: &str) -> Option<u64> {
    env_str(key).and_then(|s| s.trim().parse::<u64>().ok())
}

fn env_usize(key: &str) -> Option<usize> {
    env_str(key).and_then(|s| s.trim().parse::<usize>().ok())
}

fn env_path(key: &str) -> Option<PathBuf> {
    env::var_os(key)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

fn parse_csv(v: Option<String>) -> Vec<String> {
    v.unwrap_or_default()
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}
