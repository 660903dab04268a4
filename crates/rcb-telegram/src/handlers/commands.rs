use std::sync::Arc;

use chrono::{DateTime, Local};
use teloxide::{
    prelude::*,
    types::{BotCommand, KeyboardMarkup, ParseMode},
};
use tracing::{info, warn};

use rcb_core::{
    domain::RunState,
    formatting::escape_html,
    stats::{EnrichmentStats, StatusSnapshot},
};

use crate::router::AppState;

use super::menu;

/// What an owner command or menu button asks for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Action {
    Welcome,
    Status,
    Start,
    Stop,
    Restart,
    Info,
    Settings,
    AiToggle,
    Back,
    Unknown,
}

impl Action {
    pub(crate) fn from_command(cmd: &str) -> Self {
        match cmd {
            "start" | "help" => Action::Welcome,
            "status" | "stats" => Action::Status,
            "start_bot" => Action::Start,
            "stop" | "pause" => Action::Stop,
            "restart" => Action::Restart,
            "info" => Action::Info,
            "settings" => Action::Settings,
            "ai_toggle" => Action::AiToggle,
            _ => Action::Unknown,
        }
    }
}

/// Sidebar command list registered with Telegram at startup.
pub fn bot_commands() -> Vec<BotCommand> {
    [
        ("start", "Welcome and command list"),
        ("help", "Show help"),
        ("status", "Bot status"),
        ("stats", "Statistics"),
        ("start_bot", "Start publishing"),
        ("pause", "Pause publishing"),
        ("stop", "Stop publishing"),
        ("restart", "Restart publishing"),
        ("info", "About this bot"),
        ("settings", "Settings"),
        ("ai_toggle", "Toggle AI generation"),
    ]
    .into_iter()
    .map(|(cmd, desc)| BotCommand::new(cmd, desc))
    .collect()
}

/// Command name from `/cmd@botname args...`, lowercased.
fn parse_command(text: &str) -> String {
    text.split_whitespace()
        .next()
        .unwrap_or("")
        .trim_start_matches('/')
        .split('@')
        .next()
        .unwrap_or("")
        .to_lowercase()
}

fn format_duration(seconds: i64) -> String {
    let seconds = seconds.max(0);
    let hours = seconds / 3600;
    let mins = (seconds % 3600) / 60;
    let secs = seconds % 60;
    if hours > 0 {
        return format!("{hours}h {mins}m");
    }
    if mins > 0 {
        return format!("{mins}m {secs}s");
    }
    format!("{secs}s")
}

fn format_clock(t: Option<DateTime<Local>>) -> String {
    t.map(|t| t.format("%H:%M:%S").to_string())
        .unwrap_or_else(|| "never".to_string())
}

fn enrichment_lines(snap: &StatusSnapshot) -> (String, String) {
    let model = snap.enrichment_model.as_deref().unwrap_or("DeepSeek");
    let status = match (&snap.enrichment, snap.enrichment_enabled) {
        (Some(st), true) => format!(
            "✅ {} (requests: {}, cached: {})",
            escape_html(model),
            st.total_requests,
            st.cache_hits
        ),
        _ => "❌ OFF".to_string(),
    };
    let errors = match &snap.enrichment {
        Some(st) => enrichment_errors(st),
        None => "N/A".to_string(),
    };
    (status, errors)
}

fn enrichment_errors(st: &EnrichmentStats) -> String {
    let mut out = st.errors.to_string();
    if !st.error_codes.is_empty() {
        let codes: Vec<String> = st
            .error_codes
            .iter()
            .map(|(code, n)| format!("{code}×{n}"))
            .collect();
        out.push_str(&format!(" ({})", codes.join(", ")));
    }
    if let Some(last) = &st.last_error {
        let code = last
            .code
            .map(|c| c.to_string())
            .unwrap_or_else(|| "N/A".to_string());
        out.push_str(&format!(
            "\n   Last: [{code}] {} at {}",
            last.kind.label(),
            last.at.format("%H:%M:%S")
        ));
    }
    out
}

/// Owner-facing HTML status report.
pub fn status_report(snap: &StatusSnapshot, now: DateTime<Local>) -> String {
    let Some(started) = snap.run.started_at else {
        return "🔴 Publishing has not been started yet.".to_string();
    };

    let uptime = (now - started).num_seconds();
    let (ai_status, ai_errors) = enrichment_lines(snap);

    let mut lines: Vec<String> = vec![
        "🤖 <b>Bot status</b>".to_string(),
        format!("⏱ Uptime: {}", format_duration(uptime)),
        format!("📊 Posts sent: {}", snap.run.posts_sent),
        format!("🤖 AI generation: {ai_status}"),
        format!("❌ AI errors: {ai_errors}"),
    ];
    if let Some(err) = &snap.run.last_enrichment_error {
        lines.push(format!("🤖 Last AI error: {}", escape_html(err)));
    }
    if let Some(cache) = &snap.cache {
        let state = if cache.enabled { "on" } else { "off" };
        lines.push(format!("💾 Cache: {state} ({} records)", cache.records));
    }
    lines.push(format!(
        "⚠️ Loop errors: {} (publish failures: {})",
        snap.run.errors, snap.run.publish_failures
    ));
    lines.push(format!("🔄 Last check: {}", format_clock(snap.run.last_check)));
    lines.push(format!("📬 Last post: {}", format_clock(snap.run.last_post)));
    lines.push(format!("🔗 Sources: {}", snap.sources));
    lines.push(format!(
        "📝 State: {}",
        match snap.state {
            RunState::Running => "🟢 Running",
            RunState::Stopped => "🔴 Stopped",
        }
    ));
    lines.join("\n")
}

fn welcome_text() -> &'static str {
    "📰 <b>RSS channel bot</b>\n\
Reads RSS feeds, rewrites new entries with AI and publishes them to the channel.\n\n\
<b>📋 Commands:</b>\n\
/start, /help - Show this message\n\
/status, /stats - Bot status and statistics\n\
/start_bot - Start publishing\n\
/pause, /stop - Stop publishing\n\
/restart - Restart publishing\n\
/info - About this bot\n\
/settings - Settings\n\
/ai_toggle - Toggle AI generation"
}

fn info_text(state: &AppState) -> String {
    let sources: Vec<String> = state
        .controller
        .sources()
        .iter()
        .map(|u| format!("• {}", escape_html(u)))
        .collect();
    format!(
        "ℹ️ <b>About</b>\n\
Channel: <code>{}</code>\n\
Check interval: {}\n\
Max post length: {} characters\n\n\
<b>Sources:</b>\n{}",
        escape_html(&state.cfg.channel.to_string()),
        format_duration(state.cfg.poll.poll_interval.as_secs() as i64),
        state.cfg.max_post_length,
        if sources.is_empty() {
            "<i>none configured</i>".to_string()
        } else {
            sources.join("\n")
        }
    )
}

async fn reply(bot: &Bot, chat_id: ChatId, html: &str, keyboard: KeyboardMarkup) {
    if let Err(e) = bot
        .send_message(chat_id, html.to_string())
        .parse_mode(ParseMode::Html)
        .reply_markup(keyboard)
        .await
    {
        warn!("reply to {chat_id} failed: {e}");
    }
}

pub(crate) async fn perform(
    bot: &Bot,
    chat_id: ChatId,
    state: &AppState,
    action: Action,
) -> ResponseResult<()> {
    let ctl = &state.controller;
    let main = || menu::main_menu(ctl.is_running());

    match action {
        Action::Welcome => reply(bot, chat_id, welcome_text(), main()).await,

        Action::Status => {
            let report = status_report(&ctl.snapshot(), Local::now());
            reply(bot, chat_id, &report, main()).await
        }

        Action::Start => {
            let text = if ctl.start().await {
                info!("publishing started by owner");
                "🟢 Publishing started."
            } else {
                "⚠️ Publishing is already running."
            };
            reply(bot, chat_id, text, main()).await
        }

        Action::Stop => {
            let text = if ctl.stop().await {
                info!("publishing stopped by owner");
                "🔴 Publishing stopped."
            } else {
                "⚠️ Publishing is not running."
            };
            reply(bot, chat_id, text, main()).await
        }

        Action::Restart => {
            let text = if ctl.restart().await {
                info!("publishing restarted by owner");
                "🔄 Publishing restarted."
            } else {
                "⚠️ Restart failed."
            };
            reply(bot, chat_id, text, main()).await
        }

        Action::Info => reply(bot, chat_id, &info_text(state), main()).await,

        Action::Settings => {
            reply(
                bot,
                chat_id,
                "⚙️ <b>Settings</b>\nChoose an option:",
                menu::settings_menu(),
            )
            .await
        }

        Action::AiToggle => {
            let wanted = !ctl.enrichment_enabled();
            let now_on = ctl.toggle_enrichment();
            let text = match (wanted, now_on) {
                (_, true) => "🤖 AI generation enabled.",
                (true, false) => "⚠️ AI generation is unavailable: no API key configured.",
                (false, false) => "📝 AI generation disabled. Posts use the original text.",
            };
            info!("AI generation toggled: {}", if now_on { "on" } else { "off" });
            reply(bot, chat_id, text, menu::settings_menu()).await
        }

        Action::Back => reply(bot, chat_id, "⬅️ Back to main menu", main()).await,

        Action::Unknown => {
            reply(
                bot,
                chat_id,
                "🤷 Unknown command. Use the menu or /help.",
                main(),
            )
            .await
        }
    }
    Ok(())
}

pub async fn handle_command(bot: Bot, msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let Some(text) = msg.text() else {
        return Ok(());
    };
    let cmd = parse_command(text);
    perform(&bot, msg.chat.id, &state, Action::from_command(&cmd)).await
}
