//! Telegram update handlers.
//!
//! Only the configured owner is served; updates from anyone else are dropped
//! without a reply. Slash commands and reply-keyboard buttons resolve to the
//! same actions.

use std::sync::Arc;

use teloxide::{prelude::*, types::Message};
use tracing::debug;

use rcb_core::domain::UserId;

use crate::router::AppState;

pub mod commands;
pub mod menu;

fn is_owner(user: Option<UserId>, owner_id: i64) -> bool {
    user.map(|u| u.0 == owner_id).unwrap_or(false)
}

pub async fn handle_message(bot: Bot, msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let user_id = msg.from().map(|u| UserId(u.id.0 as i64));
    if !is_owner(user_id, state.cfg.owner_id) {
        debug!("ignoring update from non-owner {:?}", user_id);
        return Ok(());
    }

    let Some(text) = msg.text() else {
        return Ok(());
    };

    if text.starts_with('/') {
        return commands::handle_command(bot, msg, state).await;
    }

    let action = menu::action_for_label(text);
    commands::perform(&bot, msg.chat.id, &state, action).await
}
