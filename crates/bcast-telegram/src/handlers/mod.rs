//! Telegram update handlers for operators.
//!
//! Each handler is a small adapter that:
//! - checks the sender is an operator (everyone else is ignored)
//! - turns the message into broadcast input (text, photo handle, image bytes)
//! - calls into the `bcast-core` broadcast service and replies with the outcome

use std::sync::Arc;

use teloxide::{prelude::*, types::Message};

use bcast_core::domain::UserId;
use bcast_core::security::is_authorized;

use crate::router::AppState;

mod commands;
mod media;

pub async fn handle_message(bot: Bot, msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let user_id = msg.from().map(|u| UserId(u.id.0 as i64));

    // Subscribers talk to the same bot; only operators get answers here.
    if !is_authorized(user_id, &state.cfg.telegram_allowed_users) {
        return Ok(());
    }

    if let Some(text) = msg.text() {
        if text.starts_with('/') {
            return commands::handle_command(bot, msg, state).await;
        }
    }

    if msg.photo().is_some() {
        return media::handle_photo(bot, msg, state).await;
    }

    if msg.document().is_some() {
        return media::handle_document(bot, msg, state).await;
    }

    let _ = bot
        .send_message(
            msg.chat.id,
            "Send /broadcast <text>, or an image with a /broadcast caption. /help lists all commands.",
        )
        .await;

    Ok(())
}
