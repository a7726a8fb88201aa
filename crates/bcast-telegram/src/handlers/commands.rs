use std::sync::Arc;

use teloxide::{prelude::*, types::ParseMode};
use tracing::{error, info};

use bcast_core::{
    broadcast::MediaRef,
    domain::BroadcastId,
    formatting::{escape_html, format_broadcast_line},
    Error,
};

use crate::router::AppState;

/// Split `/cmd@botname args` into lowercase `cmd` and the trimmed rest.
pub(super) fn parse_command(text: &str) -> (String, String) {
    let mut parts = text.trim().splitn(2, char::is_whitespace);
    let first = parts.next().unwrap_or("").trim();
    let rest = parts.next().unwrap_or("").trim().to_string();

    let cmd = first
        .trim_start_matches('/')
        .split('@')
        .next()
        .unwrap_or("")
        .to_lowercase();

    (cmd, rest)
}

pub(super) async fn reply_html(bot: &Bot, chat_id: teloxide::types::ChatId, html: &str) {
    if let Err(e) = bot
        .send_message(chat_id, html.to_string())
        .parse_mode(ParseMode::Html)
        .await
    {
        error!("Failed to reply to operator: {e}");
    }
}

fn start_reply(result: &bcast_core::Result<BroadcastId>) -> String {
    match result {
        Ok(id) => format!("📣 Broadcast <b>#{id}</b> started"),
        Err(Error::InvalidPayload(reason)) => format!("❌ {}", escape_html(reason)),
        Err(Error::NotFound(id)) => format!("❌ Broadcast #{id} not found"),
        Err(e) => format!(
            "❌ Failed to start broadcast: {}",
            escape_html(&e.to_string())
        ),
    }
}

/// Start a broadcast and tell the operator its id (or why it was rejected).
pub(super) async fn start_and_reply(
    bot: &Bot,
    chat_id: teloxide::types::ChatId,
    state: &AppState,
    text: Option<String>,
    media: Option<MediaRef>,
) {
    let result = state.broadcasts.start_broadcast(text, media).await;
    if let Ok(id) = &result {
        info!("Operator in chat {} started broadcast {id}", chat_id.0);
    }
    reply_html(bot, chat_id, &start_reply(&result)).await;
}

fn help_html() -> String {
    "📣 <b>Broadcast bot</b>\n\n\
<b>Commands:</b>\n\
/broadcast &lt;text&gt; - Send text to all subscribers\n\
/broadcasts - Recent broadcasts with delivery counters\n\
/resend &lt;id&gt; - Send a past broadcast again\n\
/stats - Subscriber counts\n\
/help - Show this message\n\n\
<b>Images:</b>\n\
Send a photo, or an image file, with the caption <code>/broadcast [text]</code>."
        .to_string()
}

pub async fn handle_command(bot: Bot, msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let Some(text) = msg.text() else {
        return Ok(());
    };
    let chat_id = msg.chat.id;

    let (cmd, arg) = parse_command(text);

    match cmd.as_str() {
        "start" | "help" => {
            reply_html(&bot, chat_id, &help_html()).await;
            Ok(())
        }

        "broadcast" => {
            start_and_reply(&bot, chat_id, &state, Some(arg), None).await;
            Ok(())
        }

        "broadcasts" => {
            let html = match state.broadcasts.recent(state.cfg.history_limit).await {
                Ok(records) if records.is_empty() => "No broadcasts yet".to_string(),
                Ok(records) => {
                    let mut lines = vec![format!("📋 <b>Recent broadcasts ({})</b>", records.len())];
                    lines.extend(records.iter().map(format_broadcast_line));
                    lines.join("\n")
                }
                Err(e) => format!(
                    "❌ Failed to load broadcasts: {}",
                    escape_html(&e.to_string())
                ),
            };
            reply_html(&bot, chat_id, &html).await;
            Ok(())
        }

        "resend" => {
            let Some(id) = parse_broadcast_id(&arg) else {
                reply_html(&bot, chat_id, "Usage: /resend &lt;id&gt;").await;
                return Ok(());
            };
            let result = state.broadcasts.resend(id).await;
            reply_html(&bot, chat_id, &start_reply(&result)).await;
            Ok(())
        }

        "stats" => {
            let account = state.account();
            let total = state.store.count_recipients(account).await;
            let blocked = state.store.count_blocked(account).await;
            let html = format!(
                "👥 <b>Subscribers</b>\n\nTotal: {total}\nActive: {}\nBlocked: {blocked}",
                total.saturating_sub(blocked)
            );
            reply_html(&bot, chat_id, &html).await;
            Ok(())
        }

        _ => {
            let html = format!("Unknown command: /{}", escape_html(&cmd));
            reply_html(&bot, chat_id, &html).await;
            Ok(())
        }
    }
}

fn parse_broadcast_id(arg: &str) -> Option<BroadcastId> {
    arg.trim()
        .trim_start_matches('#')
        .parse::<u64>()
        .ok()
        .map(BroadcastId)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_command_with_bot_suffix() {
        assert_eq!(
            parse_command("/Broadcast@my_bot  Hello\nworld "),
            ("broadcast".to_string(), "Hello\nworld".to_string())
        );
        assert_eq!(parse_command("/stats"), ("stats".to_string(), String::new()));
    }

    #[test]
    fn parses_resend_ids() {
        assert_eq!(parse_broadcast_id("12"), Some(BroadcastId(12)));
        assert_eq!(parse_broadcast_id(" #7 "), Some(BroadcastId(7)));
        assert_eq!(parse_broadcast_id("x"), None);
        assert_eq!(parse_broadcast_id(""), None);
    }

    #[test]
    fn start_reply_distinguishes_operator_mistakes() {
        assert_eq!(
            start_reply(&Ok(BroadcastId(4))),
            "📣 Broadcast <b>#4</b> started"
        );
        assert_eq!(
            start_reply(&Err(Error::InvalidPayload("needs <text>".into()))),
            "❌ needs &lt;text&gt;"
        );
        assert!(start_reply(&Err(Error::Store("disk full".into())))
            .starts_with("❌ Failed to start broadcast"));
    }
}
