//! Telegram adapter (teloxide).
//!
//! This crate implements the `bcast-core` DeliveryChannel over the Telegram Bot
//! API and hosts the operator-facing bot (commands that start broadcasts).

use async_trait::async_trait;

use teloxide::{
    prelude::*,
    types::{InputFile, ParseMode},
    ApiError, RequestError,
};

pub mod handlers;
pub mod router;

use bcast_core::{
    broadcast::MediaRef,
    domain::{ChatId, MediaHandle},
    ports::{DeliveryChannel, DeliveryError, DeliveryResult},
};

#[derive(Clone)]
pub struct TelegramDelivery {
    bot: Bot,
}

impl TelegramDelivery {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }

    fn tg_chat(chat_id: ChatId) -> teloxide::types::ChatId {
        teloxide::types::ChatId(chat_id.0)
    }

    fn input_file(image: &MediaRef) -> InputFile {
        match image {
            MediaRef::Handle(handle) => InputFile::file_id(handle.as_str().to_string()),
            MediaRef::Upload { bytes, file_name } => {
                InputFile::memory(bytes.clone()).file_name(file_name.clone())
            }
        }
    }

    /// Handle of the largest photo size, only when we uploaded new bytes.
    fn uploaded_handle(image: &MediaRef, msg: &Message) -> Option<MediaHandle> {
        if !image.is_upload() {
            return None;
        }
        msg.photo()
            .and_then(|sizes| sizes.last())
            .map(|p| MediaHandle(p.file.id.clone()))
    }
}

/// Classify a Telegram error for the broadcast engine.
pub fn classify_error(e: RequestError) -> DeliveryError {
    match e {
        RequestError::RetryAfter(d) => DeliveryError::RetryAfter(d),
        RequestError::Api(api) => classify_api_error(api),
        other => DeliveryError::Other(format!("telegram error: {other}")),
    }
}

fn classify_api_error(api: ApiError) -> DeliveryError {
    match api {
        ApiError::BotBlocked
        | ApiError::UserDeactivated
        | ApiError::CantInitiateConversation
        | ApiError::ChatNotFound => DeliveryError::Unreachable(api.to_string()),
        ApiError::Unknown(msg) if msg.starts_with("Forbidden") => DeliveryError::Unreachable(msg),
        other => DeliveryError::Other(format!("telegram api error: {other}")),
    }
}

#[async_trait]
impl DeliveryChannel for TelegramDelivery {
    async fn send_text(&self, chat_id: ChatId, text: &str) -> DeliveryResult<()> {
        self.bot
            .send_message(Self::tg_chat(chat_id), text.to_string())
            .parse_mode(ParseMode::Html)
            .await
            .map_err(classify_error)?;
        Ok(())
    }

    async fn send_image(
        &self,
        chat_id: ChatId,
        image: &MediaRef,
    ) -> DeliveryResult<Option<MediaHandle>> {
        let msg = self
            .bot
            .send_photo(Self::tg_chat(chat_id), Self::input_file(image))
            .await
            .map_err(classify_error)?;
        Ok(Self::uploaded_handle(image, &msg))
    }

    async fn send_image_with_caption(
        &self,
        chat_id: ChatId,
        image: &MediaRef,
        caption: &str,
    ) -> DeliveryResult<Option<MediaHandle>> {
        let msg = self
            .bot
            .send_photo(Self::tg_chat(chat_id), Self::input_file(image))
            .caption(caption.to_string())
            .parse_mode(ParseMode::Html)
            .await
            .map_err(classify_error)?;
        Ok(Self::uploaded_handle(image, &msg))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocked_and_missing_chats_are_unreachable() {
        for api in [
            ApiError::BotBlocked,
            ApiError::UserDeactivated,
            ApiError::CantInitiateConversation,
            ApiError::ChatNotFound,
        ] {
            assert!(matches!(
                classify_error(RequestError::Api(api)),
                DeliveryError::Unreachable(_)
            ));
        }

        assert!(matches!(
            classify_error(RequestError::Api(ApiError::Unknown(
                "Forbidden: bot was kicked from the group chat".to_string()
            ))),
            DeliveryError::Unreachable(_)
        ));
    }

    #[test]
    fn retry_after_keeps_the_advised_delay() {
        assert_eq!(
            classify_error(RequestError::RetryAfter(std::time::Duration::from_secs(3))),
            DeliveryError::RetryAfter(std::time::Duration::from_secs(3))
        );
    }

    #[test]
    fn other_api_errors_are_not_permanent() {
        assert!(matches!(
            classify_error(RequestError::Api(ApiError::MessageTextIsEmpty)),
            DeliveryError::Other(_)
        ));
    }
}
