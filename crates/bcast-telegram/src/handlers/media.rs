use std::sync::Arc;

use teloxide::{net::Download, prelude::*, types::Document};

use bcast_core::{broadcast::MediaRef, domain::MediaHandle};

use crate::router::AppState;

use super::commands::{parse_command, reply_html, start_and_reply};

/// Telegram rejects photos above 10 MB.
const MAX_IMAGE_BYTES: u64 = 10 * 1024 * 1024;

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp"];

/// Broadcast text from a `/broadcast [text]` caption; `None` if the caption is not that command.
fn broadcast_caption(caption: Option<&str>) -> Option<String> {
    let caption = caption?.trim();
    if !caption.starts_with('/') {
        return None;
    }
    let (cmd, rest) = parse_command(caption);
    (cmd == "broadcast").then_some(rest)
}

fn is_image_document(file_name: Option<&str>, mime: Option<&str>) -> bool {
    if let Some(m) = mime {
        if m.starts_with("image/") {
            return true;
        }
    }
    let Some(name) = file_name else {
        return false;
    };
    let lower = name.to_lowercase();
    IMAGE_EXTENSIONS
        .iter()
        .any(|ext| lower.ends_with(&format!(".{ext}")))
}

async fn caption_hint(bot: &Bot, chat_id: teloxide::types::ChatId) {
    reply_html(
        bot,
        chat_id,
        "Add the caption <code>/broadcast [text]</code> to send this image to all subscribers.",
    )
    .await;
}

/// Photo already stored by Telegram: its file id is a reusable handle, nothing to upload.
pub async fn handle_photo(bot: Bot, msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let Some(photos) = msg.photo() else {
        return Ok(());
    };
    let chat_id = msg.chat.id;

    let Some(text) = broadcast_caption(msg.caption()) else {
        caption_hint(&bot, chat_id).await;
        return Ok(());
    };
    let Some(best) = photos.last() else {
        return Ok(());
    };

    let media = MediaRef::Handle(MediaHandle(best.file.id.clone()));
    start_and_reply(&bot, chat_id, &state, Some(text), Some(media)).await;
    Ok(())
}

async fn download_image(bot: &Bot, doc: &Document) -> anyhow::Result<Vec<u8>> {
    let file = bot.get_file(doc.file.id.clone()).await?;
    let mut buf: Vec<u8> = Vec::with_capacity(file.size as usize);
    bot.download_file(&file.path, &mut buf).await?;
    Ok(buf)
}

/// Image sent as a file: the bytes are uploaded as a photo on the first delivery.
pub async fn handle_document(bot: Bot, msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let Some(doc) = msg.document() else {
        return Ok(());
    };
    let chat_id = msg.chat.id;

    let Some(text) = broadcast_caption(msg.caption()) else {
        caption_hint(&bot, chat_id).await;
        return Ok(());
    };

    let mime = doc.mime_type.as_ref().map(|m| m.essence_str().to_string());
    if !is_image_document(doc.file_name.as_deref(), mime.as_deref()) {
        reply_html(&bot, chat_id, "❌ Only images (jpg, png, webp) can be broadcast").await;
        return Ok(());
    }
    if u64::from(doc.file.size) > MAX_IMAGE_BYTES {
        reply_html(&bot, chat_id, "❌ Image is too large (max 10 MB)").await;
        return Ok(());
    }

    let bytes = match download_image(&bot, doc).await {
        Ok(b) => b,
        Err(e) => {
            let reason: String = e.to_string().chars().take(100).collect();
            reply_html(
                &bot,
                chat_id,
                &format!("❌ Failed to download image: {}", bcast_core::formatting::escape_html(&reason)),
            )
            .await;
            return Ok(());
        }
    };

    let media = MediaRef::upload(bytes, doc.file_name.clone());
    start_and_reply(&bot, chat_id, &state, Some(text), Some(media)).await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_broadcast_captions_start_broadcasts() {
        assert_eq!(broadcast_caption(Some("/broadcast Hi all")), Some("Hi all".into()));
        assert_eq!(broadcast_caption(Some(" /broadcast ")), Some(String::new()));
        assert_eq!(broadcast_caption(Some("/stats")), None);
        assert_eq!(broadcast_caption(Some("just a photo")), None);
        assert_eq!(broadcast_caption(None), None);
    }

    #[test]
    fn recognizes_images_by_mime_or_extension() {
        assert!(is_image_document(None, Some("image/png")));
        assert!(is_image_document(Some("Banner.JPG"), None));
        assert!(is_image_document(Some("a.webp"), Some("application/octet-stream")));
        assert!(!is_image_document(Some("notes.pdf"), Some("application/pdf")));
        assert!(!is_image_document(None, None));
    }
}
