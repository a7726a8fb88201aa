//! Hexagonal ports the broadcast engine depends on.
//!
//! Telegram implements [`DeliveryChannel`]; the JSON file store implements the
//! three persistence ports. Tests provide in-memory fakes.

use std::time::Duration;

use async_trait::async_trait;

use crate::{
    broadcast::MediaRef,
    domain::{BroadcastId, BroadcastRecord, ChatId, MediaHandle, PayloadKind, Recipient},
    Result,
};

/// Source of recipients. The engine only reads snapshots and flips `blocked`.
#[async_trait]
pub trait RecipientStore: Send + Sync {
    /// Current non-blocked recipients; `None` means every account.
    async fn active_recipients(&self, account: Option<&str>) -> Result<Vec<Recipient>>;

    /// Mark a recipient permanently unreachable. Idempotent.
    async fn mark_blocked(&self, recipient: &Recipient) -> Result<()>;
}

/// Broadcast history records.
#[async_trait]
pub trait BroadcastStore: Send + Sync {
    async fn create_broadcast(
        &self,
        kind: PayloadKind,
        text: Option<String>,
        media_handle: Option<MediaHandle>,
    ) -> Result<BroadcastRecord>;

    async fn persist_media_handle(&self, id: BroadcastId, handle: &MediaHandle) -> Result<()>;

    async fn persist_counters(&self, id: BroadcastId, sent: u64, failed: u64) -> Result<()>;

    async fn get_broadcast(&self, id: BroadcastId) -> Result<Option<BroadcastRecord>>;

    /// Newest first.
    async fn recent_broadcasts(&self, limit: usize) -> Result<Vec<BroadcastRecord>>;
}

/// Handles of uploaded images keyed by content digest, shared across runs.
#[async_trait]
pub trait MediaCache: Send + Sync {
    async fn cached_handle(&self, digest: &str) -> Result<Option<MediaHandle>>;

    async fn remember_handle(&self, digest: &str, handle: &MediaHandle) -> Result<()>;
}

/// Classified outcome of a failed provider call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    /// Provider throttling: nothing may be sent until the delay elapses.
    #[error("retry after {0:?}")]
    RetryAfter(Duration),

    /// The recipient can never be reached again (blocked the bot, deactivated, ...).
    #[error("recipient unreachable: {0}")]
    Unreachable(String),

    #[error("delivery failed: {0}")]
    Other(String),
}

pub type DeliveryResult<T> = std::result::Result<T, DeliveryError>;

/// Outbound side of the messaging provider.
///
/// Image sends return the handle the provider assigned to the uploaded bytes,
/// when it reports one.
#[async_trait]
pub trait DeliveryChannel: Send + Sync {
    async fn send_text(&self, chat_id: ChatId, text: &str) -> DeliveryResult<()>;

    async fn send_image(
        &self,
        chat_id: ChatId,
        image: &MediaRef,
    ) -> DeliveryResult<Option<MediaHandle>>;

    async fn send_image_with_caption(
        &self,
        chat_id: ChatId,
        image: &MediaRef,
        caption: &str,
    ) -> DeliveryResult<Option<MediaHandle>>;
}

/// Timed waits used by the engine (batch pacing and provider throttling).
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

#[derive(Clone, Copy, Debug, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        if duration > Duration::from_millis(0) {
            tokio::time::sleep(duration).await;
        }
    }
}
