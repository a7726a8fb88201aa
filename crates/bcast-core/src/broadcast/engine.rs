use std::sync::Arc;

use tracing::{error, info, warn};

use crate::{
    domain::{BroadcastId, ChatId, MediaHandle, Recipient},
    ports::{
        BroadcastStore, DeliveryChannel, DeliveryError, DeliveryResult, MediaCache,
        RecipientStore, Sleeper, TokioSleeper,
    },
    Result,
};

use super::{BroadcastSettings, MediaRef, Payload};

/// One prepared message addressed to every active recipient of `account`.
#[derive(Clone, Debug)]
pub struct BroadcastJob {
    pub broadcast_id: BroadcastId,
    /// `None` delivers to recipients of every account.
    pub account: Option<String>,
    pub payload: Payload,
}

/// Final counters of a completed run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunReport {
    pub broadcast_id: BroadcastId,
    pub total: usize,
    pub sent: u64,
    pub failed: u64,
    pub media_handle: Option<MediaHandle>,
}

/// Delivers broadcasts: recipient snapshot, sequential sends, batch pacing,
/// a single retry after provider throttling, and media handle promotion.
pub struct BroadcastEngine {
    recipients: Arc<dyn RecipientStore>,
    records: Arc<dyn BroadcastStore>,
    media_cache: Arc<dyn MediaCache>,
    channel: Arc<dyn DeliveryChannel>,
    sleeper: Arc<dyn Sleeper>,
    settings: BroadcastSettings,
}

/// Single-assignment cell for the handle promoted from the first upload.
#[derive(Default)]
struct MediaSlot(Option<MediaRef>);

impl MediaSlot {
    fn get(&self) -> Option<&MediaRef> {
        self.0.as_ref()
    }

    fn is_set(&self) -> bool {
        self.0.is_some()
    }

    fn promote(&mut self, handle: MediaHandle) -> bool {
        if self.0.is_some() {
            return false;
        }
        self.0 = Some(MediaRef::Handle(handle));
        true
    }

    fn handle(&self) -> Option<&MediaHandle> {
        self.0.as_ref().and_then(MediaRef::handle)
    }
}

/// State owned by one run for its lifetime.
struct RunState {
    broadcast_id: BroadcastId,
    payload: Payload,
    digest: Option<String>,
    promoted: MediaSlot,
    /// Handle found in the media cache, not yet accepted by the provider in this run.
    cached: Option<MediaRef>,
    sent: u64,
    failed: u64,
}

impl RunState {
    /// Image for the next attempt: the promoted handle once known, else the payload's own.
    fn image(&self) -> Option<&MediaRef> {
        self.promoted
            .get()
            .or(self.cached.as_ref())
            .or_else(|| self.payload.media())
    }

    fn uploading(&self) -> bool {
        !self.promoted.is_set()
            && self.cached.is_none()
            && self.payload.media().is_some_and(MediaRef::is_upload)
    }

    fn media_handle(&self) -> Option<MediaHandle> {
        self.promoted
            .handle()
            .or_else(|| self.cached.as_ref().and_then(MediaRef::handle))
            .or_else(|| self.payload.media().and_then(MediaRef::handle))
            .cloned()
    }
}

impl BroadcastEngine {
    pub fn new(
        recipients: Arc<dyn RecipientStore>,
        records: Arc<dyn BroadcastStore>,
        media_cache: Arc<dyn MediaCache>,
        channel: Arc<dyn DeliveryChannel>,
        settings: BroadcastSettings,
    ) -> Self {
        Self {
            recipients,
            records,
            media_cache,
            channel,
            sleeper: Arc::new(TokioSleeper),
            settings,
        }
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Run one broadcast to completion.
    ///
    /// Per-recipient failures never abort the run. Errors are returned only when
    /// the recipient snapshot cannot be read or the final counters cannot be stored.
    pub async fn run(&self, job: BroadcastJob) -> Result<RunReport> {
        let BroadcastJob {
            broadcast_id,
            account,
            payload,
        } = job;

        info!(
            "Starting broadcast {broadcast_id} ({})",
            payload.kind().as_str()
        );

        let recipients = self.recipients.active_recipients(account.as_deref()).await?;
        let total = recipients.len();
        info!("Broadcast {broadcast_id}: {total} recipients to notify");

        let digest = payload.media().and_then(MediaRef::digest);
        let mut run = RunState {
            broadcast_id,
            payload,
            digest,
            promoted: MediaSlot::default(),
            cached: None,
            sent: 0,
            failed: 0,
        };

        if total > 0 {
            self.resolve_cached_media(&mut run).await;
        }

        let batch_size = self.settings.batch_size.max(1);
        for (idx, recipient) in recipients.iter().enumerate() {
            if self.deliver(&mut run, recipient).await {
                run.sent += 1;
            } else {
                run.failed += 1;
            }

            if (idx + 1) % batch_size == 0 {
                self.sleeper.sleep(self.settings.batch_delay).await;
            }
        }

        if let Err(e) = self
            .records
            .persist_counters(broadcast_id, run.sent, run.failed)
            .await
        {
            error!("Broadcast {broadcast_id}: failed to store counters: {e}");
            return Err(e);
        }

        info!(
            "Broadcast {broadcast_id} complete: sent={}, failed={}",
            run.sent, run.failed
        );

        Ok(RunReport {
            broadcast_id,
            total,
            sent: run.sent,
            failed: run.failed,
            media_handle: run.media_handle(),
        })
    }

    /// Skip the upload entirely when these exact bytes were uploaded by an earlier run.
    async fn resolve_cached_media(&self, run: &mut RunState) {
        let Some(digest) = run.digest.as_deref() else {
            return;
        };

        let handle = match self.media_cache.cached_handle(digest).await {
            Ok(Some(h)) => h,
            Ok(None) => return,
            Err(e) => {
                warn!("Broadcast {}: media cache lookup failed: {e}", run.broadcast_id);
                return;
            }
        };

        info!(
            "Broadcast {}: reusing cached media handle",
            run.broadcast_id
        );
        self.store_handle(run.broadcast_id, &handle).await;
        run.cached = Some(MediaRef::Handle(handle));
    }

    /// Deliver to one recipient. Returns whether it counts as sent.
    async fn deliver(&self, run: &mut RunState, recipient: &Recipient) -> bool {
        let err = match self.send(run, recipient.chat_id).await {
            Ok(()) => return true,
            Err(e) => e,
        };

        let DeliveryError::RetryAfter(delay) = err else {
            self.record_failure(run.broadcast_id, recipient, err).await;
            return false;
        };

        // Provider throttling applies to the whole loop, not just this recipient.
        warn!(
            "Broadcast {}: rate limited, sleeping {}s",
            run.broadcast_id,
            delay.as_secs_f64()
        );
        self.sleeper.sleep(delay).await;

        match self.send(run, recipient.chat_id).await {
            Ok(()) => true,
            Err(e) => {
                error!(
                    "Broadcast {}: retry failed for {}: {e}",
                    run.broadcast_id, recipient.chat_id
                );
                self.record_failure(run.broadcast_id, recipient, e).await;
                false
            }
        }
    }

    /// One delivery attempt. A cached handle the provider refuses is dropped and
    /// the raw bytes are uploaded instead (handles do not survive a bot change).
    async fn send(&self, run: &mut RunState, chat_id: ChatId) -> DeliveryResult<()> {
        match self.attempt(run, chat_id).await {
            Err(DeliveryError::Other(reason)) if run.cached.is_some() => {
                warn!(
                    "Broadcast {}: cached media handle rejected ({reason}), uploading image",
                    run.broadcast_id
                );
                run.cached = None;
                self.attempt(run, chat_id).await
            }
            result => result,
        }
    }

    async fn attempt(&self, run: &mut RunState, chat_id: ChatId) -> DeliveryResult<()> {
        let uploading = run.uploading();

        let returned = match (&run.payload, run.image()) {
            (Payload::Text(text), _) => {
                self.channel.send_text(chat_id, text).await?;
                None
            }
            (Payload::Image(_), Some(image)) => self.channel.send_image(chat_id, image).await?,
            (Payload::ImageWithCaption { caption, .. }, Some(image)) => {
                self.channel
                    .send_image_with_caption(chat_id, image, caption)
                    .await?
            }
            // Image payloads always carry media.
            (_, None) => None,
        };

        if uploading {
            if let Some(handle) = returned {
                self.promote(run, handle).await;
            }
        } else if let Some(MediaRef::Handle(handle)) = run.cached.take() {
            run.promoted.promote(handle);
        }
        Ok(())
    }

    async fn promote(&self, run: &mut RunState, handle: MediaHandle) {
        if !run.promoted.promote(handle.clone()) {
            return;
        }
        info!(
            "Broadcast {}: got media handle from first send",
            run.broadcast_id
        );

        self.store_handle(run.broadcast_id, &handle).await;
        if let Some(digest) = run.digest.as_deref() {
            if let Err(e) = self.media_cache.remember_handle(digest, &handle).await {
                warn!(
                    "Broadcast {}: failed to cache media handle: {e}",
                    run.broadcast_id
                );
            }
        }
    }

    async fn store_handle(&self, id: BroadcastId, handle: &MediaHandle) {
        if let Err(e) = self.records.persist_media_handle(id, handle).await {
            warn!("Broadcast {id}: failed to store media handle: {e}");
        }
    }

    async fn record_failure(&self, id: BroadcastId, recipient: &Recipient, err: DeliveryError) {
        match err {
            DeliveryError::Unreachable(reason) => {
                info!(
                    "Broadcast {id}: recipient {} unreachable ({reason}), marking as blocked",
                    recipient.chat_id
                );
                if let Err(e) = self.recipients.mark_blocked(recipient).await {
                    warn!(
                        "Broadcast {id}: failed to mark {} blocked: {e}",
                        recipient.chat_id
                    );
                }
            }
            other => {
                error!(
                    "Broadcast {id}: failed to send to {}: {other}",
                    recipient.chat_id
                );
            }
        }
    }
}
