use std::sync::Arc;

use tracing::info;

use crate::{
    domain::{BroadcastId, BroadcastRecord},
    ports::BroadcastStore,
    Error, Result,
};

use super::{BroadcastJob, BroadcastSupervisor, MediaRef, Payload};

/// Entry point for the front end: records a broadcast and hands it to the supervisor.
#[derive(Clone)]
pub struct BroadcastService {
    records: Arc<dyn BroadcastStore>,
    supervisor: BroadcastSupervisor,
    account: Option<String>,
}

impl BroadcastService {
    pub fn new(
        records: Arc<dyn BroadcastStore>,
        supervisor: BroadcastSupervisor,
        account: Option<String>,
    ) -> Self {
        Self {
            records,
            supervisor,
            account,
        }
    }

    /// Validate operator input, create the record and start delivery in the background.
    pub async fn start_broadcast(
        &self,
        text: Option<String>,
        media: Option<MediaRef>,
    ) -> Result<BroadcastId> {
        let payload = Payload::build(text, media)?;
        self.launch(payload).await
    }

    /// Deliver a past broadcast again, reusing its stored media handle.
    pub async fn resend(&self, id: BroadcastId) -> Result<BroadcastId> {
        let record = self
            .records
            .get_broadcast(id)
            .await?
            .ok_or(Error::NotFound(id))?;
        let payload = Payload::from_record(&record)?;
        let new_id = self.launch(payload).await?;
        info!("Broadcast {new_id} resends broadcast {id}");
        Ok(new_id)
    }

    pub async fn recent(&self, limit: usize) -> Result<Vec<BroadcastRecord>> {
        self.records.recent_broadcasts(limit).await
    }

    pub async fn shutdown(&self) {
        self.supervisor.shutdown().await;
    }

    async fn launch(&self, payload: Payload) -> Result<BroadcastId> {
        let record = self
            .records
            .create_broadcast(
                payload.kind(),
                payload.text().map(str::to_string),
                payload.media().and_then(MediaRef::handle).cloned(),
            )
            .await?;

        self.supervisor.submit(BroadcastJob {
            broadcast_id: record.id,
            account: self.account.clone(),
            payload,
        })?;
        Ok(record.id)
    }
}
