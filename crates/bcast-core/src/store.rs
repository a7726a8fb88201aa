//! JSON file persistence for recipients, broadcast history and the media cache.
//!
//! The whole dataset lives in one file that is rewritten atomically (temp file
//! + rename) on every mutation. Writes are serialized by the in-process lock.
//! A mutation is applied to a copy and only becomes visible once that copy is
//! on disk, so a failed write leaves both memory and file unchanged.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::{
    domain::{BroadcastId, BroadcastRecord, MediaHandle, PayloadKind, Recipient},
    ports::{BroadcastStore, MediaCache, RecipientStore},
    Error, Result,
};

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct StoreData {
    #[serde(default)]
    last_broadcast_id: u64,
    #[serde(default)]
    recipients: Vec<Recipient>,
    #[serde(default)]
    broadcasts: Vec<BroadcastRecord>,
    /// Image digest -> provider handle.
    #[serde(default)]
    media_cache: BTreeMap<String, MediaHandle>,
}

impl StoreData {
    fn broadcast_mut(&mut self, id: BroadcastId) -> Result<&mut BroadcastRecord> {
        self.broadcasts
            .iter_mut()
            .find(|b| b.id == id)
            .ok_or(Error::NotFound(id))
    }
}

fn matches_account(recipient: &Recipient, account: Option<&str>) -> bool {
    account.map_or(true, |a| recipient.account == a)
}

pub struct JsonStore {
    path: PathBuf,
    data: Mutex<StoreData>,
}

impl JsonStore {
    /// Open (or lazily create) the store at `path`. A missing file is an empty store.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let data = match tokio::fs::read(&path).await {
            Ok(bytes) if bytes.is_empty() => StoreData::default(),
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => StoreData::default(),
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            path,
            data: Mutex::new(data),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Insert a recipient or refresh its profile fields. Never changes `blocked`.
    pub async fn upsert_recipient(&self, recipient: Recipient) -> Result<()> {
        let mut data = self.data.lock().await;
        let mut next = data.clone();
        match next
            .recipients
            .iter_mut()
            .find(|r| r.chat_id == recipient.chat_id && r.account == recipient.account)
        {
            Some(existing) => {
                existing.username = recipient.username;
                existing.first_name = recipient.first_name;
            }
            None => next.recipients.push(recipient),
        }
        self.commit(&mut data, next).await
    }

    pub async fn count_recipients(&self, account: Option<&str>) -> usize {
        let data = self.data.lock().await;
        data.recipients
            .iter()
            .filter(|r| matches_account(r, account))
            .count()
    }

    pub async fn count_blocked(&self, account: Option<&str>) -> usize {
        let data = self.data.lock().await;
        data.recipients
            .iter()
            .filter(|r| r.blocked && matches_account(r, account))
            .count()
    }

    async fn commit(&self, current: &mut StoreData, next: StoreData) -> Result<()> {
        self.save(&next).await?;
        *current = next;
        Ok(())
    }

    async fn save(&self, data: &StoreData) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(data)?;
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await.map_err(|e| {
            Error::Store(format!(
                "failed to replace {}: {e}",
                self.path.display()
            ))
        })
    }
}

#[async_trait]
impl RecipientStore for JsonStore {
    async fn active_recipients(&self, account: Option<&str>) -> Result<Vec<Recipient>> {
        let data = self.data.lock().await;
        Ok(data
            .recipients
            .iter()
            .filter(|r| !r.blocked && matches_account(r, account))
            .cloned()
            .collect())
    }

    async fn mark_blocked(&self, recipient: &Recipient) -> Result<()> {
        let mut data = self.data.lock().await;
        let Some(idx) = data.recipients.iter().position(|r| {
            r.chat_id == recipient.chat_id && r.account == recipient.account && !r.blocked
        }) else {
            return Ok(());
        };
        let mut next = data.clone();
        next.recipients[idx].blocked = true;
        self.commit(&mut data, next).await
    }
}

#[async_trait]
impl BroadcastStore for JsonStore {
    async fn create_broadcast(
        &self,
        kind: PayloadKind,
        text: Option<String>,
        media_handle: Option<MediaHandle>,
    ) -> Result<BroadcastRecord> {
        let mut data = self.data.lock().await;
        let mut next = data.clone();
        next.last_broadcast_id += 1;
        let record = BroadcastRecord {
            id: BroadcastId(next.last_broadcast_id),
            kind,
            text,
            media_handle,
            created_at: Utc::now(),
            sent: 0,
            failed: 0,
        };
        next.broadcasts.push(record.clone());
        self.commit(&mut data, next).await?;
        Ok(record)
    }

    async fn persist_media_handle(&self, id: BroadcastId, handle: &MediaHandle) -> Result<()> {
        let mut data = self.data.lock().await;
        let mut next = data.clone();
        next.broadcast_mut(id)?.media_handle = Some(handle.clone());
        self.commit(&mut data, next).await
    }

    async fn persist_counters(&self, id: BroadcastId, sent: u64, failed: u64) -> Result<()> {
        let mut data = self.data.lock().await;
        let mut next = data.clone();
        let record = next.broadcast_mut(id)?;
        record.sent = sent;
        record.failed = failed;
        self.commit(&mut data, next).await
    }

    async fn get_broadcast(&self, id: BroadcastId) -> Result<Option<BroadcastRecord>> {
        let data = self.data.lock().await;
        Ok(data.broadcasts.iter().find(|b| b.id == id).cloned())
    }

    async fn recent_broadcasts(&self, limit: usize) -> Result<Vec<BroadcastRecord>> {
        let data = self.data.lock().await;
        let mut out: Vec<_> = data.broadcasts.clone();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        out.truncate(limit);
        Ok(out)
    }
}

#[async_trait]
impl MediaCache for JsonStore {
    async fn cached_handle(&self, digest: &str) -> Result<Option<MediaHandle>> {
        let data = self.data.lock().await;
        Ok(data.media_cache.get(digest).cloned())
    }

    async fn remember_handle(&self, digest: &str, handle: &MediaHandle) -> Result<()> {
        let mut data = self.data.lock().await;
        let mut next = data.clone();
        next.media_cache.insert(digest.to_string(), handle.clone());
        self.commit(&mut data, next).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ChatId;

    fn temp_path(name: &str) -> PathBuf {
        let p = std::env::temp_dir().join(format!("bcast-store-{name}-{}.json", std::process::id()));
        let _ = std::fs::remove_file(&p);
        p
    }

    #[tokio::test]
    async fn missing_file_opens_empty() {
        let path = temp_path("missing");
        let store = JsonStore::open(&path).await.unwrap();
        assert!(store.active_recipients(None).await.unwrap().is_empty());
        assert!(store.recent_broadcasts(5).await.unwrap().is_empty());
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn filters_by_account_and_blocked_flag() {
        let path = temp_path("filter");
        let store = JsonStore::open(&path).await.unwrap();
        store
            .upsert_recipient(Recipient::new(ChatId(1), "a"))
            .await
            .unwrap();
        store
            .upsert_recipient(Recipient::new(ChatId(2), "a"))
            .await
            .unwrap();
        store
            .upsert_recipient(Recipient::new(ChatId(1), "b"))
            .await
            .unwrap();

        let a = store.active_recipients(Some("a")).await.unwrap();
        assert_eq!(a.len(), 2);

        store.mark_blocked(&a[0]).await.unwrap();
        // Idempotent.
        store.mark_blocked(&a[0]).await.unwrap();

        assert_eq!(store.active_recipients(Some("a")).await.unwrap().len(), 1);
        assert_eq!(store.active_recipients(None).await.unwrap().len(), 2);
        assert_eq!(store.count_recipients(Some("a")).await, 2);
        assert_eq!(store.count_blocked(Some("a")).await, 1);
        assert_eq!(store.count_blocked(Some("b")).await, 0);

        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn upsert_keeps_blocked_flag() {
        let path = temp_path("upsert");
        let store = JsonStore::open(&path).await.unwrap();
        let r = Recipient::new(ChatId(5), "a");
        store.upsert_recipient(r.clone()).await.unwrap();
        store.mark_blocked(&r).await.unwrap();

        let mut renamed = r.clone();
        renamed.username = Some("new".into());
        store.upsert_recipient(renamed).await.unwrap();

        assert!(store.active_recipients(None).await.unwrap().is_empty());
        assert_eq!(store.count_recipients(None).await, 1);
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn broadcasts_survive_reopen() {
        let path = temp_path("reopen");
        {
            let store = JsonStore::open(&path).await.unwrap();
            let first = store
                .create_broadcast(PayloadKind::Text, Some("one".into()), None)
                .await
                .unwrap();
            let second = store
                .create_broadcast(PayloadKind::Image, None, None)
                .await
                .unwrap();
            assert_eq!(first.id, BroadcastId(1));
            assert_eq!(second.id, BroadcastId(2));

            store
                .persist_media_handle(second.id, &MediaHandle("f".into()))
                .await
                .unwrap();
            store.persist_counters(second.id, 10, 2).await.unwrap();
            store
                .remember_handle("digest", &MediaHandle("f".into()))
                .await
                .unwrap();
        }

        let store = JsonStore::open(&path).await.unwrap();
        let recent = store.recent_broadcasts(10).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].id, BroadcastId(2));
        assert_eq!(recent[0].media_handle, Some(MediaHandle("f".into())));
        assert_eq!((recent[0].sent, recent[0].failed), (10, 2));
        assert_eq!(store.recent_broadcasts(1).await.unwrap().len(), 1);
        assert_eq!(
            store.cached_handle("digest").await.unwrap(),
            Some(MediaHandle("f".into()))
        );

        let next = store
            .create_broadcast(PayloadKind::Text, Some("three".into()), None)
            .await
            .unwrap();
        assert_eq!(next.id, BroadcastId(3));
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn failed_write_leaves_no_trace() {
        let path = temp_path("failed-write");
        let store = JsonStore::open(&path).await.unwrap();
        store
            .upsert_recipient(Recipient::new(ChatId(1), "a"))
            .await
            .unwrap();

        // A directory in place of the data file makes the final rename fail.
        std::fs::remove_file(&path).unwrap();
        std::fs::create_dir(&path).unwrap();
        assert!(store
            .create_broadcast(PayloadKind::Text, Some("lost".into()), None)
            .await
            .is_err());
        let recipient = store.active_recipients(None).await.unwrap().remove(0);
        assert!(store.mark_blocked(&recipient).await.is_err());
        std::fs::remove_dir(&path).unwrap();

        assert_eq!(store.active_recipients(None).await.unwrap().len(), 1);
        let next = store
            .create_broadcast(PayloadKind::Text, Some("ok".into()), None)
            .await
            .unwrap();
        assert_eq!(next.id, BroadcastId(1));
        let recent = store.recent_broadcasts(10).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].text.as_deref(), Some("ok"));

        let reopened = JsonStore::open(&path).await.unwrap();
        assert_eq!(reopened.recent_broadcasts(10).await.unwrap().len(), 1);
        assert_eq!(reopened.active_recipients(None).await.unwrap().len(), 1);

        let _ = std::fs::remove_file(&path);
        let _ = std::fs::remove_file(format!("{}.tmp", path.display()));
    }

    #[tokio::test]
    async fn unknown_broadcast_updates_fail() {
        let path = temp_path("unknown");
        let store = JsonStore::open(&path).await.unwrap();
        assert!(matches!(
            store.persist_counters(BroadcastId(3), 1, 1).await,
            Err(Error::NotFound(BroadcastId(3)))
        ));
    }
}
