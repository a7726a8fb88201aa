use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Telegram user id (numeric).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub i64);

/// Telegram chat id (numeric). For private chats this equals the user id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChatId(pub i64);

impl fmt::Display for ChatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Broadcast record id, assigned by the record store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BroadcastId(pub u64);

impl fmt::Display for BroadcastId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Provider-issued reference to previously uploaded image bytes (Telegram `file_id`).
///
/// Valid for any later send to any recipient of the same bot.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MediaHandle(pub String);

impl MediaHandle {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MediaHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An addressable account that may receive broadcasts.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    pub chat_id: ChatId,
    /// Key of the bot account the recipient subscribed through.
    pub account: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub blocked: bool,
    pub joined_at: DateTime<Utc>,
}

impl Recipient {
    pub fn new(chat_id: ChatId, account: impl Into<String>) -> Self {
        Self {
            chat_id,
            account: account.into(),
            username: None,
            first_name: None,
            blocked: false,
            joined_at: Utc::now(),
        }
    }
}

/// Shape of a broadcast payload as recorded in history.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadKind {
    Text,
    Image,
    ImageText,
}

impl PayloadKind {
    pub fn as_str(self) -> &'static str {
        match self {
            PayloadKind::Text => "text",
            PayloadKind::Image => "image",
            PayloadKind::ImageText => "image_text",
        }
    }

    pub fn has_image(self) -> bool {
        !matches!(self, PayloadKind::Text)
    }
}

/// Persisted outcome of one operator action.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcastRecord {
    pub id: BroadcastId,
    pub kind: PayloadKind,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub media_handle: Option<MediaHandle>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub sent: u64,
    #[serde(default)]
    pub failed: u64,
}
