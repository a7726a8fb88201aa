use sha2::{Digest, Sha256};

use crate::{
    domain::{BroadcastRecord, MediaHandle, PayloadKind},
    Error, Result,
};

pub const DEFAULT_IMAGE_NAME: &str = "image.jpg";

/// Image source for a send: a reusable provider handle, or raw bytes that
/// still have to be uploaded once.
#[derive(Clone, PartialEq, Eq)]
pub enum MediaRef {
    Handle(MediaHandle),
    Upload { bytes: Vec<u8>, file_name: String },
}

impl MediaRef {
    pub fn upload(bytes: Vec<u8>, file_name: Option<String>) -> Self {
        let file_name = file_name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_IMAGE_NAME.to_string());
        Self::Upload { bytes, file_name }
    }

    pub fn handle(&self) -> Option<&MediaHandle> {
        match self {
            MediaRef::Handle(h) => Some(h),
            MediaRef::Upload { .. } => None,
        }
    }

    pub fn is_upload(&self) -> bool {
        matches!(self, MediaRef::Upload { .. })
    }

    /// Content digest of pending bytes (used as the media cache key).
    pub fn digest(&self) -> Option<String> {
        match self {
            MediaRef::Handle(_) => None,
            MediaRef::Upload { bytes, .. } => Some(media_digest(bytes)),
        }
    }
}

// Raw image bytes are not useful in logs.
impl std::fmt::Debug for MediaRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MediaRef::Handle(h) => f.debug_tuple("Handle").field(h).finish(),
            MediaRef::Upload { bytes, file_name } => f
                .debug_struct("Upload")
                .field("file_name", file_name)
                .field("len", &bytes.len())
                .finish(),
        }
    }
}

/// Lowercase hex SHA-256 of image bytes.
pub fn media_digest(bytes: &[u8]) -> String {
    let hash = Sha256::digest(bytes);
    hash.iter().map(|b| format!("{b:02x}")).collect()
}

/// What a broadcast delivers. Chosen once per run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Payload {
    Text(String),
    Image(MediaRef),
    ImageWithCaption { image: MediaRef, caption: String },
}

impl Payload {
    /// Build from operator input. Text is trimmed; blank text counts as absent.
    pub fn build(text: Option<String>, media: Option<MediaRef>) -> Result<Self> {
        let text = text
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty());

        match (media, text) {
            (Some(image), Some(caption)) => Ok(Payload::ImageWithCaption { image, caption }),
            (Some(image), None) => Ok(Payload::Image(image)),
            (None, Some(text)) => Ok(Payload::Text(text)),
            (None, None) => Err(Error::InvalidPayload(
                "a broadcast needs text or an image".to_string(),
            )),
        }
    }

    /// Rebuild the payload of a past broadcast. Image broadcasts need their stored handle.
    pub fn from_record(record: &BroadcastRecord) -> Result<Self> {
        let media = match (record.kind.has_image(), &record.media_handle) {
            (false, _) => None,
            (true, Some(h)) => Some(MediaRef::Handle(h.clone())),
            (true, None) => {
                return Err(Error::InvalidPayload(format!(
                    "broadcast #{} has no stored image handle",
                    record.id
                )))
            }
        };
        let text = if record.kind == PayloadKind::Image {
            None
        } else {
            record.text.clone()
        };
        Self::build(text, media)
    }

    pub fn kind(&self) -> PayloadKind {
        match self {
            Payload::Text(_) => PayloadKind::Text,
            Payload::Image(_) => PayloadKind::Image,
            Payload::ImageWithCaption { .. } => PayloadKind::ImageText,
        }
    }

    pub fn text(&self) -> Option<&str> {
        match self {
            Payload::Text(t) => Some(t),
            Payload::Image(_) => None,
            Payload::ImageWithCaption { caption, .. } => Some(caption),
        }
    }

    pub fn media(&self) -> Option<&MediaRef> {
        match self {
            Payload::Text(_) => None,
            Payload::Image(m) => Some(m),
            Payload::ImageWithCaption { image, .. } => Some(image),
        }
    }
}
