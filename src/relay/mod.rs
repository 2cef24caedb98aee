// Relay: outbound payloads, the transport seam and the paced worker.
//
// The ingestion loop turns an admitted item into an OutboundJob (prepared
// payloads plus an optional correlation entry) and pushes it onto the
// bounded RelayQueue. A single RelayWorker drains the queue and publishes
// through a Transport. Everything that talks to the chat service goes
// through the Transport trait so the pipeline can be tested with fakes.

pub mod caption;
pub mod media;
pub mod worker;

use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tracing::warn;

pub use worker::{channel, OutboundJob, RelayQueue, RelayWorker};

/// Where a payload's bytes come from.
#[derive(Clone, PartialEq)]
pub enum MediaSource {
    /// Let the chat service fetch the URL itself.
    Url(String),
    /// Upload bytes we already downloaded.
    Upload { file_name: String, bytes: Vec<u8> },
}

impl fmt::Debug for MediaSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaSource::Url(url) => write!(f, "Url({url})"),
            MediaSource::Upload { file_name, bytes } => {
                write!(f, "Upload({file_name}, {} bytes)", bytes.len())
            }
        }
    }
}

/// One outbound attachment.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundMedia {
    Photo {
        source: MediaSource,
        caption: Option<String>,
    },
    Video {
        source: MediaSource,
        caption: Option<String>,
        width: Option<u32>,
        height: Option<u32>,
        duration_secs: Option<u32>,
        cover: Option<String>,
    },
    Animation {
        source: MediaSource,
        caption: Option<String>,
        width: Option<u32>,
        height: Option<u32>,
        duration_secs: Option<u32>,
    },
    Document {
        source: MediaSource,
        caption: Option<String>,
    },
}

impl OutboundMedia {
    pub fn source(&self) -> &MediaSource {
        match self {
            OutboundMedia::Photo { source, .. }
            | OutboundMedia::Video { source, .. }
            | OutboundMedia::Animation { source, .. }
            | OutboundMedia::Document { source, .. } => source,
        }
    }

    pub fn caption(&self) -> Option<&str> {
        match self {
            OutboundMedia::Photo { caption, .. }
            | OutboundMedia::Video { caption, .. }
            | OutboundMedia::Animation { caption, .. }
            | OutboundMedia::Document { caption, .. } => caption.as_deref(),
        }
    }

    /// Bot API type name, as used in `sendMediaGroup` and the send method.
    pub fn kind(&self) -> &'static str {
        match self {
            OutboundMedia::Photo { .. } => "photo",
            OutboundMedia::Video { .. } => "video",
            OutboundMedia::Animation { .. } => "animation",
            OutboundMedia::Document { .. } => "document",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineButton {
    pub text: String,
    pub callback_data: String,
}

/// Rows of buttons.
pub type InlineKeyboard = Vec<Vec<InlineButton>>;

/// The Follow / Unfollow pair attached to author links and suggestions.
pub fn follow_keyboard(handle: &str) -> InlineKeyboard {
    vec![vec![
        InlineButton {
            text: "Follow".into(),
            callback_data: format!("follow.{handle}"),
        },
        InlineButton {
            text: "Unfollow".into(),
            callback_data: format!("unfollow.{handle}"),
        },
    ]]
}

#[derive(Debug, Clone, Default)]
pub struct TextOptions {
    pub reply_to: Option<i64>,
    pub keyboard: Option<InlineKeyboard>,
    /// Send with MarkdownV2 parsing.
    pub markdown: bool,
    pub disable_preview: bool,
}

impl TextOptions {
    pub fn reply_to(message_id: i64) -> Self {
        Self {
            reply_to: Some(message_id),
            ..Default::default()
        }
    }

    pub fn with_keyboard(mut self, keyboard: InlineKeyboard) -> Self {
        self.keyboard = Some(keyboard);
        self
    }
}

/// The outbound chat service.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send one attachment; returns the new message id.
    async fn send_single(
        &self,
        chat_id: i64,
        media: &OutboundMedia,
        reply_to: Option<i64>,
    ) -> Result<i64>;

    /// Send 2–10 attachments as one album; returns the message ids in order.
    async fn send_album(
        &self,
        chat_id: i64,
        media: &[OutboundMedia],
        reply_to: Option<i64>,
    ) -> Result<Vec<i64>>;

    async fn send_text(&self, chat_id: i64, text: &str, opts: &TextOptions) -> Result<i64>;

    async fn answer_callback(&self, callback_id: &str, text: &str, show_alert: bool) -> Result<()>;

    /// Fetch the bytes of a file the chat service stores.
    async fn download_file(&self, file_id: &str) -> Result<Vec<u8>>;
}

/// Send one or many attachments with the right call.
pub async fn send_media(
    transport: &dyn Transport,
    chat_id: i64,
    media: &[OutboundMedia],
    reply_to: Option<i64>,
) -> Result<Vec<i64>> {
    match media {
        [] => Ok(Vec::new()),
        [single] => Ok(vec![transport.send_single(chat_id, single, reply_to).await?]),
        many => transport.send_album(chat_id, many, reply_to).await,
    }
}

/// Messages for the operator. Failures to notify are logged, never raised.
#[derive(Clone)]
pub struct Notifier {
    transport: Arc<dyn Transport>,
    owner_id: i64,
}

impl Notifier {
    pub fn new(transport: Arc<dyn Transport>, owner_id: i64) -> Self {
        Self {
            transport,
            owner_id,
        }
    }

    pub fn owner_id(&self) -> i64 {
        self.owner_id
    }

    pub async fn notify(&self, text: &str) {
        if let Err(e) = self
            .transport
            .send_text(self.owner_id, text, &TextOptions::default())
            .await
        {
            warn!(error = %e, "Failed to notify operator");
        }
    }

    /// Tell the operator an unknown creator was auto-followed.
    pub async fn suggest_follow(&self, handle: &str) {
        let text = format!("Followed https://x.com/{handle}");
        let opts = TextOptions::default().with_keyboard(follow_keyboard(handle));
        if let Err(e) = self.transport.send_text(self.owner_id, &text, &opts).await {
            warn!(error = %e, handle = handle, "Failed to send follow suggestion");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keyboard_callback_data() {
        let kb = follow_keyboard("artist");
        assert_eq!(kb.len(), 1);
        assert_eq!(kb[0][0].callback_data, "follow.artist");
        assert_eq!(kb[0][1].callback_data, "unfollow.artist");
    }

    #[test]
    fn upload_debug_omits_bytes() {
        let src = MediaSource::Upload {
            file_name: "1_01.jpg".into(),
            bytes: vec![0; 2048],
        };
        assert_eq!(format!("{src:?}"), "Upload(1_01.jpg, 2048 bytes)");
    }

    #[test]
    fn accessors_cover_every_variant() {
        let src = MediaSource::Url("u".into());
        let all = [
            OutboundMedia::Photo { source: src.clone(), caption: Some("c".into()) },
            OutboundMedia::Video {
                source: src.clone(),
                caption: None,
                width: None,
                height: None,
                duration_secs: None,
                cover: None,
            },
            OutboundMedia::Animation {
                source: src.clone(),
                caption: None,
                width: None,
                height: None,
                duration_secs: None,
            },
            OutboundMedia::Document { source: src.clone(), caption: None },
        ];
        let kinds: Vec<_> = all.iter().map(|m| m.kind()).collect();
        assert_eq!(kinds, ["photo", "video", "animation", "document"]);
        assert_eq!(all[0].caption(), Some("c"));
        assert!(all.iter().all(|m| m.source() == &src));
    }
}
