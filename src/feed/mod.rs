// Timeline feed: content model and the client seam.
//
// Everything downstream of the feed (admission, filtering, persistence,
// payload building) works on these types. The concrete web client lives in
// `client`; tests drive the pipeline with in-memory implementations of
// `FeedClient`.

pub mod client;
pub mod timeline;
pub mod url;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

/// The author of a content item, as seen from the logged-in account.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Author {
    pub id: String,
    pub handle: String,
    /// Whether the logged-in account follows this author.
    pub following: bool,
    pub description: String,
    pub url: String,
}

/// A mentioned account inside an item's text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mention {
    pub id: String,
    pub handle: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MediaKind {
    Photo,
    Video,
    AnimatedGif,
}

/// A media attachment on a content item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Media {
    pub kind: MediaKind,
    pub url: String,
    pub alt_text: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub duration_ms: Option<u64>,
    /// Poster frame for videos and GIFs.
    pub thumb_url: Option<String>,
}

impl Media {
    pub fn photo(url: impl Into<String>) -> Self {
        Self {
            kind: MediaKind::Photo,
            url: url.into(),
            alt_text: None,
            width: None,
            height: None,
            duration_ms: None,
            thumb_url: None,
        }
    }
}

/// One unit of timeline content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentItem {
    /// Numeric id kept as a string; ids exceed 53 bits.
    pub id: String,
    pub author: Author,
    pub created_at: DateTime<Utc>,
    pub favorite_count: u64,
    pub repost_count: u64,
    pub reply_count: u64,
    pub view_count: Option<u64>,
    pub media: Vec<Media>,
    pub text: String,
    pub hashtags: Vec<String>,
    pub mentions: Vec<Mention>,
    pub url: String,
    /// The reposted original when this item is a repost.
    pub reposted: Option<Box<ContentItem>>,
    /// Injected by the ranking algorithm rather than by a follow.
    pub recommended: bool,
    /// Replies by the same author delivered alongside this item.
    pub thread: Vec<ContentItem>,
}

impl ContentItem {
    pub fn has_media(&self) -> bool {
        !self.media.is_empty()
    }

    pub fn is_repost(&self) -> bool {
        self.reposted.is_some()
    }

    /// True if the item, or one of its author's own thread replies,
    /// mentions `account_id`.
    pub fn mentions_account(&self, account_id: &str) -> bool {
        if account_id.is_empty() {
            return false;
        }
        if self.mentions.iter().any(|m| m.id == account_id) {
            return true;
        }
        self.thread
            .iter()
            .filter(|reply| reply.author.id == self.author.id)
            .any(|reply| reply.mentions.iter().any(|m| m.id == account_id))
    }
}

/// Profile returned by a handle lookup.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthorProfile {
    pub id: String,
    pub handle: String,
    pub following: bool,
}

/// The timeline source and account actions the relay needs.
///
/// Timeline methods return lazy sequences. An `Err` element means the fetch
/// failed from that point on; implementations end the stream after it.
#[async_trait]
pub trait FeedClient: Send + Sync {
    /// The algorithmic "For you" timeline.
    fn ranked_timeline(&self, limit: usize) -> BoxStream<'_, Result<ContentItem>>;

    /// The reverse-chronological "Following" timeline.
    fn chronological_timeline(&self, limit: usize) -> BoxStream<'_, Result<ContentItem>>;

    async fn follow(&self, handle: &str) -> Result<()>;

    async fn unfollow(&self, handle: &str) -> Result<()>;

    async fn author_by_handle(&self, handle: &str) -> Result<AuthorProfile>;

    /// Fetch a single item by id, with its media.
    async fn item_by_id(&self, id: &str) -> Result<ContentItem>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: &str, author: &str) -> ContentItem {
        ContentItem {
            id: id.into(),
            author: Author {
                id: author.into(),
                handle: format!("user{author}"),
                ..Default::default()
            },
            created_at: Utc::now(),
            favorite_count: 0,
            repost_count: 0,
            reply_count: 0,
            view_count: None,
            media: vec![],
            text: String::new(),
            hashtags: vec![],
            mentions: vec![],
            url: String::new(),
            reposted: None,
            recommended: false,
            thread: vec![],
        }
    }

    #[test]
    fn direct_mention_is_detected() {
        let mut it = item("1", "10");
        it.mentions.push(Mention {
            id: "99".into(),
            handle: "relay".into(),
        });
        assert!(it.mentions_account("99"));
        assert!(!it.mentions_account("98"));
    }

    #[test]
    fn self_reply_mention_is_detected() {
        let mut it = item("1", "10");
        let mut reply = item("2", "10");
        reply.mentions.push(Mention {
            id: "99".into(),
            handle: "relay".into(),
        });
        it.thread.push(reply);
        assert!(it.mentions_account("99"));
    }

    #[test]
    fn mention_in_someone_elses_reply_does_not_count() {
        let mut it = item("1", "10");
        let mut reply = item("2", "11");
        reply.mentions.push(Mention {
            id: "99".into(),
            handle: "relay".into(),
        });
        it.thread.push(reply);
        assert!(!it.mentions_account("99"));
    }

    #[test]
    fn empty_account_id_never_matches() {
        let mut it = item("1", "10");
        it.mentions.push(Mention {
            id: String::new(),
            handle: "ghost".into(),
        });
        assert!(!it.mentions_account(""));
    }
}
