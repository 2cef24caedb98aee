// Data models: Rust structs that map to database rows.
//
// These are separate from the queries so the pipeline and the bot can use
// them without depending on a particular backend.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::feed::ContentItem;
use crate::feed::url::clear_query;

/// A relayed item. One row per content id, never updated after insert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayRecord {
    pub id: String,
    pub likes: i64,
    pub reposts: i64,
    pub replies: i64,
    /// Media URLs with their query strings stripped.
    pub media_urls: Vec<String>,
    pub text: String,
    /// When the item itself was posted.
    pub posted_at: DateTime<Utc>,
    pub url: String,
    pub author_id: String,
}

impl RelayRecord {
    pub fn from_item(item: &ContentItem) -> Self {
        Self {
            id: item.id.clone(),
            likes: clamp_count(item.favorite_count),
            reposts: clamp_count(item.repost_count),
            replies: clamp_count(item.reply_count),
            media_urls: item.media.iter().map(|m| clear_query(&m.url)).collect(),
            text: item.text.clone(),
            posted_at: item.created_at,
            url: item.url.clone(),
            author_id: item.author.id.clone(),
        }
    }

    /// Media URLs as stored: pipe-joined.
    pub fn media_column(&self) -> String {
        self.media_urls.join("|")
    }
}

fn clamp_count(n: u64) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

/// A stored image fingerprint: a 64-bit perceptual hash split into four
/// 4-hex-digit segments so candidates can be found with indexed equality.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageFingerprint {
    pub id: i64,
    pub segments: [String; 4],
    pub chat_id: i64,
    pub message_id: i64,
    pub created_at: String,
}

/// Row counts for `status`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RelayStats {
    pub relay_count: i64,
    pub suppressed_count: i64,
    pub fingerprint_count: i64,
    /// created_at of the newest relay record.
    pub last_relay_at: Option<String>,
}

/// Storage format for timestamps (matches SQLite's `datetime('now')`).
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub fn format_timestamp(t: DateTime<Utc>) -> String {
    t.format(TIMESTAMP_FORMAT).to_string()
}
